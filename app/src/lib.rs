pub mod app;
pub mod config;
pub mod ui;

pub use app::{parse_command, ChatConsole, Command, Mode, Reply, TranscriptView};
pub use config::{default_settings_dir, load_ui_settings, save_ui_settings, UiSettings};
pub use ui::RenderOptions;
