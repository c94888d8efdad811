pub mod api;
pub mod auth;
pub mod config;
pub mod error;
pub mod fake;
pub mod model;
pub mod poller;
pub mod state;
pub mod telemetry;
pub mod transport;

pub use api::ChatApi;
pub use auth::{Session, SessionEvent, SignOutReason};
pub use config::{ClientSettings, ConfigError, Overrides};
pub use error::ApiError;
pub use fake::{InMemoryBackend, ScriptedReply};
pub use model::{CurrentChat, Message, MessageContent, MessageRole, Thread};
pub use poller::PollTiming;
pub use state::{ChatStore, Notice, NoticeLevel, StoreEvent, SyncPhase};
pub use transport::{HttpBackend, Method, ReqwestBackend, Transport};
