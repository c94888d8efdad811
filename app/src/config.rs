use anyhow::{Context, Result};
use directories::BaseDirs;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::warn;

const SETTINGS_FILE: &str = "ui_settings.json";

/// Presentation preferences. Nothing here affects the chat data model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct UiSettings {
    #[serde(default = "UiSettings::default_show_tool_calls")]
    pub show_tool_calls: bool,
    #[serde(default = "UiSettings::default_confirm_deletes")]
    pub confirm_deletes: bool,
    #[serde(default)]
    pub show_timestamps: bool,
    #[serde(default)]
    pub last_thread: Option<String>,
}

impl Default for UiSettings {
    fn default() -> Self {
        Self {
            show_tool_calls: UiSettings::default_show_tool_calls(),
            confirm_deletes: UiSettings::default_confirm_deletes(),
            show_timestamps: false,
            last_thread: None,
        }
    }
}

impl UiSettings {
    fn default_show_tool_calls() -> bool {
        true
    }

    fn default_confirm_deletes() -> bool {
        true
    }
}

pub fn default_settings_dir() -> PathBuf {
    if let Some(base) = BaseDirs::new() {
        base.config_dir().join("chatline")
    } else {
        PathBuf::from(".chatline")
    }
}

pub async fn load_ui_settings(dir: &Path) -> Result<UiSettings> {
    let path = dir.join(SETTINGS_FILE);
    match tokio::fs::read_to_string(&path).await {
        Ok(contents) => match serde_json::from_str(&contents) {
            Ok(settings) => Ok(settings),
            Err(err) => {
                let defaults = UiSettings::default();
                save_ui_settings(dir, &defaults).await?;
                warn!(
                    error = ?err,
                    "failed to parse ui_settings.json, resetting to defaults"
                );
                Ok(defaults)
            }
        },
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(UiSettings::default()),
        Err(err) => Err(err).context("failed to read ui_settings.json"),
    }
}

pub async fn save_ui_settings(dir: &Path, settings: &UiSettings) -> Result<()> {
    tokio::fs::create_dir_all(dir)
        .await
        .with_context(|| format!("failed to create directory {}", dir.display()))?;
    let path = dir.join(SETTINGS_FILE);
    let serialized = serde_json::to_string_pretty(settings)?;
    tokio::fs::write(&path, serialized)
        .await
        .with_context(|| format!("failed to write ui_settings.json at {}", path.display()))
}
