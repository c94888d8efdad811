use crate::poller::PollTiming;
use directories::BaseDirs;
use serde::Deserialize;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

pub const API_URL_VAR: &str = "CHATLINE_API_URL";
pub const ACCESS_TOKEN_VAR: &str = "CHATLINE_ACCESS_TOKEN";

#[derive(Debug, Clone)]
pub struct ClientSettings {
    pub api_url: String,
    pub access_token: Option<String>,
    pub poll: PollTiming,
}

#[derive(thiserror::Error, Debug)]
pub enum ConfigError {
    #[error("Chat service not configured; set CHATLINE_API_URL or create chatline.yaml.")]
    Missing,
    #[error("Chat service configuration invalid: {0}")]
    Invalid(String),
}

impl ConfigError {
    pub fn user_message(&self) -> String {
        match self {
            Self::Missing => {
                "Chat service not configured; set CHATLINE_API_URL or create chatline.yaml."
                    .to_string()
            }
            Self::Invalid(detail) => format!("Chat service not configured: {detail}."),
        }
    }
}

/// Values that take precedence over the config file.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub api_url: Option<String>,
    pub access_token: Option<String>,
}

impl Overrides {
    /// Read overrides from the process environment, loading `.env` first.
    pub fn from_environment() -> Self {
        dotenvy::dotenv().ok();
        Self {
            api_url: std::env::var(API_URL_VAR).ok(),
            access_token: std::env::var(ACCESS_TOKEN_VAR).ok(),
        }
    }

    /// Layer `other` on top of `self`.
    pub fn merge(self, other: Overrides) -> Self {
        Self {
            api_url: other.api_url.or(self.api_url),
            access_token: other.access_token.or(self.access_token),
        }
    }
}

impl ClientSettings {
    /// Load settings from `chatline.yaml` (if any) and the environment.
    pub fn load(cli: Overrides) -> Result<Self, ConfigError> {
        let section = match locate_config_file() {
            Some(path) => Some(read_client_section(&path)?),
            None => None,
        };
        resolve_client_settings(section, Overrides::from_environment().merge(cli))
    }

    pub fn from_file(path: &Path, overrides: Overrides) -> Result<Self, ConfigError> {
        let section = read_client_section(path)?;
        resolve_client_settings(Some(section), overrides)
    }
}

fn read_client_section(path: &Path) -> Result<ClientSection, ConfigError> {
    let contents = fs::read_to_string(path).map_err(|err| {
        ConfigError::Invalid(format!("failed to read {}: {err}", path.display()))
    })?;
    let config: ChatlineConfig = serde_yaml::from_str(&contents)
        .map_err(|err| ConfigError::Invalid(format!("invalid chatline.yaml: {err}")))?;
    config
        .client
        .ok_or_else(|| ConfigError::Invalid("missing `client` section".to_string()))
}

fn resolve_client_settings(
    section: Option<ClientSection>,
    overrides: Overrides,
) -> Result<ClientSettings, ConfigError> {
    let section = section.unwrap_or_default();
    let api_url = overrides
        .api_url
        .or(section.api_url)
        .map(|url| url.trim().to_string())
        .filter(|url| !url.is_empty())
        .ok_or(ConfigError::Missing)?;
    let parsed = url::Url::parse(&api_url)
        .map_err(|err| ConfigError::Invalid(format!("api_url `{api_url}` is not a URL: {err}")))?;
    if !matches!(parsed.scheme(), "http" | "https") {
        return Err(ConfigError::Invalid(format!(
            "api_url must use http or https, got `{}`",
            parsed.scheme()
        )));
    }

    let access_token = overrides
        .access_token
        .or(section.access_token)
        .map(|token| token.trim().to_string())
        .filter(|token| !token.is_empty());

    let defaults = PollTiming::default();
    let poll_section = section.poll.unwrap_or_default();
    let poll = PollTiming {
        initial_delay: millis(
            poll_section.initial_delay_ms,
            defaults.initial_delay,
            "initial_delay_ms",
        )?,
        interval: millis(poll_section.interval_ms, defaults.interval, "interval_ms")?,
    };

    Ok(ClientSettings {
        api_url: api_url.trim_end_matches('/').to_string(),
        access_token,
        poll,
    })
}

fn millis(value: Option<u64>, default: Duration, field: &str) -> Result<Duration, ConfigError> {
    match value {
        None => Ok(default),
        Some(0) => Err(ConfigError::Invalid(format!("poll.{field} must be positive"))),
        Some(ms) => Ok(Duration::from_millis(ms)),
    }
}

fn locate_config_file() -> Option<PathBuf> {
    chatline_yaml_candidates()
        .into_iter()
        .find(|path| path.exists())
}

fn chatline_yaml_candidates() -> Vec<PathBuf> {
    let mut paths = Vec::new();
    if let Some(base) = BaseDirs::new() {
        let config_dir = base.config_dir().join("chatline");
        paths.push(config_dir.join("chatline.yaml"));
        paths.push(config_dir.join("chatline.yml"));
        let home_dir = base.home_dir();
        paths.push(home_dir.join(".chatline").join("chatline.yaml"));
        paths.push(home_dir.join(".chatline").join("chatline.yml"));
    } else {
        paths.push(PathBuf::from("chatline.yaml"));
        paths.push(PathBuf::from("chatline.yml"));
    }
    paths
}

#[derive(Debug, Deserialize)]
struct ChatlineConfig {
    client: Option<ClientSection>,
}

#[derive(Debug, Default, Deserialize)]
struct ClientSection {
    #[serde(default)]
    api_url: Option<String>,
    #[serde(default)]
    access_token: Option<String>,
    #[serde(default)]
    poll: Option<PollSection>,
}

#[derive(Debug, Default, Deserialize)]
struct PollSection {
    #[serde(default)]
    initial_delay_ms: Option<u64>,
    #[serde(default)]
    interval_ms: Option<u64>,
}
