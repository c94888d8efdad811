use thiserror::Error;

/// Failure kinds surfaced by the transport wrapper.
#[derive(Error, Debug)]
pub enum ApiError {
    /// The request never reached a server.
    #[error("network error: {0}")]
    Network(String),

    /// The server rejected the credential (401/403).
    #[error("authentication rejected (HTTP {status})")]
    Authentication { status: u16 },

    #[error("{message}")]
    RequestFailed { status: u16, message: String },

    #[error("unexpected response payload: {0}")]
    Decode(#[from] serde_json::Error),
}

impl ApiError {
    /// Network and authentication failures end the session.
    pub fn ends_session(&self) -> bool {
        matches!(self, Self::Network(_) | Self::Authentication { .. })
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            Self::Authentication { status } | Self::RequestFailed { status, .. } => Some(*status),
            Self::Network(_) | Self::Decode(_) => None,
        }
    }
}

pub type ApiResult<T> = std::result::Result<T, ApiError>;
