use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use std::sync::Arc;
use tokio::sync::mpsc::{unbounded_channel, UnboundedReceiver, UnboundedSender};
use tracing::info;

/// Why the session credential was torn down.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SignOutReason {
    /// No response could be obtained from the server.
    Unreachable,
    /// The server answered 401 or 403.
    Rejected { status: u16 },
}

/// Signals for the identity collaborator. A `SignedOut` event means the UI
/// should return to its unauthenticated entry point.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    SignedOut { reason: SignOutReason },
}

#[derive(Debug, Clone, Default)]
pub struct Credentials {
    pub access_token: Option<String>,
    pub expires_at: Option<DateTime<Utc>>,
}

impl Credentials {
    /// The token to send, if one is present and has not expired.
    pub fn bearer(&self) -> Option<&str> {
        let token = self.access_token.as_deref()?.trim();
        if token.is_empty() {
            return None;
        }
        match self.expires_at {
            Some(expiry) if Utc::now() >= expiry => None,
            _ => Some(token),
        }
    }
}

/// Shared credential state read by the transport on every request.
#[derive(Clone)]
pub struct Session {
    credentials: Arc<RwLock<Credentials>>,
    events_tx: UnboundedSender<SessionEvent>,
}

impl Session {
    pub fn new(access_token: Option<String>) -> (Self, UnboundedReceiver<SessionEvent>) {
        let (events_tx, events_rx) = unbounded_channel();
        (
            Self {
                credentials: Arc::new(RwLock::new(Credentials {
                    access_token,
                    expires_at: None,
                })),
                events_tx,
            },
            events_rx,
        )
    }

    /// A session with no credential whose events nobody listens to.
    pub fn anonymous() -> Self {
        Self::new(None).0
    }

    pub fn access_token(&self) -> Option<String> {
        self.credentials.read().bearer().map(str::to_owned)
    }

    pub fn is_signed_in(&self) -> bool {
        self.credentials.read().bearer().is_some()
    }

    pub fn sign_in(&self, access_token: impl Into<String>, expires_at: Option<DateTime<Utc>>) {
        let mut credentials = self.credentials.write();
        credentials.access_token = Some(access_token.into());
        credentials.expires_at = expires_at;
    }

    /// Clear the credential and notify listeners.
    pub fn sign_out(&self, reason: SignOutReason) {
        {
            let mut credentials = self.credentials.write();
            credentials.access_token = None;
            credentials.expires_at = None;
        }
        info!("reason" = ?reason, "session signed out");
        self.events_tx
            .send(SessionEvent::SignedOut { reason })
            .ok();
    }
}
