/// Convenient Result alias.
pub type RtResult<T> = Result<T, RealtimeError>;

/// Real-time subsystem error type.
///
/// Only `AuthProbe` and the invocation variants are expected to reach
/// callers; connect-time failures are contained per hub and logged.
#[derive(Debug, thiserror::Error)]
pub enum RealtimeError {
    #[error("authentication probe failed: {0}")]
    AuthProbe(String),

    #[error("unauthorized: {0}")]
    Unauthorized(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("real-time transport blocked: {0}")]
    TransportBlocked(String),

    #[error("handshake failed: {0}")]
    Handshake(String),

    #[error("hub '{0}' is not connected")]
    NotConnected(String),

    #[error("invocation of '{method}' timed out after {seconds}s")]
    InvocationTimeout { method: String, seconds: u64 },

    #[error("invocation of '{method}' failed: {reason}")]
    Invocation { method: String, reason: String },

    #[error("server error: {0}")]
    Server(String),

    #[error("configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("internal error: {0}")]
    Internal(#[from] anyhow::Error),
}

impl RealtimeError {
    /// True when the failure indicates the session cookie was missing,
    /// expired, or rejected.
    pub fn is_auth(&self) -> bool {
        matches!(self, Self::AuthProbe(_) | Self::Unauthorized(_))
    }
}
