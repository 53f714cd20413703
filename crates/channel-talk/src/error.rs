use thiserror::Error;

#[derive(Debug, Error)]
pub enum ChannelTalkError {
    /// 401/403 from the provider. Never retried.
    #[error("authentication failed ({status}): {body}")]
    Auth { status: u16, body: String },

    /// 429/5xx persisted through every retry.
    #[error("API error ({status}) after {attempts} attempts: {body}")]
    RateLimitExhausted {
        status: u16,
        body: String,
        attempts: u32,
    },

    #[error("API error ({status}): {body}")]
    Provider { status: u16, body: String },

    #[error("network error: {0}")]
    Network(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("listener error: {0}")]
    Listener(String),

    #[error("webhook token verification failed")]
    TokenInvalid,

    #[error("receiver not running")]
    NotRunning,

    #[error("receiver already running")]
    AlreadyRunning,

    #[error("inbound handler failed: {0}")]
    Handler(String),

    #[error("internal error: {0}")]
    Internal(String),
}

impl ChannelTalkError {
    /// HTTP status carried by provider-side failures.
    pub fn status(&self) -> Option<u16> {
        match self {
            ChannelTalkError::Auth { status, .. }
            | ChannelTalkError::RateLimitExhausted { status, .. }
            | ChannelTalkError::Provider { status, .. } => Some(*status),
            _ => None,
        }
    }
}
