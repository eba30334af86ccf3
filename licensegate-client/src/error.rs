use licensegate::LimitError;
use thiserror::Error;

/// Errors surfaced by the client
///
/// A denial is never an error. An error means no admission decision could
/// be made, except for [`ClientError::UsageNotRecorded`], which is raised
/// after the gate already opened.
///
/// The type is `Clone` so that one failed refresh can be handed to every
/// caller waiting on it.
#[derive(Error, Debug, Clone)]
pub enum ClientError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Limit(#[from] LimitError),

    #[error("Network error: {0}")]
    Network(String),

    #[error("Timeout")]
    Timeout,

    #[error("Authority returned status {status}: {body}")]
    Authority { status: u16, body: String },

    #[error("Invalid response from authority: {0}")]
    InvalidResponse(String),

    #[error("Authentication error: {0}")]
    Auth(String),

    /// The consumption was admitted but the usage report failed; the
    /// consumption may not be recorded by the authority
    #[error("Usage was admitted but not recorded (estimated remaining {remaining}): {source}")]
    UsageNotRecorded {
        remaining: u64,
        #[source]
        source: Box<ClientError>,
    },

    /// The background authority query panicked
    #[error("Refresh task failed: {0}")]
    TaskFailed(String),

    #[error("Client closed")]
    Closed,
}

impl ClientError {
    /// True for failures that say nothing about authorization
    pub fn is_transport(&self) -> bool {
        matches!(
            self,
            ClientError::Network(_)
                | ClientError::Timeout
                | ClientError::Authority { .. }
                | ClientError::InvalidResponse(_)
        )
    }
}

impl From<reqwest::Error> for ClientError {
    fn from(err: reqwest::Error) -> Self {
        if err.is_timeout() {
            ClientError::Timeout
        } else if err.is_decode() {
            ClientError::InvalidResponse(err.to_string())
        } else {
            ClientError::Network(err.to_string())
        }
    }
}

impl From<config::ConfigError> for ClientError {
    fn from(err: config::ConfigError) -> Self {
        ClientError::Config(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
