use lifeline_shared::CoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ClientError {
    /// The server answered with a verdict from the core taxonomy.
    #[error("server rejected the operation: {0}")]
    Api(CoreError),

    /// Network-level failure; the operation may or may not have reached the
    /// server. A message send hit by this stays pending and is reconciled
    /// on the next poll.
    #[error("request timed out or the connection failed")]
    Timeout,

    /// Any other transport failure.
    #[error("http error: {0}")]
    Http(#[from] reqwest::Error),

    /// The response body did not decode.
    #[error("malformed response: {0}")]
    Decode(String),
}

impl ClientError {
    /// The taxonomy verdict, with transport failures folded to
    /// [`CoreError::Timeout`].
    pub fn as_core(&self) -> CoreError {
        match self {
            Self::Api(core) => core.clone(),
            Self::Timeout => CoreError::Timeout,
            Self::Http(e) => CoreError::Internal(e.to_string()),
            Self::Decode(msg) => CoreError::Internal(msg.clone()),
        }
    }

    /// Whether the operation definitively failed. Timeouts are
    /// indeterminate: the write may have landed.
    pub fn is_definite(&self) -> bool {
        !matches!(self, Self::Timeout)
    }
}

pub type Result<T> = std::result::Result<T, ClientError>;
