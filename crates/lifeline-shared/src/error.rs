use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Failure taxonomy of the realtime core.
///
/// Every failure is scoped to one operation; nothing here is fatal to the
/// process, and the core never retries on its own — retry policy belongs to
/// the client.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum CoreError {
    /// No accepted connection between the two users. Recoverable by a
    /// friend request, never by automatic retry.
    #[error("users are not connected")]
    Unauthorized,

    /// One of the participants already has a non-terminal call.
    #[error("a participant is already in an active call")]
    AlreadyInCall,

    /// Stale or duplicate state-changing request; the client should
    /// re-fetch current state instead of retrying the same mutation.
    #[error("invalid transition: {0}")]
    InvalidTransition(String),

    /// Lost a concurrent compare-and-set race; re-fetch, then decide on a
    /// new action.
    #[error("state changed concurrently, re-fetch and retry")]
    StaleState,

    /// The referenced record does not exist (or the user is not a
    /// participant of it).
    #[error("record not found")]
    NotFound,

    /// Malformed request (bad id, empty body, unknown kind).
    #[error("bad request: {0}")]
    BadRequest(String),

    /// Network-level failure observed by the client; the operation may or
    /// may not have reached the server. Message sends are safe to leave
    /// pending and reconcile on the next poll.
    #[error("operation timed out")]
    Timeout,

    /// Server-side fault.
    #[error("internal error: {0}")]
    Internal(String),
}

impl CoreError {
    /// Stable machine-readable code carried in error response bodies.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Unauthorized => "unauthorized",
            Self::AlreadyInCall => "already_in_call",
            Self::InvalidTransition(_) => "invalid_transition",
            Self::StaleState => "stale_state",
            Self::NotFound => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Timeout => "timeout",
            Self::Internal(_) => "internal",
        }
    }

    /// Rebuild the taxonomy from a wire code and message. Unknown codes map
    /// to `Internal` so old clients degrade instead of panicking.
    pub fn from_code(code: &str, message: &str) -> Self {
        match code {
            "unauthorized" => Self::Unauthorized,
            "already_in_call" => Self::AlreadyInCall,
            "invalid_transition" => Self::InvalidTransition(message.to_string()),
            "stale_state" => Self::StaleState,
            "not_found" => Self::NotFound,
            "bad_request" => Self::BadRequest(message.to_string()),
            "timeout" => Self::Timeout,
            _ => Self::Internal(message.to_string()),
        }
    }
}

/// JSON body of every error response.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ErrorBody {
    pub error: String,
    pub code: String,
}

impl From<&CoreError> for ErrorBody {
    fn from(err: &CoreError) -> Self {
        Self {
            error: err.to_string(),
            code: err.code().to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn code_round_trip() {
        let errors = [
            CoreError::Unauthorized,
            CoreError::AlreadyInCall,
            CoreError::InvalidTransition("accept on ended".into()),
            CoreError::StaleState,
            CoreError::NotFound,
            CoreError::BadRequest("empty body".into()),
            CoreError::Timeout,
        ];
        for err in errors {
            let body = ErrorBody::from(&err);
            let decoded = CoreError::from_code(&body.code, &body.error);
            assert_eq!(decoded.code(), err.code());
        }
    }

    #[test]
    fn unknown_code_degrades_to_internal() {
        let err = CoreError::from_code("quota_exceeded", "too much");
        assert_eq!(err, CoreError::Internal("too much".into()));
    }
}
