use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use lifeline_shared::{error::ErrorBody, CoreError};
use lifeline_store::StoreError;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServerError {
    /// Domain outcome from the realtime core.
    #[error(transparent)]
    Core(#[from] CoreError),

    #[error("Invalid request: {0}")]
    BadRequest(String),

    #[error("Internal error: {0}")]
    Internal(String),
}

impl From<StoreError> for ServerError {
    fn from(err: StoreError) -> Self {
        Self::Core(CoreError::from(err))
    }
}

impl ServerError {
    fn as_core(&self) -> CoreError {
        match self {
            Self::Core(core) => core.clone(),
            Self::BadRequest(msg) => CoreError::BadRequest(msg.clone()),
            Self::Internal(msg) => CoreError::Internal(msg.clone()),
        }
    }
}

impl IntoResponse for ServerError {
    fn into_response(self) -> Response {
        let core = self.as_core();
        let status = match &core {
            CoreError::Unauthorized => StatusCode::FORBIDDEN,
            CoreError::AlreadyInCall
            | CoreError::InvalidTransition(_)
            | CoreError::StaleState => StatusCode::CONFLICT,
            CoreError::NotFound => StatusCode::NOT_FOUND,
            CoreError::BadRequest(_) => StatusCode::BAD_REQUEST,
            // The server never produces a timeout verdict; it is the
            // client-side reading of a dead connection.
            CoreError::Timeout => StatusCode::REQUEST_TIMEOUT,
            CoreError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        };

        // Do not leak internal details to untrusted participants.
        let body = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %core, "internal server error");
            ErrorBody {
                error: "Internal server error".to_string(),
                code: core.code().to_string(),
            }
        } else {
            ErrorBody::from(&core)
        };

        (status, axum::Json(body)).into_response()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_outcomes_map_to_core_codes() {
        let err = ServerError::from(StoreError::AlreadyInCall);
        assert_eq!(err.as_core().code(), "already_in_call");

        let err = ServerError::from(StoreError::NotFound);
        assert_eq!(err.as_core().code(), "not_found");

        let err = ServerError::from(StoreError::StaleState);
        assert_eq!(err.as_core().code(), "stale_state");
    }
}
