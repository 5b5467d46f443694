//! Heartbeat middleware.
//!
//! Any request that identifies its user doubles as an "I'm active" event:
//! the middleware records the heartbeat before handing the request on.
//! Recording is best-effort; a failed touch is logged and never fails the
//! caller's primary operation.

use axum::{
    extract::State,
    http::Request,
    middleware::Next,
    response::Response,
};
use lifeline_shared::UserId;
use tracing::warn;

use crate::api::AppState;

/// Header carrying the acting user's id. Authentication lives outside this
/// core; participant checks against call rows still apply to every mutation.
pub const USER_HEADER: &str = "x-user-id";

pub async fn track_presence(
    State(state): State<AppState>,
    req: Request<axum::body::Body>,
    next: Next,
) -> Response {
    let user = req
        .headers()
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .and_then(|s| UserId::parse(s).ok());

    if let Some(user) = user {
        match state.db.lock() {
            Ok(db) => {
                if let Err(e) = db.touch_presence(user) {
                    warn!(user = %user.short(), error = %e, "presence touch failed");
                }
            }
            Err(e) => warn!(error = %e, "presence touch skipped, database lock poisoned"),
        }
    }

    next.run(req).await
}
