use std::sync::{Arc, Mutex, MutexGuard};

use axum::{
    extract::{Path, Query, State},
    http::{HeaderMap, Method},
    middleware,
    routing::{get, post, put},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use lifeline_shared::{
    Call, CallId, CallKind, CoreError, IceCandidateRecord, Message, PresenceSnapshot, UserId,
};
use lifeline_store::Database;

use crate::config::ServerConfig;
use crate::error::ServerError;
use crate::notify::{Notifier, NotifyEvent};
use crate::presence_mw::{track_presence, USER_HEADER};
use crate::rate_limit::{rate_limit_middleware, RateLimiter};

#[derive(Clone)]
pub struct AppState {
    pub db: Arc<Mutex<Database>>,
    pub config: Arc<ServerConfig>,
    pub notifier: Arc<dyn Notifier>,
    pub rate_limiter: RateLimiter,
}

impl AppState {
    /// Lock the shared database. Every store operation is quick synchronous
    /// work, so the guard is never held across an await point.
    fn db(&self) -> Result<MutexGuard<'_, Database>, ServerError> {
        self.db
            .lock()
            .map_err(|e| ServerError::Internal(format!("database lock poisoned: {e}")))
    }
}

pub fn build_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::PUT, Method::OPTIONS])
        .allow_headers(Any);

    Router::new()
        .route("/health", get(health_check))
        .route("/presence/touch", post(touch_presence))
        .route("/presence/:user_id", get(get_presence))
        .route("/messages", post(send_message))
        .route("/messages/:peer_id", get(fetch_messages))
        .route("/calls", post(initiate_call))
        .route("/calls/active", get(get_active_call))
        .route("/calls/:id/accept", post(accept_call))
        .route("/calls/:id/reject", post(reject_call))
        .route("/calls/:id/end", post(end_call))
        .route("/calls/:id/offer", put(set_offer))
        .route("/calls/:id/answer", put(set_answer))
        .route(
            "/calls/:id/candidates",
            post(append_candidate).get(fetch_candidates),
        )
        .layer(middleware::from_fn_with_state(state.clone(), track_presence))
        .layer(middleware::from_fn_with_state(
            state.rate_limiter.clone(),
            rate_limit_middleware,
        ))
        .layer(cors)
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Resolve the acting user from the request headers.
fn acting_user(headers: &HeaderMap) -> Result<UserId, ServerError> {
    let raw = headers
        .get(USER_HEADER)
        .and_then(|v| v.to_str().ok())
        .ok_or_else(|| ServerError::BadRequest("missing X-User-Id header".to_string()))?;
    UserId::parse(raw)
        .map_err(|e| ServerError::BadRequest(format!("invalid X-User-Id header: {e}")))
}

// ─── Request / response bodies ───

#[derive(Serialize)]
struct HealthResponse {
    status: &'static str,
    version: &'static str,
    instance: String,
}

#[derive(Serialize)]
struct AckResponse {
    ok: bool,
}

#[derive(Deserialize)]
struct SendMessageRequest {
    receiver_id: UserId,
    body: String,
}

#[derive(Deserialize)]
struct SinceQuery {
    since: Option<DateTime<Utc>>,
}

#[derive(Deserialize)]
struct InitiateCallRequest {
    receiver_id: UserId,
    kind: CallKind,
}

#[derive(Deserialize)]
struct SdpRequest {
    payload: String,
}

#[derive(Deserialize)]
struct CandidateRequest {
    payload: String,
}

#[derive(Serialize)]
struct CandidateAppended {
    sequence_no: i64,
}

#[derive(Deserialize)]
struct AfterQuery {
    after: Option<i64>,
}

// ─── Handlers ───

async fn health_check(State(state): State<AppState>) -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "ok",
        version: env!("CARGO_PKG_VERSION"),
        instance: state.config.instance_name.clone(),
    })
}

/// Explicit heartbeat. The presence middleware already touched the user on
/// the way in, so this endpoint only exists as the dedicated
/// "I'm active" poll target; answering with the fresh snapshot saves the
/// client a follow-up read.
async fn touch_presence(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<PresenceSnapshot>, ServerError> {
    let user = acting_user(&headers)?;
    let db = state.db()?;
    db.touch_presence(user)?;
    Ok(Json(db.presence(user)?))
}

async fn get_presence(
    State(state): State<AppState>,
    Path(user_id): Path<String>,
) -> Result<Json<PresenceSnapshot>, ServerError> {
    let user = UserId::parse(&user_id)
        .map_err(|e| ServerError::BadRequest(format!("invalid user id: {e}")))?;
    Ok(Json(state.db()?.presence(user)?))
}

async fn send_message(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<SendMessageRequest>,
) -> Result<Json<Message>, ServerError> {
    let sender = acting_user(&headers)?;
    if req.body.trim().is_empty() {
        return Err(ServerError::BadRequest(
            "message body must not be empty".to_string(),
        ));
    }

    // Gate and append under one guard: a revoked connection fails the whole
    // operation with no partial write.
    let message = {
        let db = state.db()?;
        if !db.can_interact(sender, req.receiver_id)? {
            return Err(CoreError::Unauthorized.into());
        }
        db.append_message(sender, req.receiver_id, &req.body)?
    };

    state.notifier.emit(NotifyEvent::message_received(&message));
    Ok(Json(message))
}

async fn fetch_messages(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(peer_id): Path<String>,
    Query(query): Query<SinceQuery>,
) -> Result<Json<Vec<Message>>, ServerError> {
    let user = acting_user(&headers)?;
    let peer = UserId::parse(&peer_id)
        .map_err(|e| ServerError::BadRequest(format!("invalid peer id: {e}")))?;
    Ok(Json(state.db()?.messages_between(user, peer, query.since)?))
}

async fn initiate_call(
    headers: HeaderMap,
    State(state): State<AppState>,
    Json(req): Json<InitiateCallRequest>,
) -> Result<Json<Call>, ServerError> {
    let caller = acting_user(&headers)?;

    let call = {
        let mut db = state.db()?;
        if !db.can_interact(caller, req.receiver_id)? {
            return Err(CoreError::Unauthorized.into());
        }
        db.initiate_call(caller, req.receiver_id, req.kind, state.config.ring_timeout)?
    };

    state.notifier.emit(NotifyEvent::call_ringing(&call));
    Ok(Json(call))
}

async fn get_active_call(
    headers: HeaderMap,
    State(state): State<AppState>,
) -> Result<Json<Option<Call>>, ServerError> {
    let user = acting_user(&headers)?;
    Ok(Json(
        state.db()?.active_call(user, state.config.ring_timeout)?,
    ))
}

async fn accept_call(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Call>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    let call = state
        .db()?
        .accept_call(id, user, state.config.ring_timeout)?;
    Ok(Json(call))
}

async fn reject_call(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Call>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    let db = state.db()?;
    let call = db.reject_call(id, user, state.config.ring_timeout)?;
    discard_candidate_log(&db, id);
    Ok(Json(call))
}

async fn end_call(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<Call>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    let db = state.db()?;
    let call = db.end_call(id, user, state.config.ring_timeout)?;
    discard_candidate_log(&db, id);
    Ok(Json(call))
}

async fn set_offer(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SdpRequest>,
) -> Result<Json<AckResponse>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    if req.payload.is_empty() {
        return Err(ServerError::BadRequest("empty SDP payload".to_string()));
    }
    state.db()?.set_offer(id, user, &req.payload)?;
    Ok(Json(AckResponse { ok: true }))
}

async fn set_answer(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<SdpRequest>,
) -> Result<Json<AckResponse>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    if req.payload.is_empty() {
        return Err(ServerError::BadRequest("empty SDP payload".to_string()));
    }
    state.db()?.set_answer(id, user, &req.payload)?;
    Ok(Json(AckResponse { ok: true }))
}

async fn append_candidate(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Json(req): Json<CandidateRequest>,
) -> Result<Json<CandidateAppended>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    if req.payload.is_empty() {
        return Err(ServerError::BadRequest("empty candidate payload".to_string()));
    }
    let sequence_no = state.db()?.append_candidate(id, user, &req.payload)?;
    Ok(Json(CandidateAppended { sequence_no }))
}

async fn fetch_candidates(
    headers: HeaderMap,
    State(state): State<AppState>,
    Path(id): Path<String>,
    Query(query): Query<AfterQuery>,
) -> Result<Json<Vec<IceCandidateRecord>>, ServerError> {
    let user = acting_user(&headers)?;
    let id = parse_call_id(&id)?;
    let cursor = query.after.unwrap_or(0);
    Ok(Json(state.db()?.candidates_since(id, user, cursor)?))
}

fn parse_call_id(raw: &str) -> Result<CallId, ServerError> {
    CallId::parse(raw).map_err(|e| ServerError::BadRequest(format!("invalid call id: {e}")))
}

/// The candidate log of a terminal call is dead weight; drop it, but never
/// fail the transition that got us here.
fn discard_candidate_log(db: &Database, id: CallId) {
    if let Err(e) = db.purge_candidates(id) {
        warn!(call = %id, error = %e, "candidate purge failed");
    }
}

pub async fn serve(state: AppState, addr: std::net::SocketAddr) -> anyhow::Result<()> {
    let app = build_router(state);

    info!(addr = %addr, "Starting HTTP API server");

    let listener = tokio::net::TcpListener::bind(addr).await?;
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<std::net::SocketAddr>(),
    )
    .await?;

    Ok(())
}
