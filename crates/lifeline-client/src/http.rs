//! Typed HTTP client for the realtime server.
//!
//! Every method maps one server operation; error bodies are decoded back
//! into the shared taxonomy so callers can branch on the verdict instead of
//! on HTTP status codes.

use chrono::{DateTime, Utc};
use reqwest::{RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde_json::json;

use lifeline_shared::{
    error::ErrorBody, Call, CallId, CallKind, CoreError, IceCandidateRecord, Message,
    PresenceSnapshot, UserId,
};

use crate::config::ClientConfig;
use crate::error::{ClientError, Result};

const USER_HEADER: &str = "x-user-id";

pub struct ApiClient {
    http: reqwest::Client,
    base_url: String,
    user: UserId,
}

impl ApiClient {
    pub fn new(config: &ClientConfig, user: UserId) -> Result<Self> {
        let http = reqwest::Client::builder()
            .timeout(config.request_timeout)
            .build()?;
        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            user,
        })
    }

    pub fn user(&self) -> UserId {
        self.user
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    fn with_identity(&self, req: RequestBuilder) -> RequestBuilder {
        req.header(USER_HEADER, self.user.to_string())
    }

    async fn exec<T: DeserializeOwned>(&self, req: RequestBuilder) -> Result<T> {
        let resp = req.send().await.map_err(classify_transport)?;
        decode(resp).await
    }

    // ─── Presence ───

    /// Explicit heartbeat; returns the fresh snapshot.
    pub async fn touch_presence(&self) -> Result<PresenceSnapshot> {
        self.exec(self.with_identity(self.http.post(self.url("/presence/touch"))))
            .await
    }

    pub async fn presence(&self, user: UserId) -> Result<PresenceSnapshot> {
        self.exec(self.http.get(self.url(&format!("/presence/{user}"))))
            .await
    }

    // ─── Messages ───

    pub async fn send_message(&self, receiver: UserId, body: &str) -> Result<Message> {
        let req = self
            .http
            .post(self.url("/messages"))
            .json(&json!({ "receiver_id": receiver, "body": body }));
        self.exec(self.with_identity(req)).await
    }

    pub async fn fetch_messages(
        &self,
        peer: UserId,
        since: Option<DateTime<Utc>>,
    ) -> Result<Vec<Message>> {
        let mut req = self.http.get(self.url(&format!("/messages/{peer}")));
        if let Some(since) = since {
            req = req.query(&[("since", since.to_rfc3339())]);
        }
        self.exec(self.with_identity(req)).await
    }

    // ─── Calls ───

    pub async fn initiate_call(&self, receiver: UserId, kind: CallKind) -> Result<Call> {
        let req = self
            .http
            .post(self.url("/calls"))
            .json(&json!({ "receiver_id": receiver, "kind": kind }));
        self.exec(self.with_identity(req)).await
    }

    /// The polling anchor: the one non-terminal call involving this user.
    pub async fn active_call(&self) -> Result<Option<Call>> {
        self.exec(self.with_identity(self.http.get(self.url("/calls/active"))))
            .await
    }

    pub async fn accept_call(&self, id: CallId) -> Result<Call> {
        self.exec(self.with_identity(self.http.post(self.url(&format!("/calls/{id}/accept")))))
            .await
    }

    pub async fn reject_call(&self, id: CallId) -> Result<Call> {
        self.exec(self.with_identity(self.http.post(self.url(&format!("/calls/{id}/reject")))))
            .await
    }

    pub async fn end_call(&self, id: CallId) -> Result<Call> {
        self.exec(self.with_identity(self.http.post(self.url(&format!("/calls/{id}/end")))))
            .await
    }

    // ─── Signaling ───

    pub async fn set_offer(&self, id: CallId, sdp: &str) -> Result<()> {
        let req = self
            .http
            .put(self.url(&format!("/calls/{id}/offer")))
            .json(&json!({ "payload": sdp }));
        self.exec::<serde_json::Value>(self.with_identity(req))
            .await?;
        Ok(())
    }

    pub async fn set_answer(&self, id: CallId, sdp: &str) -> Result<()> {
        let req = self
            .http
            .put(self.url(&format!("/calls/{id}/answer")))
            .json(&json!({ "payload": sdp }));
        self.exec::<serde_json::Value>(self.with_identity(req))
            .await?;
        Ok(())
    }

    pub async fn append_candidate(&self, id: CallId, payload: &str) -> Result<i64> {
        #[derive(serde::Deserialize)]
        struct Appended {
            sequence_no: i64,
        }
        let req = self
            .http
            .post(self.url(&format!("/calls/{id}/candidates")))
            .json(&json!({ "payload": payload }));
        let appended: Appended = self.exec(self.with_identity(req)).await?;
        Ok(appended.sequence_no)
    }

    pub async fn candidates_since(
        &self,
        id: CallId,
        after: i64,
    ) -> Result<Vec<IceCandidateRecord>> {
        let req = self
            .http
            .get(self.url(&format!("/calls/{id}/candidates")))
            .query(&[("after", after)]);
        self.exec(self.with_identity(req)).await
    }
}

/// Connection-level failures are indeterminate: the request may have landed.
fn classify_transport(e: reqwest::Error) -> ClientError {
    if e.is_timeout() || e.is_connect() {
        ClientError::Timeout
    } else {
        ClientError::Http(e)
    }
}

async fn decode<T: DeserializeOwned>(resp: Response) -> Result<T> {
    let status = resp.status();
    let bytes = resp.bytes().await.map_err(classify_transport)?;

    if status.is_success() {
        return serde_json::from_slice(&bytes)
            .map_err(|e| ClientError::Decode(format!("{status}: {e}")));
    }

    match serde_json::from_slice::<ErrorBody>(&bytes) {
        Ok(body) => Err(ClientError::Api(CoreError::from_code(
            &body.code, &body.error,
        ))),
        Err(_) => Err(ClientError::Decode(format!(
            "HTTP {status} with unreadable error body"
        ))),
    }
}
