//! Fire-and-forget notification hook.
//!
//! The notification collaborator (push fan-out, badge counters) lives
//! outside this core; we only emit events to it on call-ringing and
//! message-received and never depend on an answer. Emission happens on a
//! spawned task so a slow collaborator cannot stall a handler.

use std::sync::Arc;

use lifeline_shared::{Call, Message};
use serde::Serialize;
use tracing::{debug, warn};

/// Events handed to the collaborator.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum NotifyEvent {
    CallRinging {
        call_id: String,
        caller_id: String,
        receiver_id: String,
        kind: String,
    },
    MessageReceived {
        message_id: String,
        sender_id: String,
        receiver_id: String,
    },
}

impl NotifyEvent {
    pub fn call_ringing(call: &Call) -> Self {
        Self::CallRinging {
            call_id: call.id.to_string(),
            caller_id: call.caller_id.to_string(),
            receiver_id: call.receiver_id.to_string(),
            kind: call.kind.as_str().to_string(),
        }
    }

    pub fn message_received(message: &Message) -> Self {
        Self::MessageReceived {
            message_id: message.id.to_string(),
            sender_id: message.sender_id.to_string(),
            receiver_id: message.receiver_id.to_string(),
        }
    }
}

/// Emits events to the notification collaborator. Implementations must not
/// block the caller.
pub trait Notifier: Send + Sync {
    fn emit(&self, event: NotifyEvent);
}

/// POSTs each event as JSON to a configured webhook URL.
pub struct WebhookNotifier {
    client: reqwest::Client,
    url: String,
}

impl WebhookNotifier {
    pub fn new(url: String) -> Self {
        Self {
            client: reqwest::Client::new(),
            url,
        }
    }
}

impl Notifier for WebhookNotifier {
    fn emit(&self, event: NotifyEvent) {
        let client = self.client.clone();
        let url = self.url.clone();
        tokio::spawn(async move {
            match client.post(&url).json(&event).send().await {
                Ok(resp) => {
                    debug!(status = %resp.status(), ?event, "notification emitted");
                }
                Err(e) => {
                    warn!(error = %e, ?event, "notification emit failed");
                }
            }
        });
    }
}

/// Discards every event. Used when no webhook is configured, and by tests.
pub struct NullNotifier;

impl Notifier for NullNotifier {
    fn emit(&self, event: NotifyEvent) {
        debug!(?event, "notification dropped (no webhook configured)");
    }
}

/// Build the notifier the configuration asks for.
pub fn from_webhook_url(url: Option<String>) -> Arc<dyn Notifier> {
    match url {
        Some(url) => Arc::new(WebhookNotifier::new(url)),
        None => Arc::new(NullNotifier),
    }
}
