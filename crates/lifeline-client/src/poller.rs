//! The three polling loops.
//!
//! Messages, the active call, and peer presence are polled on independent
//! cadences; every loop tolerates individual failures by simply trying
//! again on its next tick. There is no retry logic beyond the cadence
//! itself: a failed poll and a pending send are both resolved by the next
//! successful poll.

use std::sync::{Arc, Mutex};

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use lifeline_shared::{CallStatus, UserId};

use crate::cache::ConversationCache;
use crate::config::ClientConfig;
use crate::error::ClientError;
use crate::events::ClientEvent;
use crate::http::ApiClient;

/// Handle over the spawned polling tasks. Aborting it stops all polling;
/// that is the whole cancellation story, since the server keeps no
/// per-client state beyond what the logs already hold.
pub struct PollerHandle {
    tasks: Vec<JoinHandle<()>>,
}

impl PollerHandle {
    pub fn shutdown(mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

impl Drop for PollerHandle {
    fn drop(&mut self) {
        for task in self.tasks.drain(..) {
            task.abort();
        }
    }
}

/// Spawn the message, call, and presence loops for one open conversation.
///
/// Events are emitted only when the observed state actually changed, so a
/// quiet conversation does not wake the application every tick.
pub fn spawn(
    client: Arc<ApiClient>,
    cache: Arc<Mutex<ConversationCache>>,
    config: &ClientConfig,
    events: mpsc::Sender<ClientEvent>,
) -> PollerHandle {
    let peer = match cache.lock() {
        Ok(cache) => cache.peer(),
        Err(poisoned) => poisoned.into_inner().peer(),
    };

    let tasks = vec![
        spawn_message_loop(
            client.clone(),
            cache,
            peer,
            config.message_poll,
            events.clone(),
        ),
        spawn_call_loop(client.clone(), config.call_poll, events.clone()),
        spawn_presence_loop(client, peer, config.presence_poll, events),
    ];

    PollerHandle { tasks }
}

fn spawn_message_loop(
    client: Arc<ApiClient>,
    cache: Arc<Mutex<ConversationCache>>,
    peer: UserId,
    cadence: std::time::Duration,
    events: mpsc::Sender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_display = None;

        loop {
            interval.tick().await;

            let since = match cache.lock() {
                Ok(cache) => cache.since_cursor(),
                Err(_) => {
                    warn!("conversation cache poisoned, stopping message poll");
                    return;
                }
            };

            let batch = match client.fetch_messages(peer, since).await {
                Ok(batch) => batch,
                Err(e) => {
                    debug!(peer = %peer.short(), error = %e, "message poll failed");
                    continue;
                }
            };

            let display = match cache.lock() {
                Ok(mut cache) => {
                    cache.apply_poll(batch);
                    cache.display()
                }
                Err(_) => {
                    warn!("conversation cache poisoned, stopping message poll");
                    return;
                }
            };

            if last_display.as_ref() == Some(&display) {
                continue;
            }
            last_display = Some(display.clone());
            if events
                .send(ClientEvent::MessagesUpdated { peer, display })
                .await
                .is_err()
            {
                return;
            }
        }
    })
}

fn spawn_call_loop(
    client: Arc<ApiClient>,
    cadence: std::time::Duration,
    events: mpsc::Sender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        // (id, status, offer set, answer set) — any change is worth an event.
        let mut last_key: Option<(lifeline_shared::CallId, CallStatus, bool, bool)> = None;

        loop {
            interval.tick().await;

            let call = match client.active_call().await {
                Ok(call) => call,
                Err(e) => {
                    debug!(error = %e, "active-call poll failed");
                    continue;
                }
            };

            let key = call
                .as_ref()
                .map(|c| (c.id, c.status, c.offer.is_some(), c.answer.is_some()));
            if key == last_key {
                continue;
            }
            last_key = key;
            if events.send(ClientEvent::CallChanged(call)).await.is_err() {
                return;
            }
        }
    })
}

fn spawn_presence_loop(
    client: Arc<ApiClient>,
    peer: UserId,
    cadence: std::time::Duration,
    events: mpsc::Sender<ClientEvent>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(cadence);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
        let mut last_online = None;

        loop {
            interval.tick().await;

            // Our own heartbeat rides along on every poll already; this
            // fetches the peer's.
            let snapshot = match client.presence(peer).await {
                Ok(snapshot) => snapshot,
                Err(e) => {
                    debug!(peer = %peer.short(), error = %e, "presence poll failed");
                    continue;
                }
            };

            if last_online == Some(snapshot.online) {
                continue;
            }
            last_online = Some(snapshot.online);
            if events
                .send(ClientEvent::PresenceUpdated(snapshot))
                .await
                .is_err()
            {
                return;
            }
        }
    })
}

/// The optimistic send flow.
///
/// The pending copy is visible before the request leaves the machine. A
/// definitive server verdict resolves it immediately (confirmed or
/// dropped-and-reported); a timeout leaves it pending, because the write
/// may have landed and the next poll's reconciliation will tell.
pub async fn send_optimistic(
    client: &ApiClient,
    cache: &Arc<Mutex<ConversationCache>>,
    body: &str,
    events: &mpsc::Sender<ClientEvent>,
) -> Result<(), ClientError> {
    let (peer, local_id) = {
        let mut cache = cache
            .lock()
            .map_err(|_| ClientError::Decode("conversation cache poisoned".into()))?;
        (cache.peer(), cache.note_sent(body))
    };

    match client.send_message(peer, body).await {
        Ok(message) => {
            if let Ok(mut cache) = cache.lock() {
                cache.confirm_sent(local_id, message);
            }
            Ok(())
        }
        Err(e) if e.is_definite() => {
            let error = e.as_core();
            if let Ok(mut cache) = cache.lock() {
                cache.mark_failed(local_id, &error);
            }
            let _ = events
                .send(ClientEvent::SendFailed { local_id, error })
                .await;
            Err(e)
        }
        Err(e) => {
            debug!(error = %e, "send outcome unknown, leaving message pending");
            Err(e)
        }
    }
}
