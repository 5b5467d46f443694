//! Events emitted by the poller to the application layer.

use lifeline_shared::{Call, CoreError, PresenceSnapshot, UserId};
use uuid::Uuid;

use crate::reconcile::DisplayMessage;

#[derive(Debug)]
pub enum ClientEvent {
    /// The merged display view of the open conversation changed.
    MessagesUpdated {
        peer: UserId,
        display: Vec<DisplayMessage>,
    },
    /// The polling anchor changed: an incoming ring, a remote accept, a
    /// remote end, or no call at all.
    CallChanged(Option<Call>),
    /// A fresh presence reading for the watched peer.
    PresenceUpdated(PresenceSnapshot),
    /// An optimistic send definitively failed and its pending copy was
    /// dropped.
    SendFailed { local_id: Uuid, error: CoreError },
}
