//! # lifeline-client
//!
//! Polling client for the Lifeline realtime core. There is no persistent
//! channel to the server; all state discovery happens through three
//! independent short-interval polls (messages, active call, presence), each
//! modeled as a resumable cursor over a server-side log so repeated polling
//! is naturally idempotent.
//!
//! The crate also owns the two client-side algorithms the server cannot do
//! for us: optimistic message reconciliation ([`reconcile`]) and the call
//! signaling session state machine ([`CallSession`]).
//!
//! [`reconcile`]: reconcile::reconcile
//! [`CallSession`]: signaling::CallSession

pub mod cache;
pub mod config;
pub mod events;
pub mod http;
pub mod poller;
pub mod reconcile;
pub mod signaling;

mod error;

pub use cache::ConversationCache;
pub use config::ClientConfig;
pub use error::ClientError;
pub use http::ApiClient;
