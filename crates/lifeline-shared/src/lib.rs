//! # lifeline-shared
//!
//! Domain types shared by the Lifeline realtime server and its polling
//! clients: id newtypes, the call state machine vocabulary, wire models,
//! the error taxonomy, and the pure presence rule.

pub mod constants;
pub mod error;
pub mod models;
pub mod presence;
pub mod types;

pub use error::CoreError;
pub use models::{Call, IceCandidateRecord, Message, PresenceSnapshot};
pub use types::{CallId, CallKind, CallStatus, MessageId, UserId};
