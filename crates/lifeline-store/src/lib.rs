//! # lifeline-store
//!
//! SQLite persistence for the realtime core. The crate exposes a synchronous
//! [`Database`] handle wrapping a `rusqlite::Connection` with typed operation
//! modules for presence, connections, messages, call sessions, and the
//! signaling relay.
//!
//! Every call-state transition is a conditional `UPDATE ... WHERE status = ?`
//! compare-and-set; a plain read-then-write would race the other participant
//! and is deliberately not offered.

pub mod calls;
pub mod connections;
pub mod database;
pub mod messages;
pub mod migrations;
pub mod presence;
pub mod signaling;

mod error;

pub use database::Database;
pub use error::StoreError;
