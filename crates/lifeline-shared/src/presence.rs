//! The online/offline rule.
//!
//! Presence is never cached server-side beyond the stored heartbeat
//! timestamp; both server and client evaluate this pure function at read
//! time, so correctness does not depend on any background sweep.

use chrono::{DateTime, Utc};

use crate::constants::ONLINE_WINDOW;

/// Whether a user with the given heartbeat timestamp counts as online at
/// `now`.
///
/// A `last_seen_at` in the future (clock skew between writers) is treated as
/// offline rather than producing a spurious positive.
pub fn is_online(last_seen_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
    let Some(seen) = last_seen_at else {
        return false;
    };
    let age = now.signed_duration_since(seen);
    if age < chrono::Duration::zero() {
        return false;
    }
    age.to_std()
        .map(|age| age <= ONLINE_WINDOW)
        .unwrap_or(false)
}
