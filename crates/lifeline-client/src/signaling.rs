//! Client-side call signaling session.
//!
//! The server is only a relay: it stores the offer, the answer, and an
//! ordered candidate log. This state machine turns each poll of the call
//! row and the candidate log into the actions the local WebRTC-class stack
//! must take next, and owns the resumable candidate cursor so a restarted
//! poll never re-applies what it has already seen.

use tracing::debug;

use lifeline_shared::{Call, CallId, CallStatus, IceCandidateRecord, UserId};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionRole {
    Caller,
    Receiver,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// Waiting for the remote party (callee: ring not yet answered;
    /// caller: answer not yet produced).
    Negotiating,
    Connected,
    Closed,
}

pub struct CallSession {
    pub call_id: CallId,
    pub local_user: UserId,
    pub remote_user: UserId,
    pub role: SessionRole,
    pub state: SessionState,
    local_sdp: Option<String>,
    remote_sdp: Option<String>,
    candidate_cursor: i64,
}

/// What the local media stack should do next.
#[derive(Debug, PartialEq, Eq)]
pub enum SessionAction {
    /// The remote offer arrived; produce an answer and publish it.
    CreateAnswer(String),
    /// The remote answer arrived; complete the local handshake.
    SetRemoteDescription(String),
    AddIceCandidate(String),
    /// The call reached a terminal state; tear the media session down.
    Close,
}

impl CallSession {
    /// Attach to a call as whichever role `local_user` plays in it.
    ///
    /// Returns `None` when `local_user` is not a participant.
    pub fn from_call(call: &Call, local_user: UserId) -> Option<Self> {
        let remote_user = call.peer_of(local_user)?;
        let role = if call.caller_id == local_user {
            SessionRole::Caller
        } else {
            SessionRole::Receiver
        };
        Some(Self {
            call_id: call.id,
            local_user,
            remote_user,
            role,
            state: SessionState::Negotiating,
            local_sdp: None,
            remote_sdp: None,
            candidate_cursor: 0,
        })
    }

    /// Record the locally-produced SDP (the caller's offer or the
    /// receiver's answer) after it has been published to the relay.
    pub fn record_local_sdp(&mut self, sdp: String) {
        debug!(
            call = %self.call_id,
            remote = %self.remote_user.short(),
            "recorded local SDP"
        );
        self.local_sdp = Some(sdp);
    }

    /// Fold one poll of the call row into the session.
    ///
    /// Idempotent: a payload already consumed never produces its action
    /// again, so redelivery across polls is harmless.
    pub fn apply_call(&mut self, call: &Call) -> Vec<SessionAction> {
        let mut actions = Vec::new();

        if call.status.is_terminal() {
            if self.state != SessionState::Closed {
                debug!(call = %self.call_id, status = %call.status, "remote end closed the call");
                self.state = SessionState::Closed;
                actions.push(SessionAction::Close);
            }
            return actions;
        }

        if self.remote_sdp.is_none() {
            let remote = match self.role {
                SessionRole::Caller => call.answer.as_ref(),
                SessionRole::Receiver => call.offer.as_ref(),
            };
            if let Some(sdp) = remote {
                debug!(
                    call = %self.call_id,
                    from = %self.remote_user.short(),
                    "received remote SDP"
                );
                self.remote_sdp = Some(sdp.clone());
                actions.push(match self.role {
                    SessionRole::Caller => SessionAction::SetRemoteDescription(sdp.clone()),
                    SessionRole::Receiver => SessionAction::CreateAnswer(sdp.clone()),
                });
            }
        }

        if call.status == CallStatus::Connected && self.state == SessionState::Negotiating {
            self.state = SessionState::Connected;
        }

        actions
    }

    /// Fold one poll of the candidate log into the session, advancing the
    /// cursor past everything consumed.
    ///
    /// The relay already filters out our own candidates and anything at or
    /// below the cursor we sent; stale records slipping through (e.g. a
    /// fetch raced with a cursor reset) are skipped here again, since
    /// candidate application should be minimized even though it is safe to
    /// repeat.
    pub fn absorb_candidates(&mut self, records: &[IceCandidateRecord]) -> Vec<SessionAction> {
        let mut actions = Vec::new();
        for record in records {
            if record.sequence_no <= self.candidate_cursor {
                continue;
            }
            if record.from_user_id == self.local_user {
                continue;
            }
            self.candidate_cursor = record.sequence_no;
            actions.push(SessionAction::AddIceCandidate(record.payload.clone()));
        }
        if !actions.is_empty() {
            debug!(
                call = %self.call_id,
                cursor = self.candidate_cursor,
                count = actions.len(),
                "absorbed remote ICE candidates"
            );
        }
        actions
    }

    /// The cursor to send on the next candidate poll. Persist this across
    /// restarts to avoid redelivery.
    pub fn candidate_cursor(&self) -> i64 {
        self.candidate_cursor
    }

    pub fn is_closed(&self) -> bool {
        self.state == SessionState::Closed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use lifeline_shared::{CallKind, UserId};

    fn call(caller: UserId, receiver: UserId) -> Call {
        Call {
            id: CallId::new(),
            caller_id: caller,
            receiver_id: receiver,
            kind: CallKind::Audio,
            status: CallStatus::Ringing,
            offer: None,
            answer: None,
            started_at: Utc::now(),
            answered_at: None,
            ended_at: None,
            duration_seconds: None,
        }
    }

    fn candidate(call_id: CallId, from: UserId, seq: i64) -> IceCandidateRecord {
        IceCandidateRecord {
            call_id,
            from_user_id: from,
            sequence_no: seq,
            payload: format!("cand-{seq}"),
        }
    }

    #[test]
    fn receiver_answers_the_offer_once() {
        let a = UserId::new();
        let b = UserId::new();
        let mut row = call(a, b);
        let mut session = CallSession::from_call(&row, b).unwrap();
        assert_eq!(session.role, SessionRole::Receiver);

        // Nothing to do until the offer shows up.
        assert!(session.apply_call(&row).is_empty());

        row.offer = Some("sdp-offer".into());
        assert_eq!(
            session.apply_call(&row),
            vec![SessionAction::CreateAnswer("sdp-offer".into())]
        );

        // Re-polling the same row is a no-op.
        assert!(session.apply_call(&row).is_empty());
    }

    #[test]
    fn caller_completes_on_the_answer() {
        let a = UserId::new();
        let b = UserId::new();
        let mut row = call(a, b);
        let mut session = CallSession::from_call(&row, a).unwrap();
        session.record_local_sdp("sdp-offer".into());

        row.offer = Some("sdp-offer".into());
        row.status = CallStatus::Connected;
        row.answer = Some("sdp-answer".into());

        assert_eq!(
            session.apply_call(&row),
            vec![SessionAction::SetRemoteDescription("sdp-answer".into())]
        );
        assert_eq!(session.state, SessionState::Connected);
    }

    #[test]
    fn terminal_status_closes_once() {
        let a = UserId::new();
        let b = UserId::new();
        let mut row = call(a, b);
        let mut session = CallSession::from_call(&row, a).unwrap();

        row.status = CallStatus::Rejected;
        assert_eq!(session.apply_call(&row), vec![SessionAction::Close]);
        assert!(session.is_closed());
        assert!(session.apply_call(&row).is_empty());
    }

    #[test]
    fn candidate_cursor_advances_and_filters() {
        let a = UserId::new();
        let b = UserId::new();
        let row = call(a, b);
        let mut session = CallSession::from_call(&row, a).unwrap();

        let batch = vec![
            candidate(row.id, b, 1),
            candidate(row.id, b, 2),
            candidate(row.id, b, 3),
        ];
        let actions = session.absorb_candidates(&batch);
        assert_eq!(actions.len(), 3);
        assert_eq!(session.candidate_cursor(), 3);

        // Redelivered and own records are skipped.
        let again = vec![candidate(row.id, b, 3), candidate(row.id, a, 4)];
        assert!(session.absorb_candidates(&again).is_empty());
        assert_eq!(session.candidate_cursor(), 3);

        let fresh = vec![candidate(row.id, b, 5)];
        assert_eq!(
            session.absorb_candidates(&fresh),
            vec![SessionAction::AddIceCandidate("cand-5".into())]
        );
        assert_eq!(session.candidate_cursor(), 5);
    }

    #[test]
    fn outsider_cannot_attach() {
        let a = UserId::new();
        let b = UserId::new();
        let row = call(a, b);
        assert!(CallSession::from_call(&row, UserId::new()).is_none());
    }
}
