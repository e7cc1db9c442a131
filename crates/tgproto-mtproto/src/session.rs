//! Per-connection session state: the `session_id` that scopes message
//! acknowledgment, the monotonic `msg_id`/`seq_no` counters, and the set
//! of content-related messages still awaiting acknowledgment.

use std::collections::BTreeSet;
use web_time::{SystemTime, UNIX_EPOCH};

/// Tracks everything needed to generate well-formed outgoing message
/// envelopes and to know which incoming messages still need a
/// `msgs_ack` sent back.
pub struct Session {
    session_id: i64,
    last_msg_id: i64,
    seq_no: i32,
    /// `server_salt` as last told to us by `new_session_created` or
    /// `bad_server_salt`.
    salt: i64,
    /// Offset (in whole seconds) applied to the local clock when
    /// generating `msg_id`s, learned from `bad_msg_notification` code 16/17.
    time_offset: i64,
    pending_acks: BTreeSet<i64>,
}

impl Session {
    pub fn new(session_id: i64, salt: i64) -> Self {
        Self {
            session_id,
            last_msg_id: 0,
            seq_no: 0,
            salt,
            time_offset: 0,
            pending_acks: BTreeSet::new(),
        }
    }

    pub fn session_id(&self) -> i64 {
        self.session_id
    }

    pub fn salt(&self) -> i64 {
        self.salt
    }

    pub fn set_salt(&mut self, salt: i64) {
        self.salt = salt;
    }

    pub fn adjust_time_offset(&mut self, correct_msg_id: i64) {
        let now = unix_time_secs();
        self.time_offset = (correct_msg_id >> 32) - now;
    }

    /// The offset (seconds) this session currently applies to the local
    /// clock when generating or validating `msg_id`s.
    pub fn time_offset(&self) -> i64 {
        self.time_offset
    }

    /// Generates the next outgoing `msg_id`: `floor(unix_time * 2^32)`
    /// rounded down to a multiple of 4 (the low two bits are reserved,
    /// `0` for client-originated messages), bumped by 4 if that would not
    /// be strictly greater than the last one we handed out.
    pub fn next_msg_id(&mut self) -> i64 {
        let now = unix_time_secs() + self.time_offset;
        let candidate = (now << 32) & !3;
        let msg_id = if candidate > self.last_msg_id {
            candidate
        } else {
            self.last_msg_id + 4
        };
        self.last_msg_id = msg_id;
        msg_id
    }

    pub fn last_msg_id(&self) -> i64 {
        self.last_msg_id
    }

    /// Allocates the next `seq_no`. Content-related messages consume an
    /// odd number and advance the counter; others (acks, and other
    /// messages that do not themselves require acknowledgment) reuse the
    /// counter's current even value without advancing it.
    pub fn next_seq_no(&mut self, content_related: bool) -> i32 {
        if content_related {
            let seq_no = self.seq_no * 2 + 1;
            self.seq_no += 1;
            seq_no
        } else {
            self.seq_no * 2
        }
    }

    pub fn queue_ack(&mut self, msg_id: i64) {
        self.pending_acks.insert(msg_id);
    }

    pub fn has_pending_acks(&self) -> bool {
        !self.pending_acks.is_empty()
    }

    /// Drains the pending ack set, returning the `msg_id`s to acknowledge.
    pub fn take_pending_acks(&mut self) -> Vec<i64> {
        std::mem::take(&mut self.pending_acks).into_iter().collect()
    }
}

fn unix_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn msg_ids_are_strictly_increasing() {
        let mut session = Session::new(1, 0);
        let a = session.next_msg_id();
        let b = session.next_msg_id();
        assert!(b > a);
        assert_eq!(a & 3, 0);
        assert_eq!(b & 3, 0);
    }

    #[test]
    fn seq_no_alternates_parity_rule() {
        let mut session = Session::new(1, 0);
        assert_eq!(session.next_seq_no(true), 1);
        assert_eq!(session.next_seq_no(false), 2);
        assert_eq!(session.next_seq_no(true), 3);
        assert_eq!(session.next_seq_no(true), 5);
    }

    #[test]
    fn pending_acks_drain_once() {
        let mut session = Session::new(1, 0);
        session.queue_ack(10);
        session.queue_ack(20);
        assert!(session.has_pending_acks());
        let mut acked = session.take_pending_acks();
        acked.sort();
        assert_eq!(acked, vec![10, 20]);
        assert!(!session.has_pending_acks());
    }

    #[test]
    fn time_offset_shifts_future_msg_ids() {
        let mut session = Session::new(1, 0);
        let before = session.next_msg_id();
        session.adjust_time_offset(before + (1000i64 << 32));
        let after = session.next_msg_id();
        assert!(after > before + (900i64 << 32));
    }
}
