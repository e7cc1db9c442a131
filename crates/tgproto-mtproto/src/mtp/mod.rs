//! The Mobile Transport Protocol layer: turns zero or more opaque request
//! bodies into outgoing messages (batched in a container when there's more
//! than one), and turns an incoming buffer back into RPC results and
//! update bytes for the caller to route onward.
//!
//! Plain and encrypted messages get separate implementations: plain
//! hardly needs any state (it exists only to bootstrap the handshake),
//! and keeping it apart means the encrypted path's `AuthKey` stays
//! mandatory rather than an `Option` nobody should ever see `None` for.

mod encrypted;
mod plain;

pub use encrypted::Encrypted;
pub use plain::Plain;

use crate::errors::{DeserializeError, RequestError};

/// Identifies one of the requests handed to [`Mtp::serialize`], in the
/// same order, so callers can match responses back to callers.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct MsgId(pub i64);

/// One body queued for serialization, carrying the upstream-contract flag
/// that affects how it's framed.
#[derive(Clone, Debug)]
pub struct OutboundMessage {
    pub body: Vec<u8>,
    /// Sets the low bit of `seq_no`; true for ordinary RPCs expecting an
    /// ack/response, false for messages that don't themselves require one.
    pub content_related: bool,
}

impl OutboundMessage {
    pub fn rpc(body: Vec<u8>) -> Self {
        Self { body, content_related: true }
    }
}

/// What came back after feeding a buffer to [`Mtp::deserialize`].
#[derive(Default)]
pub struct Deserialization {
    pub rpc_results: Vec<(MsgId, Result<Vec<u8>, RequestError>)>,
    pub updates: Vec<Vec<u8>>,
    /// Requests the server asked to be resent verbatim under a fresh
    /// `msg_id` (`bad_server_salt`, or `bad_msg_notification` codes 16/17/64).
    pub retries: Vec<MsgId>,
    /// Set by `new_session_created`: every outstanding request with
    /// `msg_id` below this value must be re-queued under a fresh one.
    pub regenerate_below: Option<i64>,
}

pub trait Mtp {
    /// Serializes `requests` into `output`, returning the ids assigned to
    /// each, in the same order.
    fn serialize(&mut self, requests: &[OutboundMessage], output: &mut Vec<u8>) -> Vec<MsgId>;

    /// Parses `payload` (the plaintext frame handed up by the transport)
    /// into RPC results and update bytes.
    fn deserialize(&mut self, payload: &[u8]) -> Result<Deserialization, DeserializeError>;
}
