use super::{Deserialization, Mtp, MsgId, OutboundMessage};
use crate::errors::DeserializeError;
use crate::wire::{Cursor, Writer};

/// An implementation of the Mobile Transport Protocol for plaintext
/// (unencrypted) messages, used only to bootstrap the handshake before an
/// authorization key exists.
#[non_exhaustive]
pub struct Plain;

impl Plain {
    pub fn new() -> Self {
        Self
    }
}

impl Default for Plain {
    fn default() -> Self {
        Self::new()
    }
}

impl Mtp for Plain {
    /// Wraps exactly one request into an unencrypted message:
    /// `auth_key_id = 0`, `msg_id = 0` (the handshake doesn't need a real
    /// one), and the body length-prefixed.
    ///
    /// Panics unless exactly one request is given.
    fn serialize(&mut self, requests: &[OutboundMessage], output: &mut Vec<u8>) -> Vec<MsgId> {
        assert_eq!(requests.len(), 1);
        let body = &requests[0].body;

        output.clear();
        let mut w = Writer::new();
        w.write_i64(0); // auth_key_id
        w.write_i64(0); // msg_id
        w.write_i32(body.len() as i32);
        w.write_bytes(body);
        output.extend_from_slice(w.as_slice());

        vec![MsgId(0)]
    }

    /// Validates a returned plain message and returns its inner contents.
    fn deserialize(&mut self, payload: &[u8]) -> Result<Deserialization, DeserializeError> {
        let mut c = Cursor::new(payload);
        let auth_key_id = c.read_i64()?;
        if auth_key_id != 0 {
            return Err(DeserializeError::BadAuthKey { got: auth_key_id, expected: 0 });
        }

        let msg_id = c.read_i64()?;
        // "server message identifiers modulo 4 yield 1 if the message is
        // a response to a client message" -- our own clock isn't trusted
        // yet, so that's the only check we can make here.
        if msg_id <= 0 || msg_id % 4 != 1 {
            return Err(DeserializeError::BadMessageId { got: msg_id });
        }

        let len = c.read_i32()?;
        if len <= 0 {
            return Err(DeserializeError::BadMessageLength { got: len as usize });
        }
        let body = c.read_n(len as usize)?.to_vec();

        Ok(Deserialization {
            rpc_results: vec![(MsgId(0), Ok(body))],
            updates: Vec::new(),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn serialize_wraps_single_request() {
        let mut mtp = Plain::new();
        let mut output = Vec::new();
        let ids = mtp.serialize(&[OutboundMessage::rpc(vec![1, 2, 3, 4])], &mut output);
        assert_eq!(ids, vec![MsgId(0)]);
        assert_eq!(output.len(), 8 + 8 + 4 + 4);
    }

    #[test]
    #[should_panic]
    fn serialize_panics_on_multiple_requests() {
        let mut mtp = Plain::new();
        let mut output = Vec::new();
        mtp.serialize(&[OutboundMessage::rpc(vec![1]), OutboundMessage::rpc(vec![2])], &mut output);
    }

    #[test]
    fn deserialize_rejects_nonzero_auth_key() {
        let mut mtp = Plain::new();
        let mut w = Writer::new();
        w.write_i64(5);
        w.write_i64(1);
        w.write_i32(0);
        assert!(matches!(
            mtp.deserialize(w.as_slice()),
            Err(DeserializeError::BadAuthKey { .. })
        ));
    }

    #[test]
    fn roundtrips_through_serialize_and_deserialize() {
        let mut mtp = Plain::new();
        let mut output = Vec::new();
        mtp.serialize(&[OutboundMessage::rpc(vec![9, 9, 9])], &mut output);

        // Patch in a msg_id that passes the parity check, as a real
        // server response would carry.
        output[8..16].copy_from_slice(&5i64.to_le_bytes());

        let result = mtp.deserialize(&output).unwrap();
        assert_eq!(result.rpc_results[0].1.as_ref().unwrap(), &vec![9, 9, 9]);
    }
}
