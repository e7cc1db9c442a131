use super::{Deserialization, Mtp, MsgId, OutboundMessage};
use crate::errors::{DeserializeError, RequestError, RpcError};
use crate::manual_tl::{GzipPacked, Message, MessageContainer};
use crate::session::Session;
use crate::wire::{Cursor, Writer};
use getrandom::getrandom;
use log::{debug, warn};
use tgproto_crypto::{encrypt_envelope, decrypt_envelope, AuthKey, RingBuffer, Side};
use web_time::{SystemTime, UNIX_EPOCH};

const RPC_ERROR: u32 = 0x2144ca19;
const MSGS_ACK: u32 = 0x62d6b459;
const BAD_SERVER_SALT: u32 = 0xedab447b;
const BAD_MSG_NOTIFICATION: u32 = 0xa7eff811;
const NEW_SESSION_CREATED: u32 = 0x9ec20908;
const PONG: u32 = 0x347773c5;
const VECTOR_ID: u32 = 0x1cb5c415;

/// Below this size outgoing bodies are never gzip-compressed; compressing
/// small requests tends to grow rather than shrink them.
pub const DEFAULT_COMPRESSION_THRESHOLD: Option<usize> = Some(512);

/// How far into the past an inbound message's timestamp (the upper 32 bits
/// of its `msg_id`) may lag the local clock before the session is failed.
const TIME_SKEW_PAST_SECS: i64 = 300;
/// How far into the future an inbound message's timestamp may lead the
/// local clock before the session is failed.
const TIME_SKEW_FUTURE_SECS: i64 = 30;

fn unix_time_secs() -> i64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .expect("system clock is before the unix epoch")
        .as_secs() as i64
}

pub struct Builder {
    compression_threshold: Option<usize>,
    salt: i64,
    session_id: Option<i64>,
}

impl Builder {
    pub fn compression_threshold(mut self, threshold: Option<usize>) -> Self {
        self.compression_threshold = threshold;
        self
    }

    pub fn salt(mut self, salt: i64) -> Self {
        self.salt = salt;
        self
    }

    pub fn session_id(mut self, session_id: i64) -> Self {
        self.session_id = Some(session_id);
        self
    }

    pub fn finish(self, auth_key: [u8; 256]) -> Encrypted {
        let session_id = self.session_id.unwrap_or_else(|| {
            let mut buffer = [0u8; 8];
            getrandom(&mut buffer).expect("failed to generate a secure session_id");
            i64::from_le_bytes(buffer)
        });

        Encrypted {
            auth_key: AuthKey::from_bytes(auth_key),
            session: Session::new(session_id, self.salt),
            compression_threshold: self.compression_threshold,
        }
    }
}

/// The Mobile Transport Protocol for encrypted messages: requires an
/// authorization key, and carries the session state (`msg_id`/`seq_no`
/// counters, pending acks, current salt) that the plaintext handshake
/// never needed.
pub struct Encrypted {
    auth_key: AuthKey,
    session: Session,
    compression_threshold: Option<usize>,
}

impl Encrypted {
    pub fn build() -> Builder {
        Builder {
            compression_threshold: DEFAULT_COMPRESSION_THRESHOLD,
            salt: 0,
            session_id: None,
        }
    }

    pub fn session(&mut self) -> &mut Session {
        &mut self.session
    }

    /// The authorization key this transport is encrypting under, so a
    /// caller can persist it across reconnects.
    pub fn auth_key(&self) -> &AuthKey {
        &self.auth_key
    }

    fn maybe_compress(&self, body: Vec<u8>) -> Vec<u8> {
        match self.compression_threshold {
            Some(threshold) if body.len() >= threshold => {
                let packed = GzipPacked::new(&body);
                if packed.packed_data.len() < body.len() {
                    let mut w = Writer::new();
                    packed.serialize(&mut w);
                    return w.into_bytes();
                }
                body
            }
            _ => body,
        }
    }

    fn build_message(&mut self, body: Vec<u8>, content_related: bool) -> (Message, MsgId) {
        let msg_id = self.session.next_msg_id();
        let seq_no = self.session.next_seq_no(content_related);
        (Message { msg_id, seq_no, body }, MsgId(msg_id))
    }

    fn build_ack_message(&mut self) -> Option<Message> {
        if !self.session.has_pending_acks() {
            return None;
        }
        let acks = self.session.take_pending_acks();
        let mut w = Writer::new();
        w.write_u32(MSGS_ACK);
        w.write_u32(VECTOR_ID);
        w.write_i32(acks.len() as i32);
        for id in acks {
            w.write_i64(id);
        }
        let msg_id = self.session.next_msg_id();
        let seq_no = self.session.next_seq_no(false);
        Some(Message { msg_id, seq_no, body: w.into_bytes() })
    }

    fn handle_message(&mut self, message: Message, out: &mut Deserialization) -> Result<(), DeserializeError> {
        if message.requires_ack() {
            self.session.queue_ack(message.msg_id);
        }

        let constructor_id = message.constructor_id()?;
        match constructor_id {
            MessageContainer::CONSTRUCTOR_ID => {
                let mut c = Cursor::new(&message.body);
                let container = MessageContainer::deserialize(&mut c)?;
                for inner in container.messages {
                    self.handle_message(inner, out)?;
                }
                Ok(())
            }
            GzipPacked::CONSTRUCTOR_ID => {
                let mut c = Cursor::new(&message.body);
                let gzip = GzipPacked::deserialize(&mut c)?;
                let decompressed = gzip.decompress()?;
                self.handle_message(
                    Message { msg_id: message.msg_id, seq_no: message.seq_no, body: decompressed },
                    out,
                )
            }
            crate::manual_tl::RpcResult::CONSTRUCTOR_ID => {
                let mut c = Cursor::new(&message.body);
                let rpc_result = crate::manual_tl::RpcResult::deserialize(&mut c)?;
                let result = if rpc_result.inner_constructor()? == RPC_ERROR {
                    let mut rc = Cursor::new(&rpc_result.result[4..]);
                    let code = rc.read_i32()?;
                    let name_bytes = rc.read_bare_string()?;
                    let name = String::from_utf8_lossy(name_bytes).into_owned();
                    Err(RequestError::Rpc(RpcError { code, name, value: None }))
                } else if rpc_result.inner_constructor()? == GzipPacked::CONSTRUCTOR_ID {
                    let mut rc = Cursor::new(&rpc_result.result);
                    let gzip = GzipPacked::deserialize(&mut rc)?;
                    Ok(gzip.decompress()?)
                } else {
                    Ok(rpc_result.result)
                };
                out.rpc_results.push((MsgId(rpc_result.req_msg_id), result));
                Ok(())
            }
            MSGS_ACK => Ok(()),
            BAD_SERVER_SALT => {
                let mut c = Cursor::new(&message.body[4..]);
                let bad_msg_id = c.read_i64()?;
                let _bad_msg_seqno = c.read_i32()?;
                let _error_code = c.read_i32()?;
                let new_salt = c.read_i64()?;
                debug!("server rejected our salt, switching to the one it supplied");
                self.session.set_salt(new_salt);
                out.retries.push(MsgId(bad_msg_id));
                Ok(())
            }
            BAD_MSG_NOTIFICATION => {
                let mut c = Cursor::new(&message.body[4..]);
                let bad_msg_id = c.read_i64()?;
                let _bad_msg_seqno = c.read_i32()?;
                let error_code = c.read_i32()?;
                match error_code {
                    16 | 17 => {
                        self.session.adjust_time_offset(message.msg_id);
                        out.retries.push(MsgId(bad_msg_id));
                    }
                    64 => {
                        out.retries.push(MsgId(bad_msg_id));
                    }
                    code => {
                        warn!("dropping bad_msg_notification for {bad_msg_id} with unrecoverable code {code}");
                    }
                }
                Ok(())
            }
            NEW_SESSION_CREATED => {
                let mut c = Cursor::new(&message.body[4..]);
                let first_msg_id = c.read_i64()?;
                let _unique_id = c.read_i64()?;
                let server_salt = c.read_i64()?;
                self.session.set_salt(server_salt);
                out.regenerate_below = Some(first_msg_id);
                Ok(())
            }
            PONG => Ok(()),
            _ => {
                out.updates.push(message.body);
                Ok(())
            }
        }
    }
}

impl Mtp for Encrypted {
    fn serialize(&mut self, requests: &[OutboundMessage], output: &mut Vec<u8>) -> Vec<MsgId> {
        let mut messages = Vec::with_capacity(requests.len() + 1);
        let mut ids = Vec::with_capacity(requests.len());

        if let Some(ack) = self.build_ack_message() {
            messages.push(ack);
        }

        for request in requests {
            let body = self.maybe_compress(request.body.clone());
            let (message, id) = self.build_message(body, request.content_related);
            messages.push(message);
            ids.push(id);
        }

        let plaintext_tail = if messages.len() == 1 {
            let message = messages.into_iter().next().unwrap();
            let mut w = Writer::new();
            w.write_i64(self.session.salt());
            w.write_i64(self.session.session_id());
            message.serialize(&mut w);
            w.into_bytes()
        } else {
            let container = MessageContainer { messages };
            let mut inner = Writer::new();
            container.serialize(&mut inner);
            let container_bytes = inner.into_bytes();

            let msg_id = self.session.next_msg_id();
            let seq_no = self.session.next_seq_no(false);

            let mut w = Writer::new();
            w.write_i64(self.session.salt());
            w.write_i64(self.session.session_id());
            w.write_i64(msg_id);
            w.write_i32(seq_no);
            w.write_i32(container_bytes.len() as i32);
            w.write_bytes(&container_bytes);
            w.into_bytes()
        };

        let mut buffer = RingBuffer::with_capacity(plaintext_tail.len() + 24, 24);
        buffer.extend(plaintext_tail);
        encrypt_envelope(&mut buffer, &self.auth_key, Side::Client);

        output.clear();
        output.extend_from_slice(buffer.as_ref());
        ids
    }

    fn deserialize(&mut self, payload: &[u8]) -> Result<Deserialization, DeserializeError> {
        if payload.len() < 24 {
            return Err(DeserializeError::UnexpectedEof);
        }

        let mut c = Cursor::new(payload);
        let auth_key_id = c.read_i64()?;
        if auth_key_id != self.auth_key.key_id() {
            warn!("dropping frame carrying unrecognized auth_key_id {auth_key_id}");
            return Ok(Deserialization::default());
        }
        let msg_key: [u8; 16] = c.read_fixed()?;
        let ciphertext = c.read_remaining();

        let plaintext = decrypt_envelope(&msg_key, ciphertext, &self.auth_key, Side::Server)?;

        let mut body = Cursor::new(&plaintext);
        let _salt = body.read_i64()?;
        let session_id = body.read_i64()?;
        if session_id != self.session.session_id() {
            return Err(DeserializeError::UnknownSession);
        }

        let message = Message::deserialize(&mut body)?;

        let timestamp = message.msg_id >> 32;
        let now = unix_time_secs() + self.session.time_offset();
        if timestamp < now - TIME_SKEW_PAST_SECS || timestamp > now + TIME_SKEW_FUTURE_SECS {
            return Err(DeserializeError::TimeSkew);
        }

        let mut result = Deserialization::default();
        self.handle_message(message, &mut result)?;
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_auth_key() -> [u8; 256] {
        let mut buffer = [0u8; 256];
        buffer.iter_mut().enumerate().for_each(|(i, x)| *x = (i as u8).wrapping_add(7));
        buffer
    }

    #[test]
    fn single_request_roundtrips() {
        let mut client = Encrypted::build().salt(42).session_id(99).finish(test_auth_key());
        let mut server = Encrypted::build().salt(42).session_id(99).finish(test_auth_key());

        let mut framed = Vec::new();
        let ids = client.serialize(&[OutboundMessage::rpc(vec![1, 2, 3, 4])], &mut framed);
        assert_eq!(ids.len(), 1);

        let result = server.deserialize(&framed).unwrap();
        assert_eq!(result.rpc_results.len(), 0);
        assert_eq!(result.updates.len(), 1);
        assert_eq!(result.updates[0], vec![1, 2, 3, 4]);
    }

    #[test]
    fn multiple_requests_batch_into_a_container() {
        let mut client = Encrypted::build().salt(1).session_id(7).finish(test_auth_key());
        let mut server = Encrypted::build().salt(1).session_id(7).finish(test_auth_key());

        let mut framed = Vec::new();
        let ids = client.serialize(
            &[OutboundMessage::rpc(vec![9, 9]), OutboundMessage::rpc(vec![8, 8, 8])],
            &mut framed,
        );
        assert_eq!(ids.len(), 2);

        let result = server.deserialize(&framed).unwrap();
        assert_eq!(result.updates.len(), 2);
    }

    #[test]
    fn wrong_session_id_is_rejected() {
        let mut client = Encrypted::build().salt(1).session_id(7).finish(test_auth_key());
        let mut server = Encrypted::build().salt(1).session_id(8).finish(test_auth_key());

        let mut framed = Vec::new();
        client.serialize(&[OutboundMessage::rpc(vec![1])], &mut framed);
        assert_eq!(server.deserialize(&framed), Err(DeserializeError::UnknownSession));
    }

    #[test]
    fn bad_server_salt_queues_a_retry_instead_of_failing_the_request() {
        let mut mtp = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());

        let mut w = Writer::new();
        w.write_u32(BAD_SERVER_SALT);
        w.write_i64(123); // bad_msg_id
        w.write_i32(0); // bad_msg_seqno
        w.write_i32(48); // error_code
        w.write_i64(999); // new_salt
        let message = Message { msg_id: 1, seq_no: 0, body: w.into_bytes() };

        let mut result = Deserialization::default();
        mtp.handle_message(message, &mut result).unwrap();

        assert_eq!(result.retries, vec![MsgId(123)]);
        assert!(result.rpc_results.is_empty());
        assert_eq!(mtp.session.salt(), 999);
    }

    #[test]
    fn bad_msg_notification_code_64_retries_other_codes_are_dropped() {
        let mut mtp = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());

        let mut w = Writer::new();
        w.write_u32(BAD_MSG_NOTIFICATION);
        w.write_i64(10); // bad_msg_id
        w.write_i32(0);
        w.write_i32(64); // bad container
        let message = Message { msg_id: 1, seq_no: 0, body: w.into_bytes() };
        let mut result = Deserialization::default();
        mtp.handle_message(message, &mut result).unwrap();
        assert_eq!(result.retries, vec![MsgId(10)]);

        let mut w = Writer::new();
        w.write_u32(BAD_MSG_NOTIFICATION);
        w.write_i64(20);
        w.write_i32(0);
        w.write_i32(20); // unrecoverable, not in 16/17/64
        let message = Message { msg_id: 2, seq_no: 0, body: w.into_bytes() };
        let mut result = Deserialization::default();
        mtp.handle_message(message, &mut result).unwrap();
        assert!(result.retries.is_empty());
        assert!(result.rpc_results.is_empty());
    }

    #[test]
    fn new_session_created_surfaces_first_msg_id_for_regeneration() {
        let mut mtp = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());

        let mut w = Writer::new();
        w.write_u32(NEW_SESSION_CREATED);
        w.write_i64(777); // first_msg_id
        w.write_i64(42); // unique_id
        w.write_i64(555); // server_salt
        let message = Message { msg_id: 1, seq_no: 0, body: w.into_bytes() };

        let mut result = Deserialization::default();
        mtp.handle_message(message, &mut result).unwrap();

        assert_eq!(result.regenerate_below, Some(777));
        assert_eq!(mtp.session.salt(), 555);
    }

    #[test]
    fn stale_msg_id_is_rejected_as_time_skew() {
        let mut client = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());
        let mut server = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());

        let stale_now = unix_time_secs() - 1_000;
        client.session.adjust_time_offset(stale_now << 32);

        let mut framed = Vec::new();
        client.serialize(&[OutboundMessage::rpc(vec![1])], &mut framed);

        assert_eq!(server.deserialize(&framed), Err(DeserializeError::TimeSkew));
    }

    #[test]
    fn unrecognized_auth_key_id_is_dropped_without_erroring() {
        let mut client = Encrypted::build().salt(1).session_id(5).finish(test_auth_key());
        let mut other_key = test_auth_key();
        other_key[0] ^= 0xff;
        let mut other_server = Encrypted::build().salt(1).session_id(5).finish(other_key);

        let mut framed = Vec::new();
        client.serialize(&[OutboundMessage::rpc(vec![1])], &mut framed);

        let result = other_server.deserialize(&framed).unwrap();
        assert!(result.rpc_results.is_empty());
        assert!(result.updates.is_empty());
    }
}
