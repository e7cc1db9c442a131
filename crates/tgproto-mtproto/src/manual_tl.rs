//! Hand-written structures for the handful of control constructors the
//! transport core itself has to build and inspect: it never needs the
//! full generated schema, just enough to frame, container, and
//! (de)compress whatever the typed layer above it hands over as opaque
//! bytes.

use crate::errors::DeserializeError;
use crate::wire::{Cursor, Writer};
use flate2::read::{GzDecoder, GzEncoder};
use flate2::Compression;
use std::io::Read;

/// `message msg_id:long seqno:int bytes:int body:bytes = Message;`
///
/// What's actually exchanged with the server: each request or response is
/// wrapped in one of these before being encrypted, whether on its own or
/// batched inside a [`MessageContainer`].
pub struct Message {
    pub msg_id: i64,
    pub seq_no: i32,
    pub body: Vec<u8>,
}

impl Message {
    /// `msg_id` (8) + `seq_no` (4) + body length (4).
    pub const SIZE_OVERHEAD: usize = 16;

    pub fn constructor_id(&self) -> Result<u32, DeserializeError> {
        if self.body.len() < 4 {
            return Err(DeserializeError::UnexpectedEof);
        }
        Ok(u32::from_le_bytes(self.body[..4].try_into().unwrap()))
    }

    /// "A message requiring an explicit acknowledgment" has an odd `seq_no`.
    pub fn requires_ack(&self) -> bool {
        self.seq_no % 2 == 1
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_i64(self.msg_id);
        w.write_i32(self.seq_no);
        w.write_i32(self.body.len() as i32);
        w.write_bytes(&self.body);
    }

    pub fn deserialize(c: &mut Cursor) -> Result<Self, DeserializeError> {
        let msg_id = c.read_i64()?;
        let seq_no = c.read_i32()?;
        let len = c.read_i32()?;
        if len < 0 {
            return Err(DeserializeError::UnexpectedEof);
        }
        let len = len as usize;
        if len > MessageContainer::MAXIMUM_SIZE {
            return Err(DeserializeError::UnexpectedEof);
        }
        let body = c.read_n(len)?.to_vec();
        Ok(Message { msg_id, seq_no, body })
    }
}

/// `rpc_result#f35c6d01 req_msg_id:long result:Object = RpcResult;`
pub struct RpcResult {
    pub req_msg_id: i64,
    pub result: Vec<u8>,
}

impl RpcResult {
    pub const CONSTRUCTOR_ID: u32 = 0xf35c6d01;

    pub fn inner_constructor(&self) -> Result<u32, DeserializeError> {
        if self.result.len() < 4 {
            return Err(DeserializeError::UnexpectedEof);
        }
        Ok(u32::from_le_bytes(self.result[..4].try_into().unwrap()))
    }

    pub fn deserialize(c: &mut Cursor) -> Result<Self, DeserializeError> {
        let constructor_id = c.read_u32()?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(DeserializeError::UnknownConstructor(constructor_id as i32));
        }
        let req_msg_id = c.read_i64()?;
        let result = c.read_remaining().to_vec();
        Ok(Self { req_msg_id, result })
    }
}

/// `msg_container#73f1f8dc messages:vector<message> = MessageContainer;`
pub struct MessageContainer {
    pub messages: Vec<Message>,
}

impl MessageContainer {
    pub const CONSTRUCTOR_ID: u32 = 0x73f1f8dc;

    /// Constructor id (4) + inner vector length (4).
    pub const SIZE_OVERHEAD: usize = 8;

    /// Telegram closes the connection if a container's payload exceeds this
    /// size; the limit already excludes the container's own overhead.
    pub const MAXIMUM_SIZE: usize = 1_044_456 - Self::SIZE_OVERHEAD;

    /// Conservative cap on messages per container. Not an exact server
    /// limit, but comfortably under where `bad_msg_notification` code 64
    /// ("invalid container") starts showing up.
    pub const MAXIMUM_LENGTH: usize = 100;

    pub fn serialize(&self, w: &mut Writer) {
        w.write_u32(Self::CONSTRUCTOR_ID);
        w.write_i32(self.messages.len() as i32);
        for message in &self.messages {
            message.serialize(w);
        }
    }

    pub fn deserialize(c: &mut Cursor) -> Result<Self, DeserializeError> {
        let constructor_id = c.read_u32()?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(DeserializeError::UnknownConstructor(constructor_id as i32));
        }
        let len = c.read_i32()?;
        if len < 0 {
            return Err(DeserializeError::UnexpectedEof);
        }
        let len = (len as usize).min(Self::MAXIMUM_LENGTH);
        let mut messages = Vec::with_capacity(len);
        for _ in 0..len {
            messages.push(Message::deserialize(c)?);
        }
        Ok(Self { messages })
    }
}

/// `gzip_packed#3072cfa1 packed_data:string = Object;`
pub struct GzipPacked {
    pub packed_data: Vec<u8>,
}

impl GzipPacked {
    pub const CONSTRUCTOR_ID: u32 = 0x3072cfa1;

    pub fn new(unpacked_data: &[u8]) -> Self {
        let mut encoder = GzEncoder::new(unpacked_data, Compression::best());
        let mut packed_data = Vec::new();
        encoder
            .read_to_end(&mut packed_data)
            .expect("in-memory gzip encoding cannot fail");
        Self { packed_data }
    }

    pub fn decompress(&self) -> Result<Vec<u8>, DeserializeError> {
        let mut decoder = GzDecoder::new(&self.packed_data[..]);
        let mut out = Vec::new();
        decoder
            .read_to_end(&mut out)
            .map_err(|_| DeserializeError::MalformedGzip)?;
        Ok(out)
    }

    pub fn serialize(&self, w: &mut Writer) {
        w.write_u32(Self::CONSTRUCTOR_ID);
        w.write_bare_string(&self.packed_data);
    }

    pub fn deserialize(c: &mut Cursor) -> Result<Self, DeserializeError> {
        let constructor_id = c.read_u32()?;
        if constructor_id != Self::CONSTRUCTOR_ID {
            return Err(DeserializeError::UnknownConstructor(constructor_id as i32));
        }
        let packed_data = c.read_bare_string()?.to_vec();
        Ok(Self { packed_data })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_roundtrips() {
        let message = Message {
            msg_id: 123,
            seq_no: 5,
            body: vec![1, 2, 3, 4, 5],
        };
        let mut w = Writer::new();
        message.serialize(&mut w);
        let bytes = w.into_bytes();

        let mut c = Cursor::new(&bytes);
        let back = Message::deserialize(&mut c).unwrap();
        assert_eq!(back.msg_id, 123);
        assert_eq!(back.seq_no, 5);
        assert_eq!(back.body, vec![1, 2, 3, 4, 5]);
    }

    #[test]
    fn odd_seq_no_requires_ack() {
        let message = Message { msg_id: 0, seq_no: 3, body: vec![] };
        assert!(message.requires_ack());
        let message = Message { msg_id: 0, seq_no: 4, body: vec![] };
        assert!(!message.requires_ack());
    }

    #[test]
    fn container_roundtrips_multiple_messages() {
        let container = MessageContainer {
            messages: vec![
                Message { msg_id: 1, seq_no: 1, body: vec![9, 9] },
                Message { msg_id: 2, seq_no: 3, body: vec![1, 2, 3] },
            ],
        };
        let mut w = Writer::new();
        container.serialize(&mut w);
        let bytes = w.into_bytes();

        let mut c = Cursor::new(&bytes);
        let back = MessageContainer::deserialize(&mut c).unwrap();
        assert_eq!(back.messages.len(), 2);
        assert_eq!(back.messages[1].body, vec![1, 2, 3]);
    }

    #[test]
    fn gzip_packed_roundtrips() {
        let original = b"hello hello hello hello hello".to_vec();
        let packed = GzipPacked::new(&original);
        assert_eq!(packed.decompress().unwrap(), original);

        let mut w = Writer::new();
        packed.serialize(&mut w);
        let bytes = w.into_bytes();
        let mut c = Cursor::new(&bytes);
        let back = GzipPacked::deserialize(&mut c).unwrap();
        assert_eq!(back.decompress().unwrap(), original);
    }
}
