use super::{Error, Transport, UnpackedOffset};
use tgproto_crypto::RingBuffer;

/// Length-prefixed TCP framing: a length header counted in 4-byte words,
/// followed by the payload.
///
/// ```text
/// +-+----...----+
/// |L|  payload  |   (L < 0x7f, one byte)
/// +-+----...----+
///
/// +----+----...----+
/// | len|  payload  |   (otherwise: 4 bytes, low byte 0x7f)
/// +----+----...----+
/// ```
pub struct LengthPrefixed;

impl LengthPrefixed {
    pub fn new() -> Self {
        Self
    }
}

impl Default for LengthPrefixed {
    fn default() -> Self {
        Self::new()
    }
}

impl Transport for LengthPrefixed {
    fn pack(&mut self, buffer: &mut RingBuffer<u8>) {
        let len = buffer.len();
        assert_eq!(len % 4, 0, "payload must already be word-aligned");

        let words = len / 4;
        if words < 0x7f {
            buffer.shift(1).extend([words as u8]);
        } else {
            buffer
                .shift(4)
                .extend((0x7f | ((words as u32) << 8)).to_le_bytes());
        }
    }

    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error> {
        if buffer.is_empty() {
            return Err(Error::MissingBytes);
        }

        let first = buffer[0];
        let (header_len, words) = if first < 0x7f {
            (1usize, first as i32)
        } else {
            if buffer.len() < 4 {
                return Err(Error::MissingBytes);
            }
            let word = i32::from_le_bytes(buffer[0..4].try_into().unwrap());
            (4usize, word >> 8)
        };

        if words < 0 {
            return Err(Error::BadStatus((-words) as u32));
        }

        let len = (words as usize) * 4;
        if buffer.len() < header_len + len {
            return Err(Error::MissingBytes);
        }

        Ok(UnpackedOffset {
            data_start: header_len,
            data_end: header_len + len,
            next_offset: header_len + len,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_frame_uses_one_byte_header() {
        let mut buffer = RingBuffer::with_capacity(64, 16);
        buffer.extend(vec![0u8; 8]);
        let mut transport = LengthPrefixed::new();
        transport.pack(&mut buffer);

        let framed = buffer.as_ref();
        assert_eq!(framed[0], 2);
        assert_eq!(framed.len(), 9);

        let offset = transport.unpack(framed).unwrap();
        assert_eq!(offset.data_start, 1);
        assert_eq!(offset.data_end, 9);
        assert_eq!(offset.next_offset, 9);
    }

    #[test]
    fn long_frame_uses_four_byte_header() {
        let mut buffer = RingBuffer::with_capacity(1024, 16);
        buffer.extend(vec![0u8; 0x7f * 4]);
        let mut transport = LengthPrefixed::new();
        transport.pack(&mut buffer);

        let framed = buffer.as_ref();
        assert_eq!(framed[0], 0x7f);

        let offset = transport.unpack(framed).unwrap();
        assert_eq!(offset.data_start, 4);
        assert_eq!(offset.data_end, framed.len());
    }

    #[test]
    fn missing_bytes_is_reported() {
        let mut transport = LengthPrefixed::new();
        assert_eq!(transport.unpack(&[]), Err(Error::MissingBytes));
        assert_eq!(transport.unpack(&[2]), Err(Error::MissingBytes));
    }

    #[test]
    fn negative_length_is_a_bad_status() {
        let mut transport = LengthPrefixed::new();
        let status: i32 = -5;
        let word = 0x7f | (status << 8);
        let bytes = word.to_le_bytes();
        assert_eq!(transport.unpack(&bytes), Err(Error::BadStatus(5)));
    }
}
