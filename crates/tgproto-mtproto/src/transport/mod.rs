//! Wire framing for the single transport this crate supports: a
//! length-prefixed scheme layered directly over a raw, reliable TCP
//! stream, with no in-band obfuscation or transport negotiation (see the
//! Non-goals on transport variety).

mod length_prefixed;

pub use length_prefixed::LengthPrefixed;

use tgproto_crypto::RingBuffer;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Error {
    /// The buffer doesn't yet hold a complete frame; call again once more
    /// bytes have arrived.
    MissingBytes,
    /// The peer reported a transport-level error status instead of a
    /// payload (a negative length prefix).
    BadStatus(u32),
}

impl std::error::Error for Error {}

impl std::fmt::Display for Error {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Error::MissingBytes => write!(f, "not enough bytes buffered for a full frame"),
            Error::BadStatus(status) => write!(f, "transport reported error status {status}"),
        }
    }
}

/// Where a decoded frame's payload lives within the buffer that was
/// handed to [`LengthPrefixed::unpack`], and where the next frame begins.
pub struct UnpackedOffset {
    pub data_start: usize,
    pub data_end: usize,
    pub next_offset: usize,
}

/// Frames a plaintext (already-encrypted-at-the-MTProto-layer) buffer for
/// the wire, and recovers frame boundaries from a buffer that may hold
/// zero, one, or several frames back-to-back.
pub trait Transport {
    fn pack(&mut self, buffer: &mut RingBuffer<u8>);
    fn unpack(&mut self, buffer: &[u8]) -> Result<UnpackedOffset, Error>;
}
