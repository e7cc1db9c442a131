//! The MTProto transport core: a TL-primitive wire codec, the plaintext
//! authorization-key handshake (including its perfect-forward-secrecy temp
//! key variant), the length-prefixed framing used to carry messages over a
//! byte stream, and the session/container/gzip plumbing that turns opaque
//! request bodies into an encrypted wire payload and back.
//!
//! This crate only speaks bytes in and bytes out: it knows nothing about
//! TCP, reconnection, or the generated RPC schema of any particular API.
//! Those live one layer up, alongside a driver for the authentication
//! handshake in this crate.

pub mod authentication;
pub mod dc;
pub mod errors;
pub mod manual_tl;
pub mod mtp;
pub mod pfs;
pub mod session;
pub mod transport;
pub mod wire;

pub use errors::{AuthKeyGenError, DeserializeError, RequestError, RpcError};
pub use mtp::{Deserialization, Encrypted, Mtp, MsgId, OutboundMessage, Plain};
pub use session::Session;
pub use transport::{LengthPrefixed, Transport};

pub use tgproto_crypto::AuthKey;
