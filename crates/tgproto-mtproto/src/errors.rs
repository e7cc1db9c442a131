use std::fmt;

/// A wire-level message could not be parsed into a known shape.
#[derive(Clone, Debug, PartialEq)]
pub enum DeserializeError {
    UnexpectedEof,
    UnknownConstructor(i32),
    MalformedGzip,
    /// The `auth_key_id` on the wire did not match the one we hold.
    BadAuthKey { got: i64, expected: i64 },
    /// `msg_id` failed the parity or positivity rule for this message kind.
    BadMessageId { got: i64 },
    /// A declared length ran past (or under) the buffer it should bound.
    BadMessageLength { got: usize },
    Crypto(tgproto_crypto::Error),
    /// The message arrived under a `session_id` we did not send.
    UnknownSession,
    /// The upper 32 bits of an inbound `msg_id` fell outside the accepted
    /// `[now - 300s, now + 30s]` window.
    TimeSkew,
}

impl std::error::Error for DeserializeError {}

impl fmt::Display for DeserializeError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeserializeError::UnexpectedEof => write!(f, "not enough bytes to deserialize"),
            DeserializeError::UnknownConstructor(id) => {
                write!(f, "unknown constructor id {id:#x}")
            }
            DeserializeError::MalformedGzip => write!(f, "gzip_packed payload did not inflate"),
            DeserializeError::BadAuthKey { got, expected } => {
                write!(f, "message carried auth_key_id {got}, expected {expected}")
            }
            DeserializeError::BadMessageId { got } => write!(f, "invalid msg_id {got}"),
            DeserializeError::BadMessageLength { got } => {
                write!(f, "message declared an out-of-range length {got}")
            }
            DeserializeError::Crypto(e) => write!(f, "{e}"),
            DeserializeError::UnknownSession => {
                write!(f, "message arrived under an unrecognized session_id")
            }
            DeserializeError::TimeSkew => {
                write!(f, "inbound message timestamp is outside the accepted skew window")
            }
        }
    }
}

impl From<tgproto_crypto::Error> for DeserializeError {
    fn from(e: tgproto_crypto::Error) -> Self {
        DeserializeError::Crypto(e)
    }
}

impl From<crate::wire::Error> for DeserializeError {
    fn from(_: crate::wire::Error) -> Self {
        DeserializeError::UnexpectedEof
    }
}

/// The error variant an RPC response's `rpc_error` constructor carries,
/// surfaced to the caller that issued the request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RpcError {
    pub code: i32,
    pub name: String,
    pub value: Option<i32>,
}

impl fmt::Display for RpcError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.value {
            Some(value) => write!(f, "rpc error {}: {} ({})", self.code, self.name, value),
            None => write!(f, "rpc error {}: {}", self.code, self.name),
        }
    }
}

impl std::error::Error for RpcError {}

/// Why a request sent by the caller did not resolve into a response.
#[derive(Debug)]
pub enum RequestError {
    Rpc(RpcError),
    Deserialize(DeserializeError),
    Dropped,
}

impl fmt::Display for RequestError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RequestError::Rpc(e) => write!(f, "{e}"),
            RequestError::Deserialize(e) => write!(f, "{e}"),
            RequestError::Dropped => write!(f, "request was dropped before a response arrived"),
        }
    }
}

impl std::error::Error for RequestError {}

impl From<RpcError> for RequestError {
    fn from(e: RpcError) -> Self {
        RequestError::Rpc(e)
    }
}

impl From<DeserializeError> for RequestError {
    fn from(e: DeserializeError) -> Self {
        RequestError::Deserialize(e)
    }
}

/// Errors that can abort the authorization key handshake.
#[derive(Debug)]
pub enum AuthKeyGenError {
    Deserialize(DeserializeError),
    Crypto(tgproto_crypto::Error),
    /// The server returned `nonce`/`server_nonce` that did not match what
    /// we sent.
    NonceMismatch,
    /// None of the server's RSA fingerprints matched a key we trust.
    NoMatchingRsaKey,
    /// The server reported `server_DH_params_fail`.
    DhParamsFail,
    /// `encrypted_answer` was not a multiple of 16 bytes.
    AnswerNotPadded,
    /// The SHA1 prefix of the decrypted DH answer did not match its body.
    AnswerHashMismatch,
    /// `g`, `g_a`, or `g_b` failed the safety-range checks.
    BadDhParameter(&'static str),
    /// `dh_gen_retry`/`dh_gen_fail` exceeded the retry budget.
    RetriesExceeded,
    /// The server reported `dh_gen_fail`.
    DhGenFail,
}

impl fmt::Display for AuthKeyGenError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AuthKeyGenError::Deserialize(e) => write!(f, "{e}"),
            AuthKeyGenError::Crypto(e) => write!(f, "{e}"),
            AuthKeyGenError::NonceMismatch => write!(f, "server echoed back a mismatching nonce"),
            AuthKeyGenError::NoMatchingRsaKey => {
                write!(f, "no known RSA key matches any server fingerprint")
            }
            AuthKeyGenError::DhParamsFail => write!(f, "server reported server_DH_params_fail"),
            AuthKeyGenError::AnswerNotPadded => {
                write!(f, "encrypted DH answer was not a multiple of 16 bytes")
            }
            AuthKeyGenError::AnswerHashMismatch => {
                write!(f, "decrypted DH answer hash did not match its body")
            }
            AuthKeyGenError::BadDhParameter(which) => write!(f, "bad DH parameter: {which}"),
            AuthKeyGenError::RetriesExceeded => write!(f, "dh_gen_retry budget exhausted"),
            AuthKeyGenError::DhGenFail => write!(f, "server reported dh_gen_fail"),
        }
    }
}

impl std::error::Error for AuthKeyGenError {}

impl From<DeserializeError> for AuthKeyGenError {
    fn from(e: DeserializeError) -> Self {
        AuthKeyGenError::Deserialize(e)
    }
}

impl From<tgproto_crypto::Error> for AuthKeyGenError {
    fn from(e: tgproto_crypto::Error) -> Self {
        AuthKeyGenError::Crypto(e)
    }
}
