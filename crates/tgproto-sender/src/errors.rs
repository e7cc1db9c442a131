use std::{fmt, io};
use tgproto_mtproto::{transport, AuthKeyGenError, DeserializeError};

/// This error occurs when reading from the network fails.
#[derive(Debug)]
pub enum ReadError {
    Io(io::Error),
    Transport(transport::Error),
    Deserialize(DeserializeError),
}

impl std::error::Error for ReadError {}

impl Clone for ReadError {
    fn clone(&self) -> Self {
        match self {
            Self::Io(e) => Self::Io(
                e.raw_os_error()
                    .map(io::Error::from_raw_os_error)
                    .unwrap_or_else(|| io::Error::new(e.kind(), e.to_string())),
            ),
            Self::Transport(e) => Self::Transport(*e),
            Self::Deserialize(e) => Self::Deserialize(e.clone()),
        }
    }
}

impl fmt::Display for ReadError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Io(err) => write!(f, "read error, IO failed: {err}"),
            Self::Transport(err) => write!(f, "read error, transport-level: {err}"),
            Self::Deserialize(err) => write!(f, "read error, bad response: {err}"),
        }
    }
}

impl From<io::Error> for ReadError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<transport::Error> for ReadError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<DeserializeError> for ReadError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

/// This error occurs when a remote procedure call was unsuccessful.
#[derive(Debug)]
pub enum InvocationError {
    /// The request invocation failed because it was invalid or the server
    /// could not process it successfully.
    Rpc(tgproto_mtproto::RpcError),
    /// Standard I/O error when reading the response.
    Io(io::Error),
    /// Error propagated from attempting to deserialize an invalid response.
    Deserialize(DeserializeError),
    /// Error propagated from the underlying transport.
    Transport(transport::Error),
    /// The request was cancelled or dropped, and the results won't arrive.
    Dropped,
    /// The request was invoked in a datacenter that is not known.
    InvalidDc,
    /// Connecting to a new datacenter required generating an authorization
    /// key, and that process failed.
    Authentication(AuthKeyGenError),
    /// The request body exceeded the maximum size a single message may
    /// carry.
    PayloadTooLarge { len: usize },
}

impl std::error::Error for InvocationError {}

impl fmt::Display for InvocationError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Rpc(err) => write!(f, "request error: {err}"),
            Self::Io(err) => write!(f, "request error: {err}"),
            Self::Deserialize(err) => write!(f, "request error: {err}"),
            Self::Transport(err) => write!(f, "request error: {err}"),
            Self::Dropped => write!(f, "request error: dropped (cancelled)"),
            Self::InvalidDc => write!(f, "request error: invalid dc"),
            Self::Authentication(err) => write!(f, "request error: {err}"),
            Self::PayloadTooLarge { len } => {
                write!(f, "request error: payload of {len} bytes exceeds the maximum message size")
            }
        }
    }
}

impl From<ReadError> for InvocationError {
    fn from(error: ReadError) -> Self {
        match error {
            ReadError::Io(error) => Self::Io(error),
            ReadError::Transport(error) => Self::Transport(error),
            ReadError::Deserialize(error) => Self::Deserialize(error),
        }
    }
}

impl From<DeserializeError> for InvocationError {
    fn from(error: DeserializeError) -> Self {
        Self::Deserialize(error)
    }
}

impl From<transport::Error> for InvocationError {
    fn from(error: transport::Error) -> Self {
        Self::Transport(error)
    }
}

impl From<io::Error> for InvocationError {
    fn from(error: io::Error) -> Self {
        Self::Io(error)
    }
}

impl From<AuthKeyGenError> for InvocationError {
    fn from(error: AuthKeyGenError) -> Self {
        Self::Authentication(error)
    }
}

impl From<tgproto_mtproto::RequestError> for InvocationError {
    fn from(error: tgproto_mtproto::RequestError) -> Self {
        match error {
            tgproto_mtproto::RequestError::Rpc(e) => Self::Rpc(e),
            tgproto_mtproto::RequestError::Deserialize(e) => Self::Deserialize(e),
            tgproto_mtproto::RequestError::Dropped => Self::Dropped,
        }
    }
}
