//! Connection lifecycle on top of the MTProto transport core.
//!
//! The [`Sender`] is the base building block: it owns a single network
//! connection, the transport framing state, and the MTP state, buffering
//! requests before sending them off in a single container and matching
//! replies back to their callers. It also arms a keepalive ping so an idle
//! connection is detected before the peer silently drops it.
//!
//! Interacting with more than one datacenter at once (required for
//! migrations during sign-in, and for media spread across datacenters)
//! needs more than one connection; [`Controller`] is the entry point that
//! manages a pool of `Sender`s, connecting to a datacenter lazily on first
//! use and reconnecting according to a pluggable [`ReconnectionPolicy`]
//! when one dies.

#![deny(unsafe_code)]

mod configuration;
mod controller;
mod errors;
mod net;
mod reconnection;
mod sender;

pub use configuration::{Configuration, DcEndpoint};
pub use controller::{controller, Controller, ControllerRunner, DEFAULT_TEMP_KEY_LIFETIME};
pub use errors::{InvocationError, ReadError};
pub use net::ServerAddr;
pub use reconnection::{ExponentialReconnect, FixedReconnect, NoReconnect, ReconnectionPolicy};
pub use sender::{connect, connect_with_auth, generate_auth_key, SendFlags, Sender};

pub use tgproto_mtproto::RpcError;
