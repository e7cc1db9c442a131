mod tcp;

pub use tcp::NetStream;

/// The address a [`crate::sender::Sender`] connects to. Only a single
/// transport variant is supported (see the crate's Non-goals), so unlike
/// the lineage this is descended from there is no proxied variant here.
#[derive(Debug, Clone, Copy)]
pub struct ServerAddr {
    pub address: std::net::SocketAddr,
}
