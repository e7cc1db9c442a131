use log::info;
pub use tokio::net::tcp::{ReadHalf, WriteHalf};
use tokio::net::TcpStream;

use super::ServerAddr;

pub struct NetStream(TcpStream);

impl NetStream {
    pub(crate) fn split(&mut self) -> (ReadHalf<'_>, WriteHalf<'_>) {
        self.0.split()
    }

    pub(crate) async fn connect(addr: &ServerAddr) -> Result<Self, std::io::Error> {
        info!("connecting to {}...", addr.address);
        Ok(Self(TcpStream::connect(addr.address).await?))
    }
}
