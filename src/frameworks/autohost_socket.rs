//! The concrete `AutohostChannel` (§4.J, component J): a loopback UDP
//! socket the spawned engine process talks back to.

use async_trait::async_trait;
use tokio::net::UdpSocket;

use crate::domain::AutohostError;
use crate::interface_adapters::AutohostChannel;

pub struct AutohostUdpSocket {
    socket: UdpSocket,
}

impl AutohostUdpSocket {
    /// Binds a loopback UDP socket on an OS-assigned port and returns it
    /// along with the bound port, which the caller passes to the engine
    /// as `game/autohostport` (§4.J "launch sequence").
    pub async fn bind() -> Result<(Self, u16), AutohostError> {
        let socket = UdpSocket::bind(("127.0.0.1", 0))
            .await
            .map_err(|e| AutohostError::System(format!("binding autohost socket: {e}")))?;
        let port = socket
            .local_addr()
            .map_err(|e| AutohostError::System(format!("reading autohost socket addr: {e}")))?
            .port();
        Ok((Self { socket }, port))
    }

    /// `SERVER_STARTED` handshake: the engine sends one empty datagram to
    /// learn our reply address before streaming events.
    pub async fn connect_to_engine(&self, engine_port: u16) -> std::io::Result<()> {
        self.socket.connect(("127.0.0.1", engine_port)).await?;
        self.socket.send(&[]).await?;
        Ok(())
    }
}

#[async_trait]
impl AutohostChannel for AutohostUdpSocket {
    async fn recv_datagram(&mut self) -> std::io::Result<Vec<u8>> {
        let mut buf = vec![0u8; 4096];
        let n = self.socket.recv(&mut buf).await?;
        buf.truncate(n);
        Ok(buf)
    }
}
