//! Async UDP socket wrapper shared by the directory client, the hole-punch
//! engine, and the PTCP link.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;

use tokio::net::UdpSocket;

/// Default receive buffer size, generous enough for a fragmented RTSP
/// payload frame plus the PTCP header.
pub const DEFAULT_RECV_BUFFER_SIZE: usize = 65536;

/// A thin async UDP socket wrapper with an owned receive buffer.
#[derive(Debug)]
pub struct GatewaySocket {
    socket: Arc<UdpSocket>,
    recv_buffer: Vec<u8>,
}

impl GatewaySocket {
    /// Bind a new socket to `addr` (use `0.0.0.0:0` for an ephemeral port).
    pub async fn bind(addr: SocketAddr) -> io::Result<Self> {
        let socket = UdpSocket::bind(addr).await?;
        Ok(Self::from_socket(socket))
    }

    /// Wrap an already-bound socket.
    pub fn from_socket(socket: UdpSocket) -> Self {
        Self {
            socket: Arc::new(socket),
            recv_buffer: vec![0u8; DEFAULT_RECV_BUFFER_SIZE],
        }
    }

    /// Local address this socket is bound to.
    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Connect the socket to a single remote peer, enabling `send`/`recv`.
    pub async fn connect(&self, addr: SocketAddr) -> io::Result<()> {
        self.socket.connect(addr).await
    }

    /// Send a datagram to an explicit address.
    pub async fn send_to(&self, data: &[u8], addr: SocketAddr) -> io::Result<usize> {
        self.socket.send_to(data, addr).await
    }

    /// Send a datagram to the connected address.
    pub async fn send(&self, data: &[u8]) -> io::Result<usize> {
        self.socket.send(data).await
    }

    /// Receive a datagram, returning a view into the internal buffer along
    /// with the sender's address.
    pub async fn recv_from(&mut self) -> io::Result<(&[u8], SocketAddr)> {
        let (len, addr) = self.socket.recv_from(&mut self.recv_buffer).await?;
        Ok((&self.recv_buffer[..len], addr))
    }

    /// Receive a datagram from the connected address.
    pub async fn recv(&mut self) -> io::Result<&[u8]> {
        let len = self.socket.recv(&mut self.recv_buffer).await?;
        Ok(&self.recv_buffer[..len])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn send_to_and_recv_from_roundtrip() {
        let mut a = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut b = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b_addr = b.local_addr().unwrap();

        a.send_to(b"hello", b_addr).await.unwrap();
        let (data, from) = b.recv_from().await.unwrap();
        assert_eq!(data, b"hello");
        assert_eq!(from, a.local_addr().unwrap());
    }

    #[tokio::test]
    async fn connected_send_and_recv_roundtrip() {
        let a = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let mut b = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let b_addr = b.local_addr().unwrap();
        a.connect(b_addr).await.unwrap();

        a.send(b"ping").await.unwrap();
        let (data, _) = b.recv_from().await.unwrap();
        assert_eq!(data, b"ping");
    }
}
