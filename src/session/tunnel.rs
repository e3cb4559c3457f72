//! `Tunnel`: the forwarded TCP<->PTCP stream state, and the proxy event
//! loop that multiplexes the TCP listener, the PTCP link, and (while a
//! tunnel is open) the local TCP client (spec.md §4.6 "Proxy loop", §5).

use rand::Rng;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};

use crate::core::constants::PTCP_OP_KEEPALIVE;
use crate::core::error::{GatewayError, TransportError};
use crate::transport::{FrameKind, PtcpFrame, PtcpLink, PtcpPayload};

/// Lifecycle state of a forwarded RTSP stream (spec.md §3 `Tunnel`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TunnelState {
    /// `0x11` sent, `0x12` ack not yet observed.
    Opening,
    /// `0x12` ack observed; shuttling data both ways.
    Open,
    /// `0x12`/`DISC` sent, draining the PTCP link for its own `0x12` reply.
    Closing,
    /// Teardown acknowledged on both sides.
    Closed,
}

/// One forwarded TCP<->PTCP stream. At most one is active at a time —
/// this design carries exactly one tunneled connection per PTCP session
/// (spec.md §1 Non-goals).
pub struct Tunnel {
    /// Tunnel id chosen by this side when opening (spec.md §3).
    pub realm_id: u32,
    state: TunnelState,
}

impl Tunnel {
    fn new(realm_id: u32) -> Self {
        Self {
            realm_id,
            state: TunnelState::Opening,
        }
    }

    /// Current lifecycle state.
    pub fn state(&self) -> TunnelState {
        self.state
    }
}

const RECV_CHUNK: usize = 4096;

/// Serve the accepting TCP listener and the device PTCP link forever
/// (spec.md §4.6 S13). Returns only on an unrecoverable transport error;
/// per spec.md §5 the only other way out is process termination.
pub async fn run_proxy_loop(
    listener: TcpListener,
    mut link: PtcpLink,
    debug: bool,
) -> Result<(), GatewayError> {
    loop {
        tokio::select! {
            accepted = listener.accept() => {
                let (stream, addr) = accepted?;
                eprintln!("Connection from {addr}");

                let realm_id: u32 = rand::thread_rng().gen();
                link.open_tunnel(realm_id).await?;
                let mut tunnel = Tunnel::new(realm_id);
                tunnel.state = TunnelState::Open;

                run_tunnel(&mut tunnel, stream, &mut link, debug).await?;
            }
            frame = link.recv() => {
                handle_idle_frame(frame?, &mut link, debug).await?;
            }
        }
    }
}

/// While no tunnel is open, the only PTCP traffic expected is the peer's
/// `0x13` keepalive or a pure ack; anything else is logged rather than
/// treated as fatal (spec.md §9's redesign note on the reference's `if
/// res.body[0] != 0x10: continue`). Every non-empty frame still gets an
/// empty ack in return (spec.md §4.6 "every non-empty frame triggers an
/// empty ack"), matching the reference's unconditional `request_ptcp()`
/// after any non-empty read.
async fn handle_idle_frame(
    frame: PtcpFrame,
    link: &mut PtcpLink,
    debug: bool,
) -> Result<(), GatewayError> {
    match frame.kind().map_err(TransportError::from)? {
        FrameKind::Ack => {}
        FrameKind::Control(op, _) => {
            if debug && op != PTCP_OP_KEEPALIVE {
                eprintln!("discarding unexpected idle-loop control frame {op:#04x}");
            }
            link.send_ack().await?;
        }
        FrameKind::Data(_) => {
            if debug {
                eprintln!("discarding unexpected idle-loop data frame (no tunnel open)");
            }
            link.send_ack().await?;
        }
    }
    Ok(())
}

/// Shuttle bytes between `stream` and the device over `link`'s `realm_id`
/// until the local peer closes, resets, or breaks the pipe, then tear
/// down the tunnel (spec.md §4.6 "Connection teardown").
async fn run_tunnel(
    tunnel: &mut Tunnel,
    mut stream: TcpStream,
    link: &mut PtcpLink,
    debug: bool,
) -> Result<(), GatewayError> {
    let mut buf = [0u8; RECV_CHUNK];

    loop {
        tokio::select! {
            frame = link.recv() => {
                let frame = frame?;
                match frame.kind().map_err(TransportError::from)? {
                    FrameKind::Ack => {}
                    FrameKind::Data(payload) => {
                        link.send_ack().await?;
                        if payload.realm != tunnel.realm_id {
                            if debug {
                                eprintln!(
                                    "discarding data frame for realm {:#010x}, active tunnel is {:#010x}",
                                    payload.realm, tunnel.realm_id
                                );
                            }
                            continue;
                        }
                        if stream.write_all(&payload.payload).await.is_err() {
                            eprintln!("Connection closed?");
                            break;
                        }
                    }
                    FrameKind::Control(op, _) => {
                        if debug && op != PTCP_OP_KEEPALIVE {
                            eprintln!("discarding unexpected tunnel control frame {op:#04x}");
                        }
                        link.send_ack().await?;
                    }
                }
            }
            read = stream.read(&mut buf) => {
                match read {
                    Ok(0) => {
                        eprintln!("Connection closed?");
                        break;
                    }
                    Ok(n) => {
                        let payload = PtcpPayload {
                            realm: tunnel.realm_id,
                            payload: buf[..n].to_vec(),
                        };
                        link.send(payload.to_bytes()).await?;
                    }
                    Err(e) if is_peer_gone(&e) => {
                        eprintln!("Connection reset by peer");
                        break;
                    }
                    Err(e) => return Err(e.into()),
                }
            }
        }
    }

    eprintln!("Cleaning up connection");
    tunnel.state = TunnelState::Closing;
    link.close_tunnel(tunnel.realm_id).await?;
    tunnel.state = TunnelState::Closed;
    eprintln!("Connection closed");
    Ok(())
}

fn is_peer_gone(err: &std::io::Error) -> bool {
    use std::io::ErrorKind;
    matches!(err.kind(), ErrorKind::ConnectionReset | ErrorKind::BrokenPipe)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::constants::PTCP_OP_OPEN_TUNNEL;
    use crate::transport::socket::GatewaySocket;

    #[test]
    fn tunnel_starts_opening() {
        let tunnel = Tunnel::new(7);
        assert_eq!(tunnel.realm_id, 7);
        assert_eq!(tunnel.state(), TunnelState::Opening);
    }

    /// Drives a real `run_proxy_loop` against a scripted fake device over
    /// loopback UDP and a real TCP client, exercising the open-tunnel
    /// handshake and a full round-trip byte shuttle.
    #[tokio::test]
    async fn proxy_loop_shuttles_bytes_both_ways() {
        let gateway_sock = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let device_sock = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let gateway_addr = gateway_sock.local_addr().unwrap();
        let device_addr = device_sock.local_addr().unwrap();
        gateway_sock.connect(device_addr).await.unwrap();
        device_sock.connect(gateway_addr).await.unwrap();

        let link = PtcpLink::new(gateway_sock, false);
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let listen_addr = listener.local_addr().unwrap();

        let proxy = tokio::spawn(run_proxy_loop(listener, link, false));

        let device_task = tokio::spawn(async move {
            let mut device_link = PtcpLink::new(device_sock, false);

            let open = device_link.recv().await.unwrap();
            assert_eq!(open.op(), Some(PTCP_OP_OPEN_TUNNEL));
            let realm_id = u32::from_be_bytes(open.body[4..8].try_into().unwrap());
            device_link.send(vec![0x12]).await.unwrap();

            let data_frame = device_link.recv_nonempty().await.unwrap();
            let payload = PtcpPayload::from_bytes(&data_frame.body).unwrap();
            assert_eq!(payload.realm, realm_id);
            assert_eq!(payload.payload, b"hello device");
            device_link.send_ack().await.unwrap();

            let reply = PtcpPayload {
                realm: realm_id,
                payload: b"hello client".to_vec(),
            };
            device_link.send(reply.to_bytes()).await.unwrap();
            let _ack = device_link.recv().await.unwrap();
        });

        let mut client = TcpStream::connect(listen_addr).await.unwrap();
        client.write_all(b"hello device").await.unwrap();

        let mut buf = [0u8; 64];
        let n = client.read(&mut buf).await.unwrap();
        assert_eq!(&buf[..n], b"hello client");

        device_task.await.unwrap();
        proxy.abort();
        let _ = proxy.await;
    }
}
