//! `PtcpLink`: per-peer PTCP sequence accounting, the in-band handshake
//! sequence, and the open/close-tunnel sub-protocol (spec.md §4.5).

use crate::core::constants::{
    OPEN_TUNNEL_IPV4, OPEN_TUNNEL_PORT, PTCP_HELLO_BODY, PTCP_OP_DATA, PTCP_OP_OPEN_TUNNEL,
    PTCP_OP_READY, PTCP_OP_SIGN_ACK, PTCP_OP_SIGN_REQUEST, PTCP_OP_SIGN_SUBMIT,
    PTCP_OP_TUNNEL_CTRL, PTCP_PID_DATA_BASE, PTCP_PID_HELLO, TUNNEL_CLOSE_SUFFIX,
};
use crate::core::error::TransportError;
use crate::transport::frame::PtcpFrame;
use crate::transport::socket::GatewaySocket;

/// A PTCP link: one peer's view of the reliable-datagram session, carrying
/// the counters spec.md §4.5 defines plus the handshake and open/close
/// tunnel helpers built on top of them.
///
/// `ptcp_sent`/`ptcp_recv` accumulate as `u64` internally (a long-lived
/// RTSP tunnel can move more than 4 GiB); the wire `rlid`/`llid` fields
/// truncate to `u32`, matching the protocol's fixed frame layout.
#[derive(Debug)]
pub struct PtcpLink {
    socket: GatewaySocket,
    ptcp_sent: u64,
    ptcp_recv: u64,
    ptcp_count: u32,
    ptcp_id: u32,
    rmid: u32,
    debug: bool,
}

impl PtcpLink {
    /// Wrap a connected [`GatewaySocket`] in a fresh PTCP link. All
    /// counters start at zero, per spec.md §4.5.
    pub fn new(socket: GatewaySocket, debug: bool) -> Self {
        Self {
            socket,
            ptcp_sent: 0,
            ptcp_recv: 0,
            ptcp_count: 0,
            ptcp_id: 0,
            rmid: 0,
            debug,
        }
    }

    /// Bytes sent so far on this link (spec.md §8 invariant 1).
    pub fn ptcp_sent(&self) -> u64 {
        self.ptcp_sent
    }

    /// Bytes received so far on this link (spec.md §8 invariant 1).
    pub fn ptcp_recv(&self) -> u64 {
        self.ptcp_recv
    }

    /// Current local message id (spec.md §8 invariant 2: strictly
    /// increasing across sends).
    pub fn ptcp_id(&self) -> u32 {
        self.ptcp_id
    }

    /// Send one PTCP frame carrying `body`, applying the send discipline
    /// of spec.md §4.5: `rlid`/`llid` from the running counters, `pid`
    /// from the hello/data rule, `lmid`/`rmid` from the link state.
    pub async fn send(&mut self, body: Vec<u8>) -> Result<(), TransportError> {
        let is_hello = body.as_slice() == PTCP_HELLO_BODY.as_slice();
        let pid = if is_hello {
            PTCP_PID_HELLO
        } else {
            PTCP_PID_DATA_BASE.wrapping_sub(self.ptcp_count)
        };
        let frame = PtcpFrame {
            rlid: self.ptcp_recv as u32,
            llid: self.ptcp_sent as u32,
            pid,
            lmid: self.ptcp_id,
            rmid: self.rmid,
            body,
        };

        if self.debug {
            eprintln!(">>> PTCP {frame:?}");
        }

        self.socket.send(&frame.to_bytes()).await?;

        self.ptcp_sent += frame.body.len() as u64;
        self.ptcp_id = self.ptcp_id.wrapping_add(1);
        if !frame.body.is_empty() && !is_hello {
            self.ptcp_count = self.ptcp_count.wrapping_add(1);
        }
        Ok(())
    }

    /// Send a pure (empty-body) acknowledgement frame.
    pub async fn send_ack(&mut self) -> Result<(), TransportError> {
        self.send(Vec::new()).await
    }

    /// Receive one PTCP frame, updating `ptcp_recv` and `rmid` per the
    /// receive discipline of spec.md §4.5.
    pub async fn recv(&mut self) -> Result<PtcpFrame, TransportError> {
        let data = self.socket.recv().await?;
        let frame = PtcpFrame::from_bytes(data)?;
        self.ptcp_recv += frame.body.len() as u64;
        self.rmid = frame.lmid;
        if self.debug {
            eprintln!("<<< PTCP {frame:?}");
        }
        Ok(frame)
    }

    /// Receive frames until one with a non-empty body arrives, discarding
    /// the empty (pure-ack) ones in between.
    pub async fn recv_nonempty(&mut self) -> Result<PtcpFrame, TransportError> {
        loop {
            let frame = self.recv().await?;
            if !frame.body.is_empty() {
                return Ok(frame);
            }
        }
    }

    /// Run the main/agent-leg handshake: hello, sign-request, ack. Returns
    /// the opaque `sign` blob the device leg will later submit.
    ///
    /// Per spec.md §4.5 step 1, the hello's reply is read once and
    /// discarded unconditionally (it may be empty); only the sign-request
    /// reply loops past empty bodies.
    pub async fn handshake_main(&mut self) -> Result<Vec<u8>, TransportError> {
        self.send(PTCP_HELLO_BODY.to_vec()).await?;
        let _ = self.recv().await?;

        let mut sign_request = vec![PTCP_OP_SIGN_REQUEST, 0x00, 0x00, 0x00];
        sign_request.extend_from_slice(&[0u8; 8]);
        self.send(sign_request).await?;

        let res = self.recv_nonempty().await?;
        let sign = res.body.get(12..).unwrap_or_default().to_vec();

        self.send_ack().await?;
        Ok(sign)
    }

    /// Run the device-leg handshake: hello (body must echo exactly),
    /// sign-submit (carrying `sign` from [`handshake_main`]), ready.
    pub async fn handshake_device(&mut self, sign: &[u8]) -> Result<(), TransportError> {
        self.send(PTCP_HELLO_BODY.to_vec()).await?;
        let res = self.recv().await?;
        if res.body != PTCP_HELLO_BODY.as_slice() {
            return Err(TransportError::HandshakeEchoMismatch {
                expected: PTCP_HELLO_BODY.to_vec(),
                actual: res.body,
            });
        }

        let mut sign_submit = vec![PTCP_OP_SIGN_SUBMIT, 0x00, 0x00, 0x00];
        sign_submit.extend_from_slice(&[0u8; 4]);
        sign_submit.extend_from_slice(&[0u8; 4]);
        sign_submit.extend_from_slice(sign);
        self.send(sign_submit).await?;

        let mut res = self.recv().await?;
        if res.body.is_empty() {
            res = self.recv().await?;
        }
        match res.op() {
            Some(op) if op == PTCP_OP_SIGN_ACK => {}
            other => {
                return Err(TransportError::UnexpectedLeadingByte {
                    expected: PTCP_OP_SIGN_ACK,
                    actual: other.unwrap_or(0),
                })
            }
        }

        let ready = vec![PTCP_OP_READY, 0x00, 0x00, 0x00, 0, 0, 0, 0, 0, 0, 0, 0];
        self.send(ready).await?;
        let res = self.recv().await?;
        if !res.body.is_empty() {
            return Err(TransportError::ExpectedEmptyBody {
                actual_len: res.body.len(),
            });
        }
        Ok(())
    }

    /// Open a tunnel for `realm_id`, targeting the device's RTSP port
    /// (spec.md §4.5 `0x11`). Blocks until the `0x12` acknowledgement.
    pub async fn open_tunnel(&mut self, realm_id: u32) -> Result<(), TransportError> {
        let mut body = vec![PTCP_OP_OPEN_TUNNEL, 0x00, 0x00, 0x00];
        body.extend_from_slice(&realm_id.to_be_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(&OPEN_TUNNEL_PORT.to_be_bytes());
        body.extend_from_slice(&OPEN_TUNNEL_IPV4);
        self.send(body).await?;

        let mut res = self.recv().await?;
        if res.body.is_empty() {
            res = self.recv().await?;
        }
        match res.op() {
            Some(op) if op == PTCP_OP_TUNNEL_CTRL => Ok(()),
            other => Err(TransportError::UnexpectedLeadingByte {
                expected: PTCP_OP_TUNNEL_CTRL,
                actual: other.unwrap_or(0),
            }),
        }
    }

    /// Close the tunnel for `realm_id`, draining and acking any `0x10`
    /// data frames that arrive before the `0x12`/`DISC` confirmation
    /// (spec.md §4.6 "Connection teardown").
    pub async fn close_tunnel(&mut self, realm_id: u32) -> Result<(), TransportError> {
        let mut body = vec![PTCP_OP_TUNNEL_CTRL, 0x00, 0x00, 0x00];
        body.extend_from_slice(&realm_id.to_be_bytes());
        body.extend_from_slice(&[0u8; 4]);
        body.extend_from_slice(TUNNEL_CLOSE_SUFFIX);
        self.send(body).await?;

        let mut res = self.recv().await?;
        while res.body.is_empty() || res.op() == Some(PTCP_OP_DATA) {
            if !res.body.is_empty() {
                self.send_ack().await?;
            }
            res = self.recv().await?;
        }
        match res.op() {
            Some(op) if op == PTCP_OP_TUNNEL_CTRL => {
                self.send_ack().await?;
                Ok(())
            }
            other => Err(TransportError::UnexpectedLeadingByte {
                expected: PTCP_OP_TUNNEL_CTRL,
                actual: other.unwrap_or(0),
            }),
        }
    }
}
