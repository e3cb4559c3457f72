//! UDP hole-punching handshake (spec.md §4.4).
//!
//! A fixed-shape binary datagram exchange that causes intermediate NATs to
//! admit subsequent traffic between this host and the device. Every byte
//! not derived from runtime randomness or the negotiated addresses is a
//! protocol constant pulled in from [`crate::core::constants`] — this
//! exchange only works because it reproduces the vendor firmware's framing
//! bit-for-bit.

use std::net::SocketAddr;

use rand::RngCore;
use tokio::time::timeout;

use crate::core::constants::{
    HOLEPUNCH_AID_SIZE, HOLEPUNCH_COOKIE_SIZE, HOLEPUNCH_DRAIN_COUNT, HOLEPUNCH_FRAME_C_REPEATS,
    HOLEPUNCH_FRAME_C_TAIL, HOLEPUNCH_PREFIX_A, HOLEPUNCH_PREFIX_B, HOLEPUNCH_PREFIX_C,
    HOLEPUNCH_SELECTOR_A, HOLEPUNCH_SELECTOR_B, HOLEPUNCH_TAIL, HOLEPUNCH_TIMEOUT,
    HOLEPUNCH_TRANS_ID_SIZE,
};
use crate::core::error::HolePunchError;
use crate::transport::socket::GatewaySocket;

/// Outcome of a successful hole-punch exchange.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HolePunchOutcome {
    /// The bytewise complement of the client's `aid`, as sent in frames B
    /// and C. Kept around for tracing; callers generally don't need it.
    pub complemented_aid: [u8; HOLEPUNCH_AID_SIZE],
}

/// Bytewise complement (`0xFF - b` for every byte), used for `aid` and the
/// embedded candidate address per spec.md §3.
fn complement(bytes: &[u8]) -> Vec<u8> {
    bytes.iter().map(|&b| 0xFF - b).collect()
}

/// Encode `port(2, be) || ipv4(4)`, bytewise-complemented, per spec.md §3's
/// `eaddr` field.
fn encode_eaddr(addr: SocketAddr) -> Result<[u8; 6], HolePunchError> {
    let v4 = match addr {
        SocketAddr::V4(v4) => v4,
        other => return Err(HolePunchError::UnsupportedAddress(other)),
    };
    let mut raw = [0u8; 6];
    raw[0..2].copy_from_slice(&v4.port().to_be_bytes());
    raw[2..6].copy_from_slice(&v4.ip().octets());
    let mut out = [0u8; 6];
    for (o, r) in out.iter_mut().zip(raw.iter()) {
        *o = 0xFF - r;
    }
    Ok(out)
}

/// Build one of the fixed-shape hole-punch frames: `prefix || cookie ||
/// trans_id || selector || aid || tail || suffix`.
fn build_frame(
    prefix: &[u8; 4],
    cookie: &[u8],
    trans_id: &[u8],
    selector: &[u8; 4],
    aid: &[u8],
    suffix: &[u8],
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + cookie.len() + trans_id.len() + 4 + aid.len() + 6 + 6);
    buf.extend_from_slice(prefix);
    buf.extend_from_slice(cookie);
    buf.extend_from_slice(trans_id);
    buf.extend_from_slice(selector);
    buf.extend_from_slice(aid);
    buf.extend_from_slice(HOLEPUNCH_TAIL);
    buf.extend_from_slice(suffix);
    buf
}

/// Run the UDP hole-punch exchange against `public_addr`, the device's
/// advertised public address.
///
/// `local_addr` is the device's advertised *local* address (already
/// decrypted by the caller when `authenticated` is set — spec.md §4.4 step
/// 4). `aid` is the 8-byte identify blob generated once per session.
///
/// `socket` must already be bound to the local port the directory
/// rendezvous negotiated; reusing that socket (rather than binding a new
/// one) is what lets the punched route line up with the NAT mapping the
/// directory's P2P channel request already taught upstream relays about.
pub async fn hole_punch(
    socket: &mut GatewaySocket,
    public_addr: SocketAddr,
    local_addr: SocketAddr,
    aid: [u8; HOLEPUNCH_AID_SIZE],
    authenticated: bool,
) -> Result<HolePunchOutcome, HolePunchError> {
    let mut rng = rand::thread_rng();
    let mut cookie = [0u8; HOLEPUNCH_COOKIE_SIZE];
    rng.fill_bytes(&mut cookie);
    let mut trans_id = [0u8; HOLEPUNCH_TRANS_ID_SIZE];
    rng.fill_bytes(&mut trans_id);

    // `aid` is complemented once, up front, and the complemented value is
    // reused for every frame in the exchange (A, B, and C). spec.md §4.4's
    // prose reads as if frame A carries the plain `aid` and only B/C carry
    // the complement, but the working reference complements `aid` before
    // frame A is ever built and never sends the plain value on the wire
    // (`main.py` complements `aid` ahead of the frame-A send). Since this
    // field has to match the device firmware bit-for-bit to be accepted,
    // the reference's behavior wins here over spec.md's prose, the same
    // way the rlid/llid resolution in DESIGN.md favors whichever source is
    // unambiguous about a bit-exact wire field.
    let complemented_aid = complement(&aid);

    let eaddr_public = encode_eaddr(public_addr)?;
    let frame_a = build_frame(
        HOLEPUNCH_PREFIX_A,
        &cookie,
        &trans_id,
        HOLEPUNCH_SELECTOR_A,
        &complemented_aid,
        &eaddr_public,
    );
    socket.send_to(&frame_a, public_addr).await?;

    let (len, rtrans_id) = {
        let (data, _from) = timeout(HOLEPUNCH_TIMEOUT, socket.recv_from())
            .await
            .map_err(|_| HolePunchError::Timeout)??;
        if data.len() < 20 {
            return Err(HolePunchError::Malformed {
                expected: 20,
                actual: data.len(),
            });
        }
        (data.len(), data[8..20].to_vec())
    };
    let _ = len;

    let eaddr_local = encode_eaddr(local_addr)?;
    let frame_b = build_frame(
        HOLEPUNCH_PREFIX_B,
        &cookie,
        &rtrans_id,
        HOLEPUNCH_SELECTOR_B,
        &complemented_aid,
        &eaddr_local,
    );
    socket.send_to(&frame_b, public_addr).await?;

    if authenticated {
        // One more datagram, drained but not otherwise inspected.
        let _ = socket.recv_from().await?;

        let frame_c = build_frame(
            HOLEPUNCH_PREFIX_C,
            &cookie,
            &rtrans_id,
            HOLEPUNCH_SELECTOR_B,
            &complemented_aid,
            HOLEPUNCH_FRAME_C_TAIL,
        );
        for _ in 0..HOLEPUNCH_FRAME_C_REPEATS {
            socket.send_to(&frame_c, public_addr).await?;
        }
    }

    // Fire-and-forget drain: these datagrams have no defined response
    // correlation in the reference implementation (spec.md §9).
    for _ in 0..HOLEPUNCH_DRAIN_COUNT {
        if timeout(HOLEPUNCH_TIMEOUT, socket.recv_from()).await.is_err() {
            break;
        }
    }

    let mut out_aid = [0u8; HOLEPUNCH_AID_SIZE];
    out_aid.copy_from_slice(&complemented_aid);
    Ok(HolePunchOutcome {
        complemented_aid: out_aid,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::Ipv4Addr;

    #[test]
    fn eaddr_xor_invariant_holds_for_any_address() {
        // spec.md §8 property 7.
        let addr = SocketAddr::new(Ipv4Addr::new(192, 168, 1, 42).into(), 12345);
        let eaddr = encode_eaddr(addr).unwrap();
        let mut raw = [0u8; 6];
        raw[0..2].copy_from_slice(&12345u16.to_be_bytes());
        raw[2..6].copy_from_slice(&[192, 168, 1, 42]);
        for i in 0..6 {
            assert_eq!(eaddr[i], 0xFF - raw[i]);
        }
    }

    #[test]
    fn eaddr_rejects_non_ipv4() {
        let addr: SocketAddr = "[::1]:1234".parse().unwrap();
        let err = encode_eaddr(addr).unwrap_err();
        assert!(matches!(err, HolePunchError::UnsupportedAddress(_)));
    }

    #[test]
    fn complement_is_involutive() {
        let aid = [0x01, 0x02, 0x03, 0x04, 0x05, 0x06, 0x07, 0x08];
        let once = complement(&aid);
        let twice = complement(&once);
        assert_eq!(twice, aid);
    }

    #[test]
    fn frame_a_has_expected_shape() {
        let cookie = [1, 2, 3, 4];
        let trans_id = [0u8; 12];
        let aid = [0xAAu8; 8];
        let eaddr = [0u8; 6];
        let frame = build_frame(
            HOLEPUNCH_PREFIX_A,
            &cookie,
            &trans_id,
            HOLEPUNCH_SELECTOR_A,
            &aid,
            &eaddr,
        );
        assert_eq!(frame.len(), 4 + 4 + 12 + 4 + 8 + 6 + 6);
        assert_eq!(&frame[0..4], HOLEPUNCH_PREFIX_A);
        assert_eq!(&frame[4..8], &cookie);
        assert_eq!(&frame[8..20], &trans_id);
        assert_eq!(&frame[20..24], HOLEPUNCH_SELECTOR_A);
        assert_eq!(&frame[24..32], &aid);
        assert_eq!(&frame[32..38], HOLEPUNCH_TAIL);
        assert_eq!(&frame[38..44], &eaddr);
    }

    #[ignore = "exercises the real 5s HOLEPUNCH_TIMEOUT, run explicitly"]
    #[tokio::test]
    async fn hole_punch_times_out_with_no_peer() {
        let mut socket = GatewaySocket::bind("127.0.0.1:0".parse().unwrap())
            .await
            .unwrap();
        let dead_addr: SocketAddr = "127.0.0.1:1".parse().unwrap();
        let aid = [0u8; 8];
        let result = hole_punch(&mut socket, dead_addr, dead_addr, aid, false).await;
        assert!(matches!(result, Err(HolePunchError::Timeout)));
    }
}
