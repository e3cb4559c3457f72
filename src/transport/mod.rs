//! PTCP transport: frame codec, UDP socket wrapper, hole-punch engine, and
//! the `PtcpLink` sequence accounting / handshake state machine (spec.md
//! §4.4, §4.5).

pub mod frame;
pub mod holepunch;
pub mod link;
pub mod socket;

pub use frame::{FrameKind, PtcpFrame, PtcpPayload};
pub use holepunch::{hole_punch, HolePunchOutcome};
pub use link::PtcpLink;
pub use socket::GatewaySocket;
