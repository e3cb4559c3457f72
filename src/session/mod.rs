//! The session orchestrator state machine and the proxy event loop.
//!
//! This is the top-level composition of every other layer: directory
//! rendezvous, the hole-punch engine, and the PTCP transport, driving the
//! S0-S13 sequence of spec.md §4.6 and then handing off to the
//! single-tunnel proxy loop.

pub mod orchestrator;
pub mod tunnel;

pub use orchestrator::{run, GatewayConfig};
