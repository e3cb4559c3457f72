//! Protocol constants fixed by the vendor directory/PTCP protocols.
//!
//! These values are required for wire compatibility with the camera's
//! directory service and device firmware. They MUST NOT be changed.

use std::time::Duration;

// =============================================================================
// DIRECTORY SERVICE (spec.md §6)
// =============================================================================

/// Vendor directory main server hostname.
pub const MAIN_SERVER: &str = "www.easy4ipcloud.com";

/// Vendor directory main server port.
pub const MAIN_PORT: u16 = 8800;

/// Anonymous-variant WSSE username (`dtype == 0`).
pub const ANON_USERNAME: &str = "P2PClient";

/// Anonymous-variant WSSE user key.
pub const ANON_USERKEY: &str = "YXQ3Mahe-5H-R1Z_";

/// Authenticated-variant WSSE username (`dtype > 0`).
pub const AUTH_USERNAME: &str = "cba1b29e32cb17aa46b8ff9e73c7f40b";

/// Authenticated-variant WSSE user key.
pub const AUTH_USERKEY: &str = "996103384cdf19179e19243e959bbf8b";

/// Authenticated-variant random salt, baked into the client identity and
/// mixed into the login-key derivation (spec.md §3 `SessionKey`).
pub const RANDSALT: &str = "5daf91fc5cfc1be8e081cfb08f792726";

// =============================================================================
// CRYPTOGRAPHY (spec.md §3, §4.2, §6)
// =============================================================================

/// Fixed 16-byte AES-OFB IV used for every `encrypt`/`decrypt` call.
pub const AES_OFB_IV: &[u8; 16] = b"2z52*lk9o6HRyJrf";

/// PBKDF2 iteration count for per-nonce session-key derivation.
pub const PBKDF2_ITERATIONS: u32 = 20_000;

/// PBKDF2 derived-key length in bytes (also the AES-256 key size).
pub const PBKDF2_KEY_LEN: usize = 32;

// =============================================================================
// PTCP FRAME LAYOUT (spec.md §3)
// =============================================================================

/// PTCP frame magic.
pub const PTCP_MAGIC: &[u8; 4] = b"PTCP";

/// Fixed PTCP header size (magic + 5 u32 fields).
pub const PTCP_HEADER_SIZE: usize = 24;

/// Fixed PTCPPayload header size (length_and_flag + realm + pad).
pub const PTCP_PAYLOAD_HEADER_SIZE: usize = 12;

/// High bit set on `PTCPPayload.length_and_flag` to mark a payload frame.
pub const PTCP_PAYLOAD_FLAG: u32 = 0x1000_0000;

/// Mask recovering the declared payload length from `length_and_flag`.
pub const PTCP_PAYLOAD_LENGTH_MASK: u32 = 0xFFFF;

/// Maximum payload length encodable in a `PTCPPayload` frame.
pub const PTCP_PAYLOAD_MAX_LEN: usize = 0xFFFF;

/// `pid` value used for the `0x00030100` hello frame.
pub const PTCP_PID_HELLO: u32 = 0x0002_FFFF;

/// Base subtracted by `ptcp_count` to form `pid` for ordinary data sends.
pub const PTCP_PID_DATA_BASE: u32 = 0x0000_FFFF;

/// The literal hello body, exempted from `ptcp_count` accounting.
pub const PTCP_HELLO_BODY: &[u8; 4] = &[0x00, 0x03, 0x01, 0x00];

// =============================================================================
// PTCP SUB-PROTOCOL BODY LEADING BYTES (spec.md §4.5)
// =============================================================================

/// Application payload frame (body is a `PTCPPayload`).
pub const PTCP_OP_DATA: u8 = 0x10;

/// Open-tunnel request.
pub const PTCP_OP_OPEN_TUNNEL: u8 = 0x11;

/// Tunnel control reply / close.
pub const PTCP_OP_TUNNEL_CTRL: u8 = 0x12;

/// Peer keepalive/poke.
pub const PTCP_OP_KEEPALIVE: u8 = 0x13;

/// Sign-request (main/agent leg handshake).
pub const PTCP_OP_SIGN_REQUEST: u8 = 0x17;

/// Sign-submit (device leg handshake).
pub const PTCP_OP_SIGN_SUBMIT: u8 = 0x19;

/// Sign-submit acknowledgement.
pub const PTCP_OP_SIGN_ACK: u8 = 0x1A;

/// Ready (device leg handshake, final step).
pub const PTCP_OP_READY: u8 = 0x1B;

/// Default RTSP port embedded in the open-tunnel frame (554, big-endian
/// zero-padded to 4 bytes per spec.md §4.5).
pub const OPEN_TUNNEL_PORT: u32 = 554;

/// Loopback IPv4 address embedded in the open-tunnel frame.
pub const OPEN_TUNNEL_IPV4: [u8; 4] = [0x7F, 0x00, 0x00, 0x01];

/// Trailing bytes appended to a tunnel-close (`0x12`) control frame.
pub const TUNNEL_CLOSE_SUFFIX: &[u8; 4] = b"DISC";

// =============================================================================
// HOLE-PUNCH ENGINE (spec.md §4.4)
// =============================================================================

/// Frame A prefix (client -> device public address).
pub const HOLEPUNCH_PREFIX_A: &[u8; 4] = &[0xFF, 0xFE, 0xFF, 0xE7];

/// Frame B prefix (client -> device local address).
pub const HOLEPUNCH_PREFIX_B: &[u8; 4] = &[0xFE, 0xFE, 0xFF, 0xE7];

/// Frame C prefix (authenticated-variant follow-up, fire-and-forget).
pub const HOLEPUNCH_PREFIX_C: &[u8; 4] = &[0xFE, 0xFE, 0xFF, 0xF3];

/// Selector bytes following the transaction id in frame A.
pub const HOLEPUNCH_SELECTOR_A: &[u8; 4] = &[0x7F, 0xD5, 0xFF, 0xF7];

/// Selector bytes following the transaction id in frames B and C.
pub const HOLEPUNCH_SELECTOR_B: &[u8; 4] = &[0x7F, 0xD6, 0xFF, 0xF7];

/// Fixed tail following the `aid` field in every hole-punch frame.
pub const HOLEPUNCH_TAIL: &[u8; 6] = &[0xFF, 0xFB, 0xFF, 0xF7, 0xFF, 0xFE];

/// Fixed tail replacing `eaddr` in frame C.
pub const HOLEPUNCH_FRAME_C_TAIL: &[u8; 6] = &[0xA8, 0x13, 0x3F, 0x57, 0xFE, 0x37];

/// Number of times frame C is (re)sent in the authenticated variant.
pub const HOLEPUNCH_FRAME_C_REPEATS: usize = 5;

/// Number of datagrams drained after sending frame C.
pub const HOLEPUNCH_DRAIN_COUNT: usize = 5;

/// Size of the random cookie in a hole-punch frame.
pub const HOLEPUNCH_COOKIE_SIZE: usize = 4;

/// Size of the transaction id in a hole-punch frame.
pub const HOLEPUNCH_TRANS_ID_SIZE: usize = 12;

/// Size of the (possibly complemented) identify blob.
pub const HOLEPUNCH_AID_SIZE: usize = 8;

/// Hole-punch receive timeout (spec.md §4.4 step 2, §5).
pub const HOLEPUNCH_TIMEOUT: Duration = Duration::from_secs(5);

// =============================================================================
// PROXY LOOP TIMING (spec.md §5)
// =============================================================================

/// Idle poll interval for the TCP listener in the proxy loop.
pub const PROXY_IDLE_POLL: Duration = Duration::from_millis(100);
