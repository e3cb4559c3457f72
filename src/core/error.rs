//! Error types for the PTCP gateway.

use thiserror::Error;

/// Errors from the PTCP/PTCPPayload codec layer.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// Buffer shorter than the frame's fixed header.
    #[error("frame too short: expected at least {expected} bytes, got {actual}")]
    TooShort {
        /// Minimum required length.
        expected: usize,
        /// Actual buffer length.
        actual: usize,
    },

    /// PTCP magic prefix did not match `"PTCP"`.
    #[error("invalid PTCP magic")]
    InvalidMagic,

    /// A `PTCPPayload` frame's reserved `pad` field was nonzero.
    #[error("non-zero pad field in PTCPPayload frame")]
    InvalidPad,

    /// Declared payload length did not match the number of remaining bytes.
    #[error("length mismatch: header declared {declared}, body has {actual}")]
    LengthMismatch {
        /// Length declared in the frame header.
        declared: usize,
        /// Actual number of remaining bytes.
        actual: usize,
    },
}

/// Errors from the crypto layer.
#[derive(Debug, Error)]
pub enum CryptoError {
    /// The ciphertext was not valid base64.
    #[error("invalid base64 ciphertext: {0}")]
    InvalidBase64(String),

    /// The plaintext was not valid UTF-8 after decryption.
    #[error("decrypted plaintext is not valid UTF-8")]
    InvalidUtf8,

    /// PBKDF2 key derivation failed (should not happen with fixed-size
    /// output, kept for fallibility at the call site).
    #[error("key derivation failed")]
    KeyDerivationFailed,
}

/// An error response from the directory service (status code >= 400).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
#[error("directory error {code}: {status}")]
pub struct DirectoryStatusError {
    /// Numeric HTTP-like status code.
    pub code: u16,
    /// Reason phrase from the status line.
    pub status: String,
}

/// Errors from the directory client.
#[derive(Debug, Error)]
pub enum DirectoryError {
    /// The directory returned a status code >= 400.
    #[error(transparent)]
    Status(#[from] DirectoryStatusError),

    /// The response could not be parsed as the expected text protocol.
    #[error("malformed directory response: {0}")]
    MalformedResponse(String),

    /// No response arrived within the configured timeout.
    #[error("directory request timed out")]
    Timeout,

    /// Underlying socket I/O error.
    #[error("directory I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the UDP hole-punch engine.
#[derive(Debug, Error)]
pub enum HolePunchError {
    /// No reply arrived within the 5 second window (spec.md §4.4 step 2).
    ///
    /// Relay-mode fallback is acknowledged by the specification but not
    /// implemented; this message says so explicitly rather than guessing
    /// at a relay design.
    #[error("hole punch timed out waiting for the device; relay mode would be required here, but relay-mode fallback is not implemented")]
    Timeout,

    /// A peer datagram was too short to carry the fields the exchange
    /// step requires (e.g. the transaction id at bytes `[8..20]`).
    #[error("malformed hole-punch datagram: expected at least {expected} bytes, got {actual}")]
    Malformed {
        /// Minimum required length.
        expected: usize,
        /// Actual datagram length.
        actual: usize,
    },

    /// The supplied endpoint was not an IPv4 address; the hole-punch
    /// datagram layout only has room for a 4-byte address.
    #[error("hole punch requires an IPv4 endpoint, got {0}")]
    UnsupportedAddress(std::net::SocketAddr),

    /// Underlying socket I/O error.
    #[error("hole punch I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Errors from the PTCP transport layer (link-level protocol violations).
#[derive(Debug, Error)]
pub enum TransportError {
    /// Frame codec error.
    #[error("frame error: {0}")]
    Frame(#[from] FrameError),

    /// A PTCP body's leading byte did not match what the handshake step
    /// asserted it would be (spec.md §7 `TransportProtocolError`).
    #[error("unexpected PTCP body leading byte: expected {expected:#04x}, got {actual:#04x}")]
    UnexpectedLeadingByte {
        /// The byte the protocol step required.
        expected: u8,
        /// The byte actually observed.
        actual: u8,
    },

    /// A handshake step required the body to echo a fixed literal exactly
    /// (the device-leg hello reply) and it did not.
    #[error("handshake body mismatch: expected {expected:02x?}, got {actual:02x?}")]
    HandshakeEchoMismatch {
        /// The literal body the protocol step required.
        expected: Vec<u8>,
        /// The body actually observed.
        actual: Vec<u8>,
    },

    /// A handshake step required an empty body (the `ready` acknowledgement)
    /// and the body was non-empty.
    #[error("expected empty PTCP body, got {actual_len} bytes")]
    ExpectedEmptyBody {
        /// Length of the unexpectedly non-empty body.
        actual_len: usize,
    },

    /// The peer closed/reset while a response was still expected.
    #[error("peer connection reset")]
    PeerReset,

    /// Underlying socket I/O error.
    #[error("transport I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Top-level gateway error, returned by the orchestrator's public entry
/// point.
#[derive(Debug, Error)]
pub enum GatewayError {
    /// Directory rendezvous failed.
    #[error("directory error: {0}")]
    Directory(#[from] DirectoryError),

    /// Hole-punch failed.
    #[error("hole punch error: {0}")]
    HolePunch(#[from] HolePunchError),

    /// PTCP transport error.
    #[error("transport error: {0}")]
    Transport(#[from] TransportError),

    /// Crypto layer error.
    #[error("crypto error: {0}")]
    Crypto(#[from] CryptoError),

    /// Invalid configuration (e.g. missing credentials for an
    /// authenticated session).
    #[error("configuration error: {0}")]
    Config(String),

    /// Underlying I/O error not otherwise classified.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
