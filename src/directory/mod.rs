//! The `DHGET`/`DHPOST` text-protocol client against the vendor directory
//! service, WSSE request authentication, and XML response parsing.
//!
//! This is the rendezvous half of the system: every directory exchange is a
//! single UDP datagram out, a single UDP datagram back, shaped like an
//! HTTP/1.1 request/response pair but without keep-alive or chunking.

pub mod xml;

use std::collections::HashMap;
use std::net::SocketAddr;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use chrono::Utc;
use rand::Rng;
use sha1::{Digest, Sha1};

use crate::core::constants::{ANON_USERKEY, ANON_USERNAME, AUTH_USERKEY, AUTH_USERNAME};
use crate::core::error::{DirectoryError, DirectoryStatusError};
use crate::transport::socket::GatewaySocket;
use xml::XmlNode;

/// A `CSeq` generator shared by every `DirectoryClient` the orchestrator
/// opens during one run (spec.md §5 "the directory `cseq` counter is
/// process-wide mutable state owned by the orchestrator"). Deliberately
/// not a module-level `static`: spec.md §9 calls that out as the one
/// thing to redesign — the reference's global `CSEQ` becomes state the
/// orchestrator constructs once and hands to each client it opens, not
/// ambient mutable state every client reaches for independently.
#[derive(Clone, Default)]
pub struct CSeqCounter(Arc<AtomicU32>);

impl CSeqCounter {
    /// A fresh counter starting at 0, for the orchestrator to create once
    /// per run and share with every `DirectoryClient` it opens.
    pub fn new() -> Self {
        Self::default()
    }

    fn next(&self) -> u32 {
        self.0.fetch_add(1, Ordering::SeqCst) + 1
    }
}

/// The WSSE `UsernameToken` identity a request is signed with.
///
/// The directory accepts two fixed identities baked into the vendor
/// firmware: an anonymous one always available, and an authenticated one
/// used once the caller has supplied camera credentials (`dtype > 0`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WsseIdentity {
    /// WSSE `Username` field.
    pub username: &'static str,
    /// Secret mixed into the WSSE `PasswordDigest`.
    pub userkey: &'static str,
}

impl WsseIdentity {
    /// The identity used for unauthenticated (`dtype == 0`) requests.
    pub const fn anonymous() -> Self {
        WsseIdentity {
            username: ANON_USERNAME,
            userkey: ANON_USERKEY,
        }
    }

    /// The identity used once camera credentials are available
    /// (`dtype > 0`).
    pub const fn authenticated() -> Self {
        WsseIdentity {
            username: AUTH_USERNAME,
            userkey: AUTH_USERKEY,
        }
    }
}

/// A parsed directory response.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DirectoryResponse {
    /// HTTP-like version token from the status line (e.g. `"HTTP/1.1"`).
    pub version: String,
    /// Numeric status code.
    pub code: u16,
    /// Reason phrase from the status line.
    pub status: String,
    /// Response headers, in document order collapsed into a map.
    pub headers: HashMap<String, String>,
    /// Parsed XML body, if the response carried one.
    pub body: Option<XmlNode>,
}

impl DirectoryResponse {
    /// Convenience accessor for `self.body.text_of(tag)`. [`XmlNode::parse`]
    /// already unwraps the document down to the `<body>` element (its only
    /// root child), so `self.body` *is* the `<body>` node — reading `tag`
    /// straight off it is all every directory response used by this
    /// gateway needs.
    pub fn field(&self, tag: &str) -> Option<&str> {
        self.body.as_ref()?.text_of(tag)
    }
}

/// WSSE `PasswordDigest`: `base64(sha1(nonce || created || "DHP2P:" ||
/// username || ":" || userkey))`.
fn wsse_digest(nonce: u32, created: &str, identity: WsseIdentity) -> String {
    let mut hasher = Sha1::new();
    hasher.update(nonce.to_string().as_bytes());
    hasher.update(created.as_bytes());
    hasher.update(b"DHP2P:");
    hasher.update(identity.username.as_bytes());
    hasher.update(b":");
    hasher.update(identity.userkey.as_bytes());
    STANDARD.encode(hasher.finalize())
}

/// Render one CRLF-terminated request frame. Kept free of I/O so the wire
/// format can be tested against spec.md's literal golden vectors.
fn build_request(
    path: &str,
    body: &str,
    cseq: u32,
    auth: Option<(WsseIdentity, u32, &str)>,
) -> String {
    let method = if body.is_empty() { "DHGET" } else { "DHPOST" };
    let mut req = format!("{method} {path} HTTP/1.1\r\nCSeq: {cseq}\r\n");

    if let Some((identity, nonce, created)) = auth {
        let digest = wsse_digest(nonce, created, identity);
        req.push_str(&format!(
            "Authorization: WSSE profile=\"UsernameToken\"\r\nX-WSSE: UsernameToken Username=\"{}\", PasswordDigest=\"{}\", Nonce=\"{}\", Created=\"{}\"\r\n",
            identity.username, digest, nonce, created
        ));
    }

    if !body.is_empty() {
        req.push_str(&format!("Content-Type: \r\nContent-Length: {}\r\n", body.len()));
    }

    req.push_str("\r\n");
    req.push_str(body);
    req
}

/// Parse a complete `<status line>\r\n<headers>\r\n\r\n<body>` response.
fn parse_response(data: &str) -> Result<DirectoryResponse, DirectoryError> {
    let (header_block, body) = data
        .split_once("\r\n\r\n")
        .ok_or_else(|| DirectoryError::MalformedResponse("missing header/body separator".into()))?;

    let mut lines = header_block.split("\r\n");
    let status_line = lines
        .next()
        .ok_or_else(|| DirectoryError::MalformedResponse("empty response".into()))?;
    let mut parts = status_line.splitn(3, ' ');
    let version = parts
        .next()
        .ok_or_else(|| DirectoryError::MalformedResponse("missing status line version".into()))?
        .to_string();
    let code: u16 = parts
        .next()
        .ok_or_else(|| DirectoryError::MalformedResponse("missing status code".into()))?
        .parse()
        .map_err(|_| DirectoryError::MalformedResponse("non-numeric status code".into()))?;
    let status = parts.next().unwrap_or_default().to_string();

    let mut headers = HashMap::new();
    for line in lines {
        if let Some((k, v)) = line.split_once(": ") {
            headers.insert(k.to_string(), v.to_string());
        }
    }

    let body = if body.trim().is_empty() {
        None
    } else {
        Some(XmlNode::parse(body)?)
    };

    Ok(DirectoryResponse {
        version,
        code,
        status,
        headers,
        body,
    })
}

/// A directory-protocol UDP endpoint.
///
/// Unlike [`crate::transport::link::PtcpLink`], a `DirectoryClient`'s remote
/// endpoint is routinely redirected mid-session — the orchestrator opens one
/// socket against the main server and then repoints it at whatever relay or
/// agent address the main server hands back (spec.md §4.6).
pub struct DirectoryClient {
    socket: GatewaySocket,
    remote: SocketAddr,
    debug: bool,
    cseq: CSeqCounter,
}

impl DirectoryClient {
    /// Bind a fresh ephemeral UDP socket and point it at `remote`. `cseq`
    /// is the orchestrator's shared counter (spec.md §5); every directory
    /// socket opened during one run must share the same one, matching the
    /// reference's single monotonic `CSeq` sequence across sockets.
    pub async fn connect(
        remote: SocketAddr,
        debug: bool,
        cseq: CSeqCounter,
    ) -> std::io::Result<Self> {
        let socket = GatewaySocket::bind("0.0.0.0:0".parse().unwrap()).await?;
        Ok(DirectoryClient {
            socket,
            remote,
            debug,
            cseq,
        })
    }

    /// The local port this client is bound to (used as `lport` in P2P
    /// channel requests' `LocalAddr` field).
    pub fn local_addr(&self) -> std::io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Retarget subsequent requests at a different remote endpoint (e.g.
    /// switching from the main server to a relay's agent address).
    pub fn set_remote(&mut self, remote: SocketAddr) {
        self.remote = remote;
    }

    /// The endpoint requests currently go to.
    pub fn remote(&self) -> SocketAddr {
        self.remote
    }

    /// Send a request frame and, if `should_read` is set, block for and
    /// parse the reply. Status codes >= 400 are returned as `Ok` here;
    /// callers that want those surfaced as errors should go through
    /// [`DirectoryClient::read`] instead.
    pub async fn request_raw(
        &mut self,
        path: &str,
        body: &str,
        identity: Option<WsseIdentity>,
        should_read: bool,
    ) -> Result<Option<DirectoryResponse>, DirectoryError> {
        let cseq = self.cseq.next();

        let mut rng = rand::thread_rng();
        let nonce: u32 = rng.gen_range(0..(1u32 << 31));
        let created = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();

        let auth = identity.map(|id| (id, nonce, created.as_str()));
        let req = build_request(path, body, cseq, auth);

        if self.debug {
            eprintln!(":{} >>> {}", self.local_addr()?.port(), self.remote);
            eprintln!("{}", req.replace("\r\n", "\n"));
        }

        self.socket.send_to(req.as_bytes(), self.remote).await?;

        if !should_read {
            return Ok(None);
        }
        self.read_raw().await.map(Some)
    }

    /// Convenience wrapper over [`DirectoryClient::request_raw`] that turns
    /// a >= 400 status into `Err(DirectoryError::Status)`.
    pub async fn request(
        &mut self,
        path: &str,
        body: &str,
        identity: Option<WsseIdentity>,
    ) -> Result<DirectoryResponse, DirectoryError> {
        let res = self
            .request_raw(path, body, identity, true)
            .await?
            .expect("should_read is always true here");
        Self::reject_error_status(res)
    }

    /// Read and parse one reply datagram without sending anything first —
    /// for replies delivered asynchronously on a socket another request
    /// already pointed at the right peer (spec.md §4.3's `read(endpoint)`).
    pub async fn read_raw(&mut self) -> Result<DirectoryResponse, DirectoryError> {
        let local_port = self.local_addr()?.port();
        let (data, _from) = self.socket.recv_from().await?;
        let text = std::str::from_utf8(data)
            .map_err(|_| DirectoryError::MalformedResponse("response is not ASCII/UTF-8".into()))?
            .to_string();

        if self.debug {
            eprintln!(":{} <<< {}", local_port, self.remote);
            eprintln!("{}", text.replace("\r\n", "\n"));
        }

        parse_response(&text)
    }

    /// Like [`DirectoryClient::read_raw`], but turns a >= 400 status into
    /// an error the way the reference implementation's `read()` does by
    /// default.
    pub async fn read(&mut self) -> Result<DirectoryResponse, DirectoryError> {
        let res = self.read_raw().await?;
        Self::reject_error_status(res)
    }

    fn reject_error_status(res: DirectoryResponse) -> Result<DirectoryResponse, DirectoryError> {
        if res.code >= 400 {
            Err(DirectoryError::Status(DirectoryStatusError {
                code: res.code,
                status: res.status,
            }))
        } else {
            Ok(res)
        }
    }

    /// Consume this client, connecting its socket to `remote` and handing
    /// back the bare [`GatewaySocket`] for a caller that needs to address
    /// more than one peer from the same bound port (spec.md §4.6 S11's
    /// hole-punch, which sends to the device's public address before the
    /// PTCP link is connected to it).
    pub fn into_socket(self) -> GatewaySocket {
        self.socket
    }

    /// Consume this client, connect its socket to its current remote
    /// endpoint, and hand back a [`crate::transport::link::PtcpLink`] over
    /// it. The main/agent leg's directory socket and its PTCP socket are
    /// the same UDP socket (spec.md §4.6 S9-S10): the agent starts
    /// replying with PTCP frames on the socket the last directory request
    /// was sent from, so there's no second bind to do here.
    pub async fn into_link(
        self,
        debug: bool,
    ) -> std::io::Result<crate::transport::link::PtcpLink> {
        self.socket.connect(self.remote).await?;
        Ok(crate::transport::link::PtcpLink::new(self.socket, debug))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::UdpSocket;

    #[test]
    fn golden_vector_s5_unauthenticated_get() {
        let req = build_request("/probe/p2psrv", "", 5, None);
        assert_eq!(req, "DHGET /probe/p2psrv HTTP/1.1\r\nCSeq: 5\r\n\r\n");
    }

    #[test]
    fn authenticated_request_includes_wsse_block() {
        let identity = WsseIdentity::anonymous();
        let req = build_request(
            "/device/ABC123/p2p-channel",
            "<body><Identify>aa bb</Identify></body>",
            1,
            Some((identity, 42, "2024-01-01T00:00:00Z")),
        );
        assert!(req.starts_with("DHPOST /device/ABC123/p2p-channel HTTP/1.1\r\nCSeq: 1\r\n"));
        assert!(req.contains("Authorization: WSSE profile=\"UsernameToken\"\r\n"));
        assert!(req.contains("Username=\"P2PClient\""));
        assert!(req.contains("Nonce=\"42\""));
        assert!(req.contains("Created=\"2024-01-01T00:00:00Z\""));
        assert!(req.contains("Content-Length: 39\r\n"));
        assert!(req.ends_with("<body><Identify>aa bb</Identify></body>"));
    }

    #[test]
    fn wsse_digest_is_deterministic_and_base64() {
        let identity = WsseIdentity::anonymous();
        let a = wsse_digest(1, "2024-01-01T00:00:00Z", identity);
        let b = wsse_digest(1, "2024-01-01T00:00:00Z", identity);
        assert_eq!(a, b);
        assert!(STANDARD.decode(&a).is_ok());
        let c = wsse_digest(2, "2024-01-01T00:00:00Z", identity);
        assert_ne!(a, c);
    }

    #[test]
    fn parses_successful_response_with_body() {
        let raw = "HTTP/1.1 200 OK\r\nCSeq: 1\r\n\r\n<body><US>1.2.3.4:8800</US></body>";
        let res = parse_response(raw).unwrap();
        assert_eq!(res.version, "HTTP/1.1");
        assert_eq!(res.code, 200);
        assert_eq!(res.status, "OK");
        assert_eq!(res.headers.get("CSeq").map(String::as_str), Some("1"));
        assert_eq!(res.field("US"), Some("1.2.3.4:8800"));
    }

    #[test]
    fn parses_response_with_no_body() {
        let raw = "HTTP/1.1 200 OK\r\nCSeq: 1\r\n\r\n";
        let res = parse_response(raw).unwrap();
        assert!(res.body.is_none());
    }

    #[test]
    fn rejects_response_missing_header_body_separator() {
        let raw = "HTTP/1.1 200 OK\r\nCSeq: 1";
        assert!(matches!(
            parse_response(raw),
            Err(DirectoryError::MalformedResponse(_))
        ));
    }

    #[tokio::test]
    async fn request_raw_sends_wire_bytes_peer_can_parse() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut client = DirectoryClient::connect(peer_addr, false, CSeqCounter::new())
            .await
            .unwrap();
        client
            .request_raw("/probe/p2psrv", "", None, false)
            .await
            .unwrap();

        let mut buf = [0u8; 256];
        let (n, _) = peer.recv_from(&mut buf).await.unwrap();
        let text = std::str::from_utf8(&buf[..n]).unwrap();
        assert!(text.starts_with("DHGET /probe/p2psrv HTTP/1.1\r\n"));
        assert!(text.ends_with("\r\n\r\n"));
    }

    #[tokio::test]
    async fn request_roundtrips_through_a_mock_directory() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();

        let mut client = DirectoryClient::connect(peer_addr, false, CSeqCounter::new())
            .await
            .unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (n, from) = peer.recv_from(&mut buf).await.unwrap();
            assert!(std::str::from_utf8(&buf[..n])
                .unwrap()
                .starts_with("DHGET /online/relay HTTP/1.1\r\n"));
            let reply = b"HTTP/1.1 200 OK\r\nCSeq: 1\r\n\r\n<body><Address>9.9.9.9:7000</Address></body>";
            peer.send_to(reply, from).await.unwrap();
        });

        let res = client.request("/online/relay", "", None).await.unwrap();
        assert_eq!(res.code, 200);
        assert_eq!(res.field("Address"), Some("9.9.9.9:7000"));

        responder.await.unwrap();
    }

    #[tokio::test]
    async fn error_status_surfaces_as_err() {
        let peer = UdpSocket::bind("127.0.0.1:0").await.unwrap();
        let peer_addr = peer.local_addr().unwrap();
        let mut client = DirectoryClient::connect(peer_addr, false, CSeqCounter::new())
            .await
            .unwrap();

        let responder = tokio::spawn(async move {
            let mut buf = [0u8; 1024];
            let (_n, from) = peer.recv_from(&mut buf).await.unwrap();
            let reply = b"HTTP/1.1 403 Forbidden\r\nCSeq: 1\r\n\r\n";
            peer.send_to(reply, from).await.unwrap();
        });

        let err = client
            .request("/device/ABC123/p2p-channel", "", None)
            .await
            .unwrap_err();
        match err {
            DirectoryError::Status(status) => assert_eq!(status.code, 403),
            other => panic!("expected Status error, got {other:?}"),
        }

        responder.await.unwrap();
    }
}
