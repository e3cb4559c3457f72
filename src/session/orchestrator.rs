//! S0-S12 of the orchestrator state machine (spec.md §4.6): directory
//! rendezvous, the device P2P channel and relay channel exchanges, the
//! main/agent-leg and device-leg PTCP handshakes, and the hand-off into
//! the hole-punch engine. S13 (the proxy loop) lives in
//! [`crate::session::tunnel`].

use std::net::SocketAddr;
use std::time::{SystemTime, UNIX_EPOCH};

use chrono::Utc;
use rand::RngCore;
use tokio::net::{lookup_host, TcpListener};

use crate::core::constants::{MAIN_PORT, MAIN_SERVER, RANDSALT};
use crate::core::error::{DirectoryError, DirectoryStatusError, GatewayError};
use crate::crypto;
use crate::directory::{CSeqCounter, DirectoryClient, DirectoryResponse, WsseIdentity};
use crate::session::tunnel;
use crate::transport::{hole_punch, PtcpLink};

/// Everything the orchestrator needs to rendezvous with and tunnel a
/// single camera (spec.md §6: CLI flags `serial`, `-u/--username`,
/// `-p/--password`, `-t/--type`, `-d/--debug`).
#[derive(Clone)]
pub struct GatewayConfig {
    /// The device's vendor-assigned serial number.
    pub serial: String,
    /// `0` for the anonymous/plain variant, `>0` for the authenticated
    /// one. Only `0` and `1` are meaningful per spec.md §6's `{0,1}`.
    pub dtype: u8,
    /// Camera login username, required when `dtype > 0`.
    pub username: Option<String>,
    /// Camera login password, required when `dtype > 0`.
    pub password: Option<String>,
    /// Verbose frame/request tracing to stderr.
    pub debug: bool,
    /// Local address the RTSP-shaped TCP listener binds to (spec.md §6:
    /// `0.0.0.0:554`).
    pub listen_addr: SocketAddr,
}

impl std::fmt::Debug for GatewayConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("GatewayConfig")
            .field("serial", &self.serial)
            .field("dtype", &self.dtype)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "[REDACTED]"))
            .field("debug", &self.debug)
            .field("listen_addr", &self.listen_addr)
            .finish()
    }
}

impl GatewayConfig {
    /// A config for `serial` with every other field at its spec.md
    /// default (`dtype = 0`, no credentials, debug off, listening on
    /// `0.0.0.0:554`).
    pub fn new(serial: impl Into<String>) -> Self {
        Self {
            serial: serial.into(),
            dtype: 0,
            username: None,
            password: None,
            debug: false,
            listen_addr: "0.0.0.0:554".parse().unwrap(),
        }
    }

    fn require_credentials(&self) -> Result<(&str, &str), GatewayError> {
        match (self.username.as_deref(), self.password.as_deref()) {
            (Some(u), Some(p)) => Ok((u, p)),
            _ => Err(GatewayError::Config(
                "username and password are required when --type > 0".into(),
            )),
        }
    }
}

/// Run the gateway: rendezvous against the vendor directory, hole-punch
/// the device, complete the PTCP handshake, and serve the loopback RTSP
/// listener forever (spec.md §4.6 S0-S13).
pub async fn run(config: GatewayConfig) -> Result<(), GatewayError> {
    if config.dtype > 0 {
        config.require_credentials()?;
    }
    let identity = if config.dtype > 0 {
        WsseIdentity::authenticated()
    } else {
        WsseIdentity::anonymous()
    };

    let listener = TcpListener::bind(config.listen_addr).await?;
    eprintln!("Listening on {}", config.listen_addr);

    let main_addr = resolve(&format!("{MAIN_SERVER}:{MAIN_PORT}")).await?;

    // One CSeq sequence shared by every directory socket this run opens
    // (spec.md §5, §9 — orchestrator-owned, not a module-level global).
    let cseq = CSeqCounter::new();

    // S0: probe/p2psrv.
    let mut main_client = DirectoryClient::connect(main_addr, config.debug, cseq.clone()).await?;
    main_client
        .request("/probe/p2psrv", "", Some(identity))
        .await?;

    // S1: lookup the P2P server fronting this serial.
    let res = main_client
        .request(
            &format!("/online/p2psrv/{}", config.serial),
            "",
            Some(identity),
        )
        .await?;
    let p2psrv_addr = resolve_field(&res, "US").await?;

    // S2: probe the device through that P2P server.
    {
        let mut p2psrv_client =
            DirectoryClient::connect(p2psrv_addr, config.debug, cseq.clone()).await?;
        p2psrv_client
            .request(
                &format!("/probe/device/{}", config.serial),
                "",
                Some(identity),
            )
            .await?;
    }

    // S3: lookup a relay.
    let res = main_client
        .request("/online/relay", "", Some(identity))
        .await?;
    let relay_addr = resolve_field(&res, "Address").await?;

    // S4: open a device P2P channel. `device_client`'s socket is reused
    // unchanged for the rest of this device's lifetime: first as the
    // directory socket awaiting this channel's async reply (S7), then as
    // the raw hole-punch socket (S11), then as the device-leg PTCP link
    // (S12-S13) — reusing one bound port end to end is what keeps this
    // side's NAT mapping stable across all three roles.
    let mut device_client = DirectoryClient::connect(main_addr, config.debug, cseq).await?;
    let local_port = device_client.local_addr()?.port();

    let mut aid = [0u8; 8];
    rand::thread_rng().fill_bytes(&mut aid);

    let local_addr_plain = format!("127.0.0.1:{local_port}");
    let mut login_key: Option<Vec<u8>> = None;
    let (ipaddr_xml, p2p_auth_xml) = if config.dtype > 0 {
        let (username, password) = config.require_credentials()?;
        let key = crypto::login_key(username, password, RANDSALT);
        let nonce = session_nonce();
        let session_key = crypto::session_key(&key, nonce);
        let ciphertext = crypto::encrypt(&session_key, local_addr_plain.as_bytes());
        let auth = device_auth_block(username, &key, nonce, ciphertext.as_bytes());
        login_key = Some(key);
        (
            format!("<IpEncrptV2>true</IpEncrptV2><LocalAddr>{ciphertext}</LocalAddr>"),
            auth,
        )
    } else {
        (
            format!("<IpEncrpt>true</IpEncrpt><LocalAddr>{local_addr_plain}</LocalAddr>"),
            String::new(),
        )
    };

    let p2p_body = format!(
        "<body>{p2p_auth_xml}<Identify>{identify}</Identify>{ipaddr_xml}<version>5.0.0</version></body>",
        identify = hex_with_spaces(&aid),
    );
    device_client
        .request_raw(
            &format!("/device/{}/p2p-channel", config.serial),
            &p2p_body,
            Some(identity),
            false,
        )
        .await?;

    // S5: a relay agent token.
    main_client.set_remote(relay_addr);
    let res = main_client
        .request("/relay/agent", "", Some(identity))
        .await?;
    let token = res
        .field("Token")
        .ok_or_else(|| GatewayError::Config("relay/agent response missing <Token>".into()))?
        .to_string();
    let agent_addr = resolve_field(&res, "Agent").await?;

    // S6: start the relay.
    main_client.set_remote(agent_addr);
    main_client
        .request(
            &format!("/relay/start/{token}"),
            "<body><Client>:0</Client></body>",
            Some(identity),
        )
        .await?;

    // S7: await the device's channel reply (may arrive provisional first).
    let mut res = device_client.read_raw().await?;
    if res.code < 200 {
        res = device_client.read_raw().await?;
    }
    if res.code >= 400 {
        if config.dtype == 0 && res.code == 403 {
            eprintln!("Error: {}", res.status);
            eprintln!("Device requires authentication when creating a P2P channel.");
            eprintln!("Try again with:");
            eprintln!(
                "  gateway-cli --type 1 --username <username> --password <password> {}",
                config.serial
            );
        }
        return Err(DirectoryError::Status(DirectoryStatusError {
            code: res.code,
            status: res.status,
        })
        .into());
    }

    let device_local_raw = res
        .field("LocalAddr")
        .ok_or_else(|| GatewayError::Config("p2p-channel response missing <LocalAddr>".into()))?
        .to_string();
    let mut relay_nonce = 0u64;
    let device_local_addr = if config.dtype > 0 {
        let key = login_key
            .as_ref()
            .expect("login_key is set whenever dtype > 0");
        let nonce_str = res
            .field("Nonce")
            .ok_or_else(|| GatewayError::Config("p2p-channel response missing <Nonce>".into()))?;
        relay_nonce = nonce_str
            .parse()
            .map_err(|_| GatewayError::Config(format!("non-numeric <Nonce>: {nonce_str}")))?;
        let session_key = crypto::session_key(key, relay_nonce);
        let decrypted = crypto::decrypt(&session_key, &device_local_raw)?;
        let decrypted = String::from_utf8(decrypted)
            .map_err(|_| GatewayError::Config("decrypted LocalAddr is not UTF-8".into()))?;
        resolve(&decrypted).await?
    } else {
        resolve(&device_local_raw).await?
    };
    let device_pub_addr = resolve_field(&res, "PubAddr").await?;

    // Restore the main/agent socket's request target to the main server
    // before publishing the relay channel (spec.md §4.6 S8).
    main_client.set_remote(main_addr);

    let relay_auth_xml = if config.dtype > 0 {
        let key = login_key
            .as_ref()
            .expect("login_key is set whenever dtype > 0");
        let (username, _) = config.require_credentials()?;
        device_auth_block(username, key, relay_nonce, b"")
    } else {
        String::new()
    };

    // S8: publish the relay channel so the agent knows where to find us.
    let relay_body = format!(
        "<body>{relay_auth_xml}<agentAddr>{}:{}</agentAddr></body>",
        agent_addr.ip(),
        agent_addr.port(),
    );
    main_client
        .request_raw(
            &format!("/device/{}/relay-channel", config.serial),
            &relay_body,
            Some(identity),
            false,
        )
        .await?;

    // S9: await the agent's ack (blocking; a >= 400 status is fatal).
    main_client.set_remote(agent_addr);
    main_client.read().await?;

    // S10: main/agent-leg PTCP handshake, yielding the `sign` blob the
    // device leg will submit in S12.
    let mut main_link = main_client.into_link(config.debug).await?;
    let sign = main_link.handshake_main().await?;
    drop(main_link);

    // S11: hole-punch the device directly.
    let mut device_socket = device_client.into_socket();
    hole_punch(
        &mut device_socket,
        device_pub_addr,
        device_local_addr,
        aid,
        config.dtype > 0,
    )
    .await?;
    device_socket.connect(device_pub_addr).await?;
    let mut device_link = PtcpLink::new(device_socket, config.debug);

    // S12: device-leg PTCP handshake.
    device_link.handshake_device(&sign).await?;

    eprintln!("Ready to connect");
    eprintln!("Test with: rtsp://127.0.0.1:554/cam/realmonitor?channel=1&subtype=0");

    // S13: serve the proxy loop forever.
    tunnel::run_proxy_loop(listener, device_link, config.debug).await
}

/// Resolve a `host:port` string (DNS name or literal IP) to a socket
/// address, using whichever the OS resolver returns first.
async fn resolve(hostport: &str) -> Result<SocketAddr, GatewayError> {
    lookup_host(hostport)
        .await?
        .next()
        .ok_or_else(|| GatewayError::Config(format!("no addresses resolved for {hostport}")))
}

/// Resolve the `host:port` text carried in a directory response's `<tag>`
/// field.
async fn resolve_field(res: &DirectoryResponse, tag: &str) -> Result<SocketAddr, GatewayError> {
    let hostport = res
        .field(tag)
        .ok_or_else(|| GatewayError::Config(format!("response missing <{tag}>")))?;
    resolve(hostport).await
}

/// Render the 8-byte `aid` as lowercase, unpadded, space-separated hex —
/// the exact shape the reference implementation's `' '.join(f'{b:x}' for
/// b in aid)` produces (no leading zero on nibbles below `0x10`).
fn hex_with_spaces(bytes: &[u8]) -> String {
    bytes
        .iter()
        .map(|b| format!("{b:x}"))
        .collect::<Vec<_>>()
        .join(" ")
}

/// Build the `DeviceAuthBlock` XML fragment of spec.md §3:
/// `<CreateDate><DevAuth><Nonce><RandSalt><UserName>`, where `DevAuth` is
/// the HMAC-SHA256 signature over `nonce || unix_seconds || payload`.
fn device_auth_block(username: &str, login_key: &[u8], nonce: u64, payload: &[u8]) -> String {
    let unix_seconds = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_secs();
    let dev_auth = crypto::dev_auth(login_key, nonce, unix_seconds, payload);
    let created = Utc::now().format("%Y-%m-%dT%H:%M:%SZ").to_string();
    format!(
        "<CreateDate>{created}</CreateDate><DevAuth>{dev_auth}</DevAuth><Nonce>{nonce}</Nonce><RandSalt>{RANDSALT}</RandSalt><UserName>{username}</UserName>"
    )
}

/// Generate the per-session nonce mixed into the PBKDF2 salt and the
/// `DevAuth` HMAC message (spec.md §3 `SessionKey`). The reference's
/// `get_nonce()` body wasn't recoverable from the retrieval pack; spec.md
/// only constrains it to "ASCII decimal of nonce", so any sufficiently
/// random, non-repeating value satisfies the wire contract. A full 64-bit
/// value is used rather than matching the WSSE nonce's 31-bit range,
/// since nothing here requires them to share a width.
fn session_nonce() -> u64 {
    rand::thread_rng().next_u64()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hex_with_spaces_matches_reference_formatting() {
        assert_eq!(hex_with_spaces(&[0x00, 0x0a, 0xff, 0x10]), "0 a ff 10");
    }

    #[test]
    fn device_auth_block_contains_expected_tags_in_order() {
        let key = crypto::login_key("admin", "hunter2", RANDSALT);
        let block = device_auth_block("admin", &key, 42, b"127.0.0.1:1234");
        let create_at = block.find("<CreateDate>").unwrap();
        let auth_at = block.find("<DevAuth>").unwrap();
        let nonce_at = block.find("<Nonce>42</Nonce>").unwrap();
        let salt_at = block
            .find(&format!("<RandSalt>{RANDSALT}</RandSalt>"))
            .unwrap();
        let user_at = block.find("<UserName>admin</UserName>").unwrap();
        assert!(create_at < auth_at);
        assert!(auth_at < nonce_at);
        assert!(nonce_at < salt_at);
        assert!(salt_at < user_at);
    }

    #[test]
    fn config_requires_credentials_when_authenticated() {
        let mut config = GatewayConfig::new("ABC123");
        config.dtype = 1;
        assert!(config.require_credentials().is_err());
        config.username = Some("u".into());
        config.password = Some("p".into());
        assert!(config.require_credentials().is_ok());
    }

    #[test]
    fn debug_impl_redacts_password() {
        let mut config = GatewayConfig::new("ABC123");
        config.password = Some("super-secret".into());
        let rendered = format!("{config:?}");
        assert!(!rendered.contains("super-secret"));
        assert!(rendered.contains("REDACTED"));
    }
}
