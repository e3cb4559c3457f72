//! Login-key derivation, per-session key derivation, payload cipher, and
//! device-auth signing for the directory/device protocols.
//!
//! The primitives here are fixed by the camera's firmware: MD5 for the
//! login key, PBKDF2-HMAC-SHA256 for the per-nonce session key, AES-OFB for
//! the payload cipher, and HMAC-SHA256 for the device-auth signature. None
//! of these are negotiable; they exist to match the wire protocol, not to
//! provide strong security guarantees.

use crate::core::constants::{AES_OFB_IV, PBKDF2_ITERATIONS, PBKDF2_KEY_LEN};
use crate::core::error::CryptoError;
use aes::Aes256;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use cipher::{KeyIvInit, StreamCipher};
use hmac::{Hmac, Mac};
use md5::{Digest, Md5};
use ofb::Ofb;
use sha2::Sha256;

type Aes256Ofb = Ofb<Aes256>;
type HmacSha256 = Hmac<Sha256>;

/// Derive the MD5 login key from a username/password pair and the
/// protocol's random salt.
///
/// Wire formula: `md5(username || ":Login to " || randsalt || ":" ||
/// password)`, rendered as uppercase hex ASCII bytes.
pub fn login_key(username: &str, password: &str, randsalt: &str) -> Vec<u8> {
    let mut hasher = Md5::new();
    hasher.update(username.as_bytes());
    hasher.update(b":Login to ");
    hasher.update(randsalt.as_bytes());
    hasher.update(b":");
    hasher.update(password.as_bytes());
    let digest = hasher.finalize();
    format!("{:X}", digest).into_bytes()
}

/// Derive the per-session AES key from the login key and a per-session
/// nonce via PBKDF2-HMAC-SHA256.
///
/// Wire formula: `PBKDF2(login_key, salt=ascii(nonce), iterations=20000,
/// dklen=32, prf=HMAC-SHA256)`.
pub fn session_key(login_key: &[u8], nonce: u64) -> [u8; PBKDF2_KEY_LEN] {
    let salt = nonce.to_string();
    let mut out = [0u8; PBKDF2_KEY_LEN];
    pbkdf2::pbkdf2_hmac::<Sha256>(login_key, salt.as_bytes(), PBKDF2_ITERATIONS, &mut out);
    out
}

/// Encrypt `plaintext` under `key` with the fixed AES-OFB IV, returning
/// standard-alphabet base64.
pub fn encrypt(key: &[u8; PBKDF2_KEY_LEN], plaintext: &[u8]) -> String {
    let mut buf = plaintext.to_vec();
    let mut cipher = Aes256Ofb::new(key.into(), AES_OFB_IV.into());
    cipher.apply_keystream(&mut buf);
    STANDARD.encode(buf)
}

/// Decrypt base64 ciphertext produced by [`encrypt`].
pub fn decrypt(key: &[u8; PBKDF2_KEY_LEN], ciphertext_b64: &str) -> Result<Vec<u8>, CryptoError> {
    let mut buf = STANDARD
        .decode(ciphertext_b64)
        .map_err(|e| CryptoError::InvalidBase64(e.to_string()))?;
    let mut cipher = Aes256Ofb::new(key.into(), AES_OFB_IV.into());
    cipher.apply_keystream(&mut buf);
    Ok(buf)
}

/// Sign a device request with HMAC-SHA256.
///
/// Wire formula: `base64(HMAC-SHA256(key=login_key, message=ascii(nonce) ||
/// ascii(unix_seconds) || payload))`, matching the `DevAuth` field of
/// spec.md §3's `DeviceAuthBlock`.
pub fn dev_auth(login_key: &[u8], nonce: u64, unix_seconds: u64, payload: &[u8]) -> String {
    let mut mac =
        HmacSha256::new_from_slice(login_key).expect("HMAC accepts keys of any length");
    mac.update(nonce.to_string().as_bytes());
    mac.update(unix_seconds.to_string().as_bytes());
    mac.update(payload);
    let tag = mac.finalize().into_bytes();
    STANDARD.encode(tag)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn login_key_is_uppercase_hex_of_fixed_length() {
        let key = login_key("admin", "hunter2", "5daf91fc5cfc1be8e081cfb08f792726");
        assert_eq!(key.len(), 32);
        assert!(key.iter().all(|b| b.is_ascii_hexdigit()));
        assert!(key.iter().all(|b| !b.is_ascii_lowercase()));
    }

    #[test]
    fn golden_vector_login_key() {
        // md5("admin" || ":Login to " || RANDSALT || ":" || "hunter2"),
        // uppercase hex.
        let key = login_key("admin", "hunter2", "5daf91fc5cfc1be8e081cfb08f792726");
        assert_eq!(key, b"3E27E9024CEE60AEB704A047225F5096");
    }

    #[test]
    fn golden_vector_s6_dev_auth() {
        // spec.md §8 property 6: dev_auth must match a fixed precomputed
        // golden vector for (login_key, nonce=12345, unix_seconds=1700000000,
        // payload="127.0.0.1:55555"). login_key is the golden vector above.
        let lk = login_key("admin", "hunter2", "5daf91fc5cfc1be8e081cfb08f792726");
        let da = dev_auth(&lk, 12345, 1_700_000_000, b"127.0.0.1:55555");
        assert_eq!(da, "h8Li3u5wXo9wdamIad+scYe2hemQUVImx961+6LFHJU=");
    }

    #[test]
    fn golden_vector_s6_encrypt_ciphertext_is_stable() {
        // spec.md §8 S-6: for fixed (user, pass, nonce=1), encrypting
        // "127.0.0.1:40000" must produce a stable ciphertext across
        // implementations, and decrypting it back must recover the
        // plaintext.
        let lk = login_key("admin", "hunter2", "5daf91fc5cfc1be8e081cfb08f792726");
        let key = session_key(&lk, 1);
        assert_eq!(
            hex_string(&key),
            "2726d386a48faad29f77208f98bac8aa5f2d1b6d71bc7d48472a3695270293d"
        );

        let ciphertext = encrypt(&key, b"127.0.0.1:40000");
        assert_eq!(ciphertext, "3SUZJVoQClp44MaRAYVO");
        assert_eq!(decrypt(&key, &ciphertext).unwrap(), b"127.0.0.1:40000");
    }

    fn hex_string(bytes: &[u8]) -> String {
        bytes.iter().map(|b| format!("{b:02x}")).collect()
    }

    #[test]
    fn login_key_is_deterministic() {
        let a = login_key("admin", "hunter2", "salt");
        let b = login_key("admin", "hunter2", "salt");
        assert_eq!(a, b);
    }

    #[test]
    fn login_key_changes_with_any_input() {
        let base = login_key("admin", "hunter2", "salt");
        assert_ne!(base, login_key("root", "hunter2", "salt"));
        assert_ne!(base, login_key("admin", "hunter3", "salt"));
        assert_ne!(base, login_key("admin", "hunter2", "pepper"));
    }

    #[test]
    fn session_key_is_deterministic_per_nonce() {
        let lk = login_key("admin", "hunter2", "salt");
        let a = session_key(&lk, 12345);
        let b = session_key(&lk, 12345);
        assert_eq!(a, b);
    }

    #[test]
    fn session_key_differs_across_nonces() {
        let lk = login_key("admin", "hunter2", "salt");
        let a = session_key(&lk, 12345);
        let b = session_key(&lk, 54321);
        assert_ne!(a, b);
    }

    #[test]
    fn encrypt_decrypt_roundtrip() {
        let lk = login_key("admin", "hunter2", "salt");
        let key = session_key(&lk, 999);
        let plaintext = b"rtsp://127.0.0.1:554/live.sdp";
        let ciphertext = encrypt(&key, plaintext);
        let recovered = decrypt(&key, &ciphertext).unwrap();
        assert_eq!(recovered, plaintext);
    }

    #[test]
    fn encrypt_is_not_identity() {
        let lk = login_key("admin", "hunter2", "salt");
        let key = session_key(&lk, 999);
        let plaintext = b"hello world hello world";
        let ciphertext_b64 = encrypt(&key, plaintext);
        let ciphertext = STANDARD.decode(&ciphertext_b64).unwrap();
        assert_ne!(ciphertext, plaintext);
    }

    #[test]
    fn decrypt_rejects_invalid_base64() {
        let lk = login_key("admin", "hunter2", "salt");
        let key = session_key(&lk, 999);
        let err = decrypt(&key, "not valid base64 !!").unwrap_err();
        assert!(matches!(err, CryptoError::InvalidBase64(_)));
    }

    #[test]
    fn dev_auth_is_deterministic_and_sensitive_to_every_input() {
        let lk = login_key("admin", "hunter2", "salt");
        let base = dev_auth(&lk, 12345, 1_700_000_000, b"127.0.0.1:55555");
        assert_eq!(base, dev_auth(&lk, 12345, 1_700_000_000, b"127.0.0.1:55555"));
        assert_ne!(base, dev_auth(&lk, 54321, 1_700_000_000, b"127.0.0.1:55555"));
        assert_ne!(base, dev_auth(&lk, 12345, 1_700_000_001, b"127.0.0.1:55555"));
        assert_ne!(base, dev_auth(&lk, 12345, 1_700_000_000, b"127.0.0.1:55556"));
        assert!(STANDARD.decode(&base).is_ok());
    }
}
