//! Symmetric encryption for sensitive configuration fields
//!
//! Blobs are ChaCha20-Poly1305 envelopes of the form
//! `enc:v1:<nonce>:<ciphertext>` with URL-safe unpadded base64 parts. The
//! Poly1305 tag makes a wrong key, truncation or any bit flip fail loudly
//! instead of producing garbage plaintext.

use crate::domain::EncryptedBlob;
use crate::error::{Result, StrategosError};
use base64::engine::general_purpose::{STANDARD, URL_SAFE_NO_PAD};
use base64::Engine;
use chacha20poly1305::aead::Aead;
use chacha20poly1305::{ChaCha20Poly1305, KeyInit, Nonce};
use rand::RngCore;
use serde::Serialize;
use tracing::{info, warn};
use zeroize::Zeroizing;

const ENVELOPE_PREFIX: &str = "enc:v1:";
const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Process-wide encryption service
#[derive(Clone)]
pub struct CipherBox {
    key: Option<Zeroizing<[u8; KEY_LEN]>>,
}

impl std::fmt::Debug for CipherBox {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CipherBox")
            .field("available", &self.is_available())
            .finish()
    }
}

impl CipherBox {
    /// Build from a base64 key (standard or URL-safe). A missing or invalid
    /// key leaves the box unavailable; every operation then fails fast.
    pub fn new(encoded_key: Option<&str>) -> Self {
        let Some(encoded) = encoded_key.map(str::trim).filter(|k| !k.is_empty()) else {
            warn!("encryption key not set, sensitive fields cannot be stored");
            return Self::unavailable();
        };

        match Self::decode_key(encoded) {
            Ok(key) => {
                info!("encryption service initialized");
                Self::from_key(key)
            }
            Err(e) => {
                warn!(error = %e, "encryption key ignored");
                Self::unavailable()
            }
        }
    }

    /// Strict variant for callers that must not start without a key
    pub fn try_new(encoded_key: &str) -> Result<Self> {
        Ok(Self::from_key(Self::decode_key(encoded_key.trim())?))
    }

    pub fn from_key(key: [u8; KEY_LEN]) -> Self {
        Self {
            key: Some(Zeroizing::new(key)),
        }
    }

    pub fn unavailable() -> Self {
        Self { key: None }
    }

    /// Generate a fresh random key, base64 encoded
    pub fn generate_key() -> String {
        let mut key = Zeroizing::new([0u8; KEY_LEN]);
        rand::thread_rng().fill_bytes(&mut key[..]);
        STANDARD.encode(&key[..])
    }

    pub fn is_available(&self) -> bool {
        self.key.is_some()
    }

    fn decode_key(encoded: &str) -> Result<[u8; KEY_LEN]> {
        let bytes = Zeroizing::new(
            STANDARD
                .decode(encoded.as_bytes())
                .or_else(|_| URL_SAFE_NO_PAD.decode(encoded.as_bytes()))
                .map_err(|e| {
                    StrategosError::Configuration(format!("encryption key is not valid base64: {e}"))
                })?,
        );
        if bytes.len() != KEY_LEN {
            return Err(StrategosError::Configuration(format!(
                "encryption key must be {KEY_LEN} bytes, got {}",
                bytes.len()
            )));
        }
        let mut key = [0u8; KEY_LEN];
        key.copy_from_slice(&bytes);
        Ok(key)
    }

    fn aead(&self) -> Result<ChaCha20Poly1305> {
        let key = self.key.as_ref().ok_or_else(|| {
            StrategosError::Configuration("encryption is unavailable: no valid key configured".into())
        })?;
        ChaCha20Poly1305::new_from_slice(&key[..])
            .map_err(|e| StrategosError::Configuration(format!("cipher init failed: {e}")))
    }

    /// Encrypt raw bytes under a fresh random nonce
    pub fn encrypt(&self, plaintext: &[u8]) -> Result<EncryptedBlob> {
        let aead = self.aead()?;

        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = aead
            .encrypt(nonce, plaintext)
            .map_err(|e| StrategosError::Internal(format!("encryption failed: {e}")))?;

        Ok(EncryptedBlob::new(format!(
            "{ENVELOPE_PREFIX}{}:{}",
            URL_SAFE_NO_PAD.encode(nonce_bytes),
            URL_SAFE_NO_PAD.encode(ciphertext)
        )))
    }

    pub fn decrypt(&self, blob: &EncryptedBlob) -> Result<Vec<u8>> {
        let aead = self.aead()?;

        let body = blob
            .as_str()
            .strip_prefix(ENVELOPE_PREFIX)
            .ok_or_else(|| StrategosError::Decryption("unrecognized envelope".into()))?;
        let (nonce_b64, ciphertext_b64) = body
            .split_once(':')
            .ok_or_else(|| StrategosError::Decryption("malformed envelope".into()))?;

        let nonce_raw = URL_SAFE_NO_PAD
            .decode(nonce_b64.as_bytes())
            .map_err(|e| StrategosError::Decryption(format!("bad nonce encoding: {e}")))?;
        if nonce_raw.len() != NONCE_LEN {
            return Err(StrategosError::Decryption("nonce length is invalid".into()));
        }
        let ciphertext = URL_SAFE_NO_PAD
            .decode(ciphertext_b64.as_bytes())
            .map_err(|e| StrategosError::Decryption(format!("bad payload encoding: {e}")))?;

        aead.decrypt(Nonce::from_slice(&nonce_raw), ciphertext.as_slice())
            .map_err(|_| StrategosError::Decryption("wrong key or corrupted ciphertext".into()))
    }

    /// Serialize to JSON, then encrypt
    pub fn encrypt_object<T: Serialize + ?Sized>(&self, value: &T) -> Result<EncryptedBlob> {
        // Check availability before touching the plaintext
        self.aead()?;
        let bytes = Zeroizing::new(
            serde_json::to_vec(value).map_err(|e| StrategosError::Serialization(e.to_string()))?,
        );
        self.encrypt(&bytes)
    }

    /// Decrypt, then parse as JSON
    pub fn decrypt_object(&self, blob: &EncryptedBlob) -> Result<serde_json::Value> {
        let bytes = Zeroizing::new(self.decrypt(blob)?);
        serde_json::from_slice(&bytes).map_err(|e| {
            StrategosError::Serialization(format!("decrypted payload is not valid JSON: {e}"))
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn cipher() -> CipherBox {
        CipherBox::new(Some(&CipherBox::generate_key()))
    }

    #[test]
    fn test_bytes_round_trip() {
        let c = cipher();
        let payloads: [&[u8]; 4] = [b"", b"x", b"\x00\xff binary \x01", &[7u8; 4096]];
        for payload in payloads {
            let blob = c.encrypt(payload).unwrap();
            assert_eq!(c.decrypt(&blob).unwrap(), payload);
        }
    }

    #[test]
    fn test_object_round_trip() {
        let c = cipher();
        let value = json!({
            "exchange": "binance",
            "keys": ["a", "b"],
            "nested": {"limit": 3.5, "enabled": true, "none": null}
        });
        let blob = c.encrypt_object(&value).unwrap();
        assert_eq!(c.decrypt_object(&blob).unwrap(), value);
    }

    #[test]
    fn test_nonce_is_fresh_per_call() {
        let c = cipher();
        let a = c.encrypt(b"same").unwrap();
        let b = c.encrypt(b"same").unwrap();
        assert_ne!(a, b);
    }

    #[test]
    fn test_wrong_key_fails() {
        let blob = cipher().encrypt(b"secret").unwrap();
        let err = cipher().decrypt(&blob).unwrap_err();
        assert!(matches!(err, StrategosError::Decryption(_)));
    }

    #[test]
    fn test_tampered_ciphertext_fails() {
        let c = cipher();
        let blob = c.encrypt(b"secret payload").unwrap();

        // Flip one character in the ciphertext part
        let mut envelope = blob.as_str().to_string();
        let last = envelope.pop().unwrap();
        envelope.push(if last == 'A' { 'B' } else { 'A' });
        let err = c.decrypt(&EncryptedBlob::from_stored(envelope)).unwrap_err();
        assert!(matches!(err, StrategosError::Decryption(_)));

        let err = c
            .decrypt(&EncryptedBlob::from_stored("plaintext-secret"))
            .unwrap_err();
        assert!(matches!(err, StrategosError::Decryption(_)));
    }

    #[test]
    fn test_non_json_plaintext_is_serialization_error() {
        let c = cipher();
        let blob = c.encrypt(b"not json {").unwrap();
        assert!(matches!(
            c.decrypt_object(&blob),
            Err(StrategosError::Serialization(_))
        ));
    }

    #[test]
    fn test_unavailable_fails_fast() {
        let c = CipherBox::new(None);
        assert!(!c.is_available());
        assert!(matches!(
            c.encrypt(b"x"),
            Err(StrategosError::Configuration(_))
        ));
        assert!(matches!(
            c.encrypt_object(&json!({"k": "v"})),
            Err(StrategosError::Configuration(_))
        ));
    }

    #[test]
    fn test_invalid_key_is_unavailable() {
        assert!(!CipherBox::new(Some("too-short")).is_available());
        assert!(matches!(
            CipherBox::try_new("AAAA"),
            Err(StrategosError::Configuration(_))
        ));
    }
}
