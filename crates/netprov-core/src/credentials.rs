//! Router password handling
//!
//! Stored passwords are hex(nonce || AES-256-GCM ciphertext). Rows written
//! before encryption was introduced still hold plaintext, so a value that
//! fails to decrypt is used as-is. The resolved password only lives in a
//! [`crate::traits::DeviceTarget`] and is never written back.

use aes_gcm::aead::{Aead, AeadCore, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Nonce};
use tracing::warn;

use crate::Error;

const NONCE_SIZE: usize = 12;

/// Decrypts stored router passwords
pub trait PasswordCipher: Send + Sync {
    fn decrypt(&self, ciphertext: &str) -> Result<String, Error>;
}

/// AES-256-GCM cipher keyed by a 32-byte hex key
pub struct AesGcmCipher {
    cipher: Aes256Gcm,
}

impl std::fmt::Debug for AesGcmCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AesGcmCipher").field("key", &"<REDACTED>").finish()
    }
}

impl AesGcmCipher {
    pub fn new(key_hex: &str) -> Result<Self, Error> {
        let key_bytes =
            hex::decode(key_hex).map_err(|e| Error::credential(format!("Invalid hex key: {e}")))?;
        if key_bytes.len() != 32 {
            return Err(Error::credential("Encryption key must be 32 bytes (256 bits) long"));
        }
        let cipher = Aes256Gcm::new(key_bytes.as_slice().into());
        Ok(Self { cipher })
    }

    /// Encrypt a password for storage
    pub fn encrypt(&self, plain_text: &str) -> Result<String, Error> {
        let nonce = Aes256Gcm::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(&nonce, plain_text.as_bytes())
            .map_err(|e| Error::credential(format!("Encryption failed: {e}")))?;

        let mut sealed = nonce.to_vec();
        sealed.extend_from_slice(&ciphertext);
        Ok(hex::encode(sealed))
    }
}

impl PasswordCipher for AesGcmCipher {
    fn decrypt(&self, ciphertext: &str) -> Result<String, Error> {
        let sealed = hex::decode(ciphertext)
            .map_err(|e| Error::credential(format!("Invalid hex ciphertext: {e}")))?;
        if sealed.len() < NONCE_SIZE {
            return Err(Error::credential("Ciphertext is too short to contain a nonce"));
        }

        let (nonce_bytes, body) = sealed.split_at(NONCE_SIZE);
        let plain = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), body)
            .map_err(|e| Error::credential(format!("Decryption failed: {e}")))?;

        String::from_utf8(plain).map_err(|e| Error::credential(format!("Invalid UTF-8 sequence: {e}")))
    }
}

/// Resolve a stored router password to the value sent to the device
///
/// Without a cipher the stored value is returned unchanged. A decryption
/// failure falls back to treating the stored value as plaintext.
pub fn resolve_password(cipher: Option<&dyn PasswordCipher>, router_id: i64, stored: &str) -> String {
    let Some(cipher) = cipher else {
        return stored.to_string();
    };
    match cipher.decrypt(stored) {
        Ok(plain) => plain,
        Err(e) => {
            warn!(
                router_id,
                "Router password did not decrypt ({}); using stored value as plaintext", e
            );
            stored.to_string()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const KEY: &str = "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f";

    #[test]
    fn encrypt_then_resolve() {
        let cipher = AesGcmCipher::new(KEY).unwrap();
        let sealed = cipher.encrypt("r0uter-pass").unwrap();

        assert_ne!(sealed, "r0uter-pass");
        assert_eq!(resolve_password(Some(&cipher), 1, &sealed), "r0uter-pass");
    }

    #[test]
    fn legacy_plaintext_falls_through() {
        let cipher = AesGcmCipher::new(KEY).unwrap();
        assert_eq!(resolve_password(Some(&cipher), 1, "plain-old-pass"), "plain-old-pass");
        assert_eq!(resolve_password(None, 1, "as-is"), "as-is");
    }

    #[test]
    fn wrong_key_is_a_credential_error() {
        let sealed = AesGcmCipher::new(KEY).unwrap().encrypt("secret").unwrap();
        let other =
            AesGcmCipher::new("f1e1d1c1b1a191817161514131211101f0e0d0c0b0a090807060504030201000")
                .unwrap();
        assert!(matches!(other.decrypt(&sealed), Err(Error::Credential(_))));
    }

    #[test]
    fn rejects_bad_keys() {
        assert!(AesGcmCipher::new("1234").is_err());
        assert!(AesGcmCipher::new("not-a-hex-string").is_err());
    }
}
