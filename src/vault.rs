use aes_gcm::aead::{Aead, KeyInit, OsRng};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::engine::general_purpose::STANDARD as B64;
use base64::Engine;
use rand::RngCore;

use crate::error::VaultError;

const NONCE_LEN: usize = 12;

/// Seals and opens camera credentials with AES-256-GCM. Ciphertext is a
/// self-contained base64 string: `nonce || ciphertext+tag`.
pub struct CredentialVault {
    cipher: Aes256Gcm,
}

impl CredentialVault {
    /// `key` must be exactly 32 bytes (the raw `ENC_KEY` value).
    pub fn new(key: &[u8]) -> Result<Self, VaultError> {
        if key.len() != 32 {
            return Err(VaultError::InvalidKey(format!(
                "expected 32 bytes, got {}",
                key.len()
            )));
        }
        let key = Key::<Aes256Gcm>::from_slice(key);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn seal(&self, plaintext: &str) -> Result<String, VaultError> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        OsRng.fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);

        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| VaultError::Encoding("encryption failed".into()))?;

        let mut combined = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        combined.extend_from_slice(&nonce_bytes);
        combined.extend_from_slice(&ciphertext);
        Ok(B64.encode(combined))
    }

    pub fn open(&self, ciphertext: &str) -> Result<String, VaultError> {
        let combined = B64
            .decode(ciphertext)
            .map_err(|_| VaultError::Tampered)?;
        if combined.len() < NONCE_LEN {
            return Err(VaultError::Tampered);
        }
        let (nonce_bytes, ct) = combined.split_at(NONCE_LEN);
        let nonce = Nonce::from_slice(nonce_bytes);

        let plaintext = self
            .cipher
            .decrypt(nonce, ct)
            .map_err(|_| VaultError::Tampered)?;

        String::from_utf8(plaintext).map_err(|_| VaultError::Tampered)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_vault() -> CredentialVault {
        CredentialVault::new(&[7u8; 32]).unwrap()
    }

    #[test]
    fn seal_then_open_round_trips() {
        let vault = test_vault();
        let secret = "hunter2-rtsp-password";
        let sealed = vault.seal(secret).unwrap();
        let opened = vault.open(&sealed).unwrap();
        assert_eq!(opened, secret);
    }

    #[test]
    fn two_seals_of_same_plaintext_differ() {
        let vault = test_vault();
        let a = vault.seal("same").unwrap();
        let b = vault.seal("same").unwrap();
        assert_ne!(a, b, "nonce must be randomized per record");
    }

    #[test]
    fn tampering_is_detected() {
        let vault = test_vault();
        let sealed = vault.seal("payload").unwrap();
        let mut raw = B64.decode(&sealed).unwrap();
        let last = raw.len() - 1;
        raw[last] ^= 0xFF;
        let tampered = B64.encode(raw);
        let result = vault.open(&tampered);
        assert!(matches!(result, Err(VaultError::Tampered)));
    }

    #[test]
    fn rejects_short_key() {
        assert!(CredentialVault::new(&[0u8; 16]).is_err());
    }
}
