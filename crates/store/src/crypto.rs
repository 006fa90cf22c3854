//! At-rest encryption for project upstream credentials.
//!
//! When `ENCRYPTION_KEY` is configured, credentials are stored as
//! `enc:v1:<base64(nonce || ciphertext)>`. Without a key, credentials are
//! stored as given. Decryption tolerates a mix of the two: rows written
//! before a key was introduced are returned unchanged.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Key, Nonce};
use base64::Engine;
use base64::engine::general_purpose::STANDARD as B64;
use rand::RngCore;

const ENC_PREFIX: &str = "enc:v1:";
const NONCE_LEN: usize = 12;

#[derive(Clone)]
pub struct Cipher {
    cipher: Aes256Gcm,
}

impl Cipher {
    /// Reads `ENCRYPTION_KEY` from the environment. Returns `Ok(None)` when
    /// unset, so credentials-at-rest stays opt-in.
    pub fn from_env() -> anyhow::Result<Option<Self>> {
        match std::env::var("ENCRYPTION_KEY") {
            Ok(raw) if !raw.trim().is_empty() => Ok(Some(Self::new(&raw)?)),
            _ => Ok(None),
        }
    }

    pub fn new(raw_key: &str) -> anyhow::Result<Self> {
        let bytes = decode_key(raw_key)?;
        let key = Key::<Aes256Gcm>::from_slice(&bytes);
        Ok(Self {
            cipher: Aes256Gcm::new(key),
        })
    }

    pub fn encrypt(&self, plaintext: &str) -> anyhow::Result<String> {
        let mut nonce_bytes = [0u8; NONCE_LEN];
        rand::thread_rng().fill_bytes(&mut nonce_bytes);
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext.as_bytes())
            .map_err(|_| anyhow::anyhow!("credential encryption failed"))?;
        let mut buf = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        buf.extend_from_slice(&nonce_bytes);
        buf.extend_from_slice(&ciphertext);
        Ok(format!("{ENC_PREFIX}{}", B64.encode(buf)))
    }

    pub fn decrypt(&self, stored: &str) -> anyhow::Result<String> {
        let Some(b64) = stored.strip_prefix(ENC_PREFIX) else {
            return Ok(stored.to_string());
        };
        let raw = B64.decode(b64)?;
        if raw.len() < NONCE_LEN {
            anyhow::bail!("ciphertext too short");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        let plaintext = self
            .cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("credential decryption failed"))?;
        Ok(String::from_utf8(plaintext)?)
    }
}

fn decode_key(raw: &str) -> anyhow::Result<Vec<u8>> {
    let trimmed = raw.trim();
    if let Ok(bytes) = hex::decode(trimmed) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    if let Ok(bytes) = B64.decode(trimmed) {
        if bytes.len() == 32 {
            return Ok(bytes);
        }
    }
    anyhow::bail!("ENCRYPTION_KEY must decode to 32 bytes (hex or base64)")
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_cipher() -> Cipher {
        Cipher::new(&hex::encode([7u8; 32])).unwrap()
    }

    #[test]
    fn round_trips() {
        let cipher = test_cipher();
        let enc = cipher.encrypt("sk-upstream-secret").unwrap();
        assert!(enc.starts_with(ENC_PREFIX));
        assert_eq!(cipher.decrypt(&enc).unwrap(), "sk-upstream-secret");
    }

    #[test]
    fn plaintext_passes_through_unchanged() {
        let cipher = test_cipher();
        assert_eq!(cipher.decrypt("sk-legacy-plaintext").unwrap(), "sk-legacy-plaintext");
    }

    #[test]
    fn rejects_undersized_key() {
        assert!(Cipher::new("too-short").is_err());
    }
}
