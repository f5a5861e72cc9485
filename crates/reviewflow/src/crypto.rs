//! Symmetric encryption for platform session artifacts and credentials.
//!
//! Ciphertexts are `base64(nonce[12] || aes-256-gcm(plaintext))`.

use aes_gcm::aead::{Aead, KeyInit};
use aes_gcm::{Aes256Gcm, Nonce};
use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;

const KEY_LEN: usize = 32;
const NONCE_LEN: usize = 12;

/// Development-only key material. Anything encrypted with it is readable by
/// whoever has this source tree.
const INSECURE_DEV_KEY: &[u8; KEY_LEN] = b"reviewflow-dev-key-do-not-deploy";

#[derive(Clone)]
pub struct SessionCipher {
    cipher: Aes256Gcm,
    insecure: bool,
}

impl std::fmt::Debug for SessionCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCipher")
            .field("insecure", &self.insecure)
            .finish_non_exhaustive()
    }
}

impl SessionCipher {
    /// Uses the first 32 bytes of `key_material`. Missing or shorter material
    /// selects the development key; check [`SessionCipher::is_insecure`].
    pub fn from_key_material(key_material: Option<&str>) -> anyhow::Result<Self> {
        let (key, insecure) = match key_material.map(str::as_bytes) {
            Some(bytes) if bytes.len() >= KEY_LEN => (&bytes[..KEY_LEN], false),
            _ => (&INSECURE_DEV_KEY[..], true),
        };
        let cipher = Aes256Gcm::new_from_slice(key)
            .map_err(|e| anyhow::anyhow!("invalid session encryption key: {e}"))?;
        Ok(Self { cipher, insecure })
    }

    pub fn is_insecure(&self) -> bool {
        self.insecure
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> anyhow::Result<String> {
        let nonce_bytes: [u8; NONCE_LEN] = rand::random();
        let nonce = Nonce::from_slice(&nonce_bytes);
        let ciphertext = self
            .cipher
            .encrypt(nonce, plaintext)
            .map_err(|e| anyhow::anyhow!("encryption failed: {e}"))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce_bytes);
        out.extend_from_slice(&ciphertext);
        Ok(BASE64.encode(out))
    }

    pub fn decrypt(&self, encoded: &str) -> anyhow::Result<Vec<u8>> {
        let raw = BASE64
            .decode(encoded.trim())
            .map_err(|e| anyhow::anyhow!("ciphertext is not base64: {e}"))?;
        if raw.len() <= NONCE_LEN {
            anyhow::bail!("ciphertext too short");
        }
        let (nonce_bytes, ciphertext) = raw.split_at(NONCE_LEN);
        self.cipher
            .decrypt(Nonce::from_slice(nonce_bytes), ciphertext)
            .map_err(|_| anyhow::anyhow!("decryption failed (wrong key or tampered data)"))
    }

    pub fn encrypt_json<T: serde::Serialize>(&self, value: &T) -> anyhow::Result<String> {
        let bytes = serde_json::to_vec(value)?;
        self.encrypt(&bytes)
    }

    pub fn decrypt_json<T: serde::de::DeserializeOwned>(&self, encoded: &str) -> anyhow::Result<T> {
        let bytes = self.decrypt(encoded)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}
