//! Authenticated encryption for vault content.
//!
//! XChaCha20-Poly1305 with a random 192-bit nonce per message.
//!
//! Wire format:
//!   [ nonce (24 bytes) | ciphertext + tag (16 bytes) ]

use chacha20poly1305::aead::{Aead, AeadCore, KeyInit, OsRng, Payload};
use chacha20poly1305::{Key, XChaCha20Poly1305, XNonce};

use crate::error::{Result, VaultError};

use super::key::{ConversationKey, KEY_LEN};

/// Nonce length in bytes.
pub const NONCE_LEN: usize = 24;
/// Poly1305 tag length in bytes.
pub const TAG_LEN: usize = 16;

/// A cipher bound to one 32-byte key.
pub struct ContentCipher {
    cipher: XChaCha20Poly1305,
}

impl ContentCipher {
    pub fn new(key: &[u8; KEY_LEN]) -> Self {
        Self {
            cipher: XChaCha20Poly1305::new(Key::from_slice(key)),
        }
    }

    pub fn for_conversation(key: &ConversationKey) -> Self {
        Self::new(key.as_bytes())
    }

    /// Encrypt `plaintext`, authenticating `aad` alongside it.
    ///
    /// Output is always `NONCE_LEN + TAG_LEN` bytes longer than the input,
    /// so even an empty plaintext produces non-empty, non-plaintext bytes.
    pub fn encrypt(&self, plaintext: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        let nonce = XChaCha20Poly1305::generate_nonce(&mut OsRng);
        let ciphertext = self
            .cipher
            .encrypt(
                &nonce,
                Payload {
                    msg: plaintext,
                    aad,
                },
            )
            .map_err(|_| VaultError::Crypto("Encryption failed".to_string()))?;

        let mut out = Vec::with_capacity(NONCE_LEN + ciphertext.len());
        out.extend_from_slice(&nonce);
        out.extend_from_slice(&ciphertext);
        Ok(out)
    }

    /// Decrypt wire-format bytes. Fails closed: any truncation, tampering,
    /// wrong key or wrong `aad` yields `VaultError::Decryption` and no
    /// plaintext.
    pub fn decrypt(&self, data: &[u8], aad: &[u8]) -> Result<Vec<u8>> {
        if data.len() < NONCE_LEN + TAG_LEN {
            return Err(VaultError::Decryption(format!(
                "ciphertext too short ({} bytes)",
                data.len()
            )));
        }
        let (nonce_bytes, ct) = data.split_at(NONCE_LEN);
        let nonce = XNonce::from_slice(nonce_bytes);
        self.cipher
            .decrypt(nonce, Payload { msg: ct, aad })
            .map_err(|_| VaultError::Decryption("authentication failed".to_string()))
    }
}

impl std::fmt::Debug for ContentCipher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ContentCipher").finish_non_exhaustive()
    }
}
