//! Key material and derivation.
//!
//! The master key is derived from the passphrase with Argon2id, which is
//! memory-hard and deliberately slow. Conversation keys are cheap HKDF
//! expansions of the master key, one per conversation id, so a leaked
//! conversation key exposes nothing beyond that conversation.

use argon2::Argon2;
use hkdf::Hkdf;
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

use crate::error::{Result, VaultError};

use super::passphrase::validate_passphrase;

/// Length of every symmetric key in bytes.
pub const KEY_LEN: usize = 32;

const CONVERSATION_KEY_INFO: &[u8] = b"vault-conversation-content";

/// Argon2id cost parameters.
///
/// `Default` gives the production settings: 64 MiB of memory, four passes,
/// four lanes. Lower values only make sense in tests.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct KdfParams {
    /// Memory cost in KiB
    pub memory_kib: u32,
    /// Number of passes
    pub iterations: u32,
    /// Degree of parallelism
    pub parallelism: u32,
}

impl Default for KdfParams {
    fn default() -> Self {
        Self {
            memory_kib: 64 * 1024,
            iterations: 4,
            parallelism: 4,
        }
    }
}

impl KdfParams {
    fn argon2(&self) -> Result<Argon2<'static>> {
        let params = argon2::Params::new(
            self.memory_kib,
            self.iterations,
            self.parallelism,
            Some(KEY_LEN),
        )
        .map_err(|e| VaultError::Crypto(format!("Failed to create Argon2 params: {}", e)))?;
        Ok(Argon2::new(
            argon2::Algorithm::Argon2id,
            argon2::Version::V0x13,
            params,
        ))
    }
}

/// The root secret of a vault.
///
/// Never persisted in plaintext. Zeroized on drop; copies made by the
/// allocator or the OS (swap, core dumps) are outside our control.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct MasterKey {
    key: [u8; KEY_LEN],
}

impl MasterKey {
    pub(crate) fn from_bytes(bytes: [u8; KEY_LEN]) -> Self {
        Self { key: bytes }
    }

    /// Build a key from raw bytes, rejecting anything but exactly 32 bytes.
    pub fn from_slice(bytes: &[u8]) -> Result<Self> {
        let key: [u8; KEY_LEN] = bytes.try_into().map_err(|_| {
            VaultError::Validation(format!(
                "Master key must be {} bytes (got {})",
                KEY_LEN,
                bytes.len()
            ))
        })?;
        Ok(Self { key })
    }

    /// Raw key bytes. Use only for immediate cryptographic operations.
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl PartialEq for MasterKey {
    fn eq(&self, other: &Self) -> bool {
        self.key.ct_eq(&other.key).into()
    }
}

impl Eq for MasterKey {}

impl std::fmt::Debug for MasterKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MasterKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Per-conversation content key. Derived on demand, never stored.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConversationKey {
    key: [u8; KEY_LEN],
}

impl ConversationKey {
    pub fn as_bytes(&self) -> &[u8; KEY_LEN] {
        &self.key
    }
}

impl std::fmt::Debug for ConversationKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ConversationKey")
            .field("key", &"[REDACTED]")
            .finish()
    }
}

/// Derive the master key from a passphrase and salt using Argon2id.
///
/// Deterministic: the same passphrase, salt and parameters always produce
/// the same key.
///
/// # Errors
///
/// - `VaultError::Validation` if the passphrase is too short or the salt is
///   shorter than 16 bytes
/// - `VaultError::Crypto` if Argon2 rejects the parameters
pub fn derive_master_key(passphrase: &str, salt: &[u8], params: &KdfParams) -> Result<MasterKey> {
    validate_passphrase(passphrase)?;
    if salt.len() < 16 {
        return Err(VaultError::Validation(
            "Salt must be at least 16 bytes".to_string(),
        ));
    }

    let mut key_bytes = [0u8; KEY_LEN];
    params
        .argon2()?
        .hash_password_into(passphrase.as_bytes(), salt, &mut key_bytes)
        .map_err(|e| VaultError::Crypto(format!("Key derivation failed: {}", e)))?;

    let key = MasterKey::from_bytes(key_bytes);
    key_bytes.zeroize();
    Ok(key)
}

/// Derive the content key for one conversation.
///
/// HKDF-SHA256 with the conversation id as salt and a fixed context string
/// as info.
pub fn derive_conversation_key(
    master_key: &MasterKey,
    conversation_id: &str,
) -> Result<ConversationKey> {
    if conversation_id.is_empty() {
        return Err(VaultError::Validation(
            "Conversation id cannot be empty".to_string(),
        ));
    }

    let hk = Hkdf::<Sha256>::new(Some(conversation_id.as_bytes()), master_key.as_bytes());
    let mut key = [0u8; KEY_LEN];
    hk.expand(CONVERSATION_KEY_INFO, &mut key)
        .map_err(|_| VaultError::Crypto("HKDF expand failed".to_string()))?;
    Ok(ConversationKey { key })
}

/// Hex SHA-256 of the master key, for comparing key identity without
/// exposing the key.
pub fn master_key_fingerprint(master_key: &MasterKey) -> String {
    hex::encode(Sha256::digest(master_key.as_bytes()))
}
