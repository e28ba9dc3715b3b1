//! Vault key hierarchy management.
//!
//! [`KeyManager`] owns the salt and passphrase verifier files of one vault
//! root, derives the master key, and hands out per-conversation keys and
//! ciphers.

use std::path::Path;
use std::sync::Mutex;

use tracing::{debug, info};

use crate::error::{Result, VaultError};
use crate::fs::write_atomic_private;
use crate::vault::VaultPaths;

use super::aead::ContentCipher;
use super::key::{self, ConversationKey, KdfParams, MasterKey};
use super::passphrase::validate_passphrase;

/// Length of the Argon2 salt in bytes.
pub const SALT_LEN: usize = 16;

const VERIFIER_CONTEXT: &[u8] = b"vault-passphrase-verifier-v1";

/// Derives and caches the keys of a single vault.
pub struct KeyManager {
    paths: VaultPaths,
    params: KdfParams,
    cached: Mutex<Option<MasterKey>>,
}

impl KeyManager {
    /// Key manager for the vault at `root` with production KDF parameters.
    pub fn new(root: impl AsRef<Path>) -> Self {
        Self::with_params(root, KdfParams::default())
    }

    /// Key manager with explicit KDF parameters.
    pub fn with_params(root: impl AsRef<Path>, params: KdfParams) -> Self {
        Self {
            paths: VaultPaths::new(root.as_ref()),
            params,
            cached: Mutex::new(None),
        }
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn params(&self) -> &KdfParams {
        &self.params
    }

    /// True once [`KeyManager::initialize`] has written the verifier.
    pub fn is_initialized(&self) -> bool {
        self.paths.is_initialized()
    }

    /// Derive the master key, creating the salt on first use.
    ///
    /// # Errors
    ///
    /// - `VaultError::Validation` if the passphrase is shorter than 12
    ///   characters or blank
    /// - `VaultError::Crypto` if the salt file is corrupt
    pub fn derive_master_key(&self, passphrase: &str) -> Result<MasterKey> {
        validate_passphrase(passphrase)?;
        let salt = self.load_or_create_salt()?;
        key::derive_master_key(passphrase, &salt, &self.params)
    }

    /// First-run setup: derive the master key and persist its verifier.
    ///
    /// # Errors
    ///
    /// `VaultError::Validation` if the vault already has a verifier.
    pub fn initialize(&self, passphrase: &str) -> Result<MasterKey> {
        if self.is_initialized() {
            return Err(VaultError::Validation(format!(
                "Vault at {} is already initialized",
                self.paths.root().display()
            )));
        }
        let master_key = self.derive_master_key(passphrase)?;
        write_atomic_private(&self.paths.verifier(), verifier_for(&master_key).as_bytes())?;
        info!(root = %self.paths.root().display(), "initialized vault key hierarchy");
        Ok(master_key)
    }

    /// Check a passphrase against the stored verifier in constant time.
    ///
    /// Passphrases that fail validation return `Ok(false)`.
    ///
    /// # Errors
    ///
    /// `VaultError::NotFound` if the vault was never initialized.
    pub fn verify_passphrase(&self, passphrase: &str) -> Result<bool> {
        Ok(self.derive_verified(passphrase)?.is_some())
    }

    /// Derive the master key and confirm it against the verifier.
    ///
    /// # Errors
    ///
    /// - `VaultError::IncorrectPassphrase` on mismatch
    /// - `VaultError::NotFound` if the vault was never initialized
    pub fn unlock(&self, passphrase: &str) -> Result<MasterKey> {
        self.derive_verified(passphrase)?
            .ok_or(VaultError::IncorrectPassphrase)
    }

    pub fn derive_conversation_key(
        &self,
        master_key: &MasterKey,
        conversation_id: &str,
    ) -> Result<ConversationKey> {
        key::derive_conversation_key(master_key, conversation_id)
    }

    /// Cipher for the content of one conversation.
    pub fn cipher(&self, master_key: &MasterKey, conversation_id: &str) -> Result<ContentCipher> {
        let conversation_key = self.derive_conversation_key(master_key, conversation_id)?;
        Ok(ContentCipher::for_conversation(&conversation_key))
    }

    /// Keep the master key in this process's memory only.
    pub fn cache_master_key(&self, master_key: MasterKey) {
        *self.lock_cache() = Some(master_key);
    }

    pub fn cached_master_key(&self) -> Option<MasterKey> {
        self.lock_cache().clone()
    }

    /// Drop the cached key. The dropped value is zeroized.
    pub fn clear_cached_key(&self) {
        self.lock_cache().take();
    }

    fn lock_cache(&self) -> std::sync::MutexGuard<'_, Option<MasterKey>> {
        self.cached
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn derive_verified(&self, passphrase: &str) -> Result<Option<MasterKey>> {
        let stored = self.read_verifier()?;
        if validate_passphrase(passphrase).is_err() {
            debug!("passphrase rejected by validation");
            return Ok(None);
        }
        let salt = self.read_salt()?.ok_or_else(|| {
            VaultError::Crypto(format!(
                "Salt file missing from initialized vault: {}",
                self.paths.salt().display()
            ))
        })?;
        let master_key = key::derive_master_key(passphrase, &salt, &self.params)?;
        // blake3::Hash equality is constant time.
        if blake3::keyed_hash(master_key.as_bytes(), VERIFIER_CONTEXT) == stored {
            Ok(Some(master_key))
        } else {
            Ok(None)
        }
    }

    fn read_verifier(&self) -> Result<blake3::Hash> {
        let path = self.paths.verifier();
        let contents = match std::fs::read_to_string(&path) {
            Ok(contents) => contents,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(format!(
                    "No vault initialized at {}",
                    self.paths.root().display()
                )));
            }
            Err(err) => return Err(err.into()),
        };
        blake3::Hash::from_hex(contents.trim())
            .map_err(|e| VaultError::Crypto(format!("Corrupt verifier {}: {}", path.display(), e)))
    }

    fn read_salt(&self) -> Result<Option<[u8; SALT_LEN]>> {
        let path = self.paths.salt();
        let bytes = match std::fs::read(&path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(err.into()),
        };
        let salt: [u8; SALT_LEN] = bytes.as_slice().try_into().map_err(|_| {
            VaultError::Crypto(format!(
                "Corrupt salt file {} ({} bytes, expected {})",
                path.display(),
                bytes.len(),
                SALT_LEN
            ))
        })?;
        Ok(Some(salt))
    }

    fn load_or_create_salt(&self) -> Result<[u8; SALT_LEN]> {
        if let Some(salt) = self.read_salt()? {
            return Ok(salt);
        }
        let mut salt = [0u8; SALT_LEN];
        getrandom::getrandom(&mut salt)
            .map_err(|e| VaultError::Crypto(format!("Failed to generate salt: {}", e)))?;
        write_atomic_private(&self.paths.salt(), &salt)?;
        debug!("generated new vault salt");
        Ok(salt)
    }
}

fn verifier_for(master_key: &MasterKey) -> String {
    blake3::keyed_hash(master_key.as_bytes(), VERIFIER_CONTEXT)
        .to_hex()
        .to_string()
}

impl std::fmt::Debug for KeyManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyManager")
            .field("root", &self.paths.root())
            .field("params", &self.params)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    fn fast() -> KdfParams {
        KdfParams {
            memory_kib: 1024,
            iterations: 1,
            parallelism: 1,
        }
    }

    const PASSPHRASE: &str = "correct-horse-battery-staple";

    #[test]
    fn test_salt_is_created_once() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        let a = km.derive_master_key(PASSPHRASE).unwrap();
        let salt = std::fs::read(km.paths().salt()).unwrap();
        assert_eq!(salt.len(), SALT_LEN);

        let b = km.derive_master_key(PASSPHRASE).unwrap();
        assert_eq!(a, b);
        assert_eq!(std::fs::read(km.paths().salt()).unwrap(), salt);
    }

    #[test]
    fn test_corrupt_salt_is_an_error() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join(".salt"), b"short").unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        assert!(matches!(
            km.derive_master_key(PASSPHRASE),
            Err(VaultError::Crypto(_))
        ));
    }

    #[test]
    fn test_initialize_then_verify() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        let master = km.initialize(PASSPHRASE).unwrap();

        assert!(km.is_initialized());
        assert!(km.verify_passphrase(PASSPHRASE).unwrap());
        assert!(!km.verify_passphrase("wrong-horse-battery-staple").unwrap());
        assert!(!km.verify_passphrase("short").unwrap());
        assert_eq!(km.unlock(PASSPHRASE).unwrap(), master);
    }

    #[test]
    fn test_initialize_twice_fails() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        km.initialize(PASSPHRASE).unwrap();
        assert!(matches!(
            km.initialize(PASSPHRASE),
            Err(VaultError::Validation(_))
        ));
    }

    #[test]
    fn test_verify_without_verifier_is_not_found() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        km.derive_master_key(PASSPHRASE).unwrap();
        assert!(matches!(
            km.verify_passphrase(PASSPHRASE),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_unlock_with_wrong_passphrase() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        km.initialize(PASSPHRASE).unwrap();
        assert!(matches!(
            km.unlock("wrong-horse-battery-staple"),
            Err(VaultError::IncorrectPassphrase)
        ));
    }

    #[test]
    fn test_verifier_does_not_contain_key() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        let master = km.initialize(PASSPHRASE).unwrap();
        let stored = std::fs::read_to_string(km.paths().verifier()).unwrap();
        assert!(!stored.contains(&hex::encode(master.as_bytes())));
    }

    #[test]
    fn test_key_cache() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        assert!(km.cached_master_key().is_none());

        let master = km.derive_master_key(PASSPHRASE).unwrap();
        km.cache_master_key(master.clone());
        assert_eq!(km.cached_master_key(), Some(master));

        km.clear_cached_key();
        assert!(km.cached_master_key().is_none());
    }

    #[test]
    fn test_cipher_is_bound_to_conversation() {
        let dir = tempdir().unwrap();
        let km = KeyManager::with_params(dir.path(), fast());
        let master = km.derive_master_key(PASSPHRASE).unwrap();

        let ct = km.cipher(&master, "a").unwrap().encrypt(b"x", b"").unwrap();
        assert_eq!(km.cipher(&master, "a").unwrap().decrypt(&ct, b"").unwrap(), b"x");
        assert!(matches!(
            km.cipher(&master, "b").unwrap().decrypt(&ct, b""),
            Err(VaultError::Decryption(_))
        ));
    }
}
