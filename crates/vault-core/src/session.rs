//! Session tokens.
//!
//! A session lets later commands reuse the master key without re-running
//! Argon2id. The key is wrapped under a key derived from a random token;
//! only the token's SHA-256 hash and the wrapped key reach disk. Whoever
//! holds the token (typically via `VAULT_SESSION_TOKEN`) can unwrap the key
//! until the session expires or is cleared.

use std::fs::OpenOptions;
use std::io::Write;
use std::path::{Path, PathBuf};

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use chrono::{DateTime, Duration, Utc};
use hkdf::Hkdf;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use subtle::ConstantTimeEq;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::crypto::{ContentCipher, MasterKey, KEY_LEN};
use crate::error::{Result, VaultError};
use crate::fs::write_atomic_private;

/// Default session lifetime in minutes.
pub const DEFAULT_SESSION_TIMEOUT_MINUTES: i64 = 30;

/// Longest accepted session lifetime (one year).
pub const MAX_SESSION_TIMEOUT_MINUTES: i64 = 365 * 24 * 60;

const TOKEN_BYTES: usize = 32;
const SESSION_SALT: &[u8] = b"vault-session-salt";
const SESSION_INFO: &[u8] = b"vault-session-key";
const WRAP_AAD: &[u8] = b"vault-session-master-key";

/// Persisted session record.
#[derive(Debug, Clone, Serialize, Deserialize)]
struct SessionRecord {
    token_hash: String,
    created_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    encrypted_master_key: String,
}

enum Stored {
    Absent,
    Malformed,
    Record(SessionRecord),
}

/// Outcome of checking a token against the session file.
#[derive(Debug)]
pub enum SessionStatus {
    /// Token matches an unexpired session
    Valid(MasterKey),
    /// No session file exists
    Absent,
    /// The session has expired and was removed
    Expired,
    /// A session exists but the token does not match it
    Mismatch,
    /// The session file cannot be parsed
    Malformed,
}

/// Issues and validates session tokens for one vault.
#[derive(Debug, Clone)]
pub struct SessionManager {
    path: PathBuf,
    timeout_minutes: i64,
}

impl SessionManager {
    /// Session manager storing its record at `path` with the given lifetime.
    ///
    /// Negative lifetimes count as zero. Lifetimes above
    /// [`MAX_SESSION_TIMEOUT_MINUTES`] are rejected when a session is created.
    pub fn new(path: impl Into<PathBuf>, timeout_minutes: i64) -> Self {
        Self {
            path: path.into(),
            timeout_minutes: timeout_minutes.max(0),
        }
    }

    fn timeout(&self) -> Result<Duration> {
        if self.timeout_minutes > MAX_SESSION_TIMEOUT_MINUTES {
            return Err(VaultError::Validation(format!(
                "Session timeout of {} minutes exceeds the maximum of {}",
                self.timeout_minutes, MAX_SESSION_TIMEOUT_MINUTES
            )));
        }
        Duration::try_minutes(self.timeout_minutes).ok_or_else(|| {
            VaultError::Validation(format!(
                "Session timeout of {} minutes is out of range",
                self.timeout_minutes
            ))
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Create a session wrapping `master_key` and return its token.
    ///
    /// Replaces any existing session.
    ///
    /// # Errors
    ///
    /// `VaultError::Validation` unless `master_key` is exactly 32 bytes, or
    /// if the configured lifetime is out of range.
    pub fn create_session(&self, master_key: &[u8]) -> Result<String> {
        let master_key = MasterKey::from_slice(master_key)?;
        let timeout = self.timeout()?;

        let mut token_bytes = Zeroizing::new([0u8; TOKEN_BYTES]);
        getrandom::getrandom(&mut *token_bytes)
            .map_err(|e| VaultError::Crypto(format!("Failed to generate token: {}", e)))?;
        let token = hex::encode(*token_bytes);

        let wrapped = session_cipher(&token)?.encrypt(master_key.as_bytes(), WRAP_AAD)?;
        let created_at = Utc::now();
        let expires_at = created_at
            .checked_add_signed(timeout)
            .ok_or_else(|| VaultError::Validation("Session expiry is out of range".into()))?;
        let record = SessionRecord {
            token_hash: token_hash(&token),
            created_at,
            expires_at,
            encrypted_master_key: STANDARD.encode(wrapped),
        };

        let json = serde_json::to_vec_pretty(&record)?;
        write_atomic_private(&self.path, &json)?;
        info!(expires_at = %record.expires_at, "created session");
        Ok(token)
    }

    /// Classify `token` against the stored session.
    ///
    /// Expired sessions are cleared as a side effect.
    ///
    /// # Errors
    ///
    /// I/O failures other than a missing file, and a session whose hash
    /// matches but whose wrapped key fails to decrypt.
    pub fn check_token(&self, token: &str) -> Result<SessionStatus> {
        let record = match self.read_record()? {
            Stored::Record(record) => record,
            Stored::Malformed => return Ok(SessionStatus::Malformed),
            Stored::Absent => return Ok(SessionStatus::Absent),
        };

        if Utc::now() >= record.expires_at {
            debug!("session expired; clearing");
            self.clear_session()?;
            return Ok(SessionStatus::Expired);
        }

        let presented = token_hash(token);
        if !bool::from(presented.as_bytes().ct_eq(record.token_hash.as_bytes())) {
            return Ok(SessionStatus::Mismatch);
        }

        let wrapped = match STANDARD.decode(record.encrypted_master_key.as_bytes()) {
            Ok(bytes) => bytes,
            Err(_) => return Ok(SessionStatus::Malformed),
        };
        let unwrapped = Zeroizing::new(session_cipher(token)?.decrypt(&wrapped, WRAP_AAD)?);
        let master_key = MasterKey::from_slice(&unwrapped)
            .map_err(|_| VaultError::Decryption("wrapped session key has wrong length".into()))?;
        Ok(SessionStatus::Valid(master_key))
    }

    /// The master key for a valid token, `None` for any other outcome.
    pub fn validate_token(&self, token: &str) -> Result<Option<MasterKey>> {
        match self.check_token(token)? {
            SessionStatus::Valid(key) => Ok(Some(key)),
            _ => Ok(None),
        }
    }

    /// Overwrite the session file with random bytes and remove it.
    /// Idempotent.
    pub fn clear_session(&self) -> Result<()> {
        let len = match std::fs::metadata(&self.path) {
            Ok(meta) => meta.len() as usize,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
            Err(err) => return Err(err.into()),
        };

        match OpenOptions::new().write(true).open(&self.path) {
            Ok(mut file) => {
                let mut noise = vec![0u8; len];
                if getrandom::getrandom(&mut noise).is_ok() {
                    file.write_all(&noise)?;
                    file.sync_all()?;
                }
            }
            Err(err) => warn!("could not overwrite session file: {}", err),
        }

        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                info!("cleared session");
                Ok(())
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    /// True if a parseable, unexpired session exists. Does not check any token.
    pub fn is_active(&self) -> Result<bool> {
        Ok(match self.read_record()? {
            Stored::Record(record) => Utc::now() < record.expires_at,
            _ => false,
        })
    }

    /// Expiry of the stored session, if one is readable.
    pub fn expires_at(&self) -> Result<Option<DateTime<Utc>>> {
        Ok(match self.read_record()? {
            Stored::Record(record) => Some(record.expires_at),
            _ => None,
        })
    }

    fn read_record(&self) -> Result<Stored> {
        let bytes = match std::fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Stored::Absent),
            Err(err) => return Err(err.into()),
        };
        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Stored::Record(record)),
            Err(err) => {
                debug!("malformed session file: {}", err);
                Ok(Stored::Malformed)
            }
        }
    }
}

fn token_hash(token: &str) -> String {
    hex::encode(Sha256::digest(token.as_bytes()))
}

fn session_cipher(token: &str) -> Result<ContentCipher> {
    let hk = Hkdf::<Sha256>::new(Some(SESSION_SALT), token.as_bytes());
    let mut key = Zeroizing::new([0u8; KEY_LEN]);
    hk.expand(SESSION_INFO, &mut *key)
        .map_err(|_| VaultError::Crypto("HKDF expand failed".to_string()))?;
    Ok(ContentCipher::new(&key))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    const KEY: [u8; 32] = [42u8; 32];

    fn manager(dir: &Path, minutes: i64) -> SessionManager {
        SessionManager::new(dir.join(".session"), minutes)
    }

    #[test]
    fn test_create_and_validate() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        let token = sessions.create_session(&KEY).unwrap();

        assert_eq!(token.len(), 64);
        assert!(token.chars().all(|c| c.is_ascii_hexdigit()));
        assert!(sessions.is_active().unwrap());

        let key = sessions.validate_token(&token).unwrap().unwrap();
        assert_eq!(key.as_bytes(), &KEY);
    }

    #[test]
    fn test_session_file_holds_no_secrets() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        let token = sessions.create_session(&KEY).unwrap();

        let contents = std::fs::read_to_string(sessions.path()).unwrap();
        assert!(!contents.contains(&token));
        assert!(!contents.contains(&hex::encode(KEY)));
        let value: serde_json::Value = serde_json::from_str(&contents).unwrap();
        for field in ["token_hash", "created_at", "expires_at", "encrypted_master_key"] {
            assert!(value.get(field).is_some(), "missing {}", field);
        }
    }

    #[cfg(unix)]
    #[test]
    fn test_session_file_permissions() {
        use std::os::unix::fs::PermissionsExt;
        let dir = tempdir().unwrap();
        let sessions = SessionManager::new(dir.path().join("missing").join(".session"), 30);
        sessions.create_session(&KEY).unwrap();
        let mode = std::fs::metadata(sessions.path()).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o600);
    }

    #[test]
    fn test_wrong_key_length_rejected() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        assert!(matches!(
            sessions.create_session(&[1u8; 16]),
            Err(VaultError::Validation(_))
        ));
        assert!(!sessions.path().exists());
    }

    #[test]
    fn test_mismatched_token() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        sessions.create_session(&KEY).unwrap();
        assert!(matches!(
            sessions.check_token(&"0".repeat(64)).unwrap(),
            SessionStatus::Mismatch
        ));
        assert!(sessions.validate_token("nonsense").unwrap().is_none());
    }

    #[test]
    fn test_oversized_timeout_rejected() {
        let dir = tempdir().unwrap();
        for minutes in [MAX_SESSION_TIMEOUT_MINUTES + 1, 1_000_000_000_000, i64::MAX] {
            let sessions = manager(dir.path(), minutes);
            assert!(matches!(
                sessions.create_session(&KEY),
                Err(VaultError::Validation(_))
            ));
            assert!(!sessions.path().exists());
        }

        let sessions = manager(dir.path(), MAX_SESSION_TIMEOUT_MINUTES);
        let token = sessions.create_session(&KEY).unwrap();
        assert!(sessions.validate_token(&token).unwrap().is_some());
    }

    #[test]
    fn test_negative_timeout_counts_as_zero() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), i64::MIN);
        sessions.create_session(&KEY).unwrap();
        assert!(!sessions.is_active().unwrap());
    }

    #[test]
    fn test_zero_timeout_is_expired() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 0);
        let token = sessions.create_session(&KEY).unwrap();

        assert!(!sessions.is_active().unwrap());
        assert!(matches!(
            sessions.check_token(&token).unwrap(),
            SessionStatus::Expired
        ));
        assert!(!sessions.path().exists());
        assert!(sessions.validate_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_absent_and_malformed() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        assert!(matches!(
            sessions.check_token("abc").unwrap(),
            SessionStatus::Absent
        ));

        std::fs::write(sessions.path(), b"{not json").unwrap();
        assert!(matches!(
            sessions.check_token("abc").unwrap(),
            SessionStatus::Malformed
        ));
        assert!(!sessions.is_active().unwrap());
    }

    #[test]
    fn test_clear_is_idempotent() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        let token = sessions.create_session(&KEY).unwrap();

        sessions.clear_session().unwrap();
        sessions.clear_session().unwrap();
        assert!(!sessions.path().exists());
        assert!(!sessions.is_active().unwrap());
        assert!(sessions.validate_token(&token).unwrap().is_none());
    }

    #[test]
    fn test_new_session_replaces_old() {
        let dir = tempdir().unwrap();
        let sessions = manager(dir.path(), 30);
        let first = sessions.create_session(&KEY).unwrap();
        let second = sessions.create_session(&KEY).unwrap();
        assert_ne!(first, second);
        assert!(sessions.validate_token(&first).unwrap().is_none());
        assert!(sessions.validate_token(&second).unwrap().is_some());
    }
}
