//! Error types for vault core operations.
//!
//! Every fallible operation in this crate returns [`Result`]. The CLI maps
//! variants to exit codes; the import pipeline folds per-conversation
//! failures into its report instead of propagating them.

use thiserror::Error;

/// Result type alias for vault operations.
pub type Result<T> = std::result::Result<T, VaultError>;

/// Core error type for vault operations.
#[derive(Debug, Error)]
pub enum VaultError {
    /// Input rejected before any work was done
    #[error("Validation error: {0}")]
    Validation(String),

    /// Ciphertext failed authentication (wrong key, tampering, truncation)
    #[error("Decryption failed: {0}")]
    Decryption(String),

    /// Provider export is structurally invalid
    #[error("Format error: {0}")]
    Format(String),

    /// Resource not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// Passphrase does not match the stored verifier
    #[error("Incorrect passphrase")]
    IncorrectPassphrase,

    /// Key derivation or cipher setup failure
    #[error("Crypto error: {0}")]
    Crypto(String),

    /// Metadata store error (row decoding, poisoned lock, schema)
    #[error("Storage error: {0}")]
    Storage(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Database error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl VaultError {
    /// True for errors caused by bad credentials rather than bad data.
    pub fn is_auth_failure(&self) -> bool {
        matches!(
            self,
            VaultError::IncorrectPassphrase | VaultError::Decryption(_)
        )
    }
}
