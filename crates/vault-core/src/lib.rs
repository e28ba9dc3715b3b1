//! # Vault Core
//!
//! Core library for Vault - a local-first, encrypted archive of LLM
//! conversation exports.
//!
//! ## Architecture
//!
//! - **crypto**: passphrase validation, key hierarchy, AEAD content cipher
//! - **blob**: encrypted content-addressed blob files
//! - **session**: short-lived session tokens wrapping the master key
//! - **storage**: metadata repository trait and SQLite implementation
//! - **ingest**: provider adapters and the import pipeline
//! - **vault**: on-disk layout of a vault root

pub mod blob;
pub mod crypto;
pub mod error;
pub mod fs;
pub mod ingest;
pub mod session;
pub mod storage;
pub mod vault;

pub use blob::BlobStore;
pub use crypto::{ConversationKey, KdfParams, KeyManager, MasterKey};
pub use error::{Result, VaultError};
pub use ingest::{import_conversations, ImportOptions, ImportResult, ProviderAdapter};
pub use session::{SessionManager, SessionStatus};
pub use storage::{MetadataStore, SqliteStore};
pub use vault::VaultPaths;

/// Core version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
