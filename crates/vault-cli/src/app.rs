//! Application context for the Vault CLI.
//!
//! Resolves configuration and the vault root once, then hands out the core
//! components each command needs.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::debug;
use vault_core::session::MAX_SESSION_TIMEOUT_MINUTES;
use vault_core::{
    BlobStore, KeyManager, MasterKey, SessionManager, SessionStatus, SqliteStore, VaultError,
    VaultPaths,
};

use crate::cli::Cli;
use crate::config::{default_config_path, default_vault_root, load_config, VaultConfig};
use crate::constants::{PASSPHRASE_ENV, SESSION_TOKEN_ENV};
use crate::errors::CliError;
use crate::helpers::{is_interactive, prompt_passphrase};

const MAX_PASSPHRASE_ATTEMPTS: usize = 3;

pub struct AppContext<'a> {
    cli: &'a Cli,
    config_path: PathBuf,
    config: VaultConfig,
    paths: VaultPaths,
}

/// An unlocked vault: stores plus the master key.
pub struct UnlockedVault {
    pub keys: Arc<KeyManager>,
    pub blobs: BlobStore,
    pub store: SqliteStore,
    pub master_key: MasterKey,
}

impl<'a> AppContext<'a> {
    pub fn new(cli: &'a Cli) -> anyhow::Result<Self> {
        let config_path = default_config_path()?;
        let config = load_config(&config_path)?;
        let timeout = config.security.session_timeout_minutes;
        if !(0..=MAX_SESSION_TIMEOUT_MINUTES).contains(&timeout) {
            return Err(CliError::invalid_input(format!(
                "Invalid session_timeout_minutes = {} in {} (expected 0..={})",
                timeout,
                config_path.display(),
                MAX_SESSION_TIMEOUT_MINUTES
            ))
            .into());
        }
        let root = match (&cli.vault_path, &config.vault.root) {
            (Some(path), _) => path.clone(),
            (None, Some(root)) => PathBuf::from(root),
            (None, None) => default_vault_root()?,
        };
        debug!(root = %root.display(), config = %config_path.display(), "resolved vault root");
        Ok(Self {
            cli,
            config_path,
            config,
            paths: VaultPaths::new(root),
        })
    }

    pub fn quiet(&self) -> bool {
        self.cli.quiet
    }

    pub fn paths(&self) -> &VaultPaths {
        &self.paths
    }

    pub fn config_path(&self) -> &Path {
        &self.config_path
    }

    pub fn key_manager(&self) -> KeyManager {
        KeyManager::new(self.paths.root())
    }

    pub fn sessions(&self) -> SessionManager {
        SessionManager::new(
            self.paths.session(),
            self.config.security.session_timeout_minutes,
        )
    }

    /// Fail with NOT_FOUND unless the vault root has been initialized.
    pub fn require_vault(&self) -> anyhow::Result<()> {
        if self.paths.is_initialized() {
            return Ok(());
        }
        Err(CliError::not_found(
            format!("No vault found at {}", self.paths.root().display()),
            "Hint: Run `vault init` to create one, or pass --vault-path.",
        )
        .into())
    }

    /// Open the metadata store without unlocking anything.
    pub fn open_store(&self) -> anyhow::Result<SqliteStore> {
        self.require_vault()?;
        Ok(SqliteStore::open(&self.paths.database())?)
    }

    /// Resolve the master key and open every store.
    pub fn unlock(&self) -> anyhow::Result<UnlockedVault> {
        self.require_vault()?;
        let keys = Arc::new(self.key_manager());
        let master_key = self.resolve_master_key(&keys)?;
        let store = SqliteStore::open(&self.paths.database())?;
        let blobs = BlobStore::new(Arc::clone(&keys));
        Ok(UnlockedVault {
            keys,
            blobs,
            store,
            master_key,
        })
    }

    /// A valid session token wins; otherwise fall back to the passphrase.
    fn resolve_master_key(&self, keys: &KeyManager) -> anyhow::Result<MasterKey> {
        if let Some(token) = std::env::var(SESSION_TOKEN_ENV)
            .ok()
            .filter(|value| !value.trim().is_empty())
        {
            match self.sessions().check_token(token.trim())? {
                SessionStatus::Valid(master_key) => {
                    debug!("using session token");
                    return Ok(master_key);
                }
                SessionStatus::Expired => {
                    if !self.quiet() {
                        eprintln!("Session expired; falling back to passphrase.");
                    }
                }
                other => debug!(status = ?other, "session token not accepted"),
            }
        }
        self.unlock_with_passphrase(keys)
    }

    /// Prompt for the passphrase, retrying interactively on a mismatch.
    pub fn unlock_with_passphrase(&self, keys: &KeyManager) -> anyhow::Result<MasterKey> {
        let interactive = is_interactive();
        let attempts = if interactive && std::env::var(PASSPHRASE_ENV).is_err() {
            MAX_PASSPHRASE_ATTEMPTS
        } else {
            1
        };

        for attempt in 1..=attempts {
            let passphrase = prompt_passphrase(interactive)?;
            match keys.unlock(&passphrase) {
                Ok(master_key) => return Ok(master_key),
                Err(VaultError::IncorrectPassphrase) if attempt < attempts => {
                    eprintln!("Incorrect passphrase. Try again.");
                }
                Err(VaultError::IncorrectPassphrase) => break,
                Err(err) => return Err(err.into()),
            }
        }

        Err(CliError::auth_failed_with_hint(
            "Incorrect passphrase.",
            format!(
                "Hint: Check the passphrase (or {}) and try again.",
                PASSPHRASE_ENV
            ),
        )
        .into())
    }
}
