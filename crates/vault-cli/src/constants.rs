//! Constants used throughout the CLI.

/// Exit codes for the CLI.
///
/// - 0: Success
/// - 1: General error (unclassified failures)
/// - 2: Usage error (reported by clap)
/// - 3+: Application-specific errors
pub mod exit_codes {
    /// Vault, conversation or export file not found.
    pub const NOT_FOUND: i32 = 3;

    /// Invalid user input, passphrase policy or export format.
    pub const INVALID_INPUT: i32 = 4;

    /// Wrong passphrase or undecryptable content.
    pub const AUTH_FAILED: i32 = 5;

    /// At least one conversation failed to import.
    pub const IMPORT_FAILED: i32 = 6;
}

/// Environment variable carrying the passphrase for non-interactive use.
pub const PASSPHRASE_ENV: &str = "VAULT_PASSPHRASE";

/// Environment variable carrying a session token from `vault unlock`.
pub const SESSION_TOKEN_ENV: &str = "VAULT_SESSION_TOKEN";

/// Environment variable overriding the config file location.
pub const CONFIG_ENV: &str = "VAULT_CONFIG";

/// Default page size for `vault list`.
pub const DEFAULT_LIST_LIMIT: usize = 20;
