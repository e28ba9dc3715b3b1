use std::path::Path;

use tracing::{info, warn};
use vault_core::crypto::{passphrase_strength, validate_passphrase, Strength};
use vault_core::{SqliteStore, VaultPaths};

use crate::app::AppContext;
use crate::cli::InitArgs;
use crate::config::{write_config, VaultConfig};
use crate::errors::CliError;
use crate::helpers::{is_interactive, prompt_init_passphrase};
use crate::output::{badge, color_enabled, kv, Badge};

use super::print_session;

pub fn handle_init(ctx: &AppContext, args: &InitArgs) -> anyhow::Result<()> {
    let paths = ctx.paths();
    let reinitialize = paths.is_initialized();
    if reinitialize && !args.force {
        return Err(CliError::invalid_input(format!(
            "Vault already initialized at {}\nHint: Pass --force to reinitialize (existing content will be removed).",
            paths.root().display()
        ))
        .into());
    }

    // Nothing is removed until the new passphrase has been accepted.
    let passphrase = prompt_init_passphrase(is_interactive())?;
    validate_passphrase(&passphrase).map_err(|e| CliError::invalid_input(e.to_string()))?;
    let strength = passphrase_strength(&passphrase);

    if reinitialize {
        remove_vault_state(paths)?;
        warn!(root = %paths.root().display(), "removed existing vault state");
    }
    paths.ensure_layout()?;
    let keys = ctx.key_manager();
    let master_key = keys.initialize(&passphrase)?;
    SqliteStore::open(&paths.database())?;

    let sessions = ctx.sessions();
    let token = sessions.create_session(master_key.as_bytes())?;
    let expires_at = sessions.expires_at()?;

    if !ctx.config_path().exists() {
        write_config(ctx.config_path(), &VaultConfig::new(paths.root()))?;
    }
    info!(root = %paths.root().display(), "vault initialized");

    if !ctx.quiet() {
        let color = color_enabled();
        println!(
            "{}",
            badge(
                color,
                Badge::Ok,
                &format!("Vault initialized at {}", paths.root().display())
            )
        );
        println!("{}", kv(color, "Passphrase strength", strength.as_str()));
        if strength == Strength::Weak {
            println!(
                "{}",
                badge(
                    color,
                    Badge::Warn,
                    "Consider a longer passphrase mixing letters, digits and symbols."
                )
            );
        }
        println!();
    }
    print_session(ctx.quiet(), &token, expires_at);
    Ok(())
}

/// Remove everything that depends on the old master key.
fn remove_vault_state(paths: &VaultPaths) -> anyhow::Result<()> {
    for file in [paths.verifier(), paths.salt(), paths.session()] {
        remove_file_if_exists(&file)?;
    }
    let database = paths.database();
    for suffix in ["", "-wal", "-shm"] {
        let mut name = database.clone().into_os_string();
        name.push(suffix);
        remove_file_if_exists(Path::new(&name))?;
    }
    let blobs = paths.blobs();
    if blobs.exists() {
        std::fs::remove_dir_all(&blobs).map_err(|e| {
            anyhow::anyhow!("Failed to remove blob directory {}: {}", blobs.display(), e)
        })?;
    }
    Ok(())
}

fn remove_file_if_exists(path: &Path) -> anyhow::Result<()> {
    match std::fs::remove_file(path) {
        Ok(()) => Ok(()),
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
        Err(e) => Err(anyhow::anyhow!("Failed to remove {}: {}", path.display(), e)),
    }
}
