//! Vault CLI - a local-first, encrypted archive of LLM conversations
//!
//! Thin command layer over `vault-core`: resolves configuration, prompts
//! for passphrases, and renders results.

mod app;
mod cli;
mod commands;
mod config;
mod constants;
mod errors;
mod helpers;
mod output;

use clap::Parser;
use tracing_subscriber::EnvFilter;

use app::AppContext;
use cli::{Cli, Commands};

fn main() {
    let cli = Cli::parse();
    init_logging(cli.verbose);

    if let Err(err) = run(&cli) {
        eprintln!("Error: {}", err);
        std::process::exit(errors::exit_code_for(&err));
    }
}

/// Log to stderr; `RUST_LOG` overrides the level chosen by `--verbose`.
fn init_logging(verbose: bool) {
    let level = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(format!("vault_core={level},vault={level}")));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn run(cli: &Cli) -> anyhow::Result<()> {
    if let Commands::Completions { shell } = &cli.command {
        return commands::handle_completions(*shell);
    }

    let ctx = AppContext::new(cli)?;
    match &cli.command {
        Commands::Init(args) => commands::handle_init(&ctx, args),
        Commands::Unlock => commands::handle_unlock(&ctx),
        Commands::Lock => commands::handle_lock(&ctx),
        Commands::Import(args) => commands::handle_import(&ctx, args),
        Commands::List(args) => commands::handle_list(&ctx, args),
        Commands::Show(args) => commands::handle_show(&ctx, args),
        Commands::Stats(args) => commands::handle_stats(&ctx, args),
        Commands::Completions { .. } => Ok(()),
    }
}
