use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};
use vault_core::VERSION;

/// Vault - a local-first, encrypted archive of your LLM conversations
#[derive(Parser)]
#[command(name = "vault")]
#[command(author, version = VERSION, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Path to the vault directory
    #[arg(short = 'p', long, global = true, env = "VAULT_PATH")]
    pub vault_path: Option<PathBuf>,

    /// Quiet mode (minimal output)
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// Verbose logging to stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    #[command(subcommand)]
    pub command: Commands,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Create a new vault protected by a passphrase
    Init(InitArgs),

    /// Verify the passphrase and start a session
    Unlock,

    /// End the current session
    Lock,

    /// Import a provider export file
    Import(ImportArgs),

    /// List stored conversations
    List(ListArgs),

    /// Decrypt and print one conversation
    Show(ShowArgs),

    /// Show vault statistics
    Stats(StatsArgs),

    /// Generate shell completions
    Completions {
        /// Shell to generate completions for
        #[arg(value_enum)]
        shell: clap_complete::Shell,
    },
}

#[derive(Args)]
pub struct InitArgs {
    /// Reinitialize an existing vault (existing content becomes unreadable)
    #[arg(long)]
    pub force: bool,
}

#[derive(Args)]
pub struct ImportArgs {
    /// Provider that produced the export (e.g. chatgpt)
    #[arg(value_name = "PROVIDER")]
    pub provider: String,

    /// Path to the export file
    #[arg(value_name = "FILE")]
    pub file: PathBuf,

    /// Sensitivity label for imported conversations
    #[arg(long, value_name = "LEVEL")]
    pub sensitivity: Option<String>,
}

#[derive(Args)]
pub struct ListArgs {
    /// Only conversations from this provider
    #[arg(long)]
    pub source: Option<String>,

    /// Maximum number of conversations
    #[arg(long)]
    pub limit: Option<usize>,

    /// Skip this many conversations
    #[arg(long, default_value_t = 0)]
    pub offset: usize,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct ShowArgs {
    /// Conversation id or unique prefix
    #[arg(value_name = "ID")]
    pub id: String,

    /// Output JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Args)]
pub struct StatsArgs {
    /// Output JSON
    #[arg(long)]
    pub json: bool,
}
