pub mod completions;
pub mod import;
pub mod init;
pub mod list;
pub mod lock;
pub mod show;
pub mod stats;
pub mod unlock;

pub use completions::handle_completions;
pub use import::handle_import;
pub use init::handle_init;
pub use list::handle_list;
pub use lock::handle_lock;
pub use show::handle_show;
pub use stats::handle_stats;
pub use unlock::handle_unlock;

use chrono::{DateTime, Utc};

use crate::constants::SESSION_TOKEN_ENV;

/// The shell line users paste to carry a session into later commands.
pub(crate) fn token_export_line(token: &str) -> String {
    format!("export {}={}", SESSION_TOKEN_ENV, token)
}

pub(crate) fn print_session(quiet: bool, token: &str, expires_at: Option<DateTime<Utc>>) {
    if quiet {
        println!("{}", token_export_line(token));
        return;
    }
    if let Some(expires_at) = expires_at {
        println!("Session valid until {}.", expires_at.format("%Y-%m-%d %H:%M:%S UTC"));
    }
    println!("Run the following to skip the passphrase prompt:");
    println!();
    println!("  {}", token_export_line(token));
}
