use std::sync::Arc;

use serde_json::json;
use vault_core::{BlobStore, MetadataStore};

use crate::app::AppContext;
use crate::cli::StatsArgs;
use crate::output::{color_enabled, format_bytes, format_timestamp, kv, table};

pub fn handle_stats(ctx: &AppContext, args: &StatsArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;
    let conversations = store.count_conversations()?;
    let messages = store.count_messages()?;
    let sources = store.source_counts()?;
    let (oldest, newest) = store.date_range()?;
    // Blob sizes need no key; the manager only supplies the layout.
    let blob_bytes = BlobStore::new(Arc::new(ctx.key_manager())).total_size()?;
    let session_active = ctx.sessions().is_active()?;

    if args.json {
        let output = json!({
            "conversations": conversations,
            "messages": messages,
            "sources": sources,
            "oldest": oldest,
            "newest": newest,
            "blob_bytes": blob_bytes,
            "session_active": session_active,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let color = color_enabled();
    println!("{}", kv(color, "Vault", &ctx.paths().root().display().to_string()));
    println!("{}", kv(color, "Conversations", &conversations.to_string()));
    println!("{}", kv(color, "Messages", &messages.to_string()));
    println!("{}", kv(color, "Encrypted content", &format_bytes(blob_bytes)));
    let range = match (oldest, newest) {
        (Some(oldest), Some(newest)) => format!(
            "{} .. {}",
            format_timestamp(&oldest),
            format_timestamp(&newest)
        ),
        _ => "-".to_string(),
    };
    println!("{}", kv(color, "Date range", &range));
    println!(
        "{}",
        kv(
            color,
            "Session",
            if session_active { "active" } else { "locked" }
        )
    );

    if !sources.is_empty() {
        let mut rows = table(&["Source", "Conversations"]);
        for source in &sources {
            rows.add_row(vec![source.source.clone(), source.count.to_string()]);
        }
        println!("{}", rows);
    }
    Ok(())
}
