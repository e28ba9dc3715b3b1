use vault_core::storage::ConversationFilter;
use vault_core::MetadataStore;

use crate::app::AppContext;
use crate::cli::ListArgs;
use crate::constants::DEFAULT_LIST_LIMIT;
use crate::output::{format_timestamp, short_id, table, truncate};

pub fn handle_list(ctx: &AppContext, args: &ListArgs) -> anyhow::Result<()> {
    let store = ctx.open_store()?;

    let mut filter = ConversationFilter::new()
        .limit(args.limit.unwrap_or(DEFAULT_LIST_LIMIT))
        .offset(args.offset);
    if let Some(source) = &args.source {
        filter = filter.source(source.to_ascii_lowercase());
    }
    let conversations = store.list_conversations(&filter)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&conversations)?);
        return Ok(());
    }

    if conversations.is_empty() {
        if !ctx.quiet() {
            println!("No conversations found.");
        }
        return Ok(());
    }

    if ctx.quiet() {
        for conversation in &conversations {
            println!("{}", conversation.id);
        }
        return Ok(());
    }

    let mut rows = table(&["ID", "Created", "Source", "Messages", "Title"]);
    for conversation in &conversations {
        rows.add_row(vec![
            short_id(&conversation.id).to_string(),
            format_timestamp(&conversation.created_at),
            conversation.source.clone(),
            conversation.message_count.to_string(),
            truncate(&conversation.title, 60),
        ]);
    }
    println!("{}", rows);
    Ok(())
}
