use serde::Serialize;
use serde_json::json;
use tracing::warn;
use vault_core::storage::{Actor, NewAuditEvent};
use vault_core::MetadataStore;

use crate::app::AppContext;
use crate::cli::ShowArgs;
use crate::errors::CliError;
use crate::output::{bold, color_enabled, format_timestamp, kv};

#[derive(Serialize)]
struct ShownMessage {
    actor: Actor,
    timestamp: String,
    content: String,
}

pub fn handle_show(ctx: &AppContext, args: &ShowArgs) -> anyhow::Result<()> {
    let vault = ctx.unlock()?;
    let conversation = vault
        .store
        .find_conversation_by_prefix(&args.id)?
        .ok_or_else(|| {
            CliError::not_found(
                format!("Conversation not found (or ambiguous): {}", args.id),
                "Hint: Run `vault list` to find conversation IDs.",
            )
        })?;

    let cipher = vault
        .keys
        .cipher(&vault.master_key, &conversation.id)?;
    let mut messages = Vec::new();
    for message in vault.store.get_messages(&conversation.id)? {
        let plaintext = vault
            .blobs
            .retrieve_with_cipher(&cipher, &message.content_blob_id)?;
        messages.push(ShownMessage {
            actor: message.actor,
            timestamp: message.timestamp.to_rfc3339(),
            content: String::from_utf8_lossy(&plaintext).into_owned(),
        });
    }

    let event = NewAuditEvent::new("read", "conversation")
        .with_resource_id(conversation.id.as_str())
        .with_details(json!({ "messages": messages.len() }));
    if let Err(err) = vault.store.record_audit_event(&event) {
        warn!("failed to record read audit event: {}", err);
    }

    if args.json {
        let output = json!({
            "conversation": conversation,
            "messages": messages,
        });
        println!("{}", serde_json::to_string_pretty(&output)?);
        return Ok(());
    }

    let color = color_enabled();
    if !ctx.quiet() {
        println!("{}", bold(color, &conversation.title));
        println!("{}", kv(color, "ID", &conversation.id));
        println!("{}", kv(color, "Source", &conversation.source));
        println!(
            "{}",
            kv(color, "Created", &format_timestamp(&conversation.created_at))
        );
        println!("{}", kv(color, "Messages", &messages.len().to_string()));
        println!();
    }
    for message in &messages {
        println!("{}", bold(color, &format!("[{}]", message.actor)));
        println!("{}", message.content);
        println!();
    }
    Ok(())
}
