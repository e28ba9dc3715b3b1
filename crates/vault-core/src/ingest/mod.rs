//! Provider export ingestion.
//!
//! A [`ProviderAdapter`] turns one provider's export file into
//! [`ParsedConversation`]s; [`import_conversations`] deduplicates, encrypts
//! and persists them.

mod chatgpt;
mod pipeline;

use std::collections::HashSet;
use std::path::Path;

use chrono::{DateTime, Datelike, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::error::Result;
use crate::storage::Actor;

pub use chatgpt::ChatGptAdapter;
pub use pipeline::{import_conversations, ImportOptions, ImportPipeline, ImportResult};

/// One message in provider-agnostic form.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedMessage {
    /// Provider's id for the message; may be empty
    pub external_id: String,
    pub actor: Actor,
    pub content: String,
    pub timestamp: DateTime<Utc>,
    pub metadata: serde_json::Value,
}

/// One conversation in provider-agnostic form, messages in display order.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ParsedConversation {
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub messages: Vec<ParsedMessage>,
    pub metadata: serde_json::Value,
}

impl ParsedConversation {
    /// Deduplication fingerprint; see [`content_hash`].
    pub fn content_hash(&self) -> String {
        content_hash(&self.source, &self.title, &self.created_at)
    }
}

/// Lowercase hex SHA-256 of `"{source}:{title}:{created_at RFC3339}"`.
pub fn content_hash(source: &str, title: &str, created_at: &DateTime<Utc>) -> String {
    let canonical = format!("{}:{}:{}", source, title, created_at.to_rfc3339());
    hex::encode(Sha256::digest(canonical.as_bytes()))
}

/// Parses one provider's export format.
pub trait ProviderAdapter: Send + Sync {
    /// Short lowercase name stored as the conversation source.
    fn provider_name(&self) -> &'static str;

    /// Cheap structural check. Never errors; unreadable files are `false`.
    fn validate_format(&self, path: &Path) -> bool;

    /// Parse the export into conversations.
    ///
    /// # Errors
    ///
    /// - `VaultError::NotFound` if the file does not exist
    /// - `VaultError::Format` if the file is too large or structurally invalid
    fn parse(&self, path: &Path) -> Result<Vec<ParsedConversation>>;
}

/// Names accepted by [`adapter_for`].
pub const PROVIDERS: &[&str] = &["chatgpt"];

/// Look up an adapter by provider name (case-insensitive).
pub fn adapter_for(name: &str) -> Option<Box<dyn ProviderAdapter>> {
    match name.to_ascii_lowercase().as_str() {
        "chatgpt" => Some(Box::new(ChatGptAdapter::new())),
        _ => None,
    }
}

/// Drop repeated messages, keyed on actor, timestamp and the first 100
/// characters of content. Keeps the first occurrence and the original order.
pub fn dedup_messages(messages: Vec<ParsedMessage>) -> Vec<ParsedMessage> {
    let mut seen = HashSet::new();
    messages
        .into_iter()
        .filter(|msg| {
            let prefix: String = msg.content.chars().take(100).collect();
            seen.insert((msg.actor, msg.timestamp, prefix))
        })
        .collect()
}

/// Interpret a JSON timestamp: epoch seconds (number or numeric string) or
/// an RFC 3339 string. `None` for null, missing or unparseable values, and
/// for instants outside years 0000-9999 (e.g. epoch milliseconds).
pub fn parse_timestamp(value: Option<&serde_json::Value>) -> Option<DateTime<Utc>> {
    let parsed = match value? {
        serde_json::Value::Number(n) => n.as_f64().and_then(epoch_seconds),
        serde_json::Value::String(s) => DateTime::parse_from_rfc3339(s)
            .map(|dt| dt.with_timezone(&Utc))
            .ok()
            .or_else(|| s.trim().parse::<f64>().ok().and_then(epoch_seconds)),
        _ => None,
    };
    parsed.filter(|dt| (0..=9999).contains(&dt.year()))
}

fn epoch_seconds(secs: f64) -> Option<DateTime<Utc>> {
    if !secs.is_finite() {
        return None;
    }
    let whole = secs.floor();
    let nanos = ((secs - whole) * 1e9).round().min(999_999_999.0) as u32;
    DateTime::from_timestamp(whole as i64, nanos)
}
