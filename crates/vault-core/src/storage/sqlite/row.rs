//! Raw row types for database queries.

use chrono::{DateTime, Datelike, SecondsFormat, Utc};

use crate::error::{Result, VaultError};
use crate::storage::types::{AuditEvent, Conversation, Message};

/// Fixed-width UTC form so lexical order equals time order.
pub(super) fn format_timestamp(ts: &DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// Like [`format_timestamp`], rejecting years that do not fit four digits.
pub(super) fn storable_timestamp(ts: &DateTime<Utc>) -> Result<String> {
    if !(0..=9999).contains(&ts.year()) {
        return Err(VaultError::Validation(format!(
            "Timestamp {} is outside years 0000-9999",
            ts
        )));
    }
    Ok(format_timestamp(ts))
}

pub(super) fn parse_timestamp(value: &str) -> Result<DateTime<Utc>> {
    Ok(DateTime::parse_from_rfc3339(value)
        .map_err(|e| VaultError::Storage(format!("Invalid timestamp {:?}: {}", value, e)))?
        .with_timezone(&Utc))
}

fn parse_json(value: &str) -> Result<serde_json::Value> {
    serde_json::from_str(value).map_err(|e| VaultError::Storage(format!("Invalid JSON: {}", e)))
}

pub(super) const CONVERSATION_COLUMNS: &str = "id, source, external_id, title, created_at, \
     updated_at, sensitivity, metadata_json, message_count, hash, imported_at";

/// Raw row data from the conversations table.
#[derive(Debug)]
pub struct ConversationRow {
    pub id: String,
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub created_at: String,
    pub updated_at: String,
    pub sensitivity: String,
    pub metadata_json: String,
    pub message_count: i64,
    pub hash: String,
    pub imported_at: String,
}

impl ConversationRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            source: row.get(1)?,
            external_id: row.get(2)?,
            title: row.get(3)?,
            created_at: row.get(4)?,
            updated_at: row.get(5)?,
            sensitivity: row.get(6)?,
            metadata_json: row.get(7)?,
            message_count: row.get(8)?,
            hash: row.get(9)?,
            imported_at: row.get(10)?,
        })
    }
}

impl TryFrom<ConversationRow> for Conversation {
    type Error = VaultError;

    fn try_from(row: ConversationRow) -> Result<Self> {
        Ok(Conversation {
            created_at: parse_timestamp(&row.created_at)?,
            updated_at: parse_timestamp(&row.updated_at)?,
            imported_at: parse_timestamp(&row.imported_at)?,
            sensitivity: row
                .sensitivity
                .parse()
                .map_err(|e: VaultError| VaultError::Storage(e.to_string()))?,
            metadata: parse_json(&row.metadata_json)?,
            message_count: usize::try_from(row.message_count)
                .map_err(|_| VaultError::Storage("Negative message count".to_string()))?,
            id: row.id,
            source: row.source,
            external_id: row.external_id,
            title: row.title,
            hash: row.hash,
        })
    }
}

pub(super) const MESSAGE_COLUMNS: &str = "id, conversation_id, position, actor, timestamp, \
     content_blob_id, sensitivity, metadata_json";

/// Raw row data from the messages table.
#[derive(Debug)]
pub struct MessageRow {
    pub id: String,
    pub conversation_id: String,
    pub position: i64,
    pub actor: String,
    pub timestamp: String,
    pub content_blob_id: String,
    pub sensitivity: String,
    pub metadata_json: String,
}

impl MessageRow {
    pub fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            conversation_id: row.get(1)?,
            position: row.get(2)?,
            actor: row.get(3)?,
            timestamp: row.get(4)?,
            content_blob_id: row.get(5)?,
            sensitivity: row.get(6)?,
            metadata_json: row.get(7)?,
        })
    }
}

impl TryFrom<MessageRow> for Message {
    type Error = VaultError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Message {
            position: usize::try_from(row.position)
                .map_err(|_| VaultError::Storage("Negative message position".to_string()))?,
            actor: row
                .actor
                .parse()
                .map_err(|e: VaultError| VaultError::Storage(e.to_string()))?,
            timestamp: parse_timestamp(&row.timestamp)?,
            sensitivity: row
                .sensitivity
                .parse()
                .map_err(|e: VaultError| VaultError::Storage(e.to_string()))?,
            metadata: parse_json(&row.metadata_json)?,
            id: row.id,
            conversation_id: row.conversation_id,
            content_blob_id: row.content_blob_id,
        })
    }
}

/// Raw row data from the audit_events table.
#[derive(Debug)]
pub struct AuditRow {
    pub id: i64,
    pub timestamp: String,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details_json: String,
}

impl TryFrom<AuditRow> for AuditEvent {
    type Error = VaultError;

    fn try_from(row: AuditRow) -> Result<Self> {
        Ok(AuditEvent {
            id: row.id,
            timestamp: parse_timestamp(&row.timestamp)?,
            details: parse_json(&row.details_json)?,
            action: row.action,
            resource_type: row.resource_type,
            resource_id: row.resource_id,
        })
    }
}
