//! Metadata repository interface.
//!
//! The import pipeline and the CLI only talk to metadata through these
//! traits. Implementations must make [`MetadataTransaction`] atomic: either
//! every row of a conversation is visible after `commit`, or none is.

use chrono::{DateTime, Utc};

use super::types::{
    AuditEvent, Conversation, ConversationFilter, Message, NewAuditEvent, NewConversation,
    SourceCount,
};
use crate::error::Result;

/// Repository for conversation metadata.
pub trait MetadataStore: Send + Sync {
    /// True if a conversation with this content hash is already stored.
    fn conversation_exists(&self, hash: &str) -> Result<bool>;

    /// Get a conversation by exact id.
    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>>;

    /// Resolve a full id or unique id prefix.
    ///
    /// Returns `None` when nothing matches or the prefix is ambiguous.
    fn find_conversation_by_prefix(&self, prefix: &str) -> Result<Option<Conversation>>;

    /// List conversations, newest first.
    fn list_conversations(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>>;

    fn count_conversations(&self) -> Result<usize>;

    fn count_messages(&self) -> Result<usize>;

    /// Messages of one conversation in stored order.
    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>>;

    /// Conversation counts per source, largest first.
    fn source_counts(&self) -> Result<Vec<SourceCount>>;

    /// Oldest and newest conversation creation times.
    fn date_range(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)>;

    fn record_audit_event(&self, event: &NewAuditEvent) -> Result<()>;

    /// Most recent audit events first.
    fn list_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>>;

    /// Begin a write transaction.
    ///
    /// Dropping the returned transaction without committing rolls it back.
    fn begin(&self) -> Result<Box<dyn MetadataTransaction + '_>>;

    /// Insert one conversation in its own transaction.
    fn add_conversation(&self, conversation: &NewConversation) -> Result<()> {
        let mut tx = self.begin()?;
        tx.add_conversation(conversation)?;
        tx.commit()
    }
}

/// An open write transaction.
pub trait MetadataTransaction {
    /// Insert a conversation row and its message rows.
    ///
    /// # Errors
    ///
    /// Fails if the id or hash already exists.
    fn add_conversation(&mut self, conversation: &NewConversation) -> Result<()>;

    fn commit(self: Box<Self>) -> Result<()>;

    fn rollback(self: Box<Self>) -> Result<()>;
}
