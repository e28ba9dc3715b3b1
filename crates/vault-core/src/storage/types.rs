//! Core data types for metadata storage.

use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::VaultError;

/// Who produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Actor {
    User,
    Assistant,
    System,
    Tool,
}

impl Actor {
    pub fn as_str(&self) -> &'static str {
        match self {
            Actor::User => "user",
            Actor::Assistant => "assistant",
            Actor::System => "system",
            Actor::Tool => "tool",
        }
    }
}

impl fmt::Display for Actor {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Actor {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Actor::User),
            "assistant" => Ok(Actor::Assistant),
            "system" => Ok(Actor::System),
            "tool" => Ok(Actor::Tool),
            other => Err(VaultError::Validation(format!("Unknown actor: {}", other))),
        }
    }
}

/// Data classification attached to conversations and messages.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sensitivity {
    Public,
    #[default]
    Internal,
    Confidential,
    Restricted,
}

impl Sensitivity {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sensitivity::Public => "public",
            Sensitivity::Internal => "internal",
            Sensitivity::Confidential => "confidential",
            Sensitivity::Restricted => "restricted",
        }
    }
}

impl fmt::Display for Sensitivity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Sensitivity {
    type Err = VaultError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "public" => Ok(Sensitivity::Public),
            "internal" => Ok(Sensitivity::Internal),
            "confidential" => Ok(Sensitivity::Confidential),
            "restricted" => Ok(Sensitivity::Restricted),
            other => Err(VaultError::Validation(format!(
                "Unknown sensitivity: {}",
                other
            ))),
        }
    }
}

/// A stored conversation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Conversation {
    /// Primary key; equal to the content hash
    pub id: String,

    /// Provider name, e.g. "chatgpt"
    pub source: String,

    /// Provider's own identifier, if the export had one
    pub external_id: Option<String>,

    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sensitivity: Sensitivity,
    pub metadata: serde_json::Value,
    pub message_count: usize,

    /// Deduplication fingerprint
    pub hash: String,

    /// When this row was written
    pub imported_at: DateTime<Utc>,
}

/// A stored message. Its text lives in the blob named by `content_blob_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub conversation_id: String,
    /// Zero-based order within the conversation
    pub position: usize,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub content_blob_id: String,
    pub sensitivity: Sensitivity,
    pub metadata: serde_json::Value,
}

/// Message row to insert. Position is implied by order in
/// [`NewConversation::messages`].
#[derive(Debug, Clone)]
pub struct NewMessage {
    pub id: String,
    pub actor: Actor,
    pub timestamp: DateTime<Utc>,
    pub content_blob_id: String,
    pub metadata: serde_json::Value,
}

/// Builder for a conversation and its messages.
#[derive(Debug, Clone)]
pub struct NewConversation {
    pub id: String,
    pub hash: String,
    pub source: String,
    pub external_id: Option<String>,
    pub title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub sensitivity: Sensitivity,
    pub metadata: serde_json::Value,
    pub messages: Vec<NewMessage>,
}

impl NewConversation {
    /// A conversation keyed by its content hash.
    pub fn new(
        hash: impl Into<String>,
        source: impl Into<String>,
        title: impl Into<String>,
        created_at: DateTime<Utc>,
    ) -> Self {
        let hash = hash.into();
        Self {
            id: hash.clone(),
            hash,
            source: source.into(),
            external_id: None,
            title: title.into(),
            created_at,
            updated_at: created_at,
            sensitivity: Sensitivity::default(),
            metadata: serde_json::Value::Object(Default::default()),
            messages: Vec::new(),
        }
    }

    pub fn with_external_id(mut self, external_id: Option<String>) -> Self {
        self.external_id = external_id;
        self
    }

    pub fn with_updated_at(mut self, updated_at: DateTime<Utc>) -> Self {
        self.updated_at = updated_at;
        self
    }

    pub fn with_metadata(mut self, metadata: serde_json::Value) -> Self {
        self.metadata = metadata;
        self
    }

    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    pub fn push_message(&mut self, message: NewMessage) {
        self.messages.push(message);
    }
}

/// Filter for listing conversations.
#[derive(Debug, Clone, Default)]
pub struct ConversationFilter {
    pub source: Option<String>,
    pub limit: Option<usize>,
    pub offset: Option<usize>,
}

impl ConversationFilter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn source(mut self, source: impl Into<String>) -> Self {
        self.source = Some(source.into());
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    pub fn offset(mut self, offset: usize) -> Self {
        self.offset = Some(offset);
        self
    }
}

/// Conversation count for one source.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceCount {
    pub source: String,
    pub count: usize,
}

/// An audit log entry.
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub id: i64,
    pub timestamp: DateTime<Utc>,
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
}

/// Builder for audit events.
#[derive(Debug, Clone)]
pub struct NewAuditEvent {
    pub action: String,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub details: serde_json::Value,
}

impl NewAuditEvent {
    pub fn new(action: impl Into<String>, resource_type: impl Into<String>) -> Self {
        Self {
            action: action.into(),
            resource_type: resource_type.into(),
            resource_id: None,
            details: serde_json::Value::Object(Default::default()),
        }
    }

    pub fn with_resource_id(mut self, resource_id: impl Into<String>) -> Self {
        self.resource_id = Some(resource_id.into());
        self
    }

    pub fn with_details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}
