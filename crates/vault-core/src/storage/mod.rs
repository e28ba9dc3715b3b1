//! Metadata storage.
//!
//! Conversation and message metadata live in a relational store behind the
//! [`MetadataStore`] trait. Content never does: messages reference encrypted
//! blobs by id.

pub mod migrations;
mod sqlite;
mod traits;
mod types;

pub use sqlite::SqliteStore;
pub use traits::{MetadataStore, MetadataTransaction};
pub use types::{
    Actor, AuditEvent, Conversation, ConversationFilter, Message, NewAuditEvent, NewConversation,
    NewMessage, Sensitivity, SourceCount,
};
