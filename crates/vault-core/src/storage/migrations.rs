//! Version-tracked schema migrations.
//!
//! Each migration runs in its own transaction together with the row that
//! records it in `schema_version`, so a crash never leaves a half-applied
//! version behind.

use chrono::Utc;
use rusqlite::{Connection, OptionalExtension};
use tracing::info;

use crate::error::Result;

/// One schema step.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations in ascending version order.
pub const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "conversations and messages",
        sql: r#"
            CREATE TABLE conversations (
                id TEXT PRIMARY KEY,
                source TEXT NOT NULL,
                external_id TEXT,
                title TEXT NOT NULL,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                sensitivity TEXT NOT NULL DEFAULT 'internal',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                message_count INTEGER NOT NULL DEFAULT 0,
                hash TEXT NOT NULL UNIQUE,
                imported_at TEXT NOT NULL
            );

            CREATE INDEX idx_conversations_source ON conversations(source);
            CREATE INDEX idx_conversations_created_at ON conversations(created_at);

            CREATE TABLE messages (
                id TEXT PRIMARY KEY,
                conversation_id TEXT NOT NULL
                    REFERENCES conversations(id) ON DELETE CASCADE,
                position INTEGER NOT NULL,
                actor TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                content_blob_id TEXT NOT NULL,
                sensitivity TEXT NOT NULL DEFAULT 'internal',
                metadata_json TEXT NOT NULL DEFAULT '{}',
                UNIQUE (conversation_id, position)
            );

            CREATE INDEX idx_messages_conversation ON messages(conversation_id);
        "#,
    },
    Migration {
        version: 2,
        description: "audit events",
        sql: r#"
            CREATE TABLE audit_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                action TEXT NOT NULL,
                resource_type TEXT NOT NULL,
                resource_id TEXT,
                details_json TEXT NOT NULL DEFAULT '{}'
            );

            CREATE INDEX idx_audit_events_timestamp ON audit_events(timestamp);
        "#,
    },
];

/// Highest migration version in this build.
pub fn latest_version() -> u32 {
    MIGRATIONS.last().map(|m| m.version).unwrap_or(0)
}

/// Schema version recorded in the database; 0 for a fresh database.
pub fn current_version(conn: &Connection) -> Result<u32> {
    let has_table: Option<String> = conn
        .query_row(
            "SELECT name FROM sqlite_master WHERE type = 'table' AND name = 'schema_version'",
            [],
            |row| row.get(0),
        )
        .optional()?;
    if has_table.is_none() {
        return Ok(0);
    }
    let version: i64 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM schema_version",
        [],
        |row| row.get(0),
    )?;
    Ok(version as u32)
}

pub fn needs_migration(conn: &Connection) -> Result<bool> {
    Ok(current_version(conn)? < latest_version())
}

/// Apply every pending migration. Returns the versions applied.
pub fn apply_migrations(conn: &mut Connection) -> Result<Vec<u32>> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS schema_version (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL
        );
        "#,
    )?;

    let current = current_version(conn)?;
    let mut applied = Vec::new();
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.transaction()?;
        tx.execute_batch(migration.sql)?;
        tx.execute(
            "INSERT INTO schema_version (version, description, applied_at) VALUES (?1, ?2, ?3)",
            (
                migration.version,
                migration.description,
                Utc::now().to_rfc3339(),
            ),
        )?;
        tx.commit()?;
        info!(
            version = migration.version,
            description = migration.description,
            "applied migration"
        );
        applied.push(migration.version);
    }
    Ok(applied)
}
