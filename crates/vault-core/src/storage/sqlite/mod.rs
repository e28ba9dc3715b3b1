//! SQLite metadata store.
//!
//! One connection behind a mutex. Write transactions hold the lock for
//! their whole lifetime, so transactions from different threads serialize.

mod row;

use std::path::Path;
use std::sync::{Mutex, MutexGuard};

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};
use tracing::debug;
use uuid::Uuid;

use crate::error::{Result, VaultError};
use crate::fs::ensure_dir;
use crate::storage::migrations::apply_migrations;
use crate::storage::traits::{MetadataStore, MetadataTransaction};
use crate::storage::types::{
    AuditEvent, Conversation, ConversationFilter, Message, NewAuditEvent, NewConversation,
    SourceCount,
};

use row::{
    format_timestamp, parse_timestamp, storable_timestamp, AuditRow, ConversationRow, MessageRow,
    CONVERSATION_COLUMNS, MESSAGE_COLUMNS,
};

/// SQLite-backed [`MetadataStore`].
pub struct SqliteStore {
    conn: Mutex<Connection>,
}

impl SqliteStore {
    /// Open (creating if needed) the database at `path` and migrate it.
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            ensure_dir(parent)?;
        }
        let conn = Connection::open(path)?;
        Self::from_connection(conn, true)
    }

    /// In-memory database, mainly for tests.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?, false)
    }

    fn from_connection(mut conn: Connection, wal: bool) -> Result<Self> {
        if wal {
            // journal_mode returns a row, so it cannot go through execute_batch.
            let _mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        }
        conn.execute_batch("PRAGMA foreign_keys = ON; PRAGMA synchronous = NORMAL;")?;
        let applied = apply_migrations(&mut conn)?;
        if !applied.is_empty() {
            debug!(?applied, "metadata schema migrated");
        }
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Lock the database connection, returning an error if the mutex is poisoned.
    fn lock_conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| VaultError::Storage("SQLite connection poisoned".to_string()))
    }

    fn query_conversations(
        conn: &Connection,
        sql: &str,
        params: impl rusqlite::Params,
    ) -> Result<Vec<Conversation>> {
        let mut stmt = conn.prepare(sql)?;
        let rows = stmt
            .query_map(params, ConversationRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Conversation::try_from).collect()
    }
}

impl MetadataStore for SqliteStore {
    fn conversation_exists(&self, hash: &str) -> Result<bool> {
        let conn = self.lock_conn()?;
        let found: Option<i64> = conn
            .query_row(
                "SELECT 1 FROM conversations WHERE hash = ?1",
                [hash],
                |row| row.get(0),
            )
            .optional()?;
        Ok(found.is_some())
    }

    fn get_conversation(&self, id: &str) -> Result<Option<Conversation>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE id = ?1",
            CONVERSATION_COLUMNS
        );
        let row = conn
            .query_row(&sql, [id], ConversationRow::from_row)
            .optional()?;
        row.map(Conversation::try_from).transpose()
    }

    fn find_conversation_by_prefix(&self, prefix: &str) -> Result<Option<Conversation>> {
        if prefix.is_empty() {
            return Ok(None);
        }
        if let Some(exact) = self.get_conversation(prefix)? {
            return Ok(Some(exact));
        }
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM conversations WHERE substr(id, 1, ?2) = ?1 LIMIT 2",
            CONVERSATION_COLUMNS
        );
        let mut matches =
            Self::query_conversations(&conn, &sql, params![prefix, prefix.len() as i64])?;
        if matches.len() == 1 {
            Ok(matches.pop())
        } else {
            Ok(None)
        }
    }

    fn list_conversations(&self, filter: &ConversationFilter) -> Result<Vec<Conversation>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM conversations \
             WHERE (?1 IS NULL OR source = ?1) \
             ORDER BY created_at DESC, id \
             LIMIT ?2 OFFSET ?3",
            CONVERSATION_COLUMNS
        );
        let limit = filter.limit.map(|l| l as i64).unwrap_or(-1);
        let offset = filter.offset.unwrap_or(0) as i64;
        Self::query_conversations(&conn, &sql, params![filter.source, limit, offset])
    }

    fn count_conversations(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM conversations", [], |row| {
            row.get(0)
        })?;
        Ok(count as usize)
    }

    fn count_messages(&self) -> Result<usize> {
        let conn = self.lock_conn()?;
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM messages", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    fn get_messages(&self, conversation_id: &str) -> Result<Vec<Message>> {
        let conn = self.lock_conn()?;
        let sql = format!(
            "SELECT {} FROM messages WHERE conversation_id = ?1 ORDER BY position",
            MESSAGE_COLUMNS
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map([conversation_id], MessageRow::from_row)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(Message::try_from).collect()
    }

    fn source_counts(&self) -> Result<Vec<SourceCount>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT source, COUNT(*) FROM conversations GROUP BY source \
             ORDER BY COUNT(*) DESC, source",
        )?;
        let counts = stmt
            .query_map([], |row| {
                Ok(SourceCount {
                    source: row.get(0)?,
                    count: row.get::<_, i64>(1)? as usize,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(counts)
    }

    fn date_range(&self) -> Result<(Option<DateTime<Utc>>, Option<DateTime<Utc>>)> {
        let conn = self.lock_conn()?;
        let (oldest, newest): (Option<String>, Option<String>) = conn.query_row(
            "SELECT MIN(created_at), MAX(created_at) FROM conversations",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        )?;
        Ok((
            oldest.as_deref().map(parse_timestamp).transpose()?,
            newest.as_deref().map(parse_timestamp).transpose()?,
        ))
    }

    fn record_audit_event(&self, event: &NewAuditEvent) -> Result<()> {
        let conn = self.lock_conn()?;
        conn.execute(
            "INSERT INTO audit_events (timestamp, action, resource_type, resource_id, details_json) \
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                format_timestamp(&Utc::now()),
                event.action,
                event.resource_type,
                event.resource_id,
                serde_json::to_string(&event.details)?,
            ],
        )?;
        Ok(())
    }

    fn list_audit_events(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let conn = self.lock_conn()?;
        let mut stmt = conn.prepare(
            "SELECT id, timestamp, action, resource_type, resource_id, details_json \
             FROM audit_events ORDER BY id DESC LIMIT ?1",
        )?;
        let rows = stmt
            .query_map([limit as i64], |row| {
                Ok(AuditRow {
                    id: row.get(0)?,
                    timestamp: row.get(1)?,
                    action: row.get(2)?,
                    resource_type: row.get(3)?,
                    resource_id: row.get(4)?,
                    details_json: row.get(5)?,
                })
            })?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        rows.into_iter().map(AuditEvent::try_from).collect()
    }

    fn begin(&self) -> Result<Box<dyn MetadataTransaction + '_>> {
        let conn = self.lock_conn()?;
        conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(Box::new(SqliteTransaction {
            conn,
            finished: false,
        }))
    }
}

/// Write transaction holding the connection lock until commit, rollback or drop.
struct SqliteTransaction<'a> {
    conn: MutexGuard<'a, Connection>,
    finished: bool,
}

impl MetadataTransaction for SqliteTransaction<'_> {
    fn add_conversation(&mut self, conversation: &NewConversation) -> Result<()> {
        let imported_at = format_timestamp(&Utc::now());
        let created_at = storable_timestamp(&conversation.created_at)?;
        let updated_at = storable_timestamp(&conversation.updated_at)?;
        self.conn.execute(
            r#"
            INSERT INTO conversations (
                id, source, external_id, title, created_at, updated_at,
                sensitivity, metadata_json, message_count, hash, imported_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
            "#,
            params![
                conversation.id,
                conversation.source,
                conversation.external_id,
                conversation.title,
                created_at,
                updated_at,
                conversation.sensitivity.as_str(),
                serde_json::to_string(&conversation.metadata)?,
                conversation.messages.len() as i64,
                conversation.hash,
                imported_at,
            ],
        )?;

        let mut stmt = self.conn.prepare(
            r#"
            INSERT INTO messages (
                id, conversation_id, position, actor, timestamp,
                content_blob_id, sensitivity, metadata_json
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
            "#,
        )?;
        for (position, message) in conversation.messages.iter().enumerate() {
            let id = if message.id.is_empty() {
                Uuid::new_v4().to_string()
            } else {
                message.id.clone()
            };
            stmt.execute(params![
                id,
                conversation.id,
                position as i64,
                message.actor.as_str(),
                storable_timestamp(&message.timestamp)?,
                message.content_blob_id,
                conversation.sensitivity.as_str(),
                serde_json::to_string(&message.metadata)?,
            ])?;
        }
        Ok(())
    }

    fn commit(mut self: Box<Self>) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        self.finished = true;
        Ok(())
    }

    fn rollback(mut self: Box<Self>) -> Result<()> {
        self.finished = true;
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

impl Drop for SqliteTransaction<'_> {
    fn drop(&mut self) {
        if !self.finished {
            if let Err(err) = self.conn.execute_batch("ROLLBACK") {
                debug!("rollback on drop failed: {}", err);
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::types::{Actor, NewMessage, Sensitivity};
    use chrono::TimeZone;

    fn conversation(hash: &str, source: &str, day: u32) -> NewConversation {
        let created = Utc.with_ymd_and_hms(2024, 1, day, 12, 0, 0).unwrap();
        let mut conv = NewConversation::new(hash, source, format!("Conv {}", hash), created)
            .with_external_id(Some(format!("ext-{}", hash)));
        for (i, actor) in [Actor::User, Actor::Assistant].into_iter().enumerate() {
            conv.push_message(NewMessage {
                id: String::new(),
                actor,
                timestamp: created + chrono::Duration::seconds(i as i64),
                content_blob_id: Uuid::new_v4().to_string(),
                metadata: serde_json::json!({ "n": i }),
            });
        }
        conv
    }

    #[test]
    fn test_add_and_get() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();

        assert!(store.conversation_exists("aaa111").unwrap());
        assert!(!store.conversation_exists("bbb222").unwrap());

        let conv = store.get_conversation("aaa111").unwrap().unwrap();
        assert_eq!(conv.title, "Conv aaa111");
        assert_eq!(conv.external_id.as_deref(), Some("ext-aaa111"));
        assert_eq!(conv.message_count, 2);
        assert_eq!(conv.sensitivity, Sensitivity::Internal);

        let messages = store.get_messages("aaa111").unwrap();
        assert_eq!(messages.len(), 2);
        assert_eq!(messages[0].actor, Actor::User);
        assert_eq!(messages[1].position, 1);
        assert_eq!(messages[1].metadata["n"], 1);
    }

    #[test]
    fn test_duplicate_hash_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();
        assert!(store.add_conversation(&conversation("aaa111", "chatgpt", 1)).is_err());
        assert_eq!(store.count_conversations().unwrap(), 1);
    }

    #[test]
    fn test_out_of_range_timestamps_rejected() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();

        let far_future = Utc.with_ymd_and_hms(55840, 11, 8, 22, 13, 20).unwrap();
        let mut bad_conv = conversation("bbb222", "chatgpt", 2);
        bad_conv.created_at = far_future;
        assert!(matches!(
            store.add_conversation(&bad_conv),
            Err(VaultError::Validation(_))
        ));

        let mut bad_message = conversation("ccc333", "chatgpt", 3);
        bad_message.messages[1].timestamp = far_future;
        assert!(matches!(
            store.add_conversation(&bad_message),
            Err(VaultError::Validation(_))
        ));

        assert_eq!(store.count_conversations().unwrap(), 1);
        assert_eq!(store.count_messages().unwrap(), 2);
        assert_eq!(
            store.list_conversations(&ConversationFilter::new()).unwrap().len(),
            1
        );
        assert!(store.date_range().unwrap().0.is_some());
    }

    #[test]
    fn test_rollback_and_drop_discard_writes() {
        let store = SqliteStore::open_in_memory().unwrap();

        let mut tx = store.begin().unwrap();
        tx.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();
        tx.rollback().unwrap();
        assert_eq!(store.count_conversations().unwrap(), 0);

        {
            let mut tx = store.begin().unwrap();
            tx.add_conversation(&conversation("bbb222", "chatgpt", 2)).unwrap();
        }
        assert_eq!(store.count_conversations().unwrap(), 0);
        assert_eq!(store.count_messages().unwrap(), 0);

        let mut tx = store.begin().unwrap();
        tx.add_conversation(&conversation("ccc333", "chatgpt", 3)).unwrap();
        tx.commit().unwrap();
        assert_eq!(store.count_conversations().unwrap(), 1);
        assert_eq!(store.count_messages().unwrap(), 2);
    }

    #[test]
    fn test_list_filter_and_order() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();
        store.add_conversation(&conversation("bbb222", "claude", 3)).unwrap();
        store.add_conversation(&conversation("ccc333", "chatgpt", 2)).unwrap();

        let all = store.list_conversations(&ConversationFilter::new()).unwrap();
        let ids: Vec<&str> = all.iter().map(|c| c.id.as_str()).collect();
        assert_eq!(ids, vec!["bbb222", "ccc333", "aaa111"]);

        let chatgpt = store
            .list_conversations(&ConversationFilter::new().source("chatgpt"))
            .unwrap();
        assert_eq!(chatgpt.len(), 2);

        let page = store
            .list_conversations(&ConversationFilter::new().limit(1).offset(1))
            .unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].id, "ccc333");
    }

    #[test]
    fn test_prefix_lookup() {
        let store = SqliteStore::open_in_memory().unwrap();
        store.add_conversation(&conversation("abc111", "chatgpt", 1)).unwrap();
        store.add_conversation(&conversation("abd222", "chatgpt", 2)).unwrap();

        assert_eq!(
            store.find_conversation_by_prefix("abc").unwrap().unwrap().id,
            "abc111"
        );
        assert!(store.find_conversation_by_prefix("ab").unwrap().is_none());
        assert!(store.find_conversation_by_prefix("zzz").unwrap().is_none());
        assert!(store.find_conversation_by_prefix("").unwrap().is_none());
        assert_eq!(
            store.find_conversation_by_prefix("abd222").unwrap().unwrap().id,
            "abd222"
        );
    }

    #[test]
    fn test_stats_queries() {
        let store = SqliteStore::open_in_memory().unwrap();
        assert_eq!(store.date_range().unwrap(), (None, None));

        store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();
        store.add_conversation(&conversation("bbb222", "claude", 5)).unwrap();
        store.add_conversation(&conversation("ccc333", "chatgpt", 3)).unwrap();

        let counts = store.source_counts().unwrap();
        assert_eq!(counts[0], SourceCount { source: "chatgpt".into(), count: 2 });
        assert_eq!(counts[1].count, 1);

        let (oldest, newest) = store.date_range().unwrap();
        assert_eq!(oldest, Some(Utc.with_ymd_and_hms(2024, 1, 1, 12, 0, 0).unwrap()));
        assert_eq!(newest, Some(Utc.with_ymd_and_hms(2024, 1, 5, 12, 0, 0).unwrap()));
    }

    #[test]
    fn test_audit_events() {
        let store = SqliteStore::open_in_memory().unwrap();
        store
            .record_audit_event(&NewAuditEvent::new("import", "file"))
            .unwrap();
        store
            .record_audit_event(
                &NewAuditEvent::new("read", "conversation")
                    .with_resource_id("aaa111")
                    .with_details(serde_json::json!({ "messages": 2 })),
            )
            .unwrap();

        let events = store.list_audit_events(10).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, "read");
        assert_eq!(events[0].resource_id.as_deref(), Some("aaa111"));
        assert_eq!(events[0].details["messages"], 2);
    }

    #[test]
    fn test_file_database_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("vault.db");
        {
            let store = SqliteStore::open(&path).unwrap();
            store.add_conversation(&conversation("aaa111", "chatgpt", 1)).unwrap();
        }
        let store = SqliteStore::open(&path).unwrap();
        assert_eq!(store.count_conversations().unwrap(), 1);
    }
}
