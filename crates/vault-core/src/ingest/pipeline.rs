//! Import pipeline.
//!
//! Parse once, then handle every conversation in isolation: dedup check,
//! blob writes, metadata rows, commit. A failure rolls back that
//! conversation's transaction and is recorded in the [`ImportResult`]; the
//! remaining conversations still import. Blobs written before a failed
//! commit are left on disk unreferenced.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use serde::Serialize;
use serde_json::json;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::crypto::{KeyManager, MasterKey};
use crate::error::{Result, VaultError};
use crate::storage::{
    MetadataStore, MetadataTransaction, NewAuditEvent, NewConversation, NewMessage, Sensitivity,
};

use super::{ParsedConversation, ProviderAdapter};

/// Outcome of one import run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct ImportResult {
    pub imported: usize,
    pub skipped: usize,
    pub failed: usize,
    pub errors: Vec<String>,
    /// The run stopped early because the cancel flag was raised
    pub cancelled: bool,
}

impl ImportResult {
    /// Conversations accounted for: imported + skipped + failed.
    pub fn total(&self) -> usize {
        self.imported + self.skipped + self.failed
    }

    fn fail(&mut self, message: String) {
        self.failed += 1;
        self.errors.push(message);
    }
}

type ProgressFn<'a> = Box<dyn FnMut(usize, usize) + 'a>;

/// Optional knobs for an import run.
#[derive(Default)]
pub struct ImportOptions<'a> {
    progress: Option<ProgressFn<'a>>,
    cancel: Option<Arc<AtomicBool>>,
    sensitivity: Sensitivity,
}

impl<'a> ImportOptions<'a> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Called with `(done, total)` after each conversation.
    pub fn with_progress(mut self, progress: impl FnMut(usize, usize) + 'a) -> Self {
        self.progress = Some(Box::new(progress));
        self
    }

    /// Checked before each conversation; when set the run stops.
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    /// Classification applied to imported conversations and messages.
    pub fn with_sensitivity(mut self, sensitivity: Sensitivity) -> Self {
        self.sensitivity = sensitivity;
        self
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::SeqCst))
    }
}

/// Wires the stores together for imports.
pub struct ImportPipeline<'a> {
    store: &'a dyn MetadataStore,
    blobs: &'a BlobStore,
    keys: &'a KeyManager,
}

impl<'a> ImportPipeline<'a> {
    pub fn new(store: &'a dyn MetadataStore, blobs: &'a BlobStore, keys: &'a KeyManager) -> Self {
        Self { store, blobs, keys }
    }

    /// Import every conversation in `path`.
    ///
    /// Never returns an error: parse failures and per-conversation failures
    /// are reported in the result.
    pub fn run(
        &self,
        adapter: &dyn ProviderAdapter,
        path: &Path,
        master_key: &MasterKey,
        mut options: ImportOptions<'_>,
    ) -> ImportResult {
        let mut result = ImportResult::default();

        let conversations = match adapter.parse(path) {
            Ok(conversations) => conversations,
            Err(err) => {
                warn!(provider = adapter.provider_name(), "export parse failed: {}", err);
                result.fail(format!("Failed to parse {}: {}", path.display(), err));
                self.record_audit(adapter, path, &result);
                return result;
            }
        };

        let total = conversations.len();
        info!(provider = adapter.provider_name(), total, "importing conversations");

        for (index, conversation) in conversations.iter().enumerate() {
            if options.is_cancelled() {
                info!(done = index, total, "import cancelled");
                result.cancelled = true;
                break;
            }

            let hash = conversation.content_hash();
            match self.store.conversation_exists(&hash) {
                Ok(true) => {
                    debug!(hash = %&hash[..12], "skipping known conversation");
                    result.skipped += 1;
                }
                Ok(false) => match self.import_one(conversation, &hash, master_key, &options) {
                    Ok(()) => result.imported += 1,
                    Err(err) => {
                        warn!(hash = %&hash[..12], "conversation import failed: {}", err);
                        result.fail(format!(
                            "Failed to import conversation '{}': {}",
                            conversation.title, err
                        ));
                    }
                },
                Err(err) => result.fail(format!(
                    "Failed to import conversation '{}': {}",
                    conversation.title, err
                )),
            }

            if let Some(progress) = options.progress.as_mut() {
                progress(index + 1, total);
            }
        }

        info!(
            imported = result.imported,
            skipped = result.skipped,
            failed = result.failed,
            "import finished"
        );
        self.record_audit(adapter, path, &result);
        result
    }

    fn import_one(
        &self,
        conversation: &ParsedConversation,
        hash: &str,
        master_key: &MasterKey,
        options: &ImportOptions<'_>,
    ) -> Result<()> {
        if conversation.messages.is_empty() {
            return Err(VaultError::Validation(
                "conversation has no messages".to_string(),
            ));
        }

        let mut tx = self.store.begin()?;
        match self.write_conversation(&mut *tx, conversation, hash, master_key, options) {
            Ok(()) => tx.commit(),
            Err(err) => {
                if let Err(rollback_err) = tx.rollback() {
                    warn!("rollback failed: {}", rollback_err);
                }
                Err(err)
            }
        }
    }

    fn write_conversation(
        &self,
        tx: &mut dyn MetadataTransaction,
        conversation: &ParsedConversation,
        hash: &str,
        master_key: &MasterKey,
        options: &ImportOptions<'_>,
    ) -> Result<()> {
        let cipher = self.keys.cipher(master_key, hash)?;

        let mut record = NewConversation::new(
            hash,
            conversation.source.as_str(),
            conversation.title.as_str(),
            conversation.created_at,
        )
        .with_external_id(conversation.external_id.clone())
        .with_updated_at(conversation.updated_at)
        .with_metadata(conversation.metadata.clone())
        .with_sensitivity(options.sensitivity);

        for message in &conversation.messages {
            let blob_id = self
                .blobs
                .store_with_cipher(&cipher, message.content.as_bytes(), None)?;
            let mut metadata = message.metadata.clone();
            if !message.external_id.is_empty() {
                if let Some(map) = metadata.as_object_mut() {
                    map.insert("source_id".to_string(), json!(message.external_id));
                }
            }
            record.push_message(NewMessage {
                id: Uuid::new_v4().to_string(),
                actor: message.actor,
                timestamp: message.timestamp,
                content_blob_id: blob_id,
                metadata,
            });
        }

        tx.add_conversation(&record)
    }

    fn record_audit(&self, adapter: &dyn ProviderAdapter, path: &Path, result: &ImportResult) {
        let event = NewAuditEvent::new("import", "file")
            .with_resource_id(path.display().to_string())
            .with_details(json!({
                "provider": adapter.provider_name(),
                "imported": result.imported,
                "skipped": result.skipped,
                "failed": result.failed,
                "cancelled": result.cancelled,
            }));
        if let Err(err) = self.store.record_audit_event(&event) {
            warn!("failed to record import audit event: {}", err);
        }
    }
}

/// Import with default options.
pub fn import_conversations(
    adapter: &dyn ProviderAdapter,
    path: &Path,
    store: &dyn MetadataStore,
    blobs: &BlobStore,
    keys: &KeyManager,
    master_key: &MasterKey,
) -> ImportResult {
    ImportPipeline::new(store, blobs, keys).run(adapter, path, master_key, ImportOptions::default())
}
