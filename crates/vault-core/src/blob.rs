//! Encrypted blob storage.
//!
//! Each blob is one file under `blobs/<shard>/<id>.enc`, where `id` is a
//! lowercase hyphenated UUID and `shard` its first two characters. File
//! contents are the AEAD wire format of [`ContentCipher`]; the blob id is
//! bound in as associated data so a file moved to another name no longer
//! decrypts.

use std::fs::{self, OpenOptions};
use std::io::{Seek, SeekFrom, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, warn};
use uuid::Uuid;

use crate::crypto::{ContentCipher, KeyManager, MasterKey};
use crate::error::{Result, VaultError};
use crate::fs::write_atomic_private;

const BLOB_EXTENSION: &str = "enc";
const WIPE_CHUNK: usize = 64 * 1024;

/// Stores encrypted content addressed by blob id.
#[derive(Debug, Clone)]
pub struct BlobStore {
    dir: PathBuf,
    keys: Arc<KeyManager>,
}

impl BlobStore {
    /// Blob store rooted at `<vault_root>/blobs`.
    pub fn new(keys: Arc<KeyManager>) -> Self {
        let dir = keys.paths().blobs();
        Self { dir, keys }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn key_manager(&self) -> &Arc<KeyManager> {
        &self.keys
    }

    /// Encrypt and store `content` under the conversation's key.
    ///
    /// Generates a random UUIDv4 id unless `blob_id` is given. Returns the id.
    ///
    /// # Errors
    ///
    /// - `VaultError::Validation` if `blob_id` is not a canonical UUID or
    ///   `conversation_id` is empty
    /// - `VaultError::Io` if the file cannot be written
    pub fn store(
        &self,
        content: &[u8],
        master_key: &MasterKey,
        conversation_id: &str,
        blob_id: Option<&str>,
    ) -> Result<String> {
        let cipher = self.keys.cipher(master_key, conversation_id)?;
        self.store_with_cipher(&cipher, content, blob_id)
    }

    /// Like [`BlobStore::store`] with an already derived conversation cipher.
    pub fn store_with_cipher(
        &self,
        cipher: &ContentCipher,
        content: &[u8],
        blob_id: Option<&str>,
    ) -> Result<String> {
        let blob_id = match blob_id {
            Some(id) => validate_blob_id(id)?,
            None => Uuid::new_v4().hyphenated().to_string(),
        };
        let path = self.blob_path(&blob_id);
        let encrypted = cipher.encrypt(content, blob_id.as_bytes())?;
        write_atomic_private(&path, &encrypted)?;
        debug!(blob_id = %blob_id, bytes = encrypted.len(), "stored blob");
        Ok(blob_id)
    }

    /// Read and decrypt a blob.
    ///
    /// # Errors
    ///
    /// - `VaultError::NotFound` if no such blob exists
    /// - `VaultError::Decryption` on wrong key or tampered file
    pub fn retrieve(
        &self,
        blob_id: &str,
        master_key: &MasterKey,
        conversation_id: &str,
    ) -> Result<Vec<u8>> {
        let cipher = self.keys.cipher(master_key, conversation_id)?;
        self.retrieve_with_cipher(&cipher, blob_id)
    }

    pub fn retrieve_with_cipher(&self, cipher: &ContentCipher, blob_id: &str) -> Result<Vec<u8>> {
        let blob_id = validate_blob_id(blob_id)?;
        let path = self.blob_path(&blob_id);
        let data = match fs::read(&path) {
            Ok(data) => data,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                return Err(VaultError::NotFound(format!("Blob {} not found", blob_id)));
            }
            Err(err) => return Err(err.into()),
        };
        cipher.decrypt(&data, blob_id.as_bytes())
    }

    /// Securely delete a blob: three overwrite passes (zeros, ones, random)
    /// each flushed to disk, then unlink. Removes the shard directory if it
    /// becomes empty.
    ///
    /// Returns `false` if the blob did not exist. Overwriting does not
    /// defeat copy-on-write filesystems or SSD wear levelling.
    pub fn delete(&self, blob_id: &str) -> Result<bool> {
        let blob_id = validate_blob_id(blob_id)?;
        let path = self.blob_path(&blob_id);
        let len = match fs::metadata(&path) {
            Ok(meta) => meta.len(),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(err) => return Err(err.into()),
        };

        overwrite_passes(&path, len)?;
        fs::remove_file(&path)?;

        if let Some(shard) = path.parent() {
            let empty = fs::read_dir(shard)
                .map(|mut entries| entries.next().is_none())
                .unwrap_or(false);
            if empty {
                if let Err(err) = fs::remove_dir(shard) {
                    warn!(shard = %shard.display(), "failed to remove empty shard: {}", err);
                }
            }
        }
        debug!(blob_id = %blob_id, "deleted blob");
        Ok(true)
    }

    pub fn exists(&self, blob_id: &str) -> bool {
        match validate_blob_id(blob_id) {
            Ok(id) => self.blob_path(&id).is_file(),
            Err(_) => false,
        }
    }

    /// Ids of every stored blob, sorted.
    pub fn blob_ids(&self) -> Result<Vec<String>> {
        let mut ids: Vec<String> = self
            .blob_files()?
            .into_iter()
            .filter_map(|(path, _)| {
                path.file_stem()
                    .map(|stem| stem.to_string_lossy().into_owned())
            })
            .collect();
        ids.sort();
        Ok(ids)
    }

    /// Total bytes on disk across all blob files.
    pub fn total_size(&self) -> Result<u64> {
        Ok(self.blob_files()?.into_iter().map(|(_, len)| len).sum())
    }

    fn blob_path(&self, blob_id: &str) -> PathBuf {
        self.dir
            .join(&blob_id[..2])
            .join(format!("{}.{}", blob_id, BLOB_EXTENSION))
    }

    fn blob_files(&self) -> Result<Vec<(PathBuf, u64)>> {
        let shards = match fs::read_dir(&self.dir) {
            Ok(shards) => shards,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(err.into()),
        };

        let mut files = Vec::new();
        for shard in shards {
            let shard = shard?;
            if !shard.file_type()?.is_dir() {
                continue;
            }
            for entry in fs::read_dir(shard.path())? {
                let entry = entry?;
                let path = entry.path();
                if path.extension().and_then(|e| e.to_str()) == Some(BLOB_EXTENSION) {
                    files.push((path, entry.metadata()?.len()));
                }
            }
        }
        Ok(files)
    }
}

/// Accept only canonical lowercase hyphenated UUIDs. Anything else could
/// name a path outside the blob directory.
fn validate_blob_id(blob_id: &str) -> Result<String> {
    let parsed = Uuid::try_parse(blob_id)
        .map_err(|_| VaultError::Validation(format!("Invalid blob id: {:?}", blob_id)))?;
    let canonical = parsed.hyphenated().to_string();
    if canonical != blob_id {
        return Err(VaultError::Validation(format!(
            "Blob id must be a lowercase hyphenated UUID: {:?}",
            blob_id
        )));
    }
    Ok(canonical)
}

fn overwrite_passes(path: &Path, len: u64) -> Result<()> {
    let mut file = OpenOptions::new().write(true).open(path)?;
    let mut buf = vec![0u8; WIPE_CHUNK];

    for pass in 0..3 {
        file.seek(SeekFrom::Start(0))?;
        let mut remaining = len;
        while remaining > 0 {
            let n = remaining.min(WIPE_CHUNK as u64) as usize;
            match pass {
                0 => buf[..n].fill(0x00),
                1 => buf[..n].fill(0xFF),
                _ => getrandom::getrandom(&mut buf[..n])
                    .map_err(|e| VaultError::Crypto(format!("Random overwrite failed: {}", e)))?,
            }
            file.write_all(&buf[..n])?;
            remaining -= n as u64;
        }
        file.sync_all()?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::KdfParams;
    use tempfile::tempdir;

    fn setup() -> (tempfile::TempDir, BlobStore, MasterKey) {
        let dir = tempdir().unwrap();
        let keys = Arc::new(KeyManager::with_params(
            dir.path(),
            KdfParams {
                memory_kib: 1024,
                iterations: 1,
                parallelism: 1,
            },
        ));
        let master = keys.derive_master_key("correct-horse-battery-staple").unwrap();
        (dir, BlobStore::new(keys), master)
    }

    #[test]
    fn test_round_trip_sizes() {
        let (_dir, store, master) = setup();
        let big: Vec<u8> = (0..(1024 * 1024 + 17)).map(|i| (i % 251) as u8).collect();
        for content in [Vec::new(), b"hello".to_vec(), big] {
            let id = store.store(&content, &master, "conv-1", None).unwrap();
            assert_eq!(store.retrieve(&id, &master, "conv-1").unwrap(), content);
        }
    }

    #[test]
    fn test_layout_and_no_plaintext_on_disk() {
        let (_dir, store, master) = setup();
        let id = store
            .store(b"plaintext marker", &master, "conv-1", None)
            .unwrap();
        assert!(Uuid::try_parse(&id).is_ok());

        let path = store.dir().join(&id[..2]).join(format!("{}.enc", id));
        let bytes = fs::read(&path).unwrap();
        assert!(!bytes
            .windows(b"plaintext marker".len())
            .any(|w| w == b"plaintext marker"));
    }

    #[test]
    fn test_cross_conversation_isolation() {
        let (_dir, store, master) = setup();
        let id = store.store(b"secret", &master, "conv-a", None).unwrap();
        assert!(matches!(
            store.retrieve(&id, &master, "conv-b"),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_missing_blob_is_not_found() {
        let (_dir, store, master) = setup();
        let id = Uuid::new_v4().to_string();
        assert!(matches!(
            store.retrieve(&id, &master, "conv-1"),
            Err(VaultError::NotFound(_))
        ));
    }

    #[test]
    fn test_explicit_blob_id_validated() {
        let (_dir, store, master) = setup();
        for bad in ["../../etc/passwd", "not-a-uuid", "", "A0EEBC99-9C0B-4EF8-BB6D-6BB9BD380A11"] {
            assert!(matches!(
                store.store(b"x", &master, "conv-1", Some(bad)),
                Err(VaultError::Validation(_))
            ));
        }
        let id = "a0eebc99-9c0b-4ef8-bb6d-6bb9bd380a11";
        assert_eq!(store.store(b"x", &master, "conv-1", Some(id)).unwrap(), id);
        assert!(store.exists(id));
    }

    #[test]
    fn test_renamed_blob_does_not_decrypt() {
        let (_dir, store, master) = setup();
        let a = store.store(b"payload", &master, "conv-1", None).unwrap();
        let b = Uuid::new_v4().to_string();
        let target = store.dir().join(&b[..2]).join(format!("{}.enc", b));
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        fs::copy(store.dir().join(&a[..2]).join(format!("{}.enc", a)), &target).unwrap();
        assert!(matches!(
            store.retrieve(&b, &master, "conv-1"),
            Err(VaultError::Decryption(_))
        ));
    }

    #[test]
    fn test_delete() {
        let (_dir, store, master) = setup();
        let id = store.store(b"goodbye", &master, "conv-1", None).unwrap();
        let shard = store.dir().join(&id[..2]);

        assert!(store.delete(&id).unwrap());
        assert!(!store.exists(&id));
        assert!(!shard.exists());
        assert!(matches!(
            store.retrieve(&id, &master, "conv-1"),
            Err(VaultError::NotFound(_))
        ));
        assert!(!store.delete(&id).unwrap());
    }

    #[test]
    fn test_total_size_and_listing() {
        let (_dir, store, master) = setup();
        assert_eq!(store.total_size().unwrap(), 0);
        let a = store.store(b"aaaa", &master, "c", None).unwrap();
        let b = store.store(b"", &master, "c", None).unwrap();

        assert_eq!(store.total_size().unwrap(), (24 + 4 + 16) + (24 + 16));
        let mut expected = vec![a, b];
        expected.sort();
        assert_eq!(store.blob_ids().unwrap(), expected);
    }
}
