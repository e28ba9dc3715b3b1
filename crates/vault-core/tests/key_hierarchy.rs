use std::sync::Arc;

use tempfile::tempdir;

use vault_core::{BlobStore, KeyManager, SessionManager, VaultError};

const PASSPHRASE: &str = "correct-horse-battery-staple-123";

#[test]
fn same_root_reproduces_master_key() {
    let dir = tempdir().unwrap();

    let first = KeyManager::new(dir.path());
    let key = first.initialize(PASSPHRASE).unwrap();
    assert_eq!(key.as_bytes().len(), 32);

    let second = KeyManager::new(dir.path());
    assert_eq!(second.derive_master_key(PASSPHRASE).unwrap(), key);
    assert_eq!(second.unlock(PASSPHRASE).unwrap(), key);
    assert!(matches!(
        second.unlock("correct-horse-battery-staple-124"),
        Err(VaultError::IncorrectPassphrase)
    ));
}

#[test]
fn session_carries_master_key_to_a_new_process() {
    let dir = tempdir().unwrap();
    let keys = Arc::new(KeyManager::new(dir.path()));
    let master = keys.initialize(PASSPHRASE).unwrap();

    let sessions = SessionManager::new(keys.paths().session(), 30);
    let token = sessions.create_session(master.as_bytes()).unwrap();

    // A later invocation holds only the token.
    let restored = SessionManager::new(keys.paths().session(), 30)
        .validate_token(&token)
        .unwrap()
        .unwrap();
    assert_eq!(restored, master);

    let blobs = BlobStore::new(keys.clone());
    let id = blobs.store(b"carried over", &master, "conv", None).unwrap();
    assert_eq!(blobs.retrieve(&id, &restored, "conv").unwrap(), b"carried over");

    sessions.clear_session().unwrap();
    assert!(sessions.validate_token(&token).unwrap().is_none());
}
