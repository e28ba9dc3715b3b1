//! Cryptographic primitives and the vault key hierarchy.
//!
//! ```text
//! passphrase --Argon2id(salt)--> MasterKey
//! MasterKey  --HKDF-SHA256(conversation_id)--> ConversationKey
//! ConversationKey --XChaCha20-Poly1305--> blob bytes
//! ```

mod aead;
mod key;
mod key_manager;
mod passphrase;

pub use aead::{ContentCipher, NONCE_LEN, TAG_LEN};
pub use key::{
    derive_conversation_key, derive_master_key, master_key_fingerprint, ConversationKey,
    KdfParams, MasterKey, KEY_LEN,
};
pub use key_manager::{KeyManager, SALT_LEN};
pub use passphrase::{passphrase_strength, validate_passphrase, Strength, MIN_PASSPHRASE_LENGTH};
