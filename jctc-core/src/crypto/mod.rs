//! Archive Cryptography
//!
//! - **key_store**: key management abstraction and local development store
//! - **codec**: canonical encoding, compression and AEAD sealing of archives

pub mod codec;
pub mod key_store;

pub use codec::{ArchiveCodec, DEFAULT_COMPRESSION_LEVEL, FRAME_MAGIC, NONCE_SIZE};
pub use key_store::{
    KeyHandle, KeyManagement, KeyMaterial, KeyRef, KeyStoreError, LocalKeyStore, KEY_SIZE,
};
