pub mod blob;
pub mod config;
pub mod crypto;
pub mod document;
pub mod error;
pub mod hash;
pub mod key_manager;
pub mod storage;
pub mod vault;

// PostgreSQL backend
pub mod postgres_storage;

pub use blob::{BlobStore, FsBlobStore, InMemoryBlobStore};
pub use config::{Config, FallbackPolicy, KeyLookupPolicy};
pub use crypto::{FileEnvelope, HybridCipher, KeyPairPem, SecureKey, AES_256_KEY_SIZE, ALGORITHM, IV_SIZE, KEY_TYPE, TAG_SIZE};
pub use document::{DocumentEncryptor, EncryptionEnvelope, Integrity, ProtectedDocument, RevealedDocument, StoredDocument};
pub use error::{EnvelopeError, Result};
pub use hash::HashVerifier;
pub use key_manager::{ActivePublicKey, KeyManager, KeyStats};
pub use storage::{InMemoryKeyStore, KeyRecord, KeyStatus, KeyStore, KeySummary};
pub use vault::{DocumentVault, StoredBlob};

// PostgreSQL exports
pub use postgres_storage::PostgresKeyStore;
