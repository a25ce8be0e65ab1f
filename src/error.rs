//! Error types for document envelope encryption

use thiserror::Error;

/// Result type alias for envelope encryption operations
pub type Result<T> = std::result::Result<T, EnvelopeError>;

/// Errors that can occur during envelope encryption and key lifecycle operations
#[derive(Error, Debug)]
pub enum EnvelopeError {
    /// Encryption requested but no master key is active
    #[error("No active master key available")]
    NoActiveKey,

    /// Symmetric key has the wrong length
    #[error("Invalid key size: expected {expected} bytes, got {actual}")]
    InvalidKeySize { expected: usize, actual: usize },

    /// IV has the wrong length
    #[error("Invalid IV size: expected {expected} bytes, got {actual}")]
    InvalidIvSize { expected: usize, actual: usize },

    /// GCM tag has the wrong length
    #[error("Invalid auth tag size: expected {expected} bytes, got {actual}")]
    InvalidTagSize { expected: usize, actual: usize },

    /// GCM tag did not verify (tampered data or wrong key/iv)
    #[error("Decryption failed: authentication tag mismatch")]
    AuthenticationFailed,

    /// RSA-OAEP wrap of the content key failed
    #[error("Key wrap failed: {0}")]
    KeyWrapFailed(String),

    /// RSA-OAEP unwrap of the content key failed
    #[error("Key unwrap failed: {0}")]
    KeyUnwrapFailed(String),

    /// Public key PEM could not be parsed
    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    /// RSA key pair generation or encoding failed
    #[error("Key generation error: {0}")]
    KeyGeneration(String),

    /// Envelope names an algorithm this crate does not decrypt
    #[error("Unsupported algorithm: {0}")]
    UnsupportedAlgorithm(String),

    /// Key not found in storage
    #[error("Key not found: {0}")]
    KeyNotFound(String),

    /// Key exists but has been revoked
    #[error("Key revoked: {0}")]
    KeyRevoked(String),

    /// Decrypted content does not match the recorded digest
    #[error("Integrity mismatch: expected {expected}, got {actual}")]
    IntegrityMismatch { expected: String, actual: String },

    /// Key store backing table does not exist yet
    #[error("Key store not provisioned: {0}")]
    StoreNotProvisioned(String),

    /// Another active key was inserted concurrently
    #[error("An active key already exists")]
    ActiveKeyConflict,

    /// Storage operation failed
    #[error("Storage error: {0}")]
    Storage(String),

    /// Blob missing from the blob store
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// Blob key is not a plain file name
    #[error("Invalid blob key: {0}")]
    InvalidBlobKey(String),

    /// Base64 or hex decoding failed
    #[error("Encoding error: {0}")]
    Encoding(String),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Invalid configuration
    #[error("Configuration error: {0}")]
    Config(String),

    /// Filesystem error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Blocking crypto task panicked or was cancelled
    #[error("Background task failed: {0}")]
    Task(String),
}

impl From<serde_json::Error> for EnvelopeError {
    fn from(err: serde_json::Error) -> Self {
        EnvelopeError::Serialization(err.to_string())
    }
}

impl From<base64::DecodeError> for EnvelopeError {
    fn from(err: base64::DecodeError) -> Self {
        EnvelopeError::Encoding(err.to_string())
    }
}

impl From<tokio::task::JoinError> for EnvelopeError {
    fn from(err: tokio::task::JoinError) -> Self {
        EnvelopeError::Task(err.to_string())
    }
}

impl From<sqlx::Error> for EnvelopeError {
    fn from(err: sqlx::Error) -> Self {
        if let Some(db_err) = err.as_database_error() {
            match db_err.code().as_deref() {
                // undefined_table
                Some("42P01") => return EnvelopeError::StoreNotProvisioned(db_err.message().to_string()),
                // unique_violation on the single-active index
                Some("23505") if db_err.constraint() == Some("encryption_keys_single_active") => {
                    return EnvelopeError::ActiveKeyConflict
                }
                _ => {}
            }
        }
        EnvelopeError::Storage(err.to_string())
    }
}
