use std::sync::Arc;

use base64::{engine::general_purpose::STANDARD, Engine};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::FallbackPolicy;
use crate::crypto::{FileEnvelope, HybridCipher, ALGORITHM};
use crate::error::{EnvelopeError, Result};
use crate::hash::HashVerifier;
use crate::key_manager::KeyManager;
use crate::storage::KeyStore;

/// Per-document encryption metadata, persisted alongside the document row
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EncryptionEnvelope {
    pub is_encrypted: bool,
    /// Master key that wrapped the content key
    pub encryption_key_id: Option<String>,
    /// Base64 RSA-OAEP wrapped content key
    pub encrypted_key: Option<String>,
    /// Base64 GCM IV
    pub iv: Option<String>,
    /// Base64 GCM tag
    pub auth_tag: Option<String>,
    pub algorithm: Option<String>,
    /// Lowercase hex SHA-256 of the plaintext
    pub file_hash: String,
    #[serde(default)]
    pub encrypted_at: Option<DateTime<Utc>>,
}

impl EncryptionEnvelope {
    fn sealed(key_id: String, file: &FileEnvelope, file_hash: String) -> Self {
        Self {
            is_encrypted: true,
            encryption_key_id: Some(key_id),
            encrypted_key: Some(STANDARD.encode(&file.wrapped_key)),
            iv: Some(STANDARD.encode(&file.iv)),
            auth_tag: Some(STANDARD.encode(&file.auth_tag)),
            algorithm: Some(file.algorithm.clone()),
            file_hash,
            encrypted_at: Some(file.timestamp),
        }
    }

    /// Envelope for a document stored without encryption
    pub fn plaintext(file_hash: String) -> Self {
        Self {
            is_encrypted: false,
            encryption_key_id: None,
            encrypted_key: None,
            iv: None,
            auth_tag: None,
            algorithm: None,
            file_hash,
            encrypted_at: None,
        }
    }

    /// Rebuild the cipher input from the stored fields and the ciphertext blob
    pub fn to_file_envelope(&self, ciphertext: Vec<u8>) -> Result<FileEnvelope> {
        Ok(FileEnvelope {
            ciphertext,
            wrapped_key: decode_field("encrypted_key", &self.encrypted_key)?,
            iv: decode_field("iv", &self.iv)?,
            auth_tag: decode_field("auth_tag", &self.auth_tag)?,
            algorithm: self.algorithm.clone().unwrap_or_default(),
            timestamp: self.encrypted_at.unwrap_or_else(Utc::now),
        })
    }

    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self).map_err(EnvelopeError::from)
    }

    pub fn from_json(json: &str) -> Result<Self> {
        serde_json::from_str(json).map_err(EnvelopeError::from)
    }
}

fn decode_field(name: &str, value: &Option<String>) -> Result<Vec<u8>> {
    let encoded = value
        .as_deref()
        .ok_or_else(|| EnvelopeError::Encoding(format!("envelope has no {}", name)))?;
    STANDARD
        .decode(encoded)
        .map_err(|e| EnvelopeError::Encoding(format!("{}: {}", name, e)))
}

/// Ciphertext ready for the blob store plus its envelope
#[derive(Debug, Clone)]
pub struct ProtectedDocument {
    pub ciphertext: Vec<u8>,
    pub envelope: EncryptionEnvelope,
}

/// Result of an upload under a fallback policy
#[derive(Debug, Clone)]
pub enum StoredDocument {
    Encrypted(ProtectedDocument),
    /// Only produced under [`FallbackPolicy::AllowPlaintext`]
    Plaintext { bytes: Vec<u8>, envelope: EncryptionEnvelope },
}

impl StoredDocument {
    pub fn envelope(&self) -> &EncryptionEnvelope {
        match self {
            StoredDocument::Encrypted(doc) => &doc.envelope,
            StoredDocument::Plaintext { envelope, .. } => envelope,
        }
    }

    /// Bytes to hand to the blob store
    pub fn bytes(&self) -> &[u8] {
        match self {
            StoredDocument::Encrypted(doc) => &doc.ciphertext,
            StoredDocument::Plaintext { bytes, .. } => bytes,
        }
    }

    pub fn is_encrypted(&self) -> bool {
        matches!(self, StoredDocument::Encrypted(_))
    }
}

/// Outcome of comparing the decrypted bytes to the recorded digest
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Integrity {
    Verified,
    Mismatch { expected: String, actual: String },
}

#[derive(Debug, Clone)]
pub struct RevealedDocument {
    pub plaintext: Vec<u8>,
    pub integrity: Integrity,
}

impl RevealedDocument {
    pub fn is_verified(&self) -> bool {
        self.integrity == Integrity::Verified
    }

    /// Plaintext, or `IntegrityMismatch` for callers that treat the digest as binding
    pub fn into_verified(self) -> Result<Vec<u8>> {
        match self.integrity {
            Integrity::Verified => Ok(self.plaintext),
            Integrity::Mismatch { expected, actual } => {
                Err(EnvelopeError::IntegrityMismatch { expected, actual })
            }
        }
    }
}

/// Encrypts uploads under the active master key and opens stored documents
pub struct DocumentEncryptor<S: KeyStore> {
    key_manager: Arc<KeyManager<S>>,
}

impl<S: KeyStore> DocumentEncryptor<S> {
    pub fn new(key_manager: Arc<KeyManager<S>>) -> Self {
        Self { key_manager }
    }

    pub fn key_manager(&self) -> &Arc<KeyManager<S>> {
        &self.key_manager
    }

    /// Encrypt a document; fails as a whole if any step fails
    pub async fn protect(&self, file_bytes: Vec<u8>) -> Result<ProtectedDocument> {
        self.protect_shared(Arc::new(file_bytes)).await
    }

    /// Encrypt a document, falling back to plaintext only when `policy` allows it
    pub async fn protect_with_policy(&self, file_bytes: Vec<u8>, policy: FallbackPolicy) -> Result<StoredDocument> {
        let shared = Arc::new(file_bytes);

        match self.protect_shared(Arc::clone(&shared)).await {
            Ok(doc) => Ok(StoredDocument::Encrypted(doc)),
            Err(e) if policy == FallbackPolicy::AllowPlaintext => {
                warn!("encryption failed, storing document unencrypted per fallback policy: {}", e);
                let bytes = Arc::try_unwrap(shared).unwrap_or_else(|arc| (*arc).clone());
                let (bytes, file_hash) = tokio::task::spawn_blocking(move || {
                    let file_hash = HashVerifier::hash(&bytes);
                    (bytes, file_hash)
                })
                .await?;
                Ok(StoredDocument::Plaintext {
                    bytes,
                    envelope: EncryptionEnvelope::plaintext(file_hash),
                })
            }
            Err(e) => Err(e),
        }
    }

    async fn protect_shared(&self, file_bytes: Arc<Vec<u8>>) -> Result<ProtectedDocument> {
        let active = self.key_manager.active_public_key().await?;
        let public_key_pem = active.public_key_pem;

        let (file, file_hash) = tokio::task::spawn_blocking(move || {
            let file = HybridCipher::encrypt_file(&file_bytes, &public_key_pem)?;
            let file_hash = HashVerifier::hash(&file_bytes);
            Ok::<_, EnvelopeError>((file, file_hash))
        })
        .await??;

        debug!(key_id = %active.key_id, bytes = file.ciphertext.len(), "encrypted document");

        let envelope = EncryptionEnvelope::sealed(active.key_id, &file, file_hash);
        Ok(ProtectedDocument {
            ciphertext: file.ciphertext,
            envelope,
        })
    }

    /// Decrypt a stored document and check it against the recorded digest
    ///
    /// A digest mismatch is logged and reported in [`RevealedDocument::integrity`];
    /// tag or unwrap failures are hard errors.
    pub async fn reveal(&self, envelope: &EncryptionEnvelope, stored_bytes: Vec<u8>) -> Result<RevealedDocument> {
        let expected = envelope.file_hash.clone();

        let (plaintext, mismatch) = if envelope.is_encrypted {
            let key_id = envelope
                .encryption_key_id
                .as_deref()
                .ok_or_else(|| EnvelopeError::Encoding("envelope has no encryption_key_id".into()))?;
            if let Some(algorithm) = envelope.algorithm.as_deref().filter(|a| *a != ALGORITHM) {
                return Err(EnvelopeError::UnsupportedAlgorithm(algorithm.to_string()));
            }
            let file = envelope.to_file_envelope(stored_bytes)?;
            let private_key = self.key_manager.private_key(key_id).await?;
            let expected = expected.clone();

            tokio::task::spawn_blocking(move || {
                let plaintext = HybridCipher::decrypt_file(&file, &private_key)?;
                let mismatch = digest_mismatch(&plaintext, &expected);
                Ok::<_, EnvelopeError>((plaintext, mismatch))
            })
            .await??
        } else {
            let expected = expected.clone();
            tokio::task::spawn_blocking(move || {
                let mismatch = digest_mismatch(&stored_bytes, &expected);
                (stored_bytes, mismatch)
            })
            .await?
        };

        let integrity = match mismatch {
            None => Integrity::Verified,
            Some(actual) => {
                warn!(
                    key_id = envelope.encryption_key_id.as_deref().unwrap_or("-"),
                    expected = %expected,
                    actual = %actual,
                    "document digest mismatch after decryption"
                );
                Integrity::Mismatch { expected, actual }
            }
        };

        Ok(RevealedDocument { plaintext, integrity })
    }
}

/// Actual digest of `bytes` when it differs from `expected`
fn digest_mismatch(bytes: &[u8], expected: &str) -> Option<String> {
    (!HashVerifier::verify(bytes, expected)).then(|| HashVerifier::hash(bytes))
}
