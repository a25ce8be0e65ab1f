//! Upload/download flow over a blob store.

use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};
use uuid::Uuid;

use crate::blob::BlobStore;
use crate::config::FallbackPolicy;
use crate::document::{DocumentEncryptor, EncryptionEnvelope, RevealedDocument};
use crate::error::Result;
use crate::storage::KeyStore;

/// Metadata the caller persists in its document row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StoredBlob {
    pub blob_key: String,
    pub original_name: String,
    /// Plaintext size in bytes.
    pub size: u64,
    pub envelope: EncryptionEnvelope,
}

/// Encrypts uploads into a blob store and opens them again on download.
pub struct DocumentVault<S: KeyStore, B: BlobStore> {
    encryptor: DocumentEncryptor<S>,
    blobs: Arc<B>,
    fallback: FallbackPolicy,
}

impl<S: KeyStore, B: BlobStore> DocumentVault<S, B> {
    pub fn new(encryptor: DocumentEncryptor<S>, blobs: Arc<B>, fallback: FallbackPolicy) -> Self {
        Self {
            encryptor,
            blobs,
            fallback,
        }
    }

    pub fn encryptor(&self) -> &DocumentEncryptor<S> {
        &self.encryptor
    }

    pub fn blobs(&self) -> &Arc<B> {
        &self.blobs
    }

    /// Encrypts `bytes` and writes the ciphertext to a new blob.
    pub async fn store(&self, original_name: &str, bytes: Vec<u8>) -> Result<StoredBlob> {
        let size = bytes.len() as u64;
        let stored = self.encryptor.protect_with_policy(bytes, self.fallback).await?;

        let suffix = if stored.is_encrypted() { "enc" } else { "bin" };
        let blob_key = format!("{}.{}", Uuid::new_v4(), suffix);
        self.blobs.put(&blob_key, stored.bytes()).await?;

        info!(
            blob_key = %blob_key,
            encrypted = stored.is_encrypted(),
            size,
            "stored document {}",
            original_name
        );

        Ok(StoredBlob {
            blob_key,
            original_name: original_name.to_string(),
            size,
            envelope: stored.envelope().clone(),
        })
    }

    /// Reads a blob and decrypts it.
    pub async fn load(&self, stored: &StoredBlob) -> Result<RevealedDocument> {
        let bytes = self.blobs.get(&stored.blob_key).await?;
        self.encryptor.reveal(&stored.envelope, bytes).await
    }

    /// Encrypts a plaintext upload already on disk, then deletes the original.
    pub async fn seal_file(&self, path: impl AsRef<Path>) -> Result<StoredBlob> {
        let path = path.as_ref();
        let original_name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();

        let bytes = tokio::fs::read(path).await?;
        let stored = self.store(&original_name, bytes).await?;
        let removed = tokio::fs::remove_file(path).await;

        self.finish_seal(stored, removed).await
    }

    /// Keeps the sealed blob only if the plaintext original is gone.
    async fn finish_seal(&self, stored: StoredBlob, removed: std::io::Result<()>) -> Result<StoredBlob> {
        match removed {
            Ok(()) => Ok(stored),
            Err(e) => {
                warn!(blob_key = %stored.blob_key, "could not delete plaintext original, discarding sealed blob: {}", e);
                if let Err(cleanup) = self.blobs.delete(&stored.blob_key).await {
                    warn!(blob_key = %stored.blob_key, "sealed blob left behind: {}", cleanup);
                }
                Err(e.into())
            }
        }
    }

    /// Deletes the blob behind a stored document.
    pub async fn remove(&self, stored: &StoredBlob) -> Result<()> {
        self.blobs.delete(&stored.blob_key).await
    }
}
