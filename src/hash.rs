//! SHA-256 content digests for post-decryption integrity checks

use std::path::Path;

use sha2::{Digest, Sha256};
use tokio::io::AsyncReadExt;

use crate::error::Result;

const READ_CHUNK: usize = 64 * 1024;

/// Stateless SHA-256 hasher producing lowercase hex digests
pub struct HashVerifier;

impl HashVerifier {
    /// Lowercase hex SHA-256 of `bytes`
    pub fn hash(bytes: &[u8]) -> String {
        hex::encode(Sha256::digest(bytes))
    }

    /// Whether `bytes` hashes to `expected_hex` (case-insensitive)
    pub fn verify(bytes: &[u8], expected_hex: &str) -> bool {
        Self::hash(bytes).eq_ignore_ascii_case(expected_hex.trim())
    }

    /// Stream a file from disk through SHA-256
    pub async fn hash_file(path: impl AsRef<Path>) -> Result<String> {
        let mut file = tokio::fs::File::open(path.as_ref()).await?;
        let mut hasher = Sha256::new();
        let mut buf = vec![0u8; READ_CHUNK];

        loop {
            let n = file.read(&mut buf).await?;
            if n == 0 {
                break;
            }
            hasher.update(&buf[..n]);
        }

        Ok(hex::encode(hasher.finalize()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_known_digest() {
        assert_eq!(
            HashVerifier::hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
        assert_eq!(
            HashVerifier::hash(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_verify() {
        let digest = HashVerifier::hash(b"document body");
        assert!(HashVerifier::verify(b"document body", &digest));
        assert!(HashVerifier::verify(b"document body", &digest.to_uppercase()));
        assert!(!HashVerifier::verify(b"document body!", &digest));
        assert!(!HashVerifier::verify(b"document body", "deadbeef"));
    }

    #[tokio::test]
    async fn test_hash_file_matches_in_memory_hash() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("upload.bin");
        let content: Vec<u8> = (0..200_000u32).map(|i| (i % 251) as u8).collect();
        tokio::fs::write(&path, &content).await.unwrap();

        let streamed = HashVerifier::hash_file(&path).await.unwrap();
        assert_eq!(streamed, HashVerifier::hash(&content));
    }
}
