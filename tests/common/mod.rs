//! Shared test helpers for document envelope tests.

#![allow(dead_code)]

use std::sync::{Arc, OnceLock};

use document_envelope::{DocumentEncryptor, HybridCipher, InMemoryKeyStore, KeyLookupPolicy, KeyManager, KeyPairPem};

/// A key pair generated once per test binary.
pub fn shared_key_pair() -> &'static KeyPairPem {
    static PAIR: OnceLock<KeyPairPem> = OnceLock::new();
    PAIR.get_or_init(|| HybridCipher::generate_key_pair().expect("key generation"))
}

/// A second, unrelated key pair.
pub fn unrelated_key_pair() -> &'static KeyPairPem {
    static PAIR: OnceLock<KeyPairPem> = OnceLock::new();
    PAIR.get_or_init(|| HybridCipher::generate_key_pair().expect("key generation"))
}

/// An encryptor over a fresh in-memory store with one active key.
pub async fn initialized_encryptor(policy: KeyLookupPolicy) -> DocumentEncryptor<InMemoryKeyStore> {
    let km = KeyManager::new(Arc::new(InMemoryKeyStore::new())).with_lookup_policy(policy);
    km.initialize().await.expect("initialize").expect("first key");
    DocumentEncryptor::new(Arc::new(km))
}

/// Deterministic payload of `len` bytes.
pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}
