use std::sync::Arc;

use chrono::Utc;
use tracing::{debug, info, warn};
use zeroize::Zeroizing;

use crate::config::{Config, KeyLookupPolicy};
use crate::crypto::HybridCipher;
use crate::error::{EnvelopeError, Result};
use crate::storage::{KeyRecord, KeyStatus, KeyStore, KeySummary};

/// Key Manager: RSA master key pairs (active → rotated → revoked)
///
/// Every operation goes to the store; there is no cached "current key", so a
/// rotation is visible to the next encryption immediately.
pub struct KeyManager<S: KeyStore> {
    store: Arc<S>,
    key_name_prefix: String,
    lookup_policy: KeyLookupPolicy,
}

impl<S: KeyStore> KeyManager<S> {
    pub fn new(store: Arc<S>) -> Self {
        Self::with_config(store, &Config::default())
    }

    pub fn with_config(store: Arc<S>, config: &Config) -> Self {
        Self {
            store,
            key_name_prefix: config.key_name_prefix.clone(),
            lookup_policy: config.lookup_policy,
        }
    }

    pub fn with_lookup_policy(mut self, policy: KeyLookupPolicy) -> Self {
        self.lookup_policy = policy;
        self
    }

    pub fn store(&self) -> &Arc<S> {
        &self.store
    }

    pub fn lookup_policy(&self) -> KeyLookupPolicy {
        self.lookup_policy
    }

    /// Create the first master key if the store is empty
    ///
    /// Returns `None` when keys already exist, when the backing table is not
    /// there yet, or when a concurrent initializer inserted first.
    pub async fn initialize(&self) -> Result<Option<KeyRecord>> {
        let existing = match self.store.count().await {
            Ok(n) => n,
            Err(EnvelopeError::StoreNotProvisioned(detail)) => {
                warn!("key store not provisioned yet, skipping key bootstrap: {}", detail);
                return Ok(None);
            }
            Err(e) => return Err(e),
        };

        if existing > 0 {
            debug!("key store already holds {} key(s), nothing to initialize", existing);
            return Ok(None);
        }

        let record = self.generate_record().await?;
        match self.store.insert(record.clone()).await {
            Ok(()) => {
                info!(key_id = %record.key_id, key_name = %record.key_name, "generated initial master key");
                Ok(Some(record))
            }
            Err(EnvelopeError::ActiveKeyConflict) => {
                info!("master key was initialized concurrently, discarding generated pair");
                Ok(None)
            }
            Err(EnvelopeError::StoreNotProvisioned(detail)) => {
                warn!("key store disappeared during bootstrap: {}", detail);
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }

    /// Public key of the current active master key
    pub async fn active_public_key(&self) -> Result<ActivePublicKey> {
        let record = self.store.find_active().await?.ok_or(EnvelopeError::NoActiveKey)?;

        Ok(ActivePublicKey {
            key_id: record.key_id,
            public_key_pem: record.public_key,
        })
    }

    /// Private key PEM for decrypting documents that reference `key_id`
    pub async fn private_key(&self, key_id: &str) -> Result<Zeroizing<String>> {
        let required_status = match self.lookup_policy {
            KeyLookupPolicy::ActiveOnly => Some(KeyStatus::Active),
            KeyLookupPolicy::AllowRotated => None,
        };

        let record = self
            .store
            .find_by_id(key_id, required_status)
            .await?
            .ok_or_else(|| EnvelopeError::KeyNotFound(key_id.to_string()))?;

        if record.status == KeyStatus::Revoked {
            return Err(EnvelopeError::KeyRevoked(key_id.to_string()));
        }

        Ok(Zeroizing::new(record.private_key))
    }

    /// Retire every active key and install a freshly generated one
    pub async fn rotate(&self) -> Result<KeyRecord> {
        let record = self.generate_record().await?;
        let retired = self.store.replace_active(record.clone()).await?;

        info!(key_id = %record.key_id, retired, "rotated master key");
        Ok(record)
    }

    /// Withdraw a key; documents wrapped under it can no longer be opened
    pub async fn revoke(&self, key_id: &str) -> Result<()> {
        if !self.store.mark_revoked(key_id).await? {
            return Err(EnvelopeError::KeyNotFound(key_id.to_string()));
        }

        warn!(key_id, "revoked master key");
        Ok(())
    }

    pub async fn list_keys(&self) -> Result<Vec<KeySummary>> {
        let records = self.store.list().await?;
        Ok(records.iter().map(KeyRecord::summary).collect())
    }

    pub async fn stats(&self) -> Result<KeyStats> {
        let records = self.store.list().await?;
        let mut stats = KeyStats {
            total: records.len(),
            active: 0,
            rotated: 0,
            revoked: 0,
        };

        for record in &records {
            match record.status {
                KeyStatus::Active => stats.active += 1,
                KeyStatus::Rotated => stats.rotated += 1,
                KeyStatus::Revoked => stats.revoked += 1,
            }
        }
        Ok(stats)
    }

    async fn generate_record(&self) -> Result<KeyRecord> {
        let key_name = format!("{}-{}", self.key_name_prefix, Utc::now().format("%Y%m%dT%H%M%S%.3fZ"));
        let pair = tokio::task::spawn_blocking(HybridCipher::generate_key_pair).await??;
        Ok(KeyRecord::new_active(key_name, &pair))
    }
}

/// Key id and public key used for a new encryption
#[derive(Debug, Clone)]
pub struct ActivePublicKey {
    pub key_id: String,
    pub public_key_pem: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct KeyStats {
    pub total: usize,
    pub active: usize,
    pub rotated: usize,
    pub revoked: usize,
}

impl std::fmt::Display for KeyStats {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "{} keys ({} active, {} rotated, {} revoked)",
            self.total, self.active, self.rotated, self.revoked
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::InMemoryKeyStore;

    fn manager() -> KeyManager<InMemoryKeyStore> {
        KeyManager::new(Arc::new(InMemoryKeyStore::new()))
    }

    #[tokio::test]
    async fn test_initialize_is_idempotent() {
        let km = manager();

        let first = km.initialize().await.unwrap();
        assert!(first.is_some());
        let first = first.unwrap();
        assert_eq!(first.key_type, "RSA-2048");
        assert!(first.key_name.starts_with("document-master-key-"));

        assert!(km.initialize().await.unwrap().is_none());

        let stats = km.stats().await.unwrap();
        assert_eq!(stats.total, 1);
        assert_eq!(stats.active, 1);
    }

    #[tokio::test]
    async fn test_initialize_tolerates_missing_table() {
        let store = Arc::new(InMemoryKeyStore::unprovisioned());
        let km = KeyManager::new(Arc::clone(&store));

        assert!(km.initialize().await.unwrap().is_none());

        store.provision();
        assert!(km.initialize().await.unwrap().is_some());
    }

    #[tokio::test]
    async fn test_no_active_key() {
        let km = manager();
        let err = km.active_public_key().await.unwrap_err();
        assert!(matches!(err, EnvelopeError::NoActiveKey));
    }

    #[tokio::test]
    async fn test_active_public_key_follows_rotation() {
        let km = manager();
        let initial = km.initialize().await.unwrap().unwrap();
        assert_eq!(km.active_public_key().await.unwrap().key_id, initial.key_id);

        let rotated = km.rotate().await.unwrap();
        let active = km.active_public_key().await.unwrap();
        assert_eq!(active.key_id, rotated.key_id);
        assert_eq!(active.public_key_pem, rotated.public_key);
    }

    #[tokio::test]
    async fn test_rotation_keeps_old_key() {
        let km = manager();
        let initial = km.initialize().await.unwrap().unwrap();
        km.rotate().await.unwrap();

        let old = km.store().find_by_id(&initial.key_id, None).await.unwrap().unwrap();
        assert_eq!(old.status, KeyStatus::Rotated);

        let stats = km.stats().await.unwrap();
        assert_eq!((stats.total, stats.active, stats.rotated), (2, 1, 1));
    }

    #[tokio::test]
    async fn test_private_key_policies() {
        let store = Arc::new(InMemoryKeyStore::new());
        let lenient = KeyManager::new(Arc::clone(&store));
        let strict = KeyManager::new(Arc::clone(&store)).with_lookup_policy(KeyLookupPolicy::ActiveOnly);

        let initial = lenient.initialize().await.unwrap().unwrap();
        assert_eq!(*strict.private_key(&initial.key_id).await.unwrap(), initial.private_key);

        lenient.rotate().await.unwrap();
        assert_eq!(*lenient.private_key(&initial.key_id).await.unwrap(), initial.private_key);
        assert!(matches!(
            strict.private_key(&initial.key_id).await,
            Err(EnvelopeError::KeyNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_revoked_key_is_refused() {
        let km = manager();
        let initial = km.initialize().await.unwrap().unwrap();
        km.rotate().await.unwrap();
        km.revoke(&initial.key_id).await.unwrap();

        assert!(matches!(
            km.private_key(&initial.key_id).await,
            Err(EnvelopeError::KeyRevoked(_))
        ));
        assert!(matches!(km.revoke("missing").await, Err(EnvelopeError::KeyNotFound(_))));
        assert!(matches!(km.private_key("missing").await, Err(EnvelopeError::KeyNotFound(_))));
    }

    #[tokio::test]
    async fn test_list_keys_hides_private_material() {
        let km = manager();
        km.initialize().await.unwrap();
        km.rotate().await.unwrap();

        let keys = km.list_keys().await.unwrap();
        assert_eq!(keys.len(), 2);
        assert_eq!(keys[0].status, KeyStatus::Active);
        assert_eq!(keys[1].status, KeyStatus::Rotated);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_concurrent_initialize_yields_one_active_key() {
        let km = Arc::new(manager());
        let (a, b) = tokio::join!(km.initialize(), km.initialize());

        let created = [a.unwrap(), b.unwrap()].into_iter().flatten().count();
        assert_eq!(created, 1);
        assert_eq!(km.stats().await.unwrap().active, 1);
    }
}
