//! Storage abstraction for master key records
//!
//! This module provides a trait-based storage interface that can be
//! implemented for various backends (in-memory, PostgreSQL, etc.)

use std::collections::HashMap;
use std::str::FromStr;
use std::sync::atomic::{AtomicBool, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::crypto::{KeyPairPem, KEY_TYPE};
use crate::error::{EnvelopeError, Result};

/// Lifecycle state of a master key
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum KeyStatus {
    /// Used for new encryptions
    Active,
    /// Replaced by a newer key; kept for decryption of older documents
    Rotated,
    /// Administratively withdrawn; never resolved again
    Revoked,
}

impl KeyStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyStatus::Active => "active",
            KeyStatus::Rotated => "rotated",
            KeyStatus::Revoked => "revoked",
        }
    }
}

impl std::fmt::Display for KeyStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for KeyStatus {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "active" => Ok(KeyStatus::Active),
            "rotated" => Ok(KeyStatus::Rotated),
            "revoked" => Ok(KeyStatus::Revoked),
            other => Err(EnvelopeError::Storage(format!("unknown key status '{}'", other))),
        }
    }
}

/// Persisted RSA master key pair
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeyRecord {
    /// Opaque unique identifier referenced by document envelopes
    pub key_id: String,
    pub key_name: String,
    /// SPKI PEM
    pub public_key: String,
    /// PKCS#8 PEM
    pub private_key: String,
    /// Always `RSA-2048`
    pub key_type: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

impl KeyRecord {
    /// Build a new active record around a freshly generated key pair
    pub fn new_active(key_name: impl Into<String>, pair: &KeyPairPem) -> Self {
        Self {
            key_id: Uuid::new_v4().to_string(),
            key_name: key_name.into(),
            public_key: pair.public_key_pem.clone(),
            private_key: pair.private_key_pem.to_string(),
            key_type: KEY_TYPE.to_string(),
            status: KeyStatus::Active,
            created_at: Utc::now(),
            rotated_at: None,
            revoked_at: None,
        }
    }

    pub fn is_active(&self) -> bool {
        self.status == KeyStatus::Active
    }

    /// Listing view without the private key
    pub fn summary(&self) -> KeySummary {
        KeySummary {
            key_id: self.key_id.clone(),
            key_name: self.key_name.clone(),
            key_type: self.key_type.clone(),
            status: self.status,
            created_at: self.created_at,
            rotated_at: self.rotated_at,
            revoked_at: self.revoked_at,
        }
    }
}

impl std::fmt::Debug for KeyRecord {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyRecord")
            .field("key_id", &self.key_id)
            .field("key_name", &self.key_name)
            .field("key_type", &self.key_type)
            .field("status", &self.status)
            .field("created_at", &self.created_at)
            .field("rotated_at", &self.rotated_at)
            .field("revoked_at", &self.revoked_at)
            .field("private_key", &"[REDACTED]")
            .finish()
    }
}

/// Key metadata safe to list or log
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KeySummary {
    pub key_id: String,
    pub key_name: String,
    pub key_type: String,
    pub status: KeyStatus,
    pub created_at: DateTime<Utc>,
    pub rotated_at: Option<DateTime<Utc>>,
    pub revoked_at: Option<DateTime<Utc>>,
}

/// Storage trait for master key records
///
/// Implementations report an absent backing table as
/// [`EnvelopeError::StoreNotProvisioned`] and a second active record as
/// [`EnvelopeError::ActiveKeyConflict`].
#[async_trait]
pub trait KeyStore: Send + Sync {
    /// Persist a new record
    async fn insert(&self, record: KeyRecord) -> Result<()>;

    /// Most recently created active record
    async fn find_active(&self) -> Result<Option<KeyRecord>>;

    /// Record by id, optionally restricted to one status
    async fn find_by_id(&self, key_id: &str, required_status: Option<KeyStatus>) -> Result<Option<KeyRecord>>;

    /// Move every active record to rotated, returning how many changed
    async fn mark_all_active_as_rotated(&self) -> Result<u64>;

    /// Total number of records in any status
    async fn count(&self) -> Result<u64>;

    /// Rotate every active record and insert `record` as the new active one
    async fn replace_active(&self, record: KeyRecord) -> Result<u64> {
        let rotated = self.mark_all_active_as_rotated().await?;
        self.insert(record).await?;
        Ok(rotated)
    }

    /// Mark a record revoked; false if no such record exists
    async fn mark_revoked(&self, key_id: &str) -> Result<bool>;

    /// All records, newest first
    async fn list(&self) -> Result<Vec<KeyRecord>>;
}

/// In-memory implementation of KeyStore
///
/// Suitable for development, testing, and single-instance deployments.
/// Data is lost when the process terminates.
pub struct InMemoryKeyStore {
    keys: RwLock<HashMap<String, KeyRecord>>,
    provisioned: AtomicBool,
}

impl InMemoryKeyStore {
    /// Create a new in-memory store instance
    pub fn new() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            provisioned: AtomicBool::new(true),
        }
    }

    /// A store whose backing table does not exist until [`provision`](Self::provision)
    pub fn unprovisioned() -> Self {
        Self {
            keys: RwLock::new(HashMap::new()),
            provisioned: AtomicBool::new(false),
        }
    }

    pub fn provision(&self) {
        self.provisioned.store(true, Ordering::SeqCst);
    }

    fn check_provisioned(&self) -> Result<()> {
        if self.provisioned.load(Ordering::SeqCst) {
            Ok(())
        } else {
            Err(EnvelopeError::StoreNotProvisioned("encryption_keys".into()))
        }
    }

    fn check_unique_id(keys: &HashMap<String, KeyRecord>, record: &KeyRecord) -> Result<()> {
        if keys.contains_key(&record.key_id) {
            return Err(EnvelopeError::Storage(format!("duplicate key id {}", record.key_id)));
        }
        Ok(())
    }

    fn insert_locked(keys: &mut HashMap<String, KeyRecord>, record: KeyRecord) -> Result<()> {
        Self::check_unique_id(keys, &record)?;
        if record.is_active() && keys.values().any(KeyRecord::is_active) {
            return Err(EnvelopeError::ActiveKeyConflict);
        }
        keys.insert(record.key_id.clone(), record);
        Ok(())
    }

    fn rotate_locked(keys: &mut HashMap<String, KeyRecord>) -> u64 {
        let now = Utc::now();
        let mut rotated = 0;
        for record in keys.values_mut().filter(|k| k.is_active()) {
            record.status = KeyStatus::Rotated;
            record.rotated_at = Some(now);
            rotated += 1;
        }
        rotated
    }
}

impl Default for InMemoryKeyStore {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl KeyStore for InMemoryKeyStore {
    async fn insert(&self, record: KeyRecord) -> Result<()> {
        self.check_provisioned()?;
        let mut keys = self.keys.write();
        Self::insert_locked(&mut keys, record)
    }

    async fn find_active(&self) -> Result<Option<KeyRecord>> {
        self.check_provisioned()?;
        let keys = self.keys.read();
        let active = keys
            .values()
            .filter(|k| k.is_active())
            .max_by_key(|k| k.created_at)
            .cloned();
        Ok(active)
    }

    async fn find_by_id(&self, key_id: &str, required_status: Option<KeyStatus>) -> Result<Option<KeyRecord>> {
        self.check_provisioned()?;
        let keys = self.keys.read();
        let record = keys
            .get(key_id)
            .filter(|k| required_status.map_or(true, |status| k.status == status))
            .cloned();
        Ok(record)
    }

    async fn mark_all_active_as_rotated(&self) -> Result<u64> {
        self.check_provisioned()?;
        let mut keys = self.keys.write();
        Ok(Self::rotate_locked(&mut keys))
    }

    async fn count(&self) -> Result<u64> {
        self.check_provisioned()?;
        Ok(self.keys.read().len() as u64)
    }

    async fn replace_active(&self, record: KeyRecord) -> Result<u64> {
        self.check_provisioned()?;
        if !record.is_active() {
            return Err(EnvelopeError::Storage(format!(
                "replacement key {} is {}, expected active",
                record.key_id, record.status
            )));
        }

        // Reject before rotating anything
        let mut keys = self.keys.write();
        Self::check_unique_id(&keys, &record)?;
        let rotated = Self::rotate_locked(&mut keys);
        Self::insert_locked(&mut keys, record)?;
        Ok(rotated)
    }

    async fn mark_revoked(&self, key_id: &str) -> Result<bool> {
        self.check_provisioned()?;
        let mut keys = self.keys.write();
        match keys.get_mut(key_id) {
            Some(record) => {
                record.status = KeyStatus::Revoked;
                record.revoked_at.get_or_insert_with(Utc::now);
                Ok(true)
            }
            None => Ok(false),
        }
    }

    async fn list(&self) -> Result<Vec<KeyRecord>> {
        self.check_provisioned()?;
        let mut records: Vec<_> = self.keys.read().values().cloned().collect();
        records.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(records)
    }
}
