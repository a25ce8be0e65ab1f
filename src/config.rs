//! Runtime configuration for the key manager and document vault.

use std::path::PathBuf;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{EnvelopeError, Result};

/// Which key statuses may be used to resolve a private key for decryption.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum KeyLookupPolicy {
    /// Active and rotated keys resolve; revoked keys are refused.
    #[default]
    AllowRotated,
    /// Only the active key resolves. Rotation makes older documents unreadable.
    ActiveOnly,
}

impl FromStr for KeyLookupPolicy {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "allow-rotated" => Ok(Self::AllowRotated),
            "active-only" => Ok(Self::ActiveOnly),
            other => Err(EnvelopeError::Config(format!(
                "KEY_LOOKUP_POLICY must be 'allow-rotated' or 'active-only', got '{}'",
                other
            ))),
        }
    }
}

/// What an upload does when encryption cannot be performed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FallbackPolicy {
    /// Fail the upload.
    #[default]
    RequireEncryption,
    /// Store the file unencrypted and log a warning.
    AllowPlaintext,
}

impl FromStr for FallbackPolicy {
    type Err = EnvelopeError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "require" => Ok(Self::RequireEncryption),
            "allow-plaintext" => Ok(Self::AllowPlaintext),
            other => Err(EnvelopeError::Config(format!(
                "ENCRYPTION_FALLBACK must be 'require' or 'allow-plaintext', got '{}'",
                other
            ))),
        }
    }
}

/// Subsystem configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Config {
    /// Postgres connection string. `None` selects the in-memory key store.
    pub database_url: Option<String>,

    /// Directory for ciphertext blobs.
    pub blob_dir: PathBuf,

    /// Prefix for generated key names.
    pub key_name_prefix: String,

    pub lookup_policy: KeyLookupPolicy,

    pub fallback_policy: FallbackPolicy,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            database_url: None,
            blob_dir: PathBuf::from("uploads"),
            key_name_prefix: "document-master-key".to_string(),
            lookup_policy: KeyLookupPolicy::default(),
            fallback_policy: FallbackPolicy::default(),
        }
    }
}

impl Config {
    /// Load `.env` (if present) and read configuration from the environment.
    pub fn from_env() -> Result<Self> {
        dotenvy::dotenv().ok();
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    /// Build configuration from an arbitrary variable lookup.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let defaults = Self::default();
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        let lookup_policy = match non_empty("KEY_LOOKUP_POLICY") {
            Some(value) => value.parse()?,
            None => defaults.lookup_policy,
        };
        let fallback_policy = match non_empty("ENCRYPTION_FALLBACK") {
            Some(value) => value.parse()?,
            None => defaults.fallback_policy,
        };

        Ok(Self {
            database_url: non_empty("DATABASE_URL"),
            blob_dir: non_empty("DOCUMENT_BLOB_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.blob_dir),
            key_name_prefix: non_empty("KEY_NAME_PREFIX").unwrap_or(defaults.key_name_prefix),
            lookup_policy,
            fallback_policy,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;

    fn lookup_from(pairs: &[(&str, &str)]) -> impl Fn(&str) -> Option<String> {
        let map: HashMap<String, String> = pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect();
        move |name| map.get(name).cloned()
    }

    #[test]
    fn test_defaults_when_unset() {
        let config = Config::from_lookup(|_| None).unwrap();
        assert!(config.database_url.is_none());
        assert_eq!(config.blob_dir, PathBuf::from("uploads"));
        assert_eq!(config.lookup_policy, KeyLookupPolicy::AllowRotated);
        assert_eq!(config.fallback_policy, FallbackPolicy::RequireEncryption);
    }

    #[test]
    fn test_reads_all_variables() {
        let config = Config::from_lookup(lookup_from(&[
            ("DATABASE_URL", "postgres://localhost/docs"),
            ("DOCUMENT_BLOB_DIR", "/var/lib/docs"),
            ("KEY_NAME_PREFIX", "tenant-a"),
            ("KEY_LOOKUP_POLICY", "active-only"),
            ("ENCRYPTION_FALLBACK", "Allow-Plaintext"),
        ]))
        .unwrap();

        assert_eq!(config.database_url.as_deref(), Some("postgres://localhost/docs"));
        assert_eq!(config.blob_dir, PathBuf::from("/var/lib/docs"));
        assert_eq!(config.key_name_prefix, "tenant-a");
        assert_eq!(config.lookup_policy, KeyLookupPolicy::ActiveOnly);
        assert_eq!(config.fallback_policy, FallbackPolicy::AllowPlaintext);
    }

    #[test]
    fn test_empty_database_url_is_none() {
        let config = Config::from_lookup(lookup_from(&[("DATABASE_URL", "  ")])).unwrap();
        assert!(config.database_url.is_none());
    }

    #[test]
    fn test_invalid_policy_rejected() {
        let err = Config::from_lookup(lookup_from(&[("KEY_LOOKUP_POLICY", "whatever")])).unwrap_err();
        assert!(matches!(err, EnvelopeError::Config(_)));
    }
}
