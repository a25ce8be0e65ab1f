use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};

use crate::error::{EnvelopeError, Result};
use crate::storage::{KeyRecord, KeyStatus, KeyStore};

const SELECT_COLUMNS: &str =
    "key_id, key_name, public_key, private_key, key_type, status, created_at, rotated_at, revoked_at";

/// PostgreSQL key store over the `encryption_keys` table
///
/// - Single active key enforced by a partial unique index
/// - Records are never deleted; revocation is a status change
/// - SQLSTATE 42P01 surfaces as `StoreNotProvisioned`, 23505 as `ActiveKeyConflict`
pub struct PostgresKeyStore {
    pool: PgPool,
}

impl PostgresKeyStore {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn connect(database_url: &str) -> Result<Self> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    /// Create the key table and the single-active guard if missing
    pub async fn ensure_schema(&self) -> Result<()> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS encryption_keys (
                key_id      TEXT PRIMARY KEY,
                key_name    TEXT NOT NULL,
                public_key  TEXT NOT NULL,
                private_key TEXT NOT NULL,
                key_type    TEXT NOT NULL,
                status      TEXT NOT NULL CHECK (status IN ('active', 'rotated', 'revoked')),
                created_at  TIMESTAMPTZ NOT NULL,
                rotated_at  TIMESTAMPTZ,
                revoked_at  TIMESTAMPTZ
            )
            "#,
        )
        .execute(&self.pool)
        .await?;

        sqlx::query(
            r#"
            CREATE UNIQUE INDEX IF NOT EXISTS encryption_keys_single_active
            ON encryption_keys (status)
            WHERE status = 'active'
            "#,
        )
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    fn row_to_record(row: &PgRow) -> Result<KeyRecord> {
        let status: String = row.try_get("status")?;
        Ok(KeyRecord {
            key_id: row.try_get("key_id")?,
            key_name: row.try_get("key_name")?,
            public_key: row.try_get("public_key")?,
            private_key: row.try_get("private_key")?,
            key_type: row.try_get("key_type")?,
            status: status.parse()?,
            created_at: row.try_get("created_at")?,
            rotated_at: row.try_get::<Option<DateTime<Utc>>, _>("rotated_at")?,
            revoked_at: row.try_get::<Option<DateTime<Utc>>, _>("revoked_at")?,
        })
    }
}

#[async_trait]
impl KeyStore for PostgresKeyStore {
    async fn insert(&self, record: KeyRecord) -> Result<()> {
        sqlx::query(
            r#"
            INSERT INTO encryption_keys
                (key_id, key_name, public_key, private_key, key_type, status, created_at, rotated_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.key_id)
        .bind(&record.key_name)
        .bind(&record.public_key)
        .bind(&record.private_key)
        .bind(&record.key_type)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.rotated_at)
        .bind(record.revoked_at)
        .execute(&self.pool)
        .await?;

        Ok(())
    }

    async fn find_active(&self) -> Result<Option<KeyRecord>> {
        let row = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM encryption_keys WHERE status = 'active' ORDER BY created_at DESC LIMIT 1"
        ))
        .fetch_optional(&self.pool)
        .await?;

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn find_by_id(&self, key_id: &str, required_status: Option<KeyStatus>) -> Result<Option<KeyRecord>> {
        let row = match required_status {
            Some(status) => {
                sqlx::query(&format!(
                    "SELECT {SELECT_COLUMNS} FROM encryption_keys WHERE key_id = $1 AND status = $2"
                ))
                .bind(key_id)
                .bind(status.as_str())
                .fetch_optional(&self.pool)
                .await?
            }
            None => {
                sqlx::query(&format!("SELECT {SELECT_COLUMNS} FROM encryption_keys WHERE key_id = $1"))
                    .bind(key_id)
                    .fetch_optional(&self.pool)
                    .await?
            }
        };

        row.as_ref().map(Self::row_to_record).transpose()
    }

    async fn mark_all_active_as_rotated(&self) -> Result<u64> {
        let result = sqlx::query(
            "UPDATE encryption_keys SET status = 'rotated', rotated_at = $1 WHERE status = 'active'",
        )
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected())
    }

    async fn count(&self) -> Result<u64> {
        let row = sqlx::query("SELECT COUNT(*) AS count FROM encryption_keys")
            .fetch_one(&self.pool)
            .await?;

        let count: i64 = row.try_get("count")?;
        u64::try_from(count).map_err(|e| EnvelopeError::Storage(format!("negative key count: {}", e)))
    }

    /// Rotation and insert commit together or not at all
    async fn replace_active(&self, record: KeyRecord) -> Result<u64> {
        let mut tx = self.pool.begin().await?;

        let rotated = sqlx::query(
            "UPDATE encryption_keys SET status = 'rotated', rotated_at = $1 WHERE status = 'active'",
        )
        .bind(Utc::now())
        .execute(&mut *tx)
        .await?
        .rows_affected();

        sqlx::query(
            r#"
            INSERT INTO encryption_keys
                (key_id, key_name, public_key, private_key, key_type, status, created_at, rotated_at, revoked_at)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            "#,
        )
        .bind(&record.key_id)
        .bind(&record.key_name)
        .bind(&record.public_key)
        .bind(&record.private_key)
        .bind(&record.key_type)
        .bind(record.status.as_str())
        .bind(record.created_at)
        .bind(record.rotated_at)
        .bind(record.revoked_at)
        .execute(&mut *tx)
        .await?;

        tx.commit().await?;
        Ok(rotated)
    }

    async fn mark_revoked(&self, key_id: &str) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE encryption_keys
            SET status = 'revoked', revoked_at = COALESCE(revoked_at, $2)
            WHERE key_id = $1
            "#,
        )
        .bind(key_id)
        .bind(Utc::now())
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn list(&self) -> Result<Vec<KeyRecord>> {
        let rows = sqlx::query(&format!(
            "SELECT {SELECT_COLUMNS} FROM encryption_keys ORDER BY created_at DESC"
        ))
        .fetch_all(&self.pool)
        .await?;

        rows.iter().map(Self::row_to_record).collect()
    }
}
