use std::sync::Arc;

use document_envelope::{
    Config, DocumentEncryptor, DocumentVault, FsBlobStore, InMemoryKeyStore, KeyManager, KeyStore, PostgresKeyStore,
};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let config = Config::from_env()?;

    match config.database_url.clone() {
        Some(url) => {
            info!("using PostgreSQL key store");
            let store = PostgresKeyStore::connect(&url).await?;
            store.ensure_schema().await?;
            run(Arc::new(store), &config).await
        }
        None => {
            info!("DATABASE_URL not set, using in-memory key store");
            run(Arc::new(InMemoryKeyStore::new()), &config).await
        }
    }
}

async fn run<S: KeyStore>(store: Arc<S>, config: &Config) -> Result<(), Box<dyn std::error::Error>> {
    let key_manager = Arc::new(KeyManager::with_config(store, config));

    match key_manager.initialize().await? {
        Some(key) => info!(key_id = %key.key_id, "created initial master key"),
        None => info!("master key already present"),
    }

    let blobs = Arc::new(FsBlobStore::open(&config.blob_dir).await?);
    let vault = DocumentVault::new(
        DocumentEncryptor::new(Arc::clone(&key_manager)),
        blobs,
        config.fallback_policy,
    );

    let body = b"Quarterly figures: revenue up 12%, churn down 3%.".to_vec();
    let stored = vault.store("q3-report.txt", body.clone()).await?;
    info!(
        blob_key = %stored.blob_key,
        key_id = stored.envelope.encryption_key_id.as_deref().unwrap_or("-"),
        "uploaded document"
    );

    let revealed = vault.load(&stored).await?;
    info!(verified = revealed.is_verified(), matches = revealed.plaintext == body, "downloaded document");

    let rotated = key_manager.rotate().await?;
    info!(key_id = %rotated.key_id, "rotated master key");

    match vault.load(&stored).await {
        Ok(doc) => info!(verified = doc.is_verified(), "document from before rotation still opens"),
        Err(e) => warn!("document from before rotation no longer opens: {}", e),
    }

    info!("{}", key_manager.stats().await?);
    vault.remove(&stored).await?;

    Ok(())
}
