//! Durable state store for job snapshots.
//!
//! [`StateStore`] is a minimal key/value contract over JSON blobs. Two
//! backends implement it:
//!
//! - [`PgStore`]: durable, backed by the `state_entries` Postgres table.
//! - [`FileStore`]: local-filesystem fallback used when no database is
//!   configured. It survives process restarts on the same host only.
//!
//! [`connect`] picks the backend from a [`StoreConfig`].

pub mod config;
pub mod file;
pub mod postgres;

use std::sync::Arc;

use async_trait::async_trait;

pub use config::StoreConfig;
pub use file::FileStore;
pub use postgres::PgStore;

/// Errors from a state store backend.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A filesystem operation failed.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A database query failed.
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// A stored blob could not be encoded or decoded.
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migrations could not be applied.
    #[error("Migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

/// Key/value persistence of JSON snapshots.
#[async_trait]
pub trait StateStore: Send + Sync {
    /// Store `value` under `key`, replacing any previous value.
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError>;

    /// Fetch the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError>;

    /// Short backend name for logs.
    fn backend_name(&self) -> &'static str;

    /// Whether writes survive the loss of this host.
    fn is_durable(&self) -> bool;
}

/// Build the store selected by `config`.
///
/// With a database URL this connects, applies migrations, and returns a
/// [`PgStore`]. Without one it falls back to a [`FileStore`] and logs a
/// warning, since snapshots will not outlive the host.
pub async fn connect(config: &StoreConfig) -> Result<Arc<dyn StateStore>, StoreError> {
    match &config.database_url {
        Some(url) => {
            let store = PgStore::connect(url).await?;
            tracing::info!("Durable state store connected (postgres)");
            Ok(Arc::new(store))
        }
        None => {
            let store = FileStore::open(&config.state_dir).await?;
            tracing::warn!(
                dir = %config.state_dir.display(),
                "DATABASE_URL not set, using non-durable filesystem state store",
            );
            Ok(Arc::new(store))
        }
    }
}

/// Store key for a job snapshot.
pub fn job_key(job_id: &str) -> String {
    format!("job:{job_id}")
}
