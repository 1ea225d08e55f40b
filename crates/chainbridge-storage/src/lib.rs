//! chainbridge-storage: durable rule and checkpoint stores.
//!
//! Backends:
//! - [`postgres`]: PostgreSQL via `sqlx` (production)
//! - [`sqlite`]: SQLite via `sqlx` (embedded, tests)
//!
//! Both implement [`RuleStore`] and [`CheckpointStore`] over two tables:
//!
//! ```text
//! mappings    (id, group_id, type, key, topic, encoder)   UNIQUE(type, key, topic)
//! checkpoints (id, slot, hash, created_at)
//! ```

use std::sync::Arc;

use chainbridge_core::checkpoint::CheckpointStore;
use chainbridge_core::error::BridgeError;
use chainbridge_core::rules::RuleStore;

#[cfg(feature = "postgres")]
pub mod postgres;

#[cfg(feature = "sqlite")]
pub mod sqlite;

#[cfg(feature = "postgres")]
pub use postgres::PostgresStorage;
#[cfg(feature = "sqlite")]
pub use sqlite::SqliteStorage;

/// Connect to the backend selected by the URL scheme.
///
/// `sqlite:` URLs open SQLite; `postgres://` / `postgresql://` open PostgreSQL.
pub async fn connect(
    url: &str,
    max_connections: u32,
) -> Result<(Arc<dyn RuleStore>, Arc<dyn CheckpointStore>), BridgeError> {
    #[cfg(feature = "sqlite")]
    {
        if url.starts_with("sqlite:") {
            let store = Arc::new(SqliteStorage::open(url).await?);
            return Ok((store.clone(), store));
        }
    }

    #[cfg(feature = "postgres")]
    {
        if url.starts_with("postgres://") || url.starts_with("postgresql://") {
            let opts = postgres::PostgresOptions {
                max_connections,
                ..Default::default()
            };
            let store = Arc::new(PostgresStorage::connect_with_options(url, opts).await?);
            return Ok((store.clone(), store));
        }
    }

    let _ = max_connections;
    Err(BridgeError::Storage(format!(
        "unsupported database url '{url}' (enabled backends: {})",
        enabled_backends().join(", ")
    )))
}

pub fn enabled_backends() -> Vec<&'static str> {
    let mut backends = Vec::new();
    if cfg!(feature = "postgres") {
        backends.push("postgres");
    }
    if cfg!(feature = "sqlite") {
        backends.push("sqlite");
    }
    backends
}

// ─── Shared row helpers ──────────────────────────────────────────────────────

#[cfg(any(feature = "postgres", feature = "sqlite"))]
pub(crate) mod rows {
    use chainbridge_core::error::BridgeError;
    use chainbridge_core::rules::NewRule;

    pub fn storage_err(e: impl std::fmt::Display) -> BridgeError {
        BridgeError::Storage(e.to_string())
    }

    /// Map an insert failure, turning unique violations into `DuplicateRule`.
    pub fn insert_err(e: sqlx::Error, rule: &NewRule) -> BridgeError {
        match &e {
            sqlx::Error::Database(db) if db.is_unique_violation() => BridgeError::DuplicateRule {
                kind: rule.kind.to_string(),
                key: rule.key.clone(),
                topic: rule.topic.clone(),
            },
            _ => storage_err(e),
        }
    }
}
