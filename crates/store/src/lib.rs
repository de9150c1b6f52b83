//! Chat persistence backends for Dispatch.
//!
//! Both backends implement `dispatch_core::ChatStore`:
//! - [`InMemoryStore`] — process memory, for tests and throwaway runs
//! - [`SqliteStore`] — a SQLite file via `sqlx`

pub mod in_memory;
pub mod sqlite;

pub use in_memory::InMemoryStore;
pub use sqlite::SqliteStore;

use dispatch_core::error::StoreError;
use dispatch_core::store::ChatStore;
use std::sync::Arc;

/// Open the backend named in configuration.
pub async fn open(config: &dispatch_config::StoreConfig) -> Result<Arc<dyn ChatStore>, StoreError> {
    match config.backend.as_str() {
        "memory" => Ok(Arc::new(InMemoryStore::new())),
        "sqlite" => {
            let path = config.resolved_path();
            if let Some(parent) = path.parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| StoreError::Storage(format!("create {}: {e}", parent.display())))?;
            }
            let url = format!("sqlite://{}", path.display());
            Ok(Arc::new(SqliteStore::new(&url).await?))
        }
        other => Err(StoreError::Storage(format!("unknown store backend '{other}'"))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn open_memory_backend() {
        let config = dispatch_config::StoreConfig {
            backend: "memory".into(),
            path: String::new(),
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "in_memory");
    }

    #[tokio::test]
    async fn open_sqlite_backend_creates_parent_dir() {
        let dir = tempfile::tempdir().unwrap();
        let config = dispatch_config::StoreConfig {
            backend: "sqlite".into(),
            path: dir.path().join("nested/chat.db").display().to_string(),
        };
        let store = open(&config).await.unwrap();
        assert_eq!(store.name(), "sqlite");
        assert!(dir.path().join("nested").exists());
    }

    #[tokio::test]
    async fn unknown_backend_is_rejected() {
        let config = dispatch_config::StoreConfig {
            backend: "postgres".into(),
            path: String::new(),
        };
        assert!(open(&config).await.is_err());
    }
}
