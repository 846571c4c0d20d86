//! Opening the configured memory and event backends.

use mindloop_config::{AppConfig, StorageBackend};
use mindloop_core::event::EventStore;
use mindloop_core::memory::MemoryStore;
use mindloop_events::{InMemoryEventStore, SqliteEventStore};
use mindloop_memory::{InMemoryStore, SqliteMemoryStore};
use std::sync::Arc;
use tracing::info;

pub struct Stores {
    pub memory: Arc<dyn MemoryStore>,
    pub events: Arc<dyn EventStore>,
}

pub async fn open(config: &AppConfig) -> Result<Stores, Box<dyn std::error::Error>> {
    match config.storage.backend {
        StorageBackend::Memory => {
            info!("Using in-memory stores; history ends with this process");
            Ok(Stores {
                memory: Arc::new(InMemoryStore::new()),
                events: Arc::new(InMemoryEventStore::new()),
            })
        }
        StorageBackend::Sqlite => {
            let path = database_path(config)?;
            info!(path = %path, "Opening SQLite stores");
            Ok(Stores {
                memory: Arc::new(SqliteMemoryStore::new(&path).await?),
                events: Arc::new(SqliteEventStore::new(&path).await?),
            })
        }
    }
}

/// Commands that read history need a durable backend.
pub async fn open_events(config: &AppConfig) -> Result<SqliteEventStore, Box<dyn std::error::Error>> {
    require_sqlite(config)?;
    Ok(SqliteEventStore::new(&database_path(config)?).await?)
}

pub async fn open_memory(
    config: &AppConfig,
) -> Result<SqliteMemoryStore, Box<dyn std::error::Error>> {
    require_sqlite(config)?;
    Ok(SqliteMemoryStore::new(&database_path(config)?).await?)
}

fn require_sqlite(config: &AppConfig) -> Result<(), Box<dyn std::error::Error>> {
    if config.storage.backend != StorageBackend::Sqlite {
        return Err(
            "History is only kept with the sqlite backend (set storage.backend = \"sqlite\")"
                .into(),
        );
    }
    Ok(())
}

fn database_path(config: &AppConfig) -> Result<String, Box<dyn std::error::Error>> {
    let path = config.storage.db_path();
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    Ok(path.to_string_lossy().into_owned())
}
