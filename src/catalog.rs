//! Dataset catalog - the currently installed snapshot.
//!
//! Queries clone the `Arc<Snapshot>` at start and keep using it even if a
//! refresh installs a newer one meanwhile.

use crate::config::{AppConfig, StoreKind};
use crate::error::{EngineError, Result};
use crate::ingestion;
use crate::store::{MemoryStore, SqliteStore, TabularStore};
use chrono::{DateTime, Utc};
use std::sync::{Arc, RwLock};
use tracing::info;
use uuid::Uuid;

/// One immutable dataset version.
pub struct Snapshot {
    version: Uuid,
    store: Arc<dyn TabularStore>,
    source: String,
    loaded_at: DateTime<Utc>,
}

impl Snapshot {
    pub fn new(store: Arc<dyn TabularStore>, source: impl Into<String>) -> Self {
        Self {
            version: Uuid::new_v4(),
            store,
            source: source.into(),
            loaded_at: Utc::now(),
        }
    }

    pub fn version(&self) -> Uuid {
        self.version
    }

    pub fn store(&self) -> &dyn TabularStore {
        self.store.as_ref()
    }

    /// Where the data came from (file path or a test label).
    pub fn source(&self) -> &str {
        &self.source
    }

    pub fn loaded_at(&self) -> DateTime<Utc> {
        self.loaded_at
    }
}

#[derive(Default)]
pub struct DatasetCatalog {
    current: RwLock<Option<Arc<Snapshot>>>,
}

impl DatasetCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_snapshot(snapshot: Snapshot) -> Self {
        Self { current: RwLock::new(Some(Arc::new(snapshot))) }
    }

    /// Swap in a new snapshot. Returns the version id assigned to it.
    pub fn install(&self, snapshot: Snapshot) -> Result<Uuid> {
        let version = snapshot.version();
        let mut current = self
            .current
            .write()
            .map_err(|_| EngineError::Store("Catalog lock poisoned".to_string()))?;
        info!(
            "Installed dataset snapshot {} from {} ({} store)",
            version,
            snapshot.source(),
            snapshot.store().name()
        );
        *current = Some(Arc::new(snapshot));
        Ok(version)
    }

    pub fn current(&self) -> Result<Arc<Snapshot>> {
        let current = self
            .current
            .read()
            .map_err(|_| EngineError::Store("Catalog lock poisoned".to_string()))?;
        current
            .as_ref()
            .cloned()
            .ok_or_else(|| EngineError::StoreUnavailable("No dataset loaded".to_string()))
    }

    pub fn clear(&self) {
        if let Ok(mut current) = self.current.write() {
            *current = None;
        }
    }
}

/// Open the store selected in the configuration. A missing SQLite snapshot
/// is rebuilt from the cleaned CSV when that file exists.
pub fn open_store(config: &AppConfig) -> Result<Snapshot> {
    let snapshot = match config.store {
        StoreKind::Sqlite => {
            if !config.db_path.exists() && config.csv_path.exists() {
                info!(
                    "No snapshot at {}, rebuilding from {}",
                    config.db_path.display(),
                    config.csv_path.display()
                );
                ingestion::rebuild_snapshot_from_clean_csv(config)?;
            }
            let store: Arc<dyn TabularStore> = Arc::new(SqliteStore::open(&config.db_path)?);
            Snapshot::new(store, config.db_path.display().to_string())
        }
        StoreKind::Memory => {
            let store: Arc<dyn TabularStore> = Arc::new(MemoryStore::from_csv(&config.csv_path)?);
            Snapshot::new(store, config.csv_path.display().to_string())
        }
    };
    Ok(snapshot)
}
