//! Storage and service wiring

use std::path::Path;
use std::sync::Arc;

use anyhow::Context;
use tracing::info;

use redlog_core::{AuditSink, IngestConfig, Ingestor, RecordStore, TagGovernor};
use redlog_persistence::{
    EmbeddedPersistService, ExternalDbPersistService, PersistenceService, StorageMode,
    create_schema,
};

use crate::model::config::Configuration;

/// Open the configured backend and verify it answers
pub async fn open_persistence(
    configuration: &Configuration,
) -> anyhow::Result<Arc<dyn PersistenceService>> {
    let storage_mode = configuration.storage_mode()?;
    info!("Storage mode: {}", storage_mode);

    let persistence: Arc<dyn PersistenceService> = match storage_mode {
        StorageMode::ExternalDb => {
            let db = configuration.database_connection().await?;
            create_schema(&db)
                .await
                .context("failed to create database schema")?;
            Arc::new(ExternalDbPersistService::new(db))
        }
        StorageMode::StandaloneEmbedded => open_embedded(&configuration.data_dir())?,
    };

    persistence
        .health_check()
        .await
        .context("storage health check failed")?;
    Ok(persistence)
}

fn open_embedded(data_dir: &Path) -> anyhow::Result<Arc<dyn PersistenceService>> {
    info!("Initializing standalone embedded storage at: {}", data_dir.display());
    std::fs::create_dir_all(data_dir)
        .with_context(|| format!("failed to create data directory {}", data_dir.display()))?;
    let store = EmbeddedPersistService::open(data_dir)
        .with_context(|| format!("failed to open RocksDB at {}", data_dir.display()))?;
    Ok(Arc::new(store))
}

/// The governance services over one backend
#[derive(Clone)]
pub struct Services {
    pub persistence: Arc<dyn PersistenceService>,
    pub tags: Arc<TagGovernor>,
    pub records: Arc<RecordStore>,
    pub ingestor: Arc<Ingestor>,
}

impl Services {
    pub fn new(
        persistence: Arc<dyn PersistenceService>,
        ingest_config: IngestConfig,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let tags = Arc::new(TagGovernor::new(persistence.clone(), audit.clone()));
        let records = Arc::new(RecordStore::new(
            persistence.clone(),
            tags.clone(),
            audit.clone(),
        ));
        let ingestor = Arc::new(Ingestor::new(records.clone(), ingest_config, audit));
        Self {
            persistence,
            tags,
            records,
            ingestor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::config::ConfigOverrides;
    use redlog_core::MemoryAuditSink;

    #[tokio::test]
    async fn test_open_embedded_from_configuration() {
        let tmp = tempfile::tempdir().unwrap();
        let overrides = ConfigOverrides {
            storage_mode: Some("standalone_embedded".to_string()),
            data_dir: Some(tmp.path().join("db")),
            ..Default::default()
        };
        let configuration =
            Configuration::load(Path::new("does/not/exist.yml"), &overrides).unwrap();

        let persistence = open_persistence(&configuration).await.unwrap();
        assert_eq!(persistence.storage_mode(), StorageMode::StandaloneEmbedded);

        let services = Services::new(
            persistence,
            IngestConfig::default(),
            Arc::new(MemoryAuditSink::new()),
        );
        assert!(services.tags.list_tags().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_external_db_requires_url() {
        let overrides = ConfigOverrides {
            storage_mode: Some("external_db".to_string()),
            ..Default::default()
        };
        let configuration =
            Configuration::load(Path::new("does/not/exist.yml"), &overrides).unwrap();
        assert!(open_persistence(&configuration).await.is_err());
    }
}
