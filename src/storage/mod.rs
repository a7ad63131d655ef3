//! Persistence for ingested records and media
//!
//! - [`repository`]: the record store, which owns the uniqueness guarantee
//! - [`media`]: content-addressed object storage for article images

pub mod media;
pub mod repository;

pub use media::{
    media_key, sniff_image_type, FsObjectStore, ImageType, MemoryObjectStore, ObjectStore,
};
pub use repository::{
    InsertOutcome, MemoryRecordStore, RecordStore, SharedRecordStore, SourceCount,
    SqliteRecordStore,
};

use std::sync::Arc;

use crate::config::StorageConfig;
use crate::utils::error::StoreError;

/// Storage backends opened for one worker
#[derive(Clone)]
pub struct Storage {
    pub records: Arc<SqliteRecordStore>,
    pub media: Arc<FsObjectStore>,
}

impl Storage {
    /// Open the SQLite database and the media root
    pub async fn open(config: &StorageConfig) -> Result<Self, StoreError> {
        let path = config.database_path.clone();
        let records = tokio::task::spawn_blocking(move || SqliteRecordStore::new(path))
            .await
            .map_err(|e| StoreError::Task(e.to_string()))??;
        let media = FsObjectStore::open(&config.media_dir).await?;

        Ok(Self {
            records: Arc::new(records),
            media: Arc::new(media),
        })
    }
}
