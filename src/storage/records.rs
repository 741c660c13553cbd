use std::collections::HashMap;
use std::path::PathBuf;

use anyhow::Result;
use async_trait::async_trait;
use tokio::sync::RwLock;

use crate::record::{GenerationId, GenerationRecord};
use crate::storage::{BlobStore, LocalFileStorage};

/// Key-value store for generation records, keyed by generation id.
#[async_trait]
pub trait RecordStore: Send + Sync {
    async fn put(&self, id: &GenerationId, record: &GenerationRecord) -> Result<()>;
    async fn get(&self, id: &GenerationId) -> Result<Option<GenerationRecord>>;
    async fn health_check(&self) -> Result<()>;
}

/// One pretty-printed JSON file per record.
#[derive(Clone, Debug)]
pub struct FileRecordStore {
    storage: LocalFileStorage,
}

impl FileRecordStore {
    pub fn new(dir: PathBuf) -> Self {
        Self {
            storage: LocalFileStorage::new(dir, String::new()),
        }
    }

    fn key(id: &GenerationId) -> String {
        format!("{id}.json")
    }
}

#[async_trait]
impl RecordStore for FileRecordStore {
    async fn put(&self, id: &GenerationId, record: &GenerationRecord) -> Result<()> {
        let payload = serde_json::to_vec_pretty(record)?;
        self.storage.put(&Self::key(id), &payload).await?;
        Ok(())
    }

    async fn get(&self, id: &GenerationId) -> Result<Option<GenerationRecord>> {
        match self.storage.get(&Self::key(id)).await? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    async fn health_check(&self) -> Result<()> {
        tokio::fs::create_dir_all(self.storage.base_dir()).await?;
        Ok(())
    }
}

#[derive(Debug, Default)]
pub struct MemoryRecordStore {
    records: RwLock<HashMap<GenerationId, GenerationRecord>>,
}

impl MemoryRecordStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

#[async_trait]
impl RecordStore for MemoryRecordStore {
    async fn put(&self, id: &GenerationId, record: &GenerationRecord) -> Result<()> {
        self.records.write().await.insert(id.clone(), record.clone());
        Ok(())
    }

    async fn get(&self, id: &GenerationId) -> Result<Option<GenerationRecord>> {
        Ok(self.records.read().await.get(id).cloned())
    }

    async fn health_check(&self) -> Result<()> {
        Ok(())
    }
}
