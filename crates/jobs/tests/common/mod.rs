//! Shared fixtures for job manager integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use dossier_core::job::NewJob;
use dossier_jobs::JobManager;
use dossier_store::{StateStore, StoreError};

/// In-memory store that counts writes.
#[derive(Default)]
pub struct MemoryStore {
    entries: Mutex<HashMap<String, serde_json::Value>>,
    puts: Mutex<usize>,
}

impl MemoryStore {
    pub fn put_count(&self) -> usize {
        *self.puts.lock().unwrap()
    }

    pub fn raw(&self, key: &str) -> Option<serde_json::Value> {
        self.entries.lock().unwrap().get(key).cloned()
    }
}

#[async_trait]
impl StateStore for MemoryStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        self.entries
            .lock()
            .unwrap()
            .insert(key.to_string(), value.clone());
        *self.puts.lock().unwrap() += 1;
        Ok(())
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Ok(self.entries.lock().unwrap().get(key).cloned())
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }

    fn is_durable(&self) -> bool {
        false
    }
}

/// Store whose every operation fails.
pub struct FailingStore;

#[async_trait]
impl StateStore for FailingStore {
    async fn put(&self, _key: &str, _value: &serde_json::Value) -> Result<(), StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk on fire")))
    }

    async fn get(&self, _key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        Err(StoreError::Io(std::io::Error::other("disk on fire")))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }

    fn is_durable(&self) -> bool {
        true
    }
}

/// Store whose writes take longer for unfinished jobs than for finished
/// ones, so later snapshots would overtake earlier ones if writes raced.
#[derive(Default)]
pub struct SlowStore {
    inner: MemoryStore,
}

impl SlowStore {
    pub fn raw(&self, key: &str) -> Option<serde_json::Value> {
        self.inner.raw(key)
    }

    fn latency(value: &serde_json::Value) -> Duration {
        match value["status"].as_str() {
            Some("completed") | Some("failed") => Duration::from_millis(1),
            _ => Duration::from_millis(30),
        }
    }
}

#[async_trait]
impl StateStore for SlowStore {
    async fn put(&self, key: &str, value: &serde_json::Value) -> Result<(), StoreError> {
        tokio::time::sleep(Self::latency(value)).await;
        self.inner.put(key, value).await
    }

    async fn get(&self, key: &str) -> Result<Option<serde_json::Value>, StoreError> {
        self.inner.get(key).await
    }

    fn backend_name(&self) -> &'static str {
        "slow"
    }

    fn is_durable(&self) -> bool {
        false
    }
}

pub fn slow_manager() -> (Arc<JobManager>, Arc<SlowStore>) {
    let store = Arc::new(SlowStore::default());
    let manager = Arc::new(JobManager::new(store.clone()));
    (manager, store)
}

pub fn memory_manager() -> (Arc<JobManager>, Arc<MemoryStore>) {
    let store = Arc::new(MemoryStore::default());
    let manager = Arc::new(JobManager::new(store.clone()));
    (manager, store)
}

pub fn new_job(slug: &str) -> NewJob {
    NewJob {
        owner_slug: slug.to_string(),
        query: format!("Write an initiation report on {slug}"),
        configuration_level: "standard".to_string(),
        attachments: vec![serde_json::json!({"name": "10-K.pdf"})],
        conversation_context: None,
    }
}
