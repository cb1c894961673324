//! In-memory store for tests and embedders that skip persistence.

use super::{TaskRecord, TaskStore};
use anyhow::Result;
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Mutex;

/// Hash-map backed [`TaskStore`]. Clones share the same map.
#[derive(Debug, Default)]
pub struct MemoryTaskStore {
    records: Mutex<HashMap<String, TaskRecord>>,
}

impl MemoryTaskStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl TaskStore for MemoryTaskStore {
    async fn save(&self, record: &TaskRecord) -> Result<()> {
        let mut map = self.records.lock().expect("store poisoned");
        map.insert(record.task_id.clone(), record.clone());
        Ok(())
    }

    async fn load(&self, task_id: &str) -> Result<Option<TaskRecord>> {
        let map = self.records.lock().expect("store poisoned");
        Ok(map.get(task_id).cloned())
    }

    async fn load_all(&self) -> Result<Vec<TaskRecord>> {
        let map = self.records.lock().expect("store poisoned");
        let mut all: Vec<TaskRecord> = map.values().cloned().collect();
        all.sort_by_key(|r| (r.created_at, r.task_id.clone()));
        Ok(all)
    }

    async fn remove(&self, task_id: &str) -> Result<()> {
        let mut map = self.records.lock().expect("store poisoned");
        map.remove(task_id);
        Ok(())
    }
}
