use crate::errors::Result;
use crate::history::backend::{HistoryBackend, RecordKind};
use dashmap::DashMap;
use std::collections::HashMap;

/// Process-local backend used in server mode and tests.
#[derive(Debug, Default)]
pub struct LocalBackend {
    store: DashMap<String, HashMap<String, String>>,
}

impl LocalBackend {
    pub fn new() -> Self {
        Self {
            store: DashMap::new(),
        }
    }
}

#[async_trait::async_trait]
impl HistoryBackend for LocalBackend {
    fn name(&self) -> &'static str {
        "memory"
    }

    async fn load(&self, collection: &str, _kind: RecordKind) -> Result<HashMap<String, String>> {
        Ok(self
            .store
            .get(collection)
            .map(|entry| entry.value().clone())
            .unwrap_or_default())
    }

    async fn replace(
        &self,
        collection: &str,
        _kind: RecordKind,
        records: &HashMap<String, String>,
    ) -> Result<usize> {
        if records.is_empty() {
            self.store.remove(collection);
        } else {
            self.store.insert(collection.to_string(), records.clone());
        }
        Ok(records.len())
    }
}
