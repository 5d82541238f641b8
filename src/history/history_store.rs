use crate::common::model::Request;
use crate::errors::Result;
use crate::history::backend::{HistoryBackend, RecordKind};
use crate::utils::hash::history_collection;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

/// Success and failure sets of one spider instance.
///
/// Both sets live in memory and are authoritative; `flush_*` writes a full
/// snapshot to the backend, replacing what was persisted before.
pub struct HistoryStore {
    backend: Arc<dyn HistoryBackend>,
    success_collection: String,
    failure_collection: String,
    /// fingerprint -> serialized request
    success: RwLock<HashMap<String, String>>,
    failure: RwLock<HashMap<String, Request>>,
}

impl HistoryStore {
    pub fn new(backend: Arc<dyn HistoryBackend>, spider: &str, sub: &str) -> Self {
        Self {
            backend,
            success_collection: history_collection(true, spider, sub),
            failure_collection: history_collection(false, spider, sub),
            success: RwLock::new(HashMap::new()),
            failure: RwLock::new(HashMap::new()),
        }
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.name()
    }

    pub fn success_collection(&self) -> &str {
        &self.success_collection
    }

    pub fn failure_collection(&self) -> &str {
        &self.failure_collection
    }

    /// Replaces the in-memory success set with the persisted one.
    pub async fn load_success(&self) -> Result<usize> {
        let records = self
            .backend
            .load(&self.success_collection, RecordKind::Success)
            .await?;
        let len = records.len();
        *self.success.write().await = records;
        Ok(len)
    }

    /// Merges the persisted failure set into memory. Unreadable payloads are
    /// skipped.
    pub async fn load_failure(&self) -> Result<usize> {
        let records = self
            .backend
            .load(&self.failure_collection, RecordKind::Failure)
            .await?;
        let mut failure = self.failure.write().await;
        for (fingerprint, payload) in records {
            match Request::deserialize(&payload) {
                Ok(req) => {
                    failure.entry(fingerprint).or_insert(req);
                }
                Err(e) => log::warn!("[History] skip failure record {fingerprint}: {e}"),
            }
        }
        Ok(failure.len())
    }

    pub async fn has_success(&self, fingerprint: &str) -> bool {
        self.success.read().await.contains_key(fingerprint)
    }

    /// Records a success; false when the fingerprint was already present.
    pub async fn upsert_success(&self, req: &Request) -> Result<bool> {
        let payload = req.serialize()?;
        let mut success = self.success.write().await;
        if success.contains_key(req.fingerprint()) {
            return Ok(false);
        }
        success.insert(req.fingerprint().to_string(), payload);
        Ok(true)
    }

    pub async fn delete_success(&self, fingerprint: &str) {
        self.success.write().await.remove(fingerprint);
    }

    pub async fn success_len(&self) -> usize {
        self.success.read().await.len()
    }

    /// Takes the whole failure set, leaving an empty one for new inserts.
    pub async fn pull_failure(&self) -> HashMap<String, Request> {
        std::mem::take(&mut *self.failure.write().await)
    }

    /// Inserts when absent; returns false without touching an existing entry.
    pub async fn upsert_failure(&self, req: Request) -> bool {
        let mut failure = self.failure.write().await;
        if failure.contains_key(req.fingerprint()) {
            return false;
        }
        failure.insert(req.fingerprint().to_string(), req);
        true
    }

    pub async fn delete_failure(&self, fingerprint: &str) {
        self.failure.write().await.remove(fingerprint);
    }

    pub async fn has_failure(&self, fingerprint: &str) -> bool {
        self.failure.read().await.contains_key(fingerprint)
    }

    pub async fn failure_len(&self) -> usize {
        self.failure.read().await.len()
    }

    /// Persists the full success set.
    pub async fn flush_success(&self) -> Result<usize> {
        let snapshot = self.success.read().await.clone();
        let written = self
            .backend
            .replace(&self.success_collection, RecordKind::Success, &snapshot)
            .await?;
        metrics::counter!("matrixcrawl_history_flush_total", "set" => "success").increment(1);
        Ok(written)
    }

    /// Persists the full failure set.
    pub async fn flush_failure(&self) -> Result<usize> {
        let snapshot = {
            let failure = self.failure.read().await;
            let mut records = HashMap::with_capacity(failure.len());
            for (fingerprint, req) in failure.iter() {
                records.insert(fingerprint.clone(), req.serialize()?);
            }
            records
        };
        let written = self
            .backend
            .replace(&self.failure_collection, RecordKind::Failure, &snapshot)
            .await?;
        metrics::counter!("matrixcrawl_history_flush_total", "set" => "failure").increment(1);
        Ok(written)
    }
}
