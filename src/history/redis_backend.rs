use crate::errors::{HistoryError, Result};
use crate::history::backend::{HistoryBackend, RecordKind};
use deadpool_redis::Pool;
use deadpool_redis::redis::AsyncCommands;
use std::collections::HashMap;

/// Document-store backend: one Redis hash per collection, keyed by fingerprint.
pub struct RedisBackend {
    pool: Pool,
    namespace: String,
}

impl RedisBackend {
    pub fn new(pool: Pool, namespace: impl Into<String>) -> Self {
        Self {
            pool,
            namespace: namespace.into(),
        }
    }

    pub fn connect(url: &str, namespace: &str) -> Result<Self> {
        let cfg = deadpool_redis::Config::from_url(url);
        let pool = cfg
            .create_pool(Some(deadpool_redis::Runtime::Tokio1))
            .map_err(|e| HistoryError::Connection(Box::new(e)))?;
        Ok(Self::new(pool, namespace))
    }

    pub fn key_of(&self, collection: &str) -> String {
        format!("{}:{}", self.namespace, collection)
    }
}

#[async_trait::async_trait]
impl HistoryBackend for RedisBackend {
    fn name(&self) -> &'static str {
        "redis"
    }

    async fn load(&self, collection: &str, _kind: RecordKind) -> Result<HashMap<String, String>> {
        let mut conn = self.pool.get().await?;
        let records: HashMap<String, String> = conn.hgetall(self.key_of(collection)).await?;
        Ok(records)
    }

    async fn replace(
        &self,
        collection: &str,
        _kind: RecordKind,
        records: &HashMap<String, String>,
    ) -> Result<usize> {
        let key = self.key_of(collection);
        let mut conn = self.pool.get().await?;

        // MULTI/EXEC: drop and refill in one step
        let mut pipe = deadpool_redis::redis::pipe();
        pipe.atomic().del(&key).ignore();
        if !records.is_empty() {
            let items: Vec<(&String, &String)> = records.iter().collect();
            pipe.hset_multiple(&key, &items).ignore();
        }
        let _: () = pipe.query_async(&mut conn).await?;
        Ok(records.len())
    }
}
