//! Durable success/failure history for request matrices.

pub mod backend;
pub mod file_backend;
pub mod history_store;
pub mod local_backend;
pub mod redis_backend;
pub mod sql_backend;

#[cfg(test)]
mod tests;

pub use backend::{HistoryBackend, RecordKind};
pub use file_backend::FileBackend;
pub use history_store::HistoryStore;
pub use local_backend::LocalBackend;
pub use redis_backend::RedisBackend;
pub use sql_backend::SqlBackend;

use crate::common::model::{Config, HistoryBackendKind};
use crate::errors::{ConfigError, Result};
use std::sync::Arc;

/// Builds the storage backend selected by `[history] backend`.
pub async fn build_backend(config: &Config) -> Result<Arc<dyn HistoryBackend>> {
    let history = &config.history;
    let backend: Arc<dyn HistoryBackend> = match history.backend {
        HistoryBackendKind::File => Arc::new(FileBackend::new(history.dir.clone())),
        HistoryBackendKind::Memory => Arc::new(LocalBackend::new()),
        HistoryBackendKind::Sql => {
            let url = history.database_url.as_deref().ok_or(ConfigError::InvalidValue {
                field: "history.database_url",
                reason: "required for the sql backend".to_string(),
            })?;
            Arc::new(SqlBackend::connect(url).await?)
        }
        HistoryBackendKind::Redis => {
            let url = history.redis_url.as_deref().ok_or(ConfigError::InvalidValue {
                field: "history.redis_url",
                reason: "required for the redis backend".to_string(),
            })?;
            Arc::new(RedisBackend::connect(url, &config.name)?)
        }
    };
    log::info!("[History] using {} backend", backend.name());
    Ok(backend)
}
