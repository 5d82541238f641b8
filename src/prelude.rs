// Common Structs
pub use crate::common::model::{Config, CrawlerConfig, DownloaderKind, Request, RunMode};
pub use crate::common::status::{MatrixLifecycle, RunStatus};

// Errors
pub use crate::errors::{BoxError, Error, ErrorKind, Result};

// Scheduling
pub use crate::engine::{
    ConcurrencyGate, CrawlRunner, MatrixHandle, MatrixStats, RequestMatrix, RunSummary, Scheduler,
    Slot,
};

// Utils
pub use crate::utils::hash::make_hash;

pub mod downloader {
    pub use crate::downloader::Downloader;
    pub use crate::downloader::RequestDownloader;
    pub use crate::downloader::Response;
}
pub mod history {
    pub use crate::history::FileBackend;
    pub use crate::history::HistoryBackend;
    pub use crate::history::HistoryStore;
    pub use crate::history::LocalBackend;
    pub use crate::history::RedisBackend;
    pub use crate::history::SqlBackend;
    pub use crate::history::build_backend;
}
pub mod proxy {
    pub use crate::proxy::NetProbe;
    pub use crate::proxy::ProxyPool;
    pub use crate::proxy::ProxyProbe;
}
pub mod logger {
    pub use crate::utils::logger::LoggerConfig;
    pub use crate::utils::logger::init_app_logger;
    pub use crate::utils::logger::init_logger;
}
