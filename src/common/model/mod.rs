pub mod config;
pub mod request;

pub use config::{Config, CrawlerConfig, HistoryBackendKind, HistoryConfig, ProxyConfig, RunMode};
pub use request::{DownloaderKind, Request};
