use crate::errors::{ConfigError, Result};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;

/// How history is treated for a run.
#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum RunMode {
    /// Standalone crawl: history is loaded and flushed.
    #[default]
    Offline,
    /// Task server: history stays in memory, never read or flushed.
    Server,
}

/// Crawler Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct CrawlerConfig {
    /// Size of the global concurrency gate
    pub thread_num: usize,
    /// Per-run request limit (0 = unlimited, >0 hard cap, <0 soft cap)
    pub limit: i64,
    /// Proxy rotation interval in minutes (0 disables proxies)
    pub proxy_minute: u64,
    /// Reuse the previous run's success set
    pub success_inherit: bool,
    /// Retry the previous run's failure set
    pub failure_inherit: bool,
    pub mode: RunMode,
}

impl Default for CrawlerConfig {
    fn default() -> Self {
        Self {
            thread_num: 20,
            limit: 0,
            proxy_minute: 0,
            success_inherit: true,
            failure_inherit: true,
            mode: RunMode::Offline,
        }
    }
}

impl CrawlerConfig {
    pub fn set_thread_num(&mut self, thread_num: usize) -> Result<&mut Self> {
        if thread_num == 0 {
            return Err(ConfigError::InvalidValue {
                field: "thread_num",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        self.thread_num = thread_num;
        Ok(self)
    }

    pub fn set_limit(&mut self, limit: i64) -> Result<&mut Self> {
        if limit == i64::MIN {
            return Err(ConfigError::InvalidValue {
                field: "limit",
                reason: "out of range".to_string(),
            }
            .into());
        }
        self.limit = limit;
        Ok(self)
    }

    pub fn set_proxy_minute(&mut self, minutes: u64) -> Result<&mut Self> {
        if minutes > 24 * 60 {
            return Err(ConfigError::InvalidValue {
                field: "proxy_minute",
                reason: format!("{minutes} exceeds one day"),
            }
            .into());
        }
        self.proxy_minute = minutes;
        Ok(self)
    }

    pub fn set_success_inherit(&mut self, inherit: bool) -> &mut Self {
        self.success_inherit = inherit;
        self
    }

    pub fn set_failure_inherit(&mut self, inherit: bool) -> &mut Self {
        self.failure_inherit = inherit;
        self
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum HistoryBackendKind {
    /// One JSON object file per collection
    #[default]
    File,
    /// Relational table per collection
    Sql,
    /// Redis hash per collection
    Redis,
    /// Process memory only
    Memory,
}

/// History storage configuration
#[derive(Serialize, Deserialize, Clone)]
#[serde(default)]
pub struct HistoryConfig {
    pub backend: HistoryBackendKind,
    /// Directory for the file backend
    pub dir: PathBuf,
    /// Connection URL for the sql backend
    pub database_url: Option<String>,
    /// Connection URL for the redis backend
    pub redis_url: Option<String>,
}

impl Default for HistoryConfig {
    fn default() -> Self {
        Self {
            backend: HistoryBackendKind::File,
            dir: PathBuf::from("history"),
            database_url: None,
            redis_url: None,
        }
    }
}

impl fmt::Debug for HistoryConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("HistoryConfig")
            .field("backend", &self.backend)
            .field("dir", &self.dir)
            .field("database_url", &self.database_url.as_ref().map(|_| "***REDACTED***"))
            .field("redis_url", &self.redis_url.as_ref().map(|_| "***REDACTED***"))
            .finish()
    }
}

/// Proxy pool configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(default)]
pub struct ProxyConfig {
    /// Proxy list file, one proxy per line
    pub path: Option<PathBuf>,
    /// Connect/dial timeout for every probe
    pub probe_timeout_secs: u64,
    /// Tries per proxy when testing against a target host
    pub test_retries: usize,
    pub max_probe_concurrency: usize,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            path: None,
            probe_timeout_secs: 4,
            test_retries: 3,
            max_probe_concurrency: 1000,
        }
    }
}

/// Main Configuration
#[derive(Serialize, Deserialize, Debug, Clone)]
pub struct Config {
    /// Namespace used in storage keys and log file names
    pub name: String,
    #[serde(default)]
    pub crawler: CrawlerConfig,
    #[serde(default)]
    pub history: HistoryConfig,
    #[serde(default)]
    pub proxy: ProxyConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            name: "matrixcrawl".to_string(),
            crawler: CrawlerConfig::default(),
            history: HistoryConfig::default(),
            proxy: ProxyConfig::default(),
        }
    }
}

impl Config {
    /// Loads configuration from a TOML file
    pub fn load(path: &str) -> Result<Self> {
        let config_str =
            std::fs::read_to_string(path).map_err(|e| ConfigError::Read(Box::new(e)))?;
        Self::from_toml(&config_str)
    }

    pub fn from_toml(config_str: &str) -> Result<Self> {
        let config: Config =
            toml::from_str(config_str).map_err(|e| ConfigError::Parse(Box::new(e)))?;
        if config.crawler.thread_num == 0 {
            return Err(ConfigError::InvalidValue {
                field: "thread_num",
                reason: "must be at least 1".to_string(),
            }
            .into());
        }
        Ok(config)
    }
}
