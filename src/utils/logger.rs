use once_cell::sync::OnceCell;
use std::env;
use std::path::PathBuf;
use std::sync::atomic::{AtomicBool, Ordering};
use tracing_appender::non_blocking::WorkerGuard;
use tracing_appender::rolling::Rotation;
use tracing_log::LogTracer;
use tracing_subscriber::fmt;
use tracing_subscriber::layer::{Layer, SubscriberExt};
use tracing_subscriber::registry::Registry;
use tracing_subscriber::{EnvFilter, util::SubscriberInitExt};

// Hold the non-blocking writer guard to keep the background logging thread alive
static FILE_GUARD: OnceCell<WorkerGuard> = OnceCell::new();

// Logger initialization flag
static LOGGER_INITIALIZED: AtomicBool = AtomicBool::new(false);

const DEFAULT_APP_LOG_LEVEL: &str = "info,matrixcrawl=debug,sqlx=warn,sea_orm=warn,hyper=warn";

/// Logger configuration structure
///
/// # Examples
///
/// ```
/// use std::path::PathBuf;
/// use matrixcrawl::utils::logger::LoggerConfig;
///
/// let config = LoggerConfig::new()
///     .with_level("debug")
///     .with_file_path(PathBuf::from("./logs/crawl.log"))
///     .with_console(true);
/// assert_eq!(config.level, "debug");
/// ```
#[derive(Debug, Clone)]
pub struct LoggerConfig {
    /// Log level filter (trace, debug, info, warn, error)
    pub level: String,
    /// Optional file path for the rolling log file
    pub file_path: Option<PathBuf>,
    /// Whether to enable console output
    pub enable_console: bool,
    /// Whether to use JSON format for logs
    pub json_format: bool,
}

impl LoggerConfig {
    /// Initialize the logger with this configuration
    pub async fn init(self) -> Result<(), Box<dyn std::error::Error>> {
        init_logger(self).await
    }

    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_level(mut self, level: impl AsRef<str>) -> Self {
        self.level = level.as_ref().into();
        self
    }

    pub fn with_file_path(mut self, path: PathBuf) -> Self {
        self.file_path = Some(path);
        self
    }

    pub fn without_file(mut self) -> Self {
        self.file_path = None;
        self
    }

    pub fn with_console(mut self, enable: bool) -> Self {
        self.enable_console = enable;
        self
    }

    pub fn with_json(mut self, enable: bool) -> Self {
        self.json_format = enable;
        self
    }

    /// Console plus a daily file named after the crawl namespace.
    pub fn for_app(namespace: &str) -> Self {
        Self {
            level: DEFAULT_APP_LOG_LEVEL.to_string(),
            file_path: Some(PathBuf::from("logs").join(format!("matrixcrawl.{namespace}"))),
            enable_console: true,
            json_format: false,
        }
    }
}

impl Default for LoggerConfig {
    fn default() -> Self {
        Self {
            level: "error".to_string(),
            file_path: Some(PathBuf::from("./logs/crawl.log")),
            enable_console: true,
            json_format: false,
        }
    }
}

pub fn is_logging_disabled() -> bool {
    let value = env::var("DISABLE_LOGS")
        .or_else(|_| env::var("MATRIXCRAWL_DISABLE_LOGS"))
        .unwrap_or_default();
    matches!(
        value.trim().to_lowercase().as_str(),
        "1" | "true" | "yes" | "y" | "on"
    )
}

/// Initialize logger with app defaults.
/// Returns Ok(true) if enabled, Ok(false) if disabled by env.
pub async fn init_app_logger(namespace: &str) -> Result<bool, Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        return Ok(false);
    }
    init_logger(LoggerConfig::for_app(namespace)).await?;
    Ok(true)
}

/// Initialize and configure tracing logger
pub async fn init_logger(config: LoggerConfig) -> Result<(), Box<dyn std::error::Error>> {
    if is_logging_disabled() {
        let _ = LOGGER_INITIALIZED.swap(true, Ordering::SeqCst);
        return Ok(());
    }
    if LOGGER_INITIALIZED.swap(true, Ordering::SeqCst) {
        tracing::warn!("Logger already initialized, skipping re-initialization");
        return Ok(());
    }

    // bridge log crate
    let _ = LogTracer::builder()
        .with_max_level(log::LevelFilter::Trace)
        .init();

    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(config.level.to_lowercase()))
        .unwrap_or_else(|_| EnvFilter::new("info"));

    let mut layers: Vec<Box<dyn Layer<Registry> + Send + Sync>> = Vec::new();

    if config.enable_console {
        if config.json_format {
            layers.push(fmt::layer().json().boxed());
        } else {
            layers.push(
                fmt::layer()
                    .compact()
                    .with_target(false)
                    .with_thread_ids(true)
                    .boxed(),
            );
        }
    }

    if let Some(file_path) = config.file_path {
        let dir = file_path
            .parent()
            .filter(|p| !p.as_os_str().is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| PathBuf::from("."));
        std::fs::create_dir_all(&dir)?;
        let prefix = file_path
            .file_name()
            .map(|name| name.to_string_lossy().to_string())
            .unwrap_or_else(|| "crawl".to_string());
        let file_appender = tracing_appender::rolling::Builder::new()
            .rotation(Rotation::DAILY)
            .filename_prefix(prefix)
            .filename_suffix("log")
            .build(dir)?;

        let (file_writer, guard) = tracing_appender::non_blocking(file_appender);
        let _ = FILE_GUARD.set(guard);

        let layer = if config.json_format {
            fmt::layer().json().with_writer(file_writer).boxed()
        } else {
            fmt::layer().with_ansi(false).with_writer(file_writer).boxed()
        };
        layers.push(layer);
    }

    let _ = tracing_subscriber::registry()
        .with(layers)
        .with(filter)
        .try_init();
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logger_config_builder() {
        let config = LoggerConfig::new()
            .with_level("debug")
            .with_file_path(PathBuf::from("./test.log"))
            .with_console(false);

        assert_eq!(config.level, "debug");
        assert_eq!(config.file_path, Some(PathBuf::from("./test.log")));
        assert!(!config.enable_console);
    }

    #[test]
    fn test_for_app_names_file_after_namespace() {
        let config = LoggerConfig::for_app("news");
        assert_eq!(
            config.file_path,
            Some(PathBuf::from("logs").join("matrixcrawl.news"))
        );
        assert!(config.enable_console);
    }

    #[tokio::test]
    async fn test_logger_init_is_idempotent() {
        let config = LoggerConfig::new().with_level("info").without_file();
        assert!(init_logger(config.clone()).await.is_ok());
        assert!(init_logger(config).await.is_ok());
        log::info!("logger bridged");
    }
}
