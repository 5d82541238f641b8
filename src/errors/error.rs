use std::error::Error as StdError;
use std::fmt;
use thiserror::Error;

/// Boxed error detail carried as an error source.
pub type BoxError = Box<dyn StdError + Send + Sync + 'static>;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ErrorKind {
    Request,
    Proxy,
    History,
    Scheduler,
    Download,
    Config,
}

impl fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ErrorKind::Request => write!(f, "request"),
            ErrorKind::Proxy => write!(f, "proxy"),
            ErrorKind::History => write!(f, "history"),
            ErrorKind::Scheduler => write!(f, "scheduler"),
            ErrorKind::Download => write!(f, "download"),
            ErrorKind::Config => write!(f, "config"),
        }
    }
}

pub struct ErrorInner {
    pub kind: ErrorKind,
    pub source: Option<BoxError>,
}

pub struct Error {
    pub inner: Box<ErrorInner>,
}

impl Error {
    pub fn new<E>(kind: ErrorKind, source: Option<E>) -> Error
    where
        E: Into<BoxError>,
    {
        Error {
            inner: Box::new(ErrorInner {
                kind,
                source: source.map(Into::into),
            }),
        }
    }

    pub fn kind(&self) -> &ErrorKind {
        &self.inner.kind
    }

    pub fn is_request(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Request)
    }

    pub fn is_proxy(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Proxy)
    }

    pub fn is_history(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::History)
    }

    pub fn is_scheduler(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Scheduler)
    }

    pub fn is_download(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Download)
    }

    pub fn is_config(&self) -> bool {
        matches!(self.inner.kind, ErrorKind::Config)
    }

    /// True when the concurrency gate was closed by a scheduler stop.
    pub fn is_gate_closed(&self) -> bool {
        self.inner
            .source
            .as_ref()
            .and_then(|s| s.downcast_ref::<SchedulerError>())
            .is_some_and(|e| matches!(e, SchedulerError::GateClosed))
    }

    /// Storage classification of a history error, if this is one.
    pub fn storage_class(&self) -> Option<StorageErrorClass> {
        self.inner
            .source
            .as_ref()
            .and_then(|s| s.downcast_ref::<HistoryError>())
            .map(HistoryError::class)
    }

}

impl fmt::Debug for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let mut f = f.debug_struct("matrixcrawl::Error");
        f.field("kind", &self.inner.kind);
        if let Some(ref source) = self.inner.source {
            f.field("source", source);
        }
        f.finish()
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} error", self.inner.kind)?;

        if let Some(ref source) = self.inner.source {
            write!(f, ": {source}")?;
        }

        Ok(())
    }
}

impl StdError for Error {
    fn source(&self) -> Option<&(dyn StdError + 'static)> {
        self.inner
            .source
            .as_ref()
            .map(|e| &**e as &(dyn StdError + 'static))
    }
}

impl From<RequestError> for Error {
    fn from(err: RequestError) -> Self {
        Error::new(ErrorKind::Request, Some(err))
    }
}

impl From<ProxyError> for Error {
    fn from(err: ProxyError) -> Self {
        Error::new(ErrorKind::Proxy, Some(err))
    }
}

impl From<HistoryError> for Error {
    fn from(err: HistoryError) -> Self {
        Error::new(ErrorKind::History, Some(err))
    }
}

impl From<SchedulerError> for Error {
    fn from(err: SchedulerError) -> Self {
        Error::new(ErrorKind::Scheduler, Some(err))
    }
}

impl From<DownloadError> for Error {
    fn from(err: DownloadError) -> Self {
        Error::new(ErrorKind::Download, Some(err))
    }
}

impl From<ConfigError> for Error {
    fn from(err: ConfigError) -> Self {
        Error::new(ErrorKind::Config, Some(err))
    }
}

#[derive(Debug, Error)]
pub enum RequestError {
    #[error("invalid url: {0}")]
    InvalidUrl(String),
    #[error("invalid method: {0}")]
    InvalidMethod(String),
    #[error("serialize failed: {0}")]
    Serialize(#[source] BoxError),
    #[error("deserialize failed: {0}")]
    Deserialize(#[source] BoxError),
    #[error("temp value for `{0}` has an unexpected type")]
    TempType(String),
}

#[derive(Debug, Error)]
pub enum ProxyError {
    #[error("proxy list unavailable: {0}")]
    SourceUnavailable(#[source] BoxError),
}

/// Coarse classification of a persistence failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StorageErrorClass {
    /// Backend unreachable (connection refused, pool exhausted, timeout).
    Connectivity,
    /// Backend reachable but the statement or layout was rejected.
    Schema,
    /// Local I/O or serialization failure.
    Io,
}

impl fmt::Display for StorageErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            StorageErrorClass::Connectivity => write!(f, "connectivity"),
            StorageErrorClass::Schema => write!(f, "schema"),
            StorageErrorClass::Io => write!(f, "io"),
        }
    }
}

#[derive(Debug, Error)]
pub enum HistoryError {
    #[error("backend unreachable: {0}")]
    Connection(#[source] BoxError),
    #[error("schema error: {0}")]
    Schema(#[source] BoxError),
    #[error("io error: {0}")]
    Io(#[source] BoxError),
    #[error("record serialization failed: {0}")]
    Serialize(#[source] BoxError),
}

impl HistoryError {
    pub fn class(&self) -> StorageErrorClass {
        match self {
            HistoryError::Connection(_) => StorageErrorClass::Connectivity,
            HistoryError::Schema(_) => StorageErrorClass::Schema,
            HistoryError::Io(_) | HistoryError::Serialize(_) => StorageErrorClass::Io,
        }
    }
}

#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("concurrency gate closed")]
    GateClosed,
    #[error("scheduler stopped")]
    Stopped,
    #[error("matrix not found: {0}")]
    MatrixNotFound(u64),
}

#[derive(Debug, Error)]
pub enum DownloadError {
    #[error("client error: {0}")]
    ClientError(#[source] BoxError),
    #[error("invalid proxy: {0}")]
    InvalidProxy(#[source] BoxError),
    #[error("network error: {0}")]
    NetworkError(#[source] BoxError),
    #[error("timeout error: {0}")]
    TimeoutError(#[source] BoxError),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config read failed: {0}")]
    Read(#[source] BoxError),
    #[error("config parse failed: {0}")]
    Parse(#[source] BoxError),
    #[error("invalid value for {field}: {reason}")]
    InvalidValue { field: &'static str, reason: String },
}

impl Error {
    pub fn gate_closed() -> Self {
        Error::from(SchedulerError::GateClosed)
    }

    pub fn download_failed<E: Into<BoxError>>(source: E) -> Self {
        Error::from(DownloadError::NetworkError(source.into()))
    }
}

impl From<std::io::Error> for Error {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::ConnectionRefused
            | std::io::ErrorKind::ConnectionReset
            | std::io::ErrorKind::TimedOut => {
                Error::from(HistoryError::Connection(Box::new(err)))
            }
            _ => Error::from(HistoryError::Io(Box::new(err))),
        }
    }
}

impl From<serde_json::Error> for Error {
    fn from(err: serde_json::Error) -> Self {
        Error::from(HistoryError::Serialize(Box::new(err)))
    }
}

impl From<sea_orm::DbErr> for HistoryError {
    fn from(err: sea_orm::DbErr) -> Self {
        match err {
            sea_orm::DbErr::Conn(_) | sea_orm::DbErr::ConnectionAcquire(_) => {
                HistoryError::Connection(err.to_string().into())
            }
            sea_orm::DbErr::Exec(_) | sea_orm::DbErr::Query(_) | sea_orm::DbErr::Type(_) => {
                HistoryError::Schema(err.to_string().into())
            }
            other => HistoryError::Io(other.to_string().into()),
        }
    }
}

impl From<sea_orm::DbErr> for Error {
    fn from(err: sea_orm::DbErr) -> Self {
        Error::from(HistoryError::from(err))
    }
}

impl From<deadpool_redis::PoolError> for Error {
    fn from(err: deadpool_redis::PoolError) -> Self {
        Error::from(HistoryError::Connection(err.to_string().into()))
    }
}

impl From<deadpool_redis::redis::RedisError> for HistoryError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        if err.is_connection_refusal() || err.is_io_error() || err.is_timeout() || err.is_connection_dropped() {
            HistoryError::Connection(Box::new(err))
        } else if err.kind() == deadpool_redis::redis::ErrorKind::TypeError {
            HistoryError::Schema(Box::new(err))
        } else {
            HistoryError::Io(Box::new(err))
        }
    }
}

impl From<deadpool_redis::redis::RedisError> for Error {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        Error::from(HistoryError::from(err))
    }
}
