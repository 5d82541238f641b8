use crate::errors::{RequestError, Result};
use crate::utils::encrypt::md5;
use once_cell::sync::OnceCell;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;

pub const DEFAULT_TRY_TIMES: u32 = 3;
pub const DEFAULT_RETRY_PAUSE: Duration = Duration::from_secs(2);
pub const DEFAULT_DIAL_TIMEOUT: Duration = Duration::from_secs(120);
pub const DEFAULT_CONN_TIMEOUT: Duration = Duration::from_secs(120);

/// Which downloader backend serves a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
pub enum DownloaderKind {
    /// Plain HTTP client
    #[default]
    Surf,
    /// Headless browser
    Phantom,
}

/// One unit of crawl work.
///
/// Identity is the fingerprint over spider, rule, url and method. Every other
/// field can differ between two requests that are still the same work item.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Request {
    pub spider: String,
    pub rule: String,
    pub url: String,
    pub method: String,
    #[serde(default)]
    pub headers: Vec<(String, String)>,
    #[serde(default)]
    pub body: Option<String>,
    /// Retry budget for one run
    #[serde(default)]
    pub try_times: u32,
    /// Failed dispatches so far in this run
    #[serde(default)]
    pub attempts: u32,
    #[serde(default)]
    pub retry_pause: Duration,
    #[serde(default)]
    pub dial_timeout: Duration,
    #[serde(default)]
    pub conn_timeout: Duration,
    #[serde(default)]
    pub priority: i32,
    /// Bypasses deduplication and never enters the success set
    #[serde(default)]
    pub reloadable: bool,
    #[serde(default)]
    pub downloader: DownloaderKind,
    /// Scratch values carried along the parse chain
    #[serde(default)]
    pub temp: BTreeMap<String, serde_json::Value>,
    #[serde(skip)]
    pub proxy: Option<String>,
    #[serde(skip)]
    fingerprint_cache: OnceCell<String>,
}

impl Request {
    pub fn new(spider: impl Into<String>, rule: impl Into<String>, url: impl Into<String>) -> Self {
        Request {
            spider: spider.into(),
            rule: rule.into(),
            url: url.into(),
            method: "GET".to_string(),
            headers: Vec::new(),
            body: None,
            try_times: 0,
            attempts: 0,
            retry_pause: Duration::ZERO,
            dial_timeout: Duration::ZERO,
            conn_timeout: Duration::ZERO,
            priority: 0,
            reloadable: false,
            downloader: DownloaderKind::Surf,
            temp: BTreeMap::new(),
            proxy: None,
            fingerprint_cache: OnceCell::new(),
        }
    }

    pub fn with_method(mut self, method: impl AsRef<str>) -> Self {
        self.method = method.as_ref().to_string();
        self.fingerprint_cache = OnceCell::new();
        self
    }
    pub fn with_header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.push((name.into(), value.into()));
        self
    }
    pub fn with_body(mut self, body: impl Into<String>) -> Self {
        self.body = Some(body.into());
        self
    }
    pub fn with_priority(mut self, priority: i32) -> Self {
        self.priority = priority;
        self
    }
    pub fn with_try_times(mut self, try_times: u32) -> Self {
        self.try_times = try_times;
        self
    }
    pub fn with_retry_pause(mut self, pause: Duration) -> Self {
        self.retry_pause = pause;
        self
    }
    pub fn with_reloadable(mut self, reloadable: bool) -> Self {
        self.reloadable = reloadable;
        self
    }
    pub fn with_downloader(mut self, downloader: DownloaderKind) -> Self {
        self.downloader = downloader;
        self
    }

    /// Deduplication key: md5 hex of spider, rule, url and method.
    pub fn fingerprint(&self) -> &str {
        self.fingerprint_cache.get_or_init(|| {
            let canonical = format!("{}{}{}{}", self.spider, self.rule, self.url, self.method);
            md5(canonical.as_bytes())
        })
    }

    /// Normalizes the request before it enters a matrix.
    pub fn prepare(&mut self) -> Result<()> {
        let parsed = url::Url::parse(&self.url)
            .map_err(|e| RequestError::InvalidUrl(format!("{}: {e}", self.url)))?;
        self.url = parsed.to_string();

        let method = self.method.trim().to_uppercase();
        self.method = if method.is_empty() { "GET".to_string() } else { method };
        if !self.method.chars().all(|c| c.is_ascii_alphabetic()) {
            return Err(RequestError::InvalidMethod(self.method.clone()).into());
        }

        if self.try_times == 0 {
            self.try_times = DEFAULT_TRY_TIMES;
        }
        if self.retry_pause.is_zero() {
            self.retry_pause = DEFAULT_RETRY_PAUSE;
        }
        if self.dial_timeout.is_zero() {
            self.dial_timeout = DEFAULT_DIAL_TIMEOUT;
        }
        if self.conn_timeout.is_zero() {
            self.conn_timeout = DEFAULT_CONN_TIMEOUT;
        }
        self.priority = self.priority.max(0);
        self.fingerprint_cache = OnceCell::new();
        Ok(())
    }

    /// True once every attempt in the retry budget has failed.
    pub fn is_exhausted(&self) -> bool {
        self.attempts >= self.try_times.max(1)
    }

    pub fn set_temp<T: Serialize>(&mut self, key: impl Into<String>, value: T) -> Result<&mut Self> {
        let value =
            serde_json::to_value(value).map_err(|e| RequestError::Serialize(Box::new(e)))?;
        self.temp.insert(key.into(), value);
        Ok(self)
    }

    /// Typed scratch lookup; `Ok(None)` when absent.
    pub fn try_get_temp<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        match self.temp.get(key) {
            None => Ok(None),
            Some(value) => serde_json::from_value(value.clone())
                .map(Some)
                .map_err(|_| RequestError::TempType(key.to_string()).into()),
        }
    }

    /// Typed scratch lookup falling back to `default` when absent or mistyped.
    pub fn get_temp<T: DeserializeOwned>(&self, key: &str, default: T) -> T {
        match self.try_get_temp(key) {
            Ok(Some(value)) => value,
            Ok(None) => default,
            Err(e) => {
                log::warn!("[Request] {e}, using default for {}", self.url);
                default
            }
        }
    }

    /// JSON form stored in history. `&` stays literal.
    pub fn serialize(&self) -> Result<String> {
        serde_json::to_string(self).map_err(|e| RequestError::Serialize(Box::new(e)).into())
    }

    pub fn deserialize(payload: &str) -> Result<Request> {
        serde_json::from_str(payload).map_err(|e| RequestError::Deserialize(Box::new(e)).into())
    }

    /// Fresh copy of a request restored from the failure set.
    pub fn for_retry(mut self) -> Self {
        self.attempts = 0;
        self.proxy = None;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fingerprint_is_stable_and_identity_only() {
        let a = Request::new("news", "list", "https://example.com/a?x=1&y=2");
        let b = Request::new("news", "list", "https://example.com/a?x=1&y=2")
            .with_priority(9)
            .with_header("User-Agent", "test")
            .with_body("payload");
        assert_eq!(a.fingerprint(), b.fingerprint());
        assert_eq!(
            a.fingerprint(),
            md5(b"newslisthttps://example.com/a?x=1&y=2GET")
        );

        let post = a.clone().with_method("POST");
        assert_ne!(a.fingerprint(), post.fingerprint());
    }

    #[test]
    fn test_prepare_applies_defaults() {
        let mut req = Request::new("news", "list", "https://example.com/")
            .with_method(" post ")
            .with_priority(-4);
        req.prepare().unwrap();
        assert_eq!(req.method, "POST");
        assert_eq!(req.try_times, DEFAULT_TRY_TIMES);
        assert_eq!(req.retry_pause, DEFAULT_RETRY_PAUSE);
        assert_eq!(req.dial_timeout, DEFAULT_DIAL_TIMEOUT);
        assert_eq!(req.priority, 0);
        assert_eq!(req.downloader, DownloaderKind::Surf);

        let mut empty = Request::new("news", "list", "https://example.com/").with_method("");
        empty.prepare().unwrap();
        assert_eq!(empty.method, "GET");
    }

    #[test]
    fn test_prepare_rejects_bad_url() {
        let mut req = Request::new("news", "list", "not a url");
        let err = req.prepare().unwrap_err();
        assert!(err.is_request());
    }

    #[test]
    fn test_temp_typed_access() {
        let mut req = Request::new("news", "list", "https://example.com/");
        req.set_temp("page", 3u32).unwrap();
        req.set_temp("title", "front").unwrap();
        assert_eq!(req.get_temp("page", 0u32), 3);
        assert_eq!(req.get_temp("title", String::new()), "front");
        assert_eq!(req.get_temp("missing", 7i64), 7);
        assert_eq!(req.get_temp("title", 11u32), 11);
        assert!(req.try_get_temp::<u32>("title").is_err());
    }

    #[test]
    fn test_serialize_keeps_ampersand_and_skips_proxy() {
        let mut req = Request::new("news", "list", "https://example.com/?a=1&b=2");
        req.proxy = Some("http://10.0.0.1:8080".to_string());
        req.set_temp("k", "v&w").unwrap();
        let payload = req.serialize().unwrap();
        assert!(payload.contains("a=1&b=2"));
        assert!(!payload.contains("\\u0026"));

        let restored = Request::deserialize(&payload).unwrap();
        assert_eq!(restored.fingerprint(), req.fingerprint());
        assert!(restored.proxy.is_none());
        assert_eq!(restored.get_temp("k", String::new()), "v&w");
    }

    #[test]
    fn test_exhaustion() {
        let mut req = Request::new("news", "list", "https://example.com/").with_try_times(2);
        assert!(!req.is_exhausted());
        req.attempts = 2;
        assert!(req.is_exhausted());
        assert!(!req.for_retry().is_exhausted());
    }
}
