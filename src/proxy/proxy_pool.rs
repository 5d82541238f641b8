use crate::common::model::ProxyConfig;
use crate::errors::{ProxyError, Result};
use crate::proxy::probe::{NetProbe, ProxyProbe};
use crate::proxy::source::{ProxyCandidate, parse_proxy_list};
use futures::future::join_all;
use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Weak};
use std::time::Duration;
use tokio::sync::{Mutex, RwLock, Semaphore};
use tokio::task::JoinHandle;
use url::Url;

/// A candidate and whether the last probe round reached it.
#[derive(Debug, Clone)]
struct CandidateState {
    candidate: ProxyCandidate,
    online: bool,
}

/// Usable proxies of one host bucket, fastest first.
#[derive(Debug, Default)]
struct HostBucket {
    proxies: Vec<(String, Duration)>,
    cursor: usize,
    /// log the next proxy handed out
    echo: bool,
    tested: bool,
    /// rotation generation of the last sort
    generation: u64,
}

/// Rotation key for a target: the host with its leftmost label dropped when
/// it has more than one dot, so subdomains share one bucket.
pub fn host_key(host: &str) -> String {
    if host.matches('.').count() > 1 {
        if let Some(idx) = host.find('.') {
            return host[idx + 1..].to_string();
        }
    }
    host.to_string()
}

/// Proxy pool: liveness probing of candidates and latency-ranked rotation per
/// destination host.
pub struct ProxyPool {
    source: Option<PathBuf>,
    probe: Arc<dyn ProxyProbe>,
    candidates: RwLock<HashMap<String, CandidateState>>,
    online: AtomicUsize,
    usable: RwLock<HashMap<String, Arc<Mutex<HostBucket>>>>,
    probe_gate: Arc<Semaphore>,
    generation: AtomicU64,
    ticker: std::sync::Mutex<Option<JoinHandle<()>>>,
}

impl ProxyPool {
    pub fn new(source: Option<PathBuf>, probe: Arc<dyn ProxyProbe>, max_probe_concurrency: usize) -> Self {
        Self {
            source,
            probe,
            candidates: RwLock::new(HashMap::new()),
            online: AtomicUsize::new(0),
            usable: RwLock::new(HashMap::new()),
            probe_gate: Arc::new(Semaphore::new(max_probe_concurrency.max(1))),
            generation: AtomicU64::new(0),
            ticker: std::sync::Mutex::new(None),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(
            config.path.clone(),
            Arc::new(NetProbe::from_config(config)),
            config.max_probe_concurrency,
        )
    }

    /// Number of candidates found online by the last probe round.
    pub fn count(&self) -> usize {
        self.online.load(Ordering::SeqCst)
    }

    /// Re-reads the proxy list file and re-probes every candidate.
    pub async fn update(&self) -> Result<usize> {
        let Some(path) = &self.source else {
            return Err(ProxyError::SourceUnavailable("no proxy list configured".into()).into());
        };
        let text = tokio::fs::read_to_string(path)
            .await
            .map_err(|e| ProxyError::SourceUnavailable(Box::new(e)))?;
        Ok(self.reload(&text).await)
    }

    /// Replaces the candidate set with the proxies in `text` and probes them.
    /// Returns the online count.
    pub async fn reload(&self, text: &str) -> usize {
        let parsed = parse_proxy_list(text);
        log::info!("[ProxyPool] loaded {} proxies", parsed.len());
        {
            let mut candidates = self.candidates.write().await;
            candidates.clear();
            for candidate in parsed {
                candidates.insert(
                    candidate.proxy.clone(),
                    CandidateState {
                        candidate,
                        online: false,
                    },
                );
            }
        }
        self.usable.write().await.clear();
        self.find_online().await
    }

    /// Probes every candidate concurrently; returns the online count.
    pub async fn find_online(&self) -> usize {
        let snapshot: Vec<ProxyCandidate> = self
            .candidates
            .read()
            .await
            .values()
            .map(|s| s.candidate.clone())
            .collect();

        let probes = snapshot.into_iter().map(|candidate| async move {
            let Ok(_permit) = self.probe_gate.acquire().await else {
                return (candidate.proxy, false);
            };
            let alive = self.probe.is_alive(&candidate).await;
            (candidate.proxy, alive)
        });
        let results = join_all(probes).await;
        metrics::counter!("matrixcrawl_proxy_probes_total", "kind" => "alive")
            .increment(results.len() as u64);

        let mut online = 0usize;
        {
            let mut candidates = self.candidates.write().await;
            for (proxy, alive) in results {
                if let Some(state) = candidates.get_mut(&proxy) {
                    state.online = alive;
                    if alive {
                        online += 1;
                    }
                }
            }
        }
        self.online.store(online, Ordering::SeqCst);
        log::info!("[ProxyPool] online proxies: {online}");
        online
    }

    /// Timer event: every host bucket re-sorts and re-announces on its next use.
    pub fn rotate(&self) {
        let generation = self.generation.fetch_add(1, Ordering::SeqCst) + 1;
        log::debug!("[ProxyPool] rotation #{generation}");
    }

    /// (Re)starts the rotation timer. `0` stops it.
    pub fn update_ticker(self: &Arc<Self>, minutes: u64) {
        let mut slot = match self.ticker.lock() {
            Ok(guard) => guard,
            Err(poisoned) => poisoned.into_inner(),
        };
        if let Some(handle) = slot.take() {
            handle.abort();
        }
        if minutes == 0 {
            return;
        }
        let weak: Weak<ProxyPool> = Arc::downgrade(self);
        let period = Duration::from_secs(minutes * 60);
        *slot = Some(tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // first tick completes immediately
            interval.tick().await;
            loop {
                interval.tick().await;
                match weak.upgrade() {
                    Some(pool) => pool.rotate(),
                    None => break,
                }
            }
        }));
    }

    /// Best proxy for the host of `target`, round-robin over the latency-sorted
    /// usable list. `None` when no proxy is usable for that host.
    pub async fn get_one(&self, target: &str) -> Option<String> {
        if self.count() == 0 {
            return None;
        }
        let parsed = match Url::parse(target) {
            Ok(u) if u.host_str().is_some_and(|h| !h.is_empty()) => u,
            _ => {
                log::info!("[ProxyPool] [{target}] cannot set proxy: invalid target url");
                return None;
            }
        };
        let key = host_key(parsed.host_str().unwrap_or_default());
        let test_target = parsed.origin().ascii_serialization();

        let bucket = {
            let existing = self.usable.read().await.get(&key).cloned();
            match existing {
                Some(bucket) => bucket,
                None => self
                    .usable
                    .write()
                    .await
                    .entry(key.clone())
                    .or_insert_with(|| Arc::new(Mutex::new(HostBucket::default())))
                    .clone(),
            }
        };

        let mut bucket = bucket.lock().await;
        let generation = self.generation.load(Ordering::SeqCst);
        let rotated = bucket.tested && bucket.generation != generation;
        let exhausted = bucket.tested && !bucket.proxies.is_empty() && bucket.cursor >= bucket.proxies.len();
        if !bucket.tested || rotated || exhausted {
            self.test_and_sort(&key, &test_target, &mut bucket).await;
            bucket.generation = generation;
            bucket.echo = true;
        }

        let (proxy, latency) = bucket.proxies.get(bucket.cursor).cloned()?;
        bucket.cursor += 1;
        if bucket.echo {
            log::info!("[ProxyPool] [{key}] using proxy {proxy} ({latency:?})");
            bucket.echo = false;
        }
        Some(proxy)
    }

    async fn test_and_sort(&self, key: &str, test_target: &str, bucket: &mut HostBucket) {
        log::debug!("[ProxyPool] [{key}] testing and sorting proxies");
        let online: Vec<String> = self
            .candidates
            .read()
            .await
            .values()
            .filter(|s| s.online)
            .map(|s| s.candidate.proxy.clone())
            .collect();

        let tests = online.into_iter().map(|proxy| async move {
            let Ok(_permit) = self.probe_gate.acquire().await else {
                return None;
            };
            self.probe
                .test_host(&proxy, test_target)
                .await
                .map(|latency| (proxy, latency))
        });
        let results = join_all(tests).await;
        metrics::counter!("matrixcrawl_proxy_probes_total", "kind" => "host")
            .increment(results.len() as u64);

        let mut usable: Vec<(String, Duration)> = results.into_iter().flatten().collect();
        usable.sort_by(|a, b| a.1.cmp(&b.1).then_with(|| a.0.cmp(&b.0)));

        bucket.proxies = usable;
        bucket.cursor = 0;
        bucket.tested = true;
        if bucket.proxies.is_empty() {
            log::warn!("[ProxyPool] [{key}] no usable proxy");
        } else {
            log::info!("[ProxyPool] [{key}] usable proxies: {}", bucket.proxies.len());
        }
    }
}

impl Drop for ProxyPool {
    fn drop(&mut self) {
        if let Ok(mut slot) = self.ticker.lock() {
            if let Some(handle) = slot.take() {
                handle.abort();
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;

    /// Scripted probe: every candidate is alive, host latency comes from a table.
    struct ScriptedProbe {
        latency: HashMap<String, Option<Duration>>,
        host_tests: AtomicUsize,
    }

    impl ScriptedProbe {
        fn new(table: &[(&str, Option<u64>)]) -> Self {
            Self {
                latency: table
                    .iter()
                    .map(|(p, ms)| (p.to_string(), ms.map(Duration::from_millis)))
                    .collect(),
                host_tests: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl ProxyProbe for ScriptedProbe {
        async fn is_alive(&self, candidate: &ProxyCandidate) -> bool {
            self.latency.contains_key(&candidate.proxy)
        }

        async fn test_host(&self, proxy: &str, target: &str) -> Option<Duration> {
            assert!(target.starts_with("https://") && target.ends_with("example.com"));
            self.host_tests.fetch_add(1, Ordering::SeqCst);
            self.latency.get(proxy).copied().flatten()
        }
    }

    const LIST: &str = "http://10.0.0.1:80\nhttp://10.0.0.2:80\nhttp://10.0.0.3:80\nhttp://10.0.0.9:80";

    fn scripted() -> Arc<ScriptedProbe> {
        Arc::new(ScriptedProbe::new(&[
            ("http://10.0.0.1:80", Some(30)),
            ("http://10.0.0.2:80", None),
            ("http://10.0.0.3:80", Some(10)),
        ]))
    }

    #[test]
    fn test_host_key() {
        assert_eq!(host_key("www.example.com"), "example.com");
        assert_eq!(host_key("a.b.example.com"), "b.example.com");
        assert_eq!(host_key("example.com"), "example.com");
        assert_eq!(host_key("localhost"), "localhost");
    }

    #[tokio::test]
    async fn test_find_online_counts_alive() {
        let pool = ProxyPool::new(None, scripted(), 1000);
        assert_eq!(pool.reload(LIST).await, 3);
        assert_eq!(pool.count(), 3);
    }

    #[tokio::test]
    async fn test_get_one_sorted_round_robin() {
        let probe = scripted();
        let pool = ProxyPool::new(None, probe.clone(), 1000);
        pool.reload(LIST).await;

        let target = "https://www.example.com/page";
        assert_eq!(pool.get_one(target).await.as_deref(), Some("http://10.0.0.3:80"));
        assert_eq!(pool.get_one(target).await.as_deref(), Some("http://10.0.0.1:80"));
        assert_eq!(pool.get_one(target).await.as_deref(), Some("http://10.0.0.3:80"));
        // initial sort plus one re-sort after exhaustion, three proxies each
        assert_eq!(probe.host_tests.load(Ordering::SeqCst), 6);

        // subdomain shares the bucket
        assert_eq!(
            pool.get_one("https://img.example.com/x.png").await.as_deref(),
            Some("http://10.0.0.1:80")
        );
    }

    #[tokio::test]
    async fn test_rotate_forces_resort() {
        let probe = scripted();
        let pool = ProxyPool::new(None, probe.clone(), 1000);
        pool.reload(LIST).await;

        let target = "https://example.com/";
        assert_eq!(pool.get_one(target).await.as_deref(), Some("http://10.0.0.3:80"));
        pool.rotate();
        assert_eq!(pool.get_one(target).await.as_deref(), Some("http://10.0.0.3:80"));
        assert_eq!(probe.host_tests.load(Ordering::SeqCst), 6);
    }

    #[tokio::test]
    async fn test_get_one_without_usable_proxy() {
        let probe = Arc::new(ScriptedProbe::new(&[("http://10.0.0.1:80", None)]));
        let pool = ProxyPool::new(None, probe.clone(), 10);
        pool.reload("http://10.0.0.1:80").await;

        assert!(pool.get_one("https://example.com/").await.is_none());
        // an empty bucket is not re-tested until the next rotation
        assert!(pool.get_one("https://example.com/").await.is_none());
        assert_eq!(probe.host_tests.load(Ordering::SeqCst), 1);

        assert!(pool.get_one("not a url").await.is_none());
    }

    #[tokio::test]
    async fn test_offline_pool_and_missing_source() {
        let pool = ProxyPool::new(None, scripted(), 10);
        assert!(pool.get_one("https://example.com/").await.is_none());
        assert!(pool.update().await.unwrap_err().is_proxy());
    }

    #[tokio::test]
    async fn test_update_reads_list_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("proxy.lib");
        std::fs::write(&path, LIST).unwrap();
        let pool = ProxyPool::new(Some(path), scripted(), 10);
        assert_eq!(pool.update().await.unwrap(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn test_ticker_rotates() {
        let pool = Arc::new(ProxyPool::new(None, scripted(), 10));
        pool.update_ticker(1);
        tokio::time::sleep(Duration::from_secs(61)).await;
        tokio::task::yield_now().await;
        assert!(pool.generation.load(Ordering::SeqCst) >= 1);
        pool.update_ticker(0);
    }
}
