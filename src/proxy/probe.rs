use crate::common::model::ProxyConfig;
use crate::proxy::source::ProxyCandidate;
use async_trait::async_trait;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;

/// Reachability checks used by the proxy pool.
#[async_trait]
pub trait ProxyProbe: Send + Sync {
    /// Whether the proxy endpoint answers at all.
    async fn is_alive(&self, candidate: &ProxyCandidate) -> bool;
    /// Round-trip latency of a HEAD to `target` through `proxy`, or `None`
    /// unless the target answered HTTP 200.
    async fn test_host(&self, proxy: &str, target: &str) -> Option<Duration>;
}

/// Network-backed probe: TCP connect for liveness, HEAD through the proxy for
/// per-host usability.
#[derive(Debug, Clone)]
pub struct NetProbe {
    timeout: Duration,
    retries: usize,
}

impl NetProbe {
    pub fn new(timeout: Duration, retries: usize) -> Self {
        Self {
            timeout,
            retries: retries.max(1),
        }
    }

    pub fn from_config(config: &ProxyConfig) -> Self {
        Self::new(Duration::from_secs(config.probe_timeout_secs), config.test_retries)
    }
}

impl Default for NetProbe {
    fn default() -> Self {
        Self::new(Duration::from_secs(4), 3)
    }
}

#[async_trait]
impl ProxyProbe for NetProbe {
    async fn is_alive(&self, candidate: &ProxyCandidate) -> bool {
        let addr = (candidate.ip.as_str(), candidate.port);
        matches!(
            tokio::time::timeout(self.timeout, TcpStream::connect(addr)).await,
            Ok(Ok(_))
        )
    }

    async fn test_host(&self, proxy: &str, target: &str) -> Option<Duration> {
        let p = reqwest::Proxy::all(proxy).ok()?;
        let client = reqwest::Client::builder()
            .proxy(p)
            .connect_timeout(self.timeout)
            .timeout(self.timeout)
            .build()
            .ok()?;
        for _ in 0..self.retries {
            let t0 = Instant::now();
            match client.head(target).send().await {
                Ok(resp) if resp.status() == reqwest::StatusCode::OK => return Some(t0.elapsed()),
                Ok(_) => return None,
                Err(_) => continue,
            }
        }
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::net::TcpListener;

    #[tokio::test]
    async fn test_is_alive_against_local_listener() {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let probe = NetProbe::new(Duration::from_secs(1), 1);

        let alive = ProxyCandidate::parse(&format!("127.0.0.1:{port}")).unwrap();
        assert!(probe.is_alive(&alive).await);

        drop(listener);
        let closed = ProxyCandidate::parse(&format!("127.0.0.1:{port}")).unwrap();
        assert!(!probe.is_alive(&closed).await);
    }

    #[test]
    fn test_retries_floor() {
        let probe = NetProbe::new(Duration::from_secs(1), 0);
        assert_eq!(probe.retries, 1);
    }
}
