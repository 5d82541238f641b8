use crate::common::status::RunStatus;
use crate::downloader::Downloader;
use crate::engine::matrix::RequestMatrix;
use log::{debug, info, warn};
use metrics::gauge;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tokio::sync::watch;
use tokio::task::JoinSet;

/// Counters of one finished run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct RunSummary {
    pub pulled: usize,
    pub successes: usize,
    pub failures: usize,
}

#[derive(Default)]
struct Counters {
    pulled: AtomicUsize,
    /// resubmissions sleeping out their retry pause
    retrying: AtomicUsize,
    successes: AtomicUsize,
    failures: AtomicUsize,
}

/// Worker loop driving one matrix with a downloader until the matrix can stop.
pub struct CrawlRunner {
    pub name: String,
    matrix: Arc<RequestMatrix>,
    downloader: Arc<dyn Downloader>,
    status_rx: watch::Receiver<RunStatus>,
    idle_poll: Duration,
}

impl CrawlRunner {
    pub fn new(
        matrix: Arc<RequestMatrix>,
        downloader: Arc<dyn Downloader>,
        status_rx: watch::Receiver<RunStatus>,
    ) -> Self {
        Self {
            name: matrix.spider().to_string(),
            matrix,
            downloader,
            status_rx,
            idle_poll: Duration::from_millis(50),
        }
    }

    pub fn with_idle_poll(mut self, idle_poll: Duration) -> Self {
        self.idle_poll = idle_poll;
        self
    }

    pub async fn run(mut self) -> RunSummary {
        info!("Starting crawl runner [{}] with {}", self.name, self.downloader.name());
        let counters = Arc::new(Counters::default());
        let mut workers = JoinSet::new();
        let metric_label = self.name.clone();

        loop {
            // reap finished workers
            while let Some(joined) = workers.try_join_next() {
                if let Err(e) = joined {
                    warn!("[{}] worker panicked: {e}", self.name);
                }
            }

            let status = *self.status_rx.borrow_and_update();
            match status {
                RunStatus::Stop => {
                    info!("[{}] runner received stop", self.name);
                    break;
                }
                RunStatus::Pause => {
                    if self.status_rx.changed().await.is_err() {
                        break;
                    }
                    continue;
                }
                RunStatus::Run => {}
            }

            let Some(req) = self.matrix.pull().await else {
                if counters.retrying.load(Ordering::SeqCst) == 0 && self.matrix.can_stop().await {
                    break;
                }
                tokio::select! {
                    _ = tokio::time::sleep(self.idle_poll) => {}
                    _ = self.status_rx.changed() => {}
                }
                continue;
            };
            counters.pulled.fetch_add(1, Ordering::Relaxed);

            let slot = match self.matrix.use_slot().await {
                Ok(slot) => slot,
                Err(e) => {
                    // gate closed: keep the request for the next run
                    debug!("[{}] no slot: {e}", self.name);
                    self.matrix.park_failure(req).await;
                    break;
                }
            };

            let matrix = self.matrix.clone();
            let downloader = self.downloader.clone();
            let counters = counters.clone();
            let metric_label = metric_label.clone();
            workers.spawn(async move {
                gauge!("matrixcrawl_active_downloads", "spider" => metric_label.clone()).increment(1.0);
                let mut req = req;
                let ok = match downloader.download(&req).await {
                    Ok(resp) if resp.is_success() => true,
                    Ok(resp) => {
                        info!("[{}] {} answered {}", matrix.spider(), req.url, resp.status);
                        false
                    }
                    Err(e) => {
                        info!("[{}] {} failed: {e}", matrix.spider(), req.url);
                        false
                    }
                };
                let resubmit = matrix.do_history(&mut req, ok).await;
                if resubmit {
                    counters.retrying.fetch_add(1, Ordering::SeqCst);
                }
                slot.free();
                gauge!("matrixcrawl_active_downloads", "spider" => metric_label).decrement(1.0);

                if ok {
                    counters.successes.fetch_add(1, Ordering::Relaxed);
                } else if resubmit {
                    tokio::time::sleep(req.retry_pause).await;
                    if !matrix.push(req.clone()).await {
                        matrix.park_failure(req).await;
                    }
                    counters.retrying.fetch_sub(1, Ordering::SeqCst);
                } else {
                    counters.failures.fetch_add(1, Ordering::Relaxed);
                }
            });
        }

        self.matrix.wait().await;
        while let Some(joined) = workers.join_next().await {
            if let Err(e) = joined {
                warn!("[{}] worker panicked: {e}", self.name);
            }
        }
        self.matrix.try_flush_success().await;
        self.matrix.try_flush_failure().await;

        let summary = RunSummary {
            pulled: counters.pulled.load(Ordering::Relaxed),
            successes: counters.successes.load(Ordering::Relaxed),
            failures: counters.failures.load(Ordering::Relaxed),
        };
        info!("[{}] runner finished: {summary:?}", self.name);
        summary
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::common::model::{Config, Request};
    use crate::downloader::Response;
    use crate::engine::scheduler::Scheduler;
    use crate::errors::{Error, Result};
    use crate::history::LocalBackend;
    use crate::proxy::ProxyPool;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::sync::Mutex;

    /// `dead` always errors, `flaky` answers 503 once, everything else 200.
    #[derive(Default)]
    struct ScriptedDownloader {
        calls: Mutex<HashMap<String, usize>>,
    }

    #[async_trait]
    impl Downloader for ScriptedDownloader {
        fn name(&self) -> String {
            "scripted".to_string()
        }

        async fn download(&self, request: &Request) -> Result<Response> {
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let n = calls.entry(request.url.clone()).or_default();
                *n += 1;
                *n
            };
            tokio::time::sleep(Duration::from_millis(2)).await;
            if request.url.contains("dead") {
                return Err(Error::download_failed("connection reset"));
            }
            let status = if request.url.contains("flaky") && call == 1 { 503 } else { 200 };
            Ok(Response {
                status,
                url: request.url.clone(),
                body: Vec::new(),
            })
        }
    }

    fn scheduler() -> Scheduler {
        let mut config = Config::default();
        config.crawler.thread_num = 4;
        let proxy = Arc::new(ProxyPool::from_config(&config.proxy));
        Scheduler::new(config, Arc::new(LocalBackend::new()), proxy)
    }

    fn req(path: &str, try_times: u32) -> Request {
        Request::new("news", "list", format!("https://example.com/{path}"))
            .with_try_times(try_times)
            .with_retry_pause(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn test_run_drains_matrix_with_retries() {
        let sched = scheduler();
        sched.init().await;
        let handle = sched.add_matrix("news", "", 0).await.unwrap();
        let matrix = sched.matrix(handle).await.unwrap();

        for r in [req("ok/1", 3), req("ok/2", 3), req("flaky", 3), req("dead", 2)] {
            assert!(matrix.push(r).await);
        }

        let downloader = Arc::new(ScriptedDownloader::default());
        let runner = CrawlRunner::new(matrix.clone(), downloader.clone(), sched.status_receiver().await)
            .with_idle_poll(Duration::from_millis(5));
        let summary = tokio::time::timeout(Duration::from_secs(5), runner.run())
            .await
            .unwrap();

        assert_eq!(
            summary,
            RunSummary {
                pulled: 6,
                successes: 3,
                failures: 1,
            }
        );
        let history = matrix.history();
        assert!(history.has_success(req("flaky", 3).fingerprint()).await);
        assert!(history.has_failure(req("dead", 2).fingerprint()).await);
        assert_eq!(history.success_len().await, 3);
        assert_eq!(downloader.calls.lock().unwrap()["https://example.com/dead"], 2);
        assert!(matrix.is_empty().await);
        assert_eq!(sched.gate().await.available(), 4);
    }

    #[tokio::test]
    async fn test_run_returns_on_stop() {
        let sched = scheduler();
        sched.init().await;
        let handle = sched.add_matrix("news", "", 0).await.unwrap();
        let matrix = sched.matrix(handle).await.unwrap();
        assert!(matrix.push(req("ok/1", 1)).await);
        let status_rx = sched.status_receiver().await;
        sched.stop().await;

        let runner = CrawlRunner::new(matrix, Arc::new(ScriptedDownloader::default()), status_rx);
        let summary = tokio::time::timeout(Duration::from_secs(1), runner.run())
            .await
            .unwrap();
        assert_eq!(summary.pulled, 0);
    }

    #[tokio::test]
    async fn test_run_resumes_after_pause() {
        let sched = Arc::new(scheduler());
        sched.init().await;
        let handle = sched.add_matrix("news", "", 0).await.unwrap();
        let matrix = sched.matrix(handle).await.unwrap();
        assert!(matrix.push(req("ok/1", 1)).await);
        assert_eq!(sched.pause_recover().await, RunStatus::Pause);

        let runner = CrawlRunner::new(
            matrix.clone(),
            Arc::new(ScriptedDownloader::default()),
            sched.status_receiver().await,
        )
        .with_idle_poll(Duration::from_millis(5));
        let task = tokio::spawn(runner.run());
        tokio::time::sleep(Duration::from_millis(30)).await;
        assert_eq!(matrix.pending_len().await, 1);

        assert_eq!(sched.pause_recover().await, RunStatus::Run);
        let summary = tokio::time::timeout(Duration::from_secs(5), task)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(summary.successes, 1);
    }
}
