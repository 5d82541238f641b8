use crate::common::model::{CrawlerConfig, Request, RunMode};
use crate::common::status::{MatrixLifecycle, RunStatus};
use crate::engine::context::RunContext;
use crate::errors::Result;
use crate::history::HistoryStore;
use log::{debug, error, info, warn};
use std::collections::{BTreeMap, HashMap, HashSet, VecDeque};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{Mutex, OwnedSemaphorePermit, RwLock, watch};


/// Snapshot of a matrix's counters.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct MatrixStats {
    pub pending: usize,
    pub in_flight: usize,
    pub accepted: usize,
    pub success: usize,
    pub failure: usize,
}

/// One concurrency slot held by a worker. Dropping it (or calling
/// [`Slot::free`]) releases the gate permit and the in-flight count exactly once.
pub struct Slot {
    _permit: OwnedSemaphorePermit,
    in_flight: Arc<watch::Sender<usize>>,
}

impl Slot {
    pub fn free(self) {}
}

impl Drop for Slot {
    fn drop(&mut self) {
        self.in_flight.send_modify(|n| *n = n.saturating_sub(1));
    }
}

/// Per-spider-instance work queue.
pub struct RequestMatrix {
    spider: String,
    sub: String,
    history: Arc<HistoryStore>,
    ctx: RunContext,
    /// priority -> FIFO of requests at that priority
    pending: RwLock<BTreeMap<i32, VecDeque<Request>>>,
    /// fingerprints pending or dispatched and not yet reported
    queued: RwLock<HashSet<String>>,
    in_flight: Arc<watch::Sender<usize>>,
    accepted: AtomicUsize,
    /// cap on accepted pushes; `None` is unlimited
    budget: Option<usize>,
    /// inherited failures waiting to be re-queued once the matrix drains
    retry_batch: Mutex<HashMap<String, Request>>,
    lifecycle: RwLock<MatrixLifecycle>,
    /// success set is loaded from and flushed to the backend
    persist_success: bool,
    /// failure set is loaded from and flushed to the backend
    persist_failure: bool,
}

fn budget_for(limit: i64, inherited_success: usize) -> Option<usize> {
    match limit {
        0 => None,
        l if l > 0 => Some(l as usize),
        l => Some((l.unsigned_abs() as usize).saturating_sub(inherited_success)),
    }
}

impl RequestMatrix {
    /// Builds a matrix and loads its history per the inheritance flags.
    /// Storage failures are logged; the matrix then starts with empty sets.
    pub async fn new(
        spider: &str,
        sub: &str,
        limit: i64,
        history: Arc<HistoryStore>,
        ctx: RunContext,
        crawler: &CrawlerConfig,
    ) -> Self {
        let persist_success = ctx.mode != RunMode::Server && crawler.success_inherit;
        let persist_failure = ctx.mode != RunMode::Server && crawler.failure_inherit;
        if persist_success {
            match history.load_success().await {
                Ok(n) => info!("[Matrix] [{spider}] inherited {n} success records"),
                Err(e) => error!(
                    "[Matrix] [{spider}] load success history failed ({}): {e}",
                    e.storage_class().map(|c| c.to_string()).unwrap_or_default()
                ),
            }
        }
        if persist_failure {
            match history.load_failure().await {
                Ok(n) => info!("[Matrix] [{spider}] inherited {n} failure records"),
                Err(e) => error!(
                    "[Matrix] [{spider}] load failure history failed ({}): {e}",
                    e.storage_class().map(|c| c.to_string()).unwrap_or_default()
                ),
            }
        }
        let retry_batch: HashMap<String, Request> = history
            .pull_failure()
            .await
            .into_iter()
            .map(|(fp, req)| (fp, req.for_retry()))
            .collect();
        let budget = budget_for(limit, history.success_len().await);

        Self {
            spider: spider.to_string(),
            sub: sub.to_string(),
            history,
            ctx,
            pending: RwLock::new(BTreeMap::new()),
            queued: RwLock::new(HashSet::new()),
            in_flight: Arc::new(watch::channel(0).0),
            accepted: AtomicUsize::new(0),
            budget,
            retry_batch: Mutex::new(retry_batch),
            lifecycle: RwLock::new(MatrixLifecycle::Running),
            persist_success,
            persist_failure,
        }
    }

    pub fn spider(&self) -> &str {
        &self.spider
    }

    pub fn sub(&self) -> &str {
        &self.sub
    }

    pub fn history(&self) -> &Arc<HistoryStore> {
        &self.history
    }

    pub async fn lifecycle(&self) -> MatrixLifecycle {
        *self.lifecycle.read().await
    }

    pub fn in_flight(&self) -> usize {
        *self.in_flight.borrow()
    }

    /// Waits out a scheduler pause and this matrix's fair-share backpressure.
    /// False when the scheduler stopped meanwhile.
    async fn wait_admission(&self) -> bool {
        let mut status = self.ctx.status.clone();
        let mut in_flight = self.in_flight.subscribe();
        loop {
            let current = *status.borrow_and_update();
            match current {
                RunStatus::Stop => return false,
                RunStatus::Pause => {
                    if status.changed().await.is_err() {
                        return false;
                    }
                    continue;
                }
                RunStatus::Run => {}
            }
            if *in_flight.borrow_and_update() <= self.ctx.fair_share() {
                return true;
            }
            tokio::select! {
                changed = status.changed() => {
                    if changed.is_err() {
                        return false;
                    }
                }
                _ = in_flight.changed() => {}
            }
        }
    }

    /// Queues a request unless it is a duplicate, over the limit, or the matrix
    /// no longer accepts work. Returns whether it was accepted.
    pub async fn push(&self, mut req: Request) -> bool {
        if let Err(e) = req.prepare() {
            warn!("[Matrix] [{}] rejected request: {e}", self.spider);
            return false;
        }
        // a stopping matrix still takes resubmissions of its own work
        let accepting = match *self.lifecycle.read().await {
            MatrixLifecycle::Running => true,
            MatrixLifecycle::Stopping => req.attempts > 0,
            MatrixLifecycle::Stopped => false,
        };
        if !accepting {
            return false;
        }
        if !self.wait_admission().await {
            return false;
        }
        self.enqueue(req).await
    }

    /// Dedup, limit and insert. Resubmissions (`attempts > 0`) do not consume
    /// limit budget.
    async fn enqueue(&self, req: Request) -> bool {
        let fingerprint = req.fingerprint().to_string();
        if !req.reloadable && self.history.has_success(&fingerprint).await {
            metrics::counter!("matrixcrawl_push_total", "result" => "duplicate").increment(1);
            return false;
        }
        {
            let mut queued = self.queued.write().await;
            if !req.reloadable && queued.contains(&fingerprint) {
                metrics::counter!("matrixcrawl_push_total", "result" => "duplicate").increment(1);
                return false;
            }
            if req.attempts == 0 {
                if let Some(budget) = self.budget {
                    let admitted = self
                        .accepted
                        .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| {
                            (n < budget).then_some(n + 1)
                        })
                        .is_ok();
                    if !admitted {
                        metrics::counter!("matrixcrawl_push_total", "result" => "limit").increment(1);
                        return false;
                    }
                } else {
                    self.accepted.fetch_add(1, Ordering::SeqCst);
                }
            }
            queued.insert(fingerprint);
        }
        self.pending
            .write()
            .await
            .entry(req.priority)
            .or_default()
            .push_back(req);
        metrics::counter!("matrixcrawl_push_total", "result" => "accepted").increment(1);
        true
    }

    /// Highest-priority pending request, FIFO within a priority. `None` when
    /// drained or when the scheduler is not running. Never blocks on work.
    pub async fn pull(&self) -> Option<Request> {
        if self.ctx.status() != RunStatus::Run {
            return None;
        }
        let mut req = {
            let mut pending = self.pending.write().await;
            let mut entry = pending.last_entry()?;
            let req = entry.get_mut().pop_front();
            if entry.get().is_empty() {
                entry.remove();
            }
            req?
        };
        if self.ctx.use_proxy {
            req.proxy = self.ctx.proxy.get_one(&req.url).await;
        }
        Some(req)
    }

    /// Waits for a concurrency slot and marks one request in flight. Fails
    /// fast once the scheduler's gate is closed.
    pub async fn use_slot(&self) -> Result<Slot> {
        let permit = self.ctx.gate.acquire().await?;
        self.in_flight.send_modify(|n| *n += 1);
        Ok(Slot {
            _permit: permit,
            in_flight: self.in_flight.clone(),
        })
    }

    /// Records the outcome of one dispatch. Returns true when the request
    /// should be pushed again after its retry pause.
    pub async fn do_history(&self, req: &mut Request, success: bool) -> bool {
        let fingerprint = req.fingerprint().to_string();
        self.queued.write().await.remove(&fingerprint);

        if success {
            self.history.delete_failure(&fingerprint).await;
            self.retry_batch.lock().await.remove(&fingerprint);
            if !req.reloadable {
                if let Err(e) = self.history.upsert_success(req).await {
                    warn!("[Matrix] [{}] cannot record success for {}: {e}", self.spider, req.url);
                }
            }
            return false;
        }

        req.attempts += 1;
        if !req.is_exhausted() {
            debug!(
                "[Matrix] [{}] retry {}/{} for {}",
                self.spider, req.attempts, req.try_times, req.url
            );
            return true;
        }
        info!(
            "[Matrix] [{}] giving up on {} after {} attempts",
            self.spider, req.url, req.attempts
        );
        self.history.upsert_failure(req.clone()).await;
        self.history.delete_success(&fingerprint).await;
        false
    }

    /// Keeps a request that could not be resubmitted in the failure set.
    pub async fn park_failure(&self, req: Request) {
        if !self.history.has_success(req.fingerprint()).await {
            self.history.upsert_failure(req).await;
        }
    }

    /// Persists the success set. Skipped (`None`) unless the set was loaded
    /// from the backend at creation. Failures are logged, never propagated.
    pub async fn try_flush_success(&self) -> Option<usize> {
        if !self.persist_success {
            return None;
        }
        match self.history.flush_success().await {
            Ok(n) => {
                info!("[Matrix] [{}] flushed {n} success records ({})", self.spider, self.history.backend_name());
                Some(n)
            }
            Err(e) => {
                error!(
                    "[Matrix] [{}] flush success failed, cause={}: {e}",
                    self.spider,
                    e.storage_class().map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                );
                None
            }
        }
    }

    /// Persists the failure set, including inherited failures that were never
    /// re-queued. Skipped (`None`) unless the set was loaded from the backend at
    /// creation. Failures are logged, never propagated.
    pub async fn try_flush_failure(&self) -> Option<usize> {
        if !self.persist_failure {
            return None;
        }
        let leftovers: Vec<Request> = self.retry_batch.lock().await.values().cloned().collect();
        for req in leftovers {
            if !self.history.has_success(req.fingerprint()).await {
                self.history.upsert_failure(req).await;
            }
        }
        match self.history.flush_failure().await {
            Ok(n) => {
                info!("[Matrix] [{}] flushed {n} failure records ({})", self.spider, self.history.backend_name());
                Some(n)
            }
            Err(e) => {
                error!(
                    "[Matrix] [{}] flush failure failed, cause={}: {e}",
                    self.spider,
                    e.storage_class().map(|c| c.to_string()).unwrap_or_else(|| "unknown".into())
                );
                None
            }
        }
    }

    pub async fn pending_len(&self) -> usize {
        self.pending.read().await.values().map(VecDeque::len).sum()
    }

    /// Pending plus in-flight requests.
    pub async fn len(&self) -> usize {
        self.pending_len().await + self.in_flight()
    }

    pub async fn is_empty(&self) -> bool {
        self.len().await == 0
    }

    /// True once nothing is pending or in flight. The first time the matrix
    /// drains, inherited failures are re-queued instead and this returns false.
    pub async fn can_stop(&self) -> bool {
        if self.ctx.status() == RunStatus::Stop {
            return true;
        }
        if *self.lifecycle.read().await == MatrixLifecycle::Stopped {
            return true;
        }
        if self.len().await > 0 {
            return false;
        }

        let batch = std::mem::take(&mut *self.retry_batch.lock().await);
        if !batch.is_empty() {
            let total = batch.len();
            let mut requeued = 0usize;
            for (_, req) in batch {
                if self.enqueue(req.clone()).await {
                    requeued += 1;
                } else if !self.history.has_success(req.fingerprint()).await {
                    // over the limit: keep it for the next run
                    self.history.upsert_failure(req).await;
                }
            }
            info!("[Matrix] [{}] re-queued {requeued}/{total} inherited failures", self.spider);
            if requeued > 0 {
                return false;
            }
        }

        let mut lifecycle = self.lifecycle.write().await;
        if *lifecycle == MatrixLifecycle::Stopping {
            *lifecycle = MatrixLifecycle::Stopped;
        }
        true
    }

    /// Blocks until no request is in flight.
    pub async fn wait(&self) {
        let mut rx = self.in_flight.subscribe();
        let _ = rx.wait_for(|n| *n == 0).await;
    }

    /// Refuses further pushes; pending work still drains.
    pub async fn stop(&self) {
        let mut lifecycle = self.lifecycle.write().await;
        if *lifecycle == MatrixLifecycle::Running {
            *lifecycle = MatrixLifecycle::Stopping;
        }
    }

    pub async fn stats(&self) -> MatrixStats {
        MatrixStats {
            pending: self.pending_len().await,
            in_flight: self.in_flight(),
            accepted: self.accepted.load(Ordering::SeqCst),
            success: self.history.success_len().await,
            failure: self.history.failure_len().await,
        }
    }
}
