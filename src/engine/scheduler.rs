use crate::common::model::Config;
use crate::common::status::RunStatus;
use crate::engine::context::RunContext;
use crate::engine::gate::ConcurrencyGate;
use crate::engine::matrix::RequestMatrix;
use crate::errors::{Result, SchedulerError};
use crate::history::{HistoryBackend, HistoryStore, build_backend};
use crate::proxy::ProxyPool;
use log::{info, warn};
use std::collections::HashMap;
use std::fmt::{Display, Formatter};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use tokio::sync::{RwLock, watch};

/// Registry handle for a matrix. Spiders keep the handle, the scheduler owns
/// the matrix.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct MatrixHandle(u64);

impl MatrixHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

impl Display for MatrixHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "matrix#{}", self.0)
    }
}

/// State rebuilt by every `init`.
struct RunState {
    gate: Arc<ConcurrencyGate>,
    status: watch::Sender<RunStatus>,
    use_proxy: bool,
    active: Arc<AtomicUsize>,
    registry: HashMap<MatrixHandle, Arc<RequestMatrix>>,
}

impl RunState {
    fn new(capacity: usize, use_proxy: bool, initial: RunStatus) -> Self {
        Self {
            gate: Arc::new(ConcurrencyGate::new(capacity)),
            status: watch::channel(initial).0,
            use_proxy,
            active: Arc::new(AtomicUsize::new(0)),
            registry: HashMap::new(),
        }
    }
}

/// Process-wide scheduling context: concurrency gate, matrix registry and the
/// RUN/PAUSE/STOP state machine. Built once and passed to whoever needs it.
pub struct Scheduler {
    config: Config,
    backend: Arc<dyn HistoryBackend>,
    proxy: Arc<ProxyPool>,
    state: RwLock<RunState>,
    next_handle: AtomicUsize,
}

impl Scheduler {
    pub fn new(config: Config, backend: Arc<dyn HistoryBackend>, proxy: Arc<ProxyPool>) -> Self {
        let state = RunState::new(config.crawler.thread_num, false, RunStatus::Stop);
        Self {
            config,
            backend,
            proxy,
            state: RwLock::new(state),
            next_handle: AtomicUsize::new(1),
        }
    }

    /// Builds the history backend and proxy pool named by `config`.
    pub async fn from_config(config: Config) -> Result<Self> {
        let backend = build_backend(&config).await?;
        let proxy = Arc::new(ProxyPool::from_config(&config.proxy));
        if config.proxy.path.is_some() && config.crawler.proxy_minute > 0 {
            if let Err(e) = proxy.update().await {
                warn!("[Scheduler] proxy list not loaded: {e}");
            }
        }
        Ok(Self::new(config, backend, proxy))
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn proxy(&self) -> &Arc<ProxyPool> {
        &self.proxy
    }

    /// Resets the registry and gate and enters RUN.
    pub async fn init(&self) {
        let crawler = &self.config.crawler;
        let use_proxy = crawler.proxy_minute > 0 && self.proxy.count() > 0;
        let fresh = RunState::new(crawler.thread_num, use_proxy, RunStatus::Run);

        let previous = {
            let mut state = self.state.write().await;
            std::mem::replace(&mut *state, fresh)
        };
        previous.status.send_replace(RunStatus::Stop);
        previous.gate.close();

        if use_proxy {
            self.proxy.update_ticker(crawler.proxy_minute);
            info!("[Scheduler] proxy rotation every {} min", crawler.proxy_minute);
        } else {
            self.proxy.update_ticker(0);
        }
        info!(
            "[Scheduler] initialized: gate={} proxy={}",
            crawler.thread_num.max(1),
            use_proxy
        );
    }

    /// Creates and registers a matrix for one spider instance.
    pub async fn add_matrix(&self, spider: &str, sub: &str, limit: i64) -> Result<MatrixHandle> {
        let ctx = {
            let state = self.state.read().await;
            if *state.status.borrow() == RunStatus::Stop {
                return Err(SchedulerError::Stopped.into());
            }
            RunContext {
                gate: state.gate.clone(),
                status: state.status.subscribe(),
                use_proxy: state.use_proxy,
                proxy: self.proxy.clone(),
                active_matrices: state.active.clone(),
                mode: self.config.crawler.mode,
            }
        };

        let history = Arc::new(HistoryStore::new(self.backend.clone(), spider, sub));
        let matrix = Arc::new(
            RequestMatrix::new(spider, sub, limit, history, ctx, &self.config.crawler).await,
        );

        let handle = MatrixHandle(self.next_handle.fetch_add(1, Ordering::SeqCst) as u64);
        let mut state = self.state.write().await;
        if *state.status.borrow() == RunStatus::Stop {
            return Err(SchedulerError::Stopped.into());
        }
        state.registry.insert(handle, matrix);
        let active = state.active.fetch_add(1, Ordering::SeqCst) + 1;
        info!(
            "[Scheduler] {handle} added for [{spider}] (active={active}, share={})",
            (state.gate.capacity() / active).max(1)
        );
        Ok(handle)
    }

    /// [`Scheduler::add_matrix`] with the run limit from `[crawler] limit`.
    pub async fn add_configured_matrix(&self, spider: &str, sub: &str) -> Result<MatrixHandle> {
        self.add_matrix(spider, sub, self.config.crawler.limit).await
    }

    pub async fn matrix(&self, handle: MatrixHandle) -> Result<Arc<RequestMatrix>> {
        self.state
            .read()
            .await
            .registry
            .get(&handle)
            .cloned()
            .ok_or_else(|| SchedulerError::MatrixNotFound(handle.id()).into())
    }

    /// Unregisters a finished matrix so the others get a larger share.
    pub async fn remove_matrix(&self, handle: MatrixHandle) -> Option<Arc<RequestMatrix>> {
        let mut state = self.state.write().await;
        let removed = state.registry.remove(&handle);
        if removed.is_some() {
            let _ = state
                .active
                .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)));
        }
        removed
    }

    pub async fn matrix_count(&self) -> usize {
        self.state.read().await.registry.len()
    }

    /// Toggles RUN and PAUSE; returns the new status.
    pub async fn pause_recover(&self) -> RunStatus {
        let state = self.state.read().await;
        state.status.send_modify(|status| {
            *status = match *status {
                RunStatus::Run => RunStatus::Pause,
                RunStatus::Pause => RunStatus::Run,
                RunStatus::Stop => RunStatus::Stop,
            }
        });
        let now = *state.status.borrow();
        info!("[Scheduler] status -> {now}");
        now
    }

    /// Sets STOP, closes the gate so pending and future slot requests fail
    /// fast, and clears the registry. In-flight work finishes on its own.
    pub async fn stop(&self) {
        let mut state = self.state.write().await;
        state.status.send_replace(RunStatus::Stop);
        state.gate.close();
        state.registry.clear();
        state.active.store(0, Ordering::SeqCst);
        drop(state);
        self.proxy.update_ticker(0);
        info!("[Scheduler] stopped");
    }

    pub async fn status(&self) -> RunStatus {
        *self.state.read().await.status.borrow()
    }

    /// Subscribes to the status of the current run.
    pub async fn status_receiver(&self) -> watch::Receiver<RunStatus> {
        self.state.read().await.status.subscribe()
    }

    pub async fn use_proxy(&self) -> bool {
        self.state.read().await.use_proxy
    }

    pub async fn gate(&self) -> Arc<ConcurrencyGate> {
        self.state.read().await.gate.clone()
    }

    /// Re-reads the proxy list and re-probes it. Errors are logged.
    pub async fn reload_proxy_lib(&self) -> usize {
        match self.proxy.update().await {
            Ok(online) => online,
            Err(e) => {
                warn!("[Scheduler] reload proxy list failed: {e}");
                self.proxy.count()
            }
        }
    }
}
