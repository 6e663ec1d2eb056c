use std::sync::Arc;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::config::HarnessConfig;
use crate::operation::{OperationFactory, WorkerIdentity};
use crate::signal::ShutdownSignal;
use crate::worker::{Phase, Worker, WorkerEnv, WorkerSettings, WorkerState};

const POLL: Duration = Duration::from_millis(100);
const STRAGGLER_REPORT_EVERY: Duration = Duration::from_secs(10);

/// Upper bound on live workers in one pool. Each worker is an OS thread.
pub const MAX_WORKERS: usize = 10_000;

const NO_RUNNING_WORKERS: &str = "no running workers remain";

/// Wake-ups for threads waiting on worker phase changes, plus the running count.
#[derive(Debug)]
pub(crate) struct PoolEvents {
    running: AtomicUsize,
    /// Scale-ups in progress. While non-zero, an empty running set is not final.
    resizing: AtomicUsize,
    lock: Mutex<()>,
    cond: Condvar,
    shutdown: Arc<ShutdownSignal>,
}

impl PoolEvents {
    fn new(shutdown: Arc<ShutdownSignal>) -> Self {
        Self {
            running: AtomicUsize::new(0),
            resizing: AtomicUsize::new(0),
            lock: Mutex::new(()),
            cond: Condvar::new(),
            shutdown,
        }
    }

    pub(crate) fn notify(&self) {
        let _guard = self.lock.lock();
        self.cond.notify_all();
    }

    pub(crate) fn worker_running(&self) {
        self.running.fetch_add(1, Ordering::SeqCst);
        self.notify();
    }

    pub(crate) fn worker_left_running(&self) {
        let prev = self
            .running
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| Some(n.saturating_sub(1)))
            .unwrap_or(0);
        if prev == 1 && self.resizing.load(Ordering::SeqCst) == 0 {
            self.shutdown.trigger(NO_RUNNING_WORKERS);
        }
        self.notify();
    }

    fn running(&self) -> usize {
        self.running.load(Ordering::SeqCst)
    }

    /// Defers the empty-pool shutdown until the returned guard drops.
    fn begin_resize(&self) -> ResizeGuard<'_> {
        self.resizing.fetch_add(1, Ordering::SeqCst);
        ResizeGuard(self)
    }

    /// Blocks until `done` holds or `deadline` passes. Returns the final `done()`.
    fn wait_until(&self, deadline: Instant, mut done: impl FnMut() -> bool) -> bool {
        let mut guard = self.lock.lock();
        loop {
            if done() {
                return true;
            }
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let _ = self.cond.wait_until(&mut guard, deadline.min(now + POLL));
        }
    }
}

/// Re-checks the running count once a scale-up finishes, so workers that
/// ended while later ones were still starting still end the run.
struct ResizeGuard<'a>(&'a PoolEvents);

impl Drop for ResizeGuard<'_> {
    fn drop(&mut self) {
        let events = self.0;
        let prev = events.resizing.fetch_sub(1, Ordering::SeqCst);
        if prev == 1 && events.running.load(Ordering::SeqCst) == 0 {
            events.shutdown.trigger(NO_RUNNING_WORKERS);
        }
    }
}

/// Why a scale-up did not bring every new worker to RUNNING.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ScaleError {
    #[error("worker `{0}` failed while starting")]
    WorkerFailed(String),

    #[error("worker `{worker}` did not start within {timeout:?}")]
    StartTimeout { worker: String, timeout: Duration },

    #[error("shutdown requested while starting workers")]
    ShuttingDown,

    #[error("could not spawn worker: {0}")]
    Spawn(String),

    #[error("cannot add {requested} workers to {live}: the pool holds at most {MAX_WORKERS}")]
    TooManyWorkers { requested: usize, live: usize },
}

#[derive(Debug, Clone)]
pub struct PoolSettings {
    pub name_prefix: String,
    pub start_interval: Duration,
    pub start_timeout: Duration,
    pub shutdown_wait: Duration,
    pub worker: WorkerSettings,
}

impl Default for PoolSettings {
    fn default() -> Self {
        Self {
            name_prefix: "worker-".to_string(),
            start_interval: Duration::ZERO,
            start_timeout: Duration::from_secs(30),
            shutdown_wait: Duration::from_secs(120),
            worker: WorkerSettings::default(),
        }
    }
}

impl From<&HarnessConfig> for PoolSettings {
    fn from(cfg: &HarnessConfig) -> Self {
        Self {
            name_prefix: "worker-".to_string(),
            start_interval: cfg.start_interval,
            start_timeout: cfg.start_timeout,
            shutdown_wait: cfg.shutdown_wait,
            worker: WorkerSettings {
                max_iterations: cfg.max_iterations,
                ramp: cfg.ramp,
                settle_delay: cfg.settle_delay,
                response_times: cfg.response_times,
            },
        }
    }
}

#[derive(Debug, Default)]
struct PoolInner {
    workers: Vec<Worker>,
    retired: Vec<Worker>,
    next_index: u64,
}

/// Ordered, resizable set of workers.
///
/// Newest workers sit at the end of the list and are the first removed.
/// Removed workers are kept aside so final totals still include their work.
pub struct WorkerPool {
    inner: Mutex<PoolInner>,
    resize: Mutex<()>,
    rate_bits: AtomicU64,
    events: Arc<PoolEvents>,
    env: WorkerEnv,
    settings: PoolSettings,
}

impl WorkerPool {
    pub fn new(
        factory: Arc<dyn OperationFactory>,
        shutdown: Arc<ShutdownSignal>,
        rate: f64,
        settings: PoolSettings,
    ) -> Self {
        let events = Arc::new(PoolEvents::new(shutdown.clone()));
        let env = WorkerEnv {
            factory,
            shutdown,
            events: events.clone(),
            settings: Arc::new(settings.worker.clone()),
        };
        Self {
            inner: Mutex::new(PoolInner::default()),
            resize: Mutex::new(()),
            rate_bits: AtomicU64::new(rate.max(0.0).to_bits()),
            events,
            env,
            settings,
        }
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.env.shutdown
    }

    pub fn settings(&self) -> &PoolSettings {
        &self.settings
    }

    pub fn len(&self) -> usize {
        self.inner.lock().workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Workers currently in RUNNING.
    pub fn running(&self) -> usize {
        self.events.running()
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Acquire))
    }

    /// Sets the default rate for future workers and pushes it to every current one.
    pub fn set_rate(&self, rate: f64) {
        let rate = if rate.is_finite() { rate.max(0.0) } else { 0.0 };
        self.rate_bits.store(rate.to_bits(), Ordering::Release);
        let inner = self.inner.lock();
        for worker in &inner.workers {
            worker.update_rate(rate);
        }
    }

    /// Runs `f` over the live workers while holding the collection lock.
    pub fn with_workers<R>(&self, f: impl FnOnce(&[Worker]) -> R) -> R {
        let inner = self.inner.lock();
        f(&inner.workers)
    }

    /// Live and removed workers, ordered by index.
    pub fn all_states(&self) -> Vec<Arc<WorkerState>> {
        let inner = self.inner.lock();
        let mut states: Vec<_> = inner
            .retired
            .iter()
            .chain(inner.workers.iter())
            .map(|w| w.state().clone())
            .collect();
        states.sort_by_key(|s| s.index());
        states
    }

    /// Positive `delta` adds workers, negative removes the newest ones.
    pub fn change_worker_count(&self, delta: i64) -> bool {
        match delta {
            0 => true,
            d if d > 0 => match self.scale_up(usize::try_from(d).unwrap_or(usize::MAX)) {
                Ok(()) => true,
                Err(err) => {
                    tracing::error!(error = %err, "scale-up failed");
                    false
                }
            },
            d => self.scale_down(usize::try_from(d.unsigned_abs()).unwrap_or(usize::MAX)),
        }
    }

    /// Starts `count` workers and waits for each to reach RUNNING.
    pub fn scale_up(&self, count: usize) -> Result<(), ScaleError> {
        let _resize = self.resize.lock();
        if count == 0 {
            return Ok(());
        }
        let live = self.len();
        if count > MAX_WORKERS.saturating_sub(live) {
            return Err(ScaleError::TooManyWorkers {
                requested: count,
                live,
            });
        }
        let _resizing = self.events.begin_resize();
        let mut pending = Vec::new();

        for i in 0..count {
            if self.env.shutdown.is_triggered() {
                return Err(ScaleError::ShuttingDown);
            }
            if i > 0
                && !self.settings.start_interval.is_zero()
                && self.env.shutdown.wait_timeout(self.settings.start_interval)
            {
                return Err(ScaleError::ShuttingDown);
            }
            let state = self.spawn_worker()?;
            tracing::debug!(worker = %state.identity(), "worker spawned");
            pending.push(state);
        }

        self.await_running(&pending)?;
        self.log_connect_times(&pending);
        Ok(())
    }

    fn spawn_worker(&self) -> Result<Arc<WorkerState>, ScaleError> {
        let mut inner = self.inner.lock();
        let identity = WorkerIdentity::new(&self.settings.name_prefix, inner.next_index);
        inner.next_index += 1;

        let mut worker = Worker::new(identity, self.rate(), &self.settings.worker);
        worker
            .start(self.env.clone())
            .map_err(|err| ScaleError::Spawn(err.to_string()))?;
        let state = worker.state().clone();
        inner.workers.push(worker);
        Ok(state)
    }

    fn await_running(&self, pending: &[Arc<WorkerState>]) -> Result<(), ScaleError> {
        let timeout = self.settings.start_timeout;
        let mut guard = self.events.lock.lock();
        loop {
            let mut waiting = None;
            for state in pending {
                let status = state.status();
                if status.error {
                    return Err(ScaleError::WorkerFailed(state.name().to_string()));
                }
                if status.phase < Phase::Running && waiting.is_none() {
                    waiting = Some(state);
                }
            }
            let Some(state) = waiting else {
                return Ok(());
            };

            if self.env.shutdown.is_triggered() {
                return Err(ScaleError::ShuttingDown);
            }
            let deadline = state.created_at() + timeout;
            let now = Instant::now();
            if now >= deadline {
                return Err(ScaleError::StartTimeout {
                    worker: state.name().to_string(),
                    timeout,
                });
            }
            let _ = self
                .events
                .cond
                .wait_until(&mut guard, deadline.min(now + POLL));
        }
    }

    fn log_connect_times(&self, started: &[Arc<WorkerState>]) {
        let times: Vec<Duration> = started.iter().filter_map(|s| s.connect_time()).collect();
        let Some(fastest) = times.iter().min().copied() else {
            return;
        };
        let slowest = times.iter().max().copied().unwrap_or(fastest);
        let total: Duration = times.iter().sum();
        let avg = total / u32::try_from(times.len()).unwrap_or(u32::MAX);
        tracing::info!(
            threads = self.running(),
            fastest_conn_ms = fastest.as_millis() as u64,
            slowest_conn_ms = slowest.as_millis() as u64,
            avg_conn_ms = avg.as_millis() as u64,
            "workers started"
        );
    }

    /// Stops the newest `count` workers (clamped to the pool size) and removes
    /// them once they have ended.
    pub fn scale_down(&self, count: usize) -> bool {
        let _resize = self.resize.lock();
        let victims: Vec<Arc<WorkerState>> = {
            let inner = self.inner.lock();
            let len = inner.workers.len();
            let n = count.min(len);
            inner.workers[len - n..]
                .iter()
                .rev()
                .map(|w| w.state().clone())
                .collect()
        };
        if victims.is_empty() {
            return true;
        }

        for state in &victims {
            tracing::debug!(worker = %state.identity(), "stopping worker");
            state.request_stop();
        }

        let deadline = Instant::now() + self.settings.shutdown_wait;
        let ended = self
            .events
            .wait_until(deadline, || victims.iter().all(|s| s.status().is_ended()));
        if !ended {
            tracing::warn!(
                count = victims.len(),
                "workers did not end within the shutdown wait"
            );
            return false;
        }

        let now_empty = {
            let mut inner = self.inner.lock();
            let keep = inner.workers.len().saturating_sub(victims.len());
            let removed = inner.workers.split_off(keep);
            inner.retired.extend(removed);
            inner.workers.is_empty()
        };
        if now_empty {
            self.env.shutdown.trigger("all workers removed");
        }
        true
    }

    /// Stops every worker and waits up to the shutdown wait for them to end.
    /// Returns the names of workers that were still running when the wait ran out.
    pub fn shutdown(&self) -> Vec<String> {
        let states = self.all_states();
        for state in &states {
            state.request_stop();
        }

        let started = Instant::now();
        let deadline = started + self.settings.shutdown_wait;
        let mut next_report = started + STRAGGLER_REPORT_EVERY;

        loop {
            let stragglers: Vec<String> = states
                .iter()
                .filter(|s| !s.status().is_ended())
                .map(|s| s.name().to_string())
                .collect();
            if stragglers.is_empty() {
                break;
            }

            let now = Instant::now();
            if now >= deadline {
                tracing::warn!(
                    workers = %stragglers.join(","),
                    "workers still running after shutdown wait, abandoning them"
                );
                return stragglers;
            }
            if now >= next_report {
                tracing::info!(workers = %stragglers.join(","), "waiting for workers to end");
                next_report += STRAGGLER_REPORT_EVERY;
            }

            self.events.wait_until(deadline.min(next_report), || {
                states.iter().all(|s| s.status().is_ended())
            });
        }

        // Threads may still be in their settle delay.
        loop {
            let all_joined = {
                let mut inner = self.inner.lock();
                let PoolInner {
                    workers, retired, ..
                } = &mut *inner;
                let mut done = true;
                for worker in workers.iter_mut().chain(retired.iter_mut()) {
                    worker.join_if_finished();
                    done &= worker.thread_finished();
                }
                done
            };
            if all_joined || Instant::now() >= deadline {
                break;
            }
            std::thread::sleep(Duration::from_millis(20));
        }
        Vec::new()
    }
}

impl Drop for WorkerPool {
    fn drop(&mut self) {
        // Unblock any worker still parked so detached threads can exit.
        for state in self.all_states() {
            state.request_stop();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::operation::{Operation, OperationResult, Step};
    use crate::worker::OperationContext;

    struct Idle;

    impl Operation for Idle {
        fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
            ctx.sleep(Duration::from_millis(5));
            Ok(Step::Continue)
        }
    }

    fn pool() -> WorkerPool {
        let factory: Arc<dyn OperationFactory> =
            Arc::new(|_: &WorkerIdentity| -> OperationResult<Box<dyn Operation>> { Ok(Box::new(Idle)) });
        WorkerPool::new(
            factory,
            Arc::new(ShutdownSignal::new()),
            0.0,
            PoolSettings {
                start_timeout: Duration::from_secs(5),
                shutdown_wait: Duration::from_secs(5),
                ..PoolSettings::default()
            },
        )
    }

    fn indices(pool: &WorkerPool) -> Vec<u64> {
        pool.with_workers(|ws| ws.iter().map(Worker::index).collect())
    }

    #[test]
    fn zero_delta_is_a_no_op() {
        let pool = pool();
        assert!(pool.change_worker_count(0));
        assert!(pool.is_empty());
    }

    #[test]
    fn scale_down_removes_newest_first() {
        let pool = pool();
        assert!(pool.change_worker_count(3));
        assert_eq!(indices(&pool), vec![0, 1, 2]);
        assert_eq!(pool.running(), 3);

        assert!(pool.change_worker_count(-1));
        assert_eq!(indices(&pool), vec![0, 1]);
        assert_eq!(pool.running(), 2);

        assert!(pool.change_worker_count(1));
        assert_eq!(indices(&pool), vec![0, 1, 3]);

        assert!(pool.shutdown().is_empty());
    }

    #[test]
    fn scale_down_clamps_to_pool_size() {
        let pool = pool();
        assert!(pool.change_worker_count(2));
        assert!(pool.change_worker_count(-10));
        assert!(pool.is_empty());
        assert!(pool.shutdown_signal().is_triggered());
        assert_eq!(pool.all_states().len(), 2);
    }

    #[test]
    fn scale_up_rejects_more_than_the_limit() {
        let pool = pool();
        assert_eq!(
            pool.scale_up(usize::MAX),
            Err(ScaleError::TooManyWorkers {
                requested: usize::MAX,
                live: 0
            })
        );
        assert!(!pool.change_worker_count(i64::MAX));
        assert!(pool.is_empty());
    }

    #[test]
    fn set_rate_reaches_every_worker() {
        let pool = pool();
        assert!(pool.change_worker_count(2));
        pool.set_rate(25.0);
        pool.with_workers(|ws| {
            for w in ws {
                assert_eq!(w.state().rate(), 25.0);
            }
        });
        assert_eq!(pool.rate(), 25.0);
        pool.shutdown();
    }
}
