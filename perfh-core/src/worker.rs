mod context;
mod phase;

use std::sync::Arc;
use std::sync::OnceLock;
use std::sync::atomic::{AtomicU64, Ordering};
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use context::OperationContext;
pub use phase::{Phase, Status};

use self::phase::StatusCell;
use crate::operation::{Operation, OperationError, OperationFactory, Step, WorkerIdentity, guarded};
use crate::pacer::Pacer;
use crate::pool::PoolEvents;
use crate::signal::{ShutdownSignal, StopSignal};
use crate::stats::{ResponseSummary, ResponseTimes, SequenceTotals, SequenceTracker};
use crate::{Error, Result};

/// Knobs every worker in a pool shares.
#[derive(Debug, Clone, Default)]
pub struct WorkerSettings {
    /// Stop after this many iterations; `0` means unlimited.
    pub max_iterations: u64,
    pub ramp: Duration,
    pub settle_delay: Duration,
    pub response_times: bool,
}

/// Everything a worker thread needs besides its own state.
#[derive(Clone)]
pub(crate) struct WorkerEnv {
    pub(crate) factory: Arc<dyn OperationFactory>,
    pub(crate) shutdown: Arc<ShutdownSignal>,
    pub(crate) events: Arc<PoolEvents>,
    pub(crate) settings: Arc<WorkerSettings>,
}

/// State shared between a worker thread and its observers.
#[derive(Debug)]
pub struct WorkerState {
    identity: WorkerIdentity,
    status: StatusCell,
    iterations: AtomicU64,
    rate_bits: AtomicU64,
    stop: StopSignal,
    created_at: Instant,
    started_at: OnceLock<Instant>,
    ended_at: OnceLock<Instant>,
    response: Option<Mutex<ResponseTimes>>,
    sequence: Mutex<Option<SequenceTracker>>,
}

impl WorkerState {
    fn new(identity: WorkerIdentity, rate: f64, response_times: bool) -> Self {
        Self {
            identity,
            status: StatusCell::new(),
            iterations: AtomicU64::new(0),
            rate_bits: AtomicU64::new(clamp_rate(rate).to_bits()),
            stop: StopSignal::new(),
            created_at: Instant::now(),
            started_at: OnceLock::new(),
            ended_at: OnceLock::new(),
            response: response_times.then(|| Mutex::new(ResponseTimes::default())),
            sequence: Mutex::new(None),
        }
    }

    pub fn identity(&self) -> &WorkerIdentity {
        &self.identity
    }

    pub fn index(&self) -> u64 {
        self.identity.index
    }

    pub fn name(&self) -> &str {
        &self.identity.name
    }

    pub fn status(&self) -> Status {
        self.status.load()
    }

    pub fn iterations(&self) -> u64 {
        self.iterations.load(Ordering::Relaxed)
    }

    pub fn rate(&self) -> f64 {
        f64::from_bits(self.rate_bits.load(Ordering::Relaxed))
    }

    /// Takes effect on the worker's next pacing decision.
    pub fn update_rate(&self, rate: f64) {
        self.rate_bits
            .store(clamp_rate(rate).to_bits(), Ordering::Relaxed);
    }

    /// Asks the worker to finish its current iteration and end. Idempotent.
    pub fn request_stop(&self) -> bool {
        self.stop.request()
    }

    pub fn stop_requested(&self) -> bool {
        self.stop.is_requested()
    }

    pub fn created_at(&self) -> Instant {
        self.created_at
    }

    pub fn started_at(&self) -> Option<Instant> {
        self.started_at.get().copied()
    }

    pub fn ended_at(&self) -> Option<Instant> {
        self.ended_at.get().copied()
    }

    /// Time from creation until the worker reached RUNNING.
    pub fn connect_time(&self) -> Option<Duration> {
        self.started_at()
            .map(|started| started.saturating_duration_since(self.created_at))
    }

    pub fn take_response_window(&self) -> Option<(u64, u64)> {
        self.response.as_ref().map(|rt| rt.lock().take_window())
    }

    pub fn response_summary(&self) -> Option<ResponseSummary> {
        self.response.as_ref().map(|rt| rt.lock().summary())
    }

    pub(crate) fn merge_response_into(&self, total: &mut ResponseTimes) -> bool {
        match &self.response {
            Some(rt) => {
                total.merge(&rt.lock());
                true
            }
            None => false,
        }
    }

    pub fn sequence_totals(&self) -> Option<SequenceTotals> {
        self.sequence.lock().as_ref().map(SequenceTracker::totals)
    }

    pub(crate) fn record_sequence(&self, n: i64) {
        self.sequence
            .lock()
            .get_or_insert_with(SequenceTracker::default)
            .record(n);
    }

    pub(crate) fn record_sequence_error(&self) {
        self.sequence
            .lock()
            .get_or_insert_with(SequenceTracker::default)
            .record_error();
    }

    pub(crate) fn stop_signal(&self) -> &StopSignal {
        &self.stop
    }

    fn complete_iteration(&self, elapsed: Duration) {
        self.iterations.fetch_add(1, Ordering::Relaxed);
        if let Some(rt) = &self.response {
            rt.lock().record(elapsed);
        }
    }

    fn mark_started(&self) {
        let _ = self.started_at.set(Instant::now());
    }

    fn mark_ended(&self) {
        let _ = self.ended_at.set(Instant::now());
    }
}

fn clamp_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate > 0.0 { rate } else { 0.0 }
}

/// A pool entry: the shared state plus the thread driving it.
#[derive(Debug)]
pub struct Worker {
    state: Arc<WorkerState>,
    thread: Option<JoinHandle<()>>,
}

impl Worker {
    pub(crate) fn new(identity: WorkerIdentity, rate: f64, settings: &WorkerSettings) -> Self {
        Self {
            state: Arc::new(WorkerState::new(identity, rate, settings.response_times)),
            thread: None,
        }
    }

    /// Spawns the worker thread. A worker starts at most once.
    pub(crate) fn start(&mut self, env: WorkerEnv) -> Result<()> {
        if self.thread.is_some() {
            return Ok(());
        }
        let state = self.state.clone();
        let name = state.name().to_string();
        let handle = std::thread::Builder::new()
            .name(name.clone())
            .spawn(move || run(state, env))
            .map_err(|source| Error::Spawn { name, source })?;
        self.thread = Some(handle);
        Ok(())
    }

    pub fn state(&self) -> &Arc<WorkerState> {
        &self.state
    }

    pub fn index(&self) -> u64 {
        self.state.index()
    }

    pub fn status(&self) -> Status {
        self.state.status()
    }

    pub fn iterations(&self) -> u64 {
        self.state.iterations()
    }

    pub fn update_rate(&self, rate: f64) {
        self.state.update_rate(rate);
    }

    pub fn request_stop(&self) -> bool {
        self.state.request_stop()
    }

    pub(crate) fn thread_finished(&self) -> bool {
        self.thread.as_ref().is_none_or(JoinHandle::is_finished)
    }

    pub(crate) fn join_if_finished(&mut self) {
        if self.thread.as_ref().is_some_and(JoinHandle::is_finished)
            && let Some(handle) = self.thread.take()
            && handle.join().is_err()
        {
            tracing::warn!(worker = %self.state.identity, "worker thread panicked");
        }
    }
}

enum Outcome {
    Stopped,
    Completed,
    Failed(OperationError),
}

fn run(state: Arc<WorkerState>, env: WorkerEnv) {
    let span = tracing::info_span!("worker", worker = %state.identity);
    let _entered = span.enter();

    state.status.advance(Phase::Connecting);
    env.events.notify();

    let ctx = OperationContext::new(state.clone(), env.shutdown.clone());
    let connected = if ctx.should_stop() {
        Ok(None)
    } else {
        guarded("setup", || {
            let mut op = env.factory.create(&state.identity)?;
            op.setup(&ctx)?;
            Ok(Some(op))
        })
    };

    match connected {
        Ok(Some(mut op)) => {
            state.mark_started();
            state.status.advance(Phase::Running);
            env.events.worker_running();
            tracing::info!("START");

            if !env.settings.ramp.is_zero() && state.rate() <= 0.0 {
                tracing::warn!("ramp has no effect without a rate");
            }

            let outcome = drive(op.as_mut(), &ctx, &state, &env.settings);
            state.mark_ended();
            match &outcome {
                Outcome::Failed(err) => {
                    state.status.flag_error();
                    tracing::error!(error = %err, iterations = state.iterations(), "operation failed");
                }
                Outcome::Completed => tracing::debug!("operation completed"),
                Outcome::Stopped => {}
            }
            state.status.advance(Phase::Ending);
            if matches!(outcome, Outcome::Failed(_)) {
                env.shutdown.trigger("worker failed");
            }
            env.events.worker_left_running();

            if let Err(err) = guarded("teardown", || op.teardown(&ctx)) {
                tracing::warn!(error = %err, "teardown failed");
            }
        }
        Ok(None) => {
            state.status.advance(Phase::Ending);
        }
        Err(err) => {
            state.status.flag_error();
            state.status.advance(Phase::Ending);
            tracing::error!(error = %err, "worker failed to connect");
            env.shutdown.trigger("worker failed to connect");
        }
    }

    state.mark_ended();
    state.status.advance(Phase::Ended);
    env.events.notify();
    tracing::info!(iterations = state.iterations(), "STOP");

    if !env.settings.settle_delay.is_zero() {
        std::thread::sleep(env.settings.settle_delay);
    }
}

fn drive(
    op: &mut dyn Operation,
    ctx: &OperationContext,
    state: &WorkerState,
    settings: &WorkerSettings,
) -> Outcome {
    let mut pacer = Pacer::new(settings.ramp);
    pacer.start_at(Instant::now());

    loop {
        if ctx.should_stop() {
            return Outcome::Stopped;
        }
        if settings.max_iterations > 0 && state.iterations() >= settings.max_iterations {
            return Outcome::Completed;
        }

        if let Some(wait) = pacer.acquire(state.rate(), Instant::now())
            && state.stop.sleep(wait)
        {
            return Outcome::Stopped;
        }

        let began = Instant::now();
        match guarded("step", || op.step(ctx)) {
            Ok(Step::Continue) => state.complete_iteration(began.elapsed()),
            Ok(Step::Done) => return Outcome::Completed,
            Err(err) => return Outcome::Failed(err),
        }
    }
}
