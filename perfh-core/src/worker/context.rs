use std::sync::Arc;
use std::time::Duration;

use super::WorkerState;
use crate::operation::WorkerIdentity;
use crate::signal::ShutdownSignal;

/// Handle an [`Operation`](crate::Operation) uses to talk to the worker driving it.
#[derive(Debug, Clone)]
pub struct OperationContext {
    state: Arc<WorkerState>,
    shutdown: Arc<ShutdownSignal>,
}

impl OperationContext {
    pub(crate) fn new(state: Arc<WorkerState>, shutdown: Arc<ShutdownSignal>) -> Self {
        Self { state, shutdown }
    }

    pub fn worker(&self) -> &WorkerIdentity {
        self.state.identity()
    }

    /// Iterations completed so far by this worker.
    pub fn iterations(&self) -> u64 {
        self.state.iterations()
    }

    pub fn rate(&self) -> f64 {
        self.state.rate()
    }

    /// `true` once this worker was asked to stop or the process is shutting down.
    /// Long-running steps should poll this.
    pub fn should_stop(&self) -> bool {
        self.state.stop_requested() || self.shutdown.is_triggered()
    }

    /// Sleeps unless a stop arrives first. Returns `true` if interrupted.
    pub fn sleep(&self, dur: Duration) -> bool {
        self.state.stop_signal().sleep(dur) || self.shutdown.is_triggered()
    }

    /// Parks the calling thread until this worker is asked to stop.
    ///
    /// For listener-style operations whose work arrives on other threads.
    pub fn wait_for_stop(&self) {
        self.state.stop_signal().wait();
    }

    pub fn record_sequence(&self, n: i64) {
        self.state.record_sequence(n);
    }

    pub fn record_sequence_error(&self) {
        self.state.record_sequence_error();
    }
}
