use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::worker::OperationContext;

/// Error raised by an operation. Any error type works; workers only log it.
pub type OperationError = Box<dyn std::error::Error + Send + Sync + 'static>;
pub type OperationResult<T> = std::result::Result<T, OperationError>;

/// Outcome of a single [`Operation::step`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    /// One unit of work completed; counts as an iteration.
    Continue,
    /// The operation has nothing left to do. Not counted.
    Done,
}

/// The unit of load a worker drives in a loop.
///
/// One instance belongs to one worker thread for its whole life, so `&mut self`
/// state needs no synchronization.
pub trait Operation: Send {
    /// Acquires connections or other resources. Runs while the worker is CONNECTING.
    fn setup(&mut self, ctx: &OperationContext) -> OperationResult<()> {
        let _ = ctx;
        Ok(())
    }

    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step>;

    /// Releases resources. Errors are logged, never propagated.
    fn teardown(&mut self, ctx: &OperationContext) -> OperationResult<()> {
        let _ = ctx;
        Ok(())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct WorkerIdentity {
    pub index: u64,
    pub name: Arc<str>,
}

impl WorkerIdentity {
    pub fn new(prefix: &str, index: u64) -> Self {
        Self {
            index,
            name: Arc::from(format!("{prefix}{index}")),
        }
    }
}

impl fmt::Display for WorkerIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.name)
    }
}

/// Builds one [`Operation`] per worker. Shared by every worker in a pool.
pub trait OperationFactory: Send + Sync {
    fn create(&self, worker: &WorkerIdentity) -> OperationResult<Box<dyn Operation>>;
}

impl<F> OperationFactory for F
where
    F: Fn(&WorkerIdentity) -> OperationResult<Box<dyn Operation>> + Send + Sync,
{
    fn create(&self, worker: &WorkerIdentity) -> OperationResult<Box<dyn Operation>> {
        self(worker)
    }
}

#[derive(Debug, thiserror::Error)]
#[error("{stage} panicked: {message}")]
pub struct OperationPanic {
    pub stage: &'static str,
    pub message: String,
}

/// Runs `f`, converting a panic into an [`OperationError`].
pub(crate) fn guarded<T>(
    stage: &'static str,
    f: impl FnOnce() -> OperationResult<T>,
) -> OperationResult<T> {
    match std::panic::catch_unwind(std::panic::AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => Err(Box::new(OperationPanic {
            stage,
            message: panic_message(payload.as_ref()),
        })),
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
