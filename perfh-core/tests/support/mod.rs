#![allow(dead_code)]

use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::{Duration, Instant};

use perfh_core::{
    Operation, OperationContext, OperationFactory, OperationResult, PoolSettings, ShutdownSignal,
    Step, WorkerIdentity, WorkerPool, WorkerSettings,
};

/// Completes instantly; after `limit` iterations parks until stopped.
pub struct Counting {
    limit: Option<u64>,
}

impl Operation for Counting {
    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
        if let Some(limit) = self.limit
            && ctx.iterations() >= limit
        {
            ctx.wait_for_stop();
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }
}

/// Sleeps a little per step so tests can watch counters move.
pub struct Ticking(pub Duration);

impl Operation for Ticking {
    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
        if ctx.sleep(self.0) {
            return Ok(Step::Done);
        }
        Ok(Step::Continue)
    }
}

pub struct FailingSetup;

impl Operation for FailingSetup {
    fn setup(&mut self, _ctx: &OperationContext) -> OperationResult<()> {
        Err("connection refused".into())
    }

    fn step(&mut self, _ctx: &OperationContext) -> OperationResult<Step> {
        Ok(Step::Continue)
    }
}

pub struct PanicOnStep;

impl Operation for PanicOnStep {
    fn step(&mut self, _ctx: &OperationContext) -> OperationResult<Step> {
        panic!("step exploded");
    }
}

pub struct CountTeardowns(pub Arc<AtomicUsize>);

impl Operation for CountTeardowns {
    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
        ctx.sleep(Duration::from_millis(2));
        Ok(Step::Continue)
    }

    fn teardown(&mut self, _ctx: &OperationContext) -> OperationResult<()> {
        self.0.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}

pub fn factory_of<F>(make: F) -> Arc<dyn OperationFactory>
where
    F: Fn(&WorkerIdentity) -> Box<dyn Operation> + Send + Sync + 'static,
{
    Arc::new(move |id: &WorkerIdentity| -> OperationResult<Box<dyn Operation>> { Ok(make(id)) })
}

pub fn counting() -> Arc<dyn OperationFactory> {
    factory_of(|_| Box::new(Counting { limit: None }))
}

/// Worker `i` stops counting at `limits[i]`.
pub fn limited(limits: Vec<u64>) -> Arc<dyn OperationFactory> {
    factory_of(move |id| {
        let limit = usize::try_from(id.index)
            .ok()
            .and_then(|i| limits.get(i).copied())
            .unwrap_or(0);
        Box::new(Counting { limit: Some(limit) })
    })
}

pub fn ticking(step: Duration) -> Arc<dyn OperationFactory> {
    factory_of(move |_| Box::new(Ticking(step)))
}

pub fn settings() -> PoolSettings {
    PoolSettings {
        start_timeout: Duration::from_secs(5),
        shutdown_wait: Duration::from_secs(5),
        ..PoolSettings::default()
    }
}

pub fn pool(factory: Arc<dyn OperationFactory>, rate: f64) -> Arc<WorkerPool> {
    pool_with(factory, rate, WorkerSettings::default())
}

pub fn pool_with(
    factory: Arc<dyn OperationFactory>,
    rate: f64,
    worker: WorkerSettings,
) -> Arc<WorkerPool> {
    Arc::new(WorkerPool::new(
        factory,
        Arc::new(ShutdownSignal::new()),
        rate,
        PoolSettings {
            worker,
            ..settings()
        },
    ))
}

/// Polls `cond` every few milliseconds until it holds or `timeout` passes.
pub fn wait_until(timeout: Duration, mut cond: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    loop {
        if cond() {
            return true;
        }
        if Instant::now() >= deadline {
            return false;
        }
        std::thread::sleep(Duration::from_millis(5));
    }
}

pub fn iterations(pool: &WorkerPool) -> Vec<u64> {
    pool.with_workers(|ws| ws.iter().map(|w| w.iterations()).collect())
}

pub fn indices(pool: &WorkerPool) -> Vec<u64> {
    pool.with_workers(|ws| ws.iter().map(|w| w.index()).collect())
}
