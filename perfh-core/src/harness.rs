use std::sync::Arc;
use std::time::Duration;

use crate::command::CommandProcessor;
use crate::config::HarnessConfig;
use crate::operation::OperationFactory;
use crate::pool::{PoolSettings, ScaleError, WorkerPool};
use crate::signal::ShutdownSignal;
use crate::stats::{ReportSink, RunSummary, StatsAggregator, StatsOptions, stdout_sink};
use crate::transport::CommandTransport;
use crate::Result;

const TRANSPORT_GRACE: Duration = Duration::from_secs(2);

/// Wires a pool, its stats and a command processor together for one run.
pub struct Harness {
    config: HarnessConfig,
    pool: Arc<WorkerPool>,
    stats: Arc<StatsAggregator>,
    processor: Arc<CommandProcessor>,
    shutdown: Arc<ShutdownSignal>,
    sink: ReportSink,
}

impl Harness {
    pub fn new(config: HarnessConfig, factory: Arc<dyn OperationFactory>) -> Self {
        Self::with_sink(config, factory, stdout_sink())
    }

    /// Like [`Harness::new`], with stats lines routed to `sink`.
    pub fn with_sink(
        config: HarnessConfig,
        factory: Arc<dyn OperationFactory>,
        sink: ReportSink,
    ) -> Self {
        let shutdown = Arc::new(ShutdownSignal::new());
        let pool = Arc::new(WorkerPool::new(
            factory,
            shutdown.clone(),
            config.rate,
            PoolSettings::from(&config),
        ));
        let stats = Arc::new(StatsAggregator::new(
            pool.clone(),
            StatsOptions::from(&config),
        ));
        let processor = Arc::new(CommandProcessor::new(
            pool.clone(),
            stats.clone(),
            config.id.clone(),
        ));
        Self {
            config,
            pool,
            stats,
            processor,
            shutdown,
            sink,
        }
    }

    pub fn config(&self) -> &HarnessConfig {
        &self.config
    }

    pub fn pool(&self) -> &Arc<WorkerPool> {
        &self.pool
    }

    pub fn stats(&self) -> &Arc<StatsAggregator> {
        &self.stats
    }

    pub fn processor(&self) -> &Arc<CommandProcessor> {
        &self.processor
    }

    pub fn shutdown_signal(&self) -> &Arc<ShutdownSignal> {
        &self.shutdown
    }

    /// Starts the configured workers, serves commands and emits stats until the
    /// shutdown signal fires, then winds the pool down.
    pub async fn run(&self, transport: Box<dyn CommandTransport>) -> Result<RunSummary> {
        tracing::info!(
            operation = %self.config.operation.name,
            workers = self.config.workers,
            rate = self.config.rate,
            transport = transport.name(),
            "START"
        );

        let mut transport_task =
            tokio::spawn(transport.serve(self.processor.clone(), self.shutdown.clone()));
        let ticker = tokio::spawn(
            self.stats
                .clone()
                .run_ticker(self.shutdown.clone(), self.sink.clone()),
        );
        let timer = self.spawn_run_length_timer();

        let pool = self.pool.clone();
        let workers = usize::try_from(self.config.workers).unwrap_or(usize::MAX);
        let mut discard = None;
        let startup_error = match tokio::task::spawn_blocking(move || pool.scale_up(workers)).await? {
            Ok(()) => {
                discard = self.spawn_discard_timer();
                None
            }
            Err(ScaleError::ShuttingDown) => None,
            Err(err) => {
                tracing::error!(error = %err, "failed to start workers");
                self.shutdown.trigger("startup failed");
                Some(err.to_string())
            }
        };

        self.shutdown.wait().await;

        let pool = self.pool.clone();
        let stragglers = tokio::task::spawn_blocking(move || pool.shutdown()).await?;

        if let Err(err) = ticker.await {
            tracing::warn!(error = %err, "stats ticker failed");
        }
        for timer in [timer, discard].into_iter().flatten() {
            timer.abort();
        }
        match tokio::time::timeout(TRANSPORT_GRACE, &mut transport_task).await {
            Ok(Ok(Ok(()))) => {}
            Ok(Ok(Err(err))) => tracing::warn!(error = %err, "command transport failed"),
            Ok(Err(err)) => tracing::warn!(error = %err, "command transport task failed"),
            Err(_) => {
                tracing::warn!("command transport did not stop in time");
                transport_task.abort();
            }
        }

        let mut summary = self.stats.final_summary();
        summary.shutdown_reason = self.shutdown.reason().map(str::to_string);
        summary.startup_error = startup_error;
        summary.stragglers = stragglers;

        tracing::info!(
            iterations = summary.total_iterations,
            errors = summary.errors(),
            reason = summary.shutdown_reason.as_deref().unwrap_or("unknown"),
            "STOP"
        );
        Ok(summary)
    }

    /// Ends the warm-up once the initial workers have been running for `discard`.
    fn spawn_discard_timer(&self) -> Option<tokio::task::JoinHandle<()>> {
        let discard = self.config.discard;
        if discard.is_zero() {
            return None;
        }
        let shutdown = self.shutdown.clone();
        let stats = self.stats.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.wait() => {}
                _ = tokio::time::sleep(discard) => stats.begin_measurement(),
            }
        }))
    }

    fn spawn_run_length_timer(&self) -> Option<tokio::task::JoinHandle<()>> {
        let run_length = self.config.run_length;
        if run_length.is_zero() {
            return None;
        }
        let shutdown = self.shutdown.clone();
        Some(tokio::spawn(async move {
            tokio::select! {
                _ = shutdown.wait() => {}
                _ = tokio::time::sleep(run_length) => {
                    shutdown.trigger("run length elapsed");
                }
            }
        }))
    }
}
