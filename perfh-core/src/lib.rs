//! Worker pool, pacing, statistics and command plumbing for the perfh load
//! generator. Protocol-specific work plugs in through [`Operation`].

mod command;
mod config;
mod error;
mod harness;
mod operation;
mod pacer;
mod pool;
mod signal;
mod stats;
mod transport;
mod worker;

pub use command::{Command, CommandProcessor, INVALID_REPORT, OptionError, Reply, Verb};
pub use config::{
    DEFAULT_COMMAND_PORT, HarnessConfig, OperationConfig, OperationSettings, StatsMode,
    SummaryTiming, TransportConfig, TransportKind, parse_duration, sanitize_rate,
};
pub use error::{Error, Result};
pub use harness::Harness;
pub use operation::{
    Operation, OperationError, OperationFactory, OperationPanic, OperationResult, Step,
    WorkerIdentity,
};
pub use pacer::{Pacer, WINDOW};
pub use pool::{MAX_WORKERS, PoolSettings, ScaleError, WorkerPool};
pub use signal::{ShutdownSignal, StopSignal};
pub use stats::{
    ROLLING_SAMPLE_PERIOD, ReportSink, ResponseSummary, ResponseTimes, RunSummary,
    SequenceTotals, SequenceTracker, Snapshot, StatsAggregator, StatsOptions, WorkerSample,
    WorkerSummary, stdout_sink,
};
#[cfg(unix)]
pub use transport::PipeTransport;
pub use transport::{CommandTransport, NoopTransport, ServeFuture, SocketTransport, open as open_transport};
pub use worker::{OperationContext, Phase, Status, Worker, WorkerSettings, WorkerState};
