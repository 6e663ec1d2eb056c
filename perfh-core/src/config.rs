use std::collections::BTreeMap;
use std::net::IpAddr;
use std::net::Ipv4Addr;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use crate::pool::MAX_WORKERS;
use crate::{Error, Result};

pub const DEFAULT_COMMAND_PORT: u16 = 8001;

/// Which command channel drives the harness at runtime.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum TransportKind {
    #[default]
    #[strum(serialize = "none", serialize = "dummy")]
    None,

    #[strum(serialize = "socket", serialize = "tcp")]
    Socket,

    #[strum(serialize = "pipe", serialize = "fifo")]
    Pipe,
}

impl TransportKind {
    /// Like `str::parse`, with the crate's error for unknown names.
    pub fn from_name(name: &str) -> Result<Self> {
        name.trim()
            .parse()
            .map_err(|_| Error::UnknownTransport(name.to_string()))
    }
}

#[derive(Debug, Clone)]
pub struct TransportConfig {
    pub kind: TransportKind,
    pub bind: IpAddr,
    pub port: u16,
    pub pipe_path: Option<PathBuf>,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            kind: TransportKind::None,
            bind: IpAddr::V4(Ipv4Addr::LOCALHOST),
            port: DEFAULT_COMMAND_PORT,
            pipe_path: None,
        }
    }
}

/// How periodic stats lines measure throughput.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum StatsMode {
    /// Iterations since the previous line divided by the elapsed period.
    #[default]
    #[strum(to_string = "basic", serialize = "normal")]
    Basic,

    /// Average of the last `rolling_window` one-second samples.
    #[strum(to_string = "rolling", serialize = "rolling-average")]
    Rolling,
}

/// Where each worker's summary duration starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, strum::EnumString, strum::Display)]
#[strum(ascii_case_insensitive)]
pub enum SummaryTiming {
    /// From the worker reaching RUNNING, or from the end of the discard period.
    #[default]
    #[strum(serialize = "normal")]
    Normal,

    /// From harness start, so slow starters are charged for their start-up.
    #[strum(to_string = "tlf", serialize = "time-to-last-fire")]
    TimeToLastFire,
}

/// Free-form `key=value` settings handed to the operation factory.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OperationSettings(BTreeMap<String, String>);

impl OperationSettings {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, key: impl Into<String>, value: impl Into<String>) {
        self.0.insert(key.into(), value.into());
    }

    #[must_use]
    pub fn with(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.insert(key, value);
        self
    }

    pub fn get(&self, key: &str) -> Option<&str> {
        self.0.get(key).map(String::as_str)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.0.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    /// Parses `key` with `FromStr`; a missing key yields `Ok(None)`.
    pub fn parse<T>(&self, key: &str) -> Result<Option<T>>
    where
        T: FromStr,
        T::Err: std::fmt::Display,
    {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        raw.trim()
            .parse::<T>()
            .map(Some)
            .map_err(|err| Error::InvalidSetting {
                key: key.to_string(),
                reason: format!("`{raw}`: {err}"),
            })
    }

    /// Accepts humantime strings (`250ms`, `2s`) or bare seconds (`1.5`).
    pub fn duration(&self, key: &str) -> Result<Option<Duration>> {
        let Some(raw) = self.get(key) else {
            return Ok(None);
        };
        parse_duration(raw)
            .map(Some)
            .map_err(|reason| Error::InvalidSetting {
                key: key.to_string(),
                reason,
            })
    }
}

impl<K, V> FromIterator<(K, V)> for OperationSettings
where
    K: Into<String>,
    V: Into<String>,
{
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        Self(
            iter.into_iter()
                .map(|(k, v)| (k.into(), v.into()))
                .collect(),
        )
    }
}

#[derive(Debug, Clone, Default)]
pub struct OperationConfig {
    pub name: String,
    pub settings: OperationSettings,
}

/// Everything the harness needs to run. Every field has a usable default
/// except `operation.name`.
#[derive(Debug, Clone)]
pub struct HarnessConfig {
    /// Workers started before commands are accepted.
    pub workers: u64,
    /// Per-worker target rate in operations per second; `0` disables pacing.
    pub rate: f64,
    /// Per-worker iteration limit; `0` means unlimited.
    pub max_iterations: u64,
    /// Linear rate ramp applied from each worker's start.
    pub ramp: Duration,
    /// Whole-run timer; zero means run until told to stop.
    pub run_length: Duration,
    /// Pause before a worker thread exits after reaching ENDED.
    pub settle_delay: Duration,
    /// Periodic stats line cadence; zero limits stats to REPORT.
    pub stats_interval: Duration,
    pub stats_mode: StatsMode,
    /// One-second samples averaged by [`StatsMode::Rolling`].
    pub rolling_window: u32,
    /// Warm-up excluded from the final summary, timed from the initial scale-up.
    pub discard: Duration,
    pub summary_timing: SummaryTiming,
    pub per_worker_stats: bool,
    pub response_times: bool,
    pub summary: bool,
    /// Pause between successive worker starts during one scale-up.
    pub start_interval: Duration,
    /// How long a scale-up waits for each new worker to reach RUNNING.
    pub start_timeout: Duration,
    /// Upper bound on waiting for workers to end at shutdown.
    pub shutdown_wait: Duration,
    /// Prefix for reports and command replies.
    pub id: Option<String>,
    pub command: TransportConfig,
    pub operation: OperationConfig,
}

impl Default for HarnessConfig {
    fn default() -> Self {
        Self {
            workers: 1,
            rate: 0.0,
            max_iterations: 0,
            ramp: Duration::ZERO,
            run_length: Duration::ZERO,
            settle_delay: Duration::ZERO,
            stats_interval: Duration::from_secs(1),
            stats_mode: StatsMode::Basic,
            rolling_window: 10,
            discard: Duration::ZERO,
            summary_timing: SummaryTiming::Normal,
            per_worker_stats: false,
            response_times: false,
            summary: true,
            start_interval: Duration::ZERO,
            start_timeout: Duration::from_secs(30),
            shutdown_wait: Duration::from_secs(120),
            id: None,
            command: TransportConfig::default(),
            operation: OperationConfig::default(),
        }
    }
}

impl HarnessConfig {
    /// Checks hard errors and normalizes soft ones (negative rates clamp to zero).
    pub fn validate(&mut self) -> Result<()> {
        if self.workers == 0 {
            return Err(Error::InvalidWorkers);
        }
        if !usize::try_from(self.workers).is_ok_and(|n| n <= MAX_WORKERS) {
            return Err(Error::TooManyWorkers(MAX_WORKERS));
        }
        if self.start_timeout.is_zero() {
            return Err(Error::InvalidStartTimeout);
        }
        if self.operation.name.trim().is_empty() {
            return Err(Error::MissingOperation);
        }
        if self.command.kind == TransportKind::Pipe && self.command.pipe_path.is_none() {
            return Err(Error::MissingPipePath);
        }
        if self.stats_mode == StatsMode::Rolling && self.rolling_window == 0 {
            return Err(Error::InvalidRollingWindow);
        }

        if !self.run_length.is_zero() {
            if self.discard >= self.run_length {
                tracing::warn!(
                    discard = ?self.discard,
                    run_length = ?self.run_length,
                    "discard period covers the whole run; the summary will include warm-up"
                );
            }
            let window = Duration::from_secs(u64::from(self.rolling_window));
            if self.stats_mode == StatsMode::Rolling && window >= self.run_length {
                tracing::warn!(
                    rolling_window = self.rolling_window,
                    run_length = ?self.run_length,
                    "run length is shorter than the rolling window, basic stats fit better"
                );
            }
        }

        self.rate = sanitize_rate(self.rate);
        if self.id.as_deref().is_some_and(|id| id.trim().is_empty()) {
            self.id = None;
        }
        Ok(())
    }
}

/// Negative and non-finite rates mean "unthrottled".
pub fn sanitize_rate(rate: f64) -> f64 {
    if rate.is_finite() && rate >= 0.0 {
        return rate;
    }
    tracing::warn!(rate, "invalid rate, using 0 (unthrottled)");
    0.0
}

pub fn parse_duration(raw: &str) -> std::result::Result<Duration, String> {
    let s = raw.trim();
    if s.is_empty() {
        return Err("empty duration".to_string());
    }

    if let Ok(secs) = s.parse::<f64>() {
        if !secs.is_finite() || secs < 0.0 {
            return Err(format!("invalid duration `{raw}`"));
        }
        return Ok(Duration::from_secs_f64(secs));
    }

    humantime::parse_duration(s).map_err(|err| format!("invalid duration `{raw}`: {err}"))
}
