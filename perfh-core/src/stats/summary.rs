use std::sync::Arc;
use std::time::{Duration, Instant};

use super::{Baseline, ResponseSummary, ResponseTimes, SequenceTotals};
use crate::config::SummaryTiming;
use crate::worker::{Status, WorkerState};

/// Which slice of each worker's life the summary covers.
#[derive(Debug, Clone, Copy)]
pub(super) struct SummaryWindow<'a> {
    pub(super) timing: SummaryTiming,
    /// Start of every worker's duration under [`SummaryTiming::TimeToLastFire`].
    pub(super) origin: Instant,
    /// Counts taken when the discard period ended.
    pub(super) trim: Option<&'a Baseline>,
}

impl SummaryWindow<'_> {
    fn iterations(&self, state: &WorkerState) -> u64 {
        let total = state.iterations();
        match self.trim {
            Some(trim) => total.saturating_sub(trim.previous(state.index())),
            None => total,
        }
    }

    /// Zero for workers that never reached RUNNING.
    fn duration(&self, state: &WorkerState, now: Instant) -> Duration {
        let Some(started) = state.started_at() else {
            return Duration::ZERO;
        };
        let from = match (self.timing, self.trim) {
            (SummaryTiming::TimeToLastFire, _) => self.origin,
            (SummaryTiming::Normal, Some(trim)) => started.max(trim.taken_at),
            (SummaryTiming::Normal, None) => started,
        };
        state
            .ended_at()
            .unwrap_or(now)
            .saturating_duration_since(from)
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSummary {
    pub index: u64,
    pub name: String,
    pub status: Status,
    pub iterations: u64,
    /// Time spent RUNNING within the measured window.
    pub duration: Duration,
    pub rate: f64,
    pub connect_time: Option<Duration>,
    pub response: Option<ResponseSummary>,
    pub sequence: Option<SequenceTotals>,
}

/// End-of-run totals across every worker the pool ever started.
#[derive(Debug, Clone, Default)]
pub struct RunSummary {
    pub id: Option<String>,
    pub workers: Vec<WorkerSummary>,
    pub total_iterations: u64,
    /// Mean running time across workers that reached RUNNING.
    pub avg_duration: Duration,
    /// Sum of per-worker rates.
    pub total_rate: f64,
    /// Highest rolling-window average after the discard period, in rolling mode.
    pub rolling_peak: Option<f64>,
    /// Response times across every worker that recorded them.
    pub response: Option<ResponseSummary>,
    pub sequence: Option<SequenceTotals>,
    pub shutdown_reason: Option<String>,
    pub startup_error: Option<String>,
    pub stragglers: Vec<String>,
}

impl RunSummary {
    pub(super) fn collect(
        id: Option<String>,
        states: &[Arc<WorkerState>],
        now: Instant,
        window: SummaryWindow<'_>,
    ) -> Self {
        let workers: Vec<WorkerSummary> = states
            .iter()
            .map(|s| {
                let duration = window.duration(s, now);
                let iterations = window.iterations(s);
                let secs = duration.as_secs_f64();
                WorkerSummary {
                    index: s.index(),
                    name: s.name().to_string(),
                    status: s.status(),
                    iterations,
                    duration,
                    rate: if secs > 0.0 { iterations as f64 / secs } else { 0.0 },
                    connect_time: s.connect_time(),
                    response: s.response_summary(),
                    sequence: s.sequence_totals(),
                }
            })
            .collect();

        let started: Vec<&WorkerSummary> =
            workers.iter().filter(|w| w.connect_time.is_some()).collect();
        let avg_duration = match u32::try_from(started.len()) {
            Ok(n) if n > 0 => started.iter().map(|w| w.duration).sum::<Duration>() / n,
            _ => Duration::ZERO,
        };

        let mut merged = ResponseTimes::default();
        let mut recorded = false;
        for state in states {
            recorded |= state.merge_response_into(&mut merged);
        }

        let sequence = workers
            .iter()
            .filter_map(|w| w.sequence)
            .reduce(|mut acc, s| {
                acc.merge(s);
                acc
            });

        Self {
            id,
            response: recorded.then(|| merged.summary()),
            sequence,
            total_iterations: workers.iter().map(|w| w.iterations).sum(),
            total_rate: workers.iter().map(|w| w.rate).sum(),
            avg_duration,
            workers,
            ..Self::default()
        }
    }

    pub fn errors(&self) -> usize {
        self.workers.iter().filter(|w| w.status.error).count()
    }

    pub fn succeeded(&self) -> bool {
        self.startup_error.is_none() && self.errors() == 0
    }

    /// `totalIterations=..,avgDuration=..,totalRate=..`, with `maxrateR`
    /// in place of `totalRate` in rolling mode.
    pub fn line(&self) -> String {
        let prefix = self
            .id
            .as_deref()
            .map(|id| format!("id={id},"))
            .unwrap_or_default();
        let (label, rate) = match self.rolling_peak {
            Some(peak) => ("maxrateR", peak),
            None => ("totalRate", self.total_rate),
        };
        format!(
            "{prefix}totalIterations={},avgDuration={:.2},{label}={rate:.2}",
            self.total_iterations,
            self.avg_duration.as_secs_f64(),
        )
    }
}
