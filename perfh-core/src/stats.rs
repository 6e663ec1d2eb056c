mod response;
mod rolling;
mod sequence;
mod summary;

use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

pub use response::{ResponseSummary, ResponseTimes};
pub use sequence::{SequenceTotals, SequenceTracker};
pub use summary::{RunSummary, WorkerSummary};

use rolling::RollingWindow;
use summary::SummaryWindow;

use crate::config::{HarnessConfig, StatsMode, SummaryTiming};
use crate::pool::WorkerPool;
use crate::signal::ShutdownSignal;
use crate::worker::Status;

/// Destination for rendered stats lines and other operator-facing output.
pub type ReportSink = Arc<dyn Fn(&str) + Send + Sync>;

pub fn stdout_sink() -> ReportSink {
    Arc::new(|line: &str| println!("{line}"))
}

/// Cadence of the samples feeding [`StatsMode::Rolling`].
pub const ROLLING_SAMPLE_PERIOD: Duration = Duration::from_secs(1);

#[derive(Debug, Clone, Default)]
pub struct StatsOptions {
    /// Ticker cadence; zero disables periodic lines.
    pub interval: Duration,
    pub per_worker: bool,
    pub id: Option<String>,
    pub mode: StatsMode,
    /// Samples averaged in rolling mode.
    pub rolling_window: u32,
    /// Zero means the summary covers the whole run.
    pub discard: Duration,
    pub timing: SummaryTiming,
}

impl From<&HarnessConfig> for StatsOptions {
    fn from(cfg: &HarnessConfig) -> Self {
        Self {
            interval: cfg.stats_interval,
            per_worker: cfg.per_worker_stats,
            id: cfg.id.clone(),
            mode: cfg.stats_mode,
            rolling_window: cfg.rolling_window,
            discard: cfg.discard,
            timing: cfg.summary_timing,
        }
    }
}

#[derive(Debug, Clone)]
pub struct WorkerSample {
    pub index: u64,
    pub status: Status,
    pub iterations: u64,
    pub delta: u64,
}

/// One sampling pass over the pool.
#[derive(Debug, Clone)]
pub struct Snapshot {
    pub period: Duration,
    pub workers: Vec<WorkerSample>,
    /// Iterations completed since the previous sample.
    pub delta: u64,
    /// Sum of the live workers' counters.
    pub iterations: u64,
    pub running: usize,
    /// `(total_us, count)` of response times recorded during the period.
    pub response: Option<(u64, u64)>,
    pub sequence: Option<SequenceTotals>,
    /// Rolling-window average, in rolling mode.
    pub rolling_rate: Option<f64>,
}

impl Snapshot {
    pub fn rate(&self) -> f64 {
        let secs = self.period.as_secs_f64();
        if secs > 0.0 {
            self.delta as f64 / secs
        } else {
            0.0
        }
    }
}

#[derive(Debug)]
struct Baseline {
    taken_at: Instant,
    /// `(worker index, iterations)` ordered by index.
    counts: Vec<(u64, u64)>,
}

impl Baseline {
    fn capture(mut counts: Vec<(u64, u64)>) -> Self {
        counts.sort_unstable_by_key(|&(index, _)| index);
        Self {
            taken_at: Instant::now(),
            counts,
        }
    }

    fn previous(&self, index: u64) -> u64 {
        self.counts
            .binary_search_by_key(&index, |&(idx, _)| idx)
            .map(|pos| self.counts[pos].1)
            .unwrap_or(0)
    }
}

#[derive(Debug)]
struct RollingState {
    window: RollingWindow,
    last: Baseline,
}

/// Periodic and on-demand throughput sampling over a [`WorkerPool`].
///
/// The ticker and REPORT share one baseline, so every sample covers the time
/// since whichever of them ran last. Rolling mode keeps a second baseline
/// for its one-second samples.
pub struct StatsAggregator {
    pool: Arc<WorkerPool>,
    options: StatsOptions,
    created_at: Instant,
    baseline: Mutex<Baseline>,
    rolling: Option<Mutex<RollingState>>,
    /// Counts at the end of the discard period.
    measurement: Mutex<Option<Baseline>>,
}

impl StatsAggregator {
    pub fn new(pool: Arc<WorkerPool>, options: StatsOptions) -> Self {
        let rolling = (options.mode == StatsMode::Rolling).then(|| {
            let capacity = usize::try_from(options.rolling_window).unwrap_or(usize::MAX);
            Mutex::new(RollingState {
                window: RollingWindow::new(capacity),
                last: Baseline::capture(Vec::new()),
            })
        });
        Self {
            pool,
            options,
            created_at: Instant::now(),
            baseline: Mutex::new(Baseline::capture(Vec::new())),
            rolling,
            measurement: Mutex::new(None),
        }
    }

    pub fn options(&self) -> &StatsOptions {
        &self.options
    }

    pub fn sample(&self) -> Snapshot {
        let mut baseline = self.baseline.lock();
        let now = Instant::now();
        let period = self.snap_period(now.saturating_duration_since(baseline.taken_at));

        let mut response: Option<(u64, u64)> = None;
        let mut sequence: Option<SequenceTotals> = None;
        let workers: Vec<WorkerSample> = self.pool.with_workers(|ws| {
            ws.iter()
                .map(|w| {
                    let state = w.state();
                    if let Some((total, count)) = state.take_response_window() {
                        let acc = response.get_or_insert((0, 0));
                        acc.0 += total;
                        acc.1 += count;
                    }
                    if let Some(totals) = state.sequence_totals() {
                        sequence.get_or_insert_with(SequenceTotals::default).merge(totals);
                    }

                    let iterations = state.iterations();
                    WorkerSample {
                        index: state.index(),
                        status: state.status(),
                        iterations,
                        delta: iterations.saturating_sub(baseline.previous(state.index())),
                    }
                })
                .collect()
        });

        baseline.taken_at = now;
        baseline.counts = workers.iter().map(|w| (w.index, w.iterations)).collect();

        Snapshot {
            period,
            delta: workers.iter().map(|w| w.delta).sum(),
            iterations: workers.iter().map(|w| w.iterations).sum(),
            running: self.pool.running(),
            workers,
            response,
            sequence,
            rolling_rate: self.rolling.as_ref().map(|r| r.lock().window.average()),
        }
    }

    /// Feeds one rolling-window sample: iterations since the previous one.
    /// No-op outside rolling mode.
    pub fn sample_window(&self) {
        let Some(rolling) = &self.rolling else {
            return;
        };
        let mut rolling = rolling.lock();
        let counts: Vec<(u64, u64)> = self.pool.with_workers(|ws| {
            ws.iter()
                .map(|w| (w.state().index(), w.state().iterations()))
                .collect()
        });
        let delta = counts
            .iter()
            .map(|&(index, n)| n.saturating_sub(rolling.last.previous(index)))
            .sum();
        rolling.last = Baseline::capture(counts);
        rolling.window.push(delta);
    }

    /// Ends the discard period: the final summary counts from here on and
    /// the rolling peak starts over.
    pub fn begin_measurement(&self) {
        let counts = self
            .pool
            .all_states()
            .iter()
            .map(|s| (s.index(), s.iterations()))
            .collect();
        *self.measurement.lock() = Some(Baseline::capture(counts));
        if let Some(rolling) = &self.rolling {
            rolling.lock().window.reset_peak();
        }
        tracing::info!(discard = ?self.options.discard, "discard period over, measuring");
    }

    pub fn measuring_since(&self) -> Option<Instant> {
        self.measurement.lock().as_ref().map(|b| b.taken_at)
    }

    /// Periods within 0.5% of the configured interval are reported as the interval.
    fn snap_period(&self, period: Duration) -> Duration {
        let interval = self.options.interval;
        if interval.is_zero() {
            return period;
        }
        let diff = period.abs_diff(interval).as_secs_f64();
        if diff <= interval.as_secs_f64() * 0.005 {
            interval
        } else {
            period
        }
    }

    pub fn render(&self, snap: &Snapshot) -> String {
        let mut line = String::new();
        if let Some(id) = &self.options.id {
            let _ = write!(line, "id={id},");
        }
        if self.options.per_worker {
            line.push('(');
            for (i, w) in snap.workers.iter().enumerate() {
                if i > 0 {
                    line.push('\t');
                }
                let _ = write!(line, "{}", w.delta);
            }
            line.push_str(") ");
        }
        match self.options.mode {
            StatsMode::Basic => {
                let _ = write!(
                    line,
                    "rate={:.2},total messages={},iterations={},Snapshot period={},threads={}",
                    snap.rate(),
                    snap.delta,
                    snap.iterations,
                    snap.period.as_secs(),
                    snap.running,
                );
            }
            StatsMode::Rolling => {
                let _ = write!(
                    line,
                    "rateR={:.2},threads={}",
                    snap.rolling_rate.unwrap_or(0.0),
                    snap.running,
                );
            }
        }
        if let Some((total_us, count)) = snap.response {
            let avg = total_us.checked_div(count).unwrap_or(0);
            let _ = write!(line, ",avgResponse(micros)={avg}");
        }
        if let Some(seq) = snap.sequence {
            let _ = write!(
                line,
                ",miss={},ord={:.2},dup={},err={},cnt={}",
                seq.missing,
                seq.ordering_per_worker(),
                seq.duplicates,
                seq.errors,
                seq.count,
            );
        }
        line
    }

    /// Takes a fresh sample and renders it.
    pub fn report(&self) -> String {
        let snap = self.sample();
        self.render(&snap)
    }

    /// Emits a line every interval and, in rolling mode, feeds the window
    /// every [`ROLLING_SAMPLE_PERIOD`], until shutdown. Returns at once when
    /// there is nothing to do.
    pub async fn run_ticker(self: Arc<Self>, shutdown: Arc<ShutdownSignal>, sink: ReportSink) {
        let mut display = periodic(self.options.interval);
        let mut window = match self.rolling {
            Some(_) => periodic(ROLLING_SAMPLE_PERIOD),
            None => None,
        };
        if display.is_none() && window.is_none() {
            return;
        }

        loop {
            tokio::select! {
                _ = shutdown.wait() => break,
                _ = next_tick(&mut window) => self.sample_window(),
                _ = next_tick(&mut display) => {
                    let line = self.report();
                    sink(&line);
                }
            }
        }
    }

    pub fn final_summary(&self) -> RunSummary {
        let trim = self.measurement.lock();
        if trim.is_none() && !self.options.discard.is_zero() {
            tracing::warn!(
                discard = ?self.options.discard,
                "run ended inside the discard period, the summary includes warm-up"
            );
        }
        let window = SummaryWindow {
            timing: self.options.timing,
            origin: self.created_at,
            trim: trim.as_ref(),
        };
        let mut summary = RunSummary::collect(
            self.options.id.clone(),
            &self.pool.all_states(),
            Instant::now(),
            window,
        );
        summary.rolling_peak = self
            .rolling
            .as_ref()
            .map(|r| r.lock().window.peak().unwrap_or(0.0));
        summary
    }
}

fn periodic(every: Duration) -> Option<tokio::time::Interval> {
    if every.is_zero() {
        return None;
    }
    let mut interval = tokio::time::interval_at(tokio::time::Instant::now() + every, every);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    Some(interval)
}

/// Waits for the next tick; never resolves for a disabled timer.
async fn next_tick(interval: &mut Option<tokio::time::Interval>) {
    match interval {
        Some(interval) => {
            interval.tick().await;
        }
        None => std::future::pending::<()>().await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator(options: StatsOptions) -> StatsAggregator {
        let factory: Arc<dyn crate::OperationFactory> = Arc::new(
            |_: &crate::WorkerIdentity| -> crate::OperationResult<Box<dyn crate::Operation>> {
                Err("unused".into())
            },
        );
        let pool = Arc::new(WorkerPool::new(
            factory,
            Arc::new(ShutdownSignal::new()),
            0.0,
            crate::PoolSettings::default(),
        ));
        StatsAggregator::new(pool, options)
    }

    fn snapshot(delta: u64, period: Duration) -> Snapshot {
        Snapshot {
            period,
            workers: vec![
                WorkerSample {
                    index: 0,
                    status: Status {
                        phase: crate::Phase::Running,
                        error: false,
                    },
                    iterations: 40,
                    delta: delta - 3,
                },
                WorkerSample {
                    index: 1,
                    status: Status {
                        phase: crate::Phase::Running,
                        error: false,
                    },
                    iterations: 7,
                    delta: 3,
                },
            ],
            delta,
            iterations: 47,
            running: 2,
            response: None,
            sequence: None,
            rolling_rate: None,
        }
    }

    #[test]
    fn renders_basic_line() {
        let agg = aggregator(StatsOptions::default());
        let line = agg.render(&snapshot(20, Duration::from_secs(2)));
        assert_eq!(
            line,
            "rate=10.00,total messages=20,iterations=47,Snapshot period=2,threads=2"
        );
    }

    #[test]
    fn renders_id_and_per_worker_columns() {
        let agg = aggregator(StatsOptions {
            interval: Duration::from_secs(1),
            per_worker: true,
            id: Some("run7".to_string()),
            ..StatsOptions::default()
        });
        let line = agg.render(&snapshot(10, Duration::from_secs(1)));
        assert_eq!(
            line,
            "id=run7,(7\t3) rate=10.00,total messages=10,iterations=47,Snapshot period=1,threads=2"
        );
    }

    #[test]
    fn renders_response_and_sequence_fields() {
        let agg = aggregator(StatsOptions::default());
        let mut snap = snapshot(10, Duration::from_secs(1));
        snap.response = Some((3_000, 10));
        snap.sequence = Some(SequenceTotals {
            missing: 1,
            ordering: 3,
            duplicates: 2,
            errors: 0,
            count: 9,
            trackers: 2,
        });
        let line = agg.render(&snap);
        assert!(line.ends_with(",avgResponse(micros)=300,miss=1,ord=1.50,dup=2,err=0,cnt=9"), "{line}");
    }

    #[test]
    fn rolling_mode_renders_window_average() {
        let agg = aggregator(StatsOptions {
            mode: StatsMode::Rolling,
            rolling_window: 5,
            per_worker: true,
            id: Some("r".to_string()),
            ..StatsOptions::default()
        });
        let mut snap = snapshot(10, Duration::from_secs(1));
        snap.rolling_rate = Some(12.345);
        assert_eq!(agg.render(&snap), "id=r,(7\t3) rateR=12.35,threads=2");
    }

    #[test]
    fn rolling_summary_reports_peak_even_without_samples() {
        let agg = aggregator(StatsOptions {
            mode: StatsMode::Rolling,
            rolling_window: 5,
            ..StatsOptions::default()
        });
        agg.sample_window();
        assert_eq!(agg.sample().rolling_rate, Some(0.0));
        assert_eq!(agg.final_summary().rolling_peak, Some(0.0));

        let basic = aggregator(StatsOptions::default());
        basic.sample_window();
        assert_eq!(basic.sample().rolling_rate, None);
        assert_eq!(basic.final_summary().rolling_peak, None);
    }

    #[test]
    fn begin_measurement_records_the_trim_point() {
        let agg = aggregator(StatsOptions {
            discard: Duration::from_secs(1),
            ..StatsOptions::default()
        });
        assert!(agg.measuring_since().is_none());
        let before = Instant::now();
        agg.begin_measurement();
        assert!(agg.measuring_since().is_some_and(|at| at >= before));
    }

    #[test]
    fn zero_period_reports_zero_rate() {
        let snap = snapshot(10, Duration::ZERO);
        assert_eq!(snap.rate(), 0.0);
    }

    #[test]
    fn period_snaps_to_interval() {
        let agg = aggregator(StatsOptions {
            interval: Duration::from_secs(10),
            ..StatsOptions::default()
        });
        assert_eq!(agg.snap_period(Duration::from_millis(10_040)), Duration::from_secs(10));
        assert_eq!(agg.snap_period(Duration::from_millis(9_960)), Duration::from_secs(10));
        assert_eq!(agg.snap_period(Duration::from_millis(10_200)), Duration::from_millis(10_200));
    }

    #[test]
    fn empty_pool_samples_cleanly() {
        let agg = aggregator(StatsOptions::default());
        let snap = agg.sample();
        assert_eq!(snap.delta, 0);
        assert_eq!(snap.iterations, 0);
        assert!(snap.workers.is_empty());
    }
}
