use std::time::Duration;

use hdrhistogram::Histogram;

fn new_hist() -> Histogram<u64> {
    // Track up to 60s in microseconds (with 3 sigfigs).
    Histogram::<u64>::new_with_bounds(1, 60_000_000, 3)
        .unwrap_or_else(|err| panic!("failed to init histogram: {err}"))
}

/// Per-worker response-time recorder.
///
/// The histogram covers the worker's whole life; the window sums are drained by
/// each stats sample to produce the interval average.
#[derive(Debug)]
pub struct ResponseTimes {
    histogram: Histogram<u64>,
    window_total_us: u64,
    window_count: u64,
}

impl Default for ResponseTimes {
    fn default() -> Self {
        Self {
            histogram: new_hist(),
            window_total_us: 0,
            window_count: 0,
        }
    }
}

impl ResponseTimes {
    pub fn record(&mut self, elapsed: Duration) {
        let us = u64::try_from(elapsed.as_micros()).unwrap_or(u64::MAX).max(1);
        self.histogram.saturating_record(us);
        self.window_total_us = self.window_total_us.saturating_add(us);
        self.window_count += 1;
    }

    /// Returns `(total_us, count)` recorded since the previous call.
    pub fn take_window(&mut self) -> (u64, u64) {
        let out = (self.window_total_us, self.window_count);
        self.window_total_us = 0;
        self.window_count = 0;
        out
    }

    /// Folds `other`'s lifetime histogram into this one. Window sums are untouched.
    pub fn merge(&mut self, other: &ResponseTimes) {
        if let Err(err) = self.histogram.add(&other.histogram) {
            tracing::debug!(error = %err, "response histogram merge dropped samples");
        }
    }

    pub fn summary(&self) -> ResponseSummary {
        let h = &self.histogram;
        if h.is_empty() {
            return ResponseSummary::default();
        }
        ResponseSummary {
            count: h.len(),
            mean_us: h.mean(),
            stdev_us: h.stdev(),
            min_us: h.min(),
            max_us: h.max(),
            p50_us: h.value_at_quantile(0.50),
            p99_us: h.value_at_quantile(0.99),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ResponseSummary {
    pub count: u64,
    pub mean_us: f64,
    pub stdev_us: f64,
    pub min_us: u64,
    pub max_us: u64,
    pub p50_us: u64,
    pub p99_us: u64,
}
