use std::collections::VecDeque;

/// Ring of per-second iteration counts. Until it fills, the average covers
/// however many samples it holds.
#[derive(Debug)]
pub(crate) struct RollingWindow {
    samples: VecDeque<u64>,
    capacity: usize,
    sum: u64,
    peak: Option<f64>,
}

impl RollingWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            samples: VecDeque::new(),
            capacity: capacity.max(1),
            sum: 0,
            peak: None,
        }
    }

    pub(crate) fn push(&mut self, count: u64) {
        if self.samples.len() == self.capacity {
            let oldest = self.samples.pop_front().unwrap_or(0);
            self.sum = self.sum.saturating_sub(oldest);
        }
        self.samples.push_back(count);
        self.sum = self.sum.saturating_add(count);

        let average = self.average();
        if self.peak.is_none_or(|peak| average > peak) {
            self.peak = Some(average);
        }
    }

    pub(crate) fn average(&self) -> f64 {
        if self.samples.is_empty() {
            0.0
        } else {
            self.sum as f64 / self.samples.len() as f64
        }
    }

    /// Highest average seen since creation or the last [`reset_peak`](Self::reset_peak).
    pub(crate) fn peak(&self) -> Option<f64> {
        self.peak
    }

    pub(crate) fn reset_peak(&mut self) {
        self.peak = None;
    }
}
