/// Tracks sequence numbers observed by one worker: gaps, reordering,
/// duplicates and errors.
#[derive(Debug, Clone, Default)]
pub struct SequenceTracker {
    count: u64,
    duplicates: u64,
    ordering: u64,
    errors: u64,
    min: i64,
    max: i64,
    last: Option<i64>,
}

impl SequenceTracker {
    pub fn record(&mut self, n: i64) {
        let last = match self.last {
            Some(last) => last,
            None => {
                self.min = n;
                self.max = n;
                n.saturating_sub(1)
            }
        };

        if n == last {
            self.duplicates += 1;
        } else {
            let distance = n.saturating_sub(last);
            self.ordering = self
                .ordering
                .saturating_add(distance.saturating_sub(1).unsigned_abs());
        }

        self.count += 1;
        self.min = self.min.min(n);
        self.max = self.max.max(n);
        self.last = Some(n);
    }

    pub fn record_error(&mut self) {
        self.errors += 1;
    }

    /// Numbers in `[min, max]` never seen.
    pub fn missing(&self) -> u64 {
        if self.count <= 1 {
            return 0;
        }
        let span = self.max.abs_diff(self.min).saturating_add(1);
        span.saturating_sub(self.count)
    }

    pub fn totals(&self) -> SequenceTotals {
        SequenceTotals {
            missing: self.missing(),
            ordering: self.ordering,
            duplicates: self.duplicates,
            errors: self.errors,
            count: self.count,
            trackers: 1,
        }
    }
}

/// Sum of several trackers' counters.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct SequenceTotals {
    pub missing: u64,
    pub ordering: u64,
    pub duplicates: u64,
    pub errors: u64,
    pub count: u64,
    pub trackers: u64,
}

impl SequenceTotals {
    pub fn merge(&mut self, other: SequenceTotals) {
        self.missing += other.missing;
        self.ordering += other.ordering;
        self.duplicates += other.duplicates;
        self.errors += other.errors;
        self.count += other.count;
        self.trackers += other.trackers;
    }

    /// Average out-of-order distance per tracking worker.
    pub fn ordering_per_worker(&self) -> f64 {
        if self.trackers == 0 {
            0.0
        } else {
            self.ordering as f64 / self.trackers as f64
        }
    }
}
