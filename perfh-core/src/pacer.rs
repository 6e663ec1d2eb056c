use std::time::{Duration, Instant};

/// Length of one pacing window.
pub const WINDOW: Duration = Duration::from_secs(1);

/// Caps a worker at `rate` operations per one-second window.
///
/// The pacer is a plain value owned by the worker thread. It never sleeps itself:
/// [`Pacer::acquire`] tells the caller how long to wait, which lets the caller use
/// an interruptible sleep.
#[derive(Debug, Clone)]
pub struct Pacer {
    window_start: Option<Instant>,
    admitted: u64,
    ramp: Duration,
    origin: Option<Instant>,
}

impl Pacer {
    pub fn new(ramp: Duration) -> Self {
        Self {
            window_start: None,
            admitted: 0,
            ramp,
            origin: None,
        }
    }

    /// Marks the moment the ramp starts counting from.
    pub fn start_at(&mut self, now: Instant) {
        self.origin = Some(now);
    }

    /// Admits the next operation.
    ///
    /// Returns `None` when it may run immediately, or `Some(wait)` when the current
    /// window is full. In the latter case the operation is charged to the next
    /// window, which opens once `wait` has elapsed.
    pub fn acquire(&mut self, rate: f64, now: Instant) -> Option<Duration> {
        if rate.is_nan() || rate <= 0.0 {
            self.window_start = None;
            self.admitted = 0;
            return None;
        }

        let limit = self.effective_rate(rate, now);
        let start = *self.window_start.get_or_insert(now);
        let elapsed = now.saturating_duration_since(start);

        if elapsed >= WINDOW {
            self.window_start = Some(now);
            self.admitted = 1;
            return None;
        }

        if (self.admitted as f64) < limit {
            self.admitted += 1;
            return None;
        }

        self.window_start = Some(start + WINDOW);
        self.admitted = 1;
        Some(WINDOW - elapsed)
    }

    /// Rate in force at `now` after applying the linear ramp.
    pub fn effective_rate(&self, rate: f64, now: Instant) -> f64 {
        let Some(origin) = self.origin else {
            return rate;
        };
        if self.ramp.is_zero() || rate <= 0.0 {
            return rate;
        }

        let progress =
            now.saturating_duration_since(origin).as_secs_f64() / self.ramp.as_secs_f64();
        if progress >= 1.0 {
            rate
        } else {
            (rate * progress).max(1.0).min(rate)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn admitted_within(pacer: &mut Pacer, rate: f64, start: Instant, horizon: Duration) -> u64 {
        // Simulated clock: each admitted op takes no time; waits advance the clock.
        let mut now = start;
        let mut count = 0;
        loop {
            if let Some(wait) = pacer.acquire(rate, now) {
                now += wait;
            }
            if now.duration_since(start) >= horizon {
                return count;
            }
            count += 1;
        }
    }

    #[test]
    fn zero_rate_never_waits() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let now = Instant::now();
        for _ in 0..10_000 {
            assert_eq!(pacer.acquire(0.0, now), None);
        }
    }

    #[test]
    fn caps_each_window_at_rate() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        let count = admitted_within(&mut pacer, 10.0, start, Duration::from_millis(2500));
        assert_eq!(count, 30);
    }

    #[test]
    fn waits_for_remainder_of_window() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        for _ in 0..5 {
            assert_eq!(pacer.acquire(5.0, start), None);
        }
        let wait = pacer.acquire(5.0, start + Duration::from_millis(300));
        assert_eq!(wait, Some(Duration::from_millis(700)));
    }

    #[test]
    fn dropping_rate_to_zero_releases_immediately() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        assert_eq!(pacer.acquire(1.0, start), None);
        assert!(pacer.acquire(1.0, start).is_some());
        assert_eq!(pacer.acquire(0.0, start), None);
        assert_eq!(pacer.acquire(0.0, start), None);
    }

    #[test]
    fn fractional_rate_admits_one_per_window() {
        let mut pacer = Pacer::new(Duration::ZERO);
        let start = Instant::now();
        let count = admitted_within(&mut pacer, 0.5, start, Duration::from_millis(3500));
        assert_eq!(count, 4);
    }

    #[test]
    fn ramp_grows_linearly_with_floor_of_one() {
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let origin = Instant::now();
        pacer.start_at(origin);

        assert_eq!(pacer.effective_rate(100.0, origin), 1.0);
        let mid = pacer.effective_rate(100.0, origin + Duration::from_secs(5));
        assert!((mid - 50.0).abs() < 1e-9, "mid={mid}");
        assert_eq!(pacer.effective_rate(100.0, origin + Duration::from_secs(30)), 100.0);
    }

    #[test]
    fn ramp_never_exceeds_target() {
        let mut pacer = Pacer::new(Duration::from_secs(10));
        let origin = Instant::now();
        pacer.start_at(origin);
        assert_eq!(pacer.effective_rate(0.5, origin), 0.5);
    }
}
