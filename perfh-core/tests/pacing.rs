mod support;

use std::sync::Arc;
use std::time::Duration;

use perfh_core::{CommandProcessor, Reply, StatsAggregator, StatsOptions};
use support::{counting, iterations, pool, wait_until};

#[test]
fn rate_caps_throughput_per_window() {
    let pool = pool(counting(), 10.0);
    pool.scale_up(1)
        .unwrap_or_else(|e| panic!("scale up failed: {e}"));

    std::thread::sleep(Duration::from_millis(2_500));
    let count = iterations(&pool)[0];
    pool.shutdown();

    // Windows open at 0s, 1s and 2s.
    assert!((25..=35).contains(&count), "count={count}");
}

#[test]
fn zero_rate_runs_unthrottled() {
    let pool = pool(counting(), 0.0);
    pool.scale_up(1)
        .unwrap_or_else(|e| panic!("scale up failed: {e}"));

    std::thread::sleep(Duration::from_millis(300));
    let count = iterations(&pool)[0];
    pool.shutdown();

    assert!(count > 1_000, "count={count}");
}

#[test]
fn alter_mid_run_lifts_the_cap_without_losing_counts() {
    let pool = pool(counting(), 5.0);
    let stats = Arc::new(StatsAggregator::new(pool.clone(), StatsOptions::default()));
    let processor = CommandProcessor::new(pool.clone(), stats, None);

    pool.scale_up(2)
        .unwrap_or_else(|e| panic!("scale up failed: {e}"));
    std::thread::sleep(Duration::from_millis(1_500));
    let before = iterations(&pool);
    for &count in &before {
        assert!(count <= 15, "paced worker ran too fast: {before:?}");
    }

    let reply = processor.execute("ALTER -rt 0");
    assert_eq!(reply, Some(Reply::Success("ALTER -rt 0".to_string())));
    assert_eq!(pool.rate(), 0.0);

    // Any sleep already in progress ends within one window.
    let lifted = wait_until(Duration::from_secs(3), || {
        iterations(&pool)
            .iter()
            .zip(&before)
            .all(|(now, then)| *now > then + 1_000)
    });
    pool.shutdown();
    assert!(lifted, "throughput did not increase after ALTER");
}

#[test]
fn alter_applies_to_workers_started_later() {
    let pool = pool(counting(), 0.0);
    let stats = Arc::new(StatsAggregator::new(pool.clone(), StatsOptions::default()));
    let processor = CommandProcessor::new(pool.clone(), stats, None);

    assert!(matches!(processor.execute("alter -rt 7.5"), Some(Reply::Success(_))));
    pool.scale_up(1)
        .unwrap_or_else(|e| panic!("scale up failed: {e}"));
    pool.with_workers(|ws| assert_eq!(ws[0].state().rate(), 7.5));
    pool.shutdown();
}
