use std::fmt::Write as _;
use std::io::Write as _;
use std::time::Duration;

use perfh_core::{ResponseSummary, RunSummary, SequenceTotals, WorkerSummary};

use super::OutputFormatter;

pub(crate) struct HumanReadableOutput;

impl OutputFormatter for HumanReadableOutput {
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let text = render_summary(summary);
        let mut out = std::io::stdout().lock();
        out.write_all(text.as_bytes())?;
        out.flush()?;
        Ok(())
    }
}

pub(crate) fn render_summary(summary: &RunSummary) -> String {
    let mut out = String::new();
    let _ = writeln!(out, "{}", summary.line());

    for w in &summary.workers {
        let _ = writeln!(out, "  {}", worker_row(w));
    }

    if let Some(rt) = &summary.response {
        let _ = writeln!(out, "  response(micros): {}", response_columns(rt));
    }
    if let Some(seq) = &summary.sequence {
        let _ = writeln!(out, "  sequence: {}", sequence_columns(seq));
    }
    if let Some(reason) = &summary.shutdown_reason {
        let _ = writeln!(out, "  stopped: {reason}");
    }
    if let Some(err) = &summary.startup_error {
        let _ = writeln!(out, "  startup failed: {err}");
    }
    if !summary.stragglers.is_empty() {
        let _ = writeln!(out, "  still running at exit: {}", summary.stragglers.join(", "));
    }
    out
}

fn worker_row(w: &WorkerSummary) -> String {
    let mut row = format!(
        "{} status={} iterations={} duration={:.2}s rate={:.2}",
        w.name,
        w.status,
        w.iterations,
        w.duration.as_secs_f64(),
        w.rate,
    );
    if let Some(conn) = w.connect_time {
        let _ = write!(row, " connect={}", format_ms(conn));
    }
    if let Some(rt) = &w.response {
        let _ = write!(row, " response(micros)=[{}]", response_columns(rt));
    }
    if let Some(seq) = &w.sequence {
        let _ = write!(row, " sequence=[{}]", sequence_columns(seq));
    }
    row
}

fn response_columns(rt: &ResponseSummary) -> String {
    format!(
        "count={} mean={:.2} stdev={:.2} min={} max={} p50={} p99={}",
        rt.count, rt.mean_us, rt.stdev_us, rt.min_us, rt.max_us, rt.p50_us, rt.p99_us
    )
}

fn sequence_columns(seq: &SequenceTotals) -> String {
    format!(
        "miss={} ord={:.2} dup={} err={} cnt={}",
        seq.missing,
        seq.ordering_per_worker(),
        seq.duplicates,
        seq.errors,
        seq.count
    )
}

fn format_ms(d: Duration) -> String {
    format!("{:.1}ms", d.as_secs_f64() * 1_000.0)
}
