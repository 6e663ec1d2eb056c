use serde::Serialize;
use std::io::Write as _;

use perfh_core::{ResponseSummary, RunSummary, SequenceTotals, WorkerSummary};

use super::OutputFormatter;

pub(crate) struct JsonOutput;

impl OutputFormatter for JsonOutput {
    fn print_summary(&self, summary: &RunSummary) -> anyhow::Result<()> {
        let line = build_summary_line(summary);
        let mut out = std::io::stdout().lock();
        serde_json::to_writer(&mut out, &line)?;
        writeln!(out)?;
        Ok(())
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSummaryLine<'a> {
    pub kind: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<&'a str>,
    pub total_iterations: u64,
    pub avg_duration_secs: f64,
    pub total_rate: f64,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub max_rolling_rate: Option<f64>,
    pub errors: usize,
    pub succeeded: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_micros: Option<JsonResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<JsonSequence>,
    pub shutdown_reason: Option<&'a str>,
    pub startup_error: Option<&'a str>,
    pub stragglers: &'a [String],
    pub workers: Vec<JsonWorker<'a>>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonWorker<'a> {
    pub index: u64,
    pub name: &'a str,
    pub status: String,
    pub error: bool,
    pub iterations: u64,
    pub duration_secs: f64,
    pub rate: f64,
    pub connect_ms: Option<f64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_micros: Option<JsonResponse>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sequence: Option<JsonSequence>,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonResponse {
    pub count: u64,
    pub mean: f64,
    pub stdev: f64,
    pub min: u64,
    pub max: u64,
    pub p50: u64,
    pub p99: u64,
}

#[derive(Debug, Serialize)]
pub(crate) struct JsonSequence {
    pub missing: u64,
    pub ordering: f64,
    pub duplicates: u64,
    pub errors: u64,
    pub count: u64,
}

impl From<&ResponseSummary> for JsonResponse {
    fn from(rt: &ResponseSummary) -> Self {
        Self {
            count: rt.count,
            mean: rt.mean_us,
            stdev: rt.stdev_us,
            min: rt.min_us,
            max: rt.max_us,
            p50: rt.p50_us,
            p99: rt.p99_us,
        }
    }
}

impl From<&SequenceTotals> for JsonSequence {
    fn from(seq: &SequenceTotals) -> Self {
        Self {
            missing: seq.missing,
            ordering: seq.ordering_per_worker(),
            duplicates: seq.duplicates,
            errors: seq.errors,
            count: seq.count,
        }
    }
}

fn build_worker(w: &WorkerSummary) -> JsonWorker<'_> {
    JsonWorker {
        index: w.index,
        name: &w.name,
        status: w.status.phase.to_string(),
        error: w.status.error,
        iterations: w.iterations,
        duration_secs: w.duration.as_secs_f64(),
        rate: w.rate,
        connect_ms: w.connect_time.map(|d| d.as_secs_f64() * 1_000.0),
        response_micros: w.response.as_ref().map(JsonResponse::from),
        sequence: w.sequence.as_ref().map(JsonSequence::from),
    }
}

pub(crate) fn build_summary_line(summary: &RunSummary) -> JsonSummaryLine<'_> {
    JsonSummaryLine {
        kind: "summary",
        id: summary.id.as_deref(),
        total_iterations: summary.total_iterations,
        avg_duration_secs: summary.avg_duration.as_secs_f64(),
        total_rate: summary.total_rate,
        max_rolling_rate: summary.rolling_peak,
        errors: summary.errors(),
        succeeded: summary.succeeded(),
        response_micros: summary.response.as_ref().map(JsonResponse::from),
        sequence: summary.sequence.as_ref().map(JsonSequence::from),
        shutdown_reason: summary.shutdown_reason.as_deref(),
        startup_error: summary.startup_error.as_deref(),
        stragglers: &summary.stragglers,
        workers: summary.workers.iter().map(build_worker).collect(),
    }
}
