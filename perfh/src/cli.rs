use clap::{Args, Parser, Subcommand};
use std::net::IpAddr;
use std::path::PathBuf;
use std::time::Duration;

use perfh_core::{StatsMode, SummaryTiming, TransportKind};

use crate::logging::{LogConfig, LogFormat};

fn parse_duration(input: &str) -> Result<Duration, String> {
    perfh_core::parse_duration(input)
}

fn parse_transport(input: &str) -> Result<TransportKind, String> {
    TransportKind::from_name(input).map_err(|err| err.to_string())
}

fn parse_stats_mode(input: &str) -> Result<StatsMode, String> {
    input
        .trim()
        .parse()
        .map_err(|_| format!("unknown stats mode `{input}` (expected `basic` or `rolling`)"))
}

fn parse_summary_timing(input: &str) -> Result<SummaryTiming, String> {
    input
        .trim()
        .parse()
        .map_err(|_| format!("unknown summary timing `{input}` (expected `normal` or `tlf`)"))
}

#[derive(Debug, Clone, Copy, clap::ValueEnum)]
pub enum OutputFormat {
    /// Human-readable summary.
    HumanReadable,
    /// One JSON summary object on stdout.
    Json,
}

#[derive(Debug, Parser)]
#[command(
    name = "perfh",
    author,
    version,
    about = "Multi-protocol load generation harness",
    long_about = "perfh drives a pool of worker threads, each repeatedly running one operation (a request, a message send) at a paced rate.\n\nThe pool can be resized and re-paced at runtime through a line-based command channel (START / END / ALTER / REPORT) served over TCP or a named pipe, and it prints periodic throughput lines until the run ends.",
    after_help = "Examples:\n  perfh run noop --workers 4 --rate 100 --run-length 10s\n  perfh run tcp-requestor --set port=7000 --set size=128 --workers 8\n  perfh run sleep --command socket --command-port 8001\n  perfh run --config load.yaml --output json"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,

    #[command(flatten)]
    pub log: LogArgs,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Run an operation with a pool of workers
    #[command(
        long_about = "Start the configured workers, serve runtime commands and print statistics until the run length elapses, every worker finishes, or the process is interrupted.\n\nCLI flags override values from the --config file."
    )]
    Run(Box<RunArgs>),

    /// List the built-in operations
    List,
}

#[derive(Debug, Args)]
pub struct LogArgs {
    /// Log filter (e.g. info, debug, perfh_core=trace); overrides PERFH_LOG and RUST_LOG
    #[arg(long, global = true, value_name = "FILTER")]
    pub log_level: Option<String>,

    /// Log format: pretty, compact or json; overrides PERFH_LOG_FORMAT
    #[arg(long, global = true, value_name = "FORMAT")]
    pub log_format: Option<LogFormat>,
}

impl LogArgs {
    pub fn config(&self) -> LogConfig {
        let mut config = LogConfig::default();
        if let Some(filter) = &self.log_level {
            config = config.with_filter(filter.clone());
        }
        config = config.with_env_overrides();
        if let Some(format) = self.log_format {
            config = config.with_format(format);
        }
        config
    }
}

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Operation to run (see `perfh list`); required unless the config file names one
    pub operation: Option<String>,

    /// YAML config file; CLI flags override its values
    #[arg(long, short = 'c', value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Workers started at launch
    #[arg(long, short = 'n')]
    pub workers: Option<u64>,

    /// Per-worker operations per second (0 = unthrottled)
    #[arg(long, short = 'r', allow_negative_numbers = true)]
    pub rate: Option<f64>,

    /// Per-worker iteration limit (0 = unlimited)
    #[arg(long)]
    pub max_iterations: Option<u64>,

    /// Grow each worker's rate linearly over this period (e.g. 30s)
    #[arg(long, value_parser = parse_duration)]
    pub ramp: Option<Duration>,

    /// Stop the whole run after this long (e.g. 10s, 5m)
    #[arg(long, value_parser = parse_duration)]
    pub run_length: Option<Duration>,

    /// Pause before a finished worker thread exits
    #[arg(long, value_parser = parse_duration)]
    pub settle_delay: Option<Duration>,

    /// Periodic stats cadence (0 = only on REPORT)
    #[arg(long, value_parser = parse_duration)]
    pub stats_interval: Option<Duration>,

    /// Stats lines: basic (per-interval rate) or rolling (windowed average)
    #[arg(long, value_name = "MODE", value_parser = parse_stats_mode)]
    pub stats_mode: Option<StatsMode>,

    /// One-second samples averaged in rolling stats mode
    #[arg(long, value_name = "SAMPLES")]
    pub rolling_window: Option<u32>,

    /// Warm-up left out of the final summary, timed from the initial start
    #[arg(long, value_parser = parse_duration)]
    pub discard: Option<Duration>,

    /// Summary durations: normal, or tlf (time to last fire, from harness start)
    #[arg(long, value_name = "TIMING", value_parser = parse_summary_timing)]
    pub summary_timing: Option<SummaryTiming>,

    /// Include per-worker deltas in stats lines
    #[arg(long)]
    pub per_worker_stats: bool,

    /// Record per-operation response times
    #[arg(long)]
    pub response_times: bool,

    /// Skip the end-of-run summary
    #[arg(long)]
    pub no_summary: bool,

    /// Delay between successive worker starts
    #[arg(long, value_parser = parse_duration)]
    pub start_interval: Option<Duration>,

    /// How long to wait for each new worker to reach RUNNING
    #[arg(long, value_parser = parse_duration)]
    pub start_timeout: Option<Duration>,

    /// Upper bound on waiting for workers to end at shutdown
    #[arg(long, value_parser = parse_duration)]
    pub shutdown_wait: Option<Duration>,

    /// Prefix for stats lines and command replies
    #[arg(long)]
    pub id: Option<String>,

    /// Command channel: none, socket or pipe
    #[arg(long = "command", value_name = "KIND", value_parser = parse_transport)]
    pub command: Option<TransportKind>,

    /// TCP port for the socket command channel
    #[arg(long)]
    pub command_port: Option<u16>,

    /// Bind address for the socket command channel
    #[arg(long)]
    pub command_bind: Option<IpAddr>,

    /// FIFO path for the pipe command channel (created if missing)
    #[arg(long, value_name = "PATH")]
    pub command_pipe: Option<PathBuf>,

    /// Operation setting (repeatable, KEY=VALUE)
    #[arg(long = "set", short = 's', value_name = "KEY=VALUE")]
    pub set: Vec<String>,

    /// Output format for the final summary
    #[arg(long, value_enum, default_value_t = OutputFormat::HumanReadable)]
    pub output: OutputFormat,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(args: &[&str]) -> Cli {
        match Cli::try_parse_from(args) {
            Ok(v) => v,
            Err(err) => panic!("failed to parse args: {err}"),
        }
    }

    #[test]
    fn cli_parses_run_flags() {
        let cli = parse(&[
            "perfh",
            "run",
            "tcp-requestor",
            "--workers",
            "4",
            "--rate",
            "12.5",
            "--run-length",
            "250ms",
            "--stats-interval",
            "0",
            "--command",
            "socket",
            "--command-port",
            "9001",
            "--set",
            "port=7000",
            "-s",
            "size=16",
            "--output",
            "json",
        ]);

        match cli.command {
            Command::Run(args) => {
                assert_eq!(args.operation.as_deref(), Some("tcp-requestor"));
                assert_eq!(args.workers, Some(4));
                assert_eq!(args.rate, Some(12.5));
                assert_eq!(args.run_length, Some(Duration::from_millis(250)));
                assert_eq!(args.stats_interval, Some(Duration::ZERO));
                assert_eq!(args.command, Some(TransportKind::Socket));
                assert_eq!(args.command_port, Some(9001));
                assert_eq!(args.set, vec!["port=7000".to_string(), "size=16".to_string()]);
                assert!(matches!(args.output, OutputFormat::Json));
                assert!(!args.no_summary);
            }
            Command::List => panic!("expected run command"),
        }
    }

    #[test]
    fn negative_rate_parses_for_later_clamping() {
        let cli = parse(&["perfh", "run", "noop", "--rate", "-5"]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.rate, Some(-5.0));
    }

    #[test]
    fn log_flags_are_global() {
        let cli = parse(&["perfh", "list", "--log-level", "debug", "--log-format", "json"]);
        assert!(matches!(cli.command, Command::List));
        assert_eq!(cli.log.log_level.as_deref(), Some("debug"));
        assert_eq!(cli.log.log_format, Some(LogFormat::Json));
    }

    #[test]
    fn parses_stats_window_flags() {
        let cli = parse(&[
            "perfh",
            "run",
            "noop",
            "--stats-mode",
            "rolling",
            "--rolling-window",
            "5",
            "--discard",
            "30s",
            "--summary-timing",
            "TLF",
        ]);
        let Command::Run(args) = cli.command else {
            panic!("expected run command");
        };
        assert_eq!(args.stats_mode, Some(StatsMode::Rolling));
        assert_eq!(args.rolling_window, Some(5));
        assert_eq!(args.discard, Some(Duration::from_secs(30)));
        assert_eq!(args.summary_timing, Some(SummaryTiming::TimeToLastFire));
    }

    #[test]
    fn rejects_bad_durations_and_transports() {
        assert!(Cli::try_parse_from(["perfh", "run", "noop", "--run-length", "10x"]).is_err());
        assert!(Cli::try_parse_from(["perfh", "run", "noop", "--command", "carrier"]).is_err());
        assert!(Cli::try_parse_from(["perfh", "run", "noop", "--stats-mode", "median"]).is_err());
        assert!(Cli::try_parse_from(["perfh", "run", "noop", "--summary-timing", "late"]).is_err());
    }
}
