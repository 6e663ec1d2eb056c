use anyhow::Context as _;
use perfh_core::{Harness, HarnessConfig, stdout_sink};

use crate::cli::RunArgs;
use crate::config_file::ConfigFile;
use crate::exit_codes::ExitCode;
use crate::output;
use crate::run_error::RunError;

pub async fn run(args: RunArgs) -> Result<ExitCode, RunError> {
    let cfg = harness_config(&args)
        .await
        .map_err(RunError::InvalidInput)?;
    let factory = perfh_ops::create_factory(&cfg.operation.name, &cfg.operation.settings)
        .context("invalid operation")
        .map_err(RunError::InvalidInput)?;
    let out = output::formatter(args.output);

    let transport = perfh_core::open_transport(&cfg.command, stdout_sink())
        .await
        .context("failed to open command transport")
        .map_err(RunError::RuntimeError)?;

    let harness = Harness::new(cfg, factory);
    let signal = harness.shutdown_signal().clone();
    let interrupt = tokio::spawn(async move {
        tokio::select! {
            res = tokio::signal::ctrl_c() => match res {
                Ok(()) => {
                    signal.trigger("interrupted");
                }
                Err(err) => tracing::warn!(error = %err, "failed to listen for ctrl-c"),
            },
            _ = signal.wait() => {}
        }
    });

    let result = harness.run(transport).await;
    interrupt.abort();
    let summary = result
        .context("run failed")
        .map_err(RunError::RuntimeError)?;

    if !summary.stragglers.is_empty() {
        tracing::warn!(
            stragglers = summary.stragglers.join(","),
            "some workers did not stop in time"
        );
    }
    if harness.config().summary {
        out.print_summary(&summary)
            .map_err(RunError::RuntimeError)?;
    }

    Ok(ExitCode::from_summary(&summary))
}

/// Defaults, then the config file, then CLI flags; validated last.
async fn harness_config(args: &RunArgs) -> anyhow::Result<HarnessConfig> {
    let mut cfg = HarnessConfig::default();
    if let Some(path) = &args.config {
        ConfigFile::load(path).await?.apply(&mut cfg)?;
    }
    apply_overrides(args, &mut cfg)?;
    cfg.validate()?;
    Ok(cfg)
}

fn apply_overrides(args: &RunArgs, cfg: &mut HarnessConfig) -> anyhow::Result<()> {
    if let Some(name) = &args.operation {
        cfg.operation.name.clone_from(name);
    }
    if let Some(v) = args.workers {
        cfg.workers = v;
    }
    if let Some(v) = args.rate {
        cfg.rate = v;
    }
    if let Some(v) = args.max_iterations {
        cfg.max_iterations = v;
    }
    if let Some(v) = args.stats_mode {
        cfg.stats_mode = v;
    }
    if let Some(v) = args.rolling_window {
        cfg.rolling_window = v;
    }
    if let Some(v) = args.summary_timing {
        cfg.summary_timing = v;
    }
    for (target, value) in [
        (&mut cfg.ramp, args.ramp),
        (&mut cfg.run_length, args.run_length),
        (&mut cfg.settle_delay, args.settle_delay),
        (&mut cfg.stats_interval, args.stats_interval),
        (&mut cfg.discard, args.discard),
        (&mut cfg.start_interval, args.start_interval),
        (&mut cfg.start_timeout, args.start_timeout),
        (&mut cfg.shutdown_wait, args.shutdown_wait),
    ] {
        if let Some(v) = value {
            *target = v;
        }
    }
    if args.per_worker_stats {
        cfg.per_worker_stats = true;
    }
    if args.response_times {
        cfg.response_times = true;
    }
    if args.no_summary {
        cfg.summary = false;
    }
    if args.id.is_some() {
        cfg.id.clone_from(&args.id);
    }

    if let Some(kind) = args.command {
        cfg.command.kind = kind;
    }
    if let Some(port) = args.command_port {
        cfg.command.port = port;
    }
    if let Some(bind) = args.command_bind {
        cfg.command.bind = bind;
    }
    if args.command_pipe.is_some() {
        cfg.command.pipe_path.clone_from(&args.command_pipe);
    }

    for raw in &args.set {
        let (k, v) = parse_setting(raw)?;
        cfg.operation.settings.insert(k, v);
    }
    Ok(())
}

fn parse_setting(s: &str) -> anyhow::Result<(String, String)> {
    let (k, v) = s
        .split_once('=')
        .with_context(|| format!("invalid --set (expected KEY=VALUE): {s}"))?;
    let k = k.trim();
    if k.is_empty() {
        anyhow::bail!("invalid --set (empty KEY): {s}");
    }
    Ok((k.to_string(), v.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser as _;

    use crate::cli::{Cli, Command};

    fn run_args(args: &[&str]) -> RunArgs {
        let cli = Cli::try_parse_from(args).unwrap_or_else(|e| panic!("bad args: {e}"));
        match cli.command {
            Command::Run(args) => *args,
            Command::List => panic!("expected run command"),
        }
    }

    #[test]
    fn parse_setting_splits_on_first_equals() {
        assert_eq!(
            parse_setting("payload=a=b").ok(),
            Some(("payload".to_string(), "a=b".to_string()))
        );
        assert_eq!(
            parse_setting("empty=").ok(),
            Some(("empty".to_string(), String::new()))
        );
        assert!(parse_setting("novalue").is_err());
        assert!(parse_setting("=x").is_err());
    }

    #[tokio::test]
    async fn cli_flags_override_config_file() -> anyhow::Result<()> {
        let dir = tempfile::tempdir()?;
        let path = dir.path().join("load.yaml");
        std::fs::write(
            &path,
            "workers: 3\nrate: 5\noperation:\n  name: sleep\n  settings:\n    duration: 1ms\n",
        )?;
        let path = path.to_string_lossy().into_owned();

        let args = run_args(&[
            "perfh", "run", "--config", path.as_str(), "--workers", "6", "--set", "duration=2ms",
        ]);
        let cfg = harness_config(&args).await?;

        assert_eq!(cfg.workers, 6);
        assert!((cfg.rate - 5.0).abs() < f64::EPSILON);
        assert_eq!(cfg.operation.name, "sleep");
        assert_eq!(cfg.operation.settings.get("duration"), Some("2ms"));
        Ok(())
    }

    #[tokio::test]
    async fn validation_runs_after_overrides() {
        let args = run_args(&["perfh", "run", "noop", "--workers", "0"]);
        assert!(harness_config(&args).await.is_err());

        let args = run_args(&["perfh", "run"]);
        assert!(harness_config(&args).await.is_err(), "operation is required");

        let args = run_args(&["perfh", "run", "noop", "--rate", "-3", "--no-summary"]);
        let cfg = harness_config(&args)
            .await
            .unwrap_or_else(|e| panic!("config rejected: {e:#}"));
        assert!(cfg.rate.abs() < f64::EPSILON);
        assert!(!cfg.summary);

        let args = run_args(&["perfh", "run", "noop", "--stats-mode", "rolling", "--rolling-window", "0"]);
        assert!(harness_config(&args).await.is_err(), "rolling mode needs a window");
    }
}
