use std::collections::BTreeMap;
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::Context as _;
use perfh_core::{HarnessConfig, StatsMode, SummaryTiming, TransportKind};
use serde::Deserialize;

/// A `--config` YAML document. Every key is optional; CLI flags applied later win.
///
/// ```yaml
/// workers: 8
/// rate: 50
/// runLength: 30s
/// command:
///   kind: socket
///   port: 8001
/// operation:
///   name: tcp-requestor
///   settings:
///     port: 7000
///     size: 128
/// ```
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct ConfigFile {
    pub workers: Option<u64>,
    pub rate: Option<f64>,
    pub max_iterations: Option<u64>,
    pub ramp: Option<YamlDuration>,
    pub run_length: Option<YamlDuration>,
    pub settle_delay: Option<YamlDuration>,
    pub stats_interval: Option<YamlDuration>,
    pub stats_mode: Option<String>,
    pub rolling_window: Option<u32>,
    pub discard: Option<YamlDuration>,
    pub summary_timing: Option<String>,
    pub per_worker_stats: Option<bool>,
    pub response_times: Option<bool>,
    pub summary: Option<bool>,
    pub start_interval: Option<YamlDuration>,
    pub start_timeout: Option<YamlDuration>,
    pub shutdown_wait: Option<YamlDuration>,
    pub id: Option<String>,
    pub command: Option<CommandYaml>,
    pub operation: Option<OperationYaml>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct CommandYaml {
    pub kind: Option<String>,
    pub port: Option<u16>,
    pub bind: Option<IpAddr>,
    pub pipe: Option<PathBuf>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub(crate) struct OperationYaml {
    pub name: Option<String>,

    /// Scalars only; numbers and booleans are passed on as their text.
    #[serde(default)]
    pub settings: BTreeMap<String, serde_yaml::Value>,
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct YamlDuration(Duration);

impl YamlDuration {
    fn into_inner(self) -> Duration {
        self.0
    }
}

impl<'de> Deserialize<'de> for YamlDuration {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: serde::Deserializer<'de>,
    {
        struct V;

        impl serde::de::Visitor<'_> for V {
            type Value = YamlDuration;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("duration as string (e.g. 10s), integer seconds, or float seconds")
            }

            fn visit_u64<E>(self, v: u64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                Ok(YamlDuration(Duration::from_secs(v)))
            }

            fn visit_i64<E>(self, v: i64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                u64::try_from(v)
                    .map(|secs| YamlDuration(Duration::from_secs(secs)))
                    .map_err(|_| E::custom("duration cannot be negative"))
            }

            fn visit_f64<E>(self, v: f64) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                if !v.is_finite() || v < 0.0 {
                    return Err(E::custom("duration must be a non-negative, finite number"));
                }
                Ok(YamlDuration(Duration::from_secs_f64(v)))
            }

            fn visit_str<E>(self, v: &str) -> Result<Self::Value, E>
            where
                E: serde::de::Error,
            {
                perfh_core::parse_duration(v)
                    .map(YamlDuration)
                    .map_err(E::custom)
            }
        }

        deserializer.deserialize_any(V)
    }
}

impl ConfigFile {
    pub(crate) async fn load(path: &Path) -> anyhow::Result<Self> {
        let raw = tokio::fs::read_to_string(path)
            .await
            .with_context(|| format!("failed to read config file: {}", path.display()))?;
        Self::parse(&raw).with_context(|| format!("invalid config file: {}", path.display()))
    }

    pub(crate) fn parse(raw: &str) -> anyhow::Result<Self> {
        if raw.trim().is_empty() {
            return Ok(Self::default());
        }
        Ok(serde_yaml::from_str(raw)?)
    }

    /// Copies every key present in the file onto `cfg`.
    pub(crate) fn apply(self, cfg: &mut HarnessConfig) -> anyhow::Result<()> {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(v) = value {
                *target = v;
            }
        }
        fn set_duration(target: &mut Duration, value: Option<YamlDuration>) {
            set(target, value.map(YamlDuration::into_inner));
        }

        set(&mut cfg.workers, self.workers);
        set(&mut cfg.rate, self.rate);
        set(&mut cfg.max_iterations, self.max_iterations);
        set_duration(&mut cfg.ramp, self.ramp);
        set_duration(&mut cfg.run_length, self.run_length);
        set_duration(&mut cfg.settle_delay, self.settle_delay);
        set_duration(&mut cfg.stats_interval, self.stats_interval);
        if let Some(mode) = self.stats_mode {
            cfg.stats_mode = mode
                .trim()
                .parse::<StatsMode>()
                .map_err(|_| anyhow::anyhow!("unknown statsMode `{mode}`"))?;
        }
        set(&mut cfg.rolling_window, self.rolling_window);
        set_duration(&mut cfg.discard, self.discard);
        if let Some(timing) = self.summary_timing {
            cfg.summary_timing = timing
                .trim()
                .parse::<SummaryTiming>()
                .map_err(|_| anyhow::anyhow!("unknown summaryTiming `{timing}`"))?;
        }
        set(&mut cfg.per_worker_stats, self.per_worker_stats);
        set(&mut cfg.response_times, self.response_times);
        set(&mut cfg.summary, self.summary);
        set_duration(&mut cfg.start_interval, self.start_interval);
        set_duration(&mut cfg.start_timeout, self.start_timeout);
        set_duration(&mut cfg.shutdown_wait, self.shutdown_wait);
        if self.id.is_some() {
            cfg.id = self.id;
        }

        if let Some(command) = self.command {
            if let Some(kind) = command.kind {
                cfg.command.kind = TransportKind::from_name(&kind)?;
            }
            set(&mut cfg.command.port, command.port);
            set(&mut cfg.command.bind, command.bind);
            if command.pipe.is_some() {
                cfg.command.pipe_path = command.pipe;
            }
        }

        if let Some(operation) = self.operation {
            set(&mut cfg.operation.name, operation.name);
            for (key, value) in operation.settings {
                let text = setting_text(&value)
                    .with_context(|| format!("operation setting `{key}` must be a scalar"))?;
                cfg.operation.settings.insert(key, text);
            }
        }
        Ok(())
    }
}

fn setting_text(value: &serde_yaml::Value) -> anyhow::Result<String> {
    use serde_yaml::Value;
    match value {
        Value::String(s) => Ok(s.clone()),
        Value::Number(n) => Ok(n.to_string()),
        Value::Bool(b) => Ok(b.to_string()),
        other => anyhow::bail!("got {other:?}"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(raw: &str) -> ConfigFile {
        ConfigFile::parse(raw).unwrap_or_else(|e| panic!("config rejected: {e:#}"))
    }

    #[test]
    fn applies_every_section() {
        let file = parse(
            r"
workers: 3
rate: 20.5
maxIterations: 100
runLength: 1m
statsInterval: 0
startTimeout: 2.5
perWorkerStats: true
id: load-a
command:
  kind: socket
  port: 9100
  bind: 0.0.0.0
operation:
  name: tcp-requestor
  settings:
    port: 7000
    host: example.test
    messages_per_connection: 10
",
        );

        let mut cfg = HarnessConfig::default();
        file.apply(&mut cfg)
            .unwrap_or_else(|e| panic!("apply failed: {e:#}"));

        assert_eq!(cfg.workers, 3);
        assert!((cfg.rate - 20.5).abs() < f64::EPSILON);
        assert_eq!(cfg.max_iterations, 100);
        assert_eq!(cfg.run_length, Duration::from_secs(60));
        assert_eq!(cfg.stats_interval, Duration::ZERO);
        assert_eq!(cfg.start_timeout, Duration::from_millis(2_500));
        assert!(cfg.per_worker_stats);
        assert_eq!(cfg.id.as_deref(), Some("load-a"));
        assert_eq!(cfg.command.kind, TransportKind::Socket);
        assert_eq!(cfg.command.port, 9100);
        assert_eq!(cfg.command.bind.to_string(), "0.0.0.0");
        assert_eq!(cfg.operation.name, "tcp-requestor");
        assert_eq!(cfg.operation.settings.get("port"), Some("7000"));
        assert_eq!(cfg.operation.settings.get("messages_per_connection"), Some("10"));
    }

    #[test]
    fn applies_stats_window_keys() {
        let file = parse("statsMode: rolling-average\nrollingWindow: 4\ndiscard: 15s\nsummaryTiming: tlf\n");
        let mut cfg = HarnessConfig::default();
        file.apply(&mut cfg)
            .unwrap_or_else(|e| panic!("apply failed: {e:#}"));

        assert_eq!(cfg.stats_mode, StatsMode::Rolling);
        assert_eq!(cfg.rolling_window, 4);
        assert_eq!(cfg.discard, Duration::from_secs(15));
        assert_eq!(cfg.summary_timing, SummaryTiming::TimeToLastFire);

        let mut cfg = HarnessConfig::default();
        assert!(parse("statsMode: median\n").apply(&mut cfg).is_err());
        let mut cfg = HarnessConfig::default();
        assert!(parse("summaryTiming: late\n").apply(&mut cfg).is_err());
    }

    #[test]
    fn absent_keys_keep_defaults() {
        let mut cfg = HarnessConfig::default();
        parse("workers: 2\n")
            .apply(&mut cfg)
            .unwrap_or_else(|e| panic!("apply failed: {e:#}"));
        assert_eq!(cfg.workers, 2);
        assert_eq!(cfg.stats_interval, Duration::from_secs(1));
        assert!(cfg.summary);

        let mut cfg = HarnessConfig::default();
        parse("").apply(&mut cfg).unwrap_or_else(|e| panic!("{e:#}"));
        assert_eq!(cfg.workers, 1);
    }

    #[test]
    fn rejects_unknown_keys_and_bad_values() {
        assert!(ConfigFile::parse("threads: 4\n").is_err());
        assert!(ConfigFile::parse("runLength: soon\n").is_err());
        assert!(ConfigFile::parse("runLength: -3\n").is_err());

        let mut cfg = HarnessConfig::default();
        let nested = parse("operation:\n  name: noop\n  settings:\n    list: [1, 2]\n");
        assert!(nested.apply(&mut cfg).is_err());

        let mut cfg = HarnessConfig::default();
        let transport = parse("command:\n  kind: carrier-pigeon\n");
        assert!(transport.apply(&mut cfg).is_err());
    }
}
