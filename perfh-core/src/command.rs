mod parse;

use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

pub use parse::{Command, OptionError, Verb};

use crate::pool::{MAX_WORKERS, WorkerPool};
use crate::stats::StatsAggregator;

pub const INVALID_REPORT: &str = "FAIL: invalid report request (options are 'stats')";

/// Outcome of one command, before the optional id prefix is applied.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Reply {
    Success(String),
    Fail(String),
    Unsupported(String),
    Report(String),
    InvalidReport,
}

impl Reply {
    pub fn is_success(&self) -> bool {
        matches!(self, Self::Success(_) | Self::Report(_))
    }
}

impl fmt::Display for Reply {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Success(input) => write!(f, "SUCCESS: {input}"),
            Self::Fail(input) => write!(f, "FAIL: {input}"),
            Self::Unsupported(input) => write!(f, "WARNING: unsupported command: {input}"),
            Self::Report(line) => f.write_str(line),
            Self::InvalidReport => f.write_str(INVALID_REPORT),
        }
    }
}

/// Turns command lines into pool operations. Commands run one at a time.
pub struct CommandProcessor {
    pool: Arc<WorkerPool>,
    stats: Arc<StatsAggregator>,
    id: Option<String>,
    serial: Mutex<()>,
}

impl CommandProcessor {
    pub fn new(pool: Arc<WorkerPool>, stats: Arc<StatsAggregator>, id: Option<String>) -> Self {
        Self {
            pool,
            stats,
            id,
            serial: Mutex::new(()),
        }
    }

    /// Executes `line` and renders the reply. Blank lines yield `None`.
    ///
    /// Blocks while a resize is in progress, so async callers should run this on
    /// a blocking thread.
    pub fn process(&self, line: &str) -> Option<String> {
        let reply = self.execute(line)?;
        Some(self.prefixed(&reply.to_string()))
    }

    /// Adds the `ID,` prefix when an id is configured.
    pub fn prefixed(&self, text: &str) -> String {
        match &self.id {
            Some(id) => format!("{id},{text}"),
            None => text.to_string(),
        }
    }

    pub fn execute(&self, line: &str) -> Option<Reply> {
        let input = line.trim();
        let command = Command::parse(input)?;
        let _serial = self.serial.lock();

        let reply = match command.verb() {
            Some(Verb::Start) => self.start(&command, input),
            Some(Verb::End) => self.end(&command, input),
            Some(Verb::Alter) => self.alter(&command, input),
            Some(Verb::Report) => self.report(&command),
            None => {
                tracing::warn!(command = input, "unsupported command");
                Reply::Unsupported(input.to_string())
            }
        };
        tracing::debug!(command = input, reply = %reply, "command processed");
        Some(reply)
    }

    fn start(&self, command: &Command, input: &str) -> Reply {
        let count = match command.value::<i64>("nt") {
            Ok(Some(n)) if n >= 0 => n,
            Ok(None) => 1,
            Ok(Some(_)) | Err(_) => return Reply::Fail(input.to_string()),
        };
        let live = self.pool.len();
        let fits = usize::try_from(count).is_ok_and(|n| n <= MAX_WORKERS.saturating_sub(live));
        if !fits {
            tracing::warn!(count, live, limit = MAX_WORKERS, "start would exceed the worker limit");
            return Reply::Fail(input.to_string());
        }
        tracing::info!(count, "starting workers");
        if self.pool.change_worker_count(count) {
            Reply::Success(input.to_string())
        } else {
            Reply::Fail(input.to_string())
        }
    }

    fn end(&self, command: &Command, input: &str) -> Reply {
        let count = match command.value::<i64>("nt") {
            Ok(Some(n)) if n >= 0 => n,
            Ok(None) => i64::try_from(self.pool.len()).unwrap_or(i64::MAX),
            Ok(Some(_)) | Err(_) => return Reply::Fail(input.to_string()),
        };
        tracing::info!(count, "ending workers");
        if self.pool.change_worker_count(-count) {
            Reply::Success(input.to_string())
        } else {
            Reply::Fail(input.to_string())
        }
    }

    fn alter(&self, command: &Command, input: &str) -> Reply {
        let rate = match command.value::<f64>("rt") {
            Ok(Some(rate)) => crate::config::sanitize_rate(rate),
            Ok(None) | Err(_) => return Reply::Fail(input.to_string()),
        };
        tracing::info!(rate, "altering rate");
        self.pool.set_rate(rate);
        Reply::Success(input.to_string())
    }

    fn report(&self, command: &Command) -> Reply {
        if command.has_flag("stats") {
            Reply::Report(self.stats.report())
        } else {
            Reply::InvalidReport
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn replies_render_with_prefixes() {
        assert_eq!(
            Reply::Success("start -nt 2".to_string()).to_string(),
            "SUCCESS: start -nt 2"
        );
        assert_eq!(Reply::Fail("alter".to_string()).to_string(), "FAIL: alter");
        assert_eq!(
            Reply::Unsupported("pause".to_string()).to_string(),
            "WARNING: unsupported command: pause"
        );
        assert_eq!(Reply::InvalidReport.to_string(), INVALID_REPORT);
    }
}
