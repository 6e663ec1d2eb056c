use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio::io::BufReader;
use tokio::net::unix::pipe;

use super::{CommandTransport, ServeFuture, dispatch, read_line};
use crate::command::CommandProcessor;
use crate::signal::ShutdownSignal;
use crate::stats::ReportSink;
use crate::{Error, Result};

const REOPEN_DELAY: Duration = Duration::from_millis(100);

/// Reads commands from a named pipe. Replies go to the report sink (stdout by default).
pub struct PipeTransport {
    path: PathBuf,
    created: bool,
    sink: ReportSink,
}

impl PipeTransport {
    /// Uses an existing FIFO at `path` or creates one with `mkfifo`.
    /// A FIFO created here is removed when serving ends.
    pub async fn create(path: PathBuf, sink: ReportSink) -> Result<Self> {
        let created = match tokio::fs::metadata(&path).await {
            Ok(_) => false,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                mkfifo(&path).await?;
                true
            }
            Err(err) => return Err(err.into()),
        };
        Ok(Self {
            path,
            created,
            sink,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    async fn read_commands(
        &self,
        processor: &Arc<CommandProcessor>,
        shutdown: &ShutdownSignal,
    ) -> Result<()> {
        loop {
            let mut opts = pipe::OpenOptions::new();
            // Holding a write end ourselves keeps the reader from seeing EOF
            // every time a writer closes.
            #[cfg(target_os = "linux")]
            opts.read_write(true);
            let receiver = opts.open_receiver(&self.path)?;
            let mut reader = BufReader::new(receiver);
            let mut buf = Vec::new();

            loop {
                let line = tokio::select! {
                    _ = shutdown.wait() => return Ok(()),
                    line = read_line(&mut reader, &mut buf) => line?,
                };
                let Some(line) = line else {
                    break;
                };
                if let Some(reply) = dispatch(processor, line).await {
                    (self.sink)(&reply);
                }
            }

            tokio::select! {
                _ = shutdown.wait() => return Ok(()),
                _ = tokio::time::sleep(REOPEN_DELAY) => {}
            }
        }
    }
}

impl CommandTransport for PipeTransport {
    fn name(&self) -> &'static str {
        "pipe"
    }

    fn serve(self: Box<Self>, processor: Arc<CommandProcessor>, shutdown: Arc<ShutdownSignal>) -> ServeFuture {
        Box::pin(async move {
            tracing::info!(path = %self.path.display(), "reading commands from pipe");
            let result = self.read_commands(&processor, &shutdown).await;

            if self.created
                && let Err(err) = tokio::fs::remove_file(&self.path).await
            {
                tracing::warn!(path = %self.path.display(), error = %err, "failed to remove pipe");
            }
            result
        })
    }
}

async fn mkfifo(path: &Path) -> Result<()> {
    let output = tokio::process::Command::new("mkfifo")
        .arg(path)
        .output()
        .await
        .map_err(|err| Error::Transport(format!("failed to run mkfifo: {err}")))?;
    if !output.status.success() {
        return Err(Error::Transport(format!(
            "mkfifo {} failed: {}",
            path.display(),
            String::from_utf8_lossy(&output.stderr).trim()
        )));
    }
    Ok(())
}
