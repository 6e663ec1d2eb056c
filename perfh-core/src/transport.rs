mod noop;
#[cfg(unix)]
mod pipe;
mod socket;

use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::io::{AsyncBufRead, AsyncBufReadExt};

pub use noop::NoopTransport;
#[cfg(unix)]
pub use pipe::PipeTransport;
pub use socket::SocketTransport;

use crate::command::{CommandProcessor, Reply};
use crate::config::{TransportConfig, TransportKind};
use crate::signal::ShutdownSignal;
use crate::stats::ReportSink;
use crate::{Error, Result};

pub type ServeFuture = Pin<Box<dyn Future<Output = Result<()>> + Send>>;

/// Source of command lines. Implementations read lines, hand them to the
/// processor and route replies back to whoever sent them, until shutdown.
pub trait CommandTransport: Send {
    fn name(&self) -> &'static str;

    fn serve(self: Box<Self>, processor: Arc<CommandProcessor>, shutdown: Arc<ShutdownSignal>)
    -> ServeFuture;
}

/// Runs one command off the async runtime; resizes block until workers settle.
///
/// A command that panics is answered with FAIL; the channel keeps serving.
pub(crate) async fn dispatch(processor: &Arc<CommandProcessor>, line: String) -> Option<String> {
    let input = line.trim().to_string();
    let worker = processor.clone();
    match tokio::task::spawn_blocking(move || worker.process(&line)).await {
        Ok(reply) => reply,
        Err(err) => {
            tracing::error!(command = %input, error = %err, "command handler failed");
            Some(processor.prefixed(&Reply::Fail(input).to_string()))
        }
    }
}

/// Reads one `\n`-terminated line, replacing invalid UTF-8 so the processor
/// can still answer it. `None` at end of input.
pub(crate) async fn read_line<R>(reader: &mut R, buf: &mut Vec<u8>) -> std::io::Result<Option<String>>
where
    R: AsyncBufRead + Unpin,
{
    buf.clear();
    if reader.read_until(b'\n', buf).await? == 0 {
        return Ok(None);
    }
    let line = String::from_utf8_lossy(buf);
    Ok(Some(line.trim_end_matches(['\r', '\n']).to_string()))
}

/// Builds the transport named by `cfg`. Binding and FIFO creation happen here,
/// so failures surface before any worker starts.
pub async fn open(cfg: &TransportConfig, sink: ReportSink) -> Result<Box<dyn CommandTransport>> {
    match cfg.kind {
        TransportKind::None => Ok(Box::new(NoopTransport)),
        TransportKind::Socket => {
            let transport = SocketTransport::bind((cfg.bind, cfg.port).into()).await?;
            Ok(Box::new(transport))
        }
        TransportKind::Pipe => open_pipe(cfg, sink).await,
    }
}

#[cfg(unix)]
async fn open_pipe(cfg: &TransportConfig, sink: ReportSink) -> Result<Box<dyn CommandTransport>> {
    let path = cfg.pipe_path.clone().ok_or(Error::MissingPipePath)?;
    let transport = PipeTransport::create(path, sink).await?;
    Ok(Box::new(transport))
}

#[cfg(not(unix))]
async fn open_pipe(_cfg: &TransportConfig, _sink: ReportSink) -> Result<Box<dyn CommandTransport>> {
    Err(Error::Transport(
        "named pipes are only supported on unix".to_string(),
    ))
}
