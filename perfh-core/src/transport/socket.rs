use std::net::SocketAddr;
use std::sync::Arc;

use tokio::io::{AsyncWriteExt, BufReader};
use tokio::net::{TcpListener, TcpStream};

use super::{CommandTransport, ServeFuture, dispatch, read_line};
use crate::command::CommandProcessor;
use crate::signal::ShutdownSignal;
use crate::{Error, Result};

/// Line-oriented TCP control port serving one client at a time.
///
/// Further clients wait in the accept backlog until the current one sends
/// `quit` or disconnects.
#[derive(Debug)]
pub struct SocketTransport {
    listener: TcpListener,
}

impl SocketTransport {
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let listener = TcpListener::bind(addr)
            .await
            .map_err(|err| Error::Transport(format!("failed to bind {addr}: {err}")))?;
        Ok(Self { listener })
    }

    pub fn local_addr(&self) -> Result<SocketAddr> {
        Ok(self.listener.local_addr()?)
    }
}

impl CommandTransport for SocketTransport {
    fn name(&self) -> &'static str {
        "socket"
    }

    fn serve(self: Box<Self>, processor: Arc<CommandProcessor>, shutdown: Arc<ShutdownSignal>) -> ServeFuture {
        Box::pin(async move {
            let port = self.local_addr()?.port();
            tracing::info!(port, "command processor listening");

            loop {
                let accepted = tokio::select! {
                    _ = shutdown.wait() => break,
                    accepted = self.listener.accept() => accepted,
                };
                let (stream, peer) = match accepted {
                    Ok(v) => v,
                    Err(err) => {
                        tracing::warn!(error = %err, "accept failed");
                        continue;
                    }
                };

                tracing::info!(%peer, "command client connected");
                if let Err(err) = serve_client(stream, port, &processor, &shutdown).await {
                    tracing::warn!(%peer, error = %err, "command client error");
                }
                tracing::info!(%peer, "command client disconnected");
            }
            Ok(())
        })
    }
}

async fn serve_client(
    stream: TcpStream,
    port: u16,
    processor: &Arc<CommandProcessor>,
    shutdown: &ShutdownSignal,
) -> Result<()> {
    let (read, mut write) = stream.into_split();
    let mut reader = BufReader::new(read);
    let mut buf = Vec::new();

    let greeting = format!("connected to command processor on port {port}\n");
    write.write_all(greeting.as_bytes()).await?;

    loop {
        let line = tokio::select! {
            _ = shutdown.wait() => break,
            line = read_line(&mut reader, &mut buf) => line?,
        };
        let Some(line) = line else {
            break;
        };
        if line.trim().eq_ignore_ascii_case("quit") {
            break;
        }

        if let Some(reply) = dispatch(processor, line).await {
            write.write_all(reply.as_bytes()).await?;
            write.write_all(b"\n").await?;
            write.flush().await?;
        }
    }

    let _ = write.shutdown().await;
    Ok(())
}
