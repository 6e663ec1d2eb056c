use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::oneshot;
use tokio::task::JoinSet;

/// How the server treats bytes it receives.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum Mode {
    /// Write every byte straight back.
    #[default]
    Echo,
    /// Read and discard; never reply. Exercises client read timeouts.
    Silent,
}

#[derive(Debug, Clone, Default)]
pub struct TestServerStats {
    connections_total: Arc<AtomicU64>,
    bytes_received: Arc<AtomicU64>,
    bytes_echoed: Arc<AtomicU64>,
}

impl TestServerStats {
    fn inc_connections_total(&self) {
        self.connections_total.fetch_add(1, Ordering::Relaxed);
    }

    fn add_bytes_received(&self, n: usize) {
        self.bytes_received.fetch_add(n as u64, Ordering::Relaxed);
    }

    fn add_bytes_echoed(&self, n: usize) {
        self.bytes_echoed.fetch_add(n as u64, Ordering::Relaxed);
    }

    pub fn connections_total(&self) -> u64 {
        self.connections_total.load(Ordering::Relaxed)
    }

    pub fn bytes_received(&self) -> u64 {
        self.bytes_received.load(Ordering::Relaxed)
    }

    pub fn bytes_echoed(&self) -> u64 {
        self.bytes_echoed.load(Ordering::Relaxed)
    }
}

/// TCP server for exercising request/reply operations.
pub struct TestServer {
    addr: SocketAddr,
    stats: TestServerStats,
    shutdown_tx: Option<oneshot::Sender<()>>,
    task: Option<tokio::task::JoinHandle<()>>,
}

impl TestServer {
    pub async fn start() -> std::io::Result<Self> {
        Self::start_with(Mode::Echo).await
    }

    pub async fn start_with(mode: Mode) -> std::io::Result<Self> {
        let listener = TcpListener::bind("127.0.0.1:0").await?;
        Self::serve(listener, mode)
    }

    /// Serves on an already-bound listener.
    pub fn serve(listener: TcpListener, mode: Mode) -> std::io::Result<Self> {
        let addr = listener.local_addr()?;
        let stats = TestServerStats::default();

        let (shutdown_tx, shutdown_rx) = oneshot::channel::<()>();
        let task = tokio::spawn(accept_loop(listener, mode, stats.clone(), shutdown_rx));

        Ok(Self {
            addr,
            stats,
            shutdown_tx: Some(shutdown_tx),
            task: Some(task),
        })
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }

    pub fn stats(&self) -> &TestServerStats {
        &self.stats
    }

    pub async fn shutdown(mut self) {
        if let Some(tx) = self.shutdown_tx.take() {
            let _ = tx.send(());
        }

        if let Some(task) = self.task.take() {
            let _ = task.await;
        }
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        if self.shutdown_tx.is_some()
            && let Some(task) = self.task.take()
        {
            task.abort();
        }
    }
}

async fn accept_loop(
    listener: TcpListener,
    mode: Mode,
    stats: TestServerStats,
    mut shutdown_rx: oneshot::Receiver<()>,
) {
    let mut connections = JoinSet::new();
    loop {
        tokio::select! {
            _ = &mut shutdown_rx => break,
            accepted = listener.accept() => {
                let Ok((stream, _)) = accepted else {
                    continue;
                };
                stats.inc_connections_total();
                connections.spawn(handle_connection(stream, mode, stats.clone()));
            }
            Some(_) = connections.join_next(), if !connections.is_empty() => {}
        }
    }
    connections.shutdown().await;
}

async fn handle_connection(mut stream: TcpStream, mode: Mode, stats: TestServerStats) {
    let _ = stream.set_nodelay(true);
    let mut buf = vec![0u8; 16 * 1024];
    loop {
        let n = match stream.read(&mut buf).await {
            Ok(0) | Err(_) => return,
            Ok(n) => n,
        };
        stats.add_bytes_received(n);

        if mode == Mode::Echo {
            if stream.write_all(&buf[..n]).await.is_err() {
                return;
            }
            stats.add_bytes_echoed(n);
        }
    }
}
