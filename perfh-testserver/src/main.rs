use std::net::SocketAddr;

use clap::Parser;
use perfh_testserver::{Mode, TestServer};
use tokio::net::TcpListener;

#[derive(Debug, Parser)]
#[command(name = "perfh-testserver", about = "TCP echo server for perfh runs")]
struct Args {
    #[arg(long, default_value = "127.0.0.1:0")]
    bind: SocketAddr,

    /// Accept and read, but never reply.
    #[arg(long)]
    silent: bool,
}

#[tokio::main(flavor = "current_thread")]
async fn main() -> anyhow::Result<()> {
    let args = Args::parse();
    let mode = if args.silent { Mode::Silent } else { Mode::Echo };

    let listener = TcpListener::bind(args.bind).await?;
    let server = TestServer::serve(listener, mode)?;

    println!("TCP_ADDR={}", server.addr());

    let _ = tokio::signal::ctrl_c().await;

    let stats = server.stats().clone();
    server.shutdown().await;
    eprintln!(
        "connections={} bytes_received={} bytes_echoed={}",
        stats.connections_total(),
        stats.bytes_received(),
        stats.bytes_echoed()
    );
    Ok(())
}
