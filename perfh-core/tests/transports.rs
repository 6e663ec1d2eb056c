mod support;

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use perfh_core::{
    CommandProcessor, CommandTransport, ReportSink, ShutdownSignal, SocketTransport,
    StatsAggregator, StatsOptions, WorkerPool,
};
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;

fn processor() -> (Arc<WorkerPool>, Arc<CommandProcessor>) {
    let pool = support::pool(support::ticking(Duration::from_millis(1)), 0.0);
    let stats = Arc::new(StatsAggregator::new(pool.clone(), StatsOptions::default()));
    let processor = Arc::new(CommandProcessor::new(pool.clone(), stats, None));
    (pool, processor)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn socket_transport_serves_commands() -> anyhow::Result<()> {
    let (pool, processor) = processor();
    let shutdown = Arc::new(ShutdownSignal::new());

    let transport = SocketTransport::bind("127.0.0.1:0".parse()?).await?;
    let addr = transport.local_addr()?;
    let server = tokio::spawn(Box::new(transport).serve(processor, shutdown.clone()));

    let stream = TcpStream::connect(addr).await?;
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    let greeting = lines.next_line().await?.unwrap_or_default();
    assert_eq!(
        greeting,
        format!("connected to command processor on port {}", addr.port())
    );

    write.write_all(b"START -nt 2\n").await?;
    assert_eq!(lines.next_line().await?.as_deref(), Some("SUCCESS: START -nt 2"));
    assert_eq!(pool.len(), 2);

    write.write_all(b"REPORT -stats\n").await?;
    let report = lines.next_line().await?.unwrap_or_default();
    assert!(report.starts_with("rate="), "{report}");
    assert!(report.ends_with("threads=2"), "{report}");

    write.write_all(b"\nnonsense\n").await?;
    assert_eq!(
        lines.next_line().await?.as_deref(),
        Some("WARNING: unsupported command: nonsense")
    );

    // Undecodable bytes still get an answer and leave the client connected.
    write.write_all(b"\xff\xfe\n").await?;
    assert_eq!(
        lines.next_line().await?.as_deref(),
        Some("WARNING: unsupported command: \u{fffd}\u{fffd}")
    );
    write.write_all(b"START -nt \xff\n").await?;
    assert_eq!(
        lines.next_line().await?.as_deref(),
        Some("FAIL: START -nt \u{fffd}")
    );

    write.write_all(b"START -nt 9223372036854775807\n").await?;
    assert_eq!(
        lines.next_line().await?.as_deref(),
        Some("FAIL: START -nt 9223372036854775807")
    );
    assert_eq!(pool.len(), 2);

    write.write_all(b"quit\n").await?;
    assert_eq!(lines.next_line().await?, None);

    // The next client is served once the first has gone.
    let stream = TcpStream::connect(addr).await?;
    let mut lines = BufReader::new(stream).lines();
    assert!(lines.next_line().await?.is_some());

    shutdown.trigger("test");
    tokio::time::timeout(Duration::from_secs(5), server).await???;

    tokio::task::spawn_blocking(move || pool.shutdown()).await?;
    Ok(())
}

#[cfg(target_os = "linux")]
#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pipe_transport_reads_fifo_and_cleans_up() -> anyhow::Result<()> {
    use perfh_core::PipeTransport;

    let (_pool, processor) = processor();
    let shutdown = Arc::new(ShutdownSignal::new());
    let dir = tempfile::tempdir()?;
    let path = dir.path().join("commands.fifo");

    let replies: Arc<Mutex<Vec<String>>> = Arc::new(Mutex::new(Vec::new()));
    let sink: ReportSink = {
        let replies = replies.clone();
        Arc::new(move |line: &str| replies.lock().push(line.to_string()))
    };

    let transport = PipeTransport::create(path.clone(), sink).await?;
    assert!(path.exists());
    let server = tokio::spawn(Box::new(transport).serve(processor, shutdown.clone()));

    let writer_path = path.clone();
    tokio::task::spawn_blocking(move || -> std::io::Result<()> {
        use std::io::Write as _;
        let mut fifo = std::fs::OpenOptions::new().write(true).open(writer_path)?;
        fifo.write_all(b"REPORT -stats\n\xff\nbogus\n")?;
        Ok(())
    })
    .await??;

    let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
    while replies.lock().len() < 3 && tokio::time::Instant::now() < deadline {
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    {
        let replies = replies.lock();
        assert_eq!(replies.len(), 3, "{replies:?}");
        assert!(replies[0].starts_with("rate="), "{}", replies[0]);
        assert_eq!(replies[1], "WARNING: unsupported command: \u{fffd}");
        assert_eq!(replies[2], "WARNING: unsupported command: bogus");
    }

    shutdown.trigger("test");
    tokio::time::timeout(Duration::from_secs(5), server).await???;
    assert!(!path.exists(), "fifo should be removed");
    Ok(())
}
