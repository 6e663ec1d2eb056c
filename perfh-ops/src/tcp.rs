use std::io::{ErrorKind, Read, Write};
use std::net::{Shutdown, SocketAddr, TcpStream, ToSocketAddrs};
use std::sync::Arc;
use std::time::Duration;

use perfh_core::{
    Operation, OperationContext, OperationFactory, OperationResult, OperationSettings, Step,
    WorkerIdentity,
};

use crate::{Error, Result, TcpError};

const SEQ_LEN: usize = std::mem::size_of::<u64>();

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TcpRequestorConfig {
    pub host: String,
    pub port: u16,
    /// Request size in bytes; the peer must echo the same number back.
    pub size: usize,
    pub connect_timeout: Duration,
    /// Single read wait. The stop flag is checked between waits.
    pub read_timeout: Duration,
    /// Consecutive read timeouts tolerated per reply.
    pub retries: u32,
    /// Reconnect after this many requests; `0` keeps one connection.
    pub messages_per_connection: u64,
}

impl TcpRequestorConfig {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            size: 64,
            connect_timeout: Duration::from_secs(5),
            read_timeout: Duration::from_secs(1),
            retries: 5,
            messages_per_connection: 0,
        }
    }

    /// Reads `host` (default `127.0.0.1`), `port` (required), `size`,
    /// `connect_timeout`, `read_timeout`, `retries` and `messages_per_connection`.
    pub fn from_settings(settings: &OperationSettings) -> Result<Self> {
        let port = settings
            .parse::<u16>("port")?
            .ok_or(Error::MissingSetting("port"))?;
        let host = settings.get("host").unwrap_or("127.0.0.1").to_string();

        let mut cfg = Self::new(host, port);
        if let Some(size) = settings.parse::<usize>("size")? {
            if size == 0 {
                return Err(Error::InvalidSetting {
                    key: "size",
                    reason: "must be at least 1 byte".to_string(),
                });
            }
            cfg.size = size;
        }
        if let Some(d) = settings.duration("connect_timeout")? {
            cfg.connect_timeout = d;
        }
        if let Some(d) = settings.duration("read_timeout")? {
            if d.is_zero() {
                return Err(Error::InvalidSetting {
                    key: "read_timeout",
                    reason: "must be positive".to_string(),
                });
            }
            cfg.read_timeout = d;
        }
        if let Some(retries) = settings.parse::<u32>("retries")? {
            cfg.retries = retries;
        }
        if let Some(n) = settings.parse::<u64>("messages_per_connection")? {
            cfg.messages_per_connection = n;
        }
        Ok(cfg)
    }

    fn resolve(&self) -> std::result::Result<Vec<SocketAddr>, TcpError> {
        let target = format!("{}:{}", self.host, self.port);
        let addrs: Vec<SocketAddr> = (self.host.as_str(), self.port)
            .to_socket_addrs()
            .map_err(|_| TcpError::Resolve(target.clone()))?
            .collect();
        if addrs.is_empty() {
            return Err(TcpError::Resolve(target));
        }
        Ok(addrs)
    }
}

/// Sends a fixed-size request and waits for the peer to echo it back.
///
/// Requests of at least eight bytes carry a sequence number in their first
/// bytes, so replies feed the worker's sequence tracking.
pub struct TcpRequestor {
    cfg: Arc<TcpRequestorConfig>,
    stream: Option<TcpStream>,
    request: Vec<u8>,
    reply: Vec<u8>,
    next_seq: u64,
    sent_on_connection: u64,
}

impl TcpRequestor {
    pub fn new(cfg: Arc<TcpRequestorConfig>, worker: &WorkerIdentity) -> Self {
        let request: Vec<u8> = (0..cfg.size)
            .map(|i| (i as u64).wrapping_add(worker.index) as u8)
            .collect();
        Self {
            reply: vec![0; cfg.size],
            request,
            cfg,
            stream: None,
            next_seq: 1,
            sent_on_connection: 0,
        }
    }

    fn connect(&mut self) -> std::result::Result<(), TcpError> {
        let mut last_err = None;
        for addr in self.cfg.resolve()? {
            match TcpStream::connect_timeout(&addr, self.cfg.connect_timeout) {
                Ok(stream) => {
                    stream.set_read_timeout(Some(self.cfg.read_timeout))?;
                    stream.set_nodelay(true)?;
                    self.stream = Some(stream);
                    self.sent_on_connection = 0;
                    return Ok(());
                }
                Err(source) => last_err = Some(TcpError::Connect { addr, source }),
            }
        }
        Err(last_err.unwrap_or(TcpError::NotConnected))
    }

    fn disconnect(&mut self) {
        if let Some(stream) = self.stream.take() {
            let _ = stream.shutdown(Shutdown::Both);
        }
    }

    fn read_reply(&mut self, ctx: &OperationContext) -> std::result::Result<bool, TcpError> {
        let stream = self.stream.as_mut().ok_or(TcpError::NotConnected)?;
        let mut filled = 0;
        let mut timeouts = 0;
        while filled < self.reply.len() {
            match stream.read(&mut self.reply[filled..]) {
                Ok(0) => return Err(TcpError::Closed),
                Ok(n) => filled += n,
                Err(err) if matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut) => {
                    if ctx.should_stop() {
                        return Ok(false);
                    }
                    timeouts += 1;
                    if timeouts > self.cfg.retries {
                        return Err(TcpError::Timeout {
                            attempts: timeouts,
                            timeout: self.cfg.read_timeout,
                        });
                    }
                }
                Err(err) if err.kind() == ErrorKind::Interrupted => {}
                Err(err) => return Err(err.into()),
            }
        }
        Ok(true)
    }
}

impl Operation for TcpRequestor {
    fn setup(&mut self, _ctx: &OperationContext) -> OperationResult<()> {
        self.connect()?;
        Ok(())
    }

    fn step(&mut self, ctx: &OperationContext) -> OperationResult<Step> {
        if self.cfg.messages_per_connection > 0
            && self.sent_on_connection >= self.cfg.messages_per_connection
        {
            self.disconnect();
            self.connect()?;
        }

        let seq = self.next_seq;
        self.next_seq += 1;
        let tagged = self.request.len() >= SEQ_LEN;
        if tagged {
            self.request[..SEQ_LEN].copy_from_slice(&seq.to_be_bytes());
        }

        let stream = self.stream.as_mut().ok_or(TcpError::NotConnected)?;
        stream.write_all(&self.request).map_err(TcpError::from)?;
        self.sent_on_connection += 1;

        if !self.read_reply(ctx)? {
            return Ok(Step::Done);
        }

        if tagged {
            let mut raw = [0u8; SEQ_LEN];
            raw.copy_from_slice(&self.reply[..SEQ_LEN]);
            let echoed = u64::from_be_bytes(raw);
            ctx.record_sequence(i64::try_from(echoed).unwrap_or(i64::MAX));
            if self.reply[SEQ_LEN..] != self.request[SEQ_LEN..] {
                ctx.record_sequence_error();
            }
        } else if self.reply != self.request {
            ctx.record_sequence_error();
        }

        Ok(Step::Continue)
    }

    fn teardown(&mut self, _ctx: &OperationContext) -> OperationResult<()> {
        self.disconnect();
        Ok(())
    }
}

/// Shares one parsed config across every worker's requestor.
#[derive(Debug, Clone)]
pub struct TcpRequestorFactory {
    cfg: Arc<TcpRequestorConfig>,
}

impl TcpRequestorFactory {
    pub fn new(cfg: TcpRequestorConfig) -> Self {
        Self { cfg: Arc::new(cfg) }
    }

    pub fn config(&self) -> &TcpRequestorConfig {
        &self.cfg
    }
}

impl OperationFactory for TcpRequestorFactory {
    fn create(&self, worker: &WorkerIdentity) -> OperationResult<Box<dyn Operation>> {
        Ok(Box::new(TcpRequestor::new(self.cfg.clone(), worker)))
    }
}

pub(crate) fn factory(settings: &OperationSettings) -> Result<Arc<dyn OperationFactory>> {
    let cfg = TcpRequestorConfig::from_settings(settings)?;
    tracing::debug!(host = %cfg.host, port = cfg.port, size = cfg.size, "tcp requestor configured");
    Ok(Arc::new(TcpRequestorFactory::new(cfg)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn port_is_required() {
        let err = TcpRequestorConfig::from_settings(&OperationSettings::new());
        assert!(matches!(err, Err(Error::MissingSetting("port"))));
    }

    #[test]
    fn reads_all_settings() {
        let settings = OperationSettings::new()
            .with("host", "localhost")
            .with("port", "7000")
            .with("size", "16")
            .with("connect_timeout", "2s")
            .with("read_timeout", "50ms")
            .with("retries", "1")
            .with("messages_per_connection", "100");
        let cfg = TcpRequestorConfig::from_settings(&settings)
            .unwrap_or_else(|e| panic!("settings rejected: {e}"));

        assert_eq!(cfg.host, "localhost");
        assert_eq!(cfg.port, 7000);
        assert_eq!(cfg.size, 16);
        assert_eq!(cfg.connect_timeout, Duration::from_secs(2));
        assert_eq!(cfg.read_timeout, Duration::from_millis(50));
        assert_eq!(cfg.retries, 1);
        assert_eq!(cfg.messages_per_connection, 100);
    }

    #[test]
    fn rejects_zero_size_and_bad_port() {
        let zero = OperationSettings::new().with("port", "1").with("size", "0");
        assert!(TcpRequestorConfig::from_settings(&zero).is_err());

        let bad_port = OperationSettings::new().with("port", "99999");
        assert!(TcpRequestorConfig::from_settings(&bad_port).is_err());
    }
}
