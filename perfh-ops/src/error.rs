use std::net::SocketAddr;
use std::time::Duration;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("unknown operation `{name}` (available: {available})")]
    UnknownOperation { name: String, available: String },

    #[error("missing required setting `{0}`")]
    MissingSetting(&'static str),

    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: &'static str, reason: String },

    #[error(transparent)]
    Settings(#[from] perfh_core::Error),
}

/// Failures while a TCP requestor talks to its peer.
#[derive(Debug, thiserror::Error)]
pub enum TcpError {
    #[error("could not resolve `{0}`")]
    Resolve(String),

    #[error("connect to {addr} failed: {source}")]
    Connect {
        addr: SocketAddr,
        #[source]
        source: std::io::Error,
    },

    #[error("not connected")]
    NotConnected,

    #[error("peer closed the connection")]
    Closed,

    #[error("no reply after {attempts} read timeouts of {timeout:?}")]
    Timeout { attempts: u32, timeout: Duration },

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}
