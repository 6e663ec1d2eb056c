pub type Result<T> = std::result::Result<T, Error>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    #[error("`workers` must be a positive integer")]
    InvalidWorkers,

    #[error("`workers` must be at most {0}")]
    TooManyWorkers(usize),

    #[error("`start_timeout` must be a positive duration")]
    InvalidStartTimeout,

    #[error("`rolling_window` must be at least 1 in rolling stats mode")]
    InvalidRollingWindow,

    #[error("operation name must not be empty")]
    MissingOperation,

    #[error("pipe transport requires a path")]
    MissingPipePath,

    #[error("invalid setting `{key}`: {reason}")]
    InvalidSetting { key: String, reason: String },

    #[error("failed to spawn worker thread `{name}`: {source}")]
    Spawn {
        name: String,
        #[source]
        source: std::io::Error,
    },

    #[error("command transport error: {0}")]
    Transport(String),

    #[error("unknown command transport `{0}` (expected `none`, `socket` or `pipe`)")]
    UnknownTransport(String),
}
