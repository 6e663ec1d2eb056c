use perfh_core::RunSummary;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,

    /// A worker failed, or the initial workers never all reached RUNNING.
    WorkerErrors = 10,

    /// Invalid CLI/config/settings (bad flags, unknown operation, unreadable config file, etc.).
    InvalidInput = 30,

    /// Internal/runtime error (command transport could not open, IO errors, join failures).
    RuntimeError = 40,
}

impl ExitCode {
    #[must_use]
    pub fn as_i32(self) -> i32 {
        self as i32
    }

    #[must_use]
    pub fn from_summary(summary: &RunSummary) -> Self {
        if summary.succeeded() {
            Self::Success
        } else {
            Self::WorkerErrors
        }
    }
}
