use std::fmt;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};

/// Lifecycle phase of a worker. Phases only move forward.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, strum::Display, strum::IntoStaticStr,
)]
#[strum(serialize_all = "SCREAMING_SNAKE_CASE")]
#[repr(u8)]
pub enum Phase {
    Init = 0,
    Connecting = 1,
    Running = 2,
    Ending = 3,
    Ended = 4,
}

impl Phase {
    fn from_u8(raw: u8) -> Self {
        match raw {
            0 => Self::Init,
            1 => Self::Connecting,
            2 => Self::Running,
            3 => Self::Ending,
            _ => Self::Ended,
        }
    }

    #[must_use]
    pub fn can_advance_to(self, next: Phase) -> bool {
        matches!(
            (self, next),
            (Self::Init, Self::Connecting)
                | (Self::Connecting, Self::Running)
                | (Self::Connecting, Self::Ending)
                | (Self::Running, Self::Ending)
                | (Self::Ending, Self::Ended)
        )
    }

    #[must_use]
    pub fn is_terminal(self) -> bool {
        self == Self::Ended
    }
}

/// Point-in-time view of a worker's status: its phase plus the sticky error flag.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Status {
    pub phase: Phase,
    pub error: bool,
}

impl Status {
    pub fn is_running(self) -> bool {
        self.phase == Phase::Running
    }

    pub fn is_ended(self) -> bool {
        self.phase.is_terminal()
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.error {
            write!(f, "{}|ERROR", self.phase)
        } else {
            write!(f, "{}", self.phase)
        }
    }
}

#[derive(Debug)]
pub(crate) struct StatusCell {
    phase: AtomicU8,
    error: AtomicBool,
}

impl StatusCell {
    pub(crate) fn new() -> Self {
        Self {
            phase: AtomicU8::new(Phase::Init as u8),
            error: AtomicBool::new(false),
        }
    }

    pub(crate) fn load(&self) -> Status {
        Status {
            phase: Phase::from_u8(self.phase.load(Ordering::Acquire)),
            error: self.error.load(Ordering::Acquire),
        }
    }

    /// Moves to `next` if the transition table allows it from the current phase.
    pub(crate) fn advance(&self, next: Phase) -> bool {
        let mut current = self.phase.load(Ordering::Acquire);
        loop {
            if !Phase::from_u8(current).can_advance_to(next) {
                return false;
            }
            match self.phase.compare_exchange_weak(
                current,
                next as u8,
                Ordering::AcqRel,
                Ordering::Acquire,
            ) {
                Ok(_) => return true,
                Err(actual) => current = actual,
            }
        }
    }

    pub(crate) fn flag_error(&self) {
        self.error.store(true, Ordering::Release);
    }
}
