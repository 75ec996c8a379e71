use std::{error::Error, fmt};

use backtrace::Backtrace;

/// The rough class of a storage failure.
///
/// `NotFound` is deliberately absent: asking to remove a pair that does not
/// exist is answered with `Ok(false)`, not an error.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// File-system or device failure during read/write/seek/resize.
    Io,

    /// A page id, segment index or tree position is outside the valid
    /// interval. Usually indicates a bug in the caller or corruption.
    OutOfRange,

    /// Every frame of the buffer pool is pinned. Indicates a pin leak or an
    /// operation exceeding its pin budget.
    PoolExhausted,

    /// A config file parsed inconsistently at startup; the engine refuses
    /// to open.
    Corrupt,
}

pub struct RailError {
    kind: ErrorKind,
    details: String,
    backtrace: Backtrace,
}

impl RailError {
    pub fn new(kind: ErrorKind, msg: &str) -> RailError {
        RailError {
            kind,
            details: msg.to_string(),
            backtrace: Backtrace::new_unresolved(),
        }
    }

    pub fn io(msg: &str) -> RailError {
        Self::new(ErrorKind::Io, msg)
    }

    pub fn out_of_range(msg: &str) -> RailError {
        Self::new(ErrorKind::OutOfRange, msg)
    }

    pub fn corrupt(msg: &str) -> RailError {
        Self::new(ErrorKind::Corrupt, msg)
    }

    pub fn get_kind(&self) -> ErrorKind {
        self.kind
    }

    pub fn show_backtrace(&self) {
        let mut resolved = self.backtrace.clone();
        resolved.resolve();
        log::error!("{}, backtrace:\n{:?}", self, resolved);
    }
}

impl fmt::Display for RailError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "[{:?}] {}", self.kind, self.details)
    }
}

impl fmt::Debug for RailError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(
            f,
            "RailError {{ kind: {:?}, details: {} }}",
            self.kind, self.details
        )
    }
}

impl Error for RailError {}

impl From<std::io::Error> for RailError {
    fn from(e: std::io::Error) -> Self {
        RailError::io(&e.to_string())
    }
}
