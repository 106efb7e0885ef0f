//! Error types for layercache

use std::fmt;
use std::io;

/// Result type alias for layercache control operations
pub type Result<T> = std::result::Result<T, Error>;

/// Errors reported by the cache's worker lifecycle and control operations.
///
/// Per-key operations never fail: a missing or expired key is `None`.
#[derive(Debug)]
pub enum Error {
    /// The worker thread could not be spawned
    Io(io::Error),

    /// The worker thread panicked (usually inside an `on_delete` callback)
    WorkerPanicked,

    /// The worker exited before answering a control request
    WorkerGone,
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::Io(e) => write!(f, "I/O error: {}", e),
            Error::WorkerPanicked => write!(f, "Cache worker panicked"),
            Error::WorkerGone => write!(f, "Cache worker is gone"),
        }
    }
}

impl std::error::Error for Error {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Error::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl From<io::Error> for Error {
    fn from(err: io::Error) -> Self {
        Error::Io(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::error::Error as _;

    #[test]
    fn test_error_display() {
        assert_eq!(Error::WorkerGone.to_string(), "Cache worker is gone");
        assert_eq!(Error::WorkerPanicked.to_string(), "Cache worker panicked");
    }

    #[test]
    fn test_io_source() {
        let err: Error = io::Error::new(io::ErrorKind::Other, "no threads").into();
        assert!(err.to_string().starts_with("I/O error"));
        assert!(err.source().is_some());
        assert!(Error::WorkerGone.source().is_none());
    }
}
