//! Defines the custom error type for the `core` module.

use std::fmt;
use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

/// A resource ceiling enforced while scanning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Limit {
    /// Number of files placed in the tree.
    FileCount,
    /// Size of a single file in bytes.
    FileSize,
    /// Cumulative size of all files placed in the tree.
    Memory,
}

impl Limit {
    /// The command-line flag that raises this limit.
    pub fn flag(&self) -> &'static str {
        match self {
            Limit::FileCount => "--max-files",
            Limit::FileSize => "--max-file-size",
            Limit::Memory => "--max-memory",
        }
    }
}

impl fmt::Display for Limit {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Limit::FileCount => "file count",
            Limit::FileSize => "file size",
            Limit::Memory => "memory",
        };
        f.write_str(name)
    }
}

/// The primary error type for the `core` module.
///
/// Scanner and assembler only return an error for conditions that abort the
/// whole operation. Unreadable individual entries are reported as [`Warning`]s
/// next to the result instead.
#[derive(Debug, Error)]
pub enum CoreError {
    /// A configured resource ceiling was hit.
    #[error("{limit} limit exceeded: {actual} > {max}{}", fmt_path(.path))]
    LimitExceeded {
        limit: Limit,
        actual: u64,
        max: u64,
        path: Option<PathBuf>,
    },

    /// Represents a user-initiated cancellation of an operation.
    #[error("Operation was cancelled by the user")]
    Cancelled,

    /// Assembly produced no usable content.
    #[error("None of the {attempted} selected files could be read")]
    Exhausted { attempted: usize },

    /// Represents an I/O error, typically from file system operations.
    #[error("I/O error for path {1}: {0}")]
    Io(#[source] std::io::Error, PathBuf),

    /// Represents a path that was expected to be a directory but was not.
    #[error("Path is not a valid directory: {0}")]
    NotADirectory(PathBuf),

    /// Represents an error that occurred when a Tokio task was joined.
    /// This is often due to a task panicking.
    #[error("Task join error: {0}")]
    Join(#[from] tokio::task::JoinError),

    /// The scanner's worker pool could not be created.
    #[error("Failed to build worker pool: {0}")]
    WorkerPool(String),

    /// `poll` or `result` was called before `start`.
    #[error("Operation has not been started")]
    NotStarted,

    /// `start` was called on a coordinator that was already used.
    #[error("Operation was already started; coordinators are single-use")]
    AlreadyStarted,

    /// `result` was called while the operation is still running.
    #[error("Operation has not finished yet")]
    NotFinished,

    /// The terminal value was already taken by an earlier `result` call.
    #[error("Operation result was already consumed")]
    ResultConsumed,

    /// The operation ended without reporting a result.
    #[error("Operation ended without a result")]
    Disconnected,
}

fn fmt_path(path: &Option<PathBuf>) -> String {
    match path {
        Some(p) => format!(" at {}", p.display()),
        None => String::new(),
    }
}

impl CoreError {
    /// `true` for cooperative cancellation, which callers report neutrally.
    pub fn is_cancelled(&self) -> bool {
        matches!(self, CoreError::Cancelled)
    }

    pub fn is_limit(&self) -> bool {
        matches!(self, CoreError::LimitExceeded { .. })
    }

    /// The breached limit, if this is a limit error.
    pub fn limit(&self) -> Option<Limit> {
        match self {
            CoreError::LimitExceeded { limit, .. } => Some(*limit),
            _ => None,
        }
    }
}

/// A skipped entry recorded during a scan or an assembly.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Warning {
    pub path: PathBuf,
    pub message: String,
}

impl Warning {
    pub fn new(path: impl Into<PathBuf>, message: impl fmt::Display) -> Self {
        Self {
            path: path.into(),
            message: message.to_string(),
        }
    }
}

impl fmt::Display for Warning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.path.display(), self.message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_limit_error_mentions_path_and_numbers() {
        let err = CoreError::LimitExceeded {
            limit: Limit::FileSize,
            actual: 2048,
            max: 1024,
            path: Some(PathBuf::from("big.bin")),
        };
        assert_eq!(
            err.to_string(),
            "file size limit exceeded: 2048 > 1024 at big.bin"
        );
        assert_eq!(err.limit(), Some(Limit::FileSize));
        assert!(!err.is_cancelled());
    }

    #[test]
    fn test_cancelled_is_distinguishable() {
        assert!(CoreError::Cancelled.is_cancelled());
        assert!(CoreError::Cancelled.limit().is_none());
        let io = CoreError::Io(std::io::Error::other("boom"), PathBuf::from("x"));
        assert!(!io.is_cancelled());
    }
}
