//! Error taxonomy shared by the engine and the collectors.

use std::io;
use std::path::PathBuf;

/// Error type for engine failures.
#[derive(Debug)]
pub enum EngineError {
    /// Backing storage could not grow.
    Allocation(String),
    /// Subscription setup or teardown failed.
    Notification(String),
    /// Open or read failure on a tailed file.
    File { path: PathBuf, source: io::Error },
    /// The reporting sink is no longer writable.
    Output(io::Error),
    /// Anything else.
    General(String),
}

impl EngineError {
    pub fn file(path: impl Into<PathBuf>, source: io::Error) -> Self {
        EngineError::File {
            path: path.into(),
            source,
        }
    }
}

impl std::fmt::Display for EngineError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            EngineError::Allocation(msg) => write!(f, "allocation error: {}", msg),
            EngineError::Notification(msg) => write!(f, "notification error: {}", msg),
            EngineError::File { path, source } => {
                write!(f, "file error: {}: {}", path.display(), source)
            }
            EngineError::Output(e) => write!(f, "cannot write report: {}", e),
            EngineError::General(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for EngineError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            EngineError::File { source, .. } => Some(source),
            EngineError::Output(e) => Some(e),
            _ => None,
        }
    }
}

/// Bare I/O errors come from the reporting sink; file errors carry their
/// path and are built with [`EngineError::file`].
impl From<io::Error> for EngineError {
    fn from(e: io::Error) -> Self {
        EngineError::Output(e)
    }
}

impl From<std::collections::TryReserveError> for EngineError {
    fn from(e: std::collections::TryReserveError) -> Self {
        EngineError::Allocation(e.to_string())
    }
}

impl From<notify::Error> for EngineError {
    fn from(e: notify::Error) -> Self {
        EngineError::Notification(e.to_string())
    }
}

pub type Result<T> = std::result::Result<T, EngineError>;
