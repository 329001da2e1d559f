//! Error types for the recorder.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result alias used across the recorder core.
pub type RecorderResult<T> = Result<T, RecorderError>;

/// Errors raised by the recording core.
#[derive(Debug, Error)]
pub enum RecorderError {
    /// No device session could be obtained within the acquisition bound.
    #[error("unable to find an armband within {}ms", waited.as_millis())]
    AcquisitionFailure { waited: Duration },

    /// A sample arrived after the window reached capacity.
    #[error("sample window is full ({capacity} slots)")]
    WindowFull { capacity: usize },

    /// A flush was requested before any log destination was opened.
    #[error("no log destination is open")]
    NoDestination,

    /// Opening or writing a log destination failed.
    #[error("{context} {}: {source}", path.display())]
    Io {
        context: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

impl RecorderError {
    pub(crate) fn io(context: &'static str, path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        RecorderError::Io {
            context,
            path: path.into(),
            source,
        }
    }
}
