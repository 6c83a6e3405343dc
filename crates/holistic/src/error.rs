//! Error types for failures callers need to tell apart.
//!
//! Everything else is reported through [`anyhow::Error`] with added context.

use std::path::PathBuf;

use thiserror::Error;

use crate::landmark::RunningMode;

/// Failure to acquire a camera stream.
///
/// [`CameraError::name`] gives each variant the name web media APIs use for the same failure.
#[derive(Debug, Error)]
pub enum CameraError {
    /// No usable capture device is connected.
    #[error("no supported camera device found")]
    NotFound,
    /// The device exists but could not be opened (eg. it is in use by another process).
    #[error("could not start video source: {0}")]
    NotReadable(String),
    /// The device does not offer any image format or frame size that can be decoded.
    #[error("camera does not support the requested format: {0}")]
    Overconstrained(String),
    /// Capture stopped before the first frame was delivered.
    #[error("camera stream ended: {0}")]
    Aborted(String),
}

impl CameraError {
    /// Returns the error's name.
    pub fn name(&self) -> &'static str {
        match self {
            CameraError::NotFound => "NotFoundError",
            CameraError::NotReadable(_) => "NotReadableError",
            CameraError::Overconstrained(_) => "OverconstrainedError",
            CameraError::Aborted(_) => "AbortError",
        }
    }
}

/// Failure to locate or fetch a model asset.
#[derive(Debug, Error)]
pub enum ModelError {
    #[error("model asset '{asset}' not found in '{}' and no download URL is configured", dir.display())]
    Missing { asset: String, dir: PathBuf },
    #[error("failed to download '{url}'")]
    Download {
        url: String,
        #[source]
        source: reqwest::Error,
    },
    #[error("server responded with HTTP {status} for '{url}'")]
    Status { url: String, status: u16 },
    #[error("I/O error while storing '{}'", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// Invalid invocation of a landmarker task.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum TaskError {
    #[error("`{call}` cannot be used in {mode:?} running mode")]
    WrongRunningMode {
        call: &'static str,
        mode: RunningMode,
    },
    #[error("timestamp {current} ms must be greater than the previous timestamp {previous} ms")]
    NonMonotonicTimestamp { previous: u64, current: u64 },
}

/// Invalid configuration value.
#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid value '{value}' for `{var}`: {reason}")]
pub struct ConfigError {
    pub var: &'static str,
    pub value: String,
    pub reason: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn camera_error_display() {
        let err = CameraError::NotReadable("device or resource busy".into());
        assert_eq!(err.name(), "NotReadableError");
        assert_eq!(
            format!("{}: {}", err.name(), err),
            "NotReadableError: could not start video source: device or resource busy",
        );
        assert_eq!(CameraError::NotFound.name(), "NotFoundError");
    }
}
