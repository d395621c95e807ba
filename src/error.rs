//! Error handling for the camera session component.

use std::path::PathBuf;

use thiserror::Error;

use crate::driver::{CaptureFailureReason, DeviceErrorCode, DriverError};

/// Camera session error types
#[derive(Error, Debug)]
pub enum CameraError {
    /// The device could not be opened or failed while open
    #[error("Camera unavailable: {0}")]
    DeviceUnavailable(DeviceErrorCode),

    /// The driver rejected a capture session configuration
    #[error("Session configuration failed: {0}")]
    SessionConfigFailed(String),

    /// Refusing to overwrite an output file
    #[error("File at path '{}' already exists. Cannot overwrite.", .0.display())]
    FileAlreadyExists(PathBuf),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// A still capture request failed inside the driver
    #[error("Capture failed: {0}")]
    CaptureFailed(CaptureFailureReason),

    /// Recorder preparation, start or stop failed
    #[error("Video recording failed: {0}")]
    VideoRecordingFailed(String),

    /// The platform does not support the requested operation
    #[error("Unsupported operation: {0}")]
    UnsupportedOperation(String),

    /// The capability table has no output sizes to choose from
    #[error("The camera does not advertise any supported output sizes")]
    NoSupportedSizes,

    /// A driver call was rejected, or there is no device/session to use
    #[error("Camera access error: {0}")]
    CameraAccess(String),

    /// The component was disposed and can no longer be used
    #[error("Camera session has been disposed")]
    Disposed,

    /// The session loop is gone or dropped a reply
    #[error("Channel error: {0}")]
    Channel(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl From<DriverError> for CameraError {
    fn from(err: DriverError) -> Self {
        match err {
            DriverError::Io(err) => CameraError::Io(err),
            other => CameraError::CameraAccess(other.to_string()),
        }
    }
}

/// Camera session result type
pub type CameraResult<T> = std::result::Result<T, CameraError>;
