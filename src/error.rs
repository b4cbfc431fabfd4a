use crate::camera::SessionState;
use crate::lens::LensFacing;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum FacecamError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Session error: {0}")]
    Session(#[from] SessionError),

    #[error("Capture error: {0}")]
    Capture(#[from] CaptureError),

    #[error("Event bus error: {0}")]
    EventBus(#[from] EventBusError),

    #[error("System error: {message}")]
    System { message: String },

    #[error("Component error in {component}: {message}")]
    Component { component: String, message: String },
}

impl FacecamError {
    pub fn system<S: Into<String>>(message: S) -> Self {
        Self::System {
            message: message.into(),
        }
    }

    pub fn component<S: Into<String>>(component: S, message: S) -> Self {
        Self::Component {
            component: component.into(),
            message: message.into(),
        }
    }
}

/// Errors reported by camera session lifecycle calls
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum SessionError {
    #[error("Camera permission has not been granted")]
    PermissionDenied,

    #[error("Camera session is not ready (state: {state})")]
    SessionNotReady { state: SessionState },

    #[error("Failed to bind camera outputs: {details}")]
    BindFailed { details: String },

    #[error("Request was cancelled by a session stop")]
    Cancelled,

    #[error("Camera session worker is no longer running")]
    WorkerStopped,
}

/// Errors reported by the still capture workflow
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CaptureError {
    #[error("Camera session is not ready (state: {state})")]
    SessionNotReady { state: SessionState },

    #[error("Another capture is already in progress")]
    CaptureInProgress,

    #[error("Capture failed: {reason}")]
    CaptureFailed { reason: String },

    #[error("Face detection failed: {reason}")]
    DetectionFailed { reason: String },

    #[error("Storage error: {details}")]
    Io { details: String },

    #[error("Capture was cancelled by a session stop")]
    Cancelled,

    #[error("Camera session worker is no longer running")]
    WorkerStopped,
}

impl From<std::io::Error> for CaptureError {
    fn from(e: std::io::Error) -> Self {
        CaptureError::Io {
            details: e.to_string(),
        }
    }
}

/// Errors surfaced by a camera backend or device
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CameraError {
    #[error("Failed to open {lens} camera: {details}")]
    DeviceOpen { lens: LensFacing, details: String },

    #[error("Failed to attach {output} output: {details}")]
    Attach { output: String, details: String },

    #[error("Output {output} is not attached")]
    OutputNotAttached { output: String },

    #[error("Still capture failed: {details}")]
    Capture { details: String },

    #[error("Image encoding failed: {details}")]
    Encoding { details: String },

    #[error("Camera device has been closed")]
    Closed,
}

/// Errors surfaced by the face detector capability
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DetectorError {
    #[error("Detector rejected the image: {reason}")]
    Rejected { reason: String },

    #[error("Detector failed: {details}")]
    Failed { details: String },

    #[error("Detection timed out after {timeout_ms}ms")]
    Timeout { timeout_ms: u64 },
}

#[derive(Error, Debug)]
pub enum EventBusError {
    #[error("Failed to publish event: {details}")]
    PublishFailed { details: String },

    #[error("Event channel closed")]
    ChannelClosed,
}

pub type Result<T, E = FacecamError> = std::result::Result<T, E>;
