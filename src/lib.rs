pub mod analyzer;
pub mod app;
pub mod camera;
pub mod capture;
pub mod config;
pub mod detector;
pub mod error;
pub mod events;
pub mod frame;
pub mod keyboard_input;
pub mod lens;
pub mod permission;
pub mod storage;

#[cfg(test)]
pub(crate) mod test_support;

pub use analyzer::{FrameAnalysisPipeline, PipelineStats};
pub use app::{ComponentState, FacecamApp, ShutdownReason};
pub use camera::{
    CameraBackend, CameraDevice, CameraSession, CameraSessionBuilder, SessionConfig,
    SessionState, SimulatedCameraBackend,
};
pub use capture::{CaptureOutcome, CaptureReport, CaptureRequest, CapturedImage};
pub use config::FacecamConfig;
pub use detector::{FaceDetector, FaceRecord, FaceResult};
pub use error::{CaptureError, FacecamError, Result, SessionError};
pub use events::{EventBus, EventFilter, EventReceiver, FaceSource, SessionEvent};
pub use frame::{FrameData, FrameFormat};
pub use lens::LensFacing;
pub use permission::{PermissionGate, PermissionProvider, PermissionState};
pub use storage::{FileImageStorage, ImageStorage};
