use crate::detector::FaceResult;
use crate::error::CaptureError;
use crate::frame::{FrameData, Orientation};
use crate::lens::LensFacing;
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;

/// A still capture that has been accepted but not yet resolved
#[derive(Debug, Clone)]
pub struct CaptureRequest {
    pub id: Uuid,
    pub destination: PathBuf,
    pub requested_at: SystemTime,
    pub lens: LensFacing,
}

impl CaptureRequest {
    pub fn new(destination: PathBuf, lens: LensFacing) -> Self {
        Self {
            id: Uuid::new_v4(),
            destination,
            requested_at: SystemTime::now(),
            lens,
        }
    }
}

/// A photo that has been written to storage
#[derive(Debug, Clone)]
pub struct CapturedImage {
    pub request_id: Uuid,
    pub destination: PathBuf,
    pub lens: LensFacing,
    pub orientation: Orientation,
    /// Encoded JPEG bytes, shared with the detection stage
    pub image: FrameData,
}

impl CapturedImage {
    pub fn destination(&self) -> &Path {
        &self.destination
    }

    pub fn file_name(&self) -> Option<&str> {
        self.destination.file_name().and_then(|n| n.to_str())
    }

    pub fn captured_at(&self) -> SystemTime {
        self.image.timestamp
    }

    pub fn byte_len(&self) -> usize {
        self.image.data.len()
    }
}

/// Result of the capture itself, independent of detection
#[derive(Debug, Clone)]
pub enum CaptureOutcome {
    Saved(CapturedImage),
    Failed(CaptureError),
}

impl CaptureOutcome {
    pub fn is_saved(&self) -> bool {
        matches!(self, CaptureOutcome::Saved(_))
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        match self {
            CaptureOutcome::Saved(image) => Some(image),
            CaptureOutcome::Failed(_) => None,
        }
    }

    pub fn error(&self) -> Option<&CaptureError> {
        match self {
            CaptureOutcome::Saved(_) => None,
            CaptureOutcome::Failed(e) => Some(e),
        }
    }
}

/// Faces found in an image, or the `DetectionFailed` that replaced them
pub type FaceDelivery = Result<FaceResult, CaptureError>;

/// Terminal report for one capture request
#[derive(Debug, Clone)]
pub struct CaptureReport {
    pub request: CaptureRequest,
    pub outcome: CaptureOutcome,
    /// Present once detection ran, which only happens for saved photos
    pub faces: Option<FaceDelivery>,
}

impl CaptureReport {
    pub fn is_saved(&self) -> bool {
        self.outcome.is_saved()
    }

    pub fn face_count(&self) -> usize {
        match &self.faces {
            Some(Ok(result)) => result.len(),
            _ => 0,
        }
    }
}
