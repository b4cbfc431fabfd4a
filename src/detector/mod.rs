mod mock;
mod options;
mod record;

pub use mock::MockFaceDetector;
pub use options::{ClassificationMode, ContourMode, DetectorOptions, LandmarkMode, PerformanceMode};
pub use record::{
    BoundingBox, Contour, ContourType, FaceRecord, FaceResult, Landmark, LandmarkType, Point,
};

use crate::error::DetectorError;
use crate::frame::{FrameData, Orientation};
use async_trait::async_trait;
use std::time::Duration;
use tracing::{debug, warn};

/// Face detection capability.
///
/// Treated as opaque: it eventually completes with the faces found in the
/// buffer or fails.
#[async_trait]
pub trait FaceDetector: Send + Sync {
    async fn analyze(
        &self,
        frame: &FrameData,
        orientation: Orientation,
    ) -> Result<Vec<FaceRecord>, DetectorError>;

    /// Options this detector was constructed with
    fn options(&self) -> &DetectorOptions;
}

/// Run one detection under a time bound
pub async fn detect_faces(
    detector: &dyn FaceDetector,
    frame: &FrameData,
    orientation: Orientation,
    limit: Duration,
) -> Result<FaceResult, DetectorError> {
    match tokio::time::timeout(limit, detector.analyze(frame, orientation)).await {
        Ok(Ok(faces)) => {
            debug!("Detector found {} face(s) in frame {}", faces.len(), frame.id);
            Ok(FaceResult::new(faces))
        }
        Ok(Err(e)) => Err(e),
        Err(_) => {
            warn!("Detection timed out after {:?} on frame {}", limit, frame.id);
            Err(DetectorError::Timeout {
                timeout_ms: limit.as_millis() as u64,
            })
        }
    }
}
