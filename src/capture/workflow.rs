//! Suspending stages of a still capture.
//!
//! Both stages run on spawned tasks and report back to the session worker,
//! which owns ordering, event publication and the in-flight slot.

use super::naming::with_suffix;
use super::request::{CaptureRequest, CapturedImage};
use crate::camera::{CameraDevice, StillPicture};
use crate::detector::{detect_faces, FaceDetector, FaceResult};
use crate::error::{CameraError, CaptureError};
use crate::frame::{FrameData, FrameFormat};
use crate::storage::ImageStorage;
use std::io;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tracing::{debug, error, info, warn};

static STILL_COUNTER: AtomicU64 = AtomicU64::new(0);

/// Why the capture stage did not produce an image
#[derive(Debug, Clone)]
pub(crate) struct StageFailure {
    pub error: CaptureError,
    /// The camera did not answer within the capture bound
    pub timed_out: bool,
}

impl StageFailure {
    fn failed(error: CaptureError) -> Self {
        Self {
            error,
            timed_out: false,
        }
    }
}

/// Tries made for a free file name before the capture gives up
const MAX_NAME_ATTEMPTS: u32 = 16;

/// Take the picture and write it next to `request.destination`.
///
/// `limit` bounds the picture and the write together. If the name is taken
/// by the time the file is created, the next `-N` name is used instead; an
/// existing photo is never touched. No file is left behind on failure.
pub(crate) async fn perform_capture(
    request: &CaptureRequest,
    device: Arc<dyn CameraDevice>,
    storage: Arc<dyn ImageStorage>,
    limit: Duration,
) -> Result<CapturedImage, StageFailure> {
    debug!("Capture {} started on {} camera", request.id, request.lens);

    let mut writing = None;
    let staged = tokio::time::timeout(
        limit,
        take_and_write(request, device.as_ref(), storage.as_ref(), &mut writing),
    )
    .await;

    let (destination, picture) = match staged {
        Ok(result) => result?,
        Err(_) => {
            warn!("Capture {} timed out after {:?}", request.id, limit);
            if let Some(partial) = writing {
                discard_partial(storage.as_ref(), &partial).await;
            }
            return Err(StageFailure {
                error: CaptureError::CaptureFailed {
                    reason: format!("capture timed out after {}ms", limit.as_millis()),
                },
                timed_out: true,
            });
        }
    };

    info!(
        "Capture {} written to {} ({} bytes)",
        request.id,
        destination.display(),
        picture.jpeg.len()
    );

    Ok(CapturedImage {
        request_id: request.id,
        destination,
        lens: request.lens,
        orientation: picture.orientation,
        image: FrameData::new(
            STILL_COUNTER.fetch_add(1, Ordering::Relaxed),
            SystemTime::now(),
            picture.jpeg,
            picture.width,
            picture.height,
            FrameFormat::Jpeg,
        ),
    })
}

/// `writing` holds the file being written while a write is underway
async fn take_and_write(
    request: &CaptureRequest,
    device: &dyn CameraDevice,
    storage: &dyn ImageStorage,
    writing: &mut Option<PathBuf>,
) -> Result<(PathBuf, StillPicture), StageFailure> {
    let picture = device.take_picture().await.map_err(|e| {
        error!("Camera failed to take picture {}: {}", request.id, e);
        StageFailure::failed(capture_failed(&e))
    })?;

    if picture.jpeg.is_empty() {
        return Err(StageFailure::failed(CaptureError::CaptureFailed {
            reason: "camera returned an empty image".to_string(),
        }));
    }

    for attempt in 0..MAX_NAME_ATTEMPTS {
        let candidate = with_suffix(&request.destination, attempt);
        if attempt > 0 && storage.exists(&candidate).await {
            continue;
        }

        *writing = Some(candidate.clone());
        match storage.write_image(&picture.jpeg, &candidate).await {
            Ok(()) => {
                *writing = None;
                return Ok((candidate, picture));
            }
            Err(e) if e.kind() == io::ErrorKind::AlreadyExists => {
                // Someone else's file
                *writing = None;
                debug!("{} is taken, trying the next name", candidate.display());
            }
            Err(e) => {
                error!("Failed to write {}: {}", candidate.display(), e);
                discard_partial(storage, &candidate).await;
                *writing = None;
                return Err(StageFailure::failed(CaptureError::from(e)));
            }
        }
    }

    Err(StageFailure::failed(CaptureError::CaptureFailed {
        reason: format!(
            "no free file name for {} after {} attempts",
            request.destination.display(),
            MAX_NAME_ATTEMPTS
        ),
    }))
}

/// Run the still detector once over a saved photo
pub(crate) async fn run_detection(
    detector: Arc<dyn FaceDetector>,
    image: CapturedImage,
    limit: Duration,
) -> Result<FaceResult, CaptureError> {
    detect_faces(detector.as_ref(), &image.image, image.orientation, limit)
        .await
        .map_err(|e| {
            warn!("Face detection failed for {}: {}", image.destination.display(), e);
            CaptureError::DetectionFailed {
                reason: e.to_string(),
            }
        })
}

/// Remove a file that outlived its request
pub(crate) async fn discard_late_image(storage: Arc<dyn ImageStorage>, image: CapturedImage) {
    info!(
        "Discarding {} written after its capture was cancelled",
        image.destination.display()
    );
    if let Err(e) = storage.discard(&image.destination).await {
        warn!("Failed to remove {}: {}", image.destination.display(), e);
    }
}

async fn discard_partial(storage: &dyn ImageStorage, partial: &Path) {
    if let Err(e) = storage.discard(partial).await {
        warn!("Failed to remove partial image {}: {}", partial.display(), e);
    }
}

fn capture_failed(e: &CameraError) -> CaptureError {
    CaptureError::CaptureFailed {
        reason: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{CameraBackend, MockCameraBackend};
    use crate::detector::{DetectorOptions, MockFaceDetector};
    use crate::lens::LensFacing;
    use crate::storage::{FileImageStorage, MemoryImageStorage};

    fn request(name: &str) -> CaptureRequest {
        CaptureRequest::new(PathBuf::from("/photos").join(name), LensFacing::Back)
    }

    async fn device(backend: &MockCameraBackend) -> Arc<dyn CameraDevice> {
        let device = backend.open(LensFacing::Back).await.unwrap();
        device.attach_capture().await.unwrap();
        device
    }

    #[tokio::test]
    async fn test_capture_writes_image() {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        let request = request("a.jpg");

        let image = perform_capture(
            &request,
            device(&backend).await,
            storage.clone(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(image.request_id, request.id);
        assert_eq!(image.image.format, FrameFormat::Jpeg);
        assert_eq!(
            storage.file(&request.destination).unwrap(),
            image.image.data.as_ref().clone()
        );
    }

    #[tokio::test]
    async fn test_camera_failure_leaves_no_file() {
        let backend = MockCameraBackend::new();
        backend.fail_captures("shutter jammed");
        let storage = Arc::new(MemoryImageStorage::new("/photos"));

        let failure = perform_capture(
            &request("b.jpg"),
            device(&backend).await,
            storage.clone(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, CaptureError::CaptureFailed { .. }));
        assert!(!failure.timed_out);
        assert_eq!(storage.file_count(), 0);
    }

    #[tokio::test]
    async fn test_storage_failure_removes_partial_file() {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        storage.fail_writes("disk full");

        let failure = perform_capture(
            &request("c.jpg"),
            device(&backend).await,
            storage.clone(),
            Duration::from_secs(1),
        )
        .await
        .unwrap_err();

        assert!(matches!(failure.error, CaptureError::Io { .. }));
        assert_eq!(storage.file_count(), 0);
    }

    #[tokio::test]
    async fn test_capture_timeout_is_flagged() {
        let backend = MockCameraBackend::new();
        backend.hold_captures();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));

        let failure = perform_capture(
            &request("d.jpg"),
            device(&backend).await,
            storage,
            Duration::from_millis(20),
        )
        .await
        .unwrap_err();

        assert!(failure.timed_out);
        assert!(matches!(failure.error, CaptureError::CaptureFailed { .. }));
    }

    #[tokio::test]
    async fn test_detection_error_maps_to_detection_failed() {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        let image = perform_capture(
            &request("e.jpg"),
            device(&backend).await,
            storage,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::high_accuracy()));
        detector.fail_next("model not loaded");

        let result = run_detection(detector.clone(), image, Duration::from_secs(1)).await;
        assert!(matches!(result, Err(CaptureError::DetectionFailed { .. })));
        assert_eq!(detector.call_count(), 1);
    }

    #[tokio::test]
    async fn test_taken_name_moves_to_next_suffix() {
        let dir = tempfile::tempdir().unwrap();
        let storage = Arc::new(FileImageStorage::new(dir.path()).prepare().await);
        let earlier = dir.path().join("taken.jpg");
        std::fs::write(&earlier, b"earlier").unwrap();

        let backend = MockCameraBackend::new();
        let request = CaptureRequest::new(earlier.clone(), LensFacing::Back);

        let image = perform_capture(
            &request,
            device(&backend).await,
            storage,
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(image.destination, dir.path().join("taken-1.jpg"));
        assert_eq!(std::fs::read(&earlier).unwrap(), b"earlier");
        assert_eq!(
            std::fs::read(&image.destination).unwrap(),
            image.image.data.as_ref().clone()
        );
    }

    #[tokio::test]
    async fn test_taken_names_are_skipped_in_memory() {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        storage.insert(Path::new("/photos/f.jpg"), b"one");
        storage.insert(Path::new("/photos/f-1.jpg"), b"two");

        let image = perform_capture(
            &request("f.jpg"),
            device(&backend).await,
            storage.clone(),
            Duration::from_secs(1),
        )
        .await
        .unwrap();

        assert_eq!(image.destination, PathBuf::from("/photos/f-2.jpg"));
        assert_eq!(storage.file(Path::new("/photos/f.jpg")), Some(b"one".to_vec()));
        assert_eq!(storage.file_count(), 3);
    }

    #[tokio::test]
    async fn test_stalled_write_times_out() {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        storage.hold_writes();

        let failure = perform_capture(
            &request("g.jpg"),
            device(&backend).await,
            storage.clone(),
            Duration::from_millis(50),
        )
        .await
        .unwrap_err();

        assert!(failure.timed_out);
        assert!(matches!(failure.error, CaptureError::CaptureFailed { .. }));

        // A write finishing after the deadline has nothing to land on
        storage.release_write();
        tokio::task::yield_now().await;
        assert_eq!(storage.file_count(), 0);
    }
}
