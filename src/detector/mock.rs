use super::options::DetectorOptions;
use super::record::{BoundingBox, FaceRecord};
use super::FaceDetector;
use crate::error::DetectorError;
use crate::frame::{FrameData, Orientation};
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Semaphore;
use tracing::trace;

/// Scripted detector for simulated runs and tests.
///
/// Answers come from a queue of scripted results, falling back to a fixed set
/// of faces. Calls can be held open to keep an analysis in flight.
pub struct MockFaceDetector {
    options: DetectorOptions,
    default_faces: Vec<FaceRecord>,
    script: Mutex<VecDeque<Result<Vec<FaceRecord>, DetectorError>>>,
    calls: AtomicUsize,
    seen_frames: Mutex<Vec<u64>>,
    latency: Mutex<Duration>,
    hold: AtomicBool,
    gate: Arc<Semaphore>,
}

impl MockFaceDetector {
    pub fn new(options: DetectorOptions) -> Self {
        Self {
            options,
            default_faces: Vec::new(),
            script: Mutex::new(VecDeque::new()),
            calls: AtomicUsize::new(0),
            seen_frames: Mutex::new(Vec::new()),
            latency: Mutex::new(Duration::ZERO),
            hold: AtomicBool::new(false),
            gate: Arc::new(Semaphore::new(0)),
        }
    }

    /// Detector that reports `count` faces laid out side by side
    pub fn with_faces(options: DetectorOptions, count: usize) -> Self {
        let faces = (0..count)
            .map(|i| {
                let left = 40 + i as i32 * 160;
                FaceRecord::with_bounds(BoundingBox::new(left, 60, left + 120, 200))
            })
            .collect();
        Self::new(options).default_faces(faces)
    }

    pub fn default_faces(mut self, faces: Vec<FaceRecord>) -> Self {
        self.default_faces = faces;
        self
    }

    /// Queue a one-shot answer ahead of the default
    pub fn push_result(&self, result: Result<Vec<FaceRecord>, DetectorError>) {
        self.script.lock().push_back(result);
    }

    pub fn fail_next(&self, details: &str) {
        self.push_result(Err(DetectorError::Failed {
            details: details.to_string(),
        }));
    }

    pub fn set_latency(&self, latency: Duration) {
        *self.latency.lock() = latency;
    }

    /// Keep calls pending until `release` is called
    pub fn hold(&self) {
        self.hold.store(true, Ordering::SeqCst);
    }

    /// Let one held call complete
    pub fn release(&self) {
        self.gate.add_permits(1);
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Frame ids in the order they were analyzed
    pub fn seen_frames(&self) -> Vec<u64> {
        self.seen_frames.lock().clone()
    }
}

#[async_trait]
impl FaceDetector for MockFaceDetector {
    async fn analyze(
        &self,
        frame: &FrameData,
        orientation: Orientation,
    ) -> Result<Vec<FaceRecord>, DetectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen_frames.lock().push(frame.id);
        trace!(
            "Mock detector analyzing frame {} ({}x{}, {} degrees)",
            frame.id,
            frame.width,
            frame.height,
            orientation.degrees()
        );

        if self.hold.load(Ordering::SeqCst) {
            let permit = self.gate.acquire().await.map_err(|_| DetectorError::Failed {
                details: "detector gate closed".to_string(),
            })?;
            permit.forget();
        }

        let latency = *self.latency.lock();
        if !latency.is_zero() {
            tokio::time::sleep(latency).await;
        }

        let scripted = self.script.lock().pop_front();
        let faces = match scripted {
            Some(result) => result?,
            None => self.default_faces.clone(),
        };

        Ok(faces.into_iter().map(|f| self.options.shape(f)).collect())
    }

    fn options(&self) -> &DetectorOptions {
        &self.options
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::detector::detect_faces;
    use crate::frame::FrameFormat;
    use std::time::SystemTime;

    fn frame(id: u64) -> FrameData {
        FrameData::new(id, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24)
    }

    #[tokio::test]
    async fn test_scripted_results_take_priority() {
        let detector = MockFaceDetector::with_faces(DetectorOptions::default(), 2);
        detector.fail_next("model not loaded");

        let first = detector.analyze(&frame(1), Orientation::Rotate0).await;
        assert!(matches!(first, Err(DetectorError::Failed { .. })));

        let second = detector.analyze(&frame(2), Orientation::Rotate0).await.unwrap();
        assert_eq!(second.len(), 2);
        assert_eq!(detector.call_count(), 2);
        assert_eq!(detector.seen_frames(), vec![1, 2]);
    }

    #[tokio::test]
    async fn test_detect_faces_times_out() {
        let detector = MockFaceDetector::with_faces(DetectorOptions::default(), 1);
        detector.hold();

        let result = detect_faces(
            &detector,
            &frame(1),
            Orientation::Rotate0,
            Duration::from_millis(20),
        )
        .await;

        assert_eq!(result, Err(DetectorError::Timeout { timeout_ms: 20 }));
    }
}
