use crate::camera::{AnalysisFrame, AnalysisStream};
use crate::detector::{detect_faces, FaceDetector, FaceResult};
use crate::error::DetectorError;
use crate::lens::LensFacing;
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, trace, warn};

/// Counters for the live analysis stream
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct PipelineStats {
    /// Frames the detector finished successfully
    pub analyzed: u64,
    /// Frames released unanalyzed because an analysis was already pending
    pub dropped: u64,
    /// Frames the detector rejected or timed out on
    pub failed: u64,
    /// Frames released unanalyzed because live analysis is disabled
    pub skipped: u64,
    /// Results that arrived after the stream they belonged to was detached
    pub late_discarded: u64,
    pub in_flight: bool,
}

/// Result of one live-frame analysis, posted back to the session worker
#[derive(Debug)]
pub struct FrameAnalysisDone {
    pub frame_id: u64,
    pub lens: LensFacing,
    pub result: Result<FaceResult, DetectorError>,
    epoch: u64,
}

#[derive(Debug, Clone, Copy)]
struct InFlight {
    frame_id: u64,
    epoch: u64,
}

/// Feeds live frames to the stream detector, one at a time.
///
/// Owned by the session worker. Frames that arrive while an analysis is
/// pending are released straight away and counted as dropped; the analyzed
/// frame is released as soon as the detector returns.
pub struct FrameAnalysisPipeline {
    detector: Arc<dyn FaceDetector>,
    detection_timeout: Duration,
    enabled: bool,
    stream: Option<AnalysisStream>,
    lens: LensFacing,
    epoch: u64,
    in_flight: Option<InFlight>,
    stats: PipelineStats,
}

impl FrameAnalysisPipeline {
    pub fn new(detector: Arc<dyn FaceDetector>, detection_timeout: Duration, enabled: bool) -> Self {
        Self {
            detector,
            detection_timeout,
            enabled,
            stream: None,
            lens: LensFacing::default(),
            epoch: 0,
            in_flight: None,
            stats: PipelineStats::default(),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.enabled
    }

    pub fn is_attached(&self) -> bool {
        self.stream.is_some()
    }

    /// Start consuming `stream`, replacing any previous one
    pub fn attach(&mut self, stream: AnalysisStream, lens: LensFacing) {
        self.detach();
        debug!(
            "Analysis pipeline attached to {} camera (live analysis {})",
            lens,
            if self.enabled { "on" } else { "off" }
        );
        self.stream = Some(stream);
        self.lens = lens;
    }

    /// Stop consuming frames; results still pending become stale
    pub fn detach(&mut self) {
        if self.stream.take().is_some() {
            debug!("Analysis pipeline detached from {} camera", self.lens);
        }
        self.epoch += 1;
        self.in_flight = None;
    }

    /// Next frame of the attached stream.
    ///
    /// Never resolves while detached, so it can sit in a `select!` arm.
    pub async fn next_frame(&mut self) -> Option<AnalysisFrame> {
        match self.stream.as_mut() {
            Some(stream) => stream.next_frame().await,
            None => std::future::pending().await,
        }
    }

    /// Hand a frame to the detector or release it.
    ///
    /// `on_done` runs on the analysis task once the frame has been released.
    pub fn dispatch<F>(&mut self, frame: AnalysisFrame, on_done: F)
    where
        F: FnOnce(FrameAnalysisDone) + Send + 'static,
    {
        if !self.enabled || self.stream.is_none() {
            self.stats.skipped += 1;
            frame.release();
            return;
        }

        if let Some(busy) = self.in_flight {
            trace!(
                "Frame {} dropped, frame {} still being analyzed",
                frame.id(),
                busy.frame_id
            );
            self.stats.dropped += 1;
            frame.release();
            return;
        }

        let frame_id = frame.id();
        let epoch = self.epoch;
        let lens = self.lens;
        let detector = Arc::clone(&self.detector);
        let limit = self.detection_timeout;
        self.in_flight = Some(InFlight { frame_id, epoch });

        tokio::spawn(async move {
            let result =
                detect_faces(detector.as_ref(), frame.frame(), frame.orientation(), limit).await;
            frame.release();
            on_done(FrameAnalysisDone {
                frame_id,
                lens,
                result,
                epoch,
            });
        });
    }

    /// Record a finished analysis.
    ///
    /// Returns the result when it belongs to the current stream; stale results
    /// are counted and swallowed.
    pub fn complete(&mut self, done: FrameAnalysisDone) -> Option<FrameAnalysisDone> {
        if done.epoch != self.epoch {
            trace!("Discarding analysis of frame {} from a detached stream", done.frame_id);
            self.stats.late_discarded += 1;
            return None;
        }

        if matches!(self.in_flight, Some(f) if f.frame_id == done.frame_id) {
            self.in_flight = None;
        }

        match &done.result {
            Ok(_) => self.stats.analyzed += 1,
            Err(e) => {
                warn!("Live analysis of frame {} failed: {}", done.frame_id, e);
                self.stats.failed += 1;
            }
        }
        Some(done)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            in_flight: self.in_flight.is_some(),
            ..self.stats
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::camera::{frame_channel, FrameProducer};
    use crate::detector::{DetectorOptions, MockFaceDetector};
    use crate::frame::{FrameData, FrameFormat, Orientation};
    use std::time::SystemTime;
    use tokio::sync::mpsc;
    use tokio::time::timeout;

    fn frame(id: u64) -> FrameData {
        FrameData::new(id, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24)
    }

    fn setup(
        detector: Arc<MockFaceDetector>,
        budget: usize,
        enabled: bool,
    ) -> (FrameAnalysisPipeline, FrameProducer) {
        let (producer, stream) = frame_channel(budget);
        let mut pipeline =
            FrameAnalysisPipeline::new(detector, Duration::from_millis(500), enabled);
        pipeline.attach(stream, LensFacing::Back);
        (pipeline, producer)
    }

    async fn pump(
        pipeline: &mut FrameAnalysisPipeline,
        tx: &mpsc::UnboundedSender<FrameAnalysisDone>,
    ) {
        let next = timeout(Duration::from_millis(200), pipeline.next_frame())
            .await
            .unwrap()
            .unwrap();
        let tx = tx.clone();
        pipeline.dispatch(next, move |done| {
            let _ = tx.send(done);
        });
    }

    #[tokio::test]
    async fn test_frames_dropped_while_analysis_pending() {
        let detector = Arc::new(MockFaceDetector::with_faces(DetectorOptions::real_time(), 1));
        detector.hold();
        let (mut pipeline, producer) = setup(Arc::clone(&detector), 3, true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(producer.offer(frame(1), Orientation::Rotate0));
        assert!(producer.offer(frame(2), Orientation::Rotate0));
        assert!(producer.offer(frame(3), Orientation::Rotate0));

        pump(&mut pipeline, &tx).await;
        pump(&mut pipeline, &tx).await;
        pump(&mut pipeline, &tx).await;

        // Frames 2 and 3 were released immediately, frame 1 is with the detector
        assert_eq!(pipeline.stats().dropped, 2);
        assert!(pipeline.stats().in_flight);
        assert_eq!(producer.outstanding(), 1);

        detector.release();
        let done = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(done.frame_id, 1);
        assert_eq!(producer.outstanding(), 0);

        let done = pipeline.complete(done).unwrap();
        assert_eq!(done.result.unwrap().len(), 1);
        let stats = pipeline.stats();
        assert_eq!(stats.analyzed, 1);
        assert!(!stats.in_flight);
        assert_eq!(detector.seen_frames(), vec![1]);
    }

    #[tokio::test]
    async fn test_held_frames_starve_producer_until_released() {
        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::real_time()));
        detector.hold();
        let (mut pipeline, producer) = setup(Arc::clone(&detector), 1, true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(producer.offer(frame(1), Orientation::Rotate0));
        pump(&mut pipeline, &tx).await;

        // The only budget slot is with the detector
        assert!(!producer.offer(frame(2), Orientation::Rotate0));
        assert_eq!(producer.starved(), 1);

        detector.release();
        let done = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        pipeline.complete(done);

        assert!(producer.offer(frame(3), Orientation::Rotate0));
    }

    #[tokio::test]
    async fn test_disabled_pipeline_releases_frames() {
        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::real_time()));
        let (mut pipeline, producer) = setup(Arc::clone(&detector), 2, false);
        let (tx, _rx) = mpsc::unbounded_channel();

        assert!(producer.offer(frame(1), Orientation::Rotate0));
        pump(&mut pipeline, &tx).await;

        assert_eq!(pipeline.stats().skipped, 1);
        assert_eq!(producer.outstanding(), 0);
        assert_eq!(detector.call_count(), 0);
    }

    #[tokio::test]
    async fn test_detector_failure_counted_and_released() {
        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::real_time()));
        detector.fail_next("blurred frame");
        let (mut pipeline, producer) = setup(Arc::clone(&detector), 2, true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(producer.offer(frame(7), Orientation::Rotate90));
        pump(&mut pipeline, &tx).await;

        let done = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        let done = pipeline.complete(done).unwrap();
        assert!(done.result.is_err());
        assert_eq!(pipeline.stats().failed, 1);
        assert_eq!(producer.outstanding(), 0);
    }

    #[tokio::test]
    async fn test_results_after_detach_are_discarded() {
        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::real_time()));
        detector.hold();
        let (mut pipeline, producer) = setup(Arc::clone(&detector), 2, true);
        let (tx, mut rx) = mpsc::unbounded_channel();

        assert!(producer.offer(frame(1), Orientation::Rotate0));
        pump(&mut pipeline, &tx).await;
        pipeline.detach();
        assert!(!pipeline.is_attached());

        detector.release();
        let done = timeout(Duration::from_millis(500), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert!(pipeline.complete(done).is_none());
        assert_eq!(pipeline.stats().late_discarded, 1);
        assert_eq!(pipeline.stats().analyzed, 0);
    }

    #[tokio::test]
    async fn test_detached_pipeline_never_yields() {
        let detector = Arc::new(MockFaceDetector::new(DetectorOptions::real_time()));
        let mut pipeline = FrameAnalysisPipeline::new(detector, Duration::from_millis(100), true);

        let next = timeout(Duration::from_millis(50), pipeline.next_frame()).await;
        assert!(next.is_err());
    }
}
