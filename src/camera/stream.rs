//! Analysis frame hand-off between a camera device and the session.
//!
//! The producer owns a fixed budget of outstanding frames. Each delivered
//! [`AnalysisFrame`] holds one unit of that budget until it is released, so a
//! consumer that stops releasing frames starves the producer, which then drops
//! frames at the source instead of queueing them.

use crate::frame::{FrameData, Orientation};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::{mpsc, OwnedSemaphorePermit, Semaphore};
use tracing::trace;

#[derive(Debug, Default)]
struct StreamCounters {
    delivered: AtomicU64,
    starved: AtomicU64,
}

/// Create a producer/stream pair with `budget` outstanding frames
pub fn frame_channel(budget: usize) -> (FrameProducer, AnalysisStream) {
    let budget = budget.max(1);
    let permits = Arc::new(Semaphore::new(budget));
    let counters = Arc::new(StreamCounters::default());
    let (tx, rx) = mpsc::channel(budget);

    (
        FrameProducer {
            tx,
            permits,
            budget,
            counters: Arc::clone(&counters),
        },
        AnalysisStream { rx, counters },
    )
}

/// Camera-side end of an analysis stream
#[derive(Debug, Clone)]
pub struct FrameProducer {
    tx: mpsc::Sender<AnalysisFrame>,
    permits: Arc<Semaphore>,
    budget: usize,
    counters: Arc<StreamCounters>,
}

impl FrameProducer {
    /// Offer a frame; returns false if it was dropped because the budget is
    /// exhausted or the stream has gone away
    pub fn offer(&self, frame: FrameData, orientation: Orientation) -> bool {
        let permit = match Arc::clone(&self.permits).try_acquire_owned() {
            Ok(permit) => permit,
            Err(_) => {
                self.counters.starved.fetch_add(1, Ordering::Relaxed);
                trace!("Analysis budget exhausted, dropping frame {}", frame.id);
                return false;
            }
        };

        let analysis_frame = AnalysisFrame {
            frame,
            orientation,
            received_at: Instant::now(),
            _permit: permit,
        };

        // The channel has room for the whole budget, so a permit holder never
        // finds it full.
        match self.tx.try_send(analysis_frame) {
            Ok(()) => {
                self.counters.delivered.fetch_add(1, Ordering::Relaxed);
                true
            }
            Err(_) => false,
        }
    }

    /// Frames delivered but not yet released
    pub fn outstanding(&self) -> usize {
        self.budget - self.permits.available_permits()
    }

    pub fn budget(&self) -> usize {
        self.budget
    }

    /// Frames dropped because the consumer held the whole budget
    pub fn starved(&self) -> u64 {
        self.counters.starved.load(Ordering::Relaxed)
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Session-side end of an analysis stream
#[derive(Debug)]
pub struct AnalysisStream {
    rx: mpsc::Receiver<AnalysisFrame>,
    counters: Arc<StreamCounters>,
}

impl AnalysisStream {
    /// Next frame, or `None` once every producer is gone
    pub async fn next_frame(&mut self) -> Option<AnalysisFrame> {
        self.rx.recv().await
    }

    pub fn delivered(&self) -> u64 {
        self.counters.delivered.load(Ordering::Relaxed)
    }
}

/// One frame of the live stream.
///
/// Holds a unit of the producer's budget; call [`AnalysisFrame::release`] (or
/// drop it) as soon as processing is over.
#[derive(Debug)]
pub struct AnalysisFrame {
    frame: FrameData,
    orientation: Orientation,
    received_at: Instant,
    _permit: OwnedSemaphorePermit,
}

impl AnalysisFrame {
    pub fn frame(&self) -> &FrameData {
        &self.frame
    }

    pub fn id(&self) -> u64 {
        self.frame.id
    }

    pub fn orientation(&self) -> Orientation {
        self.orientation
    }

    pub fn received_at(&self) -> Instant {
        self.received_at
    }

    /// Return this frame's buffer slot to the producer
    pub fn release(self) {
        trace!("Releasing analysis frame {}", self.frame.id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::frame::FrameFormat;
    use std::time::{Duration, SystemTime};
    use tokio::time::timeout;

    fn frame(id: u64) -> FrameData {
        FrameData::new(id, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24)
    }

    #[tokio::test]
    async fn test_unreleased_frames_stall_producer() {
        let (producer, mut stream) = frame_channel(2);

        assert!(producer.offer(frame(1), Orientation::Rotate0));
        assert!(producer.offer(frame(2), Orientation::Rotate0));

        let first = stream.next_frame().await.unwrap();
        let second = stream.next_frame().await.unwrap();
        assert_eq!(producer.outstanding(), 2);

        // Budget exhausted while both frames are held
        assert!(!producer.offer(frame(3), Orientation::Rotate0));
        assert_eq!(producer.starved(), 1);

        first.release();
        assert_eq!(producer.outstanding(), 1);
        assert!(producer.offer(frame(4), Orientation::Rotate0));

        second.release();
        let next = stream.next_frame().await.unwrap();
        assert_eq!(next.id(), 4);
        next.release();

        assert_eq!(producer.outstanding(), 0);
        assert_eq!(stream.delivered(), 3);
    }

    #[tokio::test]
    async fn test_dropped_frame_releases_slot() {
        let (producer, mut stream) = frame_channel(1);

        assert!(producer.offer(frame(1), Orientation::Rotate90));
        let held = stream.next_frame().await.unwrap();
        assert_eq!(held.orientation(), Orientation::Rotate90);
        drop(held);

        assert!(producer.offer(frame(2), Orientation::Rotate90));
    }

    #[tokio::test]
    async fn test_stream_ends_when_producer_dropped() {
        let (producer, mut stream) = frame_channel(2);
        drop(producer);

        let next = timeout(Duration::from_millis(100), stream.next_frame())
            .await
            .unwrap();
        assert!(next.is_none());
    }

    #[tokio::test]
    async fn test_offer_fails_once_stream_dropped() {
        let (producer, stream) = frame_channel(2);
        drop(stream);

        assert!(producer.is_closed());
        assert!(!producer.offer(frame(1), Orientation::Rotate0));
        assert_eq!(producer.outstanding(), 0);
    }
}
