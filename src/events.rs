use crate::camera::SessionState;
use crate::capture::CaptureOutcome;
use crate::detector::FaceResult;
use crate::error::{CaptureError, EventBusError};
use crate::lens::LensFacing;
use std::path::PathBuf;
use std::time::SystemTime;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What a published face result was computed from
#[derive(Debug, Clone, PartialEq)]
pub enum FaceSource {
    /// A saved still photo
    Still {
        request_id: Uuid,
        destination: PathBuf,
        lens: LensFacing,
    },
    /// One frame of the live analysis stream
    Frame { frame_id: u64, lens: LensFacing },
}

/// Events published to presentation subscribers
#[derive(Debug, Clone)]
pub enum SessionEvent {
    /// The camera session moved to a new lifecycle state
    SessionStateChanged {
        state: SessionState,
        lens: LensFacing,
        timestamp: SystemTime,
    },
    /// A still capture was saved or failed
    CaptureOutcome {
        request_id: Uuid,
        outcome: CaptureOutcome,
        timestamp: SystemTime,
    },
    /// Detection finished for a still or a live frame
    FaceResult {
        source: FaceSource,
        result: Result<FaceResult, CaptureError>,
        timestamp: SystemTime,
    },
}

impl SessionEvent {
    pub fn state_changed(state: SessionState, lens: LensFacing) -> Self {
        SessionEvent::SessionStateChanged {
            state,
            lens,
            timestamp: SystemTime::now(),
        }
    }

    pub fn capture_outcome(request_id: Uuid, outcome: CaptureOutcome) -> Self {
        SessionEvent::CaptureOutcome {
            request_id,
            outcome,
            timestamp: SystemTime::now(),
        }
    }

    pub fn face_result(source: FaceSource, result: Result<FaceResult, CaptureError>) -> Self {
        SessionEvent::FaceResult {
            source,
            result,
            timestamp: SystemTime::now(),
        }
    }

    /// Get the timestamp of the event
    pub fn timestamp(&self) -> SystemTime {
        match self {
            SessionEvent::SessionStateChanged { timestamp, .. } => *timestamp,
            SessionEvent::CaptureOutcome { timestamp, .. } => *timestamp,
            SessionEvent::FaceResult { timestamp, .. } => *timestamp,
        }
    }

    /// Get a human-readable description of the event
    pub fn description(&self) -> String {
        match self {
            SessionEvent::SessionStateChanged { state, lens, .. } => {
                format!("Session {} ({} camera)", state, lens)
            }
            SessionEvent::CaptureOutcome {
                request_id,
                outcome,
                ..
            } => match outcome {
                CaptureOutcome::Saved(image) => {
                    format!(
                        "Capture {} saved to {}",
                        request_id,
                        image.destination.display()
                    )
                }
                CaptureOutcome::Failed(e) => format!("Capture {} failed: {}", request_id, e),
            },
            SessionEvent::FaceResult { source, result, .. } => {
                let origin = match source {
                    FaceSource::Still { request_id, .. } => format!("capture {}", request_id),
                    FaceSource::Frame { frame_id, .. } => format!("frame {}", frame_id),
                };
                match result {
                    Ok(faces) => format!("{} face(s) in {}", faces.len(), origin),
                    Err(e) => format!("Detection for {} failed: {}", origin, e),
                }
            }
        }
    }

    /// Get the event type as a string for filtering
    pub fn event_type(&self) -> &'static str {
        match self {
            SessionEvent::SessionStateChanged { .. } => "session_state_changed",
            SessionEvent::CaptureOutcome { .. } => "capture_outcome",
            SessionEvent::FaceResult { .. } => "face_result",
        }
    }
}

/// Async event bus for presentation subscribers using broadcast channels
pub struct EventBus {
    sender: broadcast::Sender<SessionEvent>,
    debug_logging: bool,
}

impl EventBus {
    /// Create a new event bus with the specified channel capacity
    pub fn new(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: false,
        }
    }

    /// Create a new event bus with debug logging enabled
    pub fn with_debug_logging(capacity: usize) -> Self {
        let (sender, _) = broadcast::channel(capacity.max(1));
        Self {
            sender,
            debug_logging: true,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.sender.subscribe()
    }

    /// Subscribe with a filter and a name used in log lines
    pub fn receiver(&self, filter: EventFilter, name: impl Into<String>) -> EventReceiver {
        EventReceiver::new(self.sender.subscribe(), filter, name.into())
    }

    /// Publish an event to all subscribers.
    ///
    /// Fails with `PublishFailed` when nobody is listening.
    pub async fn publish(&self, event: SessionEvent) -> Result<usize, EventBusError> {
        if self.debug_logging {
            debug!("Publishing event: {}", event.description());
        }

        match &event {
            SessionEvent::SessionStateChanged { state, lens, .. } => match state {
                SessionState::Error => warn!("Camera session entered error state ({})", lens),
                SessionState::Bound => info!("Camera session bound to {} camera", lens),
                _ => debug!("Camera session {}", state),
            },
            SessionEvent::CaptureOutcome { outcome, .. } => match outcome {
                CaptureOutcome::Saved(image) => {
                    info!("Photo saved: {}", image.destination.display())
                }
                CaptureOutcome::Failed(e) => error!("Photo capture failed: {}", e),
            },
            SessionEvent::FaceResult { .. } => {
                if self.debug_logging {
                    debug!("Event: {}", event.description());
                }
            }
        }

        self.sender
            .send(event)
            .map_err(|e| EventBusError::PublishFailed {
                details: e.to_string(),
            })
    }

    /// Get the number of active subscribers
    pub fn subscriber_count(&self) -> usize {
        self.sender.receiver_count()
    }

    pub fn has_subscribers(&self) -> bool {
        self.sender.receiver_count() > 0
    }
}

impl Clone for EventBus {
    fn clone(&self) -> Self {
        Self {
            sender: self.sender.clone(),
            debug_logging: self.debug_logging,
        }
    }
}

/// Event filter for selective event handling
#[derive(Debug, Clone)]
pub enum EventFilter {
    /// Accept all events
    All,
    /// Accept only specific event types
    EventTypes(Vec<&'static str>),
    /// Accept face results from stills only, skipping the live stream
    StillsOnly,
    /// Custom filter function
    Custom(fn(&SessionEvent) -> bool),
}

impl EventFilter {
    /// Check if an event passes this filter
    pub fn matches(&self, event: &SessionEvent) -> bool {
        match self {
            EventFilter::All => true,
            EventFilter::EventTypes(types) => types.contains(&event.event_type()),
            EventFilter::StillsOnly => !matches!(
                event,
                SessionEvent::FaceResult {
                    source: FaceSource::Frame { .. },
                    ..
                }
            ),
            EventFilter::Custom(filter_fn) => filter_fn(event),
        }
    }
}

/// Event receiver with filtering
pub struct EventReceiver {
    receiver: broadcast::Receiver<SessionEvent>,
    filter: EventFilter,
    name: String,
}

impl EventReceiver {
    pub fn new(
        receiver: broadcast::Receiver<SessionEvent>,
        filter: EventFilter,
        name: String,
    ) -> Self {
        Self {
            receiver,
            filter,
            name,
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Receive the next filtered event
    pub async fn recv(&mut self) -> Result<SessionEvent, EventBusError> {
        loop {
            match self.receiver.recv().await {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        debug!(
                            "Receiver '{}' received event: {}",
                            self.name,
                            event.description()
                        );
                        return Ok(event);
                    }
                }
                Err(broadcast::error::RecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::RecvError::Closed) => {
                    debug!("Event bus closed for receiver '{}'", self.name);
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }

    /// Try to receive an event without blocking
    pub fn try_recv(&mut self) -> Result<Option<SessionEvent>, EventBusError> {
        loop {
            match self.receiver.try_recv() {
                Ok(event) => {
                    if self.filter.matches(&event) {
                        return Ok(Some(event));
                    }
                }
                Err(broadcast::error::TryRecvError::Empty) => {
                    return Ok(None);
                }
                Err(broadcast::error::TryRecvError::Lagged(n)) => {
                    warn!("Receiver '{}' lagged behind by {} events", self.name, n);
                    return Err(EventBusError::PublishFailed {
                        details: format!("Receiver lagged behind by {} events", n),
                    });
                }
                Err(broadcast::error::TryRecvError::Closed) => {
                    return Err(EventBusError::ChannelClosed);
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::time::{timeout, Duration};

    fn frame_faces(frame_id: u64) -> SessionEvent {
        SessionEvent::face_result(
            FaceSource::Frame {
                frame_id,
                lens: LensFacing::Back,
            },
            Ok(FaceResult::empty()),
        )
    }

    #[tokio::test]
    async fn test_event_bus_basic_operations() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.subscribe();

        let subscriber_count = event_bus
            .publish(SessionEvent::state_changed(
                SessionState::Binding,
                LensFacing::Front,
            ))
            .await
            .unwrap();
        assert_eq!(subscriber_count, 1);

        match receiver.recv().await.unwrap() {
            SessionEvent::SessionStateChanged { state, lens, .. } => {
                assert_eq!(state, SessionState::Binding);
                assert_eq!(lens, LensFacing::Front);
            }
            other => panic!("Unexpected event: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_publish_without_subscribers_fails() {
        let event_bus = EventBus::new(4);
        let result = event_bus.publish(frame_faces(1)).await;
        assert!(matches!(result, Err(EventBusError::PublishFailed { .. })));
    }

    #[tokio::test]
    async fn test_multiple_subscribers() {
        let event_bus = EventBus::new(10);
        let mut receiver1 = event_bus.subscribe();
        let mut receiver2 = event_bus.subscribe();
        assert_eq!(event_bus.subscriber_count(), 2);

        event_bus.publish(frame_faces(3)).await.unwrap();

        let _ = timeout(Duration::from_millis(100), receiver1.recv())
            .await
            .unwrap()
            .unwrap();
        let _ = timeout(Duration::from_millis(100), receiver2.recv())
            .await
            .unwrap()
            .unwrap();
    }

    #[test]
    fn test_event_filter() {
        let filter = EventFilter::EventTypes(vec!["session_state_changed"]);

        assert!(filter.matches(&SessionEvent::state_changed(
            SessionState::Bound,
            LensFacing::Back
        )));
        assert!(!filter.matches(&frame_faces(1)));
    }

    #[test]
    fn test_stills_only_filter_skips_stream_results() {
        let still = SessionEvent::face_result(
            FaceSource::Still {
                request_id: Uuid::new_v4(),
                destination: PathBuf::from("/tmp/a.jpg"),
                lens: LensFacing::Back,
            },
            Err(CaptureError::DetectionFailed {
                reason: "model unavailable".to_string(),
            }),
        );

        assert!(EventFilter::StillsOnly.matches(&still));
        assert!(!EventFilter::StillsOnly.matches(&frame_faces(9)));
    }

    #[tokio::test]
    async fn test_filtered_receiver() {
        let event_bus = EventBus::new(10);
        let mut receiver = event_bus.receiver(
            EventFilter::EventTypes(vec!["session_state_changed"]),
            "test_receiver",
        );

        event_bus.publish(frame_faces(1)).await.unwrap();
        event_bus
            .publish(SessionEvent::state_changed(
                SessionState::Unbound,
                LensFacing::Back,
            ))
            .await
            .unwrap();

        let received = timeout(Duration::from_millis(100), receiver.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(received.event_type(), "session_state_changed");
        assert!(receiver.try_recv().unwrap().is_none());
    }

    #[test]
    fn test_event_descriptions() {
        let event = frame_faces(12);
        assert_eq!(event.event_type(), "face_result");
        assert_eq!(event.description(), "0 face(s) in frame 12");
        assert!(event.timestamp() <= SystemTime::now());
    }
}
