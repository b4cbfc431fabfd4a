//! Shared fixtures for session and capture tests.

use crate::camera::{
    CameraSession, CameraSessionBuilder, MockCameraBackend, SessionConfig, SessionSnapshot,
    SessionState,
};
use crate::detector::{DetectorOptions, MockFaceDetector};
use crate::events::{EventBus, SessionEvent};
use crate::frame::{FrameData, FrameFormat};
use crate::lens::LensFacing;
use crate::permission::{PermissionGate, StaticPermissions};
use crate::storage::MemoryImageStorage;
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;
use tokio::time::timeout;

pub(crate) const WAIT: Duration = Duration::from_secs(2);

pub(crate) fn test_session_config() -> SessionConfig {
    SessionConfig {
        initial_lens: LensFacing::Back,
        frame_budget: 2,
        bind_timeout: Duration::from_millis(500),
        capture_timeout: Duration::from_millis(500),
        detection_timeout: Duration::from_millis(500),
        live_analysis: true,
        command_capacity: 16,
    }
}

pub(crate) fn test_frame(id: u64) -> FrameData {
    FrameData::new(id, SystemTime::now(), vec![0; 12], 2, 2, FrameFormat::Rgb24)
}

pub(crate) struct Harness {
    pub session: CameraSession,
    pub backend: MockCameraBackend,
    pub storage: Arc<MemoryImageStorage>,
    pub still_detector: Arc<MockFaceDetector>,
    pub stream_detector: Arc<MockFaceDetector>,
    pub permissions: Arc<StaticPermissions>,
    pub events: broadcast::Receiver<SessionEvent>,
}

impl Harness {
    pub fn new() -> Self {
        Self::with_config(test_session_config())
    }

    pub fn with_config(config: SessionConfig) -> Self {
        let backend = MockCameraBackend::new();
        let storage = Arc::new(MemoryImageStorage::new("/photos"));
        let still_detector = Arc::new(MockFaceDetector::with_faces(
            DetectorOptions::high_accuracy(),
            2,
        ));
        let stream_detector = Arc::new(MockFaceDetector::with_faces(
            DetectorOptions::real_time(),
            1,
        ));
        let permissions = Arc::new(StaticPermissions::granted());
        let event_bus = EventBus::new(256);
        let events = event_bus.subscribe();

        let session = CameraSessionBuilder::new()
            .backend(Arc::new(backend.clone()))
            .storage(storage.clone())
            .still_detector(still_detector.clone())
            .stream_detector(stream_detector.clone())
            .permissions(Arc::new(PermissionGate::new(permissions.clone())))
            .event_bus(event_bus)
            .config(config)
            .spawn()
            .unwrap();

        Self {
            session,
            backend,
            storage,
            still_detector,
            stream_detector,
            permissions,
            events,
        }
    }

    /// Start the session and forget the events it produced
    pub async fn bound(self) -> Self {
        let mut harness = self;
        harness.session.start().await.unwrap();
        assert_eq!(harness.session.state(), SessionState::Bound);
        harness.drain_events();
        harness
    }

    pub fn drain_events(&mut self) -> Vec<SessionEvent> {
        let mut events = Vec::new();
        while let Ok(event) = self.events.try_recv() {
            events.push(event);
        }
        events
    }

    /// Lifecycle states published since the last drain
    pub fn drain_states(&mut self) -> Vec<SessionState> {
        self.drain_events()
            .into_iter()
            .filter_map(|event| match event {
                SessionEvent::SessionStateChanged { state, .. } => Some(state),
                _ => None,
            })
            .collect()
    }

    pub async fn wait_for_state(&self, state: SessionState) {
        self.wait_until(|s| s.state == state).await;
    }

    /// Wait for `lens` to be bound
    pub async fn wait_for_bound(&self, lens: LensFacing) {
        self.wait_until(|s| s.state == SessionState::Bound && s.active_lens == lens)
            .await;
    }

    pub async fn wait_until(&self, check: impl FnMut(&SessionSnapshot) -> bool) {
        let mut watch = self.session.watch();
        timeout(WAIT, watch.wait_for(check))
            .await
            .expect("session never reached the expected state")
            .unwrap();
    }

    /// Make sure every command sent so far has been handled
    pub async fn sync(&self) {
        self.session.pipeline_stats().await.unwrap();
    }

    /// Wait for the next event matching `pick`
    pub async fn next_event<T>(&mut self, pick: impl Fn(&SessionEvent) -> Option<T>) -> T {
        timeout(WAIT, async {
            loop {
                let event = self.events.recv().await.unwrap();
                if let Some(found) = pick(&event) {
                    return found;
                }
            }
        })
        .await
        .expect("expected event was not published")
    }
}

/// Poll `check` until it holds or the wait bound runs out
pub(crate) async fn eventually(check: impl Fn() -> bool) {
    timeout(WAIT, async {
        while !check() {
            tokio::time::sleep(Duration::from_millis(5)).await;
        }
    })
    .await
    .expect("condition not reached in time");
}
