use super::interface::CameraBackend;
use super::session::{CameraSession, SessionConfig, SessionParts};
use crate::config::FacecamConfig;
use crate::detector::FaceDetector;
use crate::error::{FacecamError, Result};
use crate::events::EventBus;
use crate::permission::PermissionGate;
use crate::storage::ImageStorage;
use std::sync::Arc;

/// Default event bus capacity when none is supplied
const DEFAULT_EVENT_CAPACITY: usize = 64;

/// Builder for a camera session worker
pub struct CameraSessionBuilder {
    backend: Option<Arc<dyn CameraBackend>>,
    storage: Option<Arc<dyn ImageStorage>>,
    still_detector: Option<Arc<dyn FaceDetector>>,
    stream_detector: Option<Arc<dyn FaceDetector>>,
    permissions: Option<Arc<PermissionGate>>,
    event_bus: Option<EventBus>,
    config: SessionConfig,
}

impl CameraSessionBuilder {
    pub fn new() -> Self {
        Self {
            backend: None,
            storage: None,
            still_detector: None,
            stream_detector: None,
            permissions: None,
            event_bus: None,
            config: SessionConfig::default(),
        }
    }

    pub fn backend(mut self, backend: Arc<dyn CameraBackend>) -> Self {
        self.backend = Some(backend);
        self
    }

    pub fn storage(mut self, storage: Arc<dyn ImageStorage>) -> Self {
        self.storage = Some(storage);
        self
    }

    /// Detector run once over every saved photo
    pub fn still_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.still_detector = Some(detector);
        self
    }

    /// Detector for the live stream; defaults to the still detector
    pub fn stream_detector(mut self, detector: Arc<dyn FaceDetector>) -> Self {
        self.stream_detector = Some(detector);
        self
    }

    pub fn permissions(mut self, gate: Arc<PermissionGate>) -> Self {
        self.permissions = Some(gate);
        self
    }

    pub fn event_bus(mut self, event_bus: EventBus) -> Self {
        self.event_bus = Some(event_bus);
        self
    }

    pub fn config(mut self, config: SessionConfig) -> Self {
        self.config = config;
        self
    }

    /// Take session settings from the application configuration
    pub fn app_config(self, config: &FacecamConfig) -> Self {
        self.config(config.session_config())
    }

    /// Spawn the worker on the current tokio runtime
    pub fn spawn(self) -> Result<CameraSession> {
        let backend = self
            .backend
            .ok_or_else(|| FacecamError::system("Camera backend must be specified"))?;
        let storage = self
            .storage
            .ok_or_else(|| FacecamError::system("Image storage must be specified"))?;
        let still_detector = self
            .still_detector
            .ok_or_else(|| FacecamError::system("Still detector must be specified"))?;
        let permissions = self
            .permissions
            .ok_or_else(|| FacecamError::system("Permission gate must be specified"))?;

        if self.config.frame_budget == 0 {
            return Err(FacecamError::system("Analysis frame budget must be at least 1"));
        }

        let stream_detector = self
            .stream_detector
            .unwrap_or_else(|| Arc::clone(&still_detector));
        let events = self
            .event_bus
            .unwrap_or_else(|| EventBus::new(DEFAULT_EVENT_CAPACITY));

        Ok(CameraSession::spawn(SessionParts {
            backend,
            storage,
            still_detector,
            stream_detector,
            permissions,
            events,
            config: self.config,
        }))
    }
}

impl Default for CameraSessionBuilder {
    fn default() -> Self {
        Self::new()
    }
}
