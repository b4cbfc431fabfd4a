use super::types::{ComponentState, ShutdownReason};
use crate::camera::{CameraSession, CameraSessionBuilder, SimulatedCameraBackend};
use crate::config::{FacecamConfig, PermissionMode};
use crate::detector::MockFaceDetector;
use crate::error::Result;
use crate::events::EventBus;
use crate::keyboard_input::KeyboardInputHandler;
use crate::permission::{
    DeviceNodePermissions, PermissionGate, PermissionProvider, StaticPermissions,
};
use crate::storage::FileImageStorage;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Mutex};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::info;

/// Main application coordinator owning the camera session and its helpers
pub struct FacecamApp {
    pub(super) config: FacecamConfig,
    pub(super) event_bus: EventBus,
    pub(super) permissions: Arc<PermissionGate>,

    // Components
    pub(super) session: CameraSession,
    pub(super) keyboard_handler: Option<KeyboardInputHandler>,
    pub(super) keyboard_enabled: bool,
    pub(super) tasks: Vec<(String, JoinHandle<()>)>,

    // Lifecycle management
    pub(super) component_states: Arc<Mutex<HashMap<String, ComponentState>>>,
    pub(super) shutdown_sender: Option<oneshot::Sender<ShutdownReason>>,
    pub(super) shutdown_receiver: Option<oneshot::Receiver<ShutdownReason>>,
    pub(super) cancellation_token: CancellationToken,
    pub(super) quit_token: CancellationToken,
}

impl FacecamApp {
    /// Create the application around the simulated camera
    pub async fn new(config: FacecamConfig) -> Result<Self> {
        let backend = Arc::new(SimulatedCameraBackend::new(config.simulated_camera()));

        let mut storage = FileImageStorage::new(config.capture_path());
        if let Some(fallback) = &config.capture.fallback_path {
            storage = storage.with_fallback(fallback);
        }
        let storage = storage.prepare().await;

        // The simulated scene always shows one face
        let still_detector = Arc::new(MockFaceDetector::with_faces(
            config.detector.still.clone(),
            1,
        ));
        let stream_detector = Arc::new(MockFaceDetector::with_faces(
            config.detector.stream.clone(),
            1,
        ));
        let permissions = Arc::new(PermissionGate::new(permission_provider(&config)));
        let event_bus = EventBus::new(config.system.event_bus_capacity);

        let session = CameraSessionBuilder::new()
            .backend(backend)
            .storage(Arc::new(storage))
            .still_detector(still_detector)
            .stream_detector(stream_detector)
            .permissions(Arc::clone(&permissions))
            .event_bus(event_bus.clone())
            .app_config(&config)
            .spawn()?;

        info!(
            "Camera session created with {} lens selected",
            config.camera.lens
        );

        Ok(Self::with_session(config, session, permissions))
    }

    /// Wrap an already spawned session
    pub fn with_session(
        config: FacecamConfig,
        session: CameraSession,
        permissions: Arc<PermissionGate>,
    ) -> Self {
        let (shutdown_sender, shutdown_receiver) = oneshot::channel();
        let quit_token = CancellationToken::new();

        // Disabled by default, enable via set_keyboard_enabled()
        let keyboard_handler = Some(KeyboardInputHandler::new(
            session.clone(),
            quit_token.clone(),
        ));

        Self {
            config,
            event_bus: session.event_bus().clone(),
            permissions,
            session,
            keyboard_handler,
            keyboard_enabled: false,
            tasks: Vec::new(),
            component_states: Arc::new(Mutex::new(HashMap::new())),
            shutdown_sender: Some(shutdown_sender),
            shutdown_receiver: Some(shutdown_receiver),
            cancellation_token: CancellationToken::new(),
            quit_token,
        }
    }

    /// Enable or disable the keyboard input handler
    pub fn set_keyboard_enabled(&mut self, enabled: bool) {
        self.keyboard_enabled = enabled;
    }

    pub fn session(&self) -> &CameraSession {
        &self.session
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.event_bus
    }

    /// Token that ends `run` when cancelled
    pub fn quit_token(&self) -> CancellationToken {
        self.quit_token.clone()
    }
}

fn permission_provider(config: &FacecamConfig) -> Arc<dyn PermissionProvider> {
    match config.permission.mode {
        PermissionMode::Granted => Arc::new(StaticPermissions::granted()),
        PermissionMode::Denied => Arc::new(StaticPermissions::denied()),
        PermissionMode::Device => Arc::new(DeviceNodePermissions::new(&config.permission.device)),
    }
}
