use super::metadata::{metadata_filter, spawn_metadata_writer};
use super::{ComponentState, FacecamApp};
use crate::error::{EventBusError, Result, SessionError};
use crate::events::{EventFilter, EventReceiver};
use crate::permission::PermissionState;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

impl FacecamApp {
    /// Initialize all system components
    pub async fn initialize(&mut self) -> Result<()> {
        info!("Initializing Facecam components");

        let mut states = self.component_states.lock().await;
        states.insert("events".to_string(), ComponentState::Stopped);
        states.insert("camera".to_string(), ComponentState::Stopped);

        if self.config.capture.save_metadata {
            states.insert("metadata".to_string(), ComponentState::Stopped);
        }

        // Only register keyboard component if enabled
        if self.keyboard_enabled {
            states.insert("keyboard".to_string(), ComponentState::Stopped);
        }

        drop(states);

        info!("All components initialized successfully");
        Ok(())
    }

    /// Start all system components
    pub async fn start(&mut self) -> Result<()> {
        info!("Starting Facecam");

        // Listeners first so they see the session bind
        self.set_component_state("events", ComponentState::Starting)
            .await;
        let logger = spawn_event_logger(
            self.event_bus.receiver(EventFilter::All, "event-logger"),
            self.cancellation_token.clone(),
        );
        self.tasks.push(("events".to_string(), logger));
        self.set_component_state("events", ComponentState::Running)
            .await;

        if self.config.capture.save_metadata {
            self.set_component_state("metadata", ComponentState::Starting)
                .await;
            let writer = spawn_metadata_writer(
                self.event_bus.receiver(metadata_filter(), "metadata-writer"),
                self.cancellation_token.clone(),
            );
            self.tasks.push(("metadata".to_string(), writer));
            self.set_component_state("metadata", ComponentState::Running)
                .await;
            info!("Metadata sidecars enabled");
        }

        self.set_component_state("camera", ComponentState::Starting)
            .await;

        let permission = self.permissions.request_if_needed().await;
        if permission != PermissionState::Granted {
            self.set_component_state("camera", ComponentState::Failed)
                .await;
            error!("Camera permission is {}, cannot start the session", permission);
            return Err(SessionError::PermissionDenied.into());
        }

        self.session.start().await.map_err(|e| {
            error!("Failed to start camera session: {}", e);
            e
        })?;

        self.set_component_state("camera", ComponentState::Running)
            .await;
        info!("Camera session bound to {} lens", self.session.lens());

        // Start keyboard input handler (only if enabled)
        if self.keyboard_enabled {
            if let Some(keyboard_handler) = &self.keyboard_handler {
                self.set_component_state("keyboard", ComponentState::Starting)
                    .await;

                keyboard_handler.start().await.map_err(|e| {
                    error!("Failed to start keyboard handler: {}", e);
                    e
                })?;

                self.set_component_state("keyboard", ComponentState::Running)
                    .await;
                info!("Keyboard input handler started");
            }
        }

        info!("Facecam started successfully");
        Ok(())
    }
}

/// Log every session event until cancelled
fn spawn_event_logger(mut receiver: EventReceiver, token: CancellationToken) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = receiver.recv() => event,
            };

            match event {
                Ok(event) => info!("{}", event.description()),
                Err(EventBusError::ChannelClosed) => break,
                Err(e) => warn!("Event logger missed events: {}", e),
            }
        }
        debug!("Event logger stopped");
    })
}
