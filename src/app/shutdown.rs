use super::{ComponentState, FacecamApp};
use crate::error::{FacecamError, Result};
use std::time::Duration;
use tokio::time::timeout;
use tracing::{error, info};

impl FacecamApp {
    /// Perform graceful shutdown of all components
    pub async fn shutdown(&mut self) -> Result<i32> {
        info!("Beginning graceful shutdown");

        let mut exit_code = 0;

        // Stop components in reverse start order
        if self.keyboard_enabled {
            if let Err(e) = self.stop_component("keyboard").await {
                error!("Error stopping keyboard: {}", e);
                exit_code = 1;
            }
        }

        if let Err(e) = self.stop_component("camera").await {
            error!("Error stopping camera: {}", e);
            exit_code = 1;
        }

        // Listeners go last so the unbind is still logged
        self.cancellation_token.cancel();

        if self.config.capture.save_metadata {
            if let Err(e) = self.stop_component("metadata").await {
                error!("Error stopping metadata: {}", e);
                exit_code = 1;
            }
        }

        if let Err(e) = self.stop_component("events").await {
            error!("Error stopping events: {}", e);
            exit_code = 1;
        }

        info!("Graceful shutdown completed with exit code: {}", exit_code);
        Ok(exit_code)
    }

    /// Stop a specific component
    async fn stop_component(&mut self, component: &str) -> Result<()> {
        info!("Stopping {} component", component);
        self.set_component_state(component, ComponentState::Stopping)
            .await;

        let (limit, outcome) = match component {
            "camera" => {
                let limit = Duration::from_secs(10);
                let result = timeout(limit, self.session.stop())
                    .await
                    .map(|stopped| stopped.map_err(FacecamError::from));
                (limit, result)
            }
            "keyboard" => {
                let limit = Duration::from_secs(5);
                let result = match &self.keyboard_handler {
                    Some(handler) => timeout(limit, handler.stop()).await,
                    None => Ok(Ok(())),
                };
                (limit, result)
            }
            _ => {
                let limit = Duration::from_secs(5);
                let result = match self.take_task(component) {
                    Some(task) => timeout(limit, task).await.map(|joined| {
                        joined.map_err(|e| {
                            FacecamError::component(component, &format!("task failed: {}", e))
                        })
                    }),
                    None => Ok(Ok(())),
                };
                (limit, result)
            }
        };

        match outcome {
            Ok(Ok(())) => {
                self.set_component_state(component, ComponentState::Stopped)
                    .await;
                info!("{} component stopped", component);
                Ok(())
            }
            Ok(Err(e)) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("Error stopping {} component: {}", component, e);
                Err(e)
            }
            Err(_) => {
                self.set_component_state(component, ComponentState::Failed)
                    .await;
                error!("{} component stop timeout after {:?}", component, limit);
                Err(FacecamError::system(format!(
                    "{} component stop timeout",
                    component
                )))
            }
        }
    }

    fn take_task(&mut self, component: &str) -> Option<tokio::task::JoinHandle<()>> {
        let index = self.tasks.iter().position(|(name, _)| name == component)?;
        Some(self.tasks.remove(index).1)
    }
}
