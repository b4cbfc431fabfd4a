use super::{FacecamApp, ShutdownReason};
use crate::error::{FacecamError, Result};
use std::sync::Arc;
use tokio::signal;
use tokio::sync::{oneshot, Mutex};
use tracing::{error, info};

impl FacecamApp {
    /// Run the main application loop with signal handling
    pub async fn run(&mut self) -> Result<i32> {
        info!("Facecam is running");

        let shutdown_sender = self
            .shutdown_sender
            .take()
            .ok_or_else(|| FacecamError::system("Shutdown sender already taken"))?;

        let shutdown_receiver = self
            .shutdown_receiver
            .take()
            .ok_or_else(|| FacecamError::system("Shutdown receiver already taken"))?;

        self.setup_signal_handlers(shutdown_sender).await;

        // Wait for shutdown signal
        let shutdown_reason = shutdown_receiver
            .await
            .map_err(|_| FacecamError::system("Shutdown channel closed unexpectedly"))?;

        info!("Shutdown initiated: {:?}", shutdown_reason);

        let exit_code = self.shutdown().await?;

        info!("Facecam shutdown complete");
        Ok(exit_code)
    }

    /// Set up signal and quit-key handlers for graceful shutdown
    async fn setup_signal_handlers(&self, shutdown_sender: oneshot::Sender<ShutdownReason>) {
        let shutdown_sender = Arc::new(Mutex::new(Some(shutdown_sender)));

        // Handle SIGTERM - Unix only
        #[cfg(unix)]
        {
            let shutdown_sender_sigterm = Arc::clone(&shutdown_sender);
            tokio::spawn(async move {
                let mut sigterm = match signal::unix::signal(signal::unix::SignalKind::terminate())
                {
                    Ok(sigterm) => sigterm,
                    Err(e) => {
                        error!("Failed to register SIGTERM handler: {}", e);
                        return;
                    }
                };
                if sigterm.recv().await.is_some() {
                    info!("Received SIGTERM signal");
                    if let Some(sender) = shutdown_sender_sigterm.lock().await.take() {
                        let _ = sender.send(ShutdownReason::Signal("SIGTERM".to_string()));
                    }
                }
            });
        }

        // Handle SIGINT (Ctrl+C) - Cross-platform
        let shutdown_sender_sigint = Arc::clone(&shutdown_sender);
        tokio::spawn(async move {
            if let Ok(()) = signal::ctrl_c().await {
                info!("Received SIGINT signal (Ctrl+C)");
                if let Some(sender) = shutdown_sender_sigint.lock().await.take() {
                    let _ = sender.send(ShutdownReason::Signal("SIGINT".to_string()));
                }
            }
        });

        // Quit key or an embedding caller
        let shutdown_sender_quit = Arc::clone(&shutdown_sender);
        let quit = self.quit_token.clone();
        tokio::spawn(async move {
            quit.cancelled().await;
            info!("Quit requested");
            if let Some(sender) = shutdown_sender_quit.lock().await.take() {
                let _ = sender.send(ShutdownReason::UserRequest);
            }
        });
    }
}
