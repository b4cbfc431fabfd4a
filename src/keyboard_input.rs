use crate::camera::CameraSession;
use crate::error::Result;
use crossterm::event::{self, Event, KeyCode, KeyEventKind};
use crossterm::terminal::{disable_raw_mode, enable_raw_mode};
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// What a key press asks the session to do
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyAction {
    Capture,
    FlipLens,
    Quit,
}

impl KeyAction {
    pub fn from_key(code: KeyCode) -> Option<Self> {
        match code {
            KeyCode::Char(' ') | KeyCode::Char('c') => Some(KeyAction::Capture),
            KeyCode::Char('f') => Some(KeyAction::FlipLens),
            KeyCode::Char('q') | KeyCode::Esc => Some(KeyAction::Quit),
            _ => None,
        }
    }
}

/// Terminal controls for the camera session
pub struct KeyboardInputHandler {
    session: CameraSession,
    quit: CancellationToken,
    cancellation_token: CancellationToken,
}

impl KeyboardInputHandler {
    /// `quit` is cancelled when the user asks to exit
    pub fn new(session: CameraSession, quit: CancellationToken) -> Self {
        Self {
            session,
            quit,
            cancellation_token: CancellationToken::new(),
        }
    }

    /// Start listening for keyboard input
    pub async fn start(&self) -> Result<()> {
        info!("Starting keyboard input handler - SPACE/c captures, f flips the lens, q quits");

        let session = self.session.clone();
        let quit = self.quit.clone();
        let cancellation_token = self.cancellation_token.clone();
        let runtime_handle = Handle::current();

        task::spawn_blocking(move || {
            if let Err(e) = enable_raw_mode() {
                error!("Failed to enable raw mode for keyboard input: {}", e);
                return;
            }

            info!("Raw mode enabled - keyboard handler active");

            loop {
                if cancellation_token.is_cancelled() {
                    debug!("Keyboard input handler stopping");
                    break;
                }

                match event::poll(Duration::from_millis(100)) {
                    Ok(true) => {
                        let Ok(Event::Key(key_event)) = event::read() else {
                            continue;
                        };
                        // Only key presses, not releases
                        if key_event.kind != KeyEventKind::Press {
                            continue;
                        }

                        match KeyAction::from_key(key_event.code) {
                            Some(KeyAction::Quit) => {
                                info!("Quit key pressed - requesting shutdown");
                                quit.cancel();
                                break;
                            }
                            Some(action) => {
                                runtime_handle.spawn(perform(session.clone(), action));
                            }
                            None => debug!("Key pressed: {:?}", key_event.code),
                        }
                    }
                    Ok(false) => {}
                    Err(e) => {
                        warn!("Error polling for keyboard events: {}", e);
                    }
                }
            }

            if let Err(e) = disable_raw_mode() {
                error!("Failed to disable raw mode: {}", e);
            } else {
                debug!("Raw mode disabled");
            }

            debug!("Keyboard input handler task exited");
        });

        Ok(())
    }

    /// Stop the keyboard input handler
    pub async fn stop(&self) -> Result<()> {
        info!("Stopping keyboard input handler");
        self.cancellation_token.cancel();

        // Give the task a moment to clean up and disable raw mode
        tokio::time::sleep(Duration::from_millis(200)).await;

        let _ = disable_raw_mode();

        Ok(())
    }
}

/// Run a key action against the session and log how it went
pub(crate) async fn perform(session: CameraSession, action: KeyAction) {
    match action {
        KeyAction::Capture => match session.capture().await {
            Ok(report) if report.is_saved() => {
                info!(
                    "Captured {} ({} faces)",
                    report.request.destination.display(),
                    report.face_count()
                );
            }
            Ok(report) => {
                if let Some(e) = report.outcome.error() {
                    warn!("Capture failed: {}", e);
                }
            }
            Err(e) => warn!("Capture rejected: {}", e),
        },
        KeyAction::FlipLens => match session.flip_lens().await {
            Ok(lens) => info!("Switching to {} camera", lens),
            Err(e) => warn!("Lens flip failed: {}", e),
        },
        KeyAction::Quit => {}
    }
}
