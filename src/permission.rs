//! Hardware-access permission tracking.
//!
//! The gate caches the last known [`PermissionState`] and makes sure the user
//! is prompted at most once per process. A denial sticks until the provider
//! reports an external change on a plain check.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PermissionState {
    Unknown,
    Granted,
    Denied,
}

impl fmt::Display for PermissionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PermissionState::Unknown => write!(f, "unknown"),
            PermissionState::Granted => write!(f, "granted"),
            PermissionState::Denied => write!(f, "denied"),
        }
    }
}

/// Platform capability to query and request camera access
#[async_trait]
pub trait PermissionProvider: Send + Sync {
    /// Query the current permission without prompting
    fn check(&self) -> PermissionState;

    /// Prompt the user (or platform) for permission
    async fn request(&self) -> PermissionState;
}

/// Provider with a fixed answer, used for configured and simulated setups
#[derive(Debug)]
pub struct StaticPermissions {
    state: parking_lot::Mutex<PermissionState>,
    requests: AtomicUsize,
}

impl StaticPermissions {
    pub fn new(state: PermissionState) -> Self {
        Self {
            state: parking_lot::Mutex::new(state),
            requests: AtomicUsize::new(0),
        }
    }

    pub fn granted() -> Self {
        Self::new(PermissionState::Granted)
    }

    pub fn denied() -> Self {
        Self::new(PermissionState::Denied)
    }

    /// Simulate the user changing the setting outside the application
    pub fn set(&self, state: PermissionState) {
        *self.state.lock() = state;
    }

    /// Number of prompts issued through this provider
    pub fn request_count(&self) -> usize {
        self.requests.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl PermissionProvider for StaticPermissions {
    fn check(&self) -> PermissionState {
        *self.state.lock()
    }

    async fn request(&self) -> PermissionState {
        self.requests.fetch_add(1, Ordering::Relaxed);
        *self.state.lock()
    }
}

/// Grants access when the camera device node is readable and writable
#[derive(Debug, Clone)]
pub struct DeviceNodePermissions {
    device: PathBuf,
}

impl DeviceNodePermissions {
    pub fn new<P: Into<PathBuf>>(device: P) -> Self {
        Self {
            device: device.into(),
        }
    }

    #[cfg(unix)]
    fn accessible(&self) -> bool {
        use std::os::unix::ffi::OsStrExt;

        let Ok(path) = std::ffi::CString::new(self.device.as_os_str().as_bytes()) else {
            return false;
        };
        // SAFETY: `path` is a valid NUL-terminated string for the duration of the call
        unsafe { libc::access(path.as_ptr(), libc::R_OK | libc::W_OK) == 0 }
    }

    #[cfg(not(unix))]
    fn accessible(&self) -> bool {
        std::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(&self.device)
            .is_ok()
    }
}

#[async_trait]
impl PermissionProvider for DeviceNodePermissions {
    fn check(&self) -> PermissionState {
        if self.accessible() {
            PermissionState::Granted
        } else {
            debug!("Camera device {} is not accessible", self.device.display());
            PermissionState::Denied
        }
    }

    async fn request(&self) -> PermissionState {
        // Nothing to prompt for; access is governed by group membership.
        self.check()
    }
}

#[derive(Debug)]
struct GateState {
    state: PermissionState,
    prompted: bool,
}

/// Tracks the camera permission and gates session start
pub struct PermissionGate {
    provider: Arc<dyn PermissionProvider>,
    state: parking_lot::Mutex<GateState>,
    prompt_lock: tokio::sync::Mutex<()>,
}

impl PermissionGate {
    pub fn new(provider: Arc<dyn PermissionProvider>) -> Self {
        Self {
            provider,
            state: parking_lot::Mutex::new(GateState {
                state: PermissionState::Unknown,
                prompted: false,
            }),
            prompt_lock: tokio::sync::Mutex::new(()),
        }
    }

    /// Last state observed without consulting the provider
    pub fn cached(&self) -> PermissionState {
        self.state.lock().state
    }

    /// Query the provider and record the answer
    pub fn check_granted(&self) -> PermissionState {
        let observed = self.provider.check();
        let mut gate = self.state.lock();
        if gate.state != observed {
            debug!("Camera permission changed: {} -> {}", gate.state, observed);
        }
        gate.state = observed;
        observed
    }

    /// Prompt for permission unless already granted or already refused once
    pub async fn request_if_needed(&self) -> PermissionState {
        let _prompt = self.prompt_lock.lock().await;

        let current = self.check_granted();
        if current == PermissionState::Granted {
            return current;
        }

        if self.state.lock().prompted {
            debug!("Camera permission already requested this run, not prompting again");
            return current;
        }

        info!("Requesting camera permission");
        let answer = self.provider.request().await;
        {
            let mut gate = self.state.lock();
            gate.prompted = true;
            gate.state = answer;
        }

        if answer == PermissionState::Granted {
            info!("Camera permission granted");
        } else {
            warn!("Camera permission not granted ({})", answer);
        }
        answer
    }
}
