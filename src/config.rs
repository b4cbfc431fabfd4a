use crate::camera::{SessionConfig, SimulatedCameraConfig};
use crate::detector::DetectorOptions;
use crate::lens::LensFacing;
use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::{debug, info};

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct FacecamConfig {
    pub camera: CameraConfig,
    pub detector: DetectorConfig,
    pub capture: CaptureConfig,
    pub permission: PermissionConfig,
    pub system: SystemConfig,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CameraConfig {
    /// Lens bound on start
    #[serde(default)]
    pub lens: LensFacing,

    /// Camera resolution (width, height)
    #[serde(default = "default_camera_resolution")]
    pub resolution: (u32, u32),

    /// Frames per second of the live stream
    #[serde(default = "default_camera_fps")]
    pub fps: u32,

    /// Analysis frames that may be held before the camera drops at the source
    #[serde(default = "default_frame_budget")]
    pub frame_budget: usize,

    #[serde(default = "default_bind_timeout_ms")]
    pub bind_timeout_ms: u64,

    #[serde(default = "default_capture_timeout_ms")]
    pub capture_timeout_ms: u64,

    /// Artificial shutter delay of the simulated camera
    #[serde(default = "default_still_latency_ms")]
    pub still_latency_ms: u64,

    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct DetectorConfig {
    /// Options for the detector run over saved photos
    #[serde(default = "DetectorOptions::high_accuracy")]
    pub still: DetectorOptions,

    /// Options for the detector run over the live stream
    #[serde(default = "DetectorOptions::real_time")]
    pub stream: DetectorOptions,

    /// Run face detection on live frames
    #[serde(default = "default_live_analysis")]
    pub live_analysis: bool,

    #[serde(default = "default_detection_timeout_ms")]
    pub timeout_ms: u64,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct CaptureConfig {
    /// Directory photos are written to
    #[serde(default = "default_capture_path")]
    pub path: String,

    /// Used when `path` cannot be created
    #[serde(default)]
    pub fallback_path: Option<String>,

    /// Write a JSON sidecar with the detected faces next to each photo
    #[serde(default = "default_save_metadata")]
    pub save_metadata: bool,
}

#[derive(Debug, Deserialize, Serialize, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum PermissionMode {
    /// Always granted
    Granted,
    /// Always refused
    Denied,
    /// Granted when the camera device node is readable and writable
    Device,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct PermissionConfig {
    #[serde(default = "default_permission_mode")]
    pub mode: PermissionMode,

    #[serde(default = "default_device_path")]
    pub device: String,
}

#[derive(Debug, Deserialize, Serialize, Clone)]
pub struct SystemConfig {
    /// Event bus capacity
    #[serde(default = "default_event_bus_capacity")]
    pub event_bus_capacity: usize,

    /// Pending session commands before callers wait
    #[serde(default = "default_command_queue_capacity")]
    pub command_queue_capacity: usize,
}

impl FacecamConfig {
    /// Load configuration from default sources (file + environment variables)
    pub fn load() -> Result<Self, ConfigError> {
        Self::load_from_file("facecam.toml")
    }

    /// Load configuration from a specific file path
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path_str = path.as_ref().to_string_lossy();
        debug!("Loading configuration from: {}", path_str);

        let settings = Config::builder()
            // Start with default values
            .set_default("camera.lens", "back")?
            .set_default(
                "camera.resolution",
                vec![default_camera_resolution().0, default_camera_resolution().1],
            )?
            .set_default("camera.fps", default_camera_fps())?
            .set_default("camera.frame_budget", default_frame_budget() as i64)?
            .set_default("camera.bind_timeout_ms", default_bind_timeout_ms())?
            .set_default("camera.capture_timeout_ms", default_capture_timeout_ms())?
            .set_default("camera.still_latency_ms", default_still_latency_ms())?
            .set_default("camera.jpeg_quality", default_jpeg_quality() as i64)?
            .set_default("detector.live_analysis", default_live_analysis())?
            .set_default("detector.timeout_ms", default_detection_timeout_ms())?
            .set_default("capture.path", default_capture_path())?
            .set_default("capture.save_metadata", default_save_metadata())?
            .set_default("permission.mode", "granted")?
            .set_default("permission.device", default_device_path())?
            .set_default(
                "system.event_bus_capacity",
                default_event_bus_capacity() as i64,
            )?
            .set_default(
                "system.command_queue_capacity",
                default_command_queue_capacity() as i64,
            )?
            // Add configuration file (optional)
            .add_source(File::with_name(&path_str).required(false))
            // FACECAM_CAMERA__FPS=15 and friends
            .add_source(
                Environment::with_prefix("FACECAM")
                    .prefix_separator("_")
                    .separator("__"),
            )
            .build()?;

        let config: FacecamConfig = settings.try_deserialize()?;

        info!("Configuration loaded successfully");
        debug!("Final configuration: {:#?}", config);

        Ok(config)
    }

    /// Validate configuration values
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.camera.resolution.0 == 0 || self.camera.resolution.1 == 0 {
            return Err(ConfigError::Message(
                "Camera resolution must be greater than 0".to_string(),
            ));
        }

        if self.camera.fps == 0 {
            return Err(ConfigError::Message(
                "Camera fps must be greater than 0".to_string(),
            ));
        }

        if self.camera.frame_budget == 0 {
            return Err(ConfigError::Message(
                "Camera frame_budget must be greater than 0".to_string(),
            ));
        }

        if self.camera.bind_timeout_ms == 0 || self.camera.capture_timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Camera bind and capture timeouts must be greater than 0".to_string(),
            ));
        }

        if !(1..=100).contains(&self.camera.jpeg_quality) {
            return Err(ConfigError::Message(
                "Camera jpeg_quality must be between 1 and 100".to_string(),
            ));
        }

        if self.detector.timeout_ms == 0 {
            return Err(ConfigError::Message(
                "Detector timeout_ms must be greater than 0".to_string(),
            ));
        }

        self.detector
            .still
            .validate()
            .map_err(|e| ConfigError::Message(format!("Still detector: {}", e)))?;
        self.detector
            .stream
            .validate()
            .map_err(|e| ConfigError::Message(format!("Stream detector: {}", e)))?;

        if self.capture.path.trim().is_empty() {
            return Err(ConfigError::Message(
                "Capture path must not be empty".to_string(),
            ));
        }

        if self.system.event_bus_capacity == 0 {
            return Err(ConfigError::Message(
                "Event bus capacity must be greater than 0".to_string(),
            ));
        }

        if self.system.command_queue_capacity == 0 {
            return Err(ConfigError::Message(
                "Command queue capacity must be greater than 0".to_string(),
            ));
        }

        Ok(())
    }

    /// Settings for the camera session worker
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            initial_lens: self.camera.lens,
            frame_budget: self.camera.frame_budget,
            bind_timeout: Duration::from_millis(self.camera.bind_timeout_ms),
            capture_timeout: Duration::from_millis(self.camera.capture_timeout_ms),
            detection_timeout: Duration::from_millis(self.detector.timeout_ms),
            live_analysis: self.detector.live_analysis,
            command_capacity: self.system.command_queue_capacity,
        }
    }

    /// Settings for the synthetic camera backend
    pub fn simulated_camera(&self) -> SimulatedCameraConfig {
        SimulatedCameraConfig {
            resolution: self.camera.resolution,
            fps: self.camera.fps,
            still_latency: Duration::from_millis(self.camera.still_latency_ms),
            jpeg_quality: self.camera.jpeg_quality,
        }
    }

    pub fn capture_path(&self) -> PathBuf {
        PathBuf::from(&self.capture.path)
    }
}

impl Default for FacecamConfig {
    fn default() -> Self {
        Self {
            camera: CameraConfig {
                lens: LensFacing::default(),
                resolution: default_camera_resolution(),
                fps: default_camera_fps(),
                frame_budget: default_frame_budget(),
                bind_timeout_ms: default_bind_timeout_ms(),
                capture_timeout_ms: default_capture_timeout_ms(),
                still_latency_ms: default_still_latency_ms(),
                jpeg_quality: default_jpeg_quality(),
            },
            detector: DetectorConfig {
                still: DetectorOptions::high_accuracy(),
                stream: DetectorOptions::real_time(),
                live_analysis: default_live_analysis(),
                timeout_ms: default_detection_timeout_ms(),
            },
            capture: CaptureConfig {
                path: default_capture_path(),
                fallback_path: None,
                save_metadata: default_save_metadata(),
            },
            permission: PermissionConfig {
                mode: default_permission_mode(),
                device: default_device_path(),
            },
            system: SystemConfig {
                event_bus_capacity: default_event_bus_capacity(),
                command_queue_capacity: default_command_queue_capacity(),
            },
        }
    }
}

// Default value functions
fn default_camera_resolution() -> (u32, u32) {
    (640, 480)
}
fn default_camera_fps() -> u32 {
    15
}
fn default_frame_budget() -> usize {
    2
}
fn default_bind_timeout_ms() -> u64 {
    5000
}
fn default_capture_timeout_ms() -> u64 {
    10000
}
fn default_still_latency_ms() -> u64 {
    120
}
fn default_jpeg_quality() -> u8 {
    85
}

fn default_live_analysis() -> bool {
    true
}
fn default_detection_timeout_ms() -> u64 {
    5000
}

fn default_capture_path() -> String {
    "./photos".to_string()
}
fn default_save_metadata() -> bool {
    true
}

fn default_permission_mode() -> PermissionMode {
    PermissionMode::Granted
}
fn default_device_path() -> String {
    "/dev/video0".to_string()
}

fn default_event_bus_capacity() -> usize {
    100
}
fn default_command_queue_capacity() -> usize {
    32
}
