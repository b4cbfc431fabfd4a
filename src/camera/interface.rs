use super::stream::FrameProducer;
use crate::error::CameraError;
use crate::frame::Orientation;
use crate::lens::LensFacing;
use async_trait::async_trait;
use std::fmt;
use std::sync::Arc;

/// Outputs bound to a camera for the lifetime of a session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OutputKind {
    Preview,
    Analysis,
    StillCapture,
}

impl OutputKind {
    /// Attach order; teardown walks it in reverse
    pub const BIND_ORDER: [OutputKind; 3] = [
        OutputKind::Preview,
        OutputKind::Analysis,
        OutputKind::StillCapture,
    ];
}

impl fmt::Display for OutputKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            OutputKind::Preview => write!(f, "preview"),
            OutputKind::Analysis => write!(f, "analysis"),
            OutputKind::StillCapture => write!(f, "still-capture"),
        }
    }
}

/// Encoded still returned by the capture endpoint
#[derive(Debug, Clone)]
pub struct StillPicture {
    pub jpeg: Vec<u8>,
    pub width: u32,
    pub height: u32,
    pub orientation: Orientation,
}

/// Mounting rotation of the sensor behind each lens
pub fn sensor_orientation(lens: LensFacing) -> Orientation {
    match lens {
        LensFacing::Front => Orientation::Rotate270,
        LensFacing::Back => Orientation::Rotate90,
    }
}

/// Opens physical cameras
#[async_trait]
pub trait CameraBackend: Send + Sync {
    async fn open(&self, lens: LensFacing) -> Result<Arc<dyn CameraDevice>, CameraError>;

    fn name(&self) -> &str;
}

/// An opened physical camera.
///
/// Only the camera session holds one; it attaches every output before
/// declaring the session bound and detaches them all before closing.
#[async_trait]
pub trait CameraDevice: Send + Sync {
    fn lens(&self) -> LensFacing;

    /// Start feeding the preview surface
    async fn attach_preview(&self) -> Result<(), CameraError>;

    /// Start pushing analysis frames into `producer`
    async fn attach_analysis(&self, producer: FrameProducer) -> Result<(), CameraError>;

    /// Enable the still-capture endpoint
    async fn attach_capture(&self) -> Result<(), CameraError>;

    async fn detach(&self, output: OutputKind) -> Result<(), CameraError>;

    /// Take and encode one still picture
    async fn take_picture(&self) -> Result<StillPicture, CameraError>;

    /// Release the hardware; the device is unusable afterwards
    async fn close(&self);
}
