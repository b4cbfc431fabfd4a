use crate::error::CameraError;
use image::codecs::jpeg::JpegEncoder;
use image::ColorType;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::SystemTime;

/// Pixel layout of a frame buffer
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FrameFormat {
    /// JPEG compressed still or frame
    Jpeg,
    /// YUV 4:2:0 planar, the usual analysis stream layout
    Yuv420,
    /// RGB24 format - uncompressed RGB data
    Rgb24,
}

impl FrameFormat {
    /// Bytes needed for a `width` x `height` frame, `None` for compressed formats
    pub fn frame_size(&self, width: u32, height: u32) -> Option<usize> {
        let pixels = width as usize * height as usize;
        match self {
            FrameFormat::Jpeg => None,
            FrameFormat::Yuv420 => Some(pixels + pixels / 2),
            FrameFormat::Rgb24 => Some(pixels * 3),
        }
    }

    /// Check if format is compressed
    pub fn is_compressed(&self) -> bool {
        matches!(self, FrameFormat::Jpeg)
    }
}

/// Clockwise rotation that must be applied to the buffer to display it upright
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub enum Orientation {
    #[default]
    Rotate0,
    Rotate90,
    Rotate180,
    Rotate270,
}

impl Orientation {
    /// Get rotation angle in degrees
    pub fn degrees(&self) -> u16 {
        match self {
            Orientation::Rotate0 => 0,
            Orientation::Rotate90 => 90,
            Orientation::Rotate180 => 180,
            Orientation::Rotate270 => 270,
        }
    }

    /// Map a sensor rotation in degrees; anything not a multiple of 90 is rejected
    pub fn from_degrees(degrees: i32) -> Option<Self> {
        match degrees.rem_euclid(360) {
            0 => Some(Orientation::Rotate0),
            90 => Some(Orientation::Rotate90),
            180 => Some(Orientation::Rotate180),
            270 => Some(Orientation::Rotate270),
            _ => None,
        }
    }
}

/// Image buffer handed to the detector, shared cheaply between stages
#[derive(Debug, Clone)]
pub struct FrameData {
    /// Unique frame identifier within its stream
    pub id: u64,
    /// Timestamp when frame was captured
    pub timestamp: SystemTime,
    /// Raw frame data (shared ownership for efficiency)
    pub data: Arc<Vec<u8>>,
    pub width: u32,
    pub height: u32,
    pub format: FrameFormat,
}

impl FrameData {
    pub fn new(
        id: u64,
        timestamp: SystemTime,
        data: Vec<u8>,
        width: u32,
        height: u32,
        format: FrameFormat,
    ) -> Self {
        Self {
            id,
            timestamp,
            data: Arc::new(data),
            width,
            height,
            format,
        }
    }

    /// Validate frame data size against expected size
    pub fn validate_size(&self) -> bool {
        match self.format.frame_size(self.width, self.height) {
            Some(expected) => self.data.len() == expected,
            None => !self.data.is_empty(),
        }
    }

    /// Get frame age in milliseconds
    pub fn age_ms(&self) -> u64 {
        SystemTime::now()
            .duration_since(self.timestamp)
            .unwrap_or_default()
            .as_millis() as u64
    }
}

/// Encode an RGB24 buffer as JPEG.
///
/// This is CPU bound; async callers should run it on the blocking pool.
pub fn encode_jpeg(
    rgb: &[u8],
    width: u32,
    height: u32,
    quality: u8,
) -> Result<Vec<u8>, CameraError> {
    if FrameFormat::Rgb24.frame_size(width, height) != Some(rgb.len()) {
        return Err(CameraError::Encoding {
            details: format!(
                "RGB buffer of {} bytes does not match {}x{}",
                rgb.len(),
                width,
                height
            ),
        });
    }

    let mut jpeg = Vec::new();
    let mut encoder = JpegEncoder::new_with_quality(&mut jpeg, quality.clamp(1, 100));
    encoder
        .encode(rgb, width, height, ColorType::Rgb8)
        .map_err(|e| CameraError::Encoding {
            details: e.to_string(),
        })?;

    Ok(jpeg)
}
