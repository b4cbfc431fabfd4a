use super::interface::{sensor_orientation, CameraBackend, CameraDevice, OutputKind, StillPicture};
use super::stream::FrameProducer;
use crate::error::CameraError;
use crate::frame::{encode_jpeg, FrameData, FrameFormat};
use crate::lens::LensFacing;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace};

/// Settings for the synthetic camera
#[derive(Debug, Clone)]
pub struct SimulatedCameraConfig {
    pub resolution: (u32, u32),
    pub fps: u32,
    pub still_latency: Duration,
    pub jpeg_quality: u8,
}

impl Default for SimulatedCameraConfig {
    fn default() -> Self {
        Self {
            resolution: (640, 480),
            fps: 15,
            still_latency: Duration::from_millis(120),
            jpeg_quality: 85,
        }
    }
}

/// Camera backend that synthesizes frames instead of talking to hardware
pub struct SimulatedCameraBackend {
    config: SimulatedCameraConfig,
    frame_counter: Arc<AtomicU64>,
}

impl SimulatedCameraBackend {
    pub fn new(config: SimulatedCameraConfig) -> Self {
        Self {
            config,
            frame_counter: Arc::new(AtomicU64::new(0)),
        }
    }

    /// Frames generated across all devices so far
    pub fn frame_count(&self) -> u64 {
        self.frame_counter.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl CameraBackend for SimulatedCameraBackend {
    async fn open(&self, lens: LensFacing) -> Result<Arc<dyn CameraDevice>, CameraError> {
        let (width, height) = self.config.resolution;
        if width == 0 || height == 0 || self.config.fps == 0 {
            return Err(CameraError::DeviceOpen {
                lens,
                details: format!(
                    "invalid simulated mode {}x{}@{}",
                    width, height, self.config.fps
                ),
            });
        }

        info!(
            "Opened simulated {} camera ({}x{} @ {} fps)",
            lens, width, height, self.config.fps
        );
        Ok(Arc::new(SimulatedCameraDevice {
            lens,
            config: self.config.clone(),
            frame_counter: Arc::clone(&self.frame_counter),
            analysis: Mutex::new(None),
            capture_attached: AtomicBool::new(false),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        "simulated"
    }
}

struct SimulatedCameraDevice {
    lens: LensFacing,
    config: SimulatedCameraConfig,
    frame_counter: Arc<AtomicU64>,
    analysis: Mutex<Option<CancellationToken>>,
    capture_attached: AtomicBool,
    closed: AtomicBool,
}

impl SimulatedCameraDevice {
    fn ensure_open(&self) -> Result<(), CameraError> {
        if self.closed.load(Ordering::Acquire) {
            Err(CameraError::Closed)
        } else {
            Ok(())
        }
    }

    fn stop_frames(&self) {
        if let Some(token) = self.analysis.lock().take() {
            token.cancel();
        }
    }
}

/// Diagonal gradient that scrolls by one step per frame
fn synthetic_pattern(width: u32, height: u32, step: u64) -> Vec<u8> {
    let shift = (step % 256) as u32;
    let mut rgb = Vec::with_capacity((width * height * 3) as usize);
    for y in 0..height {
        for x in 0..width {
            let r = ((x + shift) % 256) as u8;
            let g = ((y + shift) % 256) as u8;
            let b = (((x + y) / 2 + shift) % 256) as u8;
            rgb.extend_from_slice(&[r, g, b]);
        }
    }
    rgb
}

async fn run_frame_loop(
    lens: LensFacing,
    config: SimulatedCameraConfig,
    frame_counter: Arc<AtomicU64>,
    producer: FrameProducer,
    token: CancellationToken,
) {
    let frame_interval = Duration::from_millis(1000 / config.fps.max(1) as u64);
    let mut interval_timer = tokio::time::interval(frame_interval);
    let orientation = sensor_orientation(lens);
    let (width, height) = config.resolution;

    debug!("Simulated {} frame loop started", lens);

    loop {
        tokio::select! {
            _ = token.cancelled() => break,
            _ = interval_timer.tick() => {}
        }

        if producer.is_closed() {
            break;
        }

        let frame_id = frame_counter.fetch_add(1, Ordering::Relaxed);
        let frame = FrameData::new(
            frame_id,
            SystemTime::now(),
            synthetic_pattern(width, height, frame_id),
            width,
            height,
            FrameFormat::Rgb24,
        );

        if !producer.offer(frame, orientation) {
            trace!("Simulated frame {} dropped at source", frame_id);
        }
    }

    debug!("Simulated {} frame loop stopped", lens);
}

#[async_trait]
impl CameraDevice for SimulatedCameraDevice {
    fn lens(&self) -> LensFacing {
        self.lens
    }

    async fn attach_preview(&self) -> Result<(), CameraError> {
        self.ensure_open()
    }

    async fn attach_analysis(&self, producer: FrameProducer) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.stop_frames();

        let token = CancellationToken::new();
        tokio::spawn(run_frame_loop(
            self.lens,
            self.config.clone(),
            Arc::clone(&self.frame_counter),
            producer,
            token.clone(),
        ));
        *self.analysis.lock() = Some(token);
        Ok(())
    }

    async fn attach_capture(&self) -> Result<(), CameraError> {
        self.ensure_open()?;
        self.capture_attached.store(true, Ordering::Release);
        Ok(())
    }

    async fn detach(&self, output: OutputKind) -> Result<(), CameraError> {
        match output {
            OutputKind::Preview => {}
            OutputKind::Analysis => self.stop_frames(),
            OutputKind::StillCapture => self.capture_attached.store(false, Ordering::Release),
        }
        Ok(())
    }

    async fn take_picture(&self) -> Result<StillPicture, CameraError> {
        self.ensure_open()?;
        if !self.capture_attached.load(Ordering::Acquire) {
            return Err(CameraError::OutputNotAttached {
                output: OutputKind::StillCapture.to_string(),
            });
        }

        tokio::time::sleep(self.config.still_latency).await;

        let (width, height) = self.config.resolution;
        let quality = self.config.jpeg_quality;
        let step = self.frame_counter.load(Ordering::Relaxed);
        let jpeg = tokio::task::spawn_blocking(move || {
            encode_jpeg(&synthetic_pattern(width, height, step), width, height, quality)
        })
        .await
        .map_err(|e| CameraError::Encoding {
            details: e.to_string(),
        })??;

        debug!("Simulated {} still encoded ({} bytes)", self.lens, jpeg.len());
        Ok(StillPicture {
            jpeg,
            width,
            height,
            orientation: sensor_orientation(self.lens),
        })
    }

    async fn close(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.stop_frames();
            info!("Closed simulated {} camera", self.lens);
        }
    }
}

impl Drop for SimulatedCameraDevice {
    fn drop(&mut self) {
        self.stop_frames();
    }
}
