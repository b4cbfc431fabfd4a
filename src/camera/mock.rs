use super::interface::{sensor_orientation, CameraBackend, CameraDevice, OutputKind, StillPicture};
use super::stream::FrameProducer;
use crate::error::CameraError;
use crate::frame::FrameData;
use crate::lens::LensFacing;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{debug, trace};

/// Minimal JPEG returned by mock stills
const STUB_JPEG: [u8; 6] = [0xFF, 0xD8, 0xFF, 0xE0, 0xFF, 0xD9];
const STUB_WIDTH: u32 = 640;
const STUB_HEIGHT: u32 = 480;

#[derive(Debug, Default)]
struct MockState {
    open_failures: HashSet<LensFacing>,
    attach_failures: HashSet<OutputKind>,
    capture_failure: Option<String>,
    hold_binds: bool,
    hold_captures: bool,
    held_attach: Option<OutputKind>,
    live_devices: usize,
    closed_explicitly: usize,
    max_live_devices: usize,
    opened: Vec<LensFacing>,
    attach_log: Vec<(LensFacing, OutputKind)>,
    detach_log: Vec<(LensFacing, OutputKind)>,
    captures_started: usize,
    producer: Option<(LensFacing, FrameProducer)>,
}

struct Shared {
    state: Mutex<MockState>,
    bind_gate: Semaphore,
    attach_gate: Semaphore,
    capture_gate: Semaphore,
}

/// In-memory camera backend with failure injection and call logs.
///
/// Clones share state, so a test keeps one clone for inspection while the
/// session owns another.
#[derive(Clone)]
pub struct MockCameraBackend {
    shared: Arc<Shared>,
}

impl MockCameraBackend {
    pub fn new() -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(MockState::default()),
                bind_gate: Semaphore::new(0),
                attach_gate: Semaphore::new(0),
                capture_gate: Semaphore::new(0),
            }),
        }
    }

    pub fn fail_open(&self, lens: LensFacing) {
        self.shared.state.lock().open_failures.insert(lens);
    }

    pub fn fail_attach(&self, output: OutputKind) {
        self.shared.state.lock().attach_failures.insert(output);
    }

    /// Make every still capture fail with `reason`
    pub fn fail_captures(&self, reason: &str) {
        self.shared.state.lock().capture_failure = Some(reason.to_string());
    }

    pub fn clear_failures(&self) {
        let mut state = self.shared.state.lock();
        state.open_failures.clear();
        state.attach_failures.clear();
        state.capture_failure = None;
    }

    /// Keep `open` pending until [`release_bind`](Self::release_bind)
    pub fn hold_binds(&self) {
        self.shared.state.lock().hold_binds = true;
    }

    pub fn release_bind(&self) {
        self.shared.bind_gate.add_permits(1);
    }

    /// Keep attaching `output` pending until [`release_attach`](Self::release_attach)
    pub fn hold_attach(&self, output: OutputKind) {
        self.shared.state.lock().held_attach = Some(output);
    }

    pub fn release_attach(&self) {
        self.shared.attach_gate.add_permits(1);
    }

    /// Keep `take_picture` pending until [`release_capture`](Self::release_capture)
    pub fn hold_captures(&self) {
        self.shared.state.lock().hold_captures = true;
    }

    pub fn release_capture(&self) {
        self.shared.capture_gate.add_permits(1);
    }

    /// Devices opened and not yet closed
    pub fn live_devices(&self) -> usize {
        self.shared.state.lock().live_devices
    }

    /// Most devices ever open at the same time
    pub fn max_live_devices(&self) -> usize {
        self.shared.state.lock().max_live_devices
    }

    /// Devices shut down through `close` rather than by being dropped
    pub fn closed_devices(&self) -> usize {
        self.shared.state.lock().closed_explicitly
    }

    pub fn opened_lenses(&self) -> Vec<LensFacing> {
        self.shared.state.lock().opened.clone()
    }

    pub fn captures_started(&self) -> usize {
        self.shared.state.lock().captures_started
    }

    pub fn attach_log(&self) -> Vec<(LensFacing, OutputKind)> {
        self.shared.state.lock().attach_log.clone()
    }

    pub fn detach_log(&self) -> Vec<(LensFacing, OutputKind)> {
        self.shared.state.lock().detach_log.clone()
    }

    /// Push a frame into the attached analysis output.
    ///
    /// Returns false when no stream is attached or the frame was dropped.
    pub fn push_frame(&self, frame: FrameData) -> bool {
        let attached = self.shared.state.lock().producer.clone();
        match attached {
            Some((lens, producer)) => producer.offer(frame, sensor_orientation(lens)),
            None => false,
        }
    }

    /// Frames currently held downstream of the attached analysis output
    pub fn outstanding_frames(&self) -> usize {
        self.shared
            .state
            .lock()
            .producer
            .as_ref()
            .map(|(_, p)| p.outstanding())
            .unwrap_or(0)
    }
}

impl Default for MockCameraBackend {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl CameraBackend for MockCameraBackend {
    async fn open(&self, lens: LensFacing) -> Result<Arc<dyn CameraDevice>, CameraError> {
        let hold = self.shared.state.lock().hold_binds;
        if hold {
            if let Ok(permit) = self.shared.bind_gate.acquire().await {
                permit.forget();
            }
        }

        let mut state = self.shared.state.lock();
        if state.open_failures.contains(&lens) {
            return Err(CameraError::DeviceOpen {
                lens,
                details: "injected open failure".to_string(),
            });
        }

        state.opened.push(lens);
        state.live_devices += 1;
        state.max_live_devices = state.max_live_devices.max(state.live_devices);
        debug!("Mock {} camera opened ({} live)", lens, state.live_devices);

        Ok(Arc::new(MockCameraDevice {
            lens,
            shared: Arc::clone(&self.shared),
            closed: AtomicBool::new(false),
        }))
    }

    fn name(&self) -> &str {
        "mock"
    }
}

struct MockCameraDevice {
    lens: LensFacing,
    shared: Arc<Shared>,
    closed: AtomicBool,
}

impl MockCameraDevice {
    async fn attach(&self, output: OutputKind) -> Result<(), CameraError> {
        let held = self.shared.state.lock().held_attach == Some(output);
        if held {
            if let Ok(permit) = self.shared.attach_gate.acquire().await {
                permit.forget();
            }
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        let mut state = self.shared.state.lock();
        if state.attach_failures.contains(&output) {
            return Err(CameraError::Attach {
                output: output.to_string(),
                details: "injected attach failure".to_string(),
            });
        }
        state.attach_log.push((self.lens, output));
        Ok(())
    }

    fn mark_closed(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            let mut state = self.shared.state.lock();
            state.live_devices = state.live_devices.saturating_sub(1);
            if matches!(&state.producer, Some((lens, _)) if *lens == self.lens) {
                state.producer = None;
            }
        }
    }
}

#[async_trait]
impl CameraDevice for MockCameraDevice {
    fn lens(&self) -> LensFacing {
        self.lens
    }

    async fn attach_preview(&self) -> Result<(), CameraError> {
        self.attach(OutputKind::Preview).await
    }

    async fn attach_analysis(&self, producer: FrameProducer) -> Result<(), CameraError> {
        self.attach(OutputKind::Analysis).await?;
        self.shared.state.lock().producer = Some((self.lens, producer));
        Ok(())
    }

    async fn attach_capture(&self) -> Result<(), CameraError> {
        self.attach(OutputKind::StillCapture).await
    }

    async fn detach(&self, output: OutputKind) -> Result<(), CameraError> {
        let mut state = self.shared.state.lock();
        if output == OutputKind::Analysis {
            state.producer = None;
        }
        state.detach_log.push((self.lens, output));
        Ok(())
    }

    async fn take_picture(&self) -> Result<StillPicture, CameraError> {
        let (hold, failure) = {
            let mut state = self.shared.state.lock();
            state.captures_started += 1;
            (state.hold_captures, state.capture_failure.clone())
        };

        if hold {
            if let Ok(permit) = self.shared.capture_gate.acquire().await {
                permit.forget();
            }
        }

        if self.closed.load(Ordering::Acquire) {
            return Err(CameraError::Closed);
        }
        if let Some(details) = failure {
            return Err(CameraError::Capture { details });
        }

        trace!("Mock {} camera took a picture", self.lens);
        Ok(StillPicture {
            jpeg: STUB_JPEG.to_vec(),
            width: STUB_WIDTH,
            height: STUB_HEIGHT,
            orientation: sensor_orientation(self.lens),
        })
    }

    async fn close(&self) {
        if !self.closed.load(Ordering::Acquire) {
            self.shared.state.lock().closed_explicitly += 1;
        }
        self.mark_closed();
    }
}

impl Drop for MockCameraDevice {
    fn drop(&mut self) {
        self.mark_closed();
    }
}
