//! The camera session worker.
//!
//! A single task owns the lifecycle state, the live [`SessionHandle`], the
//! in-flight capture and the analysis pipeline. Callers talk to it through
//! [`CameraSession`]; slow work (bind, unbind, capture, detection) runs on
//! spawned tasks that post a [`Completion`] back to the worker, so every
//! transition happens in one totally ordered place.

use super::handle::{bind_with_timeout, SessionHandle};
use super::interface::CameraBackend;
use super::state::SessionState;
use crate::analyzer::{FrameAnalysisDone, FrameAnalysisPipeline, PipelineStats};
use crate::camera::AnalysisFrame;
use crate::capture::{
    discard_late_image, perform_capture, run_detection, CaptureOutcome, CaptureReport,
    CaptureRequest, CapturedImage, DestinationAllocator, StageFailure,
};
use crate::detector::{FaceDetector, FaceResult};
use crate::error::{CaptureError, SessionError};
use crate::events::{EventBus, FaceSource, SessionEvent};
use crate::lens::{LensFacing, LensSelector};
use crate::permission::{PermissionGate, PermissionState};
use crate::storage::ImageStorage;
use std::mem;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tracing::{debug, error, info, trace, warn};
use uuid::Uuid;

/// Runtime settings for one camera session
#[derive(Debug, Clone)]
pub struct SessionConfig {
    pub initial_lens: LensFacing,
    /// Outstanding analysis frames before the camera drops at the source
    pub frame_budget: usize,
    pub bind_timeout: Duration,
    pub capture_timeout: Duration,
    pub detection_timeout: Duration,
    pub live_analysis: bool,
    pub command_capacity: usize,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            initial_lens: LensFacing::Back,
            frame_budget: 2,
            bind_timeout: Duration::from_secs(5),
            capture_timeout: Duration::from_secs(10),
            detection_timeout: Duration::from_secs(5),
            live_analysis: true,
            command_capacity: 32,
        }
    }
}

/// Externally visible session status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSnapshot {
    pub state: SessionState,
    /// Lens that is bound, or being bound or released
    pub active_lens: LensFacing,
    /// Lens the next bind will use
    pub selected_lens: LensFacing,
}

type Reply<T> = oneshot::Sender<T>;

enum Command {
    Start {
        reply: Reply<Result<(), SessionError>>,
    },
    Stop {
        reply: Reply<()>,
    },
    Rebind {
        lens: LensFacing,
        reply: Reply<Result<LensFacing, SessionError>>,
    },
    Flip {
        reply: Reply<LensFacing>,
    },
    Capture {
        reply: Reply<Result<CaptureReport, CaptureError>>,
    },
    Stats {
        reply: Reply<PipelineStats>,
    },
}

enum Completion {
    Bound {
        generation: u64,
        result: Result<SessionHandle, SessionError>,
    },
    Released {
        generation: u64,
    },
    StillCaptured {
        request_id: Uuid,
        result: Result<CapturedImage, StageFailure>,
    },
    Detected {
        request_id: Uuid,
        result: Result<FaceResult, CaptureError>,
    },
    Analysis(FrameAnalysisDone),
}

/// What the worker does once the current unbind finishes
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AfterUnbind {
    Idle,
    Rebind(LensFacing),
    Start,
}

struct InFlightCapture {
    request: CaptureRequest,
    reply: Reply<Result<CaptureReport, CaptureError>>,
    outcome: Option<CaptureOutcome>,
}

struct PendingRebind {
    lens: LensFacing,
    waiters: Vec<Reply<Result<LensFacing, SessionError>>>,
}

/// Everything the worker needs besides its own state
pub(crate) struct SessionParts {
    pub backend: Arc<dyn CameraBackend>,
    pub storage: Arc<dyn ImageStorage>,
    pub still_detector: Arc<dyn FaceDetector>,
    pub stream_detector: Arc<dyn FaceDetector>,
    pub permissions: Arc<PermissionGate>,
    pub events: EventBus,
    pub config: SessionConfig,
}

/// Handle to the camera session worker.
///
/// Cheap to clone. The worker shuts down, releasing the camera, once every
/// clone has been dropped.
#[derive(Clone)]
pub struct CameraSession {
    commands: mpsc::Sender<Command>,
    snapshot: watch::Receiver<SessionSnapshot>,
    events: EventBus,
}

impl CameraSession {
    pub(crate) fn spawn(parts: SessionParts) -> Self {
        let (commands, command_rx) = mpsc::channel(parts.config.command_capacity.max(1));
        let initial = SessionSnapshot {
            state: SessionState::Unbound,
            active_lens: parts.config.initial_lens,
            selected_lens: parts.config.initial_lens,
        };
        let (snapshot_tx, snapshot) = watch::channel(initial);
        let events = parts.events.clone();

        let worker = SessionWorker::new(parts, snapshot_tx);
        tokio::spawn(worker.run(command_rx));

        Self {
            commands,
            snapshot,
            events,
        }
    }

    async fn request<T>(&self, make: impl FnOnce(Reply<T>) -> Command) -> Option<T> {
        let (reply, rx) = oneshot::channel();
        self.commands.send(make(reply)).await.ok()?;
        rx.await.ok()
    }

    /// Bind the selected lens and all outputs.
    ///
    /// Resolves once the session is bound. Returns immediately when it
    /// already is.
    pub async fn start(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Start { reply })
            .await
            .unwrap_or(Err(SessionError::WorkerStopped))
    }

    /// Tear the session down. Idempotent; resolves once unbound.
    pub async fn stop(&self) -> Result<(), SessionError> {
        self.request(|reply| Command::Stop { reply })
            .await
            .ok_or(SessionError::WorkerStopped)
    }

    /// Rebind to `lens`, waiting for any capture in flight to finish first
    pub async fn rebind(&self, lens: LensFacing) -> Result<LensFacing, SessionError> {
        self.request(|reply| Command::Rebind { lens, reply })
            .await
            .unwrap_or(Err(SessionError::WorkerStopped))
    }

    /// Toggle the selected lens and return it.
    ///
    /// A bound session rebinds in the background; the rebind is queued while
    /// a capture is in flight.
    pub async fn flip_lens(&self) -> Result<LensFacing, SessionError> {
        self.request(|reply| Command::Flip { reply })
            .await
            .ok_or(SessionError::WorkerStopped)
    }

    /// Take a still photo and run face detection over it
    pub async fn capture(&self) -> Result<CaptureReport, CaptureError> {
        self.request(|reply| Command::Capture { reply })
            .await
            .unwrap_or(Err(CaptureError::WorkerStopped))
    }

    pub async fn pipeline_stats(&self) -> Result<PipelineStats, SessionError> {
        self.request(|reply| Command::Stats { reply })
            .await
            .ok_or(SessionError::WorkerStopped)
    }

    pub fn state(&self) -> SessionState {
        self.snapshot.borrow().state
    }

    /// Lens the next bind will use
    pub fn lens(&self) -> LensFacing {
        self.snapshot.borrow().selected_lens
    }

    pub fn snapshot(&self) -> SessionSnapshot {
        *self.snapshot.borrow()
    }

    /// Watch lifecycle changes without going through the event bus
    pub fn watch(&self) -> watch::Receiver<SessionSnapshot> {
        self.snapshot.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<SessionEvent> {
        self.events.subscribe()
    }

    pub fn event_bus(&self) -> &EventBus {
        &self.events
    }
}

struct SessionWorker {
    backend: Arc<dyn CameraBackend>,
    storage: Arc<dyn ImageStorage>,
    still_detector: Arc<dyn FaceDetector>,
    permissions: Arc<PermissionGate>,
    events: EventBus,
    config: SessionConfig,
    snapshot: watch::Sender<SessionSnapshot>,

    selector: LensSelector,
    state: SessionState,
    active_lens: LensFacing,
    generation: u64,
    handle: Option<SessionHandle>,
    pipeline: FrameAnalysisPipeline,
    allocator: DestinationAllocator,

    capture: Option<InFlightCapture>,
    pending_rebind: Option<PendingRebind>,
    after_unbind: AfterUnbind,
    stop_requested: bool,
    start_waiters: Vec<Reply<Result<(), SessionError>>>,
    /// Starts issued after a stop that is waiting for the current bind
    restart_waiters: Vec<Reply<Result<(), SessionError>>>,
    bind_waiters: Vec<Reply<Result<LensFacing, SessionError>>>,
    stop_waiters: Vec<Reply<()>>,

    completions_tx: mpsc::UnboundedSender<Completion>,
    completions_rx: mpsc::UnboundedReceiver<Completion>,
}

impl SessionWorker {
    fn new(parts: SessionParts, snapshot: watch::Sender<SessionSnapshot>) -> Self {
        let (completions_tx, completions_rx) = mpsc::unbounded_channel();
        let pipeline = FrameAnalysisPipeline::new(
            parts.stream_detector,
            parts.config.detection_timeout,
            parts.config.live_analysis,
        );

        Self {
            backend: parts.backend,
            storage: parts.storage,
            still_detector: parts.still_detector,
            permissions: parts.permissions,
            events: parts.events,
            selector: LensSelector::new(parts.config.initial_lens),
            active_lens: parts.config.initial_lens,
            config: parts.config,
            snapshot,
            state: SessionState::Unbound,
            generation: 0,
            handle: None,
            pipeline,
            allocator: DestinationAllocator::new(),
            capture: None,
            pending_rebind: None,
            after_unbind: AfterUnbind::Idle,
            stop_requested: false,
            start_waiters: Vec::new(),
            restart_waiters: Vec::new(),
            bind_waiters: Vec::new(),
            stop_waiters: Vec::new(),
            completions_tx,
            completions_rx,
        }
    }

    async fn run(mut self, mut commands: mpsc::Receiver<Command>) {
        info!("Camera session worker started");

        loop {
            tokio::select! {
                command = commands.recv() => match command {
                    Some(command) => self.handle_command(command).await,
                    None => break,
                },
                Some(completion) = self.completions_rx.recv() => {
                    self.handle_completion(completion).await;
                }
                frame = self.pipeline.next_frame() => self.handle_frame(frame),
            }
        }

        self.shutdown().await;
        info!("Camera session worker stopped");
    }

    async fn handle_command(&mut self, command: Command) {
        match command {
            Command::Start { reply } => self.on_start(reply).await,
            Command::Stop { reply } => self.on_stop(reply).await,
            Command::Rebind { lens, reply } => self.on_rebind(lens, reply).await,
            Command::Flip { reply } => {
                let lens = self.on_flip().await;
                let _ = reply.send(lens);
            }
            Command::Capture { reply } => self.on_capture(reply),
            Command::Stats { reply } => {
                let _ = reply.send(self.pipeline.stats());
            }
        }
    }

    async fn handle_completion(&mut self, completion: Completion) {
        match completion {
            Completion::Bound { generation, result } => {
                self.on_bind_complete(generation, result).await
            }
            Completion::Released { generation } => self.on_released(generation).await,
            Completion::StillCaptured { request_id, result } => {
                self.on_still_captured(request_id, result).await
            }
            Completion::Detected { request_id, result } => {
                self.on_detected(request_id, result).await
            }
            Completion::Analysis(done) => self.on_analysis_done(done).await,
        }
    }

    fn handle_frame(&mut self, frame: Option<AnalysisFrame>) {
        match frame {
            Some(frame) => {
                let completions = self.completions_tx.clone();
                self.pipeline.dispatch(frame, move |done| {
                    let _ = completions.send(Completion::Analysis(done));
                });
            }
            None => {
                warn!("Analysis stream closed by the camera");
                self.pipeline.detach();
            }
        }
    }

    // Commands

    async fn on_start(&mut self, reply: Reply<Result<(), SessionError>>) {
        match self.state {
            SessionState::Bound => {
                let _ = reply.send(Ok(()));
            }
            SessionState::Binding if self.stop_requested => {
                debug!("Start queued behind a pending stop");
                self.restart_waiters.push(reply);
            }
            SessionState::Binding => self.start_waiters.push(reply),
            SessionState::Unbinding | SessionState::Error => {
                if self.after_unbind == AfterUnbind::Idle {
                    self.after_unbind = AfterUnbind::Start;
                }
                self.start_waiters.push(reply);
            }
            SessionState::Unbound => {
                if self.permissions.check_granted() != PermissionState::Granted {
                    warn!("Camera start refused: permission not granted");
                    let _ = reply.send(Err(SessionError::PermissionDenied));
                    return;
                }
                self.start_waiters.push(reply);
                self.begin_bind(self.selector.current()).await;
            }
        }
    }

    async fn on_stop(&mut self, reply: Reply<()>) {
        match self.state {
            SessionState::Unbound => {
                let _ = reply.send(());
            }
            SessionState::Binding => {
                info!("Stop requested while binding, session will unbind once bound");
                self.stop_requested = true;
                for waiter in self.restart_waiters.drain(..) {
                    let _ = waiter.send(Err(SessionError::Cancelled));
                }
                self.stop_waiters.push(reply);
            }
            SessionState::Bound => {
                info!("Stopping camera session");
                self.stop_waiters.push(reply);
                self.cancel_capture().await;
                self.cancel_pending_rebind();
                self.begin_unbind(AfterUnbind::Idle).await;
            }
            SessionState::Unbinding | SessionState::Error => {
                self.after_unbind = AfterUnbind::Idle;
                self.cancel_waiters();
                self.stop_waiters.push(reply);
            }
        }
    }

    async fn on_rebind(&mut self, lens: LensFacing, reply: Reply<Result<LensFacing, SessionError>>) {
        self.selector.select(lens);
        self.publish_snapshot();

        match self.state {
            SessionState::Unbound | SessionState::Error => {
                let _ = reply.send(Err(SessionError::SessionNotReady { state: self.state }));
            }
            SessionState::Bound if self.capture.is_none() => {
                self.bind_waiters.push(reply);
                self.begin_unbind(AfterUnbind::Rebind(lens)).await;
            }
            SessionState::Bound | SessionState::Binding => self.queue_rebind(lens, Some(reply)),
            SessionState::Unbinding => match self.after_unbind {
                AfterUnbind::Rebind(_) | AfterUnbind::Start => {
                    self.after_unbind = AfterUnbind::Rebind(lens);
                    self.bind_waiters.push(reply);
                }
                AfterUnbind::Idle => {
                    let _ = reply.send(Err(SessionError::SessionNotReady { state: self.state }));
                }
            },
        }
    }

    async fn on_flip(&mut self) -> LensFacing {
        let lens = self.selector.flip();
        self.publish_snapshot();
        debug!("Lens flipped to {}", lens);

        match self.state {
            SessionState::Bound if self.capture.is_none() => {
                self.begin_unbind(AfterUnbind::Rebind(lens)).await;
            }
            SessionState::Bound | SessionState::Binding => self.queue_rebind(lens, None),
            SessionState::Unbinding => {
                if let AfterUnbind::Rebind(_) = self.after_unbind {
                    self.after_unbind = AfterUnbind::Rebind(lens);
                }
            }
            SessionState::Unbound | SessionState::Error => {}
        }
        lens
    }

    fn on_capture(&mut self, reply: Reply<Result<CaptureReport, CaptureError>>) {
        if self.state != SessionState::Bound {
            let _ = reply.send(Err(CaptureError::SessionNotReady { state: self.state }));
            return;
        }
        if self.capture.is_some() {
            debug!("Capture refused, another capture is in flight");
            let _ = reply.send(Err(CaptureError::CaptureInProgress));
            return;
        }
        let Some(device) = self.handle.as_ref().map(|h| h.device()) else {
            let _ = reply.send(Err(CaptureError::SessionNotReady { state: self.state }));
            return;
        };

        // Names already on disk are skipped by the capture task when it writes
        let directory = self.storage.resolve_output_location();
        let storage = Arc::clone(&self.storage);
        let name = self.allocator.allocate(chrono::Local::now(), |_| false);
        let request = CaptureRequest::new(directory.join(name), self.active_lens);
        info!(
            "Capture {} requested, saving to {}",
            request.id,
            request.destination.display()
        );

        let completions = self.completions_tx.clone();
        let task_request = request.clone();
        let limit = self.config.capture_timeout;
        tokio::spawn(async move {
            let result = perform_capture(&task_request, device, storage, limit).await;
            let _ = completions.send(Completion::StillCaptured {
                request_id: task_request.id,
                result,
            });
        });

        self.capture = Some(InFlightCapture {
            request,
            reply,
            outcome: None,
        });
    }

    // Completions

    async fn on_bind_complete(
        &mut self,
        generation: u64,
        result: Result<SessionHandle, SessionError>,
    ) {
        if generation != self.generation || self.state != SessionState::Binding {
            if let Ok(handle) = result {
                warn!("Releasing stale session handle {}", handle.generation());
                tokio::spawn(handle.release());
            }
            return;
        }

        match result {
            Ok(mut handle) => {
                let stream = handle.take_stream();
                self.handle = Some(handle);
                self.set_state(SessionState::Bound).await;

                if self.stop_requested {
                    drop(stream);
                    self.cancel_waiters();
                    self.cancel_pending_rebind();
                    let after = self.take_restart();
                    self.begin_unbind(after).await;
                    return;
                }

                if let Some(stream) = stream {
                    self.pipeline.attach(stream, self.active_lens);
                }
                for waiter in self.start_waiters.drain(..) {
                    let _ = waiter.send(Ok(()));
                }
                let lens = self.active_lens;
                for waiter in self.bind_waiters.drain(..) {
                    let _ = waiter.send(Ok(lens));
                }
                self.apply_pending_rebind().await;
            }
            Err(e) => {
                error!("Camera bind failed: {}", e);
                self.set_state(SessionState::Error).await;
                self.set_state(SessionState::Unbound).await;

                let stopped = self.stop_requested;
                let start_error = if stopped {
                    SessionError::Cancelled
                } else {
                    e.clone()
                };
                for waiter in self.start_waiters.drain(..) {
                    let _ = waiter.send(Err(start_error.clone()));
                }
                for waiter in self.bind_waiters.drain(..) {
                    let _ = waiter.send(Err(e.clone()));
                }
                if let Some(pending) = self.pending_rebind.take() {
                    for waiter in pending.waiters {
                        let _ = waiter.send(Err(e.clone()));
                    }
                }
                self.finish_stop();

                if stopped && self.take_restart() == AfterUnbind::Start {
                    self.restart_bind().await;
                }
            }
        }
    }

    async fn on_released(&mut self, generation: u64) {
        if generation != self.generation {
            return;
        }
        self.set_state(SessionState::Unbound).await;
        self.finish_stop();

        match mem::replace(&mut self.after_unbind, AfterUnbind::Idle) {
            AfterUnbind::Idle => {}
            AfterUnbind::Rebind(lens) => {
                info!("Rebinding camera session to {} camera", lens);
                self.begin_bind(lens).await;
            }
            AfterUnbind::Start => self.restart_bind().await,
        }
    }

    /// Bind again for the starts waiting in `start_waiters`
    async fn restart_bind(&mut self) {
        if self.permissions.check_granted() == PermissionState::Granted {
            self.begin_bind(self.selector.current()).await;
        } else {
            for waiter in self.start_waiters.drain(..) {
                let _ = waiter.send(Err(SessionError::PermissionDenied));
            }
        }
    }

    /// Move starts queued behind a stop into `start_waiters`
    fn take_restart(&mut self) -> AfterUnbind {
        if self.restart_waiters.is_empty() {
            return AfterUnbind::Idle;
        }
        let restarts = mem::take(&mut self.restart_waiters);
        self.start_waiters.extend(restarts);
        AfterUnbind::Start
    }

    async fn on_still_captured(
        &mut self,
        request_id: Uuid,
        result: Result<CapturedImage, StageFailure>,
    ) {
        if !self.is_current_capture(request_id) {
            if let Ok(image) = result {
                tokio::spawn(discard_late_image(Arc::clone(&self.storage), image));
            }
            return;
        }

        match result {
            Ok(image) => {
                let outcome = CaptureOutcome::Saved(image.clone());
                self.publish(SessionEvent::capture_outcome(request_id, outcome.clone()))
                    .await;
                if let Some(capture) = self.capture.as_mut() {
                    capture.request.destination = image.destination.clone();
                    capture.outcome = Some(outcome);
                }

                let detector = Arc::clone(&self.still_detector);
                let completions = self.completions_tx.clone();
                let limit = self.config.detection_timeout;
                tokio::spawn(async move {
                    let result = run_detection(detector, image, limit).await;
                    let _ = completions.send(Completion::Detected { request_id, result });
                });
            }
            Err(failure) => {
                let outcome = CaptureOutcome::Failed(failure.error);
                self.publish(SessionEvent::capture_outcome(request_id, outcome.clone()))
                    .await;
                if let Some(capture) = self.capture.take() {
                    let _ = capture.reply.send(Ok(CaptureReport {
                        request: capture.request,
                        outcome,
                        faces: None,
                    }));
                }

                if failure.timed_out {
                    self.fail_session("capture timed out").await;
                } else {
                    self.apply_pending_rebind().await;
                }
            }
        }
    }

    async fn on_detected(&mut self, request_id: Uuid, result: Result<FaceResult, CaptureError>) {
        if !self.is_current_capture(request_id) {
            trace!("Dropping detection result for cancelled capture {}", request_id);
            return;
        }
        let Some(capture) = self.capture.take() else {
            return;
        };
        let Some(outcome) = capture.outcome else {
            return;
        };

        if let CaptureOutcome::Saved(image) = &outcome {
            let source = FaceSource::Still {
                request_id,
                destination: image.destination.clone(),
                lens: image.lens,
            };
            self.publish(SessionEvent::face_result(source, result.clone()))
                .await;
        }

        let _ = capture.reply.send(Ok(CaptureReport {
            request: capture.request,
            outcome,
            faces: Some(result),
        }));

        self.apply_pending_rebind().await;
    }

    async fn on_analysis_done(&mut self, done: FrameAnalysisDone) {
        let Some(done) = self.pipeline.complete(done) else {
            return;
        };
        if self.state != SessionState::Bound {
            return;
        }

        let source = FaceSource::Frame {
            frame_id: done.frame_id,
            lens: done.lens,
        };
        let result = done.result.map_err(|e| CaptureError::DetectionFailed {
            reason: e.to_string(),
        });
        self.publish(SessionEvent::face_result(source, result)).await;
    }

    // Transitions

    async fn begin_bind(&mut self, lens: LensFacing) {
        self.generation += 1;
        self.active_lens = lens;
        self.stop_requested = false;
        self.set_state(SessionState::Binding).await;

        let backend = Arc::clone(&self.backend);
        let completions = self.completions_tx.clone();
        let generation = self.generation;
        let budget = self.config.frame_budget;
        let limit = self.config.bind_timeout;
        tokio::spawn(async move {
            let result = bind_with_timeout(backend, lens, generation, budget, limit).await;
            let _ = completions.send(Completion::Bound { generation, result });
        });
    }

    async fn begin_unbind(&mut self, after: AfterUnbind) {
        self.after_unbind = after;
        self.set_state(SessionState::Unbinding).await;
        self.release_handle();
    }

    /// Bound session failure: Error now, Unbound once the handle is released
    async fn fail_session(&mut self, reason: &str) {
        error!("Camera session failed: {}", reason);
        self.set_state(SessionState::Error).await;

        if let Some(pending) = self.pending_rebind.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(SessionError::BindFailed {
                    details: format!("session failed before rebind: {}", reason),
                }));
            }
        }
        self.after_unbind = AfterUnbind::Idle;
        self.release_handle();
    }

    fn release_handle(&mut self) {
        self.pipeline.detach();
        match self.handle.take() {
            Some(handle) => {
                let generation = handle.generation();
                let completions = self.completions_tx.clone();
                tokio::spawn(async move {
                    handle.release().await;
                    let _ = completions.send(Completion::Released { generation });
                });
            }
            None => {
                let _ = self.completions_tx.send(Completion::Released {
                    generation: self.generation,
                });
            }
        }
    }

    async fn apply_pending_rebind(&mut self) {
        if self.state != SessionState::Bound || self.capture.is_some() {
            return;
        }
        if let Some(pending) = self.pending_rebind.take() {
            info!("Applying queued rebind to {} camera", pending.lens);
            self.bind_waiters.extend(pending.waiters);
            self.begin_unbind(AfterUnbind::Rebind(pending.lens)).await;
        }
    }

    fn queue_rebind(&mut self, lens: LensFacing, reply: Option<Reply<Result<LensFacing, SessionError>>>) {
        debug!("Queueing rebind to {} camera", lens);
        let pending = self.pending_rebind.get_or_insert_with(|| PendingRebind {
            lens,
            waiters: Vec::new(),
        });
        pending.lens = lens;
        pending.waiters.extend(reply);
    }

    /// Resolve the capture in flight when the session stops.
    ///
    /// A photo that is already saved and announced stays saved; only its
    /// face delivery is cancelled.
    async fn cancel_capture(&mut self) {
        let Some(capture) = self.capture.take() else {
            return;
        };
        info!("Capture {} cancelled by stop", capture.request.id);

        match capture.outcome {
            Some(CaptureOutcome::Saved(image)) => {
                let source = FaceSource::Still {
                    request_id: capture.request.id,
                    destination: image.destination.clone(),
                    lens: image.lens,
                };
                self.publish(SessionEvent::face_result(
                    source,
                    Err(CaptureError::Cancelled),
                ))
                .await;
                let _ = capture.reply.send(Ok(CaptureReport {
                    request: capture.request,
                    outcome: CaptureOutcome::Saved(image),
                    faces: Some(Err(CaptureError::Cancelled)),
                }));
            }
            _ => {
                let _ = capture.reply.send(Err(CaptureError::Cancelled));
            }
        }
    }

    fn cancel_pending_rebind(&mut self) {
        if let Some(pending) = self.pending_rebind.take() {
            for waiter in pending.waiters {
                let _ = waiter.send(Err(SessionError::Cancelled));
            }
        }
    }

    /// Stop overtook every start and rebind still waiting
    fn cancel_waiters(&mut self) {
        for waiter in self.start_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Cancelled));
        }
        for waiter in self.bind_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Cancelled));
        }
    }

    fn finish_stop(&mut self) {
        self.stop_requested = false;
        for waiter in self.stop_waiters.drain(..) {
            let _ = waiter.send(());
        }
    }

    fn is_current_capture(&self, request_id: Uuid) -> bool {
        matches!(&self.capture, Some(c) if c.request.id == request_id)
    }

    async fn set_state(&mut self, next: SessionState) {
        if !self.state.can_transition_to(next) {
            warn!("Unexpected session transition {} -> {}", self.state, next);
        }
        debug!("Session state {} -> {}", self.state, next);
        self.state = next;
        self.publish_snapshot();
        self.publish(SessionEvent::state_changed(next, self.active_lens))
            .await;
    }

    fn publish_snapshot(&self) {
        let snapshot = SessionSnapshot {
            state: self.state,
            active_lens: self.active_lens,
            selected_lens: self.selector.current(),
        };
        self.snapshot.send_replace(snapshot);
    }

    async fn publish(&self, event: SessionEvent) {
        if let Err(e) = self.events.publish(event).await {
            trace!("Event not delivered: {}", e);
        }
    }

    async fn shutdown(&mut self) {
        self.cancel_capture().await;
        self.cancel_pending_rebind();
        self.cancel_waiters();
        for waiter in self.restart_waiters.drain(..) {
            let _ = waiter.send(Err(SessionError::Cancelled));
        }
        self.pipeline.detach();
        if let Some(handle) = self.handle.take() {
            handle.release().await;
        }
        self.finish_stop();
    }
}
