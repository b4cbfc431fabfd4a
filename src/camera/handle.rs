use super::interface::{CameraBackend, CameraDevice, OutputKind};
use super::stream::{frame_channel, AnalysisStream};
use crate::error::{CameraError, SessionError};
use crate::lens::LensFacing;
use std::sync::Arc;
use std::time::Duration;
use tokio::time::{timeout_at, Instant};
use tracing::{debug, info, warn};

/// Live binding of one camera and all of its outputs.
///
/// Owned by the session worker only. It must be released with
/// [`SessionHandle::release`] before another handle is created.
pub struct SessionHandle {
    generation: u64,
    lens: LensFacing,
    device: Arc<dyn CameraDevice>,
    stream: Option<AnalysisStream>,
}

impl SessionHandle {
    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn lens(&self) -> LensFacing {
        self.lens
    }

    /// Device reference for the still-capture stage of the current request
    pub(crate) fn device(&self) -> Arc<dyn CameraDevice> {
        Arc::clone(&self.device)
    }

    /// Hand the analysis stream to the frame pipeline
    pub(crate) fn take_stream(&mut self) -> Option<AnalysisStream> {
        self.stream.take()
    }

    /// Detach every output in reverse bind order, then close the device.
    ///
    /// Teardown continues past individual detach failures.
    pub async fn release(self) {
        debug!(
            "Releasing session handle {} ({} camera)",
            self.generation, self.lens
        );
        drop(self.stream);
        detach_all(self.device.as_ref(), &OutputKind::BIND_ORDER).await;
        self.device.close().await;
        info!("Camera session {} released", self.generation);
    }
}

impl std::fmt::Debug for SessionHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionHandle")
            .field("generation", &self.generation)
            .field("lens", &self.lens)
            .field("has_stream", &self.stream.is_some())
            .finish()
    }
}

async fn detach_all(device: &dyn CameraDevice, attached: &[OutputKind]) {
    for output in attached.iter().rev() {
        if let Err(e) = device.detach(*output).await {
            warn!("Failed to detach {} output: {}", output, e);
        }
    }
}

async fn attach_output(
    device: &dyn CameraDevice,
    output: OutputKind,
    stream_slot: &mut Option<AnalysisStream>,
    frame_budget: usize,
) -> Result<(), CameraError> {
    match output {
        OutputKind::Preview => device.attach_preview().await,
        OutputKind::Analysis => {
            let (producer, stream) = frame_channel(frame_budget);
            device.attach_analysis(producer).await?;
            *stream_slot = Some(stream);
            Ok(())
        }
        OutputKind::StillCapture => device.attach_capture().await,
    }
}

/// Open `lens` and attach all outputs before `deadline`, or nothing at all.
///
/// A failed or overdue attach unwinds the outputs attached so far and closes
/// the device before the error is returned.
pub(crate) async fn bind_outputs(
    backend: &dyn CameraBackend,
    lens: LensFacing,
    generation: u64,
    frame_budget: usize,
    deadline: Instant,
) -> Result<SessionHandle, SessionError> {
    info!("Binding {} camera via {} backend", lens, backend.name());

    let device = match timeout_at(deadline, backend.open(lens)).await {
        Ok(Ok(device)) => device,
        Ok(Err(e)) => {
            return Err(SessionError::BindFailed {
                details: e.to_string(),
            })
        }
        Err(_) => return Err(bind_timed_out(lens)),
    };

    let mut stream = None;
    let mut attached = Vec::with_capacity(OutputKind::BIND_ORDER.len());

    for output in OutputKind::BIND_ORDER {
        let result = timeout_at(
            deadline,
            attach_output(device.as_ref(), output, &mut stream, frame_budget),
        )
        .await;

        let error = match result {
            Ok(Ok(())) => {
                debug!("Attached {} output", output);
                attached.push(output);
                continue;
            }
            Ok(Err(e)) => SessionError::BindFailed {
                details: e.to_string(),
            },
            Err(_) => bind_timed_out(lens),
        };

        warn!(
            "Attaching {} output failed, unwinding {} attached output(s): {}",
            output,
            attached.len(),
            error
        );
        drop(stream);
        detach_all(device.as_ref(), &attached).await;
        device.close().await;
        return Err(error);
    }

    Ok(SessionHandle {
        generation,
        lens,
        device,
        stream,
    })
}

/// [`bind_outputs`] with `limit` to finish in
pub(crate) async fn bind_with_timeout(
    backend: Arc<dyn CameraBackend>,
    lens: LensFacing,
    generation: u64,
    frame_budget: usize,
    limit: Duration,
) -> Result<SessionHandle, SessionError> {
    let deadline = Instant::now() + limit;
    bind_outputs(backend.as_ref(), lens, generation, frame_budget, deadline).await
}

fn bind_timed_out(lens: LensFacing) -> SessionError {
    warn!("Binding {} camera timed out", lens);
    SessionError::BindFailed {
        details: "bind timed out".to_string(),
    }
}
