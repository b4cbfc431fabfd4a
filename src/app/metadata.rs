//! JSON sidecars describing the faces found in each saved photo.

use crate::detector::FaceRecord;
use crate::error::{EventBusError, FacecamError, Result};
use crate::events::{EventFilter, EventReceiver, FaceSource, SessionEvent};
use crate::lens::LensFacing;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tokio::fs;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, warn};
use uuid::Uuid;

/// Contents of `<photo-stem>.json`
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PhotoMetadata {
    pub request_id: Uuid,
    pub image: PathBuf,
    pub lens: LensFacing,
    pub written_at: DateTime<Utc>,
    pub face_count: usize,
    pub faces: Vec<FaceRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub detection_error: Option<String>,
}

/// Sidecar location for a photo
pub fn sidecar_path(image: &Path) -> PathBuf {
    image.with_extension("json")
}

pub(crate) async fn save_metadata(metadata: &PhotoMetadata) -> Result<PathBuf> {
    let metadata_json = serde_json::to_string_pretty(metadata).map_err(|e| {
        FacecamError::component("metadata", &format!("Failed to serialize metadata: {}", e))
    })?;

    let metadata_path = sidecar_path(&metadata.image);
    fs::write(&metadata_path, metadata_json).await.map_err(|e| {
        FacecamError::component(
            "metadata",
            &format!("Failed to write metadata file: {}", e),
        )
    })?;

    debug!("Saved metadata to {}", metadata_path.display());
    Ok(metadata_path)
}

/// Build the sidecar for a still face result; other events yield `None`
pub(crate) fn metadata_for(event: &SessionEvent) -> Option<PhotoMetadata> {
    let SessionEvent::FaceResult {
        source:
            FaceSource::Still {
                request_id,
                destination,
                lens,
            },
        result,
        ..
    } = event
    else {
        return None;
    };

    let (faces, detection_error) = match result {
        Ok(faces) => (faces.iter().cloned().collect::<Vec<_>>(), None),
        Err(e) => (Vec::new(), Some(e.to_string())),
    };

    Some(PhotoMetadata {
        request_id: *request_id,
        image: destination.clone(),
        lens: *lens,
        written_at: Utc::now(),
        face_count: faces.len(),
        faces,
        detection_error,
    })
}

/// Write a sidecar for every still face result until cancelled
pub(crate) fn spawn_metadata_writer(
    mut receiver: EventReceiver,
    token: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            let event = tokio::select! {
                _ = token.cancelled() => break,
                event = receiver.recv() => event,
            };

            match event {
                Ok(event) => {
                    if let Some(metadata) = metadata_for(&event) {
                        if let Err(e) = save_metadata(&metadata).await {
                            error!("{}", e);
                        }
                    }
                }
                Err(EventBusError::ChannelClosed) => break,
                Err(e) => warn!("Metadata writer missed events: {}", e),
            }
        }
        debug!("Metadata writer stopped");
    })
}

/// Receiver for the metadata writer
pub(crate) fn metadata_filter() -> EventFilter {
    EventFilter::Custom(|event| metadata_for(event).is_some())
}
