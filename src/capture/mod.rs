mod naming;
mod request;
mod workflow;

pub use naming::{DestinationAllocator, FILENAME_FORMAT, FILE_EXTENSION};
pub use request::{CaptureOutcome, CaptureReport, CaptureRequest, CapturedImage, FaceDelivery};

pub(crate) use workflow::{discard_late_image, perform_capture, run_detection, StageFailure};
