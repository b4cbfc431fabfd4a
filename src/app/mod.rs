mod metadata;
mod orchestrator;
mod runtime;
mod shutdown;
mod startup;
mod state;
mod types;


pub use metadata::{sidecar_path, PhotoMetadata};
pub use orchestrator::FacecamApp;
pub use types::{ComponentState, ShutdownReason};
