mod builder;
mod handle;
mod interface;
mod mock;
mod session;
mod simulated;
mod state;
mod stream;
#[cfg(test)]
mod tests;

pub use builder::CameraSessionBuilder;
pub use handle::SessionHandle;
pub use interface::{sensor_orientation, CameraBackend, CameraDevice, OutputKind, StillPicture};
pub use mock::MockCameraBackend;
pub use session::{CameraSession, SessionConfig, SessionSnapshot};
pub use simulated::{SimulatedCameraBackend, SimulatedCameraConfig};
pub use state::SessionState;
pub use stream::{frame_channel, AnalysisFrame, AnalysisStream, FrameProducer};
