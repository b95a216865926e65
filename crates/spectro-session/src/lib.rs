//! Stream session: latest-frame buffer, ROI handling, periodic analysis and
//! the controller state machine tying them together.

mod controller;
mod frame_buffer;
pub mod roi;
pub mod scheduler;
mod window;

use spectro_types::SpectroError;

pub use controller::SessionController;
pub use frame_buffer::FrameBuffer;
pub use roi::{ResolutionCheck, RoiManager};
pub use scheduler::{PeriodicTaskScheduler, TaskHandle};
pub use window::AnalysisWindow;

pub fn session_error(message: impl Into<String>) -> SpectroError {
    SpectroError::Session(message.into())
}
