//! Frame reduction into spectral profiles, plus capture persistence.

mod capture;
pub mod reduce;

use spectro_types::SpectroError;

pub use capture::{save_frame_to, write_profile_json, CaptureWriter};
pub use reduce::{channel_profiles, combined_profile, dominant_colors, grayscale_profile, reduce};

pub fn vision_error(message: impl Into<String>) -> SpectroError {
    SpectroError::Vision(message.into())
}
