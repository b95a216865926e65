use std::{
    fs,
    path::{Path, PathBuf},
};

use chrono::Utc;
use image::{ImageBuffer, Rgb};
use spectro_types::{frame::Frame, profile::SpectrumProfile, Result};
use tracing::info;

use crate::vision_error;

/// Writes captured frames into a directory with timestamped names.
#[derive(Debug, Clone)]
pub struct CaptureWriter {
    dir: PathBuf,
}

impl CaptureWriter {
    pub fn new(dir: impl Into<PathBuf>) -> Self {
        Self { dir: dir.into() }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    /// Save `frame` as `frame_<timestamp>.png` and return the path.
    pub fn save_frame(&self, frame: &Frame) -> Result<PathBuf> {
        fs::create_dir_all(&self.dir).map_err(|err| {
            vision_error(format!(
                "failed to create capture dir {}: {err}",
                self.dir.display()
            ))
        })?;
        let timestamp = Utc::now().format("%Y%m%d_%H%M%S_%3f");
        let path = self.dir.join(format!("frame_{timestamp}.png"));
        save_frame_to(frame, &path)?;
        info!("Saved capture {:?}", path);
        Ok(path)
    }
}

/// Encode `frame` to whatever format the extension of `path` names.
pub fn save_frame_to(frame: &Frame, path: &Path) -> Result<()> {
    if frame.is_empty() {
        return Err(vision_error("cannot save a frame without pixels"));
    }
    let Some(buffer) =
        ImageBuffer::<Rgb<u8>, _>::from_raw(frame.width(), frame.height(), frame.pixels().to_vec())
    else {
        return Err(vision_error("failed to build image buffer"));
    };
    buffer
        .save(path)
        .map_err(|err| vision_error(format!("failed to save frame {}: {err}", path.display())))
}

/// Dump the raw profile sequences as JSON.
pub fn write_profile_json(profile: &SpectrumProfile, path: &Path) -> Result<()> {
    let doc = serde_json::to_vec_pretty(profile)
        .map_err(|err| vision_error(format!("failed to encode profile: {err}")))?;
    fs::write(path, doc)
        .map_err(|err| vision_error(format!("failed to write {}: {err}", path.display())))
}
