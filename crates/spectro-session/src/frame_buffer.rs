use std::sync::{Mutex, MutexGuard, PoisonError};

use spectro_types::{
    frame::{Frame, Resolution},
    roi::{CanvasRect, CanvasSize, Roi},
    Result,
};

use crate::roi::{ResolutionCheck, RoiManager};

/// Single-slot, latest-wins hand-off between the acquisition loop and reducers.
///
/// The ROI crop runs once per publish, outside the slot lock; readers only
/// ever clone a reference-counted frame, so a reader never blocks the
/// producer for longer than a pointer swap and never sees a partial frame.
#[derive(Debug, Default)]
pub struct FrameBuffer {
    slot: Mutex<Option<Frame>>,
    roi: Mutex<RoiManager>,
}

impl FrameBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Store `frame` (cropped to the active ROI) as the latest frame.
    pub fn publish(&self, frame: Frame) -> ResolutionCheck {
        let (check, roi) = {
            let mut manager = lock(&self.roi);
            let check = manager.observe(frame.resolution());
            (check, manager.active())
        };
        let frame = match roi {
            Some(roi) => frame.crop(&roi),
            None => frame,
        };
        *lock(&self.slot) = Some(frame);
        check
    }

    pub fn latest(&self) -> Option<Frame> {
        lock(&self.slot).clone()
    }

    /// Drop the held frame, if any.
    pub fn clear(&self) {
        lock(&self.slot).take();
    }

    pub fn native_resolution(&self) -> Option<Resolution> {
        lock(&self.roi).native()
    }

    pub fn active_roi(&self) -> Option<Roi> {
        lock(&self.roi).active()
    }

    pub fn select_roi(&self, rect: CanvasRect, canvas: CanvasSize) -> Result<Roi> {
        lock(&self.roi).select(rect, canvas)
    }

    pub fn set_roi(&self, roi: Roi) -> Result<()> {
        lock(&self.roi).set(roi)
    }

    pub fn reset_roi(&self) -> Option<Roi> {
        lock(&self.roi).reset()
    }
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}
