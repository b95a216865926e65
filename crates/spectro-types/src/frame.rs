use std::{fmt, sync::Arc, time::Instant};

use serde::{Deserialize, Serialize};

use crate::{roi::Roi, Result, SpectroError};

pub const CHANNELS: usize = 3;

/// Pixel dimensions of a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }
}

impl fmt::Display for Resolution {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

/// Immutable, row-major RGB8 pixel buffer.
///
/// Cloning is cheap: pixel data is shared. A frame remembers where its top-left
/// pixel sits in the native (uncropped) coordinate space, so cropping an
/// already-cropped frame by the same [`Roi`] is a no-op.
#[derive(Clone)]
pub struct Frame {
    width: u32,
    height: u32,
    origin: (u32, u32),
    pixels: Arc<[u8]>,
    sequence: u64,
    captured_at: Instant,
}

impl Frame {
    pub fn from_rgb(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * CHANNELS;
        if pixels.len() != expected {
            return Err(SpectroError::Vision(format!(
                "RGB buffer for {width}x{height} must hold {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            origin: (0, 0),
            pixels: pixels.into(),
            sequence: 0,
            captured_at: Instant::now(),
        })
    }

    /// Frame with every pixel set to `rgb`.
    pub fn filled(width: u32, height: u32, rgb: [u8; 3]) -> Self {
        let count = width as usize * height as usize;
        let mut pixels = Vec::with_capacity(count * CHANNELS);
        for _ in 0..count {
            pixels.extend_from_slice(&rgb);
        }
        Self {
            width,
            height,
            origin: (0, 0),
            pixels: pixels.into(),
            sequence: 0,
            captured_at: Instant::now(),
        }
    }

    pub fn with_sequence(mut self, sequence: u64) -> Self {
        self.sequence = sequence;
        self
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn resolution(&self) -> Resolution {
        Resolution::new(self.width, self.height)
    }

    /// Top-left corner in native frame coordinates.
    pub fn origin(&self) -> (u32, u32) {
        self.origin
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn captured_at(&self) -> Instant {
        self.captured_at
    }

    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }

    pub fn is_empty(&self) -> bool {
        self.width == 0 || self.height == 0
    }

    pub fn pixel(&self, x: u32, y: u32) -> Option<[u8; 3]> {
        if x >= self.width || y >= self.height {
            return None;
        }
        let idx = (y as usize * self.width as usize + x as usize) * CHANNELS;
        Some([self.pixels[idx], self.pixels[idx + 1], self.pixels[idx + 2]])
    }

    /// Iterate over rows as RGB byte slices.
    pub fn rows(&self) -> impl Iterator<Item = &[u8]> {
        let stride = (self.width as usize * CHANNELS).max(1);
        self.pixels.chunks_exact(stride).take(self.height as usize)
    }

    /// Crop to the intersection of `roi` and this frame's native extent.
    ///
    /// Out-of-bounds regions are clamped; an empty intersection yields a
    /// zero-sized frame rather than an error.
    pub fn crop(&self, roi: &Roi) -> Frame {
        let (ox, oy) = self.origin;
        let x0 = roi.x0().max(ox).min(ox + self.width);
        let x1 = roi.x1().min(ox + self.width).max(x0);
        let y0 = roi.y0().max(oy).min(oy + self.height);
        let y1 = roi.y1().min(oy + self.height).max(y0);

        if (x0, y0, x1, y1) == (ox, oy, ox + self.width, oy + self.height) {
            return self.clone();
        }

        let width = x1 - x0;
        let height = y1 - y0;
        let stride = self.width as usize * CHANNELS;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * CHANNELS);
        for row in (y0 - oy)..(y1 - oy) {
            let start = row as usize * stride + (x0 - ox) as usize * CHANNELS;
            pixels.extend_from_slice(&self.pixels[start..start + width as usize * CHANNELS]);
        }

        Frame {
            width,
            height,
            origin: (x0, y0),
            pixels: pixels.into(),
            sequence: self.sequence,
            captured_at: self.captured_at,
        }
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .field("origin", &self.origin)
            .field("sequence", &self.sequence)
            .finish_non_exhaustive()
    }
}

impl PartialEq for Frame {
    fn eq(&self, other: &Self) -> bool {
        self.width == other.width
            && self.height == other.height
            && self.origin == other.origin
            && self.pixels == other.pixels
    }
}
