use std::fmt;

use serde::{Deserialize, Serialize};

use crate::{frame::Resolution, Result, SpectroError};

/// Crop rectangle in native frame pixels, half-open: `[x0, x1) x [y0, y1)`.
///
/// Invariant: `x0 < x1 <= native.width` and `y0 < y1 <= native.height` for the
/// resolution it was validated against.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RawRoi")]
pub struct Roi {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

#[derive(Deserialize)]
struct RawRoi {
    x0: u32,
    y0: u32,
    x1: u32,
    y1: u32,
}

impl TryFrom<RawRoi> for Roi {
    type Error = SpectroError;

    fn try_from(raw: RawRoi) -> Result<Self> {
        Self::ordered(raw.x0, raw.y0, raw.x1, raw.y1)
    }
}

impl Roi {
    pub fn new(x0: u32, y0: u32, x1: u32, y1: u32, native: Resolution) -> Result<Self> {
        let roi = Self::ordered(x0, y0, x1, y1)?;
        if !roi.fits(native) {
            return Err(SpectroError::InvalidRoi(format!(
                "rectangle ({x0},{y0})-({x1},{y1}) exceeds native resolution {native}"
            )));
        }
        Ok(roi)
    }

    fn ordered(x0: u32, y0: u32, x1: u32, y1: u32) -> Result<Self> {
        if x0 >= x1 || y0 >= y1 {
            return Err(SpectroError::InvalidRoi(format!(
                "degenerate rectangle ({x0},{y0})-({x1},{y1})"
            )));
        }
        Ok(Self { x0, y0, x1, y1 })
    }

    /// Re-check this rectangle against `native`.
    pub fn validate(&self, native: Resolution) -> Result<Self> {
        Self::new(self.x0, self.y0, self.x1, self.y1, native)
    }

    /// Rectangle covering the whole native frame.
    pub fn full(native: Resolution) -> Result<Self> {
        Self::new(0, 0, native.width, native.height, native)
    }

    /// Map a rectangle drawn on a (possibly rescaled) preview canvas to native
    /// coordinates.
    ///
    /// Each coordinate is scaled with `native = display * native_dim / canvas_dim`
    /// (floored), then endpoints are sorted. Points outside the canvas are rejected.
    pub fn from_canvas(rect: CanvasRect, canvas: CanvasSize, native: Resolution) -> Result<Self> {
        if canvas.width == 0 || canvas.height == 0 {
            return Err(SpectroError::InvalidRoi(format!(
                "preview canvas has no area ({}x{})",
                canvas.width, canvas.height
            )));
        }
        for point in [rect.start, rect.end] {
            if !canvas.contains(point) {
                return Err(SpectroError::InvalidRoi(format!(
                    "point ({},{}) lies outside the {}x{} canvas",
                    point.x, point.y, canvas.width, canvas.height
                )));
            }
        }

        let scale = |value: i32, canvas_dim: u32, native_dim: u32| -> u32 {
            (value as u64 * native_dim as u64 / canvas_dim as u64) as u32
        };
        let (ax, bx) = sorted(rect.start.x, rect.end.x);
        let (ay, by) = sorted(rect.start.y, rect.end.y);

        Self::new(
            scale(ax, canvas.width, native.width),
            scale(ay, canvas.height, native.height),
            scale(bx, canvas.width, native.width),
            scale(by, canvas.height, native.height),
            native,
        )
    }

    pub fn x0(&self) -> u32 {
        self.x0
    }

    pub fn y0(&self) -> u32 {
        self.y0
    }

    pub fn x1(&self) -> u32 {
        self.x1
    }

    pub fn y1(&self) -> u32 {
        self.y1
    }

    pub fn width(&self) -> u32 {
        self.x1 - self.x0
    }

    pub fn height(&self) -> u32 {
        self.y1 - self.y0
    }

    pub fn fits(&self, native: Resolution) -> bool {
        self.x1 <= native.width && self.y1 <= native.height
    }
}

impl fmt::Display for Roi {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({},{})-({},{})", self.x0, self.y0, self.x1, self.y1)
    }
}

fn sorted(a: i32, b: i32) -> (i32, i32) {
    if a <= b {
        (a, b)
    } else {
        (b, a)
    }
}

/// A pointer position on the preview canvas. Drag gestures can leave the
/// widget, hence signed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasPoint {
    pub x: i32,
    pub y: i32,
}

impl CanvasPoint {
    pub const fn new(x: i32, y: i32) -> Self {
        Self { x, y }
    }
}

/// Press and release positions of a drag gesture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasRect {
    pub start: CanvasPoint,
    pub end: CanvasPoint,
}

impl CanvasRect {
    pub const fn new(start: CanvasPoint, end: CanvasPoint) -> Self {
        Self { start, end }
    }
}

/// Current pixel dimensions of the preview canvas.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CanvasSize {
    pub width: u32,
    pub height: u32,
}

impl CanvasSize {
    pub const fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }

    /// Inclusive of the far edge: releasing on the border selects up to it.
    pub fn contains(&self, point: CanvasPoint) -> bool {
        point.x >= 0
            && point.y >= 0
            && point.x as i64 <= self.width as i64
            && point.y as i64 <= self.height as i64
    }
}
