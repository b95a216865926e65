use spectro_types::{
    frame::Resolution,
    roi::{CanvasRect, CanvasSize, Roi},
    Result, SpectroError,
};

/// Result of checking an incoming frame against the native resolution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResolutionCheck {
    /// First frame seen; its size is now the ROI coordinate space.
    Captured(Resolution),
    Unchanged,
    /// Size changed mid-stream. The new size becomes native and any ROI is dropped.
    Changed {
        expected: Resolution,
        actual: Resolution,
        cleared: Option<Roi>,
    },
}

/// Optional crop rectangle plus the native resolution it is expressed in.
#[derive(Debug, Clone, Default)]
pub struct RoiManager {
    native: Option<Resolution>,
    active: Option<Roi>,
}

impl RoiManager {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn native(&self) -> Option<Resolution> {
        self.native
    }

    pub fn active(&self) -> Option<Roi> {
        self.active
    }

    pub fn observe(&mut self, actual: Resolution) -> ResolutionCheck {
        match self.native {
            None => {
                self.native = Some(actual);
                ResolutionCheck::Captured(actual)
            }
            Some(expected) if expected == actual => ResolutionCheck::Unchanged,
            Some(expected) => {
                self.native = Some(actual);
                ResolutionCheck::Changed {
                    expected,
                    actual,
                    cleared: self.active.take(),
                }
            }
        }
    }

    /// Replace the ROI with a rectangle drawn on a preview canvas. On error the
    /// previous ROI is left untouched.
    pub fn select(&mut self, rect: CanvasRect, canvas: CanvasSize) -> Result<Roi> {
        let native = self.require_native()?;
        let roi = Roi::from_canvas(rect, canvas, native)?;
        self.active = Some(roi);
        Ok(roi)
    }

    /// Replace the ROI with a rectangle already in native coordinates.
    pub fn set(&mut self, roi: Roi) -> Result<()> {
        let native = self.require_native()?;
        self.active = Some(roi.validate(native)?);
        Ok(())
    }

    pub fn reset(&mut self) -> Option<Roi> {
        self.active.take()
    }

    fn require_native(&self) -> Result<Resolution> {
        self.native.ok_or_else(|| {
            SpectroError::InvalidRoi("native resolution unknown until a frame has arrived".into())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use spectro_types::roi::CanvasPoint;

    fn drag(x0: i32, y0: i32, x1: i32, y1: i32) -> CanvasRect {
        CanvasRect::new(CanvasPoint::new(x0, y0), CanvasPoint::new(x1, y1))
    }

    #[test]
    fn selection_requires_known_resolution() {
        let mut manager = RoiManager::new();
        let err = manager
            .select(drag(0, 0, 10, 10), CanvasSize::new(20, 20))
            .unwrap_err();
        assert!(matches!(err, SpectroError::InvalidRoi(_)));
    }

    #[test]
    fn invalid_selection_keeps_previous_roi() {
        let mut manager = RoiManager::new();
        manager.observe(Resolution::new(640, 480));
        let canvas = CanvasSize::new(320, 240);
        let roi = manager.select(drag(10, 10, 100, 60), canvas).unwrap();
        assert_eq!((roi.x0(), roi.y0(), roi.x1(), roi.y1()), (20, 20, 200, 120));

        assert!(manager.select(drag(50, 50, 50, 90), canvas).is_err());
        assert_eq!(manager.active(), Some(roi));
    }

    #[test]
    fn resolution_change_clears_roi() {
        let mut manager = RoiManager::new();
        let first = Resolution::new(800, 600);
        assert_eq!(manager.observe(first), ResolutionCheck::Captured(first));
        assert_eq!(manager.observe(first), ResolutionCheck::Unchanged);

        let roi = Roi::new(0, 0, 100, 100, first).unwrap();
        manager.set(roi).unwrap();

        let second = Resolution::new(1024, 768);
        assert_eq!(
            manager.observe(second),
            ResolutionCheck::Changed {
                expected: first,
                actual: second,
                cleared: Some(roi),
            }
        );
        assert_eq!(manager.active(), None);
        assert_eq!(manager.native(), Some(second));
    }

    #[test]
    fn set_rejects_out_of_bounds() {
        let mut manager = RoiManager::new();
        manager.observe(Resolution::new(100, 50));
        let too_big = Roi::new(0, 0, 100, 60, Resolution::new(100, 60)).unwrap();
        assert!(manager.set(too_big).is_err());
        assert_eq!(manager.reset(), None);
    }

    #[test]
    fn set_keeps_prior_roi_on_error() {
        let native = Resolution::new(100, 50);
        let mut manager = RoiManager::new();
        manager.observe(native);
        let good = Roi::new(10, 10, 40, 30, native).unwrap();
        manager.set(good).unwrap();

        let too_big = Roi::new(0, 0, 100, 60, Resolution::new(100, 60)).unwrap();
        assert!(matches!(manager.set(too_big), Err(SpectroError::InvalidRoi(_))));
        assert_eq!(manager.active(), Some(good));
    }
}
