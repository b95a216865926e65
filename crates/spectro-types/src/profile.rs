use serde::{Deserialize, Serialize};

/// Per-channel column means of an RGB frame.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ChannelProfiles {
    pub red: Vec<f64>,
    pub green: Vec<f64>,
    pub blue: Vec<f64>,
}

/// Named sequence inside a [`SpectrumProfile`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Series {
    Gray,
    Red,
    Green,
    Blue,
    Combined,
}

impl Series {
    pub const ALL: [Series; 5] = [
        Series::Gray,
        Series::Red,
        Series::Green,
        Series::Blue,
        Series::Combined,
    ];

    pub fn label(self) -> &'static str {
        match self {
            Series::Gray => "gray",
            Series::Red => "red",
            Series::Green => "green",
            Series::Blue => "blue",
            Series::Combined => "combined",
        }
    }
}

/// One reduction of one frame. Values stay in raw 8-bit intensity units.
///
/// Built fresh on every reduction and handed out whole; never updated in place.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SpectrumProfile {
    pub frame_sequence: u64,
    pub gray: Vec<f64>,
    pub red: Vec<f64>,
    pub green: Vec<f64>,
    pub blue: Vec<f64>,
    pub combined: Vec<f64>,
}

impl SpectrumProfile {
    pub fn empty(frame_sequence: u64) -> Self {
        Self {
            frame_sequence,
            ..Default::default()
        }
    }

    pub fn len(&self) -> usize {
        self.gray.len()
    }

    pub fn is_empty(&self) -> bool {
        self.gray.is_empty()
    }

    pub fn series(&self, series: Series) -> &[f64] {
        match series {
            Series::Gray => &self.gray,
            Series::Red => &self.red,
            Series::Green => &self.green,
            Series::Blue => &self.blue,
            Series::Combined => &self.combined,
        }
    }

    /// Column index and value of the brightest position of `series`.
    pub fn peak(&self, series: Series) -> Option<(usize, f64)> {
        self.series(series)
            .iter()
            .copied()
            .enumerate()
            .fold(None, |best, (idx, value)| match best {
                Some((_, top)) if top >= value => best,
                _ => Some((idx, value)),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peak_prefers_first_maximum() {
        let profile = SpectrumProfile {
            gray: vec![1.0, 7.5, 3.0, 7.5],
            ..Default::default()
        };
        assert_eq!(profile.peak(Series::Gray), Some((1, 7.5)));
        assert_eq!(profile.peak(Series::Red), None);
    }
}
