//! Column-wise reduction of RGB frames into 1-D spectral profiles.
//!
//! Grayscale uses equal channel weights, `(R + G + B) / 3`, evaluated in
//! floating point per pixel. The same weights define the combined profile, so
//! `grayscale_profile(f)` and `combined_profile(&channel_profiles(f))` agree up
//! to rounding.

use std::collections::HashMap;

use spectro_types::{
    frame::{Frame, CHANNELS},
    profile::{ChannelProfiles, SpectrumProfile},
};

pub fn grayscale_profile(frame: &Frame) -> Vec<f64> {
    column_means(frame, |px| {
        (f64::from(px[0]) + f64::from(px[1]) + f64::from(px[2])) / 3.0
    })
}

pub fn channel_profiles(frame: &Frame) -> ChannelProfiles {
    if frame.is_empty() {
        return ChannelProfiles::default();
    }
    let width = frame.width() as usize;
    let mut red = vec![0.0; width];
    let mut green = vec![0.0; width];
    let mut blue = vec![0.0; width];
    for row in frame.rows() {
        for (x, px) in row.chunks_exact(CHANNELS).enumerate() {
            red[x] += f64::from(px[0]);
            green[x] += f64::from(px[1]);
            blue[x] += f64::from(px[2]);
        }
    }
    let rows = f64::from(frame.height());
    for column in [&mut red, &mut green, &mut blue] {
        column.iter_mut().for_each(|sum| *sum /= rows);
    }
    ChannelProfiles { red, green, blue }
}

/// Unweighted mean of the three channel profiles.
pub fn combined_profile(channels: &ChannelProfiles) -> Vec<f64> {
    channels
        .red
        .iter()
        .zip(&channels.green)
        .zip(&channels.blue)
        .map(|((r, g), b)| (r + g + b) / 3.0)
        .collect()
}

/// Every profile for one frame.
pub fn reduce(frame: &Frame) -> SpectrumProfile {
    if frame.is_empty() {
        return SpectrumProfile::empty(frame.sequence());
    }
    let gray = grayscale_profile(frame);
    let channels = channel_profiles(frame);
    let combined = combined_profile(&channels);
    SpectrumProfile {
        frame_sequence: frame.sequence(),
        gray,
        red: channels.red,
        green: channels.green,
        blue: channels.blue,
        combined,
    }
}

/// Most frequent colour in each column. Ties go to the smallest RGB triple.
pub fn dominant_colors(frame: &Frame) -> Vec<[u8; 3]> {
    if frame.is_empty() {
        return Vec::new();
    }
    let mut counts: Vec<HashMap<[u8; 3], u32>> = vec![HashMap::new(); frame.width() as usize];
    for row in frame.rows() {
        for (x, px) in row.chunks_exact(CHANNELS).enumerate() {
            *counts[x].entry([px[0], px[1], px[2]]).or_default() += 1;
        }
    }
    counts
        .into_iter()
        .map(|column| {
            column
                .into_iter()
                .max_by(|(ca, na), (cb, nb)| na.cmp(nb).then_with(|| cb.cmp(ca)))
                .map(|(color, _)| color)
                .unwrap_or_default()
        })
        .collect()
}

fn column_means(frame: &Frame, value: impl Fn(&[u8]) -> f64) -> Vec<f64> {
    if frame.is_empty() {
        return Vec::new();
    }
    let mut sums = vec![0.0; frame.width() as usize];
    for row in frame.rows() {
        for (sum, px) in sums.iter_mut().zip(row.chunks_exact(CHANNELS)) {
            *sum += value(px);
        }
    }
    let rows = f64::from(frame.height());
    sums.iter_mut().for_each(|sum| *sum /= rows);
    sums
}
