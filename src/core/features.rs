use image::imageops::{self, FilterType};
use image::{DynamicImage, ImageReader, RgbImage};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::f64::consts::PI;
use std::io::Cursor;
use std::path::Path;
use thiserror::Error;

pub const COLOR_GROUP: &str = "color";
pub const EDGE_GROUP: &str = "edge_orientation";

const PRECISION: f64 = 10_000.0;

#[derive(Debug, Error)]
pub enum FeatureError {
    #[error("Invalid image format: expected RGB or RGBA, image has {channels} channel(s)")]
    InvalidImageFormat { channels: u8 },

    #[error("Could not decode image: {0}")]
    DecodeFailure(#[from] image::ImageError),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Round to the 4 decimal digits stored in the catalog.
pub fn round_to_precision(value: f64) -> f64 {
    (value * PRECISION).round() / PRECISION
}

/// Named groups of normalized histogram bins, e.g. `color` and `edge_orientation`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FeatureVector {
    groups: BTreeMap<String, Vec<f64>>,
}

impl FeatureVector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, name: impl Into<String>, values: Vec<f64>) {
        self.groups.insert(name.into(), values);
    }

    pub fn group(&self, name: &str) -> Option<&[f64]> {
        self.groups.get(name).map(Vec::as_slice)
    }

    /// Groups in name order.
    pub fn groups(&self) -> impl Iterator<Item = (&str, &[f64])> {
        self.groups
            .iter()
            .map(|(name, values)| (name.as_str(), values.as_slice()))
    }

    pub fn len(&self) -> usize {
        self.groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.groups.is_empty()
    }
}

impl FromIterator<(String, Vec<f64>)> for FeatureVector {
    fn from_iter<I: IntoIterator<Item = (String, Vec<f64>)>>(iter: I) -> Self {
        Self {
            groups: iter.into_iter().collect(),
        }
    }
}

/// Turns decoded pixels into a [`FeatureVector`].
///
/// Every image compared within one catalog must go through an extractor with the
/// same `bins` and `resize`, otherwise the vectors describe different things.
#[derive(Debug, Clone, Copy)]
pub struct FeatureExtractor {
    bins: usize,
    resize: Option<u32>,
}

impl FeatureExtractor {
    pub fn new(bins: usize, resize: Option<u32>) -> Self {
        Self {
            bins: bins.max(1),
            resize,
        }
    }

    pub fn bins(&self) -> usize {
        self.bins
    }

    pub fn resize(&self) -> Option<u32> {
        self.resize
    }

    pub fn extract_path(&self, path: &Path) -> Result<FeatureVector, FeatureError> {
        let img = ImageReader::open(path)?.with_guessed_format()?.decode()?;
        self.extract(&img)
    }

    pub fn extract_bytes(&self, bytes: &[u8]) -> Result<FeatureVector, FeatureError> {
        let img = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()?
            .decode()?;
        self.extract(&img)
    }

    pub fn extract(&self, img: &DynamicImage) -> Result<FeatureVector, FeatureError> {
        // alpha is dropped, only the color channels are histogrammed
        let channels = img.color().channel_count();
        if channels != 3 && channels != 4 {
            return Err(FeatureError::InvalidImageFormat { channels });
        }

        let rgb = img.to_rgb8();
        let rgb = match self.resize {
            Some(dim) => imageops::resize(&rgb, dim, dim, FilterType::Triangle),
            None => rgb,
        };

        let mut features = FeatureVector::new();
        features.insert(COLOR_GROUP, color_histogram(&rgb, self.bins));
        features.insert(EDGE_GROUP, edge_histogram(&rgb, self.bins));
        Ok(features)
    }
}

/// Per-channel intensity histogram over [0, 256), laid out red, green, blue.
/// Each channel's bins are divided by the pixel count.
fn color_histogram(rgb: &RgbImage, bins: usize) -> Vec<f64> {
    let mut counts = vec![0u64; bins * 3];
    for pixel in rgb.pixels() {
        for (channel, value) in pixel.0.iter().enumerate() {
            let bin = (*value as usize * bins) / 256;
            counts[channel * bins + bin] += 1;
        }
    }

    let pixel_count = rgb.width() as u64 * rgb.height() as u64;
    normalize(&counts, pixel_count)
}

/// Histogram of gradient orientation `atan2(gy, gx)` over [-π, π].
fn edge_histogram(rgb: &RgbImage, bins: usize) -> Vec<f64> {
    let gray = imageops::grayscale(rgb);
    let (width, height) = (gray.width() as usize, gray.height() as usize);
    let values: Vec<f64> = gray.as_raw().iter().map(|v| *v as f64).collect();
    let at = |x: usize, y: usize| values[y * width + x];

    let mut counts = vec![0u64; bins];
    for y in 0..height {
        for x in 0..width {
            let gx = axis_gradient(x, width, |i| at(i, y));
            let gy = axis_gradient(y, height, |i| at(x, i));
            counts[orientation_bin(gy.atan2(gx), bins)] += 1;
        }
    }

    let total: u64 = counts.iter().sum();
    normalize(&counts, total)
}

/// Central difference inside the axis, one-sided difference at either end.
fn axis_gradient(i: usize, len: usize, sample: impl Fn(usize) -> f64) -> f64 {
    if len < 2 {
        0.0
    } else if i == 0 {
        sample(1) - sample(0)
    } else if i == len - 1 {
        sample(i) - sample(i - 1)
    } else {
        (sample(i + 1) - sample(i - 1)) / 2.0
    }
}

fn orientation_bin(angle: f64, bins: usize) -> usize {
    let scaled = (angle + PI) / (2.0 * PI) * bins as f64;
    // angle == π lands on the closing edge of the last bin
    (scaled.floor().max(0.0) as usize).min(bins - 1)
}

fn normalize(counts: &[u64], total: u64) -> Vec<f64> {
    if total == 0 {
        return vec![0.0; counts.len()];
    }
    counts
        .iter()
        .map(|count| round_to_precision(*count as f64 / total as f64))
        .collect()
}
