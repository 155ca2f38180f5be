//! Feature extraction: derives the fixed statistic set the gate and the
//! severity scorer reason over.
//!
//! Extraction is a pure function of the pixel buffer, the region and the
//! extractor profile. A buffer that cannot be decoded, or a region with no
//! pixels, is an error; callers must treat it as "no verdict possible".

#![allow(missing_docs)]

use std::collections::HashSet;

use image::imageops::crop_imm;
use image::{GrayImage, ImageBuffer, Luma, RgbImage};
use imageproc::distance_transform::Norm;
use imageproc::edges::canny;
use imageproc::filter::filter3x3;
use imageproc::morphology::dilate;
use imageproc::region_labelling::{Connectivity, connected_components};
use serde::{Deserialize, Serialize};

use crate::core::errors::{FgError, Result};
use crate::vision::color::{
    BROWN_HUE, DARK_BROWN, HsvImage, MEDIUM_BROWN, MOLD, Palette, to_gray,
};
use crate::vision::shapes::{
    CircleParams, SegmentParams, count_circles, count_line_segments, count_rectangles,
};

type GrayF32 = ImageBuffer<Luma<f32>, Vec<f32>>;

const K_LAPLACIAN: [f32; 9] = [0.0, 1.0, 0.0, 1.0, -4.0, 1.0, 0.0, 1.0, 0.0];

/// Canny thresholds for the edge-density statistic.
const EDGE_LOW: f32 = 100.0;
const EDGE_HIGH: f32 = 200.0;

/// Per-channel ceilings for the dark-pixel masks.
const VERY_DARK_MAX: u8 = 50;
const DARK_MAX: u8 = 80;
const SPOT_MAX: u8 = 70;

/// Two passes of a 5×5 square kernel reach 4 pixels out.
const SPOT_DILATION: u8 = 4;

/// Smallest region side the extractor accepts.
const MIN_SIDE: u32 = 2;

/// Derived statistics for one image or region. Ratios are fractions in `[0, 1]`.
///
/// Shape counts (`circle_count`, `line_count`, `rectangle_count`) are only
/// populated by the subject profile; the surface profile leaves them at zero.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct FeatureVector {
    pub pixel_count: u64,
    pub unique_color_count: usize,
    pub edge_ratio: f64,
    pub circle_count: usize,
    pub line_count: usize,
    pub rectangle_count: usize,
    /// Largest single intensity-histogram bin as a fraction of all pixels.
    pub histogram_peak_ratio: f64,
    /// Pixels inside the profile's produce palette.
    pub fruit_color_ratio: f64,
    /// Variance of the Laplacian response.
    pub texture_variance: f64,
    pub brightness_mean: f64,
    pub brightness_std: f64,
    pub saturation_mean: f64,
    pub contrast_range: u32,
    /// All channels below 50.
    pub very_dark_ratio: f64,
    /// All channels below 80.
    pub dark_spot_ratio: f64,
    /// Dark-brown plus medium-brown band hits; the bands overlap, so a pixel
    /// in both counts twice.
    pub brown_area_ratio: f64,
    pub mold_area_ratio: f64,
    pub brown_hue_ratio: f64,
    /// Connected blobs of dilated dark pixels.
    pub dark_spot_count: usize,
}

/// Part of the image to analyse.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Region {
    Full,
    /// Discard `border` of each side, keeping the centre.
    Centered { border: f64 },
}

impl Region {
    fn bounds(self, width: u32, height: u32) -> (u32, u32, u32, u32) {
        match self {
            Self::Full => (0, 0, width, height),
            Self::Centered { border } => {
                let x0 = (f64::from(width) * border) as u32;
                let x1 = (f64::from(width) * (1.0 - border)) as u32;
                let y0 = (f64::from(height) * border) as u32;
                let y1 = (f64::from(height) * (1.0 - border)) as u32;
                (x0, y0, x1.saturating_sub(x0), y1.saturating_sub(y0))
            }
        }
    }
}

/// Decode an encoded image (PNG, JPEG, ...) into 8-bit RGB.
pub fn decode(bytes: &[u8]) -> Result<RgbImage> {
    if bytes.is_empty() {
        return Err(FgError::ImageDecode {
            details: "empty buffer".to_string(),
        });
    }
    Ok(image::load_from_memory(bytes)?.to_rgb8())
}

/// Configured extractor. Cheap to copy; holds no state between calls.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeatureExtractor {
    palette: Palette,
    shapes: bool,
    circles: CircleParams,
    segments: SegmentParams,
}

impl FeatureExtractor {
    /// Whole-image profile used by the subject gate: generous palette, shape
    /// detectors on.
    #[must_use]
    pub fn subject() -> Self {
        Self {
            palette: Palette::Subject,
            shapes: true,
            circles: CircleParams::default(),
            segments: SegmentParams::default(),
        }
    }

    /// Surface profile used by the severity scorer: strict palette, shape
    /// detectors off.
    #[must_use]
    pub fn surface() -> Self {
        Self {
            palette: Palette::Vivid,
            shapes: false,
            ..Self::subject()
        }
    }

    #[must_use]
    pub const fn palette(&self) -> Palette {
        self.palette
    }

    /// Decode `bytes` and extract over `region`.
    pub fn extract_bytes(&self, bytes: &[u8], region: Region) -> Result<FeatureVector> {
        let image = decode(bytes)?;
        self.extract(&image, region)
    }

    pub fn extract(&self, image: &RgbImage, region: Region) -> Result<FeatureVector> {
        let (x, y, w, h) = region.bounds(image.width(), image.height());
        if w < MIN_SIDE || h < MIN_SIDE {
            return Err(FgError::InsufficientData {
                details: format!(
                    "region {region:?} of a {}x{} image is under {MIN_SIDE}x{MIN_SIDE} pixels",
                    image.width(),
                    image.height()
                ),
            });
        }
        let view = if (x, y, w, h) == (0, 0, image.width(), image.height()) {
            image.clone()
        } else {
            crop_imm(image, x, y, w, h).to_image()
        };
        Ok(self.compute(&view))
    }

    fn compute(&self, image: &RgbImage) -> FeatureVector {
        let total = u64::from(image.width()) * u64::from(image.height());
        let ratio = |count: u64| count as f64 / total as f64;

        let hsv = HsvImage::from_rgb(image);
        let gray = to_gray(image);
        let edges = canny(&gray, EDGE_LOW, EDGE_HIGH);

        let mut palette_hits = 0u64;
        let mut brown_hits = 0u64;
        let mut mold_hits = 0u64;
        let mut brown_hue_hits = 0u64;
        let mut v_values = Vec::with_capacity(total as usize);
        let mut s_values = Vec::with_capacity(total as usize);
        for &px in hsv.pixels() {
            palette_hits += u64::from(self.palette.matches(px));
            brown_hits += u64::from(DARK_BROWN.contains(px)) + u64::from(MEDIUM_BROWN.contains(px));
            mold_hits += u64::from(MOLD.contains(px));
            brown_hue_hits += u64::from(BROWN_HUE.contains(px.h));
            v_values.push(f64::from(px.v));
            s_values.push(f64::from(px.s));
        }
        let (brightness_mean, brightness_std) = mean_std(&v_values);
        let (saturation_mean, _) = mean_std(&s_values);
        let contrast_range = hsv
            .pixels()
            .iter()
            .map(|px| px.v)
            .max()
            .zip(hsv.pixels().iter().map(|px| px.v).min())
            .map_or(0, |(hi, lo)| u32::from(hi - lo));

        let dark_below = |max: u8| {
            image
                .pixels()
                .filter(|px| px[0] < max && px[1] < max && px[2] < max)
                .count() as u64
        };

        let (circle_count, line_count, rectangle_count) = if self.shapes {
            (
                count_circles(&gray, &self.circles),
                count_line_segments(&edges, &self.segments),
                count_rectangles(&edges),
            )
        } else {
            (0, 0, 0)
        };

        FeatureVector {
            pixel_count: total,
            unique_color_count: unique_colors(image),
            edge_ratio: ratio(edges.pixels().filter(|px| px[0] > 0).count() as u64),
            circle_count,
            line_count,
            rectangle_count,
            histogram_peak_ratio: histogram_peak_ratio(&gray),
            fruit_color_ratio: ratio(palette_hits),
            texture_variance: laplacian_variance(&gray),
            brightness_mean,
            brightness_std,
            saturation_mean,
            contrast_range,
            very_dark_ratio: ratio(dark_below(VERY_DARK_MAX)),
            dark_spot_ratio: ratio(dark_below(DARK_MAX)),
            brown_area_ratio: ratio(brown_hits),
            mold_area_ratio: ratio(mold_hits),
            brown_hue_ratio: ratio(brown_hue_hits),
            dark_spot_count: dark_spot_count(image),
        }
    }
}

fn mean_std(values: &[f64]) -> (f64, f64) {
    if values.is_empty() {
        return (0.0, 0.0);
    }
    let n = values.len() as f64;
    let mean = values.iter().sum::<f64>() / n;
    let var = values.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n;
    (mean, var.sqrt())
}

fn unique_colors(image: &RgbImage) -> usize {
    image
        .pixels()
        .map(|px| u32::from(px[0]) << 16 | u32::from(px[1]) << 8 | u32::from(px[2]))
        .collect::<HashSet<u32>>()
        .len()
}

fn histogram_peak_ratio(gray: &GrayImage) -> f64 {
    let mut bins = [0u64; 256];
    for px in gray.pixels() {
        bins[usize::from(px[0])] += 1;
    }
    let total = u64::from(gray.width()) * u64::from(gray.height());
    if total == 0 {
        return 0.0;
    }
    bins.iter().copied().max().unwrap_or(0) as f64 / total as f64
}

fn laplacian_variance(gray: &GrayImage) -> f64 {
    let grayf: GrayF32 = GrayF32::from_fn(gray.width(), gray.height(), |x, y| {
        Luma([f32::from(gray.get_pixel(x, y)[0])])
    });
    let response: Vec<f32> = filter3x3(&grayf, &K_LAPLACIAN).into_raw();
    let values: Vec<f64> = response.into_iter().map(f64::from).collect();
    mean_std(&values).1.powi(2)
}

fn dark_spot_count(image: &RgbImage) -> usize {
    // connected_components asserts on single-pixel inputs.
    if image.width() < MIN_SIDE || image.height() < MIN_SIDE {
        return 0;
    }
    let mask = GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        if px[0] < SPOT_MAX && px[1] < SPOT_MAX && px[2] < SPOT_MAX {
            Luma([255])
        } else {
            Luma([0])
        }
    });
    let grown = dilate(&mask, Norm::LInf, SPOT_DILATION);
    let labels = connected_components(&grown, Connectivity::Eight, Luma([0u8]));
    labels.pixels().map(|px| px[0]).max().unwrap_or(0) as usize
}
