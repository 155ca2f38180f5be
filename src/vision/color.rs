//! 8-bit HSV conversion and named hue/saturation/value bands.
//!
//! Hue follows the half-degree convention (`0..180`), saturation and value
//! are `0..=255`, so band limits read the same as the thresholds used by
//! the gate and severity rules.

#![allow(missing_docs)]

use image::{GrayImage, Luma, RgbImage};

/// One pixel in half-degree HSV.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

impl Hsv {
    /// Convert an RGB triple.
    #[must_use]
    pub fn from_rgb(r: u8, g: u8, b: u8) -> Self {
        let (rf, gf, bf) = (f64::from(r), f64::from(g), f64::from(b));
        let v = r.max(g).max(b);
        let min = r.min(g).min(b);
        let vf = f64::from(v);
        let diff = vf - f64::from(min);

        let s = if v == 0 {
            0
        } else {
            (diff * 255.0 / vf).round() as u8
        };

        let h = if diff == 0.0 {
            0.0
        } else if v == r {
            60.0 * (gf - bf) / diff
        } else if v == g {
            120.0 + 60.0 * (bf - rf) / diff
        } else {
            240.0 + 60.0 * (rf - gf) / diff
        };
        let h = if h < 0.0 { h + 360.0 } else { h };
        let h = (h / 2.0).round() as u16 % 180;

        Self { h: h as u8, s, v }
    }
}

/// Inclusive hue interval; `wrap` marks the red band that straddles 0.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HueRange {
    Span(u8, u8),
    Wrap { upper_from: u8, lower_to: u8 },
}

impl HueRange {
    #[must_use]
    pub const fn contains(self, h: u8) -> bool {
        match self {
            Self::Span(lo, hi) => h >= lo && h <= hi,
            Self::Wrap {
                upper_from,
                lower_to,
            } => h >= upper_from || h <= lower_to,
        }
    }
}

/// A named region of HSV space.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ColorBand {
    pub name: &'static str,
    pub hue: HueRange,
    pub sat: (u8, u8),
    pub val: (u8, u8),
}

impl ColorBand {
    #[must_use]
    pub const fn contains(&self, px: Hsv) -> bool {
        self.hue.contains(px.h)
            && px.s >= self.sat.0
            && px.s <= self.sat.1
            && px.v >= self.val.0
            && px.v <= self.val.1
    }
}

const fn band(name: &'static str, hue: HueRange, sat_min: u8, val: (u8, u8)) -> ColorBand {
    ColorBand {
        name,
        hue,
        sat: (sat_min, 255),
        val,
    }
}

const RED: HueRange = HueRange::Wrap {
    upper_from: 160,
    lower_to: 10,
};

/// Generous produce palette, including the brown of decaying skin.
pub const SUBJECT_BANDS: [ColorBand; 5] = [
    band("red", RED, 30, (30, 255)),
    band("orange", HueRange::Span(5, 25), 30, (30, 255)),
    band("yellow", HueRange::Span(20, 40), 25, (30, 255)),
    band("green", HueRange::Span(35, 90), 25, (30, 255)),
    band("brown", HueRange::Span(5, 30), 20, (15, 150)),
];

/// Strict palette of healthy, well-lit produce colours.
pub const VIVID_BANDS: [ColorBand; 3] = [
    band("red", RED, 40, (50, 255)),
    band("orange_yellow", HueRange::Span(5, 35), 40, (50, 255)),
    band("green", HueRange::Span(35, 90), 40, (50, 255)),
];

/// Deep rot browns.
pub const DARK_BROWN: ColorBand = band("dark_brown", HueRange::Span(5, 25), 30, (15, 100));

/// Mid-tone rotting browns.
pub const MEDIUM_BROWN: ColorBand = ColorBand {
    name: "medium_brown",
    hue: HueRange::Span(5, 30),
    sat: (25, 180),
    val: (80, 150),
};

/// Grey, washed-out pixels typical of mould.
pub const MOLD: ColorBand = ColorBand {
    name: "mold",
    hue: HueRange::Span(0, 179),
    sat: (0, 59),
    val: (61, 199),
};

/// Brownish hue regardless of saturation or value.
pub const BROWN_HUE: HueRange = HueRange::Span(8, 28);

/// Which palette decides the produce-colour ratio.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Palette {
    Subject,
    Vivid,
}

impl Palette {
    #[must_use]
    pub const fn bands(self) -> &'static [ColorBand] {
        match self {
            Self::Subject => &SUBJECT_BANDS,
            Self::Vivid => &VIVID_BANDS,
        }
    }

    #[must_use]
    pub fn matches(self, px: Hsv) -> bool {
        self.bands().iter().any(|band| band.contains(px))
    }
}

/// Per-pixel HSV planes for an image.
#[derive(Debug, Clone)]
pub struct HsvImage {
    width: u32,
    height: u32,
    pixels: Vec<Hsv>,
}

impl HsvImage {
    #[must_use]
    pub fn from_rgb(image: &RgbImage) -> Self {
        let pixels = image
            .pixels()
            .map(|px| Hsv::from_rgb(px[0], px[1], px[2]))
            .collect();
        Self {
            width: image.width(),
            height: image.height(),
            pixels,
        }
    }

    #[must_use]
    pub const fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    #[must_use]
    pub fn pixels(&self) -> &[Hsv] {
        &self.pixels
    }
}

/// Luma with the 0.299/0.587/0.114 weights.
#[must_use]
pub fn to_gray(image: &RgbImage) -> GrayImage {
    GrayImage::from_fn(image.width(), image.height(), |x, y| {
        let px = image.get_pixel(x, y);
        let luma = 0.114f64.mul_add(
            f64::from(px[2]),
            0.299f64.mul_add(f64::from(px[0]), 0.587 * f64::from(px[1])),
        );
        Luma([luma.round().clamp(0.0, 255.0) as u8])
    })
}
