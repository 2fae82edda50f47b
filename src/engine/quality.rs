// src/engine/quality.rs
//
// Quality dial (1-10) -> codec parameters.
//
// Each tool applies its own curve to the dial:
// - Segmented (compressor): piecewise-linear, with WebP/PNG pulled down
// - Percent (converter): 10..=100 percent
// - Tenths (resizer): dial / 10
//
// PNG turns the resulting fraction into a palette size; only exactly 1.0
// keeps it lossless. GIF, BMP and ICO ignore the dial entirely.

use crate::error::{ImagePixError, Result};
use crate::ops::{OutputFormat, QualityScheme};
use std::fmt;

/// Lowest quality fraction the segmented curve produces after format adjustment.
const SEGMENTED_FLOOR: f32 = 0.30;
const WEBP_ADJUSTMENT: f32 = 0.05;
const PNG_ADJUSTMENT: f32 = 0.10;

pub const MIN_PALETTE_COLORS: u16 = 2;
pub const MAX_PALETTE_COLORS: u16 = 256;

/// User-facing quality setting, always within 1..=10.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct QualityDial(u8);

impl QualityDial {
    pub const MIN: u8 = 1;
    pub const MAX: u8 = 10;

    pub fn new(value: u8) -> Result<Self> {
        if (Self::MIN..=Self::MAX).contains(&value) {
            Ok(Self(value))
        } else {
            Err(ImagePixError::invalid_argument(
                "quality dial",
                value.to_string(),
                "must be between 1 and 10",
            ))
        }
    }

    /// Clamp any integer into range instead of rejecting it.
    pub fn clamped(value: i64) -> Self {
        Self(value.clamp(Self::MIN as i64, Self::MAX as i64) as u8)
    }

    pub fn get(self) -> u8 {
        self.0
    }
}

impl Default for QualityDial {
    fn default() -> Self {
        Self(Self::MAX)
    }
}

impl TryFrom<u8> for QualityDial {
    type Error = ImagePixError;

    fn try_from(value: u8) -> Result<Self> {
        Self::new(value)
    }
}

impl fmt::Display for QualityDial {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// What the encoder is told to do.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum CodecParams {
    /// Lossy encode, quality fraction in (0, 1]
    Lossy { quality: f32 },
    /// Quantize to at most `colors` colors, then encode losslessly
    Palette { colors: u16 },
    Lossless,
    /// Format has no quality knob
    Ignored,
}

/// The segmented curve used by the compressor, before format adjustment.
fn segmented_base(dial: u8) -> f32 {
    let d = dial as f32;
    match dial {
        0..=3 => 0.30 + (d - 1.0) * 0.125,
        4..=6 => 0.55 + (d - 3.0) * 0.083,
        _ => 0.80 + (d - 6.0) * 0.045,
    }
}

/// Converter percentage: `round(10 + (dial - 1) / 9 * 90)`.
pub fn dial_to_percent(dial: QualityDial) -> u8 {
    let d = dial.get() as f64;
    (10.0 + (d - 1.0) / 9.0 * 90.0).round() as u8
}

/// Quality fraction in (0, 1] for `format` under `scheme`.
pub fn quality_fraction(format: OutputFormat, dial: QualityDial, scheme: QualityScheme) -> f32 {
    match scheme {
        QualityScheme::Segmented => {
            let base = segmented_base(dial.get());
            match format {
                OutputFormat::WebP => (base - WEBP_ADJUSTMENT).max(SEGMENTED_FLOOR),
                OutputFormat::Png => (base - PNG_ADJUSTMENT).max(SEGMENTED_FLOOR),
                _ => base,
            }
        }
        QualityScheme::Percent => dial_to_percent(dial) as f32 / 100.0,
        QualityScheme::Tenths => dial.get() as f32 / 10.0,
    }
}

/// Palette size for a PNG quality fraction: `clamp(floor(256 * q), 2, 256)`.
pub fn palette_colors(quality: f32) -> u16 {
    let colors = (256.0 * quality as f64).floor();
    colors.clamp(MIN_PALETTE_COLORS as f64, MAX_PALETTE_COLORS as f64) as u16
}

/// Map a dial to codec parameters for `format`.
pub fn map_quality(format: OutputFormat, dial: QualityDial, scheme: QualityScheme) -> CodecParams {
    if !format.supports_quality() {
        return CodecParams::Ignored;
    }
    let quality = quality_fraction(format, dial, scheme);
    match format {
        OutputFormat::Png if quality >= 1.0 => CodecParams::Lossless,
        OutputFormat::Png => CodecParams::Palette {
            colors: palette_colors(quality),
        },
        _ => CodecParams::Lossy { quality },
    }
}
