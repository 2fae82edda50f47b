// src/ops.rs
//
// Value types shared by every tool: output formats, resize modes, tool kinds,
// crop aspect presets and colors.
// These are cheap to create and copy - the expensive work happens in engine/.

use crate::error::{ImagePixError, Result};
use bitflags::bitflags;
use std::fmt;

// =============================================================================
// FORMATS
// =============================================================================

bitflags! {
    /// What an output format can carry.
    #[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
    pub struct FormatCaps: u8 {
        /// The quality dial changes the encoded result
        const QUALITY = 0b0001;
        /// Transparency survives encoding
        const ALPHA   = 0b0010;
        /// Encoding may discard information
        const LOSSY   = 0b0100;
        /// Palette (indexed color) output is possible
        const PALETTE = 0b1000;
    }
}

/// Output format for encoding.
///
/// TIFF and SVG are accepted as inputs but never produced.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum OutputFormat {
    Png,
    Jpeg,
    WebP,
    Gif,
    Bmp,
    Ico,
}

impl OutputFormat {
    pub const ALL: [OutputFormat; 6] = [
        OutputFormat::Png,
        OutputFormat::Jpeg,
        OutputFormat::WebP,
        OutputFormat::Gif,
        OutputFormat::Bmp,
        OutputFormat::Ico,
    ];

    pub fn mime(&self) -> &'static str {
        match self {
            Self::Png => "image/png",
            Self::Jpeg => "image/jpeg",
            Self::WebP => "image/webp",
            Self::Gif => "image/gif",
            Self::Bmp => "image/bmp",
            Self::Ico => "image/x-icon",
        }
    }

    /// File extension without the leading dot
    pub fn extension(&self) -> &'static str {
        match self {
            Self::Png => "png",
            Self::Jpeg => "jpg",
            Self::WebP => "webp",
            Self::Gif => "gif",
            Self::Bmp => "bmp",
            Self::Ico => "ico",
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            Self::Png => "PNG",
            Self::Jpeg => "JPG",
            Self::WebP => "WebP",
            Self::Gif => "GIF",
            Self::Bmp => "BMP",
            Self::Ico => "ICO",
        }
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Png => "Lossless compression, supports transparency",
            Self::Jpeg => "Lossy compression, smaller file size",
            Self::WebP => "Modern format, excellent compression",
            Self::Gif => "Supports animation, limited colors",
            Self::Bmp => "Uncompressed, large file size",
            Self::Ico => "Icon format for websites",
        }
    }

    pub fn capabilities(&self) -> FormatCaps {
        match self {
            Self::Png => FormatCaps::QUALITY | FormatCaps::ALPHA | FormatCaps::PALETTE,
            Self::Jpeg => FormatCaps::QUALITY | FormatCaps::LOSSY,
            Self::WebP => FormatCaps::QUALITY | FormatCaps::ALPHA | FormatCaps::LOSSY,
            Self::Gif => FormatCaps::ALPHA | FormatCaps::PALETTE,
            Self::Bmp => FormatCaps::empty(),
            Self::Ico => FormatCaps::ALPHA,
        }
    }

    /// Whether the quality dial affects this format at all
    pub fn supports_quality(&self) -> bool {
        self.capabilities().contains(FormatCaps::QUALITY)
    }

    /// Percent the converter suggests when the user switches to this format
    pub fn recommended_quality(&self) -> u8 {
        if self.supports_quality() {
            90
        } else {
            100
        }
    }

    pub fn image_format(&self) -> image::ImageFormat {
        match self {
            Self::Png => image::ImageFormat::Png,
            Self::Jpeg => image::ImageFormat::Jpeg,
            Self::WebP => image::ImageFormat::WebP,
            Self::Gif => image::ImageFormat::Gif,
            Self::Bmp => image::ImageFormat::Bmp,
            Self::Ico => image::ImageFormat::Ico,
        }
    }

    /// Resolve a MIME type. `image/jpg` is accepted as an alias.
    pub fn from_mime(mime: &str) -> Result<Self> {
        match mime.trim().to_ascii_lowercase().as_str() {
            "image/png" => Ok(Self::Png),
            "image/jpeg" | "image/jpg" => Ok(Self::Jpeg),
            "image/webp" => Ok(Self::WebP),
            "image/gif" => Ok(Self::Gif),
            "image/bmp" => Ok(Self::Bmp),
            "image/x-icon" | "image/vnd.microsoft.icon" => Ok(Self::Ico),
            other => Err(ImagePixError::unsupported_output_format(other.to_string())),
        }
    }

    /// Resolve a short name ("png", "jpg", "webp", ...)
    pub fn parse(format: &str) -> Result<Self> {
        match format.trim().to_ascii_lowercase().as_str() {
            "png" => Ok(Self::Png),
            "jpeg" | "jpg" => Ok(Self::Jpeg),
            "webp" => Ok(Self::WebP),
            "gif" => Ok(Self::Gif),
            "bmp" => Ok(Self::Bmp),
            "ico" => Ok(Self::Ico),
            other => Err(ImagePixError::unsupported_output_format(other.to_string())),
        }
    }
}

impl fmt::Display for OutputFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// MIME types accepted by the upload widgets.
pub const SUPPORTED_INPUT_MIME_TYPES: &[&str] = &[
    "image/png",
    "image/jpeg",
    "image/jpg",
    "image/webp",
    "image/gif",
    "image/bmp",
    "image/tiff",
    "image/x-icon",
    "image/svg+xml",
];

pub fn is_supported_input_mime(mime: &str) -> bool {
    let mime = mime.trim().to_ascii_lowercase();
    SUPPORTED_INPUT_MIME_TYPES.contains(&mime.as_str())
}

// =============================================================================
// RESIZE MODES
// =============================================================================

/// How a source is mapped onto a target box.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum ResizeMode {
    /// Exact target size, aspect ratio ignored
    Stretch,
    /// Whole image visible, canvas shrinks to the scaled size
    #[default]
    Fit,
    /// Target covered, overflow cropped symmetrically
    Fill,
    /// Whole image visible, centered on a background of exactly the target size
    Pad,
}

impl ResizeMode {
    pub fn parse(mode: &str) -> Result<Self> {
        match mode.trim().to_ascii_lowercase().as_str() {
            "stretch" => Ok(Self::Stretch),
            "fit" | "contain" | "inside" => Ok(Self::Fit),
            "fill" | "cover" => Ok(Self::Fill),
            "pad" => Ok(Self::Pad),
            other => Err(ImagePixError::invalid_argument(
                "mode",
                other.to_string(),
                "expected stretch, fit, fill or pad",
            )),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Stretch => "stretch",
            Self::Fit => "fit",
            Self::Fill => "fill",
            Self::Pad => "pad",
        }
    }
}

// =============================================================================
// TOOLS
// =============================================================================

/// Which quality curve a tool applies to its dial.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum QualityScheme {
    /// Piecewise-linear curve with per-format adjustment (compress tool)
    #[default]
    Segmented,
    /// Dial mapped linearly to 10..=100 percent (convert tool)
    Percent,
    /// Dial divided by ten (resize tool)
    Tenths,
}

/// The image tools that can produce or consume a handoff.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub enum ToolKind {
    Convert,
    Compress,
    Resize,
    Crop,
    RemoveBackground,
}

/// Per-tool defaults as presented when a tool page opens.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct ToolDefaults {
    pub dial: u8,
    pub format: OutputFormat,
    pub scheme: QualityScheme,
    /// Appended to the file stem of downloads
    pub file_suffix: &'static str,
    /// PNG output below full quality is palette-quantized; otherwise PNG is always lossless
    pub png_palette: bool,
}

impl ToolKind {
    pub const ALL: [ToolKind; 5] = [
        ToolKind::Convert,
        ToolKind::Compress,
        ToolKind::Resize,
        ToolKind::Crop,
        ToolKind::RemoveBackground,
    ];

    /// Identifier written into handoff records
    pub fn slug(&self) -> &'static str {
        match self {
            Self::Convert => "convert-image",
            Self::Compress => "compress-image",
            Self::Resize => "resize-image",
            Self::Crop => "crop-image",
            Self::RemoveBackground => "remove-background",
        }
    }

    pub fn from_slug(slug: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.slug() == slug)
    }

    pub fn defaults(&self) -> ToolDefaults {
        match self {
            Self::Convert => ToolDefaults {
                dial: 9,
                format: OutputFormat::Png,
                scheme: QualityScheme::Percent,
                file_suffix: "",
                png_palette: true,
            },
            Self::Compress => ToolDefaults {
                dial: 7,
                format: OutputFormat::WebP,
                scheme: QualityScheme::Segmented,
                file_suffix: "-compressed",
                png_palette: true,
            },
            Self::Resize => ToolDefaults {
                dial: 9,
                format: OutputFormat::Png,
                scheme: QualityScheme::Tenths,
                file_suffix: "-resized",
                png_palette: false,
            },
            Self::Crop => ToolDefaults {
                dial: 10,
                format: OutputFormat::Png,
                scheme: QualityScheme::Tenths,
                file_suffix: "-cropped",
                png_palette: false,
            },
            Self::RemoveBackground => ToolDefaults {
                dial: 5,
                format: OutputFormat::Png,
                scheme: QualityScheme::Tenths,
                file_suffix: "-no-bg",
                png_palette: false,
            },
        }
    }

    pub fn quality_scheme(&self) -> QualityScheme {
        self.defaults().scheme
    }
}

// =============================================================================
// CROP ASPECT PRESETS
// =============================================================================

/// Aspect ratio presets offered by the cropper.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Default)]
pub enum AspectRatio {
    #[default]
    Free,
    Square,
    Widescreen,
    Portrait,
    Standard,
    Photo,
    PhotoPortrait,
}

impl AspectRatio {
    pub const ALL: [AspectRatio; 7] = [
        AspectRatio::Free,
        AspectRatio::Square,
        AspectRatio::Widescreen,
        AspectRatio::Portrait,
        AspectRatio::Standard,
        AspectRatio::Photo,
        AspectRatio::PhotoPortrait,
    ];

    pub fn label(&self) -> &'static str {
        match self {
            Self::Free => "Free",
            Self::Square => "1:1",
            Self::Widescreen => "16:9",
            Self::Portrait => "9:16",
            Self::Standard => "4:3",
            Self::Photo => "3:2",
            Self::PhotoPortrait => "2:3",
        }
    }

    /// width / height, or None for free-form
    pub fn ratio(&self) -> Option<f64> {
        match self {
            Self::Free => None,
            Self::Square => Some(1.0),
            Self::Widescreen => Some(16.0 / 9.0),
            Self::Portrait => Some(9.0 / 16.0),
            Self::Standard => Some(4.0 / 3.0),
            Self::Photo => Some(3.0 / 2.0),
            Self::PhotoPortrait => Some(2.0 / 3.0),
        }
    }
}

// =============================================================================
// COLOR
// =============================================================================

/// Straight (non-premultiplied) RGBA color.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Color {
    pub r: u8,
    pub g: u8,
    pub b: u8,
    pub a: u8,
}

impl Default for Color {
    fn default() -> Self {
        Self::WHITE
    }
}

impl Color {
    pub const WHITE: Color = Color::rgb(255, 255, 255);
    pub const BLACK: Color = Color::rgb(0, 0, 0);
    pub const TRANSPARENT: Color = Color::rgba(0, 0, 0, 0);

    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b, a: 255 }
    }

    pub const fn rgba(r: u8, g: u8, b: u8, a: u8) -> Self {
        Self { r, g, b, a }
    }

    pub fn to_array(self) -> [u8; 4] {
        [self.r, self.g, self.b, self.a]
    }

    /// Parse CSS hex notation: `#RGB`, `#RRGGBB` or `#RRGGBBAA` (leading `#` optional).
    pub fn from_hex(hex: &str) -> Result<Self> {
        let invalid = || {
            ImagePixError::invalid_argument(
                "background",
                hex.to_string(),
                "expected #RGB, #RRGGBB or #RRGGBBAA",
            )
        };
        let digits = hex.trim().trim_start_matches('#');
        if !digits.is_ascii() {
            return Err(invalid());
        }
        let byte = |s: &str| u8::from_str_radix(s, 16).map_err(|_| invalid());

        match digits.len() {
            3 => {
                let mut out = [0u8; 3];
                for (i, c) in digits.chars().enumerate() {
                    let v = c.to_digit(16).ok_or_else(invalid)? as u8;
                    out[i] = v * 17;
                }
                Ok(Self::rgb(out[0], out[1], out[2]))
            }
            6 => Ok(Self::rgb(
                byte(&digits[0..2])?,
                byte(&digits[2..4])?,
                byte(&digits[4..6])?,
            )),
            8 => Ok(Self::rgba(
                byte(&digits[0..2])?,
                byte(&digits[2..4])?,
                byte(&digits[4..6])?,
                byte(&digits[6..8])?,
            )),
            _ => Err(invalid()),
        }
    }

    pub fn to_hex(self) -> String {
        if self.a == 255 {
            format!("#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
        } else {
            format!("#{:02X}{:02X}{:02X}{:02X}", self.r, self.g, self.b, self.a)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn format_metadata_is_consistent() {
        for format in OutputFormat::ALL {
            assert_eq!(OutputFormat::from_mime(format.mime()).unwrap(), format);
            assert_eq!(OutputFormat::parse(format.extension()).unwrap(), format);
            assert!(!format.description().is_empty());
        }
        assert_eq!(OutputFormat::Jpeg.extension(), "jpg");
        assert_eq!(OutputFormat::from_mime("image/jpg").unwrap(), OutputFormat::Jpeg);
    }

    #[test]
    fn tiff_and_svg_are_inputs_only() {
        assert!(is_supported_input_mime("image/tiff"));
        assert!(is_supported_input_mime("image/svg+xml"));
        assert!(OutputFormat::from_mime("image/tiff").is_err());
        assert!(OutputFormat::parse("svg").is_err());
    }

    #[test]
    fn recommended_quality_follows_capabilities() {
        assert_eq!(OutputFormat::Jpeg.recommended_quality(), 90);
        assert_eq!(OutputFormat::WebP.recommended_quality(), 90);
        assert_eq!(OutputFormat::Png.recommended_quality(), 90);
        assert_eq!(OutputFormat::Gif.recommended_quality(), 100);
        assert_eq!(OutputFormat::Bmp.recommended_quality(), 100);
        assert_eq!(OutputFormat::Ico.recommended_quality(), 100);
        assert!(!OutputFormat::Bmp.capabilities().contains(FormatCaps::ALPHA));
    }

    #[test]
    fn resize_mode_parse() {
        assert_eq!(ResizeMode::parse("FIT").unwrap(), ResizeMode::Fit);
        assert_eq!(ResizeMode::parse("cover").unwrap(), ResizeMode::Fill);
        assert_eq!(ResizeMode::parse("pad").unwrap(), ResizeMode::Pad);
        assert!(ResizeMode::parse("zoom").is_err());
    }

    #[test]
    fn tool_defaults() {
        let compress = ToolKind::Compress.defaults();
        assert_eq!(compress.dial, 7);
        assert_eq!(compress.format, OutputFormat::WebP);
        assert_eq!(compress.scheme, QualityScheme::Segmented);
        assert_eq!(ToolKind::Convert.quality_scheme(), QualityScheme::Percent);
        assert_eq!(ToolKind::Resize.quality_scheme(), QualityScheme::Tenths);
        assert!(ToolKind::Convert.defaults().png_palette);
        assert!(compress.png_palette);
        assert!(!ToolKind::Resize.defaults().png_palette);
        for tool in ToolKind::ALL {
            assert_eq!(ToolKind::from_slug(tool.slug()), Some(tool));
        }
    }

    #[test]
    fn aspect_presets() {
        assert_eq!(AspectRatio::ALL.len(), 7);
        assert_eq!(AspectRatio::Free.ratio(), None);
        assert_eq!(AspectRatio::Square.ratio(), Some(1.0));
        assert_eq!(AspectRatio::Widescreen.label(), "16:9");
    }

    #[test]
    fn color_hex() {
        assert_eq!(Color::from_hex("#FFFFFF").unwrap(), Color::WHITE);
        assert_eq!(Color::from_hex("#f00").unwrap(), Color::rgb(255, 0, 0));
        assert_eq!(Color::from_hex("00ff0080").unwrap(), Color::rgba(0, 255, 0, 128));
        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("#GGGGGG").is_err());
        assert_eq!(Color::rgb(1, 2, 255).to_hex(), "#0102FF");
        assert_eq!(Color::default(), Color::WHITE);
    }
}
