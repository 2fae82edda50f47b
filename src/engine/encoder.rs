// src/engine/encoder.rs
//
// Encoder operations: JPEG (mozjpeg), PNG (image + oxipng, optional NeuQuant
// palette), WebP (libwebp), GIF/BMP/ICO (image crate).

use crate::engine::asset::EncodedAsset;
use crate::engine::common::run_with_panic_policy;
use crate::engine::pipeline::{has_transparency, Canvas, RasterImage};
use crate::engine::quality::{palette_colors, CodecParams, MAX_PALETTE_COLORS, MIN_PALETTE_COLORS};
use crate::engine::MAX_DIMENSION;
use crate::error::{ImagePixError, Result};
use crate::ops::OutputFormat;
use color_quant::NeuQuant;
use image::{DynamicImage, ImageFormat, RgbImage, RgbaImage};
use mozjpeg::{ColorSpace, Compress};
use std::collections::HashSet;
use std::io::Cursor;
use std::time::Instant;
use tracing::debug;

/// Quality used when a lossy format is encoded without an explicit setting
/// (same defaults a browser canvas applies).
const DEFAULT_JPEG_QUALITY: f32 = 0.92;
const DEFAULT_WEBP_QUALITY: f32 = 0.80;

/// Largest icon side the ICO container can describe.
pub const MAX_ICO_DIMENSION: u32 = 256;

/// NeuQuant sampling factor: 1 is best quality, 30 fastest.
const NEUQUANT_SAMPLE_FACTOR: i32 = 10;

/// Codec tuning for a 0-100 quality value.
///
/// Only `quality` varies with the dial. Every other knob is held fixed, so
/// encoded size can only grow as quality rises.
#[derive(Debug, Clone, Copy)]
pub struct QualitySettings {
    quality: f32,
}

impl QualitySettings {
    /// `quality` is a 0-100 encoder value
    pub fn new(quality: f32) -> Self {
        Self {
            quality: quality.clamp(0.0, 100.0),
        }
    }

    /// From a (0, 1] quality fraction
    pub fn from_fraction(quality: f32) -> Self {
        Self::new(quality * 100.0)
    }

    pub fn quality(&self) -> f32 {
        self.quality
    }

    pub fn webp_method(&self) -> i32 {
        4
    }

    pub fn webp_pass(&self) -> i32 {
        1
    }

    pub fn webp_preprocessing(&self) -> i32 {
        0
    }

    pub fn webp_sns_strength(&self) -> i32 {
        50
    }

    pub fn webp_filter_strength(&self) -> i32 {
        30
    }

    pub fn webp_filter_sharpness(&self) -> i32 {
        0
    }
}

fn check_params(format: OutputFormat, params: CodecParams) -> Result<()> {
    if !format.supports_quality() {
        return Ok(());
    }
    match params {
        CodecParams::Lossy { quality } if !(quality.is_finite() && quality > 0.0 && quality <= 1.0) => {
            Err(ImagePixError::invalid_codec_parameter(
                format.label(),
                "quality",
                quality.to_string(),
                "quality must be in (0, 1]",
            ))
        }
        CodecParams::Palette { colors }
            if !(MIN_PALETTE_COLORS..=MAX_PALETTE_COLORS).contains(&colors) =>
        {
            Err(ImagePixError::invalid_codec_parameter(
                format.label(),
                "colors",
                colors.to_string(),
                "palette size must be in [2, 256]",
            ))
        }
        CodecParams::Palette { colors } if format != OutputFormat::Png => {
            Err(ImagePixError::invalid_codec_parameter(
                format.label(),
                "colors",
                colors.to_string(),
                "palette output is only available for PNG",
            ))
        }
        _ => Ok(()),
    }
}

/// Encode a canvas.
pub fn encode(canvas: &Canvas, format: OutputFormat, params: CodecParams) -> Result<EncodedAsset> {
    encode_rgba(canvas.as_rgba(), format, params)
}

/// Encode a decoded raster without drawing it first.
pub fn encode_raster(raster: &RasterImage, format: OutputFormat, params: CodecParams) -> Result<EncodedAsset> {
    encode_rgba(raster.as_rgba(), format, params)
}

/// Encode straight-alpha RGBA pixels into `format`.
pub fn encode_rgba(pixels: &RgbaImage, format: OutputFormat, params: CodecParams) -> Result<EncodedAsset> {
    check_params(format, params)?;
    let (w, h) = pixels.dimensions();
    if w == 0 || h == 0 {
        return Err(ImagePixError::encode_failed(
            format.label(),
            "image has zero width or height",
        ));
    }
    if w > MAX_DIMENSION || h > MAX_DIMENSION {
        return Err(ImagePixError::dimension_exceeds_limit(w.max(h), MAX_DIMENSION));
    }

    let started = Instant::now();
    let bytes = match format {
        OutputFormat::Png => match params {
            CodecParams::Palette { colors } => encode_png_palette(pixels, colors)?,
            CodecParams::Lossy { quality } if quality < 1.0 => {
                encode_png_palette(pixels, palette_colors(quality))?
            }
            _ => encode_png(pixels)?,
        },
        OutputFormat::Jpeg => {
            let quality = match params {
                CodecParams::Lossy { quality } => quality,
                CodecParams::Lossless => 1.0,
                _ => DEFAULT_JPEG_QUALITY,
            };
            encode_jpeg(pixels, QualitySettings::from_fraction(quality))?
        }
        OutputFormat::WebP => match params {
            CodecParams::Lossless => encode_webp_lossless(pixels)?,
            CodecParams::Lossy { quality } => {
                encode_webp(pixels, QualitySettings::from_fraction(quality))?
            }
            _ => encode_webp(pixels, QualitySettings::from_fraction(DEFAULT_WEBP_QUALITY))?,
        },
        OutputFormat::Gif => encode_gif(pixels)?,
        OutputFormat::Bmp => encode_bmp(pixels)?,
        OutputFormat::Ico => encode_ico(pixels)?,
    };

    debug!(
        target: "imagepix::encode",
        format = %format,
        ?params,
        width = w,
        height = h,
        size = bytes.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "encoded image"
    );
    Ok(EncodedAsset::new(bytes, format, w, h))
}

/// Drop alpha the way a canvas export to an opaque format does:
/// color is multiplied by alpha, so transparency turns black.
pub fn flatten_alpha(pixels: &RgbaImage) -> RgbImage {
    let (w, h) = pixels.dimensions();
    RgbImage::from_fn(w, h, |x, y| {
        let [r, g, b, a] = pixels.get_pixel(x, y).0;
        let mul = |c: u8| ((c as u32 * a as u32 + 127) / 255) as u8;
        image::Rgb([mul(r), mul(g), mul(b)])
    })
}

/// Encode to JPEG using mozjpeg with web-optimized settings
pub fn encode_jpeg(pixels: &RgbaImage, settings: QualitySettings) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:jpeg", || {
        let rgb = flatten_alpha(pixels);
        let (w, h) = rgb.dimensions();
        let raw: &[u8] = rgb.as_raw();

        let mut comp = Compress::new(ColorSpace::JCS_RGB);
        comp.set_size(w as usize, h as usize);
        comp.set_color_space(ColorSpace::JCS_YCbCr);
        comp.set_quality(settings.quality());
        comp.set_chroma_sampling_pixel_sizes((2, 2), (2, 2));
        comp.set_progressive_mode();
        comp.set_optimize_coding(true);
        // Fixed scan script; searched scans can pick a smaller layout at a higher quality
        comp.set_optimize_scans(false);
        comp.set_smoothing_factor(0);

        let estimated_size = (w as usize * h as usize * 3 / 10).max(4096);
        let mut output = Vec::with_capacity(estimated_size);
        {
            let mut writer = comp.start_compress(&mut output).map_err(|e| {
                ImagePixError::encode_failed("jpeg", format!("failed to start compress: {e:?}"))
            })?;
            let stride = w as usize * 3;
            for row in raw.chunks(stride) {
                writer.write_scanlines(row).map_err(|e| {
                    ImagePixError::encode_failed("jpeg", format!("failed to write scanlines: {e:?}"))
                })?;
            }
            writer.finish().map_err(|e| {
                ImagePixError::encode_failed("jpeg", format!("failed to finish: {e:?}"))
            })?;
        }
        Ok(output)
    })
}

fn write_with_image_crate(img: DynamicImage, format: ImageFormat, label: &'static str) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    img.write_to(&mut Cursor::new(&mut buf), format)
        .map_err(|e| ImagePixError::encode_failed(label, e.to_string()))?;
    Ok(buf)
}

fn optimize_png(buf: &[u8]) -> Result<Vec<u8>> {
    let mut options = oxipng::Options::from_preset(4);
    options.strip = oxipng::StripChunks::Safe;
    oxipng::optimize_from_memory(buf, &options)
        .map_err(|e| ImagePixError::encode_failed("png", format!("oxipng optimization failed: {e}")))
}

/// Lossless PNG: image crate encode, then oxipng recompression.
pub fn encode_png(pixels: &RgbaImage) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png", || {
        let img = if has_transparency(pixels) {
            DynamicImage::ImageRgba8(pixels.clone())
        } else {
            DynamicImage::ImageRgb8(DynamicImage::ImageRgba8(pixels.clone()).to_rgb8())
        };
        let buf = write_with_image_crate(img, ImageFormat::Png, "png")?;
        optimize_png(&buf)
    })
}

/// Count distinct colors, stopping once `limit` is exceeded.
fn distinct_colors_within(pixels: &RgbaImage, limit: usize) -> bool {
    let mut seen = HashSet::with_capacity(limit + 1);
    for px in pixels.pixels() {
        seen.insert(px.0);
        if seen.len() > limit {
            return false;
        }
    }
    true
}

/// Map `pixels` onto a NeuQuant palette of at most `colors` entries.
pub fn quantize(pixels: &RgbaImage, colors: u16) -> RgbaImage {
    let nq = NeuQuant::new(NEUQUANT_SAMPLE_FACTOR, colors as usize, pixels.as_raw());
    let mut mapped = pixels.clone();
    for px in mapped.pixels_mut() {
        nq.map_pixel(&mut px.0);
    }
    mapped
}

/// Palette PNG with at most `colors` colors. oxipng stores it indexed.
pub fn encode_png_palette(pixels: &RgbaImage, colors: u16) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:png:palette", || {
        if distinct_colors_within(pixels, colors as usize) {
            // Already fits the palette.
            return encode_png(pixels);
        }
        let mapped = quantize(pixels, colors);
        let buf = write_with_image_crate(DynamicImage::ImageRgba8(mapped), ImageFormat::Png, "png")?;
        optimize_png(&buf)
    })
}

fn webp_config(settings: Option<QualitySettings>) -> Result<webp::WebPConfig> {
    let mut config = webp::WebPConfig::new()
        .map_err(|_| ImagePixError::internal_panic("failed to create WebPConfig"))?;
    match settings {
        Some(settings) => {
            config.quality = settings.quality();
            config.method = settings.webp_method();
            config.pass = settings.webp_pass();
            config.preprocessing = settings.webp_preprocessing();
            config.sns_strength = settings.webp_sns_strength();
            config.autofilter = 1;
            config.filter_strength = settings.webp_filter_strength();
            config.filter_sharpness = settings.webp_filter_sharpness();
        }
        None => {
            config.lossless = 1;
            config.quality = 75.0;
            config.method = 4;
        }
    }
    Ok(config)
}

fn encode_webp_with(pixels: &RgbaImage, config: &webp::WebPConfig) -> Result<Vec<u8>> {
    let (w, h) = pixels.dimensions();
    let mem = if has_transparency(pixels) {
        webp::Encoder::from_rgba(pixels.as_raw(), w, h).encode_advanced(config)
    } else {
        // No alpha plane when the image is opaque
        let rgb = DynamicImage::ImageRgba8(pixels.clone()).to_rgb8();
        webp::Encoder::from_rgb(rgb.as_raw(), w, h).encode_advanced(config)
    }
    .map_err(|e| ImagePixError::encode_failed("webp", format!("WebP encode failed: {e:?}")))?;
    Ok(mem.to_vec())
}

/// Lossy WebP with tuned settings
pub fn encode_webp(pixels: &RgbaImage, settings: QualitySettings) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:webp", || {
        let config = webp_config(Some(settings))?;
        encode_webp_with(pixels, &config)
    })
}

pub fn encode_webp_lossless(pixels: &RgbaImage) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:webp:lossless", || {
        let config = webp_config(None)?;
        encode_webp_with(pixels, &config)
    })
}

/// GIF (single frame); the image crate quantizes to 256 colors.
pub fn encode_gif(pixels: &RgbaImage) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:gif", || {
        write_with_image_crate(DynamicImage::ImageRgba8(pixels.clone()), ImageFormat::Gif, "gif")
    })
}

/// 24-bit BMP; alpha is flattened like JPEG.
pub fn encode_bmp(pixels: &RgbaImage) -> Result<Vec<u8>> {
    run_with_panic_policy("encode:bmp", || {
        write_with_image_crate(DynamicImage::ImageRgb8(flatten_alpha(pixels)), ImageFormat::Bmp, "bmp")
    })
}

/// Single-image ICO. Sides above 256 px cannot be represented.
pub fn encode_ico(pixels: &RgbaImage) -> Result<Vec<u8>> {
    let (w, h) = pixels.dimensions();
    if w > MAX_ICO_DIMENSION || h > MAX_ICO_DIMENSION {
        return Err(ImagePixError::invalid_codec_parameter(
            "ICO",
            "dimensions",
            format!("{w}x{h}"),
            format!("icons are limited to {MAX_ICO_DIMENSION}x{MAX_ICO_DIMENSION}"),
        ));
    }
    run_with_panic_policy("encode:ico", || {
        write_with_image_crate(DynamicImage::ImageRgba8(pixels.clone()), ImageFormat::Ico, "ico")
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::Rgba;

    fn textured(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            let n = x.wrapping_mul(31) ^ y.wrapping_mul(17);
            Rgba([(n % 256) as u8, ((x * y) % 256) as u8, ((x + y * 3) % 256) as u8, 255])
        })
    }

    fn gradient(width: u32, height: u32) -> RgbaImage {
        RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x * 255 / width) as u8, (y * 255 / height) as u8, 96, 255])
        })
    }

    fn distinct(img: &RgbaImage) -> usize {
        img.pixels().map(|p| p.0).collect::<HashSet<_>>().len()
    }

    #[test]
    fn jpeg_has_markers() {
        let out = encode_rgba(&textured(64, 48), OutputFormat::Jpeg, CodecParams::Lossy { quality: 0.8 })
            .unwrap();
        assert_eq!(&out.bytes()[0..2], &[0xFF, 0xD8]);
        assert_eq!(&out.bytes()[out.size() - 2..], &[0xFF, 0xD9]);
        assert_eq!(out.mime(), "image/jpeg");
        assert_eq!(out.dimensions(), (64, 48));
    }

    #[test]
    fn jpeg_quality_shrinks_output() {
        let img = textured(128, 128);
        let high = encode_rgba(&img, OutputFormat::Jpeg, CodecParams::Lossy { quality: 0.95 }).unwrap();
        let low = encode_rgba(&img, OutputFormat::Jpeg, CodecParams::Lossy { quality: 0.3 }).unwrap();
        assert!(low.size() < high.size());
    }

    #[test]
    fn png_lossless_round_trips_pixels() {
        let img = textured(20, 10);
        let out = encode_rgba(&img, OutputFormat::Png, CodecParams::Lossless).unwrap();
        assert_eq!(&out.bytes()[0..8], &[0x89, 0x50, 0x4E, 0x47, 0x0D, 0x0A, 0x1A, 0x0A]);
        let back = image::load_from_memory(out.bytes()).unwrap().to_rgba8();
        assert_eq!(back, img);
    }

    #[test]
    fn png_palette_limits_colors() {
        let img = textured(64, 64);
        assert!(distinct(&img) > 16);
        let out = encode_rgba(&img, OutputFormat::Png, CodecParams::Palette { colors: 16 }).unwrap();
        let back = image::load_from_memory(out.bytes()).unwrap().to_rgba8();
        assert!(distinct(&back) <= 16);
        assert_eq!(back.dimensions(), (64, 64));
    }

    #[test]
    fn png_palette_keeps_images_that_already_fit() {
        let img = RgbaImage::from_fn(8, 8, |x, _| {
            if x < 4 { Rgba([255, 0, 0, 255]) } else { Rgba([0, 0, 255, 128]) }
        });
        let out = encode_rgba(&img, OutputFormat::Png, CodecParams::Palette { colors: 2 }).unwrap();
        let back = image::load_from_memory(out.bytes()).unwrap().to_rgba8();
        assert_eq!(back, img);
    }

    #[test]
    fn webp_keeps_alpha_only_when_needed() {
        let mut img = textured(16, 16);
        let opaque = encode_rgba(&img, OutputFormat::WebP, CodecParams::Lossy { quality: 0.8 }).unwrap();
        assert_eq!(&opaque.bytes()[0..4], b"RIFF");
        assert_eq!(&opaque.bytes()[8..12], b"WEBP");

        img.put_pixel(0, 0, Rgba([0, 0, 0, 0]));
        let lossless = encode_rgba(&img, OutputFormat::WebP, CodecParams::Lossless).unwrap();
        let back = image::load_from_memory(lossless.bytes()).unwrap().to_rgba8();
        assert_eq!(back.get_pixel(0, 0).0[3], 0);
    }

    #[test]
    fn jpeg_flattens_transparency_to_black() {
        let img = RgbaImage::from_pixel(8, 8, Rgba([255, 255, 255, 0]));
        let out = encode_rgba(&img, OutputFormat::Jpeg, CodecParams::Lossy { quality: 1.0 }).unwrap();
        let back = image::load_from_memory(out.bytes()).unwrap().to_rgb8();
        assert!(back.get_pixel(4, 4).0.iter().all(|&c| c < 8));
    }

    #[test]
    fn gif_bmp_ico_ignore_quality() {
        let img = textured(32, 32);
        for format in [OutputFormat::Gif, OutputFormat::Bmp, OutputFormat::Ico] {
            let out = encode_rgba(&img, format, CodecParams::Lossy { quality: 7.0 }).unwrap();
            let back = image::load_from_memory_with_format(out.bytes(), format.image_format()).unwrap();
            assert_eq!((back.width(), back.height()), (32, 32));
        }
    }

    #[test]
    fn oversized_ico_is_rejected() {
        let err = encode_rgba(&textured(300, 10), OutputFormat::Ico, CodecParams::Ignored).unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Encode);
    }

    #[test]
    fn out_of_range_params_are_rejected() {
        let img = textured(4, 4);
        for quality in [0.0, -0.5, 1.01, f32::NAN] {
            let err = encode_rgba(&img, OutputFormat::Jpeg, CodecParams::Lossy { quality }).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Encode);
        }
        for colors in [0, 1, 257] {
            let err = encode_rgba(&img, OutputFormat::Png, CodecParams::Palette { colors }).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Encode);
        }
        assert!(encode_rgba(&img, OutputFormat::WebP, CodecParams::Palette { colors: 16 }).is_err());
    }

    #[test]
    fn only_quality_varies_across_settings() {
        let low = QualitySettings::new(10.0);
        let high = QualitySettings::from_fraction(0.95);
        assert_eq!(high.quality(), 95.0);
        assert_eq!(QualitySettings::new(140.0).quality(), 100.0);
        assert_eq!(low.webp_method(), high.webp_method());
        assert_eq!(low.webp_pass(), high.webp_pass());
        assert_eq!(low.webp_sns_strength(), high.webp_sns_strength());
        assert_eq!(low.webp_filter_strength(), high.webp_filter_strength());
        assert_eq!(low.webp_filter_sharpness(), high.webp_filter_sharpness());
    }

    #[test]
    fn jpeg_size_never_drops_as_quality_rises() {
        for img in [gradient(300, 200), textured(300, 200)] {
            let mut previous = 0;
            for quality in (5..=100).step_by(5) {
                let size = encode_jpeg(&img, QualitySettings::new(quality as f32)).unwrap().len();
                assert!(size >= previous, "quality {quality}: {size} < {previous}");
                previous = size;
            }
        }
    }

    #[test]
    fn flatten_premultiplies() {
        let img = RgbaImage::from_pixel(1, 1, Rgba([200, 100, 50, 128]));
        assert_eq!(flatten_alpha(&img).get_pixel(0, 0).0, [100, 50, 25]);
    }
}
