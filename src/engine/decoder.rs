// src/engine/decoder.rs
//
// Decoder operations: JPEG (mozjpeg), PNG (zune-png), WebP (libwebp),
// GIF/BMP/TIFF/ICO via the image crate. SVG is recognized and rejected.

use crate::engine::common::run_with_panic_policy;
use crate::engine::limits::LimitConfig;
use crate::engine::pipeline::RasterImage;
use crate::engine::{MAX_DIMENSION, MAX_PIXELS};
use crate::error::{ImagePixError, Result};
use image::{
    DynamicImage, GrayAlphaImage, GrayImage, ImageFormat, ImageReader, RgbImage, RgbaImage,
};
use mozjpeg::Decompress;
use std::io::Cursor;
use tracing::{debug, warn};
use webp::{BitstreamFeatures, Decoder as WebPDecoder};
use zune_core::bytestream::ZCursor;
use zune_core::colorspace::ColorSpace;
use zune_core::options::DecoderOptions;
use zune_png::PngDecoder;

/// Input format as recognized from magic bytes.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum InputFormat {
    Raster(ImageFormat),
    Svg,
}

impl InputFormat {
    pub fn mime(&self) -> &'static str {
        match self {
            InputFormat::Svg => "image/svg+xml",
            InputFormat::Raster(fmt) => fmt.to_mime_type(),
        }
    }
}

/// A decoded image plus what was learned about the input while decoding.
#[derive(Clone, Debug)]
pub struct DecodedImage {
    pub raster: RasterImage,
    pub format: ImageFormat,
    /// EXIF orientation that was applied, if any
    pub orientation: Option<u16>,
}

/// Decode JPEG using mozjpeg (backed by libjpeg-turbo)
pub fn decode_jpeg_mozjpeg(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:mozjpeg", || {
        if !data.windows(2).any(|pair| pair == [0xFF, 0xD9]) {
            return Err(ImagePixError::decode_failed("jpeg: missing EOI marker"));
        }

        let decompress = Decompress::new_mem(data).map_err(|e| {
            ImagePixError::decode_failed(format!("jpeg: decompress init failed: {e:?}"))
        })?;

        let mut decompress = decompress.rgb().map_err(|e| {
            ImagePixError::decode_failed(format!("jpeg: rgb conversion failed: {e:?}"))
        })?;

        let width = decompress.width();
        let height = decompress.height();
        if width > MAX_DIMENSION as usize || height > MAX_DIMENSION as usize {
            return Err(ImagePixError::dimension_exceeds_limit(
                width.max(height) as u32,
                MAX_DIMENSION,
            ));
        }
        let (width, height) = (width as u32, height as u32);
        check_dimensions(width, height)?;

        let pixels: Vec<[u8; 3]> = decompress.read_scanlines().map_err(|e| {
            ImagePixError::decode_failed(format!("jpeg: failed to read scanlines: {e:?}"))
        })?;
        let flat_pixels: Vec<u8> = pixels.into_iter().flatten().collect();

        RgbImage::from_raw(width, height, flat_pixels)
            .map(DynamicImage::ImageRgb8)
            .ok_or_else(|| ImagePixError::decode_failed("jpeg: truncated pixel data"))
    })
}

/// Decode PNG using zune-png. 16-bit input is stripped to 8-bit.
pub fn decode_png_zune(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:png", || {
        let options = DecoderOptions::default().png_set_strip_to_8bit(true);
        let mut decoder = PngDecoder::new_with_options(ZCursor::new(data), options);
        let pixels = decoder
            .decode()
            .map_err(|e| ImagePixError::decode_failed(format!("png: decode failed: {e}")))?;

        let info = decoder
            .info()
            .ok_or_else(|| ImagePixError::decode_failed("png: missing header info"))?;
        let width = info.width as u32;
        let height = info.height as u32;
        check_dimensions(width, height)?;

        let buf = match pixels {
            zune_core::result::DecodingResult::U8(v) => v,
            _ => return Err(ImagePixError::decode_failed("png: unexpected non-U8 pixel buffer")),
        };

        let colorspace = decoder
            .colorspace()
            .ok_or_else(|| ImagePixError::decode_failed("png: missing colorspace"))?;

        let built = match colorspace {
            ColorSpace::RGB => RgbImage::from_raw(width, height, buf).map(DynamicImage::ImageRgb8),
            ColorSpace::RGBA => RgbaImage::from_raw(width, height, buf).map(DynamicImage::ImageRgba8),
            ColorSpace::Luma => GrayImage::from_raw(width, height, buf).map(DynamicImage::ImageLuma8),
            ColorSpace::LumaA => {
                GrayAlphaImage::from_raw(width, height, buf).map(DynamicImage::ImageLumaA8)
            }
            other => {
                return Err(ImagePixError::decode_failed(format!(
                    "png: unsupported colorspace {other:?}"
                )))
            }
        };
        built.ok_or_else(|| ImagePixError::decode_failed("png: truncated pixel data"))
    })
}

/// Decode WebP using libwebp. Animated WebP falls back to the image crate (first frame).
pub fn decode_webp_libwebp(data: &[u8]) -> Result<DynamicImage> {
    run_with_panic_policy("decode:webp", || {
        // Header first, so malformed files never size an allocation
        let features = BitstreamFeatures::new(data)
            .ok_or_else(|| ImagePixError::decode_failed("webp: failed to read bitstream features"))?;

        if features.has_animation() {
            return image::load_from_memory(data).map_err(|e| {
                ImagePixError::decode_failed(format!("webp (animated) decode failed: {e}"))
            });
        }

        check_dimensions(features.width(), features.height())?;

        let decoded = WebPDecoder::new(data)
            .decode()
            .ok_or_else(|| ImagePixError::decode_failed("webp: decode failed"))?;
        check_dimensions(decoded.width(), decoded.height())?;

        Ok(decoded.to_image())
    })
}

/// Decode GIF (first frame), BMP, TIFF and ICO through the image crate.
pub fn decode_with_image_crate(data: &[u8], format: ImageFormat) -> Result<DynamicImage> {
    run_with_panic_policy("decode:image", || {
        image::load_from_memory_with_format(data, format)
            .map_err(|e| ImagePixError::decode_failed(format!("{format:?}: {e}")))
    })
}

/// Recognize SVG markup, which has no magic number.
pub fn is_svg(bytes: &[u8]) -> bool {
    let head = &bytes[..bytes.len().min(1024)];
    let text = String::from_utf8_lossy(head);
    let trimmed = text.trim_start_matches('\u{feff}').trim_start();
    (trimmed.starts_with("<?xml") || trimmed.starts_with("<svg") || trimmed.starts_with("<!DOCTYPE svg"))
        && trimmed.contains("<svg")
}

/// Detect input format using magic bytes. Returns None if unknown.
pub fn detect_format(bytes: &[u8]) -> Option<InputFormat> {
    if let Ok(format) = image::guess_format(bytes) {
        return Some(InputFormat::Raster(format));
    }
    is_svg(bytes).then_some(InputFormat::Svg)
}

/// Unified decode entrypoint:
/// - Detect format once (magic bytes)
/// - Route JPEG to mozjpeg, PNG to zune-png, WebP to libwebp, others to image crate
/// - Apply EXIF orientation
pub fn decode_image(bytes: &[u8]) -> Result<DecodedImage> {
    if bytes.is_empty() {
        return Err(ImagePixError::decode_failed("empty input"));
    }
    let format = match detect_format(bytes) {
        Some(InputFormat::Raster(format)) => format,
        Some(InputFormat::Svg) => {
            return Err(ImagePixError::unsupported_format(
                "svg (vector images cannot be rasterized)",
            ))
        }
        None => return Err(ImagePixError::unsupported_format("unrecognized image data")),
    };

    ensure_dimensions_safe(bytes)?;

    let img = match format {
        ImageFormat::Jpeg => decode_jpeg_mozjpeg(bytes)?,
        ImageFormat::Png => decode_png_zune(bytes)?,
        ImageFormat::WebP => decode_webp_libwebp(bytes)?,
        ImageFormat::Gif | ImageFormat::Bmp | ImageFormat::Tiff | ImageFormat::Ico => {
            decode_with_image_crate(bytes, format)?
        }
        other => {
            return Err(ImagePixError::unsupported_format(format!(
                "{} is not an accepted input",
                other.to_mime_type()
            )))
        }
    };

    let orientation = detect_exif_orientation(bytes).filter(|&o| o != 1);
    let img = match orientation {
        Some(o) => apply_orientation(img, o),
        None => img,
    };

    debug!(
        target: "imagepix::decode",
        format = ?format,
        width = img.width(),
        height = img.height(),
        orientation,
        "decoded image"
    );

    Ok(DecodedImage {
        raster: RasterImage::from_dynamic(img),
        format,
        orientation,
    })
}

/// Decode with configurable input limits on top of the hard safety limits.
pub fn decode_with_limits(bytes: &[u8], limits: &LimitConfig) -> Result<DecodedImage> {
    limits.enforce_source_len(bytes.len())?;
    if let Some((width, height)) = read_header_dimensions(bytes) {
        limits.enforce_pixels(width, height)?;
    }
    let decoded = decode_image(bytes)?;
    let (width, height) = decoded.raster.dimensions();
    limits.enforce_pixels(width, height).inspect_err(|err| {
        warn!(target: "imagepix::decode", error = %err, "decoded image exceeds configured limits");
    })?;
    Ok(decoded)
}

/// Decode bytes into a raster.
pub fn decode(bytes: &[u8]) -> Result<RasterImage> {
    decode_image(bytes).map(|decoded| decoded.raster)
}

/// Check if image dimensions are within safe limits.
/// Returns an error if the image is too large (potential decompression bomb).
pub fn check_dimensions(width: u32, height: u32) -> Result<()> {
    if width > MAX_DIMENSION || height > MAX_DIMENSION {
        return Err(ImagePixError::dimension_exceeds_limit(
            width.max(height),
            MAX_DIMENSION,
        ));
    }
    let pixels = width as u64 * height as u64;
    if pixels > MAX_PIXELS {
        return Err(ImagePixError::pixel_count_exceeds_limit(pixels, MAX_PIXELS));
    }
    Ok(())
}

/// Read dimensions from the header without decoding pixels.
pub fn read_header_dimensions(bytes: &[u8]) -> Option<(u32, u32)> {
    ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .ok()?
        .into_dimensions()
        .ok()
}

/// Inspect encoded bytes and ensure the image dimensions are safe before decoding.
pub fn ensure_dimensions_safe(bytes: &[u8]) -> Result<()> {
    match read_header_dimensions(bytes) {
        Some((width, height)) => check_dimensions(width, height),
        None => Ok(()),
    }
}

/// Extract EXIF Orientation tag (1-8). Returns None if missing or invalid.
pub fn detect_exif_orientation(bytes: &[u8]) -> Option<u16> {
    let mut cursor = Cursor::new(bytes);
    let exif = exif::Reader::new().read_from_container(&mut cursor).ok()?;
    let field = exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?;
    let orientation = field.value.get_uint(0)? as u16;
    (1..=8).contains(&orientation).then_some(orientation)
}

/// Rotate/flip so the image displays upright.
pub fn apply_orientation(img: DynamicImage, orientation: u16) -> DynamicImage {
    match orientation {
        2 => img.fliph(),
        3 => img.rotate180(),
        4 => img.flipv(),
        5 => img.rotate90().fliph(), // transpose
        6 => img.rotate90(),
        7 => img.rotate270().fliph(), // transverse
        8 => img.rotate270(),
        _ => img,
    }
}
