// src/engine/pipeline.rs
//
// Raster primitives every tool is built from:
// - RasterImage: immutable decoded RGBA8 bitmap, shared via Arc
// - Canvas: the mutable scratch buffer one operation draws into
// - draw(): scaled, clipped, source-over copy of a source sub-rectangle
// - fill(): solid background

use crate::engine::common::round_half_up;
use crate::engine::decoder::check_dimensions;
use crate::error::{ImagePixError, Result};
use crate::ops::Color;
use fast_image_resize::{self as fir, PixelType, ResizeOptions};
use image::{imageops::FilterType, DynamicImage, RgbaImage};
use std::sync::Arc;
use tracing::trace;

/// Sub-pixel tolerance when validating fractional rectangles.
const RECT_EPSILON: f64 = 1e-6;

/// Immutable decoded bitmap. Cloning shares the pixel buffer.
#[derive(Clone, Debug)]
pub struct RasterImage {
    pixels: Arc<RgbaImage>,
}

impl RasterImage {
    pub fn from_rgba(pixels: RgbaImage) -> Self {
        Self {
            pixels: Arc::new(pixels),
        }
    }

    /// Normalize any decoded layout to straight RGBA8.
    pub fn from_dynamic(img: DynamicImage) -> Self {
        match img {
            DynamicImage::ImageRgba8(rgba) => Self::from_rgba(rgba),
            other => Self::from_rgba(other.to_rgba8()),
        }
    }

    /// Build from a raw RGBA8 buffer (`width * height * 4` bytes).
    pub fn from_raw(width: u32, height: u32, data: Vec<u8>) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ImagePixError::invalid_argument(
                "raster",
                format!("{width}x{height}"),
                "dimensions must be at least 1x1",
            ));
        }
        let len = data.len();
        RgbaImage::from_raw(width, height, data)
            .map(Self::from_rgba)
            .ok_or_else(|| {
                ImagePixError::invalid_argument(
                    "raster",
                    format!("{len} bytes"),
                    format!("expected {} bytes for {width}x{height} RGBA", width as u64 * height as u64 * 4),
                )
            })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    /// True when any pixel is not fully opaque.
    pub fn has_transparency(&self) -> bool {
        has_transparency(&self.pixels)
    }

    /// Take the buffer, copying only if it is still shared.
    pub fn into_rgba(self) -> RgbaImage {
        Arc::try_unwrap(self.pixels).unwrap_or_else(|shared| (*shared).clone())
    }
}

pub(crate) fn has_transparency(pixels: &RgbaImage) -> bool {
    pixels.as_raw().iter().skip(3).step_by(4).any(|&a| a != 255)
}

/// Fractional source rectangle in source pixel coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct SourceRect {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl SourceRect {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }

    /// The whole of `image`
    pub fn full(image: &RasterImage) -> Self {
        Self::new(0.0, 0.0, image.width() as f64, image.height() as f64)
    }

    fn validate(&self, image: &RasterImage) -> Result<()> {
        let finite = [self.x, self.y, self.width, self.height]
            .iter()
            .all(|v| v.is_finite());
        let (w, h) = (image.width() as f64, image.height() as f64);
        if !finite
            || self.width <= 0.0
            || self.height <= 0.0
            || self.x < -RECT_EPSILON
            || self.y < -RECT_EPSILON
            || self.x + self.width > w + RECT_EPSILON
            || self.y + self.height > h + RECT_EPSILON
        {
            return Err(ImagePixError::invalid_argument(
                "src_rect",
                format!("{self:?}"),
                format!("must be a non-empty rectangle inside {}x{}", image.width(), image.height()),
            ));
        }
        Ok(())
    }
}

/// Integer destination rectangle in canvas coordinates. May extend past any edge.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct DestRect {
    pub x: i64,
    pub y: i64,
    pub width: u32,
    pub height: u32,
}

impl DestRect {
    pub fn new(x: i64, y: i64, width: u32, height: u32) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Mutable RGBA scratch buffer, initially fully transparent.
#[derive(Clone, Debug)]
pub struct Canvas {
    pixels: RgbaImage,
}

impl Canvas {
    pub fn new(width: u32, height: u32) -> Result<Self> {
        if width == 0 || height == 0 {
            return Err(ImagePixError::invalid_argument(
                "canvas",
                format!("{width}x{height}"),
                "dimensions must be at least 1x1",
            ));
        }
        check_dimensions(width, height)?;
        Ok(Self {
            pixels: RgbaImage::new(width, height),
        })
    }

    pub fn width(&self) -> u32 {
        self.pixels.width()
    }

    pub fn height(&self) -> u32 {
        self.pixels.height()
    }

    pub fn dimensions(&self) -> (u32, u32) {
        self.pixels.dimensions()
    }

    pub fn pixel(&self, x: u32, y: u32) -> [u8; 4] {
        self.pixels.get_pixel(x, y).0
    }

    pub fn as_rgba(&self) -> &RgbaImage {
        &self.pixels
    }

    pub fn fill(&mut self, color: Color) {
        fill(self, color);
    }

    pub fn draw(&mut self, src: &RasterImage, src_rect: SourceRect, dst_rect: DestRect) -> Result<()> {
        draw(self, src, src_rect, dst_rect)
    }

    pub fn into_raster(self) -> RasterImage {
        RasterImage::from_rgba(self.pixels)
    }
}

/// Solid fill, composited source-over like a canvas `fillRect`.
pub fn fill(canvas: &mut Canvas, color: Color) {
    let src = color.to_array();
    match src[3] {
        0 => {}
        255 => {
            for px in canvas.pixels.pixels_mut() {
                px.0 = src;
            }
        }
        _ => {
            for px in canvas.pixels.pixels_mut() {
                px.0 = source_over(src, px.0);
            }
        }
    }
}

/// Draw `src_rect` of `src` scaled into `dst_rect` of `dest`.
///
/// Pixels landing outside the canvas are clipped; only the visible part of
/// the source is resampled.
pub fn draw(dest: &mut Canvas, src: &RasterImage, src_rect: SourceRect, dst_rect: DestRect) -> Result<()> {
    src_rect.validate(src)?;
    if dst_rect.width == 0 || dst_rect.height == 0 {
        return Err(ImagePixError::invalid_argument(
            "dst_rect",
            format!("{}x{}", dst_rect.width, dst_rect.height),
            "destination must be at least 1x1",
        ));
    }

    let (cw, ch) = (dest.width() as i64, dest.height() as i64);
    let x0 = dst_rect.x.max(0);
    let y0 = dst_rect.y.max(0);
    let x1 = (dst_rect.x + dst_rect.width as i64).min(cw);
    let y1 = (dst_rect.y + dst_rect.height as i64).min(ch);
    if x0 >= x1 || y0 >= y1 {
        trace!(target: "imagepix::draw", ?dst_rect, "destination fully clipped");
        return Ok(());
    }

    // Visible part of the destination mapped back into source space.
    let scale_x = src_rect.width / dst_rect.width as f64;
    let scale_y = src_rect.height / dst_rect.height as f64;
    let visible = SourceRect::new(
        src_rect.x + (x0 - dst_rect.x) as f64 * scale_x,
        src_rect.y + (y0 - dst_rect.y) as f64 * scale_y,
        (x1 - x0) as f64 * scale_x,
        (y1 - y0) as f64 * scale_y,
    );
    let (out_w, out_h) = ((x1 - x0) as u32, (y1 - y0) as u32);

    let patch = if is_pixel_aligned(&visible, out_w, out_h) {
        image::imageops::crop_imm(
            src.as_rgba(),
            visible.x.round() as u32,
            visible.y.round() as u32,
            out_w,
            out_h,
        )
        .to_image()
    } else {
        resample(src, &visible, out_w, out_h)?
    };

    composite(&mut dest.pixels, &patch, x0 as u32, y0 as u32);
    Ok(())
}

fn is_pixel_aligned(rect: &SourceRect, out_w: u32, out_h: u32) -> bool {
    let integral = |v: f64| (v - v.round()).abs() < RECT_EPSILON;
    integral(rect.x)
        && integral(rect.y)
        && (rect.width - out_w as f64).abs() < RECT_EPSILON
        && (rect.height - out_h as f64).abs() < RECT_EPSILON
}

fn resize_options(rect: &SourceRect) -> ResizeOptions {
    ResizeOptions::new()
        .resize_alg(fir::ResizeAlg::Convolution(fir::FilterType::Lanczos3))
        .crop(rect.x, rect.y, rect.width, rect.height)
}

/// Lanczos3 resample of a fractional source window to `dst_width x dst_height`.
pub fn resample(src: &RasterImage, rect: &SourceRect, dst_width: u32, dst_height: u32) -> Result<RgbaImage> {
    let (src_width, src_height) = src.dimensions();
    match resample_fir(src, rect, dst_width, dst_height) {
        Ok(img) => Ok(img),
        Err(err) => {
            trace!(target: "imagepix::draw", error = %err, "fir resample failed, using image crate");
            resample_with_image_crate(src, rect, dst_width, dst_height).map_err(|fallback_err| {
                ImagePixError::resize_failed(
                    (src_width, src_height),
                    (dst_width, dst_height),
                    format!("{err}; image crate fallback failed: {fallback_err}"),
                )
            })
        }
    }
}

fn resample_fir(
    src: &RasterImage,
    rect: &SourceRect,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<RgbaImage, String> {
    let src_image = fir::images::ImageRef::new(
        src.width(),
        src.height(),
        src.as_rgba().as_raw(),
        PixelType::U8x4,
    )
    .map_err(|e| format!("fir source image error: {e:?}"))?;
    let mut dst_image = fir::images::Image::new(dst_width, dst_height, PixelType::U8x4);

    // Alpha is premultiplied internally by the resizer.
    let mut resizer = fir::Resizer::new();
    resizer
        .resize(&src_image, &mut dst_image, &resize_options(rect))
        .map_err(|e| format!("fir resize error: {e:?}"))?;

    RgbaImage::from_raw(dst_width, dst_height, dst_image.into_vec())
        .ok_or_else(|| "failed to create rgba image from resized data".to_string())
}

fn resample_with_image_crate(
    src: &RasterImage,
    rect: &SourceRect,
    dst_width: u32,
    dst_height: u32,
) -> std::result::Result<RgbaImage, String> {
    let left = rect.x.floor().max(0.0) as u32;
    let top = rect.y.floor().max(0.0) as u32;
    let right = ((rect.x + rect.width).ceil() as u32).min(src.width());
    let bottom = ((rect.y + rect.height).ceil() as u32).min(src.height());
    if right <= left || bottom <= top {
        return Err("empty crop window for fallback resize".to_string());
    }
    let window = image::imageops::crop_imm(src.as_rgba(), left, top, right - left, bottom - top).to_image();
    Ok(image::imageops::resize(
        &window,
        dst_width,
        dst_height,
        FilterType::Lanczos3,
    ))
}

/// Source-over composite of `patch` onto `dest` at (`x`, `y`). `patch` must fit.
fn composite(dest: &mut RgbaImage, patch: &RgbaImage, x: u32, y: u32) {
    for (px, py, p) in patch.enumerate_pixels() {
        let target = dest.get_pixel_mut(x + px, y + py);
        target.0 = source_over(p.0, target.0);
    }
}

/// Porter-Duff source-over on straight-alpha RGBA8.
#[inline]
pub(crate) fn source_over(src: [u8; 4], dst: [u8; 4]) -> [u8; 4] {
    let sa = src[3] as u32;
    if sa == 255 {
        return src;
    }
    if sa == 0 {
        return dst;
    }
    let da = dst[3] as u32;
    // dst contribution scaled by (1 - sa), in 0..=255*255
    let dw = da * (255 - sa);
    let out_a = sa * 255 + dw;
    if out_a == 0 {
        return [0, 0, 0, 0];
    }
    let mut out = [0u8; 4];
    for c in 0..3 {
        let num = src[c] as u32 * sa * 255 + dst[c] as u32 * dw;
        out[c] = ((num + out_a / 2) / out_a) as u8;
    }
    out[3] = ((out_a + 127) / 255) as u8;
    out
}

/// Canvas size after scaling a dimension, rounded half-up and never below 1.
pub(crate) fn scaled_dimension(value: u32, scale: f64) -> u32 {
    (round_half_up(value as f64 * scale) as u32).max(1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::Rgba;

    fn gradient(w: u32, h: u32) -> RasterImage {
        RasterImage::from_rgba(RgbaImage::from_fn(w, h, |x, y| {
            Rgba([(x * 20) as u8, (y * 20) as u8, 100, 255])
        }))
    }

    fn solid(w: u32, h: u32, c: [u8; 4]) -> RasterImage {
        RasterImage::from_rgba(RgbaImage::from_pixel(w, h, Rgba(c)))
    }

    #[test]
    fn canvas_starts_transparent_and_rejects_empty() {
        let canvas = Canvas::new(3, 2).unwrap();
        assert_eq!(canvas.pixel(2, 1), [0, 0, 0, 0]);
        assert!(Canvas::new(0, 2).is_err());
        assert!(Canvas::new(crate::engine::MAX_DIMENSION + 1, 1).is_err());
    }

    #[test]
    fn identity_draw_copies_pixels_exactly() {
        let src = gradient(5, 4);
        let mut canvas = Canvas::new(5, 4).unwrap();
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(0, 0, 5, 4))
            .unwrap();
        assert_eq!(canvas.as_rgba(), src.as_rgba());
    }

    #[test]
    fn negative_offset_is_clipped() {
        let src = gradient(4, 4);
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(-2, -1, 4, 4))
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), src.pixel(2, 1));
        assert_eq!(canvas.pixel(1, 1), src.pixel(3, 2));
    }

    #[test]
    fn fully_outside_draw_is_a_no_op() {
        let src = gradient(4, 4);
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(10, 10, 4, 4))
            .unwrap();
        assert_eq!(canvas.pixel(0, 0), [0, 0, 0, 0]);
    }

    #[test]
    fn upscale_of_solid_color_stays_solid() {
        let src = solid(2, 2, [200, 10, 50, 255]);
        let mut canvas = Canvas::new(7, 5).unwrap();
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(0, 0, 7, 5))
            .unwrap();
        for px in canvas.as_rgba().pixels() {
            let [r, g, b, a] = px.0;
            assert!(r.abs_diff(200) <= 1 && g.abs_diff(10) <= 1 && b.abs_diff(50) <= 1);
            assert_eq!(a, 255);
        }
    }

    #[test]
    fn fractional_source_rect_is_accepted() {
        let src = gradient(10, 10);
        let mut canvas = Canvas::new(4, 4).unwrap();
        canvas
            .draw(
                &src,
                SourceRect::new(1.5, 2.25, 5.5, 5.5),
                DestRect::new(0, 0, 4, 4),
            )
            .unwrap();
        assert_eq!(canvas.pixel(3, 3)[3], 255);
    }

    #[test]
    fn source_rect_outside_image_is_rejected() {
        let src = gradient(4, 4);
        let mut canvas = Canvas::new(4, 4).unwrap();
        let err = canvas
            .draw(&src, SourceRect::new(1.0, 0.0, 4.0, 4.0), DestRect::new(0, 0, 4, 4))
            .unwrap_err();
        assert!(matches!(err, ImagePixError::InvalidArgument { .. }));
        assert!(canvas
            .draw(&src, SourceRect::new(0.0, 0.0, 0.0, 4.0), DestRect::new(0, 0, 4, 4))
            .is_err());
    }

    #[test]
    fn fill_then_semi_transparent_draw_composites() {
        let mut canvas = Canvas::new(1, 1).unwrap();
        canvas.fill(Color::WHITE);
        assert_eq!(canvas.pixel(0, 0), [255, 255, 255, 255]);

        let src = solid(1, 1, [0, 0, 0, 128]);
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(0, 0, 1, 1))
            .unwrap();
        let [r, g, b, a] = canvas.pixel(0, 0);
        assert_eq!(a, 255);
        assert!((126..=128).contains(&r));
        assert_eq!(r, g);
        assert_eq!(g, b);
    }

    #[test]
    fn transparent_source_leaves_background() {
        let mut canvas = Canvas::new(2, 2).unwrap();
        canvas.fill(Color::rgb(1, 2, 3));
        let src = solid(2, 2, [255, 255, 255, 0]);
        canvas
            .draw(&src, SourceRect::full(&src), DestRect::new(0, 0, 2, 2))
            .unwrap();
        assert_eq!(canvas.pixel(1, 1), [1, 2, 3, 255]);
    }

    #[test]
    fn source_over_on_transparent_destination_keeps_source() {
        assert_eq!(source_over([10, 20, 30, 77], [0, 0, 0, 0]), [10, 20, 30, 77]);
    }

    #[test]
    fn draw_is_deterministic() {
        let src = gradient(9, 7);
        let render = || {
            let mut canvas = Canvas::new(5, 3).unwrap();
            canvas
                .draw(&src, SourceRect::full(&src), DestRect::new(0, 0, 5, 3))
                .unwrap();
            canvas.into_raster().into_rgba()
        };
        assert_eq!(render(), render());
    }

    #[test]
    fn raster_from_raw_validates_length() {
        assert!(RasterImage::from_raw(2, 2, vec![0; 16]).is_ok());
        assert!(RasterImage::from_raw(2, 2, vec![0; 15]).is_err());
        assert!(RasterImage::from_raw(0, 2, vec![]).is_err());
    }

    #[test]
    fn transparency_detection() {
        assert!(!solid(2, 2, [1, 2, 3, 255]).has_transparency());
        assert!(solid(2, 2, [1, 2, 3, 254]).has_transparency());
    }
}
