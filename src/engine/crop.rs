// src/engine/crop.rs
//
// Crop: a region picked on the displayed (possibly scaled) image is mapped
// back to source pixels, drawn into a canvas and always encoded as PNG.

use crate::engine::asset::EncodedAsset;
use crate::engine::common::round_half_up;
use crate::engine::encoder::encode;
use crate::engine::pipeline::{Canvas, DestRect, RasterImage, SourceRect};
use crate::engine::quality::CodecParams;
use crate::engine::resize::validate_target;
use crate::error::{ImagePixError, Result};
use crate::ops::{AspectRatio, OutputFormat};
use tracing::debug;

const REGION_EPSILON: f64 = 1e-6;

/// Rectangle in displayed-image coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct CropRegion {
    pub x: f64,
    pub y: f64,
    pub width: f64,
    pub height: f64,
}

impl CropRegion {
    pub fn new(x: f64, y: f64, width: f64, height: f64) -> Self {
        Self {
            x,
            y,
            width,
            height,
        }
    }
}

/// Size at which the image was displayed when the region was picked.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct DisplaySize {
    pub width: f64,
    pub height: f64,
}

impl DisplaySize {
    pub fn new(width: f64, height: f64) -> Self {
        Self { width, height }
    }

    /// Displayed at natural size
    pub fn natural(image: &RasterImage) -> Self {
        Self::new(image.width() as f64, image.height() as f64)
    }
}

/// Reject empty regions and regions reaching outside the display rectangle.
pub fn validate_region(region: &CropRegion, display: &DisplaySize) -> Result<()> {
    if !(display.width.is_finite() && display.height.is_finite())
        || display.width <= 0.0
        || display.height <= 0.0
    {
        return Err(ImagePixError::invalid_argument(
            "display size",
            format!("{}x{}", display.width, display.height),
            "displayed dimensions must be positive",
        ));
    }
    let finite = [region.x, region.y, region.width, region.height]
        .iter()
        .all(|v| v.is_finite());
    if !finite || region.width <= 0.0 || region.height <= 0.0 {
        return Err(ImagePixError::invalid_crop_region(region.width, region.height));
    }
    if region.x < -REGION_EPSILON
        || region.y < -REGION_EPSILON
        || region.x + region.width > display.width + REGION_EPSILON
        || region.y + region.height > display.height + REGION_EPSILON
    {
        return Err(ImagePixError::crop_region_out_of_bounds(
            region.x,
            region.y,
            region.width,
            region.height,
            display.width,
            display.height,
        ));
    }
    Ok(())
}

/// Map a validated display-space region to source pixels.
pub fn source_region(image: &RasterImage, region: &CropRegion, display: &DisplaySize) -> Result<SourceRect> {
    validate_region(region, display)?;
    let (nw, nh) = (image.width() as f64, image.height() as f64);
    let scale_x = nw / display.width;
    let scale_y = nh / display.height;

    // Keep epsilon-sized overshoot from leaving the source after scaling.
    let x = (region.x * scale_x).clamp(0.0, nw);
    let y = (region.y * scale_y).clamp(0.0, nh);
    let width = (region.width * scale_x).min(nw - x);
    let height = (region.height * scale_y).min(nh - y);
    if width <= 0.0 || height <= 0.0 {
        return Err(ImagePixError::invalid_crop_region(region.width, region.height));
    }
    Ok(SourceRect::new(x, y, width, height))
}

/// Draw the cropped region into a canvas of the scaled region size, or `output` when given.
pub fn crop_to_canvas(
    image: &RasterImage,
    region: &CropRegion,
    display: &DisplaySize,
    output: Option<(u32, u32)>,
) -> Result<Canvas> {
    let src = source_region(image, region, display)?;
    let (out_w, out_h) = match output {
        Some((w, h)) => {
            validate_target(w, h)?;
            (w, h)
        }
        None => (
            (round_half_up(src.width) as u32).max(1),
            (round_half_up(src.height) as u32).max(1),
        ),
    };
    debug!(target: "imagepix::crop", ?region, ?src, out_w, out_h, "crop mapped to source");

    let mut canvas = Canvas::new(out_w, out_h)?;
    canvas.draw(image, src, DestRect::new(0, 0, out_w, out_h))?;
    Ok(canvas)
}

/// Crop and encode. The result is always a lossless PNG.
pub fn crop(
    image: &RasterImage,
    region: &CropRegion,
    display: &DisplaySize,
    output: Option<(u32, u32)>,
) -> Result<EncodedAsset> {
    let canvas = crop_to_canvas(image, region, display, output)?;
    encode(&canvas, OutputFormat::Png, CodecParams::Lossless)
}

/// Largest region of `aspect` centered in the display. `Free` selects everything.
pub fn centered_region(display: &DisplaySize, aspect: AspectRatio) -> CropRegion {
    let Some(ratio) = aspect.ratio() else {
        return CropRegion::new(0.0, 0.0, display.width, display.height);
    };
    let (mut width, mut height) = (display.width, display.width / ratio);
    if height > display.height {
        height = display.height;
        width = display.height * ratio;
    }
    CropRegion::new(
        (display.width - width) / 2.0,
        (display.height - height) / 2.0,
        width,
        height,
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use image::{Rgba, RgbaImage};

    fn quadrants(w: u32, h: u32) -> RasterImage {
        RasterImage::from_rgba(RgbaImage::from_fn(w, h, |x, y| {
            match (x < w / 2, y < h / 2) {
                (true, true) => Rgba([255, 0, 0, 255]),
                (false, true) => Rgba([0, 255, 0, 255]),
                (true, false) => Rgba([0, 0, 255, 255]),
                (false, false) => Rgba([255, 255, 0, 255]),
            }
        }))
    }

    #[test]
    fn full_display_region_reproduces_natural_size() {
        let img = quadrants(800, 600);
        let display = DisplaySize::new(400.0, 300.0);
        let out = crop(&img, &CropRegion::new(0.0, 0.0, 400.0, 300.0), &display, None).unwrap();
        assert_eq!(out.dimensions(), (800, 600));
        assert_eq!(out.format(), OutputFormat::Png);
    }

    #[test]
    fn quadrant_crop_maps_through_display_scale() {
        let img = quadrants(200, 100);
        let display = DisplaySize::new(100.0, 50.0);
        let canvas =
            crop_to_canvas(&img, &CropRegion::new(50.0, 0.0, 50.0, 25.0), &display, None).unwrap();
        assert_eq!(canvas.dimensions(), (100, 50));
        assert_eq!(canvas.pixel(10, 10), [0, 255, 0, 255]);
    }

    #[test]
    fn explicit_output_size_rescales() {
        let img = quadrants(64, 64);
        let canvas = crop_to_canvas(
            &img,
            &CropRegion::new(0.0, 0.0, 32.0, 32.0),
            &DisplaySize::natural(&img),
            Some((10, 20)),
        )
        .unwrap();
        assert_eq!(canvas.dimensions(), (10, 20));
        let err = crop_to_canvas(
            &img,
            &CropRegion::new(0.0, 0.0, 32.0, 32.0),
            &DisplaySize::natural(&img),
            Some((0, 20)),
        )
        .unwrap_err();
        assert_eq!(err.kind(), ErrorKind::Dimension);
    }

    #[test]
    fn rejects_empty_and_out_of_bounds_regions() {
        let img = quadrants(10, 10);
        let display = DisplaySize::natural(&img);
        for region in [
            CropRegion::new(0.0, 0.0, 0.0, 5.0),
            CropRegion::new(0.0, 0.0, 5.0, -1.0),
            CropRegion::new(6.0, 0.0, 5.0, 5.0),
            CropRegion::new(-1.0, 0.0, 5.0, 5.0),
            CropRegion::new(0.0, 0.0, f64::NAN, 5.0),
        ] {
            let err = crop(&img, &region, &display, None).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::CropRegion, "region {region:?}");
        }
    }

    #[test]
    fn centered_regions() {
        let display = DisplaySize::new(1600.0, 900.0);
        let square = centered_region(&display, AspectRatio::Square);
        assert_eq!(square, CropRegion::new(350.0, 0.0, 900.0, 900.0));
        let wide = centered_region(&display, AspectRatio::Widescreen);
        assert!((wide.width - 1600.0).abs() < 1e-9 && (wide.height - 900.0).abs() < 1e-9);
        let free = centered_region(&display, AspectRatio::Free);
        assert_eq!(free, CropRegion::new(0.0, 0.0, 1600.0, 900.0));
        assert!(validate_region(&centered_region(&display, AspectRatio::PhotoPortrait), &display).is_ok());
    }
}
