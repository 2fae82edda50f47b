// src/engine/resize.rs
//
// Resize strategies (stretch / fit / fill / pad): pure geometry planning,
// then one draw into a fresh canvas.

use crate::engine::common::round_half_up;
use crate::engine::pipeline::{scaled_dimension, Canvas, DestRect, RasterImage, SourceRect};
use crate::error::{DimensionBound, ImagePixError, Result};
use crate::ops::{Color, ResizeMode};
use tracing::debug;

/// Smallest accepted target side in pixels
pub const MIN_TARGET_DIMENSION: u32 = 1;
/// Largest accepted target side in pixels
pub const MAX_TARGET_DIMENSION: u32 = 10_000;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizeRequest {
    pub target_width: u32,
    pub target_height: u32,
    pub mode: ResizeMode,
    /// Only used by `ResizeMode::Pad`
    pub background: Color,
}

impl ResizeRequest {
    pub fn new(target_width: u32, target_height: u32, mode: ResizeMode) -> Self {
        Self {
            target_width,
            target_height,
            mode,
            background: Color::default(),
        }
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }
}

/// Where and how large the source is drawn, and how large the canvas is.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ResizePlan {
    pub canvas_width: u32,
    pub canvas_height: u32,
    pub draw_width: u32,
    pub draw_height: u32,
    pub offset_x: i64,
    pub offset_y: i64,
    pub scale: f64,
}

fn check_axis(axis: &'static str, value: u32) -> Result<()> {
    if value < MIN_TARGET_DIMENSION {
        return Err(ImagePixError::dimension_out_of_range(
            axis,
            value,
            DimensionBound::Minimum(MIN_TARGET_DIMENSION),
        ));
    }
    if value > MAX_TARGET_DIMENSION {
        return Err(ImagePixError::dimension_out_of_range(
            axis,
            value,
            DimensionBound::Maximum(MAX_TARGET_DIMENSION),
        ));
    }
    Ok(())
}

/// Reject targets outside `[1, 10000]`, width first.
pub fn validate_target(width: u32, height: u32) -> Result<()> {
    check_axis("width", width)?;
    check_axis("height", height)
}

/// Plan a resize of a `src_width x src_height` image into the target box.
pub fn plan_resize(
    src_width: u32,
    src_height: u32,
    target_width: u32,
    target_height: u32,
    mode: ResizeMode,
) -> Result<ResizePlan> {
    validate_target(target_width, target_height)?;
    if src_width == 0 || src_height == 0 {
        return Err(ImagePixError::invalid_argument(
            "source",
            format!("{src_width}x{src_height}"),
            "source image is empty",
        ));
    }

    let (sw, sh) = (src_width as f64, src_height as f64);
    let (tw, th) = (target_width as f64, target_height as f64);

    let plan = match mode {
        ResizeMode::Stretch => ResizePlan {
            canvas_width: target_width,
            canvas_height: target_height,
            draw_width: target_width,
            draw_height: target_height,
            offset_x: 0,
            offset_y: 0,
            scale: 1.0,
        },
        ResizeMode::Fit => {
            let scale = (tw / sw).min(th / sh);
            let w = scaled_dimension(src_width, scale);
            let h = scaled_dimension(src_height, scale);
            ResizePlan {
                canvas_width: w,
                canvas_height: h,
                draw_width: w,
                draw_height: h,
                offset_x: 0,
                offset_y: 0,
                scale,
            }
        }
        ResizeMode::Fill => {
            let scale = (tw / sw).max(th / sh);
            ResizePlan {
                canvas_width: target_width,
                canvas_height: target_height,
                draw_width: scaled_dimension(src_width, scale),
                draw_height: scaled_dimension(src_height, scale),
                offset_x: round_half_up((tw - sw * scale) / 2.0) as i64,
                offset_y: round_half_up((th - sh * scale) / 2.0) as i64,
                scale,
            }
        }
        ResizeMode::Pad => {
            let scale = (tw / sw).min(th / sh);
            let w = scaled_dimension(src_width, scale);
            let h = scaled_dimension(src_height, scale);
            ResizePlan {
                canvas_width: target_width,
                canvas_height: target_height,
                draw_width: w,
                draw_height: h,
                offset_x: round_half_up((tw - w as f64) / 2.0) as i64,
                offset_y: round_half_up((th - h as f64) / 2.0) as i64,
                scale,
            }
        }
    };
    Ok(plan)
}

/// Resize `image` into a new canvas according to `request`.
///
/// The canvas is sized by the plan, so `fit` may come out smaller than the
/// target; read the real size from the canvas.
pub fn resize(image: &RasterImage, request: &ResizeRequest) -> Result<Canvas> {
    let (sw, sh) = image.dimensions();
    let plan = plan_resize(
        sw,
        sh,
        request.target_width,
        request.target_height,
        request.mode,
    )?;
    debug!(target: "imagepix::resize", mode = request.mode.as_str(), ?plan, "resize planned");

    let mut canvas = Canvas::new(plan.canvas_width, plan.canvas_height)?;
    if request.mode == ResizeMode::Pad {
        canvas.fill(request.background);
    }
    canvas.draw(
        image,
        SourceRect::full(image),
        DestRect::new(plan.offset_x, plan.offset_y, plan.draw_width, plan.draw_height),
    )?;
    Ok(canvas)
}

/// Fill in a missing side from the aspect ratio; both or neither given keeps them as-is.
pub fn maintain_aspect_ratio(
    width: u32,
    height: u32,
    new_width: Option<u32>,
    new_height: Option<u32>,
) -> (u32, u32) {
    let new_width = new_width.filter(|&w| w > 0);
    let new_height = new_height.filter(|&h| h > 0);
    if width == 0 || height == 0 {
        return (new_width.unwrap_or(width), new_height.unwrap_or(height));
    }
    let aspect = width as f64 / height as f64;
    match (new_width, new_height) {
        (Some(w), None) => (w, round_half_up(w as f64 / aspect) as u32),
        (None, Some(h)) => (round_half_up(h as f64 * aspect) as u32, h),
        (Some(w), Some(h)) => (w, h),
        (None, None) => (width, height),
    }
}

/// Shrink proportionally so neither side exceeds its maximum. Never enlarges.
///
/// Sizes are truncated, matching how a canvas treats fractional dimensions.
pub fn constrain_to_max(
    width: u32,
    height: u32,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (u32, u32) {
    let (mut w, mut h) = (width as f64, height as f64);
    if let Some(max_w) = max_width.filter(|&m| m > 0) {
        if w > max_w as f64 {
            h = h * max_w as f64 / w;
            w = max_w as f64;
        }
    }
    if let Some(max_h) = max_height.filter(|&m| m > 0) {
        if h > max_h as f64 {
            w = w * max_h as f64 / h;
            h = max_h as f64;
        }
    }
    ((w.floor() as u32).max(1), (h.floor() as u32).max(1))
}
