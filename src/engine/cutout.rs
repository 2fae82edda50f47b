// src/engine/cutout.rs
//
// Background removal post-processing. Foreground isolation itself is an
// external capability behind `ForegroundIsolator`; this module only turns
// its soft alpha matte into a hard cutout.

use crate::engine::asset::EncodedAsset;
use crate::engine::common::run_with_panic_policy;
use crate::engine::encoder::encode_raster;
use crate::engine::pipeline::RasterImage;
use crate::engine::quality::CodecParams;
use crate::error::{ImagePixError, Result};
use crate::ops::OutputFormat;
use std::time::Instant;
use tracing::{debug, warn};

/// Boxed error returned by isolator implementations.
pub type IsolatorError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Produces an image whose alpha channel separates foreground from background.
///
/// Implementations are opaque to the engine (a segmentation model, a remote
/// service, a test double). Output must have the input's dimensions.
pub trait ForegroundIsolator: Send + Sync {
    fn isolate_foreground(&self, image: &RasterImage) -> std::result::Result<RasterImage, IsolatorError>;
}

impl<F> ForegroundIsolator for F
where
    F: Fn(&RasterImage) -> std::result::Result<RasterImage, IsolatorError> + Send + Sync,
{
    fn isolate_foreground(&self, image: &RasterImage) -> std::result::Result<RasterImage, IsolatorError> {
        self(image)
    }
}

#[derive(Clone, Debug)]
pub struct CutoutResult {
    pub image: RasterImage,
    /// Alpha values below this became 0, the rest 255
    pub threshold: u8,
}

impl CutoutResult {
    /// Cutouts are always delivered as PNG to keep the transparency.
    pub fn encode(&self) -> Result<EncodedAsset> {
        encode_raster(&self.image, OutputFormat::Png, CodecParams::Lossless)
    }
}

/// `round(((clamp(dial, 1, 10) - 1) / 9) * 80 + 10)`: dial 1 -> 10, dial 10 -> 90.
pub fn threshold_for_intensity(dial: i64) -> u8 {
    let d = dial.clamp(1, 10) as f64;
    ((d - 1.0) / 9.0 * 80.0 + 10.0).round() as u8
}

/// Binarize alpha against the threshold for `dial`. RGB is left untouched.
pub fn apply_threshold(image: &RasterImage, dial: i64) -> CutoutResult {
    let threshold = threshold_for_intensity(dial);
    let mut pixels = image.as_rgba().clone();
    for px in pixels.pixels_mut() {
        px.0[3] = if px.0[3] < threshold { 0 } else { 255 };
    }
    CutoutResult {
        image: RasterImage::from_rgba(pixels),
        threshold,
    }
}

/// Isolate the foreground of `image`, then apply the hard threshold.
pub fn remove_background(
    isolator: &dyn ForegroundIsolator,
    image: &RasterImage,
    dial: i64,
) -> Result<CutoutResult> {
    let started = Instant::now();
    let isolated = run_with_panic_policy("cutout:isolate", || {
        isolator.isolate_foreground(image).map_err(|e| {
            warn!(target: "imagepix::cutout", error = %e, "foreground isolation failed");
            ImagePixError::foreground_isolation_failed(e.to_string())
        })
    })
    .map_err(|e| match e {
        ImagePixError::InternalPanic { message } => ImagePixError::foreground_isolation_failed(message),
        other => other,
    })?;

    if isolated.dimensions() != image.dimensions() {
        let (w, h) = isolated.dimensions();
        return Err(ImagePixError::foreground_isolation_failed(format!(
            "isolator returned {w}x{h} for a {}x{} input",
            image.width(),
            image.height()
        )));
    }

    let result = apply_threshold(&isolated, dial);
    debug!(
        target: "imagepix::cutout",
        threshold = result.threshold,
        elapsed_ms = started.elapsed().as_millis() as u64,
        "background removed"
    );
    Ok(result)
}
