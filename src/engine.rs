// src/engine.rs
//
// The imagepix engine. Every tool runs the same three steps:
// 1. Decode the input into an immutable raster
// 2. Draw (part of) it into a fresh canvas: redraw, resize, crop
// 3. Encode the canvas with the format's quality curve
//
// This file is a facade over the modules in engine/.

// =============================================================================
// SECURITY LIMITS
// =============================================================================

/// Maximum allowed image dimension (width or height).
/// Images larger than 32768x32768 are rejected to prevent decompression bombs.
pub const MAX_DIMENSION: u32 = 32768;

/// Maximum allowed total pixels (width * height).
/// 100 megapixels = 400MB uncompressed RGBA.
pub const MAX_PIXELS: u64 = 100_000_000;

// =============================================================================
// MODULE DECOMPOSITION
// =============================================================================

pub mod api;
pub mod asset;
pub mod common;
pub mod crop;
pub mod cutout;
pub mod decoder;
pub mod encoder;
pub mod handoff;
pub mod io;
pub mod limits;
pub mod pipeline;
pub mod pool;
pub mod quality;
pub mod resize;
pub mod session;
pub mod tasks;

pub use api::{ConversionRequest, EngineConfig, ImageTools, LoadedImage, ToolOutput};
pub use asset::{
    calculate_reduction, download_file_name, download_file_name_with_suffix, format_file_size,
    save_asset, EncodedAsset, PreviewHandle, PreviewRegistry,
};
pub use common::run_with_panic_policy;
pub use crop::{centered_region, crop, CropRegion, DisplaySize};
pub use cutout::{
    apply_threshold, remove_background, threshold_for_intensity, CutoutResult, ForegroundIsolator,
};
pub use decoder::{check_dimensions, decode, decode_image, decode_with_limits, DecodedImage};
pub use encoder::{encode, encode_raster, QualitySettings};
pub use handoff::{ChainedImage, HandoffRecord, MemorySessionStore, SessionStore, ToolChain};
pub use io::{NamedSource, Source};
pub use limits::{LimitConfig, LimitPolicy};
pub use pipeline::{draw, fill, Canvas, DestRect, RasterImage, SourceRect};
pub use pool::get_pool;
pub use quality::{map_quality, CodecParams, QualityDial};
pub use resize::{
    constrain_to_max, maintain_aspect_ratio, plan_resize, resize, validate_target, ResizePlan,
    ResizeRequest,
};
pub use session::{Completion, DisplayedPreview, PendingPreview, PreviewSession, RequestTicket};
pub use tasks::{BatchProgress, BatchResult, BatchTask, EncodeTask, ProcessingMetrics, TaskOp};

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ops::{OutputFormat, QualityScheme, ResizeMode};
    use image::{Rgba, RgbaImage};

    fn gradient(width: u32, height: u32) -> RasterImage {
        RasterImage::from_rgba(RgbaImage::from_fn(width, height, |x, y| {
            Rgba([(x % 256) as u8, (y % 256) as u8, 128, 255])
        }))
    }

    mod security_tests {
        use super::*;

        #[test]
        fn test_check_dimensions_valid() {
            assert!(check_dimensions(1920, 1080).is_ok());
            // Passes the per-side cap but not the pixel cap
            let result = check_dimensions(32768, 32768);
            assert!(result.unwrap_err().to_string().contains("pixel count"));
        }

        #[test]
        fn test_check_dimensions_exceeds_max_dimension() {
            for (w, h) in [(32769, 1), (1, 32769)] {
                let result = check_dimensions(w, h);
                assert!(result.unwrap_err().to_string().contains("exceeds maximum"));
            }
        }

        #[test]
        fn test_check_dimensions_at_pixel_boundary() {
            assert!(check_dimensions(10000, 10000).is_ok());
            assert!(check_dimensions(10001, 10000).is_err());
        }
    }

    mod pipeline_tests {
        use super::*;

        #[test]
        fn decode_draw_encode_round_trip() {
            let asset = encode_raster(&gradient(64, 48), OutputFormat::Png, CodecParams::Lossless).unwrap();
            let decoded = decode(asset.bytes()).unwrap();
            assert_eq!(decoded.dimensions(), (64, 48));
            assert_eq!(decoded.pixel(10, 20), [10, 20, 128, 255]);
        }

        #[test]
        fn every_output_format_encodes_a_resized_canvas() {
            let canvas = resize(&gradient(90, 60), &ResizeRequest::new(30, 30, ResizeMode::Fill)).unwrap();
            for format in OutputFormat::ALL {
                let params = map_quality(format, QualityDial::clamped(6), QualityScheme::Segmented);
                let asset = encode(&canvas, format, params).unwrap();
                assert_eq!(asset.format(), format);
                assert_eq!(asset.dimensions(), (30, 30));
                assert!(asset.size() > 0, "{format} produced no bytes");
            }
        }

        #[test]
        fn jpeg_quality_dial_changes_size() {
            let noisy = RasterImage::from_rgba(RgbaImage::from_fn(128, 128, |x, y| {
                let v = ((x * 31) ^ (y * 17)) as u8;
                Rgba([v, v.wrapping_mul(3), v.wrapping_add(90), 255])
            }));
            let low = map_quality(OutputFormat::Jpeg, QualityDial::clamped(1), QualityScheme::Tenths);
            let high = map_quality(OutputFormat::Jpeg, QualityDial::clamped(10), QualityScheme::Tenths);
            let small = encode_raster(&noisy, OutputFormat::Jpeg, low).unwrap();
            let large = encode_raster(&noisy, OutputFormat::Jpeg, high).unwrap();
            assert!(small.size() < large.size());
        }

        #[test]
        fn crop_then_chain_into_convert() {
            let tools = ImageTools::default();
            let chain = ToolChain::new(MemorySessionStore::new());
            let source = NamedSource::new(
                Source::from_bytes(
                    encode_raster(&gradient(40, 40), OutputFormat::Png, CodecParams::Lossless)
                        .unwrap()
                        .bytes()
                        .to_vec(),
                ),
                "grid.png",
            );
            let loaded = tools.load(&source).unwrap();
            let region = centered_region(&DisplaySize::natural(&loaded.image), crate::ops::AspectRatio::Widescreen);
            tools
                .crop(&loaded, &region, &DisplaySize::natural(&loaded.image), None)
                .unwrap()
                .hand_off(&chain)
                .unwrap();

            let chained = tools.load_chained(&chain).unwrap().unwrap();
            assert_eq!(chained.dimensions(), (40, 23));
            let converted = tools
                .convert(&chained, &ConversionRequest::new(OutputFormat::Jpeg, QualityDial::default()))
                .unwrap();
            assert_eq!(converted.file_name, "grid-cropped.jpg");
        }

        #[test]
        fn dimension_errors_name_axis_and_bound() {
            let err = validate_target(10_001, 5).unwrap_err();
            assert_eq!(err.kind(), ErrorKind::Dimension);
            let msg = err.to_string();
            assert!(msg.contains("width") && msg.contains("10000"), "{msg}");
        }
    }
}
