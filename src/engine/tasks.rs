// src/engine/tasks.rs
//
// Units of work: one decode -> draw -> encode task, and a batch of
// conversions fanned out over the shared pool. Both run under the panic
// policy so a codec panic fails only its own input.

use crate::engine::asset::{download_file_name_with_suffix, EncodedAsset};
use crate::engine::common::run_with_panic_policy;
use crate::engine::crop::{crop_to_canvas, CropRegion, DisplaySize};
use crate::engine::decoder::{check_dimensions, decode_with_limits, detect_format};
use crate::engine::encoder::{encode, MAX_ICO_DIMENSION};
use crate::engine::io::{NamedSource, Source};
use crate::engine::limits::LimitConfig;
use crate::engine::pipeline::{Canvas, DestRect, RasterImage, SourceRect};
use crate::engine::pool;
use crate::engine::quality::CodecParams;
use crate::engine::resize::{constrain_to_max, resize, ResizeRequest};
use crate::error::{ImagePixError, Result};
use crate::ops::OutputFormat;
use rayon::prelude::*;
use serde::Serialize;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Instant;
use tracing::{debug, info, warn};

/// Stage timings and sizes of one task.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct ProcessingMetrics {
    pub decode_ms: f64,
    pub process_ms: f64,
    pub encode_ms: f64,
    pub total_ms: f64,
    pub bytes_in: u64,
    pub bytes_out: u64,
    /// `bytes_out / bytes_in`, 0 when there was no encoded input
    pub compression_ratio: f64,
    pub input_format: Option<String>,
    pub output_format: String,
    pub width: u32,
    pub height: u32,
}

struct MetricsRecorder<'m> {
    metrics: Option<&'m mut ProcessingMetrics>,
    start_total: Instant,
    stage_start: Instant,
}

impl<'m> MetricsRecorder<'m> {
    fn new(metrics: Option<&'m mut ProcessingMetrics>) -> Self {
        let now = Instant::now();
        Self {
            metrics,
            start_total: now,
            stage_start: now,
        }
    }

    fn lap(&mut self) -> f64 {
        let ms = self.stage_start.elapsed().as_secs_f64() * 1000.0;
        self.stage_start = Instant::now();
        ms
    }

    fn mark_decode_done(&mut self) {
        let ms = self.lap();
        if let Some(m) = self.metrics.as_deref_mut() {
            m.decode_ms = ms;
        }
    }

    fn mark_process_done(&mut self) {
        let ms = self.lap();
        if let Some(m) = self.metrics.as_deref_mut() {
            m.process_ms = ms;
        }
    }

    fn finalize(&mut self, input_len: u64, input_format: Option<String>, output: &EncodedAsset) {
        let encode_ms = self.lap();
        let total_ms = self.start_total.elapsed().as_secs_f64() * 1000.0;
        if let Some(m) = self.metrics.as_deref_mut() {
            m.encode_ms = encode_ms;
            m.total_ms = total_ms;
            m.bytes_in = input_len;
            m.bytes_out = output.size() as u64;
            m.compression_ratio = if input_len > 0 {
                m.bytes_out as f64 / input_len as f64
            } else {
                0.0
            };
            m.input_format = input_format;
            m.output_format = output.format().extension().to_string();
            m.width = output.width();
            m.height = output.height();
        }
    }
}

/// The geometry step between decode and encode.
#[derive(Clone, Copy, Debug, PartialEq)]
pub enum TaskOp {
    /// Redraw at source size, shrunk proportionally to fit the optional maxima.
    Convert {
        max_width: Option<u32>,
        max_height: Option<u32>,
    },
    Resize(ResizeRequest),
    /// Always encodes as lossless PNG, whatever the task's format.
    Crop {
        region: CropRegion,
        display: DisplaySize,
        output: Option<(u32, u32)>,
    },
}

/// Maxima for a conversion, tightened for formats with a hard size cap.
pub fn effective_max(
    format: OutputFormat,
    max_width: Option<u32>,
    max_height: Option<u32>,
) -> (Option<u32>, Option<u32>) {
    if format != OutputFormat::Ico {
        return (max_width, max_height);
    }
    let cap = |m: Option<u32>| Some(m.map_or(MAX_ICO_DIMENSION, |v| v.min(MAX_ICO_DIMENSION)));
    (cap(max_width), cap(max_height))
}

/// Draw `image` at its own size, or shrunk into the maxima.
pub fn redraw(image: &RasterImage, max_width: Option<u32>, max_height: Option<u32>) -> Result<Canvas> {
    let (w, h) = constrain_to_max(image.width(), image.height(), max_width, max_height);
    let mut canvas = Canvas::new(w, h)?;
    canvas.draw(image, SourceRect::full(image), DestRect::new(0, 0, w, h))?;
    Ok(canvas)
}

pub struct EncodeTask {
    pub source: Option<Source>,
    /// Already decoded input; takes precedence over `source`
    pub decoded: Option<RasterImage>,
    pub op: TaskOp,
    pub format: OutputFormat,
    pub params: CodecParams,
    pub limits: LimitConfig,
}

impl EncodeTask {
    pub fn from_source(source: Source, op: TaskOp, format: OutputFormat, params: CodecParams) -> Self {
        Self {
            source: Some(source),
            decoded: None,
            op,
            format,
            params,
            limits: LimitConfig::default(),
        }
    }

    pub fn from_raster(image: RasterImage, op: TaskOp, format: OutputFormat, params: CodecParams) -> Self {
        Self {
            source: None,
            decoded: Some(image),
            op,
            format,
            params,
            limits: LimitConfig::default(),
        }
    }

    pub fn with_limits(mut self, limits: LimitConfig) -> Self {
        self.limits = limits;
        self
    }

    /// Format and parameters actually used for the output.
    pub fn output(&self) -> (OutputFormat, CodecParams) {
        match self.op {
            TaskOp::Crop { .. } => (OutputFormat::Png, CodecParams::Lossless),
            _ => (self.format, self.params),
        }
    }

    pub(crate) fn decode_internal(&self) -> Result<(RasterImage, u64, Option<String>)> {
        if let Some(image) = &self.decoded {
            let (w, h) = image.dimensions();
            check_dimensions(w, h)?;
            self.limits.enforce_pixels(w, h)?;
            return Ok((image.clone(), 0, None));
        }
        let source = self.source.as_ref().ok_or_else(|| {
            ImagePixError::invalid_argument("source", "none", "task has neither bytes nor a decoded image")
        })?;
        let bytes = source.bytes()?;
        let input_format = detect_format(&bytes).map(|f| f.mime().to_string());
        let decoded = decode_with_limits(&bytes, &self.limits)?;
        Ok((decoded.raster, bytes.len() as u64, input_format))
    }

    fn process(&self, image: &RasterImage) -> Result<Canvas> {
        match &self.op {
            TaskOp::Convert {
                max_width,
                max_height,
            } => {
                let (max_w, max_h) = effective_max(self.format, *max_width, *max_height);
                redraw(image, max_w, max_h)
            }
            TaskOp::Resize(request) => resize(image, request),
            TaskOp::Crop {
                region,
                display,
                output,
            } => crop_to_canvas(image, region, display, *output),
        }
    }

    /// decode -> geometry -> encode
    pub fn process_and_encode(&self, metrics: Option<&mut ProcessingMetrics>) -> Result<EncodedAsset> {
        let mut recorder = MetricsRecorder::new(metrics);

        let (image, input_len, input_format) = self.decode_internal()?;
        recorder.mark_decode_done();

        let canvas = self.process(&image)?;
        recorder.mark_process_done();

        let (format, params) = self.output();
        let asset = encode(&canvas, format, params)?;
        recorder.finalize(input_len, input_format, &asset);
        Ok(asset)
    }

    /// `process_and_encode` with panics turned into errors.
    pub fn run(&self) -> Result<EncodedAsset> {
        run_with_panic_policy("task:encode", || self.process_and_encode(None))
    }

    pub fn run_with_metrics(&self) -> Result<(EncodedAsset, ProcessingMetrics)> {
        run_with_panic_policy("task:encode", || {
            let mut metrics = ProcessingMetrics::default();
            let asset = self.process_and_encode(Some(&mut metrics))?;
            Ok((asset, metrics))
        })
    }
}

/// Outcome for one input of a batch.
#[derive(Clone, Debug)]
pub struct BatchResult {
    pub source: String,
    /// Suggested download name for the output
    pub file_name: String,
    pub outcome: Result<EncodedAsset>,
}

impl BatchResult {
    pub fn is_success(&self) -> bool {
        self.outcome.is_ok()
    }

    pub fn asset(&self) -> Option<&EncodedAsset> {
        self.outcome.as_ref().ok()
    }

    pub fn error(&self) -> Option<&ImagePixError> {
        self.outcome.as_ref().err()
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct BatchProgress {
    /// Inputs finished so far, successful or not
    pub completed: usize,
    pub total: usize,
}

/// Convert many inputs with the same settings.
pub struct BatchTask {
    pub inputs: Vec<NamedSource>,
    pub format: OutputFormat,
    pub params: CodecParams,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub file_suffix: String,
    pub limits: LimitConfig,
}

impl BatchTask {
    pub fn new(inputs: Vec<NamedSource>, format: OutputFormat, params: CodecParams) -> Self {
        Self {
            inputs,
            format,
            params,
            max_width: None,
            max_height: None,
            file_suffix: String::new(),
            limits: LimitConfig::default(),
        }
    }

    /// Run every input on the shared pool. Failures are reported per input and
    /// never stop the rest. Results keep input order.
    pub fn run<P>(&self, progress: P) -> Vec<BatchResult>
    where
        P: Fn(BatchProgress) + Sync,
    {
        let total = self.inputs.len();
        let completed = AtomicUsize::new(0);
        let started = Instant::now();

        let process_one = |input: &NamedSource| -> BatchResult {
            let task = EncodeTask {
                source: Some(input.source.clone()),
                decoded: None,
                op: TaskOp::Convert {
                    max_width: self.max_width,
                    max_height: self.max_height,
                },
                format: self.format,
                params: self.params,
                limits: self.limits.clone(),
            };
            let outcome = task.run();
            if let Err(err) = &outcome {
                warn!(
                    target: "imagepix::batch",
                    file = %input.file_name,
                    error = %err,
                    "conversion failed, continuing with remaining files"
                );
            }
            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
            progress(BatchProgress {
                completed: done,
                total,
            });
            BatchResult {
                source: input.file_name.clone(),
                file_name: download_file_name_with_suffix(&input.file_name, &self.file_suffix, self.format),
                outcome,
            }
        };

        let results: Vec<BatchResult> = pool::install(|| self.inputs.par_iter().map(process_one).collect());

        let succeeded = results.iter().filter(|r| r.is_success()).count();
        info!(
            target: "imagepix::batch",
            total,
            succeeded,
            failed = total - succeeded,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "batch finished"
        );
        debug!(target: "imagepix::batch", format = %self.format, params = ?self.params, "batch settings");
        results
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ErrorKind;
    use crate::ops::ResizeMode;
    use image::{ImageFormat, Rgba, RgbaImage};
    use std::sync::Mutex;

    fn png_bytes(w: u32, h: u32) -> Vec<u8> {
        let img = RgbaImage::from_pixel(w, h, Rgba([10, 20, 30, 255]));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), ImageFormat::Png)
            .unwrap();
        bytes
    }

    #[test]
    fn convert_task_collects_metrics() {
        let bytes = png_bytes(8, 6);
        let task = EncodeTask::from_source(
            Source::from_bytes(bytes.clone()),
            TaskOp::Convert {
                max_width: None,
                max_height: None,
            },
            OutputFormat::Jpeg,
            CodecParams::Lossy { quality: 0.8 },
        );
        let (asset, metrics) = task.run_with_metrics().unwrap();
        assert_eq!(asset.dimensions(), (8, 6));
        assert_eq!(asset.format(), OutputFormat::Jpeg);
        assert_eq!(metrics.bytes_in, bytes.len() as u64);
        assert_eq!(metrics.bytes_out, asset.size() as u64);
        assert_eq!(metrics.input_format.as_deref(), Some("image/png"));
        assert_eq!(metrics.output_format, "jpg");
        assert!(metrics.total_ms >= metrics.encode_ms);
    }

    #[test]
    fn convert_respects_maxima_and_icon_cap() {
        let img = RasterImage::from_rgba(RgbaImage::from_pixel(1000, 500, Rgba([1, 1, 1, 255])));
        let task = EncodeTask::from_raster(
            img.clone(),
            TaskOp::Convert {
                max_width: Some(100),
                max_height: None,
            },
            OutputFormat::Png,
            CodecParams::Lossless,
        );
        assert_eq!(task.run().unwrap().dimensions(), (100, 50));

        let icon = EncodeTask::from_raster(
            img,
            TaskOp::Convert {
                max_width: None,
                max_height: None,
            },
            OutputFormat::Ico,
            CodecParams::Ignored,
        );
        assert_eq!(icon.run().unwrap().dimensions(), (256, 128));
    }

    #[test]
    fn crop_task_forces_png() {
        let img = RasterImage::from_rgba(RgbaImage::from_pixel(20, 20, Rgba([5, 5, 5, 255])));
        let task = EncodeTask::from_raster(
            img,
            TaskOp::Crop {
                region: CropRegion::new(0.0, 0.0, 10.0, 10.0),
                display: DisplaySize::new(20.0, 20.0),
                output: None,
            },
            OutputFormat::Jpeg,
            CodecParams::Lossy { quality: 0.5 },
        );
        let asset = task.run().unwrap();
        assert_eq!(asset.format(), OutputFormat::Png);
        assert_eq!(asset.dimensions(), (10, 10));
    }

    #[test]
    fn resize_task_and_missing_input() {
        let task = EncodeTask::from_source(
            Source::from_bytes(png_bytes(40, 20)),
            TaskOp::Resize(ResizeRequest::new(10, 10, ResizeMode::Fit)),
            OutputFormat::WebP,
            CodecParams::Lossy { quality: 0.9 },
        );
        assert_eq!(task.run().unwrap().dimensions(), (10, 5));

        let empty = EncodeTask {
            source: None,
            decoded: None,
            op: TaskOp::Convert {
                max_width: None,
                max_height: None,
            },
            format: OutputFormat::Png,
            params: CodecParams::Lossless,
            limits: LimitConfig::default(),
        };
        assert_eq!(empty.run().unwrap_err().kind(), ErrorKind::InvalidArgument);
    }

    #[test]
    fn limits_apply_to_task_input() {
        let task = EncodeTask::from_source(
            Source::from_bytes(png_bytes(100, 100)),
            TaskOp::Convert {
                max_width: None,
                max_height: None,
            },
            OutputFormat::Png,
            CodecParams::Lossless,
        )
        .with_limits(LimitConfig::custom(None, Some(5_000)));
        assert_eq!(task.run().unwrap_err().kind(), ErrorKind::Limit);
    }

    #[test]
    fn batch_skips_failures_and_reports_progress() {
        let inputs = vec![
            NamedSource::new(Source::from_bytes(png_bytes(4, 4)), "a.png"),
            NamedSource::new(Source::from_bytes(b"not an image".to_vec()), "broken.png"),
            NamedSource::new(Source::from_bytes(png_bytes(6, 2)), "c.bmp"),
        ];
        let mut batch = BatchTask::new(inputs, OutputFormat::WebP, CodecParams::Lossy { quality: 0.7 });
        batch.file_suffix = "-converted".to_string();

        let seen = Mutex::new(Vec::new());
        let results = batch.run(|p| seen.lock().unwrap().push(p));

        assert_eq!(results.len(), 3);
        assert!(results[0].is_success());
        assert_eq!(results[1].error().unwrap().kind(), ErrorKind::Decode);
        assert_eq!(results[2].asset().unwrap().dimensions(), (6, 2));
        assert_eq!(results[2].file_name, "c-converted.webp");

        let mut seen = seen.into_inner().unwrap();
        seen.sort_by_key(|p| p.completed);
        assert_eq!(
            seen.iter().map(|p| p.completed).collect::<Vec<_>>(),
            vec![1, 2, 3]
        );
        assert!(seen.iter().all(|p| p.total == 3));
    }
}
