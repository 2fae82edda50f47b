// src/engine/api.rs
//
// ImageTools: the public entry point. One method per tool (convert, compress,
// resize, crop, remove background) plus batch conversion and tool chaining.
// Every call is independent; configuration is explicit in `EngineConfig`.

use crate::engine::asset::{calculate_reduction, download_file_name_with_suffix, format_file_size, EncodedAsset};
use crate::engine::crop::{CropRegion, DisplaySize};
use crate::engine::cutout::{self, ForegroundIsolator};
use crate::engine::decoder::decode_with_limits;
use crate::engine::handoff::{SessionStore, ToolChain};
use crate::engine::io::{NamedSource, Source};
use crate::engine::limits::{LimitConfig, LimitPolicy};
use crate::engine::pipeline::RasterImage;
use crate::engine::quality::{map_quality, CodecParams, QualityDial};
use crate::engine::resize::ResizeRequest;
use crate::engine::tasks::{BatchProgress, BatchResult, BatchTask, EncodeTask, TaskOp};
use crate::error::Result;
use crate::ops::{Color, OutputFormat, QualityScheme, ResizeMode, ToolKind};
use image::ImageFormat;
use tracing::{debug, info};

/// Environment variable holding the limit policy name (`strict`, `lenient`, `off`).
pub const LIMIT_POLICY_ENV: &str = "IMAGEPIX_LIMIT_POLICY";

/// Engine-wide settings. Each tool call reads them; nothing else is global.
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub limits: LimitConfig,
    /// Forces one quality curve for every tool instead of each tool's own
    pub scheme_override: Option<QualityScheme>,
    /// Fill color for `pad` resizes
    pub background: Color,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            limits: LimitConfig::disabled(),
            scheme_override: None,
            background: Color::WHITE,
        }
    }
}

impl EngineConfig {
    /// Defaults, with the limit policy taken from `IMAGEPIX_LIMIT_POLICY` when set.
    pub fn from_env() -> Result<Self> {
        Self::from_policy_value(std::env::var(LIMIT_POLICY_ENV).ok().as_deref())
    }

    fn from_policy_value(raw: Option<&str>) -> Result<Self> {
        let mut config = Self::default();
        if let Some(raw) = raw {
            let policy: LimitPolicy = raw.parse()?;
            config.limits = LimitConfig::apply_policy(policy);
            debug!(target: "imagepix::config", ?policy, "limit policy from environment");
        }
        Ok(config)
    }

    pub fn with_limits(mut self, limits: LimitConfig) -> Self {
        self.limits = limits;
        self
    }

    pub fn with_scheme_override(mut self, scheme: QualityScheme) -> Self {
        self.scheme_override = Some(scheme);
        self
    }

    pub fn with_background(mut self, background: Color) -> Self {
        self.background = background;
        self
    }
}

/// Format conversion settings.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct ConversionRequest {
    pub target_format: OutputFormat,
    pub quality: QualityDial,
    pub max_width: Option<u32>,
    pub max_height: Option<u32>,
    pub scheme: QualityScheme,
}

impl ConversionRequest {
    pub fn new(target_format: OutputFormat, quality: QualityDial) -> Self {
        Self {
            target_format,
            quality,
            max_width: None,
            max_height: None,
            scheme: ToolKind::Convert.quality_scheme(),
        }
    }

    /// The tool's default format and dial.
    pub fn for_tool(tool: ToolKind) -> Self {
        let defaults = tool.defaults();
        Self {
            target_format: defaults.format,
            quality: QualityDial::clamped(defaults.dial as i64),
            max_width: None,
            max_height: None,
            scheme: defaults.scheme,
        }
    }

    pub fn with_max(mut self, max_width: Option<u32>, max_height: Option<u32>) -> Self {
        self.max_width = max_width;
        self.max_height = max_height;
        self
    }

    pub fn with_scheme(mut self, scheme: QualityScheme) -> Self {
        self.scheme = scheme;
        self
    }
}

/// A decoded input plus what the UI shows about the original file.
#[derive(Clone, Debug)]
pub struct LoadedImage {
    pub image: RasterImage,
    pub file_name: String,
    pub format: ImageFormat,
    /// Encoded size of the original in bytes
    pub original_size: u64,
}

impl LoadedImage {
    pub fn dimensions(&self) -> (u32, u32) {
        self.image.dimensions()
    }
}

/// Result of one tool run, ready to preview, download or hand off.
#[derive(Clone, Debug, PartialEq)]
pub struct ToolOutput {
    pub tool: ToolKind,
    pub asset: EncodedAsset,
    /// Suggested download name
    pub file_name: String,
    pub original_size: u64,
}

impl ToolOutput {
    /// Percent saved against the original; negative when the output grew.
    pub fn reduction(&self) -> i64 {
        calculate_reduction(self.original_size, self.asset.size() as u64)
    }

    pub fn size_label(&self) -> String {
        format_file_size(self.asset.size() as u64)
    }

    /// Pass this output on to the next tool.
    pub fn hand_off<S: SessionStore>(&self, chain: &ToolChain<S>) -> Result<()> {
        chain.put_asset(&self.asset, &self.file_name, self.tool)
    }
}

#[derive(Clone, Debug, Default)]
pub struct ImageTools {
    config: EngineConfig,
}

impl ImageTools {
    pub fn new(config: EngineConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Read and decode a named source under the configured limits.
    pub fn load(&self, input: &NamedSource) -> Result<LoadedImage> {
        let bytes = input.source.bytes()?;
        let decoded = decode_with_limits(&bytes, &self.config.limits)?;
        info!(
            target: "imagepix::api",
            file = %input.file_name,
            width = decoded.raster.width(),
            height = decoded.raster.height(),
            size = bytes.len(),
            "image loaded"
        );
        Ok(LoadedImage {
            image: decoded.raster,
            file_name: input.file_name.clone(),
            format: decoded.format,
            original_size: bytes.len() as u64,
        })
    }

    pub fn decode_bytes(&self, bytes: &[u8]) -> Result<RasterImage> {
        decode_with_limits(bytes, &self.config.limits).map(|d| d.raster)
    }

    /// Take the pending handoff record, if any, and load it. Absent or corrupt
    /// records yield `Ok(None)` and the caller falls back to manual upload.
    pub fn load_chained<S: SessionStore>(&self, chain: &ToolChain<S>) -> Result<Option<LoadedImage>> {
        match chain.take() {
            Some(chained) => {
                let input = NamedSource::new(Source::from_bytes(chained.bytes), chained.file_name);
                self.load(&input).map(Some)
            }
            None => Ok(None),
        }
    }

    /// Codec parameters for `dial`, honoring the configured scheme override.
    pub fn params_for(&self, format: OutputFormat, dial: QualityDial, scheme: QualityScheme) -> CodecParams {
        map_quality(format, dial, self.config.scheme_override.unwrap_or(scheme))
    }

    /// Codec parameters for one tool's dial, honoring its PNG policy.
    pub fn tool_params(&self, tool: ToolKind, format: OutputFormat, dial: QualityDial) -> CodecParams {
        if format == OutputFormat::Png && !tool.defaults().png_palette {
            return CodecParams::Lossless;
        }
        self.params_for(format, dial, tool.quality_scheme())
    }

    fn run(&self, tool: ToolKind, loaded: &LoadedImage, op: TaskOp, format: OutputFormat, params: CodecParams) -> Result<ToolOutput> {
        let task = EncodeTask::from_raster(loaded.image.clone(), op, format, params)
            .with_limits(self.config.limits.clone());
        let asset = task.run()?;
        let file_name =
            download_file_name_with_suffix(&loaded.file_name, tool.defaults().file_suffix, asset.format());
        info!(
            target: "imagepix::api",
            tool = tool.slug(),
            file = %file_name,
            width = asset.width(),
            height = asset.height(),
            size = asset.size(),
            "tool finished"
        );
        Ok(ToolOutput {
            tool,
            asset,
            file_name,
            original_size: loaded.original_size,
        })
    }

    /// Re-encode into another format, optionally shrinking to the maxima.
    pub fn convert(&self, loaded: &LoadedImage, request: &ConversionRequest) -> Result<ToolOutput> {
        let params = self.params_for(request.target_format, request.quality, request.scheme);
        self.run(
            ToolKind::Convert,
            loaded,
            TaskOp::Convert {
                max_width: request.max_width,
                max_height: request.max_height,
            },
            request.target_format,
            params,
        )
    }

    /// Same-size re-encode with the compressor's quality curve.
    pub fn compress(&self, loaded: &LoadedImage, format: OutputFormat, dial: QualityDial) -> Result<ToolOutput> {
        let params = self.tool_params(ToolKind::Compress, format, dial);
        self.run(
            ToolKind::Compress,
            loaded,
            TaskOp::Convert {
                max_width: None,
                max_height: None,
            },
            format,
            params,
        )
    }

    /// Resize request with the configured pad background.
    pub fn resize_request(&self, width: u32, height: u32, mode: ResizeMode) -> ResizeRequest {
        ResizeRequest::new(width, height, mode).with_background(self.config.background)
    }

    pub fn resize(
        &self,
        loaded: &LoadedImage,
        request: &ResizeRequest,
        format: OutputFormat,
        dial: QualityDial,
    ) -> Result<ToolOutput> {
        let params = self.tool_params(ToolKind::Resize, format, dial);
        self.run(ToolKind::Resize, loaded, TaskOp::Resize(*request), format, params)
    }

    /// Crop a display-space region; the output is always PNG.
    pub fn crop(
        &self,
        loaded: &LoadedImage,
        region: &CropRegion,
        display: &DisplaySize,
        output: Option<(u32, u32)>,
    ) -> Result<ToolOutput> {
        self.run(
            ToolKind::Crop,
            loaded,
            TaskOp::Crop {
                region: *region,
                display: *display,
                output,
            },
            OutputFormat::Png,
            CodecParams::Lossless,
        )
    }

    pub fn remove_background(
        &self,
        isolator: &dyn ForegroundIsolator,
        loaded: &LoadedImage,
        dial: i64,
    ) -> Result<ToolOutput> {
        let result = cutout::remove_background(isolator, &loaded.image, dial)?;
        let asset = result.encode()?;
        let tool = ToolKind::RemoveBackground;
        Ok(ToolOutput {
            tool,
            file_name: download_file_name_with_suffix(&loaded.file_name, tool.defaults().file_suffix, asset.format()),
            asset,
            original_size: loaded.original_size,
        })
    }

    /// Convert every input with the same settings. Failed inputs are reported
    /// in their `BatchResult` and do not stop the batch.
    pub fn batch_convert<P>(&self, inputs: Vec<NamedSource>, request: &ConversionRequest, progress: P) -> Vec<BatchResult>
    where
        P: Fn(BatchProgress) + Sync,
    {
        let params = self.params_for(request.target_format, request.quality, request.scheme);
        let mut batch = BatchTask::new(inputs, request.target_format, params);
        batch.max_width = request.max_width;
        batch.max_height = request.max_height;
        batch.file_suffix = ToolKind::Convert.defaults().file_suffix.to_string();
        batch.limits = self.config.limits.clone();
        batch.run(progress)
    }
}
