// src/error.rs
//
// Unified error handling for imagepix
// Uses thiserror for simple, type-safe error handling
//
// Error Taxonomy:
// - UserError: Invalid input, recoverable
// - CodecError: Format/encoding issues
// - ResourceLimit: Memory/dimension/size limits
// - InternalBug: Library bugs (should not happen)

use std::borrow::Cow;
use std::fmt;
use thiserror::Error;

/// Error taxonomy used to decide how a failure is reported at the UI boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u32)]
pub enum ErrorCategory {
    /// Invalid input, recoverable by user
    UserError,
    /// Format/encoding issues
    CodecError,
    /// Memory/dimension/size limits
    ResourceLimit,
    /// Library bugs (should not happen)
    InternalBug,
}

impl ErrorCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "UserError",
            ErrorCategory::CodecError => "CodecError",
            ErrorCategory::ResourceLimit => "ResourceLimit",
            ErrorCategory::InternalBug => "InternalBug",
        }
    }

    /// Stable IMAGEPIX_* code for this category
    pub fn code(&self) -> &'static str {
        match self {
            ErrorCategory::UserError => "IMAGEPIX_USER_ERROR",
            ErrorCategory::CodecError => "IMAGEPIX_CODEC_ERROR",
            ErrorCategory::ResourceLimit => "IMAGEPIX_RESOURCE_LIMIT",
            ErrorCategory::InternalBug => "IMAGEPIX_INTERNAL_BUG",
        }
    }
}

/// Which stage of the pipeline an error belongs to.
///
/// `Decode`, `Encode`, `Dimension` and `CropRegion` are the four operation
/// failures a tool reports to the user. `Processing` is reserved for the
/// external foreground isolator, whose internals the engine cannot see.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ErrorKind {
    Decode,
    Encode,
    Dimension,
    CropRegion,
    Processing,
    Raster,
    Io,
    Limit,
    InvalidArgument,
    Handoff,
    Internal,
}

/// Which bound a rejected target dimension violated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DimensionBound {
    Minimum(u32),
    Maximum(u32),
}

impl fmt::Display for DimensionBound {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DimensionBound::Minimum(min) => write!(f, "must be at least {min}px"),
            DimensionBound::Maximum(max) => write!(f, "must not exceed {max}px"),
        }
    }
}

/// imagepix error types
#[derive(Debug, Error)]
pub enum ImagePixError {
    // File I/O Errors
    #[error("File not found: {path}")]
    FileNotFound { path: Cow<'static, str> },

    #[error("Failed to read file '{path}': {source}")]
    FileReadFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to write file '{path}': {source}")]
    FileWriteFailed {
        path: Cow<'static, str>,
        #[source]
        source: std::io::Error,
    },

    // Decode Errors
    #[error("Unsupported image format: {format}")]
    UnsupportedFormat { format: Cow<'static, str> },

    #[error("Failed to decode image: {message}")]
    DecodeFailed { message: Cow<'static, str> },

    #[error("Corrupted image data")]
    CorruptedImage,

    // Safety limits
    #[error("Image dimension {dimension} exceeds maximum {max}")]
    DimensionExceedsLimit { dimension: u32, max: u32 },

    #[error("Image pixel count {pixels} exceeds maximum {max}")]
    PixelCountExceedsLimit { pixels: u64, max: u64 },

    #[error("Input limit exceeded: {reason}")]
    LimitViolation { reason: Cow<'static, str> },

    #[error("Unknown limit policy: '{policy}'. Expected disabled, strict, lenient or custom")]
    InvalidLimitPolicy { policy: Cow<'static, str> },

    // Resize target errors
    #[error("Target {axis} {value}px is out of range: {bound}")]
    DimensionOutOfRange {
        axis: &'static str,
        value: u32,
        bound: DimensionBound,
    },

    // Crop errors
    #[error("Invalid crop region: width={width}, height={height}")]
    InvalidCropRegion { width: f64, height: f64 },

    #[error("Crop region ({x}+{width}, {y}+{height}) exceeds displayed image ({display_width}x{display_height})")]
    CropRegionOutOfBounds {
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        display_width: f64,
        display_height: f64,
    },

    // Raster errors
    #[error("Resize failed ({source_width}x{source_height} -> {target_width}x{target_height}): {message}")]
    ResizeFailed {
        source_width: u32,
        source_height: u32,
        target_width: u32,
        target_height: u32,
        message: Cow<'static, str>,
    },

    // Encode Errors
    #[error("Unsupported output format: {format}")]
    UnsupportedOutputFormat { format: Cow<'static, str> },

    #[error("Failed to encode as {format}: {message}")]
    EncodeFailed {
        format: Cow<'static, str>,
        message: Cow<'static, str>,
    },

    #[error("Invalid {parameter} for {format}: {value}. {reason}")]
    InvalidCodecParameter {
        format: Cow<'static, str>,
        parameter: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Background removal
    #[error("Background removal failed: {message}")]
    ForegroundIsolationFailed { message: Cow<'static, str> },

    // Tool chaining
    #[error("Tool-chain handoff failed: {message}")]
    HandoffFailed { message: Cow<'static, str> },

    // Configuration Errors
    #[error("Invalid value for {name}: {value}. {reason}")]
    InvalidArgument {
        name: Cow<'static, str>,
        value: Cow<'static, str>,
        reason: Cow<'static, str>,
    },

    // Internal Errors
    #[error("Internal error: {message}")]
    InternalPanic { message: Cow<'static, str> },
}

impl Clone for ImagePixError {
    fn clone(&self) -> Self {
        match self {
            Self::FileNotFound { path } => Self::FileNotFound { path: path.clone() },
            Self::FileReadFailed { path, source } => Self::FileReadFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::FileWriteFailed { path, source } => Self::FileWriteFailed {
                path: path.clone(),
                source: std::io::Error::new(source.kind(), source.to_string()),
            },
            Self::UnsupportedFormat { format } => Self::UnsupportedFormat {
                format: format.clone(),
            },
            Self::DecodeFailed { message } => Self::DecodeFailed {
                message: message.clone(),
            },
            Self::CorruptedImage => Self::CorruptedImage,
            Self::DimensionExceedsLimit { dimension, max } => Self::DimensionExceedsLimit {
                dimension: *dimension,
                max: *max,
            },
            Self::PixelCountExceedsLimit { pixels, max } => Self::PixelCountExceedsLimit {
                pixels: *pixels,
                max: *max,
            },
            Self::LimitViolation { reason } => Self::LimitViolation {
                reason: reason.clone(),
            },
            Self::InvalidLimitPolicy { policy } => Self::InvalidLimitPolicy {
                policy: policy.clone(),
            },
            Self::DimensionOutOfRange { axis, value, bound } => Self::DimensionOutOfRange {
                axis,
                value: *value,
                bound: *bound,
            },
            Self::InvalidCropRegion { width, height } => Self::InvalidCropRegion {
                width: *width,
                height: *height,
            },
            Self::CropRegionOutOfBounds {
                x,
                y,
                width,
                height,
                display_width,
                display_height,
            } => Self::CropRegionOutOfBounds {
                x: *x,
                y: *y,
                width: *width,
                height: *height,
                display_width: *display_width,
                display_height: *display_height,
            },
            Self::ResizeFailed {
                source_width,
                source_height,
                target_width,
                target_height,
                message,
            } => Self::ResizeFailed {
                source_width: *source_width,
                source_height: *source_height,
                target_width: *target_width,
                target_height: *target_height,
                message: message.clone(),
            },
            Self::UnsupportedOutputFormat { format } => Self::UnsupportedOutputFormat {
                format: format.clone(),
            },
            Self::EncodeFailed { format, message } => Self::EncodeFailed {
                format: format.clone(),
                message: message.clone(),
            },
            Self::InvalidCodecParameter {
                format,
                parameter,
                value,
                reason,
            } => Self::InvalidCodecParameter {
                format: format.clone(),
                parameter: parameter.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::ForegroundIsolationFailed { message } => Self::ForegroundIsolationFailed {
                message: message.clone(),
            },
            Self::HandoffFailed { message } => Self::HandoffFailed {
                message: message.clone(),
            },
            Self::InvalidArgument {
                name,
                value,
                reason,
            } => Self::InvalidArgument {
                name: name.clone(),
                value: value.clone(),
                reason: reason.clone(),
            },
            Self::InternalPanic { message } => Self::InternalPanic {
                message: message.clone(),
            },
        }
    }
}

// Constructor Helpers
impl ImagePixError {
    pub fn file_not_found(path: impl Into<Cow<'static, str>>) -> Self {
        Self::FileNotFound { path: path.into() }
    }

    pub fn file_read_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileReadFailed {
            path: path.into(),
            source,
        }
    }

    pub fn file_write_failed(path: impl Into<Cow<'static, str>>, source: std::io::Error) -> Self {
        Self::FileWriteFailed {
            path: path.into(),
            source,
        }
    }

    pub fn unsupported_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedFormat {
            format: format.into(),
        }
    }

    pub fn decode_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::DecodeFailed {
            message: message.into(),
        }
    }

    pub fn corrupted_image() -> Self {
        Self::CorruptedImage
    }

    pub fn dimension_exceeds_limit(dimension: u32, max: u32) -> Self {
        Self::DimensionExceedsLimit { dimension, max }
    }

    pub fn pixel_count_exceeds_limit(pixels: u64, max: u64) -> Self {
        Self::PixelCountExceedsLimit { pixels, max }
    }

    pub fn limit_violation(reason: impl Into<Cow<'static, str>>) -> Self {
        Self::LimitViolation {
            reason: reason.into(),
        }
    }

    pub fn invalid_limit_policy(policy: impl Into<Cow<'static, str>>) -> Self {
        Self::InvalidLimitPolicy {
            policy: policy.into(),
        }
    }

    pub fn dimension_out_of_range(axis: &'static str, value: u32, bound: DimensionBound) -> Self {
        Self::DimensionOutOfRange { axis, value, bound }
    }

    pub fn invalid_crop_region(width: f64, height: f64) -> Self {
        Self::InvalidCropRegion { width, height }
    }

    pub fn crop_region_out_of_bounds(
        x: f64,
        y: f64,
        width: f64,
        height: f64,
        display_width: f64,
        display_height: f64,
    ) -> Self {
        Self::CropRegionOutOfBounds {
            x,
            y,
            width,
            height,
            display_width,
            display_height,
        }
    }

    pub fn resize_failed(
        source_dims: (u32, u32),
        target_dims: (u32, u32),
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::ResizeFailed {
            source_width: source_dims.0,
            source_height: source_dims.1,
            target_width: target_dims.0,
            target_height: target_dims.1,
            message: message.into(),
        }
    }

    pub fn unsupported_output_format(format: impl Into<Cow<'static, str>>) -> Self {
        Self::UnsupportedOutputFormat {
            format: format.into(),
        }
    }

    pub fn encode_failed(
        format: impl Into<Cow<'static, str>>,
        message: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::EncodeFailed {
            format: format.into(),
            message: message.into(),
        }
    }

    pub fn invalid_codec_parameter(
        format: impl Into<Cow<'static, str>>,
        parameter: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidCodecParameter {
            format: format.into(),
            parameter: parameter.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn foreground_isolation_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::ForegroundIsolationFailed {
            message: message.into(),
        }
    }

    pub fn handoff_failed(message: impl Into<Cow<'static, str>>) -> Self {
        Self::HandoffFailed {
            message: message.into(),
        }
    }

    pub fn invalid_argument(
        name: impl Into<Cow<'static, str>>,
        value: impl Into<Cow<'static, str>>,
        reason: impl Into<Cow<'static, str>>,
    ) -> Self {
        Self::InvalidArgument {
            name: name.into(),
            value: value.into(),
            reason: reason.into(),
        }
    }

    pub fn internal_panic(message: impl Into<Cow<'static, str>>) -> Self {
        Self::InternalPanic {
            message: message.into(),
        }
    }

    /// Check if this error is recoverable (user can fix it)
    ///
    /// Consistent with category():
    /// - UserError and ResourceLimit errors are recoverable
    /// - CodecError and InternalBug errors are not
    pub fn is_recoverable(&self) -> bool {
        match self.category() {
            ErrorCategory::UserError | ErrorCategory::ResourceLimit => true,
            ErrorCategory::CodecError | ErrorCategory::InternalBug => false,
        }
    }

    /// Get the error category for this error
    pub fn category(&self) -> ErrorCategory {
        match self {
            // UserError: Invalid input, recoverable
            Self::FileNotFound { .. }
            | Self::DimensionOutOfRange { .. }
            | Self::InvalidCropRegion { .. }
            | Self::CropRegionOutOfBounds { .. }
            | Self::InvalidCodecParameter { .. }
            | Self::InvalidLimitPolicy { .. }
            | Self::InvalidArgument { .. }
            | Self::HandoffFailed { .. } => ErrorCategory::UserError,

            // CodecError: Format/encoding issues
            Self::UnsupportedFormat { .. }
            | Self::DecodeFailed { .. }
            | Self::CorruptedImage
            | Self::UnsupportedOutputFormat { .. }
            | Self::EncodeFailed { .. }
            // Isolator failures are opaque processing failures, reported
            // alongside codec issues rather than as engine bugs.
            | Self::ForegroundIsolationFailed { .. }
            | Self::ResizeFailed { .. } => ErrorCategory::CodecError,

            // ResourceLimit: size limits and I/O pressure
            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::LimitViolation { .. }
            | Self::FileReadFailed { .. }
            | Self::FileWriteFailed { .. } => ErrorCategory::ResourceLimit,

            Self::InternalPanic { .. } => ErrorCategory::InternalBug,
        }
    }

    /// Get the pipeline stage this error belongs to
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::UnsupportedFormat { .. } | Self::DecodeFailed { .. } | Self::CorruptedImage => {
                ErrorKind::Decode
            }
            Self::UnsupportedOutputFormat { .. }
            | Self::EncodeFailed { .. }
            | Self::InvalidCodecParameter { .. } => ErrorKind::Encode,
            Self::DimensionOutOfRange { .. } => ErrorKind::Dimension,
            Self::InvalidCropRegion { .. } | Self::CropRegionOutOfBounds { .. } => {
                ErrorKind::CropRegion
            }
            Self::ForegroundIsolationFailed { .. } => ErrorKind::Processing,
            Self::ResizeFailed { .. } => ErrorKind::Raster,
            Self::FileNotFound { .. } | Self::FileReadFailed { .. } | Self::FileWriteFailed { .. } => {
                ErrorKind::Io
            }
            Self::DimensionExceedsLimit { .. }
            | Self::PixelCountExceedsLimit { .. }
            | Self::LimitViolation { .. }
            | Self::InvalidLimitPolicy { .. } => ErrorKind::Limit,
            Self::InvalidArgument { .. } => ErrorKind::InvalidArgument,
            Self::HandoffFailed { .. } => ErrorKind::Handoff,
            Self::InternalPanic { .. } => ErrorKind::Internal,
        }
    }

    /// Short message suitable for a tool's error banner.
    pub fn user_message(&self) -> String {
        match self.kind() {
            ErrorKind::Decode => format!("Could not read this image. {self}"),
            ErrorKind::Encode => format!("Could not export the image. {self}"),
            ErrorKind::Processing => {
                "Background removal failed. Please try a different image.".to_string()
            }
            _ => self.to_string(),
        }
    }
}

// Result type alias
pub type Result<T> = std::result::Result<T, ImagePixError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ImagePixError::file_not_found("/path/to/file.jpg");
        assert!(err.to_string().contains("/path/to/file.jpg"));
    }

    #[test]
    fn test_dimension_error_names_axis_and_bound() {
        let err = ImagePixError::dimension_out_of_range("width", 0, DimensionBound::Minimum(1));
        assert_eq!(
            err.to_string(),
            "Target width 0px is out of range: must be at least 1px"
        );

        let err =
            ImagePixError::dimension_out_of_range("height", 10001, DimensionBound::Maximum(10000));
        assert!(err.to_string().contains("height"));
        assert!(err.to_string().contains("must not exceed 10000px"));
        assert_eq!(err.kind(), ErrorKind::Dimension);
    }

    #[test]
    fn test_error_recoverable() {
        assert!(ImagePixError::file_not_found("test.jpg").is_recoverable());
        assert!(ImagePixError::invalid_crop_region(0.0, 10.0).is_recoverable());
        assert!(ImagePixError::crop_region_out_of_bounds(0.0, 0.0, 20.0, 20.0, 10.0, 10.0)
            .is_recoverable());
        assert!(!ImagePixError::decode_failed("test").is_recoverable());
        assert!(!ImagePixError::internal_panic("test").is_recoverable());
    }

    #[test]
    fn test_kinds_match_operation_failures() {
        assert_eq!(ImagePixError::decode_failed("x").kind(), ErrorKind::Decode);
        assert_eq!(ImagePixError::unsupported_format("svg").kind(), ErrorKind::Decode);
        assert_eq!(ImagePixError::corrupted_image().kind(), ErrorKind::Decode);
        assert_eq!(ImagePixError::encode_failed("png", "x").kind(), ErrorKind::Encode);
        assert_eq!(
            ImagePixError::unsupported_output_format("tiff").kind(),
            ErrorKind::Encode
        );
        assert_eq!(
            ImagePixError::invalid_codec_parameter("jpeg", "quality", "1.5", "x").kind(),
            ErrorKind::Encode
        );
        assert_eq!(
            ImagePixError::invalid_crop_region(0.0, 0.0).kind(),
            ErrorKind::CropRegion
        );
        assert_eq!(
            ImagePixError::foreground_isolation_failed("model").kind(),
            ErrorKind::Processing
        );
    }

    #[test]
    fn test_error_category_user_error() {
        assert_eq!(
            ImagePixError::file_not_found("test.jpg").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            ImagePixError::dimension_out_of_range("width", 0, DimensionBound::Minimum(1))
                .category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            ImagePixError::invalid_argument("dial", "11", "out of range").category(),
            ErrorCategory::UserError
        );
        assert_eq!(
            ImagePixError::handoff_failed("corrupt").category(),
            ErrorCategory::UserError
        );
    }

    #[test]
    fn test_error_category_codec_and_limits() {
        assert_eq!(
            ImagePixError::encode_failed("jpeg", "test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            ImagePixError::resize_failed((100, 100), (50, 50), "test").category(),
            ErrorCategory::CodecError
        );
        assert_eq!(
            ImagePixError::dimension_exceeds_limit(40000, 32768).category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            ImagePixError::file_write_failed(
                "out.png",
                std::io::Error::from(std::io::ErrorKind::PermissionDenied)
            )
            .category(),
            ErrorCategory::ResourceLimit
        );
        assert_eq!(
            ImagePixError::internal_panic("test").category(),
            ErrorCategory::InternalBug
        );
    }

    #[test]
    fn test_clone_preserves_io_kind() {
        let err = ImagePixError::file_read_failed(
            "a.png",
            std::io::Error::from(std::io::ErrorKind::NotFound),
        );
        match err.clone() {
            ImagePixError::FileReadFailed { source, .. } => {
                assert_eq!(source.kind(), std::io::ErrorKind::NotFound)
            }
            other => panic!("unexpected clone: {other:?}"),
        }
    }

    #[test]
    fn test_category_codes() {
        assert_eq!(ErrorCategory::UserError.code(), "IMAGEPIX_USER_ERROR");
        assert_eq!(ErrorCategory::InternalBug.as_str(), "InternalBug");
    }

    #[test]
    fn test_processing_failure_has_generic_user_message() {
        let err = ImagePixError::foreground_isolation_failed("onnx session crashed");
        assert!(!err.user_message().contains("onnx"));
    }
}
