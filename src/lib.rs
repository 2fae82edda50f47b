// lib.rs
//
// imagepix: the engine behind a set of image tools
//
// - Convert between PNG, JPEG, WebP, GIF, BMP and ICO
// - Compress with per-tool quality curves
// - Resize (stretch / fit / fill / pad) and crop
// - Hard-alpha cutouts on top of an external foreground isolator
// - Hand results from one tool to the next

// Not supported on Windows/MSVC
#[cfg(all(feature = "jemalloc", not(target_env = "msvc")))]
#[global_allocator]
static ALLOC: tikv_jemallocator::Jemalloc = tikv_jemallocator::Jemalloc;

pub mod engine;
pub mod error;
pub mod ops;

use image::ImageReader;
use std::io::{BufRead, BufReader, Cursor, Seek};

pub use engine::{
    ConversionRequest, EncodedAsset, EngineConfig, ImageTools, LoadedImage, NamedSource,
    PreviewSession, RasterImage, Source, ToolChain, ToolOutput,
};
pub use error::{ErrorCategory, ErrorKind, ImagePixError, Result};
pub use ops::{AspectRatio, Color, OutputFormat, QualityScheme, ResizeMode, ToolKind};

/// Header facts read without decoding pixels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InspectMetadata {
    pub width: u32,
    pub height: u32,
    pub format: Option<String>,
}

fn read_inspect_metadata<R: BufRead + Seek>(reader: R) -> Result<InspectMetadata> {
    let reader = ImageReader::new(reader)
        .with_guessed_format()
        .map_err(|e| ImagePixError::decode_failed(format!("failed to read image header: {e}")))?;

    let format = reader.format().map(|f| format!("{:?}", f).to_lowercase());
    let (width, height) = reader
        .into_dimensions()
        .map_err(|e| ImagePixError::decode_failed(format!("failed to read dimensions: {e}")))?;

    Ok(InspectMetadata {
        width,
        height,
        format,
    })
}

/// Read dimensions and format from the header only.
pub fn inspect_header_from_bytes(data: &[u8]) -> Result<InspectMetadata> {
    read_inspect_metadata(Cursor::new(data))
}

pub fn inspect_header_from_path(path: &str) -> Result<InspectMetadata> {
    use std::fs::File;

    let file = File::open(path).map_err(|e| {
        if e.kind() == std::io::ErrorKind::NotFound {
            ImagePixError::file_not_found(path.to_string())
        } else {
            ImagePixError::file_read_failed(path.to_string(), e)
        }
    })?;
    read_inspect_metadata(BufReader::new(file))
}

/// Get library version
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// MIME types accepted as input. SVG is recognised but not rasterized.
pub fn supported_input_formats() -> Vec<String> {
    ops::SUPPORTED_INPUT_MIME_TYPES
        .iter()
        .map(|s| s.to_string())
        .collect()
}

/// Output formats by extension
pub fn supported_output_formats() -> Vec<String> {
    OutputFormat::ALL
        .iter()
        .map(|f| f.extension().to_string())
        .collect()
}
