// src/engine/io.rs
//
// I/O operations: Source enum and file loading.
// Sources carry the user's original file name so downloads and handoff
// records can be named after it.

use crate::error::{ImagePixError, Result};
use memmap2::Mmap;
use std::borrow::Cow;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Image source - supports in-memory data, memory-mapped files, and file paths (lazy loading)
#[derive(Clone, Debug)]
pub enum Source {
    /// In-memory image data (uploads, handoff blobs)
    Memory(Arc<Vec<u8>>),
    /// Memory-mapped file (zero-copy access)
    Mapped(Arc<Mmap>),
    /// File path for lazy loading (data is read only when needed)
    Path(PathBuf),
}

impl Source {
    pub fn from_bytes(bytes: impl Into<Vec<u8>>) -> Self {
        Source::Memory(Arc::new(bytes.into()))
    }

    /// Map a file into memory.
    pub fn map_file(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let display = path.to_string_lossy().to_string();
        if !path.exists() {
            return Err(ImagePixError::file_not_found(display));
        }
        let file =
            File::open(path).map_err(|e| ImagePixError::file_read_failed(display.clone(), e))?;

        // Safety: the file is treated as read-only input for the duration of
        // one operation. Concurrent external truncation is not supported.
        let mmap = unsafe { Mmap::map(&file) }
            .map_err(|e| ImagePixError::file_read_failed(display.clone(), e))?;
        debug!(target: "imagepix::io", path = %path.display(), len = mmap.len(), "mapped source file");
        Ok(Source::Mapped(Arc::new(mmap)))
    }

    /// Borrow the bytes, reading Path sources from disk.
    pub fn bytes(&self) -> Result<Cow<'_, [u8]>> {
        match self {
            Source::Memory(data) => Ok(Cow::Borrowed(data.as_slice())),
            Source::Mapped(mmap) => Ok(Cow::Borrowed(mmap.as_ref())),
            Source::Path(path) => {
                let data = std::fs::read(path).map_err(|e| {
                    let display = path.to_string_lossy().to_string();
                    if e.kind() == std::io::ErrorKind::NotFound {
                        ImagePixError::file_not_found(display)
                    } else {
                        ImagePixError::file_read_failed(display, e)
                    }
                })?;
                Ok(Cow::Owned(data))
            }
        }
    }

    /// Get path if this is a Path source
    pub fn as_path(&self) -> Option<&Path> {
        match self {
            Source::Path(p) => Some(p.as_path()),
            Source::Memory(_) | Source::Mapped(_) => None,
        }
    }

    /// Length of the data, or None for Path sources that have not been read
    pub fn len_hint(&self) -> Option<usize> {
        match self {
            Source::Memory(data) => Some(data.len()),
            Source::Mapped(mmap) => Some(mmap.len()),
            Source::Path(path) => std::fs::metadata(path).ok().map(|m| m.len() as usize),
        }
    }
}

/// A source together with the name the user gave it.
#[derive(Clone, Debug)]
pub struct NamedSource {
    pub source: Source,
    pub file_name: String,
}

impl NamedSource {
    pub fn new(source: Source, file_name: impl Into<String>) -> Self {
        Self {
            source,
            file_name: file_name.into(),
        }
    }

    /// Name a path source after its final component.
    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let file_name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "image".to_string());
        Ok(Self::new(Source::map_file(path)?, file_name))
    }
}
