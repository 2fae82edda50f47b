// src/engine/asset.rs
//
// Encoded output and everything that happens to it after encoding:
// preview handles, download naming, size display, atomic saves.

use crate::error::{ImagePixError, Result};
use crate::ops::OutputFormat;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::Arc;
use tempfile::NamedTempFile;
use tracing::{debug, info};

/// Encoded image bytes plus the facts the UI shows about them.
///
/// Cloning shares the byte buffer.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct EncodedAsset {
    bytes: Arc<[u8]>,
    format: OutputFormat,
    width: u32,
    height: u32,
}

impl EncodedAsset {
    pub fn new(bytes: Vec<u8>, format: OutputFormat, width: u32, height: u32) -> Self {
        Self {
            bytes: bytes.into(),
            format,
            width,
            height,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn shared_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    pub fn format(&self) -> OutputFormat {
        self.format
    }

    pub fn mime(&self) -> &'static str {
        self.format.mime()
    }

    /// Size in bytes
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }
}

/// Opaque reference to a displayable asset, valid until released.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct PreviewHandle(u64);

impl PreviewHandle {
    pub fn id(&self) -> u64 {
        self.0
    }
}

/// Issues preview handles and keeps their assets alive until released.
#[derive(Debug, Default)]
pub struct PreviewRegistry {
    next: AtomicU64,
    live: Mutex<HashMap<PreviewHandle, EncodedAsset>>,
    peak: AtomicUsize,
}

impl PreviewRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn issue(&self, asset: &EncodedAsset) -> PreviewHandle {
        let handle = PreviewHandle(self.next.fetch_add(1, Ordering::Relaxed) + 1);
        let mut live = self.live.lock();
        live.insert(handle, asset.clone());
        self.peak.fetch_max(live.len(), Ordering::Relaxed);
        handle
    }

    /// Returns false if the handle was already released.
    pub fn release(&self, handle: PreviewHandle) -> bool {
        self.live.lock().remove(&handle).is_some()
    }

    pub fn resolve(&self, handle: PreviewHandle) -> Option<EncodedAsset> {
        self.live.lock().get(&handle).cloned()
    }

    pub fn is_live(&self, handle: PreviewHandle) -> bool {
        self.live.lock().contains_key(&handle)
    }

    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    /// Most handles ever live at once.
    pub fn peak_live(&self) -> usize {
        self.peak.load(Ordering::Relaxed)
    }
}

/// Strip a trailing extension (a dot followed by at least one character that
/// is neither `.` nor `/`).
fn strip_extension(name: &str) -> &str {
    match name.rfind('.') {
        Some(dot) if dot + 1 < name.len() && !name[dot + 1..].contains('/') => &name[..dot],
        _ => name,
    }
}

/// `holiday.png` + JPEG -> `holiday.jpg`
pub fn download_file_name(original: &str, format: OutputFormat) -> String {
    download_file_name_with_suffix(original, "", format)
}

/// `holiday.png` + `-compressed` + WebP -> `holiday-compressed.webp`
pub fn download_file_name_with_suffix(original: &str, suffix: &str, format: OutputFormat) -> String {
    let stem = strip_extension(original.trim());
    let stem = if stem.is_empty() { "image" } else { stem };
    format!("{stem}{suffix}.{}", format.extension())
}

const SIZE_UNITS: [&str; 4] = ["Bytes", "KB", "MB", "GB"];

/// Human-readable size with up to two decimals: `1536` -> `1.5 KB`.
pub fn format_file_size(bytes: u64) -> String {
    if bytes == 0 {
        return "0 Bytes".to_string();
    }
    let mut exponent = 0;
    let mut value = bytes as f64;
    while value >= 1024.0 && exponent < SIZE_UNITS.len() - 1 {
        value /= 1024.0;
        exponent += 1;
    }
    let formatted = format!("{value:.2}");
    let trimmed = formatted.trim_end_matches('0').trim_end_matches('.');
    format!("{trimmed} {}", SIZE_UNITS[exponent])
}

/// Percentage saved going from `original` to `new` bytes, rounded. Negative when output grew.
pub fn calculate_reduction(original: u64, new: u64) -> i64 {
    if original == 0 {
        return 0;
    }
    let pct = (original as f64 - new as f64) / original as f64 * 100.0;
    crate::engine::common::round_half_up(pct) as i64
}

/// Write `asset` to `dir/name` atomically (temp file in the same directory, then rename).
pub fn save_asset(dir: impl AsRef<Path>, name: &str, asset: &EncodedAsset) -> Result<PathBuf> {
    let dir = dir.as_ref();
    let file_name = Path::new(name)
        .file_name()
        .ok_or_else(|| ImagePixError::invalid_argument("name", name.to_string(), "must name a file"))?;
    let target = dir.join(file_name);
    let display_dir = dir.to_string_lossy().to_string();

    let mut temp_file = NamedTempFile::new_in(dir)
        .map_err(|e| ImagePixError::file_write_failed(display_dir.clone(), e))?;
    let temp_path = temp_file.path().display().to_string();
    temp_file
        .write_all(asset.bytes())
        .map_err(|e| ImagePixError::file_write_failed(temp_path.clone(), e))?;
    temp_file
        .as_file_mut()
        .sync_all()
        .map_err(|e| ImagePixError::file_write_failed(temp_path, e))?;

    temp_file
        .persist(&target)
        .map_err(|e| ImagePixError::file_write_failed(target.display().to_string(), e.error))?;

    info!(
        target: "imagepix::asset",
        path = %target.display(),
        size = asset.size(),
        format = %asset.format(),
        "saved asset"
    );
    Ok(target)
}

/// Release `handle` if present, logging when it was already gone.
pub(crate) fn release_quietly(registry: &PreviewRegistry, handle: Option<PreviewHandle>) {
    if let Some(handle) = handle {
        if !registry.release(handle) {
            debug!(target: "imagepix::asset", handle = handle.id(), "handle already released");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset(n: usize) -> EncodedAsset {
        EncodedAsset::new(vec![7u8; n], OutputFormat::Png, 2, 3)
    }

    #[test]
    fn asset_reports_size_and_mime() {
        let a = asset(42);
        assert_eq!(a.size(), 42);
        assert_eq!(a.mime(), "image/png");
        assert_eq!(a.dimensions(), (2, 3));
        let b = a.clone();
        assert!(Arc::ptr_eq(&a.shared_bytes(), &b.shared_bytes()));
    }

    #[test]
    fn registry_issue_and_release() {
        let registry = PreviewRegistry::new();
        let h1 = registry.issue(&asset(1));
        let h2 = registry.issue(&asset(2));
        assert_ne!(h1, h2);
        assert_eq!(registry.live_count(), 2);
        assert_eq!(registry.resolve(h2).unwrap().size(), 2);
        assert!(registry.release(h1));
        assert!(!registry.release(h1));
        assert!(!registry.is_live(h1));
        assert_eq!(registry.live_count(), 1);
        assert_eq!(registry.peak_live(), 2);
    }

    #[test]
    fn download_names() {
        assert_eq!(download_file_name("holiday.png", OutputFormat::Jpeg), "holiday.jpg");
        assert_eq!(download_file_name("archive.tar.gz", OutputFormat::Png), "archive.tar.png");
        assert_eq!(download_file_name("noext", OutputFormat::WebP), "noext.webp");
        assert_eq!(download_file_name("", OutputFormat::Ico), "image.ico");
        assert_eq!(
            download_file_name_with_suffix("cat.jpeg", "-compressed", OutputFormat::WebP),
            "cat-compressed.webp"
        );
        assert_eq!(download_file_name("trailing.", OutputFormat::Bmp), "trailing..bmp");
    }

    #[test]
    fn file_sizes() {
        assert_eq!(format_file_size(0), "0 Bytes");
        assert_eq!(format_file_size(500), "500 Bytes");
        assert_eq!(format_file_size(1024), "1 KB");
        assert_eq!(format_file_size(1536), "1.5 KB");
        assert_eq!(format_file_size(1_048_576), "1 MB");
        assert_eq!(format_file_size(1_572_864 + 10), "1.5 MB");
        assert_eq!(format_file_size(5 * 1024 * 1024 * 1024 * 1024), "5120 GB");
    }

    #[test]
    fn reductions() {
        assert_eq!(calculate_reduction(1000, 250), 75);
        assert_eq!(calculate_reduction(1000, 1000), 0);
        assert_eq!(calculate_reduction(1000, 1500), -50);
        assert_eq!(calculate_reduction(0, 10), 0);
        assert_eq!(calculate_reduction(3, 2), 33);
    }

    #[test]
    fn save_is_atomic_and_named() {
        let dir = tempfile::tempdir().unwrap();
        let path = save_asset(dir.path(), "../escape/out.png", &asset(16)).unwrap();
        assert_eq!(path, dir.path().join("out.png"));
        assert_eq!(std::fs::read(&path).unwrap(), vec![7u8; 16]);
        let leftovers = std::fs::read_dir(dir.path()).unwrap().count();
        assert_eq!(leftovers, 1);
    }
}
