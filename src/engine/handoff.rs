// src/engine/handoff.rs
//
// Tool chaining: one tool leaves its output in a transient session record,
// the next tool consumes it exactly once.

use crate::engine::asset::EncodedAsset;
use crate::error::{ImagePixError, Result};
use crate::ops::ToolKind;
use base64::engine::general_purpose::STANDARD;
use base64::Engine as _;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use tracing::{debug, warn};

/// Key of the single handoff record.
pub const STORAGE_KEY: &str = "imagepix_tool_chain";

/// String key/value storage scoped to one user session.
pub trait SessionStore {
    fn get(&self, key: &str) -> Option<String>;
    fn set(&self, key: &str, value: String) -> Result<()>;
    fn remove(&self, key: &str);
    /// Remove and return the value in one step; concurrent callers never both see it.
    fn take(&self, key: &str) -> Option<String>;
}

#[derive(Debug, Default)]
pub struct MemorySessionStore {
    entries: Mutex<HashMap<String, String>>,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl SessionStore for MemorySessionStore {
    fn get(&self, key: &str) -> Option<String> {
        self.entries.lock().get(key).cloned()
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        self.entries.lock().insert(key.to_string(), value);
        Ok(())
    }

    fn remove(&self, key: &str) {
        self.entries.lock().remove(key);
    }

    fn take(&self, key: &str) -> Option<String> {
        self.entries.lock().remove(key)
    }
}

impl<S: SessionStore + ?Sized> SessionStore for &S {
    fn get(&self, key: &str) -> Option<String> {
        (**self).get(key)
    }

    fn set(&self, key: &str, value: String) -> Result<()> {
        (**self).set(key, value)
    }

    fn remove(&self, key: &str) {
        (**self).remove(key)
    }

    fn take(&self, key: &str) -> Option<String> {
        (**self).take(key)
    }
}

/// Serialized form of the handoff record.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandoffRecord {
    /// `data:<mime>;base64,<payload>`
    pub blob: String,
    pub file_name: String,
    pub mime_type: String,
    pub size: u64,
    pub source_tool: String,
}

impl HandoffRecord {
    pub fn new(bytes: &[u8], mime_type: &str, file_name: &str, source_tool: &str) -> Self {
        Self {
            blob: to_data_url(bytes, mime_type),
            file_name: file_name.to_string(),
            mime_type: mime_type.to_string(),
            size: bytes.len() as u64,
            source_tool: source_tool.to_string(),
        }
    }

    fn into_chained(self) -> Result<ChainedImage> {
        let bytes = from_data_url(&self.blob)?;
        Ok(ChainedImage {
            bytes,
            file_name: self.file_name,
            mime_type: self.mime_type,
            source_tool: self.source_tool,
        })
    }
}

/// An image handed over by a previous tool.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ChainedImage {
    pub bytes: Vec<u8>,
    pub file_name: String,
    pub mime_type: String,
    pub source_tool: String,
}

impl ChainedImage {
    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    /// The tool that produced the image, if it is one of ours.
    pub fn source_kind(&self) -> Option<ToolKind> {
        ToolKind::from_slug(&self.source_tool)
    }
}

pub fn to_data_url(bytes: &[u8], mime_type: &str) -> String {
    format!("data:{mime_type};base64,{}", STANDARD.encode(bytes))
}

pub fn from_data_url(url: &str) -> Result<Vec<u8>> {
    let rest = url
        .strip_prefix("data:")
        .ok_or_else(|| ImagePixError::handoff_failed("blob is not a data URL"))?;
    let (header, payload) = rest
        .split_once(',')
        .ok_or_else(|| ImagePixError::handoff_failed("data URL has no payload"))?;
    if !header.ends_with(";base64") {
        return Err(ImagePixError::handoff_failed("data URL is not base64 encoded"));
    }
    STANDARD
        .decode(payload)
        .map_err(|e| ImagePixError::handoff_failed(format!("invalid base64 payload: {e}")))
}

/// Read-once handoff channel over a `SessionStore`.
#[derive(Debug)]
pub struct ToolChain<S> {
    store: S,
}

impl<S: SessionStore> ToolChain<S> {
    pub fn new(store: S) -> Self {
        Self { store }
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    /// Replace any pending record with `bytes`.
    pub fn put(&self, bytes: &[u8], mime_type: &str, file_name: &str, source_tool: &str) -> Result<()> {
        let record = HandoffRecord::new(bytes, mime_type, file_name, source_tool);
        let json = serde_json::to_string(&record)
            .map_err(|e| ImagePixError::handoff_failed(format!("failed to serialize record: {e}")))?;
        self.store.set(STORAGE_KEY, json)?;
        debug!(
            target: "imagepix::handoff",
            file_name,
            mime_type,
            size = bytes.len(),
            source_tool,
            "stored image for chaining"
        );
        Ok(())
    }

    pub fn put_asset(&self, asset: &EncodedAsset, file_name: &str, source_tool: ToolKind) -> Result<()> {
        self.put(asset.bytes(), asset.mime(), file_name, source_tool.slug())
    }

    /// Consume the pending record. A record that cannot be read is discarded and reported as absent.
    pub fn take(&self) -> Option<ChainedImage> {
        let stored = self.store.take(STORAGE_KEY)?;

        let chained = serde_json::from_str::<HandoffRecord>(&stored)
            .map_err(|e| ImagePixError::handoff_failed(format!("malformed record: {e}")))
            .and_then(HandoffRecord::into_chained);
        match chained {
            Ok(image) => {
                debug!(
                    target: "imagepix::handoff",
                    file_name = %image.file_name,
                    source_tool = %image.source_tool,
                    "retrieved chained image"
                );
                Some(image)
            }
            Err(e) => {
                warn!(target: "imagepix::handoff", error = %e, "discarding unreadable handoff record");
                None
            }
        }
    }

    pub fn has(&self) -> bool {
        self.store.get(STORAGE_KEY).is_some()
    }

    pub fn clear(&self) {
        self.store.remove(STORAGE_KEY);
    }
}
