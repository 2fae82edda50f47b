// src/engine/common.rs
//
// Common utilities shared across engine modules.
// Codec libraries (libjpeg, libwebp) can panic on malformed input; every
// stage that calls into them runs under the panic policy below so a panic
// becomes an ordinary per-operation error.

use crate::error::{ImagePixError, Result};
use std::panic::{catch_unwind, AssertUnwindSafe};
use tracing::error;

/// Run `f`, converting a panic into `ImagePixError::InternalPanic`.
///
/// `stage` names the pipeline step for the error message and the log line.
pub fn run_with_panic_policy<T, F>(stage: &'static str, f: F) -> Result<T>
where
    F: FnOnce() -> Result<T>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(result) => result,
        Err(payload) => {
            let detail = panic_message(payload.as_ref());
            error!(target: "imagepix::panic", stage, detail = %detail, "panic caught in image stage");
            Err(ImagePixError::internal_panic(format!(
                "{stage} panicked: {detail}"
            )))
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&'static str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_string()
    }
}

/// JavaScript `Math.round` semantics: halves round toward positive infinity.
///
/// Geometry (offsets, canvas sizes) uses this so -0.5 becomes 0 and 2.5 becomes 3.
#[inline]
pub fn round_half_up(v: f64) -> f64 {
    (v + 0.5).floor()
}
