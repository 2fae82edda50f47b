// src/engine/pool.rs
//
// Global thread pool shared by preview jobs and batch conversion.
//
// The pool is built lazily on first use; later changes to IMAGEPIX_THREADS
// have no effect.

use rayon::ThreadPool;
use std::sync::OnceLock;
use tracing::{debug, warn};

/// Overrides the detected thread count when set to a positive integer.
pub const THREADS_ENV: &str = "IMAGEPIX_THREADS";

/// Upper bound on the pool size, whatever the environment says.
pub const MAX_THREADS: usize = 256;

const MIN_THREADS: usize = 1;

static GLOBAL_THREAD_POOL: OnceLock<Option<ThreadPool>> = OnceLock::new();

/// Thread count the pool is (or would be) built with.
pub fn configured_threads() -> usize {
    let detected = std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(MIN_THREADS);
    threads_from_env(std::env::var(THREADS_ENV).ok().as_deref(), detected)
}

fn threads_from_env(raw: Option<&str>, detected: usize) -> usize {
    raw.and_then(|v| v.trim().parse::<usize>().ok())
        .filter(|&n| n > 0)
        .unwrap_or(detected)
        .clamp(MIN_THREADS, MAX_THREADS)
}

/// The shared pool, or `None` when no pool could be built (callers then run
/// on rayon's implicit global pool).
pub fn get_pool() -> Option<&'static ThreadPool> {
    GLOBAL_THREAD_POOL
        .get_or_init(|| {
            let num_threads = configured_threads();
            let built = rayon::ThreadPoolBuilder::new()
                .num_threads(num_threads)
                .thread_name(|i| format!("imagepix-{i}"))
                .build()
                .or_else(|e| {
                    warn!(target: "imagepix::pool", error = %e, num_threads, "falling back to a single thread");
                    rayon::ThreadPoolBuilder::new().num_threads(MIN_THREADS).build()
                });
            match built {
                Ok(pool) => {
                    debug!(target: "imagepix::pool", threads = pool.current_num_threads(), "thread pool ready");
                    Some(pool)
                }
                Err(e) => {
                    warn!(target: "imagepix::pool", error = %e, "no dedicated thread pool");
                    None
                }
            }
        })
        .as_ref()
}

/// Run `job` in the background on the shared pool.
pub fn spawn<F>(job: F)
where
    F: FnOnce() + Send + 'static,
{
    match get_pool() {
        Some(pool) => pool.spawn(job),
        None => rayon::spawn(job),
    }
}

/// Run `op` inside the shared pool so nested rayon iterators use it.
pub fn install<R, F>(op: F) -> R
where
    F: FnOnce() -> R + Send,
    R: Send,
{
    match get_pool() {
        Some(pool) => pool.install(op),
        None => op(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn env_override_parsing() {
        assert_eq!(threads_from_env(None, 8), 8);
        assert_eq!(threads_from_env(Some("3"), 8), 3);
        assert_eq!(threads_from_env(Some(" 2 "), 8), 2);
        assert_eq!(threads_from_env(Some("0"), 8), 8);
        assert_eq!(threads_from_env(Some("lots"), 8), 8);
        assert_eq!(threads_from_env(Some("100000"), 8), MAX_THREADS);
        assert_eq!(threads_from_env(None, 0), MIN_THREADS);
    }

    #[test]
    fn pool_is_shared() {
        let a = get_pool().map(|p| p as *const ThreadPool);
        let b = get_pool().map(|p| p as *const ThreadPool);
        assert_eq!(a, b);
        assert_eq!(install(|| 2 + 2), 4);
    }

    #[test]
    fn spawned_jobs_run() {
        let (tx, rx) = std::sync::mpsc::channel();
        spawn(move || {
            let _ = tx.send(7);
        });
        assert_eq!(rx.recv().unwrap(), 7);
    }
}
