//! Durable byte storage interface
//!
//! Paths are short, `/`-separated, namespaced strings such as
//! `/cache/weather` or `/config/device.json`. The medium must not be
//! mounted or written by anything outside the device services.

use kestrel_core::KestrelResult;

/// Filesystem-like durable storage
pub trait Storage: Send + Sync {
    /// Bring the medium online. Idempotent.
    fn mount(&self) -> KestrelResult<()>;

    fn exists(&self, path: &str) -> bool;

    /// Whole-file read. Absent files are `NotFound`.
    fn read(&self, path: &str) -> KestrelResult<Vec<u8>>;

    /// Create or truncate `path` and write `data`, flushed to the medium
    /// before returning.
    fn write(&self, path: &str, data: &[u8]) -> KestrelResult<()>;

    /// Delete a file. Absent files are `NotFound`.
    fn remove(&self, path: &str) -> KestrelResult<()>;

    /// Move `from` over `to`, replacing `to` atomically.
    fn rename(&self, from: &str, to: &str) -> KestrelResult<()>;

    /// Create a directory. Existing directories are not an error.
    fn mkdir(&self, path: &str) -> KestrelResult<()>;

    /// Names (not paths) of the files directly inside `dir`
    fn list(&self, dir: &str) -> KestrelResult<Vec<String>>;
}

/// Join a directory and a file name
pub fn join_path(dir: &str, name: &str) -> String {
    format!("{}/{}", dir.trim_end_matches('/'), name)
}

/// Parent directory of `path`, `/` for top-level files
pub fn parent_dir(path: &str) -> &str {
    match path.rfind('/') {
        Some(0) | None => "/",
        Some(idx) => &path[..idx],
    }
}

/// Final component of `path`
pub fn file_name(path: &str) -> &str {
    path.rsplit('/').next().unwrap_or(path)
}
