//! Filesystem-backed storage rooted at a host directory

use std::fs::{self, File};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use kestrel_core::{KestrelError, KestrelResult};

use crate::Storage;

/// Storage backed by a directory on the host filesystem.
///
/// Logical path `/config/device.json` maps to `<root>/config/device.json`.
#[derive(Clone, Debug)]
pub struct FsStorage {
    root: PathBuf,
}

impl FsStorage {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        FsStorage { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn resolve(&self, path: &str) -> KestrelResult<PathBuf> {
        let relative = path.trim_start_matches('/');
        if relative.split('/').any(|part| part == "..") {
            return Err(KestrelError::InvalidKey(path.to_string()));
        }
        Ok(self.root.join(relative))
    }
}

fn not_found_or(path: &str, err: io::Error, other: impl FnOnce(io::Error) -> KestrelError) -> KestrelError {
    if err.kind() == io::ErrorKind::NotFound {
        KestrelError::NotFound(path.to_string())
    } else {
        other(err)
    }
}

/// Flush directory metadata so a completed rename survives power loss.
#[cfg(unix)]
fn fsync_dir(dir: &Path) -> io::Result<()> {
    File::open(dir)?.sync_all()
}

#[cfg(not(unix))]
fn fsync_dir(_dir: &Path) -> io::Result<()> {
    Ok(())
}

impl Storage for FsStorage {
    fn mount(&self) -> KestrelResult<()> {
        fs::create_dir_all(&self.root).map_err(|e| {
            KestrelError::MountFailure(format!("{}: {}", self.root.display(), e))
        })
    }

    fn exists(&self, path: &str) -> bool {
        self.resolve(path).map(|p| p.exists()).unwrap_or(false)
    }

    fn read(&self, path: &str) -> KestrelResult<Vec<u8>> {
        let full = self.resolve(path)?;
        fs::read(&full).map_err(|e| {
            not_found_or(path, e, |e| KestrelError::ReadFailure {
                path: path.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn write(&self, path: &str, data: &[u8]) -> KestrelResult<()> {
        let full = self.resolve(path)?;
        let write_failure = |e: io::Error| KestrelError::WriteFailure {
            path: path.to_string(),
            reason: e.to_string(),
        };

        if let Some(parent) = full.parent() {
            fs::create_dir_all(parent).map_err(write_failure)?;
        }
        let mut file = File::create(&full).map_err(write_failure)?;
        file.write_all(data).map_err(write_failure)?;
        file.sync_all().map_err(write_failure)
    }

    fn remove(&self, path: &str) -> KestrelResult<()> {
        let full = self.resolve(path)?;
        fs::remove_file(&full).map_err(|e| {
            not_found_or(path, e, |e| KestrelError::WriteFailure {
                path: path.to_string(),
                reason: e.to_string(),
            })
        })
    }

    fn rename(&self, from: &str, to: &str) -> KestrelResult<()> {
        let src = self.resolve(from)?;
        let dst = self.resolve(to)?;
        let rename_failure = |e: io::Error| KestrelError::RenameFailure {
            from: from.to_string(),
            to: to.to_string(),
            reason: e.to_string(),
        };

        fs::rename(&src, &dst).map_err(rename_failure)?;
        if let Some(parent) = dst.parent() {
            fsync_dir(parent).map_err(rename_failure)?;
        }
        Ok(())
    }

    fn mkdir(&self, path: &str) -> KestrelResult<()> {
        let full = self.resolve(path)?;
        fs::create_dir_all(&full).map_err(|e| KestrelError::WriteFailure {
            path: path.to_string(),
            reason: e.to_string(),
        })
    }

    fn list(&self, dir: &str) -> KestrelResult<Vec<String>> {
        let full = self.resolve(dir)?;
        let entries = fs::read_dir(&full).map_err(|e| {
            not_found_or(dir, e, |e| KestrelError::ReadFailure {
                path: dir.to_string(),
                reason: e.to_string(),
            })
        })?;

        let mut names = Vec::new();
        for entry in entries.flatten() {
            if entry.file_type().map(|t| t.is_file()).unwrap_or(false) {
                names.push(entry.file_name().to_string_lossy().into_owned());
            }
        }
        names.sort();
        Ok(names)
    }
}
