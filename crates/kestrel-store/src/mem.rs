//! In-memory storage with fault injection

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_core::{KestrelError, KestrelResult};

use crate::storage::{parent_dir, Storage};

#[derive(Default)]
struct MemState {
    mounted: bool,
    files: BTreeMap<String, Vec<u8>>,
    dirs: BTreeSet<String>,
    faults: Faults,
    writes: u64,
}

#[derive(Default)]
struct Faults {
    mount: bool,
    read_paths: BTreeSet<String>,
    write_paths: BTreeSet<String>,
    renames: bool,
}

/// Volatile storage for tests and simulation.
///
/// Clones share the same contents, so a test can keep a handle to inspect
/// or corrupt what a service wrote.
#[derive(Clone, Default)]
pub struct MemStorage {
    state: Arc<Mutex<MemState>>,
}

impl MemStorage {
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `mount` fail
    pub fn fail_mount(&self, fail: bool) {
        self.state.lock().faults.mount = fail;
    }

    /// Make reads of `path` fail until faults are cleared
    pub fn fail_reads_to(&self, path: &str) {
        self.state.lock().faults.read_paths.insert(path.to_string());
    }

    /// Make writes to `path` fail until faults are cleared
    pub fn fail_writes_to(&self, path: &str) {
        self.state.lock().faults.write_paths.insert(path.to_string());
    }

    pub fn fail_renames(&self, fail: bool) {
        self.state.lock().faults.renames = fail;
    }

    pub fn clear_faults(&self) {
        self.state.lock().faults = Faults::default();
    }

    /// Contents of `path`, bypassing mount state and faults
    pub fn raw(&self, path: &str) -> Option<Vec<u8>> {
        self.state.lock().files.get(path).cloned()
    }

    /// Place bytes at `path` directly, as a crash might have left them
    pub fn put_raw(&self, path: &str, data: &[u8]) {
        let mut state = self.state.lock();
        state.dirs.insert(parent_dir(path).to_string());
        state.files.insert(path.to_string(), data.to_vec());
    }

    /// Every stored file path, sorted
    pub fn files(&self) -> Vec<String> {
        self.state.lock().files.keys().cloned().collect()
    }

    /// Successful writes since creation
    pub fn write_count(&self) -> u64 {
        self.state.lock().writes
    }
}

fn unmounted() -> KestrelError {
    KestrelError::MountFailure("medium not mounted".into())
}

impl Storage for MemStorage {
    fn mount(&self) -> KestrelResult<()> {
        let mut state = self.state.lock();
        if state.faults.mount {
            return Err(KestrelError::MountFailure("injected mount fault".into()));
        }
        state.mounted = true;
        state.dirs.insert("/".into());
        Ok(())
    }

    fn exists(&self, path: &str) -> bool {
        let state = self.state.lock();
        state.mounted && (state.files.contains_key(path) || state.dirs.contains(path))
    }

    fn read(&self, path: &str) -> KestrelResult<Vec<u8>> {
        let state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        if state.faults.read_paths.contains(path) {
            return Err(KestrelError::ReadFailure {
                path: path.to_string(),
                reason: "injected read fault".into(),
            });
        }
        state
            .files
            .get(path)
            .cloned()
            .ok_or_else(|| KestrelError::NotFound(path.to_string()))
    }

    fn write(&self, path: &str, data: &[u8]) -> KestrelResult<()> {
        let mut state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        if state.faults.write_paths.contains(path) {
            return Err(KestrelError::WriteFailure {
                path: path.to_string(),
                reason: "injected write fault".into(),
            });
        }
        state.dirs.insert(parent_dir(path).to_string());
        state.files.insert(path.to_string(), data.to_vec());
        state.writes += 1;
        Ok(())
    }

    fn remove(&self, path: &str) -> KestrelResult<()> {
        let mut state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        state
            .files
            .remove(path)
            .map(|_| ())
            .ok_or_else(|| KestrelError::NotFound(path.to_string()))
    }

    fn rename(&self, from: &str, to: &str) -> KestrelResult<()> {
        let mut state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        if state.faults.renames {
            return Err(KestrelError::RenameFailure {
                from: from.to_string(),
                to: to.to_string(),
                reason: "injected rename fault".into(),
            });
        }
        let data = state.files.remove(from).ok_or_else(|| KestrelError::RenameFailure {
            from: from.to_string(),
            to: to.to_string(),
            reason: "source missing".into(),
        })?;
        // Single map insert; readers never observe `to` missing.
        state.files.insert(to.to_string(), data);
        Ok(())
    }

    fn mkdir(&self, path: &str) -> KestrelResult<()> {
        let mut state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        state.dirs.insert(path.trim_end_matches('/').to_string());
        Ok(())
    }

    fn list(&self, dir: &str) -> KestrelResult<Vec<String>> {
        let state = self.state.lock();
        if !state.mounted {
            return Err(unmounted());
        }
        let dir = dir.trim_end_matches('/');
        Ok(state
            .files
            .keys()
            .filter(|path| parent_dir(path) == dir)
            .filter_map(|path| path.rsplit('/').next())
            .map(str::to_string)
            .collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_requires_mount() {
        let storage = MemStorage::new();
        assert!(matches!(
            storage.write("/cache/a", b"1"),
            Err(KestrelError::MountFailure(_))
        ));
        storage.mount().unwrap();
        storage.write("/cache/a", b"1").unwrap();
        assert_eq!(storage.read("/cache/a").unwrap(), b"1");
    }

    #[test]
    fn test_clones_share_contents() {
        let storage = MemStorage::new();
        let inspector = storage.clone();
        storage.mount().unwrap();
        storage.write("/config/device.json", b"{}").unwrap();
        assert_eq!(inspector.raw("/config/device.json").unwrap(), b"{}");
        assert_eq!(inspector.write_count(), 1);
    }

    #[test]
    fn test_injected_faults() {
        let storage = MemStorage::new();
        storage.fail_mount(true);
        assert!(storage.mount().is_err());
        storage.clear_faults();
        storage.mount().unwrap();

        storage.write("/cache/b", b"w").unwrap();
        storage.fail_reads_to("/cache/b");
        assert!(matches!(
            storage.read("/cache/b"),
            Err(KestrelError::ReadFailure { .. })
        ));
        assert!(storage.exists("/cache/b"));

        storage.fail_writes_to("/cache/.a.meta");
        storage.write("/cache/a", b"v").unwrap();
        assert!(storage.write("/cache/.a.meta", b"0000").is_err());

        storage.write("/config/device.tmp", b"{}").unwrap();
        storage.fail_renames(true);
        assert!(storage
            .rename("/config/device.tmp", "/config/device.json")
            .is_err());
        assert!(storage.exists("/config/device.tmp"));
        assert!(!storage.exists("/config/device.json"));
    }

    #[test]
    fn test_list_direct_children() {
        let storage = MemStorage::new();
        storage.mount().unwrap();
        storage.write("/cache/a", b"1").unwrap();
        storage.write("/cache/.a.meta", b"0000").unwrap();
        storage.write("/config/device.json", b"{}").unwrap();

        assert_eq!(storage.list("/cache").unwrap(), vec![".a.meta", "a"]);
        assert!(storage.list("/logs").unwrap().is_empty());
    }
}
