//! Crash-safe persistence shared by the cache and config services
//!
//! Two write patterns are supported:
//! - *records*: one small file per key, written in place (cache entries)
//! - *documents*: a single file replaced via temp-write then rename, so
//!   the canonical copy is never observed half-written (config)

use tracing::{debug, warn};

use kestrel_core::{KestrelError, KestrelResult};

use crate::storage::Storage;

/// Cache namespace
pub const CACHE_DIR: &str = "/cache";
/// Config namespace
pub const CONFIG_DIR: &str = "/config";
/// Canonical config document
pub const CONFIG_FILE: &str = "/config/device.json";
/// Sibling temporary used while replacing the config document
pub const CONFIG_TEMP_FILE: &str = "/config/device.tmp";

/// Namespaces created when the config service starts
pub const NAMESPACE_DIRS: [&str; 5] = ["/config", "/cache", "/logs", "/certs", "/assets"];

/// Mount-aware wrapper around a [`Storage`] medium
pub struct PersistentStore<S: Storage> {
    storage: S,
    mounted: bool,
}

impl<S: Storage> PersistentStore<S> {
    pub fn new(storage: S) -> Self {
        PersistentStore {
            storage,
            mounted: false,
        }
    }

    /// Mount the medium. On failure the store stays unmounted and every
    /// later operation reports `MountFailure`.
    pub fn mount(&mut self) -> KestrelResult<()> {
        match self.storage.mount() {
            Ok(()) => {
                self.mounted = true;
                Ok(())
            }
            Err(e) => {
                self.mounted = false;
                warn!(error = %e, "storage mount failed, running on defaults");
                Err(e)
            }
        }
    }

    #[inline]
    pub fn is_mounted(&self) -> bool {
        self.mounted
    }

    pub fn storage(&self) -> &S {
        &self.storage
    }

    fn check_mounted(&self) -> KestrelResult<()> {
        if self.mounted {
            Ok(())
        } else {
            Err(KestrelError::MountFailure("storage not mounted".into()))
        }
    }

    pub fn ensure_dir(&self, dir: &str) -> KestrelResult<()> {
        self.check_mounted()?;
        if !self.storage.exists(dir) {
            self.storage.mkdir(dir)?;
            debug!(dir, "created namespace");
        }
        Ok(())
    }

    pub fn exists(&self, path: &str) -> bool {
        self.mounted && self.storage.exists(path)
    }

    pub fn read(&self, path: &str) -> KestrelResult<Vec<u8>> {
        self.check_mounted()?;
        self.storage.read(path)
    }

    /// Overwrite a single record in place
    pub fn write_record(&self, path: &str, data: &[u8]) -> KestrelResult<()> {
        self.check_mounted()?;
        self.storage.write(path, data).map_err(|e| {
            warn!(path, error = %e, "record write failed");
            e
        })
    }

    /// Replace a document atomically: write `tmp` in full, then rename it
    /// over `path`. The previous `path` stays authoritative until the
    /// rename lands.
    pub fn write_document(&self, path: &str, tmp: &str, data: &[u8]) -> KestrelResult<()> {
        self.check_mounted()?;

        if let Err(e) = self.storage.write(tmp, data) {
            warn!(path = tmp, error = %e, "temporary document write failed");
            self.discard(tmp);
            return Err(e);
        }

        if let Err(e) = self.storage.rename(tmp, path) {
            warn!(from = tmp, to = path, error = %e, "document rename failed");
            self.discard(tmp);
            return Err(match e {
                KestrelError::RenameFailure { .. } => e,
                other => KestrelError::RenameFailure {
                    from: tmp.to_string(),
                    to: path.to_string(),
                    reason: other.to_string(),
                },
            });
        }

        debug!(path, bytes = data.len(), "document replaced");
        Ok(())
    }

    /// Delete `path`; absent files count as removed
    pub fn remove_if_exists(&self, path: &str) -> KestrelResult<()> {
        self.check_mounted()?;
        match self.storage.remove(path) {
            Ok(()) => Ok(()),
            Err(e) if e.is_absent() => Ok(()),
            Err(e) => Err(e),
        }
    }

    pub fn list(&self, dir: &str) -> KestrelResult<Vec<String>> {
        self.check_mounted()?;
        match self.storage.list(dir) {
            Ok(names) => Ok(names),
            Err(e) if e.is_absent() => Ok(Vec::new()),
            Err(e) => Err(e),
        }
    }

    fn discard(&self, tmp: &str) {
        if let Err(e) = self.remove_if_exists(tmp) {
            debug!(path = tmp, error = %e, "could not discard temporary");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::MemStorage;

    fn mounted() -> (MemStorage, PersistentStore<MemStorage>) {
        let storage = MemStorage::new();
        let mut store = PersistentStore::new(storage.clone());
        store.mount().unwrap();
        (storage, store)
    }

    #[test]
    fn test_unmounted_operations_fail() {
        let storage = MemStorage::new();
        storage.fail_mount(true);
        let mut store = PersistentStore::new(storage);

        assert!(store.mount().is_err());
        assert!(!store.is_mounted());
        assert!(matches!(
            store.write_record("/cache/a", b"1"),
            Err(KestrelError::MountFailure(_))
        ));
        assert!(matches!(store.read("/cache/a"), Err(KestrelError::MountFailure(_))));
        assert!(!store.exists("/cache/a"));
    }

    #[test]
    fn test_document_replaced() {
        let (storage, store) = mounted();
        store
            .write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"{\"a\":\"1\"}")
            .unwrap();
        store
            .write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"{\"a\":\"2\"}")
            .unwrap();

        assert_eq!(storage.raw(CONFIG_FILE).unwrap(), b"{\"a\":\"2\"}");
        assert!(storage.raw(CONFIG_TEMP_FILE).is_none());
    }

    #[test]
    fn test_rename_failure_keeps_previous_document() {
        let (storage, store) = mounted();
        store.write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"old").unwrap();

        storage.fail_renames(true);
        let err = store
            .write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"new")
            .unwrap_err();

        assert!(matches!(err, KestrelError::RenameFailure { .. }));
        assert_eq!(store.read(CONFIG_FILE).unwrap(), b"old");
        assert!(storage.raw(CONFIG_TEMP_FILE).is_none());
    }

    #[test]
    fn test_temp_write_failure_leaves_document() {
        let (storage, store) = mounted();
        store.write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"old").unwrap();

        storage.fail_writes_to(CONFIG_TEMP_FILE);
        assert!(matches!(
            store.write_document(CONFIG_FILE, CONFIG_TEMP_FILE, b"new"),
            Err(KestrelError::WriteFailure { .. })
        ));
        assert_eq!(store.read(CONFIG_FILE).unwrap(), b"old");
    }

    #[test]
    fn test_remove_if_exists_tolerates_absent() {
        let (_storage, store) = mounted();
        store.remove_if_exists("/cache/ghost").unwrap();
        assert!(store.list("/nowhere").unwrap().is_empty());
    }
}
