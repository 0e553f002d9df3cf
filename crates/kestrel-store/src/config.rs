//! Persisted device configuration
//!
//! The configuration is a single flat JSON object of string values stored
//! at `/config/device.json`. Nothing is held in memory between calls:
//! every read parses the document from storage and every write is a
//! read-modify-write that replaces the document through a temporary file.

use serde_json::{Map, Value};
use tracing::{debug, info, warn};

use kestrel_core::{KestrelError, KestrelResult};

use crate::persist::{PersistentStore, CONFIG_FILE, CONFIG_TEMP_FILE, NAMESPACE_DIRS};
use crate::storage::Storage;

/// Size bounds for the config document
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ConfigLimits {
    /// Serialized document
    pub max_document_len: usize,
    pub max_key_len: usize,
    pub max_value_len: usize,
}

impl Default for ConfigLimits {
    fn default() -> Self {
        ConfigLimits {
            max_document_len: 1024,
            max_key_len: 32,
            max_value_len: 64,
        }
    }
}

/// Permissive boolean reading used by [`ConfigService::get_bool`]
pub fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "true" | "1" | "yes" | "YES" => Some(true),
        "false" | "0" | "no" | "NO" => Some(false),
        _ => None,
    }
}

/// Key/value configuration backed by one durable document
pub struct ConfigService<S: Storage> {
    store: PersistentStore<S>,
    limits: ConfigLimits,
    dirty: bool,
    loaded: bool,
}

impl<S: Storage> ConfigService<S> {
    pub fn new(storage: S) -> Self {
        Self::with_limits(storage, ConfigLimits::default())
    }

    pub fn with_limits(storage: S, limits: ConfigLimits) -> Self {
        ConfigService {
            store: PersistentStore::new(storage),
            limits,
            dirty: false,
            loaded: false,
        }
    }

    /// Mount storage, create the namespaces and check the document.
    ///
    /// A temporary document left by an interrupted write is discarded;
    /// the canonical document is authoritative.
    pub fn init(&mut self) -> KestrelResult<()> {
        self.store.mount()?;

        for dir in NAMESPACE_DIRS {
            if let Err(e) = self.store.ensure_dir(dir) {
                warn!(dir, error = %e, "failed to create namespace");
            }
        }

        if self.store.exists(CONFIG_TEMP_FILE) {
            warn!(path = CONFIG_TEMP_FILE, "discarding interrupted config write");
            self.store.remove_if_exists(CONFIG_TEMP_FILE)?;
        }

        if self.load() {
            info!(path = CONFIG_FILE, "config loaded");
        } else {
            info!("no config found, using defaults");
            // An empty configuration is a valid starting point.
            self.loaded = true;
        }
        Ok(())
    }

    /// String value for `key`.
    ///
    /// Absent keys, non-string values and unreadable documents all read as `None`.
    pub fn get(&self, key: &str) -> Option<String> {
        let doc = self.read_document().ok()?;
        match doc.get(key) {
            Some(Value::String(s)) => Some(s.clone()),
            _ => None,
        }
    }

    /// Write the value for `key` into `out`, or `default` when it is absent.
    /// Returns whether the stored value was used.
    pub fn get_into(&self, key: &str, out: &mut String, default: &str) -> bool {
        out.clear();
        match self.get(key) {
            Some(value) => {
                out.push_str(&value);
                true
            }
            None => {
                out.push_str(default);
                false
            }
        }
    }

    pub fn get_or(&self, key: &str, default: &str) -> String {
        self.get(key).unwrap_or_else(|| default.to_string())
    }

    pub fn get_int(&self, key: &str, default: i32) -> i32 {
        self.get(key)
            .and_then(|v| v.trim().parse().ok())
            .unwrap_or(default)
    }

    pub fn get_bool(&self, key: &str, default: bool) -> bool {
        self.get(key)
            .and_then(|v| parse_bool(&v))
            .unwrap_or(default)
    }

    /// Set `key` to `value` and persist the whole document atomically.
    ///
    /// A missing or malformed document is replaced by a fresh one. Any
    /// other read failure aborts the write. On failure the previous
    /// document remains the one readers see.
    pub fn set(&mut self, key: &str, value: &str) -> KestrelResult<()> {
        self.validate(key, value)?;
        self.dirty = true;

        let mut doc = match self.read_document() {
            Ok(doc) => doc,
            Err(e) if e.is_absent() => Map::new(),
            Err(KestrelError::ParseFailure { reason, .. }) => {
                warn!(%reason, "replacing malformed config document");
                Map::new()
            }
            Err(e) => return Err(e),
        };
        doc.insert(key.to_string(), Value::String(value.to_string()));

        let bytes = serde_json::to_vec(&doc).map_err(|e| KestrelError::WriteFailure {
            path: CONFIG_FILE.to_string(),
            reason: e.to_string(),
        })?;
        if bytes.len() > self.limits.max_document_len {
            return Err(KestrelError::DocumentTooLarge {
                len: bytes.len(),
                max: self.limits.max_document_len,
            });
        }

        self.store
            .write_document(CONFIG_FILE, CONFIG_TEMP_FILE, &bytes)?;

        self.dirty = false;
        self.loaded = true;
        debug!(key, "config updated");
        Ok(())
    }

    pub fn set_int(&mut self, key: &str, value: i32) -> KestrelResult<()> {
        self.set(key, &value.to_string())
    }

    pub fn set_bool(&mut self, key: &str, value: bool) -> KestrelResult<()> {
        self.set(key, if value { "true" } else { "false" })
    }

    /// Writes are persisted by `set` itself; reports whether every
    /// requested mutation has reached storage.
    pub fn save(&self) -> bool {
        !self.dirty
    }

    /// Forget the loaded state and check the document again.
    /// Returns whether a readable document exists.
    pub fn reload(&mut self) -> bool {
        self.loaded = false;
        self.load()
    }

    /// Delete the document; later reads fall back to defaults.
    pub fn reset(&mut self) -> KestrelResult<()> {
        self.store.remove_if_exists(CONFIG_FILE)?;
        self.loaded = false;
        self.dirty = false;
        info!("config reset");
        Ok(())
    }

    #[inline]
    pub fn is_dirty(&self) -> bool {
        self.dirty
    }

    /// Has a document (or an empty configuration) been confirmed since the
    /// last reset or reload?
    #[inline]
    pub fn is_loaded(&self) -> bool {
        self.loaded
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_mounted()
    }

    pub fn limits(&self) -> &ConfigLimits {
        &self.limits
    }

    fn load(&mut self) -> bool {
        match self.read_document() {
            Ok(_) => {
                self.loaded = true;
                self.dirty = false;
                true
            }
            Err(e) => {
                match &e {
                    KestrelError::ParseFailure { reason, .. } => {
                        warn!(%reason, "config document malformed")
                    }
                    KestrelError::ReadFailure { reason, .. } => {
                        warn!(%reason, "config document unreadable")
                    }
                    _ => {}
                }
                false
            }
        }
    }

    fn read_document(&self) -> KestrelResult<Map<String, Value>> {
        let bytes = self.store.read(CONFIG_FILE)?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(map)) => Ok(map),
            Ok(_) => Err(KestrelError::ParseFailure {
                path: CONFIG_FILE.to_string(),
                reason: "document is not an object".into(),
            }),
            Err(e) => Err(KestrelError::ParseFailure {
                path: CONFIG_FILE.to_string(),
                reason: e.to_string(),
            }),
        }
    }

    fn validate(&self, key: &str, value: &str) -> KestrelResult<()> {
        if key.is_empty() || key.len() > self.limits.max_key_len {
            return Err(KestrelError::InvalidKey(key.to_string()));
        }
        if value.len() > self.limits.max_value_len {
            return Err(KestrelError::ValueTooLarge {
                len: value.len(),
                max: self.limits.max_value_len,
            });
        }
        Ok(())
    }
}
