//! TTL-keyed blob cache
//!
//! Each entry is two records under `/cache`: the raw value at `/cache/<key>`
//! and a 4-byte little-endian absolute expiry at `/cache/.<key>.meta`.
//! Liveness is judged against the wrapping monotonic counter; an entry
//! without a readable expiry record is expired.

use std::collections::BTreeSet;
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use kestrel_core::{KestrelError, KestrelResult, Millis, MonotonicClock, HALF_RANGE};

use crate::persist::{PersistentStore, CACHE_DIR};
use crate::storage::{join_path, Storage};

/// Longest accepted key, in bytes
pub const MAX_KEY_LEN: usize = 32;

const META_PREFIX: &str = ".";
const META_SUFFIX: &str = ".meta";

/// Cache tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct CacheConfig {
    /// TTL applied when `set` is given zero
    pub default_ttl_ms: u32,
    /// Largest value accepted by `set`
    pub max_value_len: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        CacheConfig {
            default_ttl_ms: 3_600_000,
            max_value_len: 4096,
        }
    }
}

/// Reject keys that cannot map to a single file name in the namespace
pub fn validate_key(key: &str) -> KestrelResult<()> {
    let invalid = key.is_empty()
        || key.len() > MAX_KEY_LEN
        || key.starts_with('.')
        || key.contains("..")
        || key.contains(['/', '\\', '\0']);
    if invalid {
        Err(KestrelError::InvalidKey(key.to_string()))
    } else {
        Ok(())
    }
}

fn value_path(key: &str) -> String {
    join_path(CACHE_DIR, key)
}

fn meta_path(key: &str) -> String {
    join_path(CACHE_DIR, &format!("{}{}{}", META_PREFIX, key, META_SUFFIX))
}

/// Key named by a file in the cache namespace
fn key_of(name: &str) -> &str {
    name.strip_prefix(META_PREFIX)
        .and_then(|rest| rest.strip_suffix(META_SUFFIX))
        .unwrap_or(name)
}

fn fmt_ms(ms: u32) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(ms as u64))
}

/// Expiring key/value cache
pub struct CacheService<S: Storage> {
    store: PersistentStore<S>,
    clock: Arc<dyn MonotonicClock>,
    config: CacheConfig,
}

impl<S: Storage> CacheService<S> {
    pub fn new(storage: S, clock: Arc<dyn MonotonicClock>) -> Self {
        Self::with_config(storage, clock, CacheConfig::default())
    }

    pub fn with_config(storage: S, clock: Arc<dyn MonotonicClock>, config: CacheConfig) -> Self {
        CacheService {
            store: PersistentStore::new(storage),
            clock,
            config,
        }
    }

    /// Mount storage and prepare the namespace.
    ///
    /// A failure leaves the cache usable but empty: reads miss and writes
    /// report `MountFailure`.
    pub fn init(&mut self) -> KestrelResult<()> {
        self.store.mount()?;
        self.store.ensure_dir(CACHE_DIR)?;
        info!(
            default_ttl = %fmt_ms(self.config.default_ttl_ms),
            entries = self.count(),
            "cache ready"
        );
        Ok(())
    }

    pub fn is_ready(&self) -> bool {
        self.store.is_mounted()
    }

    pub fn set_default_ttl(&mut self, ttl_ms: u32) {
        self.config.default_ttl_ms = ttl_ms;
    }

    pub fn default_ttl(&self) -> u32 {
        self.config.default_ttl_ms
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Value for `key` if present and live. Expired entries are evicted.
    pub fn get(&self, key: &str) -> Option<Vec<u8>> {
        self.live_remaining(key)?;
        match self.store.read(&value_path(key)) {
            Ok(value) => Some(value),
            Err(e) => {
                if !e.is_absent() {
                    warn!(key, error = %e, "cache value unreadable");
                }
                None
            }
        }
    }

    /// Copy a live value into `buf`, truncating to its length.
    /// Returns the number of bytes copied.
    pub fn get_into(&self, key: &str, buf: &mut [u8]) -> Option<usize> {
        let value = self.get(key)?;
        let n = value.len().min(buf.len());
        buf[..n].copy_from_slice(&value[..n]);
        Some(n)
    }

    /// Store `value` for `ttl_ms` milliseconds; zero selects the default TTL.
    ///
    /// The old expiry record is dropped before the value is replaced, so a
    /// failure part way through leaves an entry that reads as expired.
    pub fn set(&self, key: &str, value: &[u8], ttl_ms: u32) -> KestrelResult<()> {
        validate_key(key)?;
        if value.len() > self.config.max_value_len {
            return Err(KestrelError::ValueTooLarge {
                len: value.len(),
                max: self.config.max_value_len,
            });
        }
        let ttl = if ttl_ms == 0 {
            self.config.default_ttl_ms
        } else {
            ttl_ms
        };
        if ttl == 0 || ttl > HALF_RANGE {
            return Err(KestrelError::InvalidTtl(ttl));
        }

        let expiry = self.clock.now().wrapping_add(ttl);
        let meta = meta_path(key);

        self.store.remove_if_exists(&meta)?;
        self.store.write_record(&value_path(key), value)?;
        self.store.write_record(&meta, &expiry.to_le_bytes())?;

        debug!(key, bytes = value.len(), ttl = %fmt_ms(ttl), "cache set");
        Ok(())
    }

    /// Is `key` present and live? Expired entries are evicted.
    pub fn has(&self, key: &str) -> bool {
        self.live_remaining(key).is_some() && self.store.exists(&value_path(key))
    }

    /// Delete both records of `key`. Absent records count as deleted.
    pub fn remove(&self, key: &str) -> bool {
        if validate_key(key).is_err() {
            return false;
        }
        self.evict(key)
    }

    /// Milliseconds until `key` expires, `None` if absent or expired
    pub fn ttl(&self, key: &str) -> Option<u32> {
        let remaining = self.live_remaining(key)?;
        self.store.exists(&value_path(key)).then_some(remaining)
    }

    /// Evict every expired or incomplete entry. Returns how many were removed.
    pub fn cleanup(&self) -> usize {
        let names = match self.store.list(CACHE_DIR) {
            Ok(names) => names,
            Err(e) => {
                debug!(error = %e, "cache cleanup skipped");
                return 0;
            }
        };

        let keys: BTreeSet<&str> = names.iter().map(|name| key_of(name)).collect();
        let now = self.clock.now();
        let mut evicted = 0;

        for key in keys {
            let live = self.remaining_at(key, now).is_ok() && self.store.exists(&value_path(key));
            if !live && self.evict(key) {
                evicted += 1;
            }
        }

        if evicted > 0 {
            info!(evicted, "cache cleanup");
        }
        evicted
    }

    /// Delete every entry regardless of expiry. Returns the number of files removed.
    pub fn clear(&self) -> usize {
        let names = self.store.list(CACHE_DIR).unwrap_or_default();
        let mut removed = 0;
        for name in &names {
            match self.store.remove_if_exists(&join_path(CACHE_DIR, name)) {
                Ok(()) => removed += 1,
                Err(e) => warn!(file = %name, error = %e, "cache clear failed"),
            }
        }
        debug!(removed, "cache cleared");
        removed
    }

    /// Stored value records, live or not
    pub fn count(&self) -> usize {
        self.store
            .list(CACHE_DIR)
            .map(|names| names.iter().filter(|n| !n.starts_with(META_PREFIX)).count())
            .unwrap_or(0)
    }

    /// Remaining TTL of a live entry. Expired entries are evicted on the way.
    fn live_remaining(&self, key: &str) -> Option<u32> {
        match self.remaining_at(key, self.clock.now()) {
            Ok(remaining) => Some(remaining),
            Err(KestrelError::Expired(_)) => {
                debug!(key, "cache entry expired");
                self.evict(key);
                None
            }
            Err(_) => None,
        }
    }

    fn remaining_at(&self, key: &str, now: Millis) -> KestrelResult<u32> {
        validate_key(key)?;
        let bytes = match self.store.read(&meta_path(key)) {
            Ok(bytes) => bytes,
            // A value without an expiry record is treated as expired.
            Err(e) if e.is_absent() && self.store.exists(&value_path(key)) => {
                return Err(KestrelError::Expired(key.to_string()));
            }
            Err(e) => return Err(e),
        };
        let raw: [u8; 4] = bytes
            .get(..4)
            .and_then(|b| b.try_into().ok())
            .ok_or_else(|| KestrelError::Expired(key.to_string()))?;

        now.remaining_until(Millis::from_le_bytes(raw))
            .ok_or_else(|| KestrelError::Expired(key.to_string()))
    }

    fn evict(&self, key: &str) -> bool {
        let value = self.store.remove_if_exists(&value_path(key));
        let meta = self.store.remove_if_exists(&meta_path(key));
        value.is_ok() && meta.is_ok()
    }
}
