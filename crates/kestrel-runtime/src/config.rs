//! Device configuration file
//!
//! A JSON document whose every field is optional; omitted fields take the
//! firmware defaults. Sections convert into the per-service configs.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use kestrel_bus::{BusConfig, EVENT_QUEUE_SIZE, MAX_SUBSCRIBERS};
use kestrel_core::{KestrelError, KestrelResult};
use kestrel_store::CacheConfig;
use kestrel_time::{DateTimeStyle, SyncConfig};

use crate::LogFormat;

/// Top-level device configuration
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceConfig {
    /// Host directory standing in for the flash filesystem
    pub storage_root: PathBuf,
    pub log_format: LogFormat,
    /// Driver loop period
    pub tick_interval_ms: u64,
    /// How often expired cache entries are swept
    pub cache_cleanup_interval_ms: u32,
    pub bus: BusSection,
    pub cache: CacheSection,
    pub sync: SyncSection,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            storage_root: PathBuf::from("./flash"),
            log_format: LogFormat::default(),
            tick_interval_ms: 100,
            cache_cleanup_interval_ms: 600_000,
            bus: BusSection::default(),
            cache: CacheSection::default(),
            sync: SyncSection::default(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct BusSection {
    pub queue_capacity: usize,
    pub max_subscribers: usize,
}

impl Default for BusSection {
    fn default() -> Self {
        BusSection {
            queue_capacity: EVENT_QUEUE_SIZE,
            max_subscribers: MAX_SUBSCRIBERS,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheSection {
    pub default_ttl_ms: u32,
    pub max_value_len: usize,
}

impl Default for CacheSection {
    fn default() -> Self {
        let defaults = CacheConfig::default();
        CacheSection {
            default_ttl_ms: defaults.default_ttl_ms,
            max_value_len: defaults.max_value_len,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSection {
    pub server: String,
    pub port: u16,
    pub local_port: u16,
    pub resync_interval_ms: u32,
    pub retry_interval_ms: u32,
    pub sync_timeout_ms: u32,
    pub poll_step_ms: u32,
    pub poll_steps: u32,
    pub timezone_offset_secs: i32,
    pub date_style: DateTimeStyle,
}

impl Default for SyncSection {
    fn default() -> Self {
        let defaults = SyncConfig::default();
        SyncSection {
            server: defaults.server,
            port: defaults.port,
            local_port: defaults.local_port,
            resync_interval_ms: defaults.resync_interval_ms,
            retry_interval_ms: defaults.retry_interval_ms,
            sync_timeout_ms: defaults.sync_timeout_ms,
            poll_step_ms: defaults.poll_step_ms,
            poll_steps: defaults.poll_steps,
            timezone_offset_secs: defaults.timezone_offset_secs,
            date_style: defaults.date_time_style,
        }
    }
}

impl From<&BusSection> for BusConfig {
    fn from(s: &BusSection) -> Self {
        BusConfig {
            queue_capacity: s.queue_capacity,
            max_subscribers: s.max_subscribers,
        }
    }
}

impl From<&CacheSection> for CacheConfig {
    fn from(s: &CacheSection) -> Self {
        CacheConfig {
            default_ttl_ms: s.default_ttl_ms,
            max_value_len: s.max_value_len,
        }
    }
}

impl From<&SyncSection> for SyncConfig {
    fn from(s: &SyncSection) -> Self {
        SyncConfig {
            server: s.server.clone(),
            port: s.port,
            local_port: s.local_port,
            resync_interval_ms: s.resync_interval_ms,
            retry_interval_ms: s.retry_interval_ms,
            sync_timeout_ms: s.sync_timeout_ms,
            poll_step_ms: s.poll_step_ms,
            poll_steps: s.poll_steps,
            timezone_offset_secs: s.timezone_offset_secs,
            date_time_style: s.date_style,
        }
    }
}

impl DeviceConfig {
    pub fn from_json_str(text: &str) -> KestrelResult<Self> {
        serde_json::from_str(text).map_err(|e| KestrelError::ParseFailure {
            path: "<inline>".into(),
            reason: e.to_string(),
        })
    }

    pub fn from_json_file(path: impl AsRef<Path>) -> KestrelResult<Self> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                KestrelError::NotFound(path.display().to_string())
            } else {
                KestrelError::ReadFailure {
                    path: path.display().to_string(),
                    reason: e.to_string(),
                }
            }
        })?;
        serde_json::from_str(&text).map_err(|e| KestrelError::ParseFailure {
            path: path.display().to_string(),
            reason: e.to_string(),
        })
    }

    pub fn bus_config(&self) -> BusConfig {
        (&self.bus).into()
    }

    pub fn cache_config(&self) -> CacheConfig {
        (&self.cache).into()
    }

    pub fn sync_config(&self) -> SyncConfig {
        (&self.sync).into()
    }
}
