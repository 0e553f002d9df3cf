//! Kestrel Store - Durable state for the device services
//!
//! This crate provides:
//! - The durable byte storage interface (`Storage`) with a filesystem
//!   backend and a fault-injecting in-memory backend
//! - `PersistentStore`: record writes and temp-then-rename document writes
//! - `CacheService`: TTL-keyed blobs with wraparound-safe expiry
//! - `ConfigService`: a small string document with atomic read-modify-write

pub mod storage;
pub mod fs;
pub mod mem;
pub mod persist;
pub mod cache;
pub mod config;

pub use storage::*;
pub use fs::FsStorage;
pub use mem::MemStorage;
pub use persist::*;
pub use cache::*;
pub use config::*;
