//! Device - service wiring and the cooperative tick

use std::sync::Arc;
use std::time::{Duration, Instant};

use tracing::{debug, info, warn};

use kestrel_bus::EventBus;
use kestrel_core::{KestrelResult, Millis, MonotonicClock, SystemClock};
use kestrel_store::{CacheService, ConfigService, FsStorage, Storage};
use kestrel_time::{SyncOutcome, SystemWallClock, TimeSynchronizer, WallClock};
use kestrel_transport::{DatagramTransport, LinkState, UdpTransport};

use crate::DeviceConfig;

#[derive(Clone, Debug, Default)]
pub struct RuntimeStats {
    pub ticks: u64,
    pub events_dispatched: u64,
    pub sync_attempts: u64,
    pub syncs_completed: u64,
    pub cache_evictions: u64,
    pub last_tick_duration: Duration,
}

/// The device: one instance of each service, advanced by `tick`
pub struct Device<S: Storage + Clone, T: DatagramTransport> {
    clock: Arc<dyn MonotonicClock>,
    bus: EventBus,
    cache: CacheService<S>,
    config: ConfigService<S>,
    time: TimeSynchronizer<T>,
    cache_cleanup_interval_ms: u32,
    last_cleanup: Millis,
    started: bool,
    stats: RuntimeStats,
}

impl Device<FsStorage, UdpTransport> {
    /// Device on the host: flash under `storage_root`, real UDP, host clocks
    pub fn host(config: &DeviceConfig, link: LinkState) -> Self {
        Device::new(
            FsStorage::new(&config.storage_root),
            UdpTransport::new(link),
            Arc::new(SystemClock::new()),
            Arc::new(SystemWallClock::new()),
            config,
        )
    }
}

impl<S: Storage + Clone, T: DatagramTransport> Device<S, T> {
    pub fn new(
        storage: S,
        transport: T,
        clock: Arc<dyn MonotonicClock>,
        wall: Arc<dyn WallClock>,
        config: &DeviceConfig,
    ) -> Self {
        Device {
            bus: EventBus::with_config(clock.clone(), config.bus_config()),
            cache: CacheService::with_config(storage.clone(), clock.clone(), config.cache_config()),
            config: ConfigService::new(storage),
            time: TimeSynchronizer::with_config(transport, clock.clone(), wall, config.sync_config()),
            cache_cleanup_interval_ms: config.cache_cleanup_interval_ms,
            last_cleanup: clock.now(),
            clock,
            started: false,
            stats: RuntimeStats::default(),
        }
    }

    /// Initialize every service.
    ///
    /// Storage failures degrade the cache and config to defaults; they do
    /// not stop the device.
    pub fn start(&mut self) {
        self.bus.init();
        if let Err(e) = self.cache.init() {
            warn!(error = %e, "cache unavailable");
        }
        if let Err(e) = self.config.init() {
            warn!(error = %e, "config unavailable");
        }
        self.time.init();
        self.last_cleanup = self.clock.now();
        self.started = true;
        info!(
            degraded = self.is_degraded(),
            cache_cleanup = %humantime::format_duration(Duration::from_millis(
                self.cache_cleanup_interval_ms as u64
            )),
            "device started"
        );
    }

    /// One pass of the cooperative loop
    pub fn tick(&mut self) {
        if !self.started {
            return;
        }
        let start = Instant::now();
        self.stats.ticks += 1;

        // Stage 1: deliver events queued since the last tick
        self.stats.events_dispatched += self.bus.update() as u64;

        // Stage 2: time synchronization
        if let Some(outcome) = self.time.tick(&mut self.bus) {
            self.record_sync(outcome);
        }

        // Stage 3: reclaim expired cache entries
        let now = self.clock.now();
        if now.has_elapsed(self.last_cleanup, self.cache_cleanup_interval_ms) {
            let evicted = self.cache.cleanup();
            self.stats.cache_evictions += evicted as u64;
            self.last_cleanup = now;
            debug!(evicted, "periodic cache cleanup");
        }

        self.stats.last_tick_duration = start.elapsed();
    }

    /// Force a time synchronization attempt
    pub fn sync_now(&mut self) -> KestrelResult<SyncOutcome> {
        let outcome = self.time.sync_now(&mut self.bus)?;
        self.record_sync(outcome);
        Ok(outcome)
    }

    fn record_sync(&mut self, outcome: SyncOutcome) {
        self.stats.sync_attempts = self.time.attempts();
        if let SyncOutcome::Synced { .. } = outcome {
            self.stats.syncs_completed += 1;
        }
    }

    /// Is persistence unavailable?
    pub fn is_degraded(&self) -> bool {
        !self.cache.is_ready() || !self.config.is_ready()
    }

    pub fn is_started(&self) -> bool {
        self.started
    }

    pub fn bus(&self) -> &EventBus {
        &self.bus
    }

    pub fn bus_mut(&mut self) -> &mut EventBus {
        &mut self.bus
    }

    pub fn cache(&self) -> &CacheService<S> {
        &self.cache
    }

    pub fn cache_mut(&mut self) -> &mut CacheService<S> {
        &mut self.cache
    }

    pub fn config(&self) -> &ConfigService<S> {
        &self.config
    }

    pub fn config_mut(&mut self) -> &mut ConfigService<S> {
        &mut self.config
    }

    pub fn time(&self) -> &TimeSynchronizer<T> {
        &self.time
    }

    pub fn clock(&self) -> &Arc<dyn MonotonicClock> {
        &self.clock
    }

    pub fn stats(&self) -> &RuntimeStats {
        &self.stats
    }
}
