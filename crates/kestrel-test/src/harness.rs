//! Simulated device

use std::sync::Arc;

use parking_lot::Mutex;

use kestrel_bus::{handler, EventHandler};
use kestrel_core::{EventKind, KestrelResult, Millis, MonotonicClock, ManualClock};
use kestrel_runtime::{Device, DeviceConfig};
use kestrel_store::MemStorage;
use kestrel_time::{ntp, FixedWallClock};
use kestrel_transport::{LinkState, ScriptedTransport};

/// Harness device type
pub type SimDevice = Device<MemStorage, ScriptedTransport>;

/// A started device plus handles to every collaborator it runs on
pub struct DeviceHarness {
    pub clock: ManualClock,
    pub wall: FixedWallClock,
    pub storage: MemStorage,
    pub transport: ScriptedTransport,
    pub link: LinkState,
    pub device: SimDevice,
}

impl DeviceHarness {
    /// Default configuration, clock at zero, network down
    pub fn offline() -> Self {
        Self::build(DeviceConfig::default(), Millis::ZERO, false)
    }

    /// Default configuration, clock at zero, network up, silent time server
    pub fn online() -> Self {
        Self::build(DeviceConfig::default(), Millis::ZERO, true)
    }

    pub fn build(config: DeviceConfig, start: Millis, online: bool) -> Self {
        Self::build_on(MemStorage::new(), config, start, online)
    }

    /// Build on existing storage, as after a reboot
    pub fn build_on(storage: MemStorage, config: DeviceConfig, start: Millis, online: bool) -> Self {
        let clock = ManualClock::new(start);
        let wall = FixedWallClock::default();
        let link = LinkState::new(online);
        let transport = ScriptedTransport::with_link(link.clone());

        let mut device = Device::new(
            storage.clone(),
            transport.clone(),
            Arc::new(clock.clone()),
            Arc::new(wall.clone()),
            &config,
        );
        device.start();

        DeviceHarness {
            clock,
            wall,
            storage,
            transport,
            link,
            device,
        }
    }

    /// Have the time server answer every request with `unix_seconds`
    pub fn serve_time(&self, unix_seconds: i64) {
        let secs = ntp::ntp_seconds(unix_seconds);
        self.transport
            .set_responder(move |request| ntp::server_reply(request, secs));
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }

    pub fn advance(&self, ms: u32) -> Millis {
        self.clock.advance(ms)
    }

    pub fn tick(&mut self) {
        self.device.tick();
    }

    /// Tick `n` times, advancing the clock by `step_ms` before each tick
    pub fn run(&mut self, n: usize, step_ms: u32) {
        for _ in 0..n {
            self.clock.advance(step_ms);
            self.device.tick();
        }
    }

    /// Subscribe a fresh recorder to `kind`
    pub fn record(&mut self, kind: EventKind) -> KestrelResult<EventLog> {
        let log = EventLog::default();
        self.device.bus_mut().subscribe(kind, log.handler())?;
        Ok(log)
    }
}

/// Delivered event record
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Delivery {
    pub kind: EventKind,
    pub timestamp: Millis,
}

/// Recording subscriber. Clones share the log.
#[derive(Clone, Default)]
pub struct EventLog {
    entries: Arc<Mutex<Vec<Delivery>>>,
}

impl EventLog {
    pub fn handler(&self) -> Arc<dyn EventHandler> {
        let entries = self.entries.clone();
        handler(move |event, _| {
            entries.lock().push(Delivery {
                kind: event.kind,
                timestamp: event.timestamp,
            });
            Ok(())
        })
    }

    pub fn deliveries(&self) -> Vec<Delivery> {
        self.entries.lock().clone()
    }

    pub fn kinds(&self) -> Vec<EventKind> {
        self.entries.lock().iter().map(|d| d.kind).collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}
