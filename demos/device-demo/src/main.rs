//! Kestrel device demo
//!
//! Runs the device on the host: flash under `storage_root`, real NTP over
//! UDP, one tick per `tick_interval_ms` until Ctrl-C.
//!
//! Usage: device-demo [config.json]

use std::time::Duration;

use kestrel_bus::handler;
use kestrel_core::EventKind;
use kestrel_runtime::{init_logging, Device, DeviceConfig};
use kestrel_transport::LinkState;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let config = match std::env::args().nth(1) {
        Some(path) => DeviceConfig::from_json_file(path)?,
        None => DeviceConfig::default(),
    };
    init_logging(config.log_format);

    let mut device = Device::host(&config, LinkState::connected());
    device.start();

    device.bus_mut().subscribe(
        EventKind::TimeSynced,
        handler(|event, _| {
            tracing::info!(at = ?event.timestamp, "wall clock set");
            Ok(())
        }),
    )?;

    // Seed some state so restarts have something to find
    let boots = device.config().get_int("boot_count", 0) + 1;
    if let Err(e) = device.config_mut().set_int("boot_count", boots) {
        tracing::warn!(error = %e, "could not record boot");
    }
    if let Err(e) = device.cache().set("greeting", b"hello from kestrel", 60_000) {
        tracing::warn!(error = %e, "could not seed cache");
    }
    tracing::info!(boots, degraded = device.is_degraded(), "demo running, Ctrl-C to stop");

    let mut ticker = tokio::time::interval(Duration::from_millis(config.tick_interval_ms.max(1)));
    let mut last_reported = None;

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => {
                tracing::warn!("shutdown signal received (SIGINT)");
                break;
            }
            _ = ticker.tick() => {
                // The sync poll blocks for up to a second
                tokio::task::block_in_place(|| device.tick());

                let synced_at = device.time().last_sync_time();
                if synced_at.is_some() && synced_at != last_reported {
                    tracing::info!(now = %device.time().formatted_date_time(), "local time");
                    last_reported = synced_at;
                }
            }
        }
    }

    let stats = device.stats();
    tracing::info!(
        ticks = stats.ticks,
        events = stats.events_dispatched,
        sync_attempts = stats.sync_attempts,
        syncs = stats.syncs_completed,
        evictions = stats.cache_evictions,
        "device stopped"
    );
    Ok(())
}
