//! End-to-end scenarios
//!
//! Each scenario drives a complete device through `tick` and checks a
//! property that spans more than one service.

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use proptest::prelude::*;

    use kestrel_bus::{handler, EVENT_QUEUE_SIZE, MAX_SUBSCRIBERS};
    use kestrel_core::{Event, EventKind, KestrelError, ManualClock, Millis};
    use kestrel_runtime::{Device, DeviceConfig};
    use kestrel_store::{FsStorage, CONFIG_TEMP_FILE};
    use kestrel_time::{FixedWallClock, WallClock};
    use kestrel_transport::{LinkState, ScriptedTransport};

    use crate::{DeviceHarness, EventLog};

    const UTC_NOW: i64 = 1_709_098_200;

    #[test]
    fn test_cache_default_ttl_then_expiry() {
        let h = DeviceHarness::offline();
        let cache = h.device.cache();

        cache.set("weather", b"sunny", 0).unwrap();
        assert_eq!(cache.ttl("weather"), Some(3_600_000));

        h.advance(3_599_999);
        assert_eq!(cache.get("weather").as_deref(), Some(&b"sunny"[..]));
        assert_eq!(cache.ttl("weather"), Some(1));

        h.advance(1);
        assert!(cache.get("weather").is_none());
        assert!(!cache.has("weather"));
        assert_eq!(cache.count(), 0);
    }

    #[test]
    fn test_cache_across_counter_wrap() {
        let config = DeviceConfig::default();
        let h = DeviceHarness::build(config, Millis(u32::MAX - 1_000), false);
        let cache = h.device.cache();

        cache.set("forecast", b"rain", 5_000).unwrap();
        cache.set("alert", b"wind", 500).unwrap();

        h.advance(3_000);
        assert_eq!(h.now(), Millis(1_999));
        assert_eq!(cache.ttl("forecast"), Some(2_000));

        assert_eq!(cache.cleanup(), 1);
        assert_eq!(cache.count(), 1);
        assert!(!cache.has("alert"));

        h.advance(2_000);
        assert!(cache.get("forecast").is_none());
    }

    #[test]
    fn test_cache_sweep_runs_from_tick() {
        let config = DeviceConfig {
            cache_cleanup_interval_ms: 10_000,
            ..DeviceConfig::default()
        };
        let mut h = DeviceHarness::build(config, Millis::ZERO, false);

        for i in 0..5 {
            let key = format!("sensor{i}");
            h.device.cache().set(&key, b"21.5", 1_000 * (i + 1)).unwrap();
        }
        h.device.cache().set("keep", b"x", 60_000).unwrap();

        h.run(10, 1_000);
        assert_eq!(h.device.stats().cache_evictions, 5);
        assert_eq!(h.device.cache().count(), 1);
        assert!(h.device.cache().has("keep"));
    }

    #[test]
    fn test_config_write_is_atomic() {
        let mut h = DeviceHarness::offline();
        h.device.config_mut().set("city", "Seoul").unwrap();
        h.device.config_mut().set_int("interval", 30).unwrap();

        h.storage.fail_renames(true);
        let err = h.device.config_mut().set("city", "Busan").unwrap_err();
        assert!(matches!(err, KestrelError::RenameFailure { .. }));
        assert_eq!(h.device.config().get("city").as_deref(), Some("Seoul"));
        assert!(h.storage.raw(CONFIG_TEMP_FILE).is_none());

        // Reboot on the same flash
        h.storage.clear_faults();
        let rebooted = DeviceHarness::build_on(
            h.storage.clone(),
            DeviceConfig::default(),
            Millis::ZERO,
            false,
        );
        let config = rebooted.device.config();
        assert!(config.is_loaded());
        assert_eq!(config.get("city").as_deref(), Some("Seoul"));
        assert_eq!(config.get_int("interval", 0), 30);
    }

    #[test]
    fn test_torn_config_write_recovered_on_boot() {
        let mut h = DeviceHarness::offline();
        h.device.config_mut().set("city", "Seoul").unwrap();

        // Power lost after the temp write, before the rename
        h.storage.put_raw(CONFIG_TEMP_FILE, br#"{"city":"Bu"#);

        let rebooted =
            DeviceHarness::build_on(h.storage.clone(), DeviceConfig::default(), Millis::ZERO, false);
        assert_eq!(rebooted.device.config().get("city").as_deref(), Some("Seoul"));
        assert!(h.storage.raw(CONFIG_TEMP_FILE).is_none());
    }

    #[test]
    fn test_queue_rejects_beyond_capacity() {
        let mut h = DeviceHarness::offline();
        let log = h.record(EventKind::SensorUpdated).unwrap();

        for _ in 0..EVENT_QUEUE_SIZE {
            h.device.bus_mut().emit(EventKind::SensorUpdated).unwrap();
        }
        assert!(matches!(
            h.device.bus_mut().emit(EventKind::SensorUpdated),
            Err(KestrelError::CapacityExceeded(_))
        ));
        assert_eq!(h.device.bus().stats().rejected, 1);

        h.tick();
        assert_eq!(log.len(), EVENT_QUEUE_SIZE);
        assert_eq!(h.device.bus().pending(), 0);

        // Room again after the drain
        h.device.bus_mut().emit(EventKind::SensorUpdated).unwrap();
    }

    #[test]
    fn test_subscriber_limits() {
        let mut h = DeviceHarness::offline();
        let logs: Vec<EventLog> = (0..MAX_SUBSCRIBERS)
            .map(|_| h.record(EventKind::WeatherUpdated).unwrap())
            .collect();

        assert!(matches!(
            h.record(EventKind::WeatherUpdated),
            Err(KestrelError::CapacityExceeded(_))
        ));

        let shared = logs[0].handler();
        let bus = h.device.bus_mut();
        bus.subscribe(EventKind::SensorUpdated, shared.clone()).unwrap();
        assert!(matches!(
            bus.subscribe(EventKind::SensorUpdated, shared.clone()),
            Err(KestrelError::DuplicateSubscription(_))
        ));
        bus.unsubscribe(EventKind::SensorUpdated, &shared);
        bus.subscribe(EventKind::SensorUpdated, shared.clone()).unwrap();

        bus.emit(EventKind::WeatherUpdated).unwrap();
        h.tick();
        assert!(logs.iter().all(|log| log.len() == 1));
    }

    #[test]
    fn test_sync_retry_backoff_then_success() {
        let mut h = DeviceHarness::online();
        let synced = h.record(EventKind::TimeSynced).unwrap();

        // First attempt on the first tick; the server is silent
        h.tick();
        assert_eq!(h.transport.sent_count(), 1);
        assert!(!h.device.time().is_synced());
        assert_eq!(h.now(), Millis(1_000));

        // Nothing more until the retry interval has passed
        h.run(28, 1_000);
        assert_eq!(h.transport.sent_count(), 1);
        assert!(matches!(
            h.device.sync_now(),
            Err(KestrelError::SyncTooSoon { remaining_ms: 1_000 })
        ));

        h.serve_time(UTC_NOW);
        h.run(1, 1_000);
        assert_eq!(h.transport.sent_count(), 2);
        assert!(h.device.time().is_synced());
        assert_eq!(h.device.stats().sync_attempts, 2);
        assert_eq!(h.device.stats().syncs_completed, 1);

        assert_eq!(h.device.time().formatted_date(), "2024-02-28");
        assert_eq!(h.device.time().formatted_time(), "14:30:00");

        assert!(synced.is_empty());
        h.tick();
        assert_eq!(synced.kinds(), vec![EventKind::TimeSynced]);
    }

    #[test]
    fn test_resync_after_interval() {
        let mut h = DeviceHarness::online();
        h.serve_time(UTC_NOW);
        h.tick();
        assert!(h.device.time().is_synced());
        let first = h.device.time().last_sync_time();

        h.run(35, 100_000);
        assert_eq!(h.transport.sent_count(), 1);

        h.run(1, 100_000);
        assert_eq!(h.transport.sent_count(), 2);
        assert_ne!(h.device.time().last_sync_time(), first);
    }

    #[test]
    fn test_offline_device_waits_for_link() {
        let mut h = DeviceHarness::offline();
        h.serve_time(UTC_NOW);

        h.run(50, 1_000);
        assert_eq!(h.transport.sent_count(), 0);
        assert!(matches!(h.device.sync_now(), Err(KestrelError::NotConnected)));

        h.link.set(true);
        h.tick();
        assert!(h.device.time().is_synced());
        assert_eq!(h.wall.epoch_seconds(), UTC_NOW + 9 * 3_600);
    }

    #[test]
    fn test_time_synced_handler_chains_follow_up() {
        let mut h = DeviceHarness::online();
        let weather = h.record(EventKind::WeatherUpdated).unwrap();
        let refresh = handler(|_event, dispatch| {
            dispatch.publish(Event::new(EventKind::WeatherUpdated))?;
            Ok(())
        });
        h.device
            .bus_mut()
            .subscribe(EventKind::TimeSynced, refresh)
            .unwrap();
        h.serve_time(UTC_NOW);

        h.tick();
        assert_eq!(h.device.bus().pending(), 1);

        h.tick();
        assert!(weather.is_empty());
        assert_eq!(h.device.bus().pending(), 1);

        h.tick();
        assert_eq!(weather.len(), 1);
    }

    #[test]
    fn test_state_survives_restart_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let clock = ManualClock::new(Millis(0));
        let boot = |clock: &ManualClock| {
            let mut device = Device::new(
                FsStorage::new(dir.path()),
                ScriptedTransport::with_link(LinkState::disconnected()),
                Arc::new(clock.clone()),
                Arc::new(FixedWallClock::default()),
                &DeviceConfig::default(),
            );
            device.start();
            device
        };

        let mut device = boot(&clock);
        assert!(!device.is_degraded());
        device.config_mut().set_bool("metric", true).unwrap();
        device.cache().set("weather", b"{\"temp\":3}", 10_000).unwrap();
        drop(device);

        clock.advance(4_000);
        let device = boot(&clock);
        assert!(device.config().get_bool("metric", false));
        assert_eq!(device.cache().ttl("weather"), Some(6_000));
        assert!(dir.path().join("config/device.json").exists());
        assert!(!dir.path().join("config/device.tmp").exists());
    }

    fn arb_kinds() -> impl Strategy<Value = Vec<EventKind>> {
        prop::collection::vec(
            (0u8..EventKind::COUNT as u8).prop_filter_map("kind", EventKind::from_byte),
            0..=EVENT_QUEUE_SIZE,
        )
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_delivery_preserves_publish_order(kinds in arb_kinds()) {
            let mut h = DeviceHarness::offline();
            let log = EventLog::default();
            let recorder = log.handler();
            for kind in EventKind::ALL {
                h.device.bus_mut().subscribe(kind, recorder.clone()).unwrap();
            }

            for kind in &kinds {
                h.device.bus_mut().emit(*kind).unwrap();
            }
            h.tick();

            prop_assert_eq!(log.kinds(), kinds);
        }
    }
}
