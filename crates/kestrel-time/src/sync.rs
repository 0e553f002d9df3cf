//! Periodic network time synchronization
//!
//! State machine: `Idle -> Syncing -> {Synced, Idle}` with
//! `Synced -> Syncing` on periodic resync. Transitions are driven by the
//! monotonic clock and by transport replies; transport errors only ever
//! change internal state.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, warn};

use kestrel_bus::EventBus;
use kestrel_core::{Event, EventKind, KestrelError, KestrelResult, Millis, MonotonicClock};
use kestrel_transport::DatagramTransport;

use crate::format::{format_date, format_date_time, format_time, DateTimeStyle};
use crate::ntp::{self, NTP_PACKET_SIZE, NTP_PORT};
use crate::WallClock;

/// Synchronizer tuning
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SyncConfig {
    /// Remote time source host
    pub server: String,
    pub port: u16,
    /// Local port bound for the exchange; zero picks an ephemeral port
    pub local_port: u16,
    /// Time between successful synchronizations
    pub resync_interval_ms: u32,
    /// Time between attempts while unsynchronized
    pub retry_interval_ms: u32,
    /// Longest an attempt may stay in `Syncing`, checked every tick
    pub sync_timeout_ms: u32,
    /// Length of one reply polling step
    pub poll_step_ms: u32,
    /// Polling steps per attempt; zero waits for the reply across ticks
    pub poll_steps: u32,
    /// Added to UTC before setting the wall clock
    pub timezone_offset_secs: i32,
    pub date_time_style: DateTimeStyle,
}

impl Default for SyncConfig {
    fn default() -> Self {
        SyncConfig {
            server: "pool.ntp.org".into(),
            port: NTP_PORT,
            local_port: 0,
            resync_interval_ms: 3_600_000,
            retry_interval_ms: 30_000,
            sync_timeout_ms: 15_000,
            poll_step_ms: 100,
            poll_steps: 10,
            timezone_offset_secs: 9 * 3_600,
            date_time_style: DateTimeStyle::Korean,
        }
    }
}

impl SyncConfig {
    /// Upper bound of the blocking reply wait
    pub fn response_timeout_ms(&self) -> u32 {
        self.poll_step_ms.saturating_mul(self.poll_steps)
    }
}

/// Synchronizer state
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncState {
    /// Not synchronized and no attempt in flight
    Idle,
    /// Request sent, reply outstanding
    Syncing,
    /// Synchronized at least once and no attempt in flight
    Synced,
}

/// Result of a synchronization attempt
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum SyncOutcome {
    /// Wall clock set to these local epoch seconds
    Synced { epoch_seconds: i64 },
    /// Request sent; the reply is collected on later ticks
    Pending,
    /// No acceptable reply within the bound
    TimedOut,
    /// The transport could not open or send
    TransportFailed,
}

fn fmt_ms(ms: u32) -> humantime::FormattedDuration {
    humantime::format_duration(Duration::from_millis(ms as u64))
}

/// Keeps the wall clock set from a remote time source
pub struct TimeSynchronizer<T: DatagramTransport> {
    transport: T,
    clock: Arc<dyn MonotonicClock>,
    wall: Arc<dyn WallClock>,
    config: SyncConfig,
    initialized: bool,
    synced: bool,
    syncing: bool,
    /// Transmit timestamp of the outstanding request
    nonce: Option<u64>,
    last_success: Option<Millis>,
    last_attempt: Option<Millis>,
    last_outcome: Option<SyncOutcome>,
    attempts: u64,
}

impl<T: DatagramTransport> TimeSynchronizer<T> {
    pub fn new(transport: T, clock: Arc<dyn MonotonicClock>, wall: Arc<dyn WallClock>) -> Self {
        Self::with_config(transport, clock, wall, SyncConfig::default())
    }

    pub fn with_config(
        transport: T,
        clock: Arc<dyn MonotonicClock>,
        wall: Arc<dyn WallClock>,
        config: SyncConfig,
    ) -> Self {
        TimeSynchronizer {
            transport,
            clock,
            wall,
            config,
            initialized: false,
            synced: false,
            syncing: false,
            nonce: None,
            last_success: None,
            last_attempt: None,
            last_outcome: None,
            attempts: 0,
        }
    }

    /// Reset to `Idle`; the first sync happens once the network is up
    pub fn init(&mut self) {
        self.initialized = true;
        self.synced = false;
        self.syncing = false;
        self.nonce = None;
        self.last_success = None;
        self.last_attempt = None;
        self.last_outcome = None;
        info!(
            server = %self.config.server,
            resync = %fmt_ms(self.config.resync_interval_ms),
            retry = %fmt_ms(self.config.retry_interval_ms),
            "time synchronizer ready"
        );
    }

    /// Scheduler hook. Starts an attempt when one is due, collects a
    /// pending reply, and enforces the sync timeout.
    ///
    /// Returns the outcome of any attempt that started or finished.
    pub fn tick(&mut self, bus: &mut EventBus) -> Option<SyncOutcome> {
        if !self.initialized {
            return None;
        }
        let now = self.clock.now();
        let mut outcome = None;

        if self.syncing {
            if self.collect_reply(bus) {
                outcome = self.last_outcome;
            }
        } else if self.sync_due(now) && self.transport.is_connected() {
            match self.sync_now(bus) {
                Ok(result) => outcome = Some(result),
                Err(e) => debug!(error = %e, "scheduled sync skipped"),
            }
        }

        if let Some(started) = self.last_attempt.filter(|_| self.syncing) {
            let elapsed = self.clock.now().elapsed_since(started);
            if elapsed >= self.config.sync_timeout_ms {
                warn!(elapsed = %fmt_ms(elapsed), "time sync timeout");
                self.abandon(SyncOutcome::TimedOut);
                outcome = Some(SyncOutcome::TimedOut);
            }
        }

        outcome
    }

    /// Start an attempt now.
    ///
    /// Rejected while uninitialized, offline, already syncing, or while
    /// unsynchronized with the retry interval still running.
    pub fn sync_now(&mut self, bus: &mut EventBus) -> KestrelResult<SyncOutcome> {
        if !self.initialized {
            return Err(KestrelError::NotInitialized);
        }
        if !self.transport.is_connected() {
            debug!("network not connected, skipping sync");
            return Err(KestrelError::NotConnected);
        }
        if self.syncing {
            return Err(KestrelError::SyncInProgress);
        }
        if let (false, Some(last)) = (self.synced, self.last_attempt) {
            let elapsed = self.clock.now().elapsed_since(last);
            if elapsed < self.config.retry_interval_ms {
                return Err(KestrelError::SyncTooSoon {
                    remaining_ms: self.config.retry_interval_ms - elapsed,
                });
            }
        }

        info!(server = %self.config.server, "starting time sync");
        self.syncing = true;
        self.last_attempt = Some(self.clock.now());
        self.attempts += 1;

        if let Err(e) = self.send_request() {
            warn!(error = %e, "time sync request failed");
            self.transport.close();
            self.abandon(SyncOutcome::TransportFailed);
            return Ok(SyncOutcome::TransportFailed);
        }

        if self.config.poll_steps == 0 {
            self.last_outcome = Some(SyncOutcome::Pending);
            return Ok(SyncOutcome::Pending);
        }

        for _ in 0..self.config.poll_steps {
            self.clock.delay(self.config.poll_step_ms);
            if self.collect_reply(bus) {
                return Ok(self.last_outcome.unwrap_or(SyncOutcome::TimedOut));
            }
        }

        warn!(
            waited = %fmt_ms(self.config.response_timeout_ms()),
            "no time sync reply"
        );
        self.abandon(SyncOutcome::TimedOut);
        Ok(SyncOutcome::TimedOut)
    }

    fn sync_due(&self, now: Millis) -> bool {
        let retry_elapsed = self
            .last_attempt
            .map_or(true, |last| now.has_elapsed(last, self.config.retry_interval_ms));

        if self.synced {
            let resync_elapsed = self
                .last_success
                .map_or(true, |last| now.has_elapsed(last, self.config.resync_interval_ms));
            resync_elapsed && retry_elapsed
        } else {
            retry_elapsed
        }
    }

    fn send_request(&mut self) -> KestrelResult<()> {
        let nonce: u64 = rand::random();
        let request = ntp::build_request(nonce);

        self.transport.open(self.config.local_port)?;
        self.transport
            .send(&self.config.server, self.config.port, &request)?;
        self.nonce = Some(nonce);
        Ok(())
    }

    /// Check for a reply without blocking. Returns whether the attempt finished.
    fn collect_reply(&mut self, bus: &mut EventBus) -> bool {
        let Some(nonce) = self.nonce else {
            return false;
        };
        let size = self.transport.poll_incoming();
        if size == 0 {
            return false;
        }

        let mut buf = [0u8; NTP_PACKET_SIZE];
        let read = self.transport.receive(&mut buf);
        if size < NTP_PACKET_SIZE || read < NTP_PACKET_SIZE {
            debug!(size, "ignoring short datagram");
            return false;
        }

        match ntp::parse_reply(&buf, nonce) {
            Ok(reply) => {
                self.complete(reply.unix_seconds(), bus);
                true
            }
            Err(e) => {
                warn!(error = %e, "rejected time reply");
                false
            }
        }
    }

    fn complete(&mut self, unix_seconds: i64, bus: &mut EventBus) {
        let local = unix_seconds + self.config.timezone_offset_secs as i64;
        self.wall.set_epoch_seconds(local);

        self.transport.close();
        self.synced = true;
        self.syncing = false;
        self.nonce = None;
        self.last_success = Some(self.clock.now());
        self.last_outcome = Some(SyncOutcome::Synced {
            epoch_seconds: local,
        });

        info!(local_time = %self.formatted_date_time(), "time synced");

        if let Err(e) = bus.publish(Event::new(EventKind::TimeSynced)) {
            warn!(error = %e, "could not publish time_synced");
        }
    }

    fn abandon(&mut self, outcome: SyncOutcome) {
        if self.nonce.take().is_some() {
            self.transport.close();
        }
        self.syncing = false;
        self.last_outcome = Some(outcome);
    }

    /// Has the wall clock been set at least once?
    pub fn is_synced(&self) -> bool {
        self.synced
    }

    pub fn state(&self) -> SyncState {
        if self.syncing {
            SyncState::Syncing
        } else if self.synced {
            SyncState::Synced
        } else {
            SyncState::Idle
        }
    }

    /// Local epoch seconds. Meaningless until `is_synced`.
    pub fn timestamp(&self) -> i64 {
        self.wall.epoch_seconds()
    }

    /// `HH:MM:SS`
    pub fn formatted_time(&self) -> String {
        format_time(&self.wall.calendar())
    }

    /// `YYYY-MM-DD`
    pub fn formatted_date(&self) -> String {
        format_date(&self.wall.calendar())
    }

    /// Date and time in the configured style
    pub fn formatted_date_time(&self) -> String {
        self.formatted_date_time_in(self.config.date_time_style)
    }

    pub fn formatted_date_time_in(&self, style: DateTimeStyle) -> String {
        format_date_time(&self.wall.calendar(), style)
    }

    /// Monotonic instant of the last successful sync
    pub fn last_sync_time(&self) -> Option<Millis> {
        self.last_success
    }

    pub fn last_attempt(&self) -> Option<Millis> {
        self.last_attempt
    }

    pub fn last_outcome(&self) -> Option<SyncOutcome> {
        self.last_outcome
    }

    /// Attempts started since creation
    pub fn attempts(&self) -> u64 {
        self.attempts
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }
}
