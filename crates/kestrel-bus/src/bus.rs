//! Event bus - deferred, bounded publish/subscribe
//!
//! `publish` only enqueues. Delivery happens inside `update`, which the
//! scheduler calls once per tick: events are drained FIFO and each one is
//! handed to every live subscriber of its kind before the next is dequeued.
//!
//! Subscribers are kept in a fixed `[kind][slot]` table. Subscribing takes
//! the first vacant slot; unsubscribing vacates the slot without compaction,
//! so delivery order is registration order only until a slot is reused.

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;

use kestrel_core::{
    Event, EventKind, KestrelError, KestrelResult, MonotonicClock, Millis, MAX_EVENT_KINDS,
};

use crate::{EventQueue, EVENT_QUEUE_SIZE};

/// Default subscriber slots per event kind
pub const MAX_SUBSCRIBERS: usize = 4;

/// Error a handler may report; logged and counted, never propagated
pub type HandlerError = Box<dyn std::error::Error + Send + Sync>;

pub type HandlerResult = Result<(), HandlerError>;

/// Event subscriber.
///
/// Handlers carry their own state. A handler may publish follow-up events
/// through `dispatch`; those are delivered on the next `update`.
pub trait EventHandler: Send + Sync {
    fn on_event(&self, event: &Event, dispatch: &mut Dispatch<'_>) -> HandlerResult;
}

impl<F> EventHandler for F
where
    F: Fn(&Event, &mut Dispatch<'_>) -> HandlerResult + Send + Sync,
{
    fn on_event(&self, event: &Event, dispatch: &mut Dispatch<'_>) -> HandlerResult {
        self(event, dispatch)
    }
}

/// Wrap a closure as a shareable handler.
///
/// Keep a clone of the returned `Arc` to unsubscribe later; identity is
/// the allocation, not the closure's code.
pub fn handler<F>(f: F) -> Arc<dyn EventHandler>
where
    F: Fn(&Event, &mut Dispatch<'_>) -> HandlerResult + Send + Sync + 'static,
{
    Arc::new(f)
}

/// Publishing capability handed to handlers during dispatch
pub struct Dispatch<'a> {
    queue: &'a mut EventQueue,
    clock: &'a dyn MonotonicClock,
    stats: &'a mut BusStats,
}

impl Dispatch<'_> {
    /// Queue an event for the next `update`
    pub fn publish(&mut self, mut event: Event) -> KestrelResult<()> {
        event.timestamp = self.clock.now();
        match self.queue.push(event) {
            Ok(()) => {
                self.stats.published += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(pending = self.queue.len(), "event queue full during dispatch");
                Err(e)
            }
        }
    }

    pub fn now(&self) -> Millis {
        self.clock.now()
    }
}

/// Handle returned by `subscribe`
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct SubscriptionHandle {
    pub kind: EventKind,
    pub slot: usize,
}

/// Subscriber table slot
enum Slot {
    Vacant,
    Occupied(Arc<dyn EventHandler>),
}

impl Slot {
    fn holds(&self, handler: &Arc<dyn EventHandler>) -> bool {
        match self {
            Slot::Occupied(existing) => same_handler(existing, handler),
            Slot::Vacant => false,
        }
    }
}

fn same_handler(a: &Arc<dyn EventHandler>, b: &Arc<dyn EventHandler>) -> bool {
    // Compare data pointers only; vtable pointers may differ across codegen units.
    std::ptr::eq(Arc::as_ptr(a) as *const (), Arc::as_ptr(b) as *const ())
}

/// Bus capacities
#[derive(Clone, Debug)]
pub struct BusConfig {
    /// Pending events held between updates
    pub queue_capacity: usize,
    /// Subscriber slots per event kind
    pub max_subscribers: usize,
}

impl Default for BusConfig {
    fn default() -> Self {
        BusConfig {
            queue_capacity: EVENT_QUEUE_SIZE,
            max_subscribers: MAX_SUBSCRIBERS,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct BusStats {
    pub published: u64,
    pub rejected: u64,
    pub dispatched: u64,
    pub handler_failures: u64,
}

/// In-process event bus
pub struct EventBus {
    /// `[kind][slot]`, flattened
    subscribers: Box<[Slot]>,
    slots_per_kind: usize,
    queue: EventQueue,
    clock: Arc<dyn MonotonicClock>,
    initialized: bool,
    stats: BusStats,
}

impl EventBus {
    /// Create a bus with default capacities
    pub fn new(clock: Arc<dyn MonotonicClock>) -> Self {
        Self::with_config(clock, BusConfig::default())
    }

    pub fn with_config(clock: Arc<dyn MonotonicClock>, config: BusConfig) -> Self {
        let slots_per_kind = config.max_subscribers.max(1);
        EventBus {
            subscribers: (0..MAX_EVENT_KINDS * slots_per_kind)
                .map(|_| Slot::Vacant)
                .collect(),
            slots_per_kind,
            queue: EventQueue::with_capacity(config.queue_capacity),
            clock,
            initialized: false,
            stats: BusStats::default(),
        }
    }

    /// Reset the queue and start accepting `update` calls
    pub fn init(&mut self) {
        self.queue.clear();
        self.initialized = true;
        tracing::info!(
            queue_capacity = self.queue.capacity(),
            max_subscribers = self.slots_per_kind,
            "event bus initialized"
        );
    }

    fn row(&self, kind: EventKind) -> KestrelResult<std::ops::Range<usize>> {
        let index = kind.index();
        if index >= MAX_EVENT_KINDS {
            return Err(KestrelError::InvalidEventKind(kind.to_byte()));
        }
        let start = index * self.slots_per_kind;
        Ok(start..start + self.slots_per_kind)
    }

    /// Register `handler` for `kind`.
    ///
    /// Fails if the same handler is already registered for this kind or if
    /// every slot for the kind is taken.
    pub fn subscribe(
        &mut self,
        kind: EventKind,
        handler: Arc<dyn EventHandler>,
    ) -> KestrelResult<SubscriptionHandle> {
        let row = self.row(kind)?;
        let slots = &mut self.subscribers[row];

        if slots.iter().any(|slot| slot.holds(&handler)) {
            return Err(KestrelError::DuplicateSubscription(kind.name()));
        }

        match slots.iter().position(|slot| matches!(slot, Slot::Vacant)) {
            Some(slot) => {
                slots[slot] = Slot::Occupied(handler);
                tracing::debug!(%kind, slot, "subscribed");
                Ok(SubscriptionHandle { kind, slot })
            }
            None => {
                tracing::warn!(%kind, "subscriber table full");
                Err(KestrelError::CapacityExceeded("subscriber table"))
            }
        }
    }

    /// Remove `handler` from `kind`. No-op if it is not registered.
    pub fn unsubscribe(&mut self, kind: EventKind, handler: &Arc<dyn EventHandler>) {
        let Ok(row) = self.row(kind) else {
            return;
        };
        if let Some(slot) = self.subscribers[row]
            .iter_mut()
            .find(|slot| slot.holds(handler))
        {
            *slot = Slot::Vacant;
            tracing::debug!(%kind, "unsubscribed");
        }
    }

    /// Vacate the slot behind `handle`
    pub fn unsubscribe_handle(&mut self, handle: SubscriptionHandle) {
        if let Ok(row) = self.row(handle.kind) {
            if let Some(slot) = self.subscribers[row].get_mut(handle.slot) {
                *slot = Slot::Vacant;
            }
        }
    }

    /// Queue an event. The bus stamps the timestamp; delivery is deferred
    /// to the next `update`.
    pub fn publish(&mut self, mut event: Event) -> KestrelResult<()> {
        self.row(event.kind)?;
        event.timestamp = self.clock.now();
        match self.queue.push(event) {
            Ok(()) => {
                self.stats.published += 1;
                Ok(())
            }
            Err(e) => {
                self.stats.rejected += 1;
                tracing::warn!(pending = self.queue.len(), "event queue full");
                Err(e)
            }
        }
    }

    /// Publish a payload-less event
    pub fn emit(&mut self, kind: EventKind) -> KestrelResult<()> {
        self.publish(Event::new(kind))
    }

    /// Drain the queue, delivering each event to its subscribers.
    ///
    /// Only events queued before the call are delivered; events published
    /// by handlers wait for the next call. Returns the number drained.
    pub fn update(&mut self) -> usize {
        if !self.initialized {
            return 0;
        }

        let pending = self.queue.len();
        let slots_per_kind = self.slots_per_kind;
        let subscribers = &self.subscribers;
        let mut dispatch = Dispatch {
            queue: &mut self.queue,
            clock: self.clock.as_ref(),
            stats: &mut self.stats,
        };
        let mut drained = 0;
        let mut failures = 0;

        for _ in 0..pending {
            let Some(event) = dispatch.queue.pop() else {
                break;
            };
            drained += 1;

            let start = event.kind.index() * slots_per_kind;
            for slot in &subscribers[start..start + slots_per_kind] {
                let Slot::Occupied(handler) = slot else {
                    continue;
                };
                let outcome =
                    catch_unwind(AssertUnwindSafe(|| handler.on_event(&event, &mut dispatch)));
                match outcome {
                    Ok(Ok(())) => {}
                    Ok(Err(e)) => {
                        failures += 1;
                        tracing::warn!(kind = %event.kind, error = %e, "event handler failed");
                    }
                    Err(_) => {
                        failures += 1;
                        tracing::warn!(kind = %event.kind, "event handler panicked");
                    }
                }
            }
            // Payload reference is released here, right after dispatch.
        }

        self.stats.dispatched += drained as u64;
        self.stats.handler_failures += failures;
        drained
    }

    /// Drop every subscriber and every pending event
    pub fn clear(&mut self) {
        for slot in self.subscribers.iter_mut() {
            *slot = Slot::Vacant;
        }
        self.queue.clear();
    }

    pub fn subscriber_count(&self, kind: EventKind) -> usize {
        self.row(kind)
            .map(|row| {
                self.subscribers[row]
                    .iter()
                    .filter(|slot| matches!(slot, Slot::Occupied(_)))
                    .count()
            })
            .unwrap_or(0)
    }

    /// Events waiting for the next `update`
    pub fn pending(&self) -> usize {
        self.queue.len()
    }

    pub fn is_initialized(&self) -> bool {
        self.initialized
    }

    pub fn stats(&self) -> &BusStats {
        &self.stats
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::ManualClock;
    use parking_lot::Mutex;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn new_bus() -> (EventBus, ManualClock) {
        let clock = ManualClock::new(Millis(5_000));
        let mut bus = EventBus::new(Arc::new(clock.clone()));
        bus.init();
        (bus, clock)
    }

    fn counter() -> (Arc<AtomicUsize>, Arc<dyn EventHandler>) {
        let count = Arc::new(AtomicUsize::new(0));
        let seen = count.clone();
        let h = handler(move |_, _| {
            seen.fetch_add(1, Ordering::SeqCst);
            Ok(())
        });
        (count, h)
    }

    #[test]
    fn test_subscribe_publish_deliver() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();

        bus.subscribe(EventKind::WifiConnected, h).unwrap();
        bus.emit(EventKind::WifiConnected).unwrap();

        // Delivery is deferred
        assert_eq!(count.load(Ordering::SeqCst), 0);
        assert_eq!(bus.update(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_only_matching_kind_delivered() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();
        bus.subscribe(EventKind::TimeSynced, h).unwrap();

        bus.emit(EventKind::SensorUpdated).unwrap();
        bus.emit(EventKind::WeatherUpdated).unwrap();
        assert_eq!(bus.update(), 2);
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_update_before_init_is_noop() {
        let clock = ManualClock::default();
        let mut bus = EventBus::new(Arc::new(clock));
        bus.emit(EventKind::TimeSynced).unwrap();
        assert_eq!(bus.update(), 0);
        assert_eq!(bus.pending(), 1);
    }

    #[test]
    fn test_queue_capacity_exceeded() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();
        bus.subscribe(EventKind::SensorUpdated, h).unwrap();

        for _ in 0..EVENT_QUEUE_SIZE {
            bus.emit(EventKind::SensorUpdated).unwrap();
        }
        assert_eq!(
            bus.emit(EventKind::SensorUpdated).unwrap_err(),
            KestrelError::CapacityExceeded("event queue")
        );
        assert_eq!(bus.stats().rejected, 1);

        assert_eq!(bus.update(), EVENT_QUEUE_SIZE);
        assert_eq!(bus.pending(), 0);
        assert_eq!(count.load(Ordering::SeqCst), EVENT_QUEUE_SIZE);
    }

    #[test]
    fn test_subscriber_capacity_and_uniqueness() {
        let (mut bus, _) = new_bus();
        let (_, first) = counter();

        bus.subscribe(EventKind::WifiConnected, first.clone()).unwrap();
        assert_eq!(
            bus.subscribe(EventKind::WifiConnected, first.clone())
                .unwrap_err(),
            KestrelError::DuplicateSubscription("wifi_connected")
        );

        // Same handler on a different kind is fine
        bus.subscribe(EventKind::TimeSynced, first.clone()).unwrap();

        for _ in 1..MAX_SUBSCRIBERS {
            let (_, h) = counter();
            bus.subscribe(EventKind::WifiConnected, h).unwrap();
        }
        let (_, extra) = counter();
        assert_eq!(
            bus.subscribe(EventKind::WifiConnected, extra).unwrap_err(),
            KestrelError::CapacityExceeded("subscriber table")
        );

        bus.unsubscribe(EventKind::WifiConnected, &first);
        assert_eq!(bus.subscriber_count(EventKind::WifiConnected), 3);
        bus.subscribe(EventKind::WifiConnected, first).unwrap();
        assert_eq!(bus.subscriber_count(EventKind::WifiConnected), 4);
    }

    #[test]
    fn test_unsubscribe_stops_delivery() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();
        bus.subscribe(EventKind::WifiDisconnected, h.clone()).unwrap();
        bus.unsubscribe(EventKind::WifiDisconnected, &h);
        // Idempotent
        bus.unsubscribe(EventKind::WifiDisconnected, &h);

        bus.emit(EventKind::WifiDisconnected).unwrap();
        bus.update();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_unsubscribe_by_handle() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();
        let handle = bus.subscribe(EventKind::TimeSynced, h).unwrap();
        bus.unsubscribe_handle(handle);
        bus.emit(EventKind::TimeSynced).unwrap();
        bus.update();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_global_fifo_and_registration_order() {
        let (mut bus, _) = new_bus();
        let log = Arc::new(Mutex::new(Vec::new()));

        for tag in ["a", "b"] {
            for kind in [EventKind::SensorUpdated, EventKind::WeatherUpdated] {
                let log = log.clone();
                bus.subscribe(
                    kind,
                    handler(move |event, _| {
                        log.lock().push((event.kind, tag));
                        Ok(())
                    }),
                )
                .unwrap();
            }
        }

        bus.emit(EventKind::WeatherUpdated).unwrap();
        bus.emit(EventKind::SensorUpdated).unwrap();
        bus.update();

        assert_eq!(
            *log.lock(),
            vec![
                (EventKind::WeatherUpdated, "a"),
                (EventKind::WeatherUpdated, "b"),
                (EventKind::SensorUpdated, "a"),
                (EventKind::SensorUpdated, "b"),
            ]
        );
    }

    #[test]
    fn test_timestamp_stamped_by_bus() {
        let (mut bus, clock) = new_bus();
        let stamp = Arc::new(Mutex::new(None));
        let seen = stamp.clone();
        bus.subscribe(
            EventKind::TimeSynced,
            handler(move |event, _| {
                *seen.lock() = Some(event.timestamp);
                Ok(())
            }),
        )
        .unwrap();

        clock.advance(250);
        let mut event = Event::new(EventKind::TimeSynced);
        event.timestamp = Millis(1);
        bus.publish(event).unwrap();
        clock.advance(1_000);
        bus.update();

        assert_eq!(*stamp.lock(), Some(Millis(5_250)));
    }

    #[test]
    fn test_payload_delivered() {
        let (mut bus, _) = new_bus();
        let reading = Arc::new(Mutex::new(None));
        let seen = reading.clone();
        bus.subscribe(
            EventKind::SensorUpdated,
            handler(move |event, _| {
                *seen.lock() = event.payload::<i32>().copied();
                Ok(())
            }),
        )
        .unwrap();

        bus.publish(Event::new(EventKind::SensorUpdated).with_payload(42i32))
            .unwrap();
        bus.update();
        assert_eq!(*reading.lock(), Some(42));
    }

    #[test]
    fn test_failing_handler_isolated() {
        let (mut bus, _) = new_bus();
        let (count, good) = counter();

        bus.subscribe(
            EventKind::TimeSynced,
            handler(|_, _| Err("display offline".into())),
        )
        .unwrap();
        bus.subscribe(
            EventKind::TimeSynced,
            handler(|_, _| panic!("handler bug")),
        )
        .unwrap();
        bus.subscribe(EventKind::TimeSynced, good).unwrap();

        bus.emit(EventKind::TimeSynced).unwrap();
        assert_eq!(bus.update(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.stats().handler_failures, 2);
    }

    #[test]
    fn test_republish_deferred_to_next_update() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();

        bus.subscribe(
            EventKind::WifiConnected,
            handler(|_, dispatch| {
                dispatch.publish(Event::new(EventKind::WifiConnected))?;
                Ok(())
            }),
        )
        .unwrap();
        bus.subscribe(EventKind::WifiConnected, h).unwrap();

        bus.emit(EventKind::WifiConnected).unwrap();
        assert_eq!(bus.update(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 1);
        assert_eq!(bus.pending(), 1);

        assert_eq!(bus.update(), 1);
        assert_eq!(count.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_clear_resets_everything() {
        let (mut bus, _) = new_bus();
        let (count, h) = counter();
        bus.subscribe(EventKind::SensorUpdated, h).unwrap();
        bus.emit(EventKind::SensorUpdated).unwrap();

        bus.clear();
        assert_eq!(bus.pending(), 0);
        assert_eq!(bus.subscriber_count(EventKind::SensorUpdated), 0);

        bus.emit(EventKind::SensorUpdated).unwrap();
        bus.update();
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_republish_overflow_counted() {
        let clock = ManualClock::new(Millis(0));
        let mut bus = EventBus::with_config(
            Arc::new(clock),
            BusConfig {
                queue_capacity: 2,
                max_subscribers: MAX_SUBSCRIBERS,
            },
        );
        bus.init();

        let outcomes = Arc::new(Mutex::new(Vec::new()));
        let seen = outcomes.clone();
        bus.subscribe(
            EventKind::SensorUpdated,
            handler(move |_, dispatch| {
                for _ in 0..3 {
                    let result = dispatch.publish(Event::new(EventKind::WeatherUpdated));
                    seen.lock().push(result.is_ok());
                }
                Ok(())
            }),
        )
        .unwrap();

        bus.emit(EventKind::SensorUpdated).unwrap();
        assert_eq!(bus.update(), 1);

        assert_eq!(*outcomes.lock(), vec![true, true, false]);
        assert_eq!(bus.pending(), 2);
        assert_eq!(bus.stats().published, 3);
        assert_eq!(bus.stats().rejected, 1);
        assert_eq!(bus.stats().handler_failures, 0);
    }
}
