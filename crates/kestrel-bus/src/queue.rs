//! Bounded ring buffer of pending events

use kestrel_core::{Event, KestrelError, KestrelResult};

/// Default queue capacity
pub const EVENT_QUEUE_SIZE: usize = 16;

/// Fixed-capacity FIFO of events.
///
/// The backing slice is allocated once; push and pop never allocate.
pub struct EventQueue {
    buffer: Box<[Option<Event>]>,
    /// Next slot to read
    head: usize,
    /// Next slot to write
    tail: usize,
    len: usize,
}

impl EventQueue {
    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        EventQueue {
            buffer: (0..capacity).map(|_| None).collect(),
            head: 0,
            tail: 0,
            len: 0,
        }
    }

    /// Append an event. A full queue is reported, never overwritten.
    pub fn push(&mut self, event: Event) -> KestrelResult<()> {
        if self.is_full() {
            return Err(KestrelError::CapacityExceeded("event queue"));
        }
        self.buffer[self.tail] = Some(event);
        self.tail = (self.tail + 1) % self.buffer.len();
        self.len += 1;
        Ok(())
    }

    /// Take the oldest event
    pub fn pop(&mut self) -> Option<Event> {
        if self.len == 0 {
            return None;
        }
        let event = self.buffer[self.head].take();
        self.head = (self.head + 1) % self.buffer.len();
        self.len -= 1;
        event
    }

    pub fn clear(&mut self) {
        for slot in self.buffer.iter_mut() {
            *slot = None;
        }
        self.head = 0;
        self.tail = 0;
        self.len = 0;
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.len
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    #[inline]
    pub fn is_full(&self) -> bool {
        self.len == self.buffer.len()
    }

    #[inline]
    pub fn capacity(&self) -> usize {
        self.buffer.len()
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::with_capacity(EVENT_QUEUE_SIZE)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kestrel_core::EventKind;

    #[test]
    fn test_fifo_order_across_wrap() {
        let mut queue = EventQueue::with_capacity(3);
        queue.push(Event::new(EventKind::WifiConnected)).unwrap();
        queue.push(Event::new(EventKind::TimeSynced)).unwrap();
        assert_eq!(queue.pop().unwrap().kind, EventKind::WifiConnected);

        // Tail wraps to slot 0
        queue.push(Event::new(EventKind::SensorUpdated)).unwrap();
        queue.push(Event::new(EventKind::WeatherUpdated)).unwrap();
        assert!(queue.is_full());

        let kinds: Vec<_> = std::iter::from_fn(|| queue.pop()).map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::TimeSynced,
                EventKind::SensorUpdated,
                EventKind::WeatherUpdated
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_overflow_rejected() {
        let mut queue = EventQueue::with_capacity(2);
        queue.push(Event::new(EventKind::WifiConnected)).unwrap();
        queue.push(Event::new(EventKind::WifiConnected)).unwrap();
        let err = queue.push(Event::new(EventKind::TimeSynced)).unwrap_err();
        assert_eq!(err, KestrelError::CapacityExceeded("event queue"));
        assert_eq!(queue.len(), 2);
        // Oldest entry was not overwritten
        assert_eq!(queue.pop().unwrap().kind, EventKind::WifiConnected);
    }

    #[test]
    fn test_clear() {
        let mut queue = EventQueue::default();
        assert_eq!(queue.capacity(), EVENT_QUEUE_SIZE);
        queue.push(Event::new(EventKind::TimeSynced)).unwrap();
        queue.clear();
        assert!(queue.is_empty());
        assert!(queue.pop().is_none());
    }
}
