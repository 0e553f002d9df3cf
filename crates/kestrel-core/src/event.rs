//! Event definitions
//!
//! Events are notifications passed between device services through the
//! bus. They carry a kind, the instant the bus accepted them, and an
//! optional shared payload.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::{KestrelError, Millis};

/// Size of the per-kind subscriber table. Kinds beyond this cannot exist.
pub const MAX_EVENT_KINDS: usize = 8;

/// Event kind classification
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[repr(u8)]
pub enum EventKind {
    // Connectivity
    WifiConnected = 0,
    WifiDisconnected = 1,

    // Time
    TimeSynced = 2,

    // Feature data
    SensorUpdated = 3,
    WeatherUpdated = 4,

    // Spare slots for future features
    Reserved1 = 5,
    Reserved2 = 6,
}

impl EventKind {
    /// Number of defined kinds
    pub const COUNT: usize = 7;

    pub const ALL: [EventKind; EventKind::COUNT] = [
        EventKind::WifiConnected,
        EventKind::WifiDisconnected,
        EventKind::TimeSynced,
        EventKind::SensorUpdated,
        EventKind::WeatherUpdated,
        EventKind::Reserved1,
        EventKind::Reserved2,
    ];

    pub fn from_byte(b: u8) -> Option<Self> {
        match b {
            0 => Some(EventKind::WifiConnected),
            1 => Some(EventKind::WifiDisconnected),
            2 => Some(EventKind::TimeSynced),
            3 => Some(EventKind::SensorUpdated),
            4 => Some(EventKind::WeatherUpdated),
            5 => Some(EventKind::Reserved1),
            6 => Some(EventKind::Reserved2),
            _ => None,
        }
    }

    #[inline]
    pub fn to_byte(self) -> u8 {
        self as u8
    }

    /// Row in the subscriber table
    #[inline]
    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(self) -> &'static str {
        match self {
            EventKind::WifiConnected => "wifi_connected",
            EventKind::WifiDisconnected => "wifi_disconnected",
            EventKind::TimeSynced => "time_synced",
            EventKind::SensorUpdated => "sensor_updated",
            EventKind::WeatherUpdated => "weather_updated",
            EventKind::Reserved1 => "reserved_1",
            EventKind::Reserved2 => "reserved_2",
        }
    }
}

impl TryFrom<u8> for EventKind {
    type Error = KestrelError;

    fn try_from(b: u8) -> Result<Self, Self::Error> {
        EventKind::from_byte(b).ok_or(KestrelError::InvalidEventKind(b))
    }
}

impl fmt::Display for EventKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Shared, type-erased event payload.
///
/// The bus holds a reference only until the event has been dispatched.
pub type Payload = Arc<dyn Any + Send + Sync>;

/// A bus event
#[derive(Clone)]
pub struct Event {
    pub kind: EventKind,
    /// Stamped by the bus on publish; any caller value is overwritten
    pub timestamp: Millis,
    pub payload: Option<Payload>,
}

impl Event {
    pub fn new(kind: EventKind) -> Self {
        Event {
            kind,
            timestamp: Millis::ZERO,
            payload: None,
        }
    }

    pub fn with_payload<T: Any + Send + Sync>(mut self, value: T) -> Self {
        self.payload = Some(Arc::new(value));
        self
    }

    pub fn with_shared_payload(mut self, payload: Payload) -> Self {
        self.payload = Some(payload);
        self
    }

    /// Borrow the payload as `T`, if present and of that type
    pub fn payload<T: Any>(&self) -> Option<&T> {
        self.payload.as_ref().and_then(|p| p.downcast_ref::<T>())
    }
}

impl fmt::Debug for Event {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Event")
            .field("kind", &self.kind)
            .field("timestamp", &self.timestamp)
            .field("payload", &self.payload.is_some())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_byte_roundtrip() {
        for kind in EventKind::ALL {
            assert_eq!(EventKind::from_byte(kind.to_byte()), Some(kind));
        }
        assert!(EventKind::COUNT <= MAX_EVENT_KINDS);
    }

    #[test]
    fn test_invalid_kind_rejected() {
        assert_eq!(
            EventKind::try_from(7).unwrap_err(),
            KestrelError::InvalidEventKind(7)
        );
        assert!(EventKind::try_from(255).is_err());
    }

    #[test]
    fn test_payload_downcast() {
        let event = Event::new(EventKind::SensorUpdated).with_payload(21.5f32);
        assert_eq!(event.payload::<f32>(), Some(&21.5));
        assert!(event.payload::<u32>().is_none());
        assert!(Event::new(EventKind::TimeSynced).payload::<f32>().is_none());
    }
}
