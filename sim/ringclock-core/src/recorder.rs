//! The sink a machine reports its events to.
//!
//! The machine calls [`EventRecorder::record`] after every iteration that
//! changed its clock and never looks at what the recorder does with it.

use std::{
    fmt::Display,
    sync::{Mutex, PoisonError},
};

/// The kinds of events a machine reports.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EventKind {
    Send,
    Internal,
    Received,
}

impl EventKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Send => "Send",
            Self::Internal => "Internal",
            Self::Received => "Received",
        }
    }
}

impl Display for EventKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One state-affecting iteration of a machine's event loop.
#[derive(Debug, Clone, PartialEq)]
pub struct Event {
    /// Wall-clock time in seconds since the Unix epoch
    pub system_time: f64,
    /// The logical clock after the event
    pub clock: u64,
    /// How many messages were waiting after the event
    pub queue_len: usize,
    pub kind: EventKind,
    /// The message sent or received, if any
    pub message: Option<String>,
}

impl Event {
    /// Creates an event stamped with the current system time.
    pub fn now(kind: EventKind, clock: u64, queue_len: usize, message: Option<String>) -> Self {
        let now = chrono::Utc::now();
        Self {
            system_time: now.timestamp_micros() as f64 / 1_000_000.0,
            clock,
            queue_len,
            kind,
            message,
        }
    }
}

/// Receives the events of a machine.
///
/// Recording is fire-and-forget: implementations deal with their own
/// failures and must not panic.
pub trait EventRecorder: Send + Sync {
    fn record(&self, event: &Event);
}

/// Drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullRecorder;

impl EventRecorder for NullRecorder {
    fn record(&self, _event: &Event) {}
}

/// Keeps every event in memory.
#[derive(Debug, Default)]
pub struct MemoryRecorder {
    events: Mutex<Vec<Event>>,
}

impl MemoryRecorder {
    pub fn new() -> Self {
        Self::default()
    }

    /// A copy of every event recorded so far, oldest first.
    pub fn events(&self) -> Vec<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// The kinds of every event recorded so far, oldest first.
    pub fn kinds(&self) -> Vec<EventKind> {
        self.events().into_iter().map(|event| event.kind).collect()
    }

    pub fn last(&self) -> Option<Event> {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .last()
            .cloned()
    }
}

impl EventRecorder for MemoryRecorder {
    fn record(&self, event: &Event) {
        self.events
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(event.clone());
    }
}
