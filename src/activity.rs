//! Activity notifications.
//!
//! The core never queries its observers; it emits [`ActivityEvent`]s to an
//! [`ActivitySink`] and moves on. Sinks provided here: a bounded in-memory
//! [`ActivityLog`], a [`TracingSink`] that mirrors events into `tracing`,
//! a [`Fanout`] combining several sinks, and Tokio unbounded senders.

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::Serialize;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::sync::mpsc::UnboundedSender;

/// Category of an activity event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ActivityKind {
    Info,
    Connection,
    Transmit,
    Receive,
    ControlLine,
    Error,
}

/// A single timestamped activity record.
#[derive(Debug, Clone, Serialize)]
pub struct ActivityEvent {
    pub kind: ActivityKind,
    pub message: String,
    /// Raw bytes for transmit/receive events. Decoding is left to the
    /// presentation layer.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub payload: Option<Vec<u8>>,
    pub timestamp: DateTime<Utc>,
}

impl ActivityEvent {
    pub fn new(kind: ActivityKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
            payload: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_payload(mut self, payload: Vec<u8>) -> Self {
        self.payload = Some(payload);
        self
    }

    pub fn info(message: impl Into<String>) -> Self {
        Self::new(ActivityKind::Info, message)
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::new(ActivityKind::Error, message)
    }
}

impl std::fmt::Display for ActivityEvent {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "[{}] {}", self.timestamp.format("%H:%M:%S%.3f"), self.message)
    }
}

/// Fire-and-forget receiver of activity events.
///
/// `record` must not block for long: it is called from the read loop and
/// from foreground operations.
pub trait ActivitySink: Send + Sync {
    fn record(&self, event: ActivityEvent);
}

/// Sink that drops every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct NullSink;

impl ActivitySink for NullSink {
    fn record(&self, _event: ActivityEvent) {}
}

/// Mirrors events into the `tracing` pipeline.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingSink;

impl ActivitySink for TracingSink {
    fn record(&self, event: ActivityEvent) {
        let bytes = event.payload.as_ref().map_or(0, Vec::len);
        match event.kind {
            ActivityKind::Error => {
                tracing::warn!(target: "activity", kind = ?event.kind, "{}", event.message)
            }
            ActivityKind::Transmit | ActivityKind::Receive => {
                tracing::debug!(target: "activity", kind = ?event.kind, bytes, "{}", event.message)
            }
            _ => tracing::info!(target: "activity", kind = ?event.kind, "{}", event.message),
        }
    }
}

impl ActivitySink for UnboundedSender<ActivityEvent> {
    fn record(&self, event: ActivityEvent) {
        // A dropped receiver just means nobody is watching any more.
        let _ = self.send(event);
    }
}

/// Bounded, ordered in-memory log; the oldest entry is evicted first.
#[derive(Debug)]
pub struct ActivityLog {
    capacity: usize,
    entries: Mutex<VecDeque<ActivityEvent>>,
}

impl ActivityLog {
    /// Default capacity, matching the demo's on-screen log.
    pub const DEFAULT_CAPACITY: usize = 50;

    pub fn with_capacity(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            capacity,
            entries: Mutex::new(VecDeque::with_capacity(capacity)),
        }
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }

    /// All retained entries, oldest first.
    pub fn snapshot(&self) -> Vec<ActivityEvent> {
        self.entries.lock().iter().cloned().collect()
    }

    /// Retained entries of one kind, oldest first.
    pub fn of_kind(&self, kind: ActivityKind) -> Vec<ActivityEvent> {
        self.entries
            .lock()
            .iter()
            .filter(|e| e.kind == kind)
            .cloned()
            .collect()
    }

    pub fn clear(&self) {
        self.entries.lock().clear();
    }
}

impl Default for ActivityLog {
    fn default() -> Self {
        Self::with_capacity(Self::DEFAULT_CAPACITY)
    }
}

impl ActivitySink for ActivityLog {
    fn record(&self, event: ActivityEvent) {
        let mut entries = self.entries.lock();
        if entries.len() == self.capacity {
            entries.pop_front();
        }
        entries.push_back(event);
    }
}

/// Forwards every event to each inner sink in order.
#[derive(Default, Clone)]
pub struct Fanout {
    sinks: Vec<Arc<dyn ActivitySink>>,
}

impl Fanout {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with(mut self, sink: Arc<dyn ActivitySink>) -> Self {
        self.sinks.push(sink);
        self
    }
}

impl ActivitySink for Fanout {
    fn record(&self, event: ActivityEvent) {
        if let Some((last, rest)) = self.sinks.split_last() {
            for sink in rest {
                sink.record(event.clone());
            }
            last.record(event);
        }
    }
}

impl<S: ActivitySink + ?Sized> ActivitySink for Arc<S> {
    fn record(&self, event: ActivityEvent) {
        (**self).record(event);
    }
}
