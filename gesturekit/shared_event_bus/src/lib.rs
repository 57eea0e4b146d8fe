#![deny(
    clippy::all,
    clippy::pedantic,
    clippy::nursery,
    missing_docs,
    rust_2018_idioms
)]

//! Event subscription for training and test observers.
//!
//! Modules emit [`EventRecord`]s at their logging sites; observers either
//! register callbacks on a [`ListenerRegistry`] or read a [`MemoryEventBus`].
//! Publishing is synchronous so training never suspends on an observer.

use std::{
    collections::VecDeque,
    fs::OpenOptions,
    io::Write,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
};

use anyhow::Result;
use chrono::{DateTime, Utc};
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

/// Generic event record encoded as JSON.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EventRecord {
    /// Unique identifier.
    pub id: String,
    /// Module producing the event.
    pub source: String,
    /// Event type (e.g., `training.result`).
    pub event_type: String,
    /// Emission time.
    pub timestamp: DateTime<Utc>,
    /// Arbitrary JSON payload.
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl EventRecord {
    /// Creates a record stamped with a fresh id and the current time.
    #[must_use]
    pub fn new(
        source: impl Into<String>,
        event_type: impl Into<String>,
        payload: serde_json::Value,
    ) -> Self {
        Self {
            id: format!("evt-{}", Uuid::new_v4()),
            source: source.into(),
            event_type: event_type.into(),
            timestamp: Utc::now(),
            payload,
        }
    }
}

/// Event publisher interface.
pub trait EventPublisher: Send + Sync {
    /// Publishes an event.
    fn publish(&self, event: EventRecord) -> Result<()>;
}

/// Handle returned by [`ListenerRegistry::subscribe`], used to unsubscribe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

type Listener = Arc<dyn Fn(&EventRecord) + Send + Sync>;

struct ListenerEntry {
    id: ListenerId,
    event_type: Option<String>,
    callback: Listener,
}

/// Registry of observer callbacks keyed by event type.
#[derive(Default)]
pub struct ListenerRegistry {
    next_id: AtomicU64,
    listeners: RwLock<Vec<ListenerEntry>>,
}

impl std::fmt::Debug for ListenerRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ListenerRegistry")
            .field("listeners", &self.listeners.read().len())
            .finish()
    }
}

impl ListenerRegistry {
    /// Creates an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribes to a single event type.
    pub fn subscribe<F>(&self, event_type: impl Into<String>, callback: F) -> ListenerId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.insert(Some(event_type.into()), Arc::new(callback))
    }

    /// Subscribes to every event.
    pub fn subscribe_all<F>(&self, callback: F) -> ListenerId
    where
        F: Fn(&EventRecord) + Send + Sync + 'static,
    {
        self.insert(None, Arc::new(callback))
    }

    /// Removes a listener; returns false when the handle is unknown.
    pub fn unsubscribe(&self, id: ListenerId) -> bool {
        let mut listeners = self.listeners.write();
        let before = listeners.len();
        listeners.retain(|entry| entry.id != id);
        listeners.len() != before
    }

    /// Number of registered listeners.
    #[must_use]
    pub fn len(&self) -> usize {
        self.listeners.read().len()
    }

    /// Returns true when no listener is registered.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Invokes every matching listener in subscription order.
    pub fn emit(&self, event: &EventRecord) {
        // Callbacks run outside the lock so they may subscribe or unsubscribe.
        let matching: Vec<Listener> = self
            .listeners
            .read()
            .iter()
            .filter(|entry| {
                entry
                    .event_type
                    .as_deref()
                    .map_or(true, |wanted| wanted == event.event_type)
            })
            .map(|entry| Arc::clone(&entry.callback))
            .collect();
        for callback in matching {
            callback(event);
        }
    }

    fn insert(&self, event_type: Option<String>, callback: Listener) -> ListenerId {
        let id = ListenerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.listeners.write().push(ListenerEntry {
            id,
            event_type,
            callback,
        });
        id
    }
}

impl EventPublisher for ListenerRegistry {
    fn publish(&self, event: EventRecord) -> Result<()> {
        self.emit(&event);
        Ok(())
    }
}

/// In-memory broadcast bus with a bounded backlog.
#[derive(Debug, Clone)]
pub struct MemoryEventBus {
    sender: broadcast::Sender<EventRecord>,
    capacity: usize,
    backlog: Arc<Mutex<VecDeque<EventRecord>>>,
}

impl MemoryEventBus {
    /// Creates a new bus with the given capacity.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        let (sender, _) = broadcast::channel(capacity);
        Self {
            sender,
            capacity,
            backlog: Arc::new(Mutex::new(VecDeque::with_capacity(capacity))),
        }
    }

    /// Opens a receiver for events published from now on.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<EventRecord> {
        self.sender.subscribe()
    }

    /// Snapshot of recent events retained in memory.
    #[must_use]
    pub fn snapshot(&self) -> Vec<EventRecord> {
        self.backlog.lock().iter().cloned().collect()
    }

    /// Retained events of one type.
    #[must_use]
    pub fn of_type(&self, event_type: &str) -> Vec<EventRecord> {
        self.backlog
            .lock()
            .iter()
            .filter(|event| event.event_type == event_type)
            .cloned()
            .collect()
    }
}

impl EventPublisher for MemoryEventBus {
    fn publish(&self, event: EventRecord) -> Result<()> {
        {
            let mut backlog = self.backlog.lock();
            backlog.push_back(event.clone());
            while backlog.len() > self.capacity {
                backlog.pop_front();
            }
        }
        // No receiver is not an error for a best-effort bus.
        let _ = self.sender.send(event);
        Ok(())
    }
}

/// File-backed publisher writing JSON lines.
#[derive(Debug)]
pub struct FileEventPublisher {
    path: PathBuf,
    lock: Mutex<()>,
}

impl FileEventPublisher {
    /// Creates a publisher that appends JSON lines to the given path.
    pub fn new(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        Ok(Self {
            path,
            lock: Mutex::new(()),
        })
    }

    /// Destination file.
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl EventPublisher for FileEventPublisher {
    fn publish(&self, event: EventRecord) -> Result<()> {
        let _guard = self.lock.lock();
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        let data = serde_json::to_vec(&event)?;
        file.write_all(&data)?;
        file.write_all(b"\n")?;
        file.flush()?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use tempfile::tempdir;

    fn sample_event(event_type: &str) -> EventRecord {
        EventRecord::new("tester", event_type, serde_json::json!({"value": 1}))
    }

    #[test]
    fn listeners_filter_by_event_type() {
        let registry = ListenerRegistry::new();
        let results = Arc::new(AtomicUsize::new(0));
        let everything = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&results);
        registry.subscribe("training.result", move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        let counter = Arc::clone(&everything);
        registry.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        registry.emit(&sample_event("training.result"));
        registry.emit(&sample_event("test.instance"));
        assert_eq!(results.load(Ordering::SeqCst), 1);
        assert_eq!(everything.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let registry = ListenerRegistry::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let counter = Arc::clone(&hits);
        let id = registry.subscribe_all(move |_| {
            counter.fetch_add(1, Ordering::SeqCst);
        });
        assert!(registry.unsubscribe(id));
        assert!(!registry.unsubscribe(id));
        registry.emit(&sample_event("training.started"));
        assert_eq!(hits.load(Ordering::SeqCst), 0);
        assert!(registry.is_empty());
    }

    #[test]
    fn publishes_and_receives() {
        let bus = MemoryEventBus::new(16);
        let mut rx = bus.subscribe();
        bus.publish(sample_event("unit.test")).unwrap();
        let event = rx.try_recv().unwrap();
        assert_eq!(event.event_type, "unit.test");
    }

    #[test]
    fn backlog_is_bounded() {
        let bus = MemoryEventBus::new(2);
        for kind in ["a", "b", "c"] {
            bus.publish(sample_event(kind)).unwrap();
        }
        let kinds: Vec<_> = bus.snapshot().into_iter().map(|e| e.event_type).collect();
        assert_eq!(kinds, vec!["b", "c"]);
        assert_eq!(bus.of_type("c").len(), 1);
    }

    #[tokio::test]
    async fn receivers_can_await_events() {
        let bus = MemoryEventBus::new(4);
        let mut rx = bus.subscribe();
        bus.publish(sample_event("training.completed")).unwrap();
        let event = rx.recv().await.unwrap();
        assert_eq!(event.source, "tester");
    }

    #[test]
    fn file_publisher_writes_events() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("events.log");
        let publisher = FileEventPublisher::new(&path).unwrap();
        publisher.publish(sample_event("unit.test")).unwrap();
        publisher.publish(sample_event("unit.other")).unwrap();
        let content = std::fs::read_to_string(path).unwrap();
        assert!(content.contains("unit.test"));
        assert_eq!(content.lines().count(), 2);
    }
}
