use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use serde::Serialize;
use tokio::sync::Notify;
use tracing::debug;

use crate::model::{AnprEvent, Camera, CameraId, CameraStatus, Recording};

const DEFAULT_QUEUE_CAPACITY: usize = 256;

#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", content = "data")]
pub enum BusEvent {
    #[serde(rename = "camera-added")]
    CameraAdded(Camera),
    #[serde(rename = "camera-updated")]
    CameraUpdated(Camera),
    #[serde(rename = "camera-deleted")]
    CameraDeleted { camera_id: CameraId },
    #[serde(rename = "camera-status")]
    CameraStatus {
        camera_id: CameraId,
        status: CameraStatus,
    },
    #[serde(rename = "recording-started")]
    RecordingStarted(Recording),
    #[serde(rename = "recording-stopped")]
    RecordingStopped(Recording),
    #[serde(rename = "anpr-event")]
    AnprEvent(AnprEvent),
}

/// Per-subscriber bounded queue plus the wakeup the receiving half waits on.
struct Inner {
    queue: Mutex<VecDeque<BusEvent>>,
    notify: Notify,
    closed: AtomicBool,
}

struct Subscriber {
    id: u64,
    inner: Arc<Inner>,
    dropped: Arc<AtomicU64>,
}

/// Topic-based, in-process publish/subscribe. Every message is fanned out to
/// every subscriber; each subscriber has its own bounded queue so one slow
/// consumer cannot stall publishers. When a subscriber's queue is full the
/// oldest queued message is evicted to make room for the new one (the bus
/// never blocks a publisher, and a subscriber always sees the most recent
/// events rather than a backlog of stale ones).
pub struct EventBus {
    subscribers: Mutex<Vec<Subscriber>>,
    next_id: AtomicU64,
    capacity: usize,
}

pub struct Subscription {
    pub id: u64,
    pub dropped: Arc<AtomicU64>,
    inner: Arc<Inner>,
}

impl Subscription {
    /// Waits for the next event. Resolves to `None` once the bus has no more
    /// events for this subscriber and it has been unsubscribed.
    pub async fn recv(&mut self) -> Option<BusEvent> {
        loop {
            if let Some(ev) = self.inner.queue.lock().pop_front() {
                return Some(ev);
            }
            if self.inner.closed.load(Ordering::Acquire) {
                return self.inner.queue.lock().pop_front();
            }
            self.inner.notify.notified().await;
        }
    }

    /// Non-blocking poll of the queue; `None` if empty right now.
    pub fn try_recv(&mut self) -> Option<BusEvent> {
        self.inner.queue.lock().pop_front()
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.inner.closed.store(true, Ordering::Release);
        self.inner.notify.notify_one();
    }
}

impl EventBus {
    pub fn new() -> Self {
        Self::with_capacity(DEFAULT_QUEUE_CAPACITY)
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            subscribers: Mutex::new(Vec::new()),
            next_id: AtomicU64::new(0),
            capacity,
        }
    }

    pub fn subscribe(&self) -> Subscription {
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        let inner = Arc::new(Inner {
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            closed: AtomicBool::new(false),
        });
        let dropped = Arc::new(AtomicU64::new(0));
        self.subscribers.lock().push(Subscriber {
            id,
            inner: inner.clone(),
            dropped: dropped.clone(),
        });
        debug!(subscriber_id = id, "subscriber registered");
        Subscription { id, dropped, inner }
    }

    pub fn unsubscribe(&self, id: u64) {
        self.subscribers.lock().retain(|s| s.id != id);
    }

    /// Publish to every subscriber. Never blocks: a full queue has its
    /// oldest entry evicted to make room for the new message.
    pub fn publish(&self, event: BusEvent) {
        let subs = self.subscribers.lock();
        for sub in subs.iter() {
            if sub.inner.closed.load(Ordering::Acquire) {
                debug!(subscriber_id = sub.id, "subscriber channel closed");
                continue;
            }
            let mut queue = sub.inner.queue.lock();
            if queue.len() >= self.capacity {
                queue.pop_front();
                sub.dropped.fetch_add(1, Ordering::Relaxed);
            }
            queue.push_back(event.clone());
            drop(queue);
            sub.inner.notify.notify_one();
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use uuid::Uuid;

    #[tokio::test]
    async fn publish_delivers_to_subscriber() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe();
        let camera_id = Uuid::new_v4();
        bus.publish(BusEvent::CameraDeleted { camera_id });
        let received = sub.recv().await.unwrap();
        assert!(matches!(received, BusEvent::CameraDeleted { camera_id: id } if id == camera_id));
    }

    #[tokio::test]
    async fn full_queue_drops_oldest_and_counts_it() {
        let bus = EventBus::with_capacity(2);
        let mut sub = bus.subscribe();
        // Distinguish events by camera_id so survivors can be identified.
        let ids: Vec<Uuid> = (0..5).map(|_| Uuid::new_v4()).collect();
        for &camera_id in &ids {
            bus.publish(BusEvent::CameraDeleted { camera_id });
        }
        assert_eq!(sub.dropped.load(Ordering::Relaxed), 3);

        let mut survivors = Vec::new();
        while let Some(BusEvent::CameraDeleted { camera_id }) = sub.try_recv() {
            survivors.push(camera_id);
        }
        assert_eq!(survivors, ids[3..]);
    }

    #[tokio::test]
    async fn unsubscribe_stops_delivery() {
        let bus = EventBus::new();
        let sub = bus.subscribe();
        bus.unsubscribe(sub.id);
        bus.publish(BusEvent::CameraDeleted {
            camera_id: Uuid::new_v4(),
        });
        assert_eq!(bus.subscribers.lock().len(), 0);
    }
}
