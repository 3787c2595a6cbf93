//! Event bus: topic-based pub/sub with per-subscriber bounded queues.
//!
//! `publish` never blocks and never awaits. Each subscriber owns a bounded
//! queue drained by its own delivery task; when the queue is full the oldest
//! event is dropped and counted.
//!
//! ```ignore
//! let sub = bus.subscribe(Topic::Tasks, |event| println!("{event:?}"));
//! // ...
//! sub.unsubscribe();
//! ```

use std::collections::{HashMap, VecDeque};
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use tokio::sync::{Notify, mpsc};
use tracing::{error, warn};

use crate::domain::{Event, Topic};

/// Cloneable handle to one bus. All clones publish to the same subscribers.
#[derive(Clone)]
pub struct EventBus {
    inner: Arc<BusInner>,
}

struct BusInner {
    /// Copy-on-write subscriber lists; publishers iterate a snapshot.
    topics: Mutex<HashMap<Topic, Arc<[Arc<SubscriberSlot>]>>>,
    /// Serializes fan-out so every subscriber sees one publish order.
    publishing: Mutex<()>,
    capacity: usize,
    next_id: AtomicU64,
}

struct SubscriberSlot {
    id: u64,
    topic: Topic,
    queue: Mutex<VecDeque<Event>>,
    notify: Notify,
    dropped: AtomicU64,
    closed: AtomicBool,
}

impl EventBus {
    /// `capacity` is the per-subscriber queue bound. Zero is treated as one.
    pub fn new(capacity: usize) -> Self {
        Self {
            inner: Arc::new(BusInner {
                topics: Mutex::new(HashMap::new()),
                publishing: Mutex::new(()),
                capacity: capacity.max(1),
                next_id: AtomicU64::new(1),
            }),
        }
    }

    /// Enqueue `event` for every current subscriber of its topic.
    ///
    /// Concurrent publishers are serialized, so every subscriber sees the
    /// same order. The topic map is only locked to take the snapshot;
    /// `subscribe` and unsubscribe never wait on a fan-out.
    pub fn publish(&self, event: Event) {
        let topic = event.topic();
        let _order = self.inner.publishing.lock();
        let Some(slots) = self.inner.topics.lock().get(&topic).cloned() else {
            return;
        };
        for slot in slots.iter() {
            slot.push(event.clone(), self.inner.capacity);
        }
    }

    /// Register `callback` for `topic`. Must be called from within a Tokio runtime.
    ///
    /// The callback runs on the subscriber's delivery task, one event at a
    /// time, in publish order.
    pub fn subscribe<F>(&self, topic: Topic, callback: F) -> Subscription
    where
        F: FnMut(Event) + Send + 'static,
    {
        let slot = Arc::new(SubscriberSlot {
            id: self.inner.next_id.fetch_add(1, Ordering::Relaxed),
            topic,
            queue: Mutex::new(VecDeque::new()),
            notify: Notify::new(),
            dropped: AtomicU64::new(0),
            closed: AtomicBool::new(false),
        });

        {
            let mut topics = self.inner.topics.lock();
            let mut next = topics.get(&topic).map(|s| s.to_vec()).unwrap_or_default();
            next.push(slot.clone());
            topics.insert(topic, next.into());
        }

        tokio::spawn(deliver(slot.clone(), callback));

        Subscription {
            bus: Arc::downgrade(&self.inner),
            slot,
        }
    }

    /// Subscribe with a channel instead of a callback.
    pub fn subscribe_channel(&self, topic: Topic) -> (Subscription, mpsc::UnboundedReceiver<Event>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let sub = self.subscribe(topic, move |event| {
            let _ = tx.send(event);
        });
        (sub, rx)
    }

    pub fn subscriber_count(&self, topic: Topic) -> usize {
        self.inner
            .topics
            .lock()
            .get(&topic)
            .map_or(0, |slots| slots.len())
    }
}

impl std::fmt::Debug for EventBus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EventBus")
            .field("capacity", &self.inner.capacity)
            .finish_non_exhaustive()
    }
}

impl BusInner {
    fn remove(&self, slot: &SubscriberSlot) {
        let mut topics = self.topics.lock();
        let Some(slots) = topics.get(&slot.topic) else {
            return;
        };
        let remaining: Vec<_> = slots.iter().filter(|s| s.id != slot.id).cloned().collect();
        if remaining.is_empty() {
            topics.remove(&slot.topic);
        } else {
            topics.insert(slot.topic, remaining.into());
        }
    }
}

impl SubscriberSlot {
    fn push(&self, event: Event, capacity: usize) {
        if self.closed.load(Ordering::Acquire) {
            return;
        }
        {
            let mut queue = self.queue.lock();
            if queue.len() >= capacity {
                queue.pop_front();
                let dropped = self.dropped.fetch_add(1, Ordering::Relaxed) + 1;
                warn!(
                    subscriber = self.id,
                    topic = ?self.topic,
                    dropped,
                    "SubscriberOverflow: dropped oldest event"
                );
            }
            queue.push_back(event);
        }
        self.notify.notify_one();
    }

    fn pop(&self) -> Option<Event> {
        self.queue.lock().pop_front()
    }
}

async fn deliver<F>(slot: Arc<SubscriberSlot>, mut callback: F)
where
    F: FnMut(Event) + Send + 'static,
{
    loop {
        match slot.pop() {
            Some(event) => {
                if catch_unwind(AssertUnwindSafe(|| callback(event))).is_err() {
                    error!(subscriber = slot.id, topic = ?slot.topic, "subscriber callback panicked");
                }
            }
            None if slot.closed.load(Ordering::Acquire) => break,
            // notify_one stores a permit, so a push between pop() and here is not lost.
            None => slot.notify.notified().await,
        }
    }
}

/// Handle to one subscription. Dropping it unsubscribes.
pub struct Subscription {
    bus: Weak<BusInner>,
    slot: Arc<SubscriberSlot>,
}

impl Subscription {
    pub fn topic(&self) -> Topic {
        self.slot.topic
    }

    /// Events dropped from this subscriber's queue on overflow.
    pub fn dropped(&self) -> u64 {
        self.slot.dropped.load(Ordering::Relaxed)
    }

    pub fn unsubscribe(self) {
        // Drop does the work.
    }

    fn detach(&self) {
        if self.slot.closed.swap(true, Ordering::AcqRel) {
            return;
        }
        if let Some(bus) = self.bus.upgrade() {
            bus.remove(&self.slot);
        }
        // Events already queued are still delivered; the task exits afterwards.
        self.slot.notify.notify_one();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.detach();
    }
}

impl std::fmt::Debug for Subscription {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Subscription")
            .field("id", &self.slot.id)
            .field("topic", &self.slot.topic)
            .field("dropped", &self.dropped())
            .finish()
    }
}
