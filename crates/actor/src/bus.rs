// SPDX-License-Identifier: MIT

//! The event bus (spec §4.2): publish/subscribe with glob pattern matching
//! on dotted event names, synchronous best-effort delivery, and a bounded
//! recent-event ring for late subscribers.

use labtrans_core::Event;
use parking_lot::Mutex;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;

const DEFAULT_RING_CAPACITY: usize = 100;
const SUBSCRIBER_MAILBOX_CAPACITY: usize = 256;

/// A compiled `plate.*` / `mover.transport_*` / `**` matcher.
///
/// Grammar: dotted segments, `*` matches exactly one segment, a trailing
/// `**` matches any remaining suffix (including zero segments).
#[derive(Debug, Clone)]
pub struct Matcher {
    segments: Vec<String>,
    trailing_wildcard: bool,
}

impl Matcher {
    pub fn compile(pattern: &str) -> Self {
        let mut segments: Vec<String> = pattern.split('.').map(str::to_string).collect();
        let trailing_wildcard = segments.last().map(|s| s == "**").unwrap_or(false);
        if trailing_wildcard {
            segments.pop();
        }
        Self { segments, trailing_wildcard }
    }

    pub fn matches(&self, name: &str) -> bool {
        let parts: Vec<&str> = name.split('.').collect();
        if self.trailing_wildcard {
            if parts.len() < self.segments.len() {
                return false;
            }
        } else if parts.len() != self.segments.len() {
            return false;
        }
        self.segments.iter().zip(parts.iter()).all(|(pat, part)| pat == "*" || pat == part)
    }
}

struct Subscriber {
    id: u64,
    matcher: Matcher,
    tx: mpsc::Sender<Event>,
}

struct Inner {
    subscribers: Vec<Subscriber>,
    ring: VecDeque<Event>,
    ring_capacity: usize,
}

/// Handle returned by [`EventBus::subscribe`]; dropping it (or calling
/// `unsubscribe`) stops further delivery.
pub struct Subscription {
    bus: Arc<EventBus>,
    id: u64,
    pub rx: mpsc::Receiver<Event>,
}

impl Subscription {
    pub fn unsubscribe(self) {
        self.bus.remove_subscriber(self.id);
    }
}

/// Publish/subscribe event bus. Publication is synchronous and
/// best-effort: a lagging subscriber's full mailbox does not block other
/// subscribers or the publisher (spec §4.2 "published... in registration
/// order", §5 back-pressure applies only to actor mailboxes, not the bus).
pub struct EventBus {
    inner: Mutex<Inner>,
    next_id: AtomicU64,
}

impl EventBus {
    pub fn new() -> Arc<Self> {
        Self::with_ring_capacity(DEFAULT_RING_CAPACITY)
    }

    pub fn with_ring_capacity(ring_capacity: usize) -> Arc<Self> {
        Arc::new(Self {
            inner: Mutex::new(Inner { subscribers: Vec::new(), ring: VecDeque::new(), ring_capacity }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Register a subscriber. Returns a [`Subscription`] whose `rx` yields
    /// matching events in publication order.
    pub fn subscribe(self: &Arc<Self>, pattern: &str) -> Subscription {
        let matcher = Matcher::compile(pattern);
        let (tx, rx) = mpsc::channel(SUBSCRIBER_MAILBOX_CAPACITY);
        let id = self.next_id.fetch_add(1, Ordering::SeqCst);
        self.inner.lock().subscribers.push(Subscriber { id, matcher, tx });
        Subscription { bus: self.clone(), id, rx }
    }

    fn remove_subscriber(&self, id: u64) {
        self.inner.lock().subscribers.retain(|s| s.id != id);
    }

    /// Publish an event to every matching subscriber, in registration
    /// order. A subscriber whose mailbox is full is logged and skipped —
    /// it does not hold up delivery to the rest (spec §4.2 "a subscriber
    /// callback that raises is logged and other subscribers continue").
    pub fn publish(&self, event: Event) {
        let mut inner = self.inner.lock();
        if inner.ring.len() >= inner.ring_capacity {
            inner.ring.pop_front();
        }
        inner.ring.push_back(event.clone());
        for sub in inner.subscribers.iter() {
            if sub.matcher.matches(event.name()) {
                if let Err(err) = sub.tx.try_send(event.clone()) {
                    tracing::warn!(subscriber = sub.id, error = %err, "dropping event for lagging subscriber");
                }
            }
        }
    }

    /// The last N retained events, oldest first, for a late subscriber
    /// that wants to catch up.
    pub fn recent(&self) -> Vec<Event> {
        self.inner.lock().ring.iter().cloned().collect()
    }
}

impl Default for Arc<EventBus> {
    fn default() -> Self {
        EventBus::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use labtrans_core::PlateId;
    use yare::parameterized;

    #[parameterized(
        exact_match = { "plate.created", "plate.created", true },
        single_wildcard = { "plate.*", "plate.created", true },
        single_wildcard_miss_depth = { "plate.*", "plate.workflow.assigned", false },
        double_star_matches_suffix = { "plate.**", "plate.workflow.assigned", true },
        global_wildcard = { "**", "device.error", true },
        no_match_different_root = { "mover.*", "plate.created", false },
    )]
    fn matcher_cases(pattern: &str, name: &str, expected: bool) {
        assert_eq!(Matcher::compile(pattern).matches(name), expected);
    }

    #[tokio::test]
    async fn subscribers_receive_in_publication_order() {
        let bus = EventBus::new();
        let mut sub = bus.subscribe("plate.*");
        let p = PlateId::generate();
        bus.publish(Event::PlateCreated { plate_id: p });
        bus.publish(Event::PlateWorkflowAssigned { plate_id: p, step_count: 2 });

        assert_eq!(sub.rx.recv().await.map(|e| e.name()), Some("plate.created"));
        assert_eq!(sub.rx.recv().await.map(|e| e.name()), Some("plate.workflow_assigned"));
    }

    #[test]
    fn ring_is_bounded() {
        let bus = EventBus::with_ring_capacity(2);
        let p = PlateId::generate();
        bus.publish(Event::PlateCreated { plate_id: p });
        bus.publish(Event::PlateResumed { plate_id: p });
        bus.publish(Event::PlateAborted { plate_id: p, reason: "x".into() });
        assert_eq!(bus.recent().len(), 2);
    }
}
