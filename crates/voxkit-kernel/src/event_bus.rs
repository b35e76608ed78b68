//! Event hub: per-service fan-out of validated event occurrences.
//!
//! Every subscriber owns a bounded channel. Publishing uses `try_send`, so a
//! subscriber that stops draining its receiver loses occurrences instead of
//! stalling the emitter.

use dashmap::DashMap;
use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Mutex, PoisonError};
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{debug, warn};
use voxkit_types::schema::EventOccurrence;

/// Identifies one subscription within a hub.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct SubscriptionId(pub u64);

impl std::fmt::Display for SubscriptionId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "sub-{}", self.0)
    }
}

/// A live subscription. Dropping the receiver ends it lazily; call
/// `unsubscribe` to end it immediately.
#[derive(Debug)]
pub struct Subscription {
    pub id: SubscriptionId,
    pub receiver: mpsc::Receiver<EventOccurrence>,
}

impl Subscription {
    /// Wait for the next occurrence.
    pub async fn recv(&mut self) -> Option<EventOccurrence> {
        self.receiver.recv().await
    }

    /// Take an occurrence if one is already buffered.
    pub fn try_recv(&mut self) -> Option<EventOccurrence> {
        self.receiver.try_recv().ok()
    }
}

struct Subscriber {
    /// `None` receives every event.
    event: Option<String>,
    sender: mpsc::Sender<EventOccurrence>,
}

/// Fan-out point for one service's events.
pub struct EventHub {
    subscribers: DashMap<SubscriptionId, Subscriber>,
    next_id: AtomicU64,
    buffer: usize,
    history: Mutex<VecDeque<EventOccurrence>>,
    history_size: usize,
}

impl EventHub {
    /// `buffer` is the per-subscriber capacity (at least 1), `history_size`
    /// the number of occurrences retained for `history`.
    pub fn new(buffer: usize, history_size: usize) -> Self {
        Self {
            subscribers: DashMap::new(),
            next_id: AtomicU64::new(1),
            buffer: buffer.max(1),
            history: Mutex::new(VecDeque::with_capacity(history_size)),
            history_size,
        }
    }

    /// Subscribe to a single event name.
    pub fn subscribe(&self, event: &str) -> Subscription {
        self.add(Some(event.to_string()))
    }

    /// Subscribe to every event of this hub.
    pub fn subscribe_all(&self) -> Subscription {
        self.add(None)
    }

    fn add(&self, event: Option<String>) -> Subscription {
        let id = SubscriptionId(self.next_id.fetch_add(1, Ordering::Relaxed));
        let (sender, receiver) = mpsc::channel(self.buffer);
        debug!(subscription = %id, event = event.as_deref().unwrap_or("*"), "Subscribed");
        self.subscribers.insert(id, Subscriber { event, sender });
        Subscription { id, receiver }
    }

    /// Returns whether the subscription existed.
    pub fn unsubscribe(&self, id: SubscriptionId) -> bool {
        self.subscribers.remove(&id).is_some()
    }

    /// Hand `occurrence` to every matching subscriber without waiting.
    /// Returns how many subscribers accepted it.
    pub fn publish(&self, occurrence: EventOccurrence) -> usize {
        if self.history_size > 0 {
            let mut history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
            if history.len() >= self.history_size {
                history.pop_front();
            }
            history.push_back(occurrence.clone());
        }

        let mut delivered = 0;
        let mut closed = Vec::new();
        for entry in self.subscribers.iter() {
            let sub = entry.value();
            if sub
                .event
                .as_deref()
                .is_some_and(|name| name != occurrence.event)
            {
                continue;
            }
            match sub.sender.try_send(occurrence.clone()) {
                Ok(()) => delivered += 1,
                Err(TrySendError::Full(_)) => {
                    warn!(
                        subscription = %entry.key(),
                        service = %occurrence.service,
                        event = %occurrence.event,
                        "Subscriber buffer full, dropping event"
                    );
                }
                Err(TrySendError::Closed(_)) => closed.push(*entry.key()),
            }
        }
        // Removal happens after iteration; DashMap shards stay locked while iterating.
        for id in closed {
            debug!(subscription = %id, "Removing closed subscription");
            self.subscribers.remove(&id);
        }
        delivered
    }

    /// Most recent occurrences, newest first.
    pub fn history(&self, limit: usize) -> Vec<EventOccurrence> {
        let history = self.history.lock().unwrap_or_else(PoisonError::into_inner);
        history.iter().rev().take(limit).cloned().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use voxkit_types::value::{TypedValue, ValueMap};

    fn occurrence(event: &str, n: i32) -> EventOccurrence {
        let mut items = ValueMap::new();
        items.insert("N".to_string(), TypedValue::from(n));
        EventOccurrence::new("Test", event, items)
    }

    #[tokio::test]
    async fn test_subscriber_receives_matching_events_only() {
        let hub = EventHub::new(8, 16);
        let mut speaking = hub.subscribe("SpeakingStatusChanged");
        let mut all = hub.subscribe_all();

        assert_eq!(hub.publish(occurrence("EmoteGot", 1)), 1);
        assert_eq!(hub.publish(occurrence("SpeakingStatusChanged", 2)), 2);

        let got = speaking.recv().await.unwrap();
        assert_eq!(got.event, "SpeakingStatusChanged");
        assert!(speaking.try_recv().is_none());

        assert_eq!(all.recv().await.unwrap().event, "EmoteGot");
        assert_eq!(all.recv().await.unwrap().event, "SpeakingStatusChanged");
    }

    #[test]
    fn test_full_subscriber_does_not_block_publisher() {
        let hub = EventHub::new(2, 0);
        let mut slow = hub.subscribe("Tick");
        for n in 0..10 {
            hub.publish(occurrence("Tick", n));
        }
        // Only the first two fit; the rest were dropped.
        assert_eq!(slow.try_recv().unwrap().item("N"), Some(&TypedValue::from(0)));
        assert_eq!(slow.try_recv().unwrap().item("N"), Some(&TypedValue::from(1)));
        assert!(slow.try_recv().is_none());
    }

    #[test]
    fn test_unsubscribe_and_closed_receivers() {
        let hub = EventHub::new(4, 0);
        let kept = hub.subscribe("Tick");
        let dropped = hub.subscribe("Tick");
        let dropped_id = dropped.id;
        drop(dropped);

        assert_eq!(hub.publish(occurrence("Tick", 0)), 1);
        // The closed subscriber was pruned during publish.
        assert!(!hub.unsubscribe(dropped_id));

        assert!(hub.unsubscribe(kept.id));
        assert!(!hub.unsubscribe(kept.id));
        assert_eq!(hub.publish(occurrence("Tick", 1)), 0);
    }

    #[test]
    fn test_history_ring_buffer() {
        let hub = EventHub::new(1, 3);
        for n in 0..5 {
            hub.publish(occurrence("Tick", n));
        }
        let history = hub.history(10);
        assert_eq!(history.len(), 3);
        assert_eq!(history[0].item("N"), Some(&TypedValue::from(4)));
        assert_eq!(history[2].item("N"), Some(&TypedValue::from(2)));
        assert_eq!(hub.history(1).len(), 1);
    }
}
