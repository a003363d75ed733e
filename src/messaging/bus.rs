use crossbeam_channel::{unbounded, Receiver, Sender, TrySendError};
use parking_lot::RwLock;
/// Event bus for pub/sub messaging
///
/// The detection loop and the hotkey listener publish; UI collaborators and
/// the binary's logger subscribe.
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use super::events::Event;

/// Subscriber ID for tracking subscriptions
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SubscriberId(usize);

struct Subscriber {
    id: SubscriberId,
    sender: Sender<Event>,
}

/// Event bus for broadcasting events to subscribers
///
/// Clones share the same subscriber list.
#[derive(Clone, Default)]
pub struct EventBus {
    subscribers: Arc<RwLock<Vec<Subscriber>>>,
    next_id: Arc<AtomicUsize>,
}

impl EventBus {
    pub fn new() -> Self {
        Self::default()
    }

    /// Subscribe to events, returns a receiver and subscription ID
    pub fn subscribe(&self) -> (Receiver<Event>, SubscriberId) {
        let (tx, rx) = unbounded();
        let id = SubscriberId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscribers.write().push(Subscriber { id, sender: tx });
        (rx, id)
    }

    pub fn unsubscribe(&self, id: SubscriberId) {
        self.subscribers.write().retain(|s| s.id != id);
    }

    /// Publish an event to all subscribers without blocking.
    /// Subscribers whose receiver was dropped are removed. Returns the number
    /// of subscribers the event reached.
    pub fn publish(&self, event: Event) -> usize {
        let mut delivered = 0;
        let mut disconnected = Vec::new();

        {
            let subscribers = self.subscribers.read();
            for subscriber in subscribers.iter() {
                match subscriber.sender.try_send(event.clone()) {
                    Ok(()) => delivered += 1,
                    Err(TrySendError::Disconnected(_)) => disconnected.push(subscriber.id),
                    Err(TrySendError::Full(_)) => {}
                }
            }
        }

        if !disconnected.is_empty() {
            self.subscribers
                .write()
                .retain(|s| !disconnected.contains(&s.id));
        }
        delivered
    }

    pub fn subscriber_count(&self) -> usize {
        self.subscribers.read().len()
    }

    pub fn clear(&self) {
        self.subscribers.write().clear();
    }
}
