//! Process-wide publish/subscribe by topic.
//!
//! Every loaded copy of the aggregation logic and every hazard worker talks
//! through one [`MessageBus`]. Requests carry a mutable payload that
//! handlers fill in place, which is how collection works: the aggregator
//! publishes an empty batch and reads it back once every handler has run.
//!
//! Handlers may publish from inside a handler. [`MessageBus::publish`]
//! snapshots the subscriber list before invoking anyone, so a handler that
//! registers, unregisters or publishes does not deadlock and does not see
//! its own change until the next publish.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use atmos_types::{DamageBatch, EmitterBatch, Line};
use parking_lot::Mutex;
use tracing::trace;

/// Message topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Topic {
    /// An instance won the election and announces it.
    Init,
    /// Every instance that is not the winner must disable itself.
    InitInhibit,
    /// Workers move their pending damage into the payload.
    CollectDamage,
    /// Workers report the block to particle-effect map of their last scan.
    CollectEmitters,
    /// Workers report the scan lines of their last scan.
    DebugDraw,
}

/// A message and its payload.
#[derive(Debug)]
pub enum Message<'a> {
    /// Election announcement.
    Init(bool),
    /// Disable request.
    InitInhibit(bool),
    /// Damage collection request.
    CollectDamage(&'a mut DamageBatch),
    /// Emitter collection request.
    CollectEmitters(&'a mut EmitterBatch),
    /// Debug line collection request.
    DebugDraw(&'a mut Vec<Line>),
}

impl Message<'_> {
    /// Topic this message is delivered on.
    pub const fn topic(&self) -> Topic {
        match self {
            Self::Init(_) => Topic::Init,
            Self::InitInhibit(_) => Topic::InitInhibit,
            Self::CollectDamage(_) => Topic::CollectDamage,
            Self::CollectEmitters(_) => Topic::CollectEmitters,
            Self::DebugDraw(_) => Topic::DebugDraw,
        }
    }
}

/// Registration handle returned by [`MessageBus::register`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type Handler = Arc<dyn Fn(&mut Message<'_>) + Send + Sync>;

struct Subscription {
    id: HandlerId,
    topic: Topic,
    handler: Handler,
}

/// Topic-keyed broadcast bus.
pub struct MessageBus {
    next_id: AtomicU64,
    subscriptions: Mutex<Vec<Subscription>>,
}

impl core::fmt::Debug for MessageBus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("MessageBus")
            .field("subscriptions", &self.subscriptions.lock().len())
            .finish_non_exhaustive()
    }
}

impl Default for MessageBus {
    fn default() -> Self {
        Self::new()
    }
}

impl MessageBus {
    /// Empty bus.
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(0),
            subscriptions: Mutex::new(Vec::new()),
        }
    }

    /// Subscribe `handler` to `topic`.
    pub fn register<F>(&self, topic: Topic, handler: F) -> HandlerId
    where
        F: Fn(&mut Message<'_>) + Send + Sync + 'static,
    {
        let id = HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed));
        self.subscriptions.lock().push(Subscription {
            id,
            topic,
            handler: Arc::new(handler),
        });
        trace!(?topic, handler = id.0, "handler registered");
        id
    }

    /// Remove a subscription. Returns `false` if it was already gone.
    pub fn unregister(&self, id: HandlerId) -> bool {
        let mut subs = self.subscriptions.lock();
        let before = subs.len();
        subs.retain(|s| s.id != id);
        subs.len() != before
    }

    /// Number of handlers subscribed to `topic`.
    pub fn subscribers(&self, topic: Topic) -> usize {
        self.subscriptions
            .lock()
            .iter()
            .filter(|s| s.topic == topic)
            .count()
    }

    /// Deliver `message` to every handler of its topic, in registration
    /// order. Returns how many handlers ran.
    pub fn publish(&self, message: &mut Message<'_>) -> usize {
        let topic = message.topic();
        let handlers: Vec<Handler> = self
            .subscriptions
            .lock()
            .iter()
            .filter(|s| s.topic == topic)
            .map(|s| Arc::clone(&s.handler))
            .collect();
        for handler in &handlers {
            handler(message);
        }
        trace!(?topic, delivered = handlers.len(), "published");
        handlers.len()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::float_cmp)]
mod tests {
    use std::sync::atomic::AtomicUsize;

    use atmos_types::EntityKey;

    use super::*;

    #[test]
    fn handlers_only_see_their_topic() {
        let bus = MessageBus::new();
        let hits = Arc::new(AtomicUsize::new(0));
        let h = Arc::clone(&hits);
        bus.register(Topic::Init, move |_| {
            h.fetch_add(1, Ordering::SeqCst);
        });

        assert_eq!(bus.publish(&mut Message::InitInhibit(true)), 0);
        assert_eq!(bus.publish(&mut Message::Init(true)), 1);
        assert_eq!(hits.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn collection_payload_is_filled_in_place() {
        let bus = MessageBus::new();
        let key = EntityKey::default();
        bus.register(Topic::CollectDamage, move |msg| {
            if let Message::CollectDamage(batch) = msg {
                batch.insert(key, 4.0);
            }
        });

        let mut batch = DamageBatch::new();
        bus.publish(&mut Message::CollectDamage(&mut batch));
        assert_eq!(batch.get(&key), Some(&4.0));
    }

    #[test]
    fn unregister_stops_delivery() {
        let bus = MessageBus::new();
        let id = bus.register(Topic::Init, |_| {});
        assert_eq!(bus.subscribers(Topic::Init), 1);
        assert!(bus.unregister(id));
        assert!(!bus.unregister(id));
        assert_eq!(bus.publish(&mut Message::Init(true)), 0);
    }

    #[test]
    fn handler_can_publish_reentrantly() {
        let bus = Arc::new(MessageBus::new());
        let inhibited = Arc::new(AtomicUsize::new(0));

        let weak = Arc::downgrade(&bus);
        bus.register(Topic::Init, move |_| {
            if let Some(bus) = weak.upgrade() {
                bus.publish(&mut Message::InitInhibit(true));
            }
        });
        let i = Arc::clone(&inhibited);
        bus.register(Topic::InitInhibit, move |_| {
            i.fetch_add(1, Ordering::SeqCst);
        });

        bus.publish(&mut Message::Init(true));
        assert_eq!(inhibited.load(Ordering::SeqCst), 1);
    }
}
