//! Cross-instance conflict avoidance.
//!
//! Several brokers in one process may listen for the same confirm/deny
//! words. When one of them submits a request for an actor it publishes an
//! [`OccupationSignal`]; every other subscribed broker sharing any of those
//! words drops its own pending request for that actor without firing a
//! callback. The actor's next confirm/deny then has exactly one claimant.
//!
//! Delivery is synchronous: `publish` returns only after every listener has
//! handled the signal, so a signal published inside `submit` is processed
//! before `submit` returns and before the host can dispatch the actor's next
//! command.
//!
//! Brokers store a request and announce it while holding the bus's claim
//! lock, so two siblings submitting for the same actor at once are ordered
//! and the later one keeps the actor.

use crate::command::Vocabulary;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::{Arc, Mutex, MutexGuard, RwLock, Weak};
use uuid::Uuid;

/// Identity of one broker instance on a bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct BrokerId(Uuid);

impl BrokerId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for BrokerId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for BrokerId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        self.0.fmt(f)
    }
}

/// "Broker `sender` now owns `vocabulary` for `actor`."
#[derive(Debug, Clone)]
pub struct OccupationSignal<A> {
    pub sender: BrokerId,
    pub actor: A,
    pub vocabulary: Arc<Vocabulary>,
}

/// Receiver side of the bus.
pub trait OccupationListener<A>: Send + Sync {
    /// Identity used to skip the listener's own signals.
    fn listener_id(&self) -> BrokerId;

    fn on_occupation(&self, signal: &OccupationSignal<A>);
}

struct Slot<A> {
    id: BrokerId,
    listener: Weak<dyn OccupationListener<A>>,
}

/// In-process publish/subscribe channel for occupation signals.
///
/// Cloning yields another handle to the same bus. Listeners are held weakly;
/// dropped listeners are pruned on the next publish.
pub struct OccupationBus<A> {
    slots: Arc<RwLock<Vec<Slot<A>>>>,
    claim: Arc<Mutex<()>>,
}

impl<A> Clone for OccupationBus<A> {
    fn clone(&self) -> Self {
        Self {
            slots: Arc::clone(&self.slots),
            claim: Arc::clone(&self.claim),
        }
    }
}

impl<A> Default for OccupationBus<A> {
    fn default() -> Self {
        Self {
            slots: Arc::new(RwLock::new(Vec::new())),
            claim: Arc::new(Mutex::new(())),
        }
    }
}

impl<A: 'static> OccupationBus<A> {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener. Re-subscribing the same id replaces the slot.
    pub fn subscribe(&self, listener: Weak<dyn OccupationListener<A>>) -> Option<BrokerId> {
        let id = listener.upgrade()?.listener_id();
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.retain(|slot| slot.id != id);
        slots.push(Slot { id, listener });
        Some(id)
    }

    /// Remove a listener. Returns whether it was subscribed.
    pub fn unsubscribe(&self, id: BrokerId) -> bool {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        let before = slots.len();
        slots.retain(|slot| slot.id != id);
        slots.len() != before
    }

    /// Deliver `signal` to every live listener except the sender.
    ///
    /// Returns the number of listeners that received it.
    pub fn publish(&self, signal: &OccupationSignal<A>) -> usize {
        // Upgrade under the lock, deliver outside it, so a listener may
        // subscribe or publish from its handler.
        let (targets, saw_dead) = {
            let slots = self.slots.read().unwrap_or_else(|e| e.into_inner());
            let mut saw_dead = false;
            let targets: Vec<Arc<dyn OccupationListener<A>>> = slots
                .iter()
                .filter(|slot| slot.id != signal.sender)
                .filter_map(|slot| {
                    let live = slot.listener.upgrade();
                    saw_dead |= live.is_none();
                    live
                })
                .collect();
            (targets, saw_dead)
        };

        if saw_dead {
            self.prune();
        }

        for target in &targets {
            target.on_occupation(signal);
        }
        targets.len()
    }

    /// Serialises store-then-publish across every broker on this bus.
    ///
    /// Listeners run while the guard is held and must not submit on the
    /// same bus.
    pub(crate) fn claim(&self) -> MutexGuard<'_, ()> {
        self.claim.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Number of live subscriptions.
    pub fn subscriber_count(&self) -> usize {
        self.slots
            .read()
            .unwrap_or_else(|e| e.into_inner())
            .iter()
            .filter(|slot| slot.listener.strong_count() > 0)
            .count()
    }

    fn prune(&self) {
        let mut slots = self.slots.write().unwrap_or_else(|e| e.into_inner());
        slots.retain(|slot| slot.listener.strong_count() > 0);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct Recorder {
        id: BrokerId,
        seen: Mutex<Vec<String>>,
    }

    impl OccupationListener<String> for Recorder {
        fn listener_id(&self) -> BrokerId {
            self.id
        }

        fn on_occupation(&self, signal: &OccupationSignal<String>) {
            self.seen.lock().unwrap().push(signal.actor.clone());
        }
    }

    fn recorder() -> Arc<Recorder> {
        Arc::new(Recorder {
            id: BrokerId::new(),
            seen: Mutex::new(Vec::new()),
        })
    }

    fn signal(sender: BrokerId, actor: &str) -> OccupationSignal<String> {
        OccupationSignal {
            sender,
            actor: actor.to_string(),
            vocabulary: Arc::new(Vocabulary::default()),
        }
    }

    #[test]
    fn publish_skips_sender() {
        let bus = OccupationBus::new();
        let a = recorder();
        let b = recorder();
        let weak_a: Weak<dyn OccupationListener<String>> = Arc::downgrade(&a) as _;
        let weak_b: Weak<dyn OccupationListener<String>> = Arc::downgrade(&b) as _;
        bus.subscribe(weak_a);
        bus.subscribe(weak_b);

        assert_eq!(bus.publish(&signal(a.id, "steve")), 1);
        assert!(a.seen.lock().unwrap().is_empty());
        assert_eq!(*b.seen.lock().unwrap(), vec!["steve".to_string()]);
    }

    #[test]
    fn dropped_listeners_are_pruned() {
        let bus = OccupationBus::new();
        let a = recorder();
        let weak_a: Weak<dyn OccupationListener<String>> = Arc::downgrade(&a) as _;
        bus.subscribe(weak_a);
        assert_eq!(bus.subscriber_count(), 1);

        drop(a);
        assert_eq!(bus.publish(&signal(BrokerId::new(), "steve")), 0);
        assert_eq!(bus.subscriber_count(), 0);
    }

    #[test]
    fn unsubscribe_stops_delivery() {
        let bus = OccupationBus::new();
        let a = recorder();
        let weak_a: Weak<dyn OccupationListener<String>> = Arc::downgrade(&a) as _;
        let id = bus.subscribe(weak_a).unwrap();

        assert!(bus.unsubscribe(id));
        assert!(!bus.unsubscribe(id));
        assert_eq!(bus.publish(&signal(BrokerId::new(), "steve")), 0);
    }
}
