//! Multi-observer registry for connection-lifecycle events.
//!
//! Three channels: established (no payload), lost and failed (diagnostic
//! message). Any number of observers may subscribe to each; every observer of
//! a channel fires on the same logical transition. Dispatch works from a
//! snapshot of the handler list, so a handler may subscribe or remove
//! handlers (itself included). Handlers run on the driver thread and must
//! complete promptly; they must not call the stream's `begin`/`end`.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

// ----------------------------------------------------------------------------
// Handler Registry
// ----------------------------------------------------------------------------

/// Handle returned by a subscription, used to remove the observer again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct HandlerId(u64);

type EstablishedHandler = Arc<dyn Fn() + Send + Sync>;
type MessageHandler = Arc<dyn Fn(&str) + Send + Sync>;

/// Ordered lists of registered observers per event channel.
pub(crate) struct EventRegistry {
    next_id: AtomicU64,
    established: Mutex<Vec<(HandlerId, EstablishedHandler)>>,
    lost: Mutex<Vec<(HandlerId, MessageHandler)>>,
    failed: Mutex<Vec<(HandlerId, MessageHandler)>>,
}

impl EventRegistry {
    pub fn new() -> Self {
        Self {
            next_id: AtomicU64::new(1),
            established: Mutex::new(Vec::new()),
            lost: Mutex::new(Vec::new()),
            failed: Mutex::new(Vec::new()),
        }
    }

    fn allocate_id(&self) -> HandlerId {
        HandlerId(self.next_id.fetch_add(1, Ordering::Relaxed))
    }

    pub fn on_established(&self, handler: impl Fn() + Send + Sync + 'static) -> HandlerId {
        let id = self.allocate_id();
        self.established
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_lost(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> HandlerId {
        let id = self.allocate_id();
        self.lost
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    pub fn on_failed(&self, handler: impl Fn(&str) + Send + Sync + 'static) -> HandlerId {
        let id = self.allocate_id();
        self.failed
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((id, Arc::new(handler)));
        id
    }

    /// Remove a previously registered observer. Returns false if the handle
    /// was already removed.
    pub fn remove(&self, id: HandlerId) -> bool {
        Self::remove_from(&self.established, id)
            || Self::remove_from(&self.lost, id)
            || Self::remove_from(&self.failed, id)
    }

    fn remove_from<H>(list: &Mutex<Vec<(HandlerId, H)>>, id: HandlerId) -> bool {
        let mut handlers = list.lock().unwrap_or_else(PoisonError::into_inner);
        match handlers.iter().position(|(handle, _)| *handle == id) {
            Some(pos) => {
                handlers.remove(pos);
                true
            }
            None => false,
        }
    }

    pub fn fire_established(&self) {
        for handler in Self::snapshot(&self.established) {
            handler();
        }
    }

    pub fn fire_lost(&self, message: &str) {
        for handler in Self::snapshot(&self.lost) {
            handler(message);
        }
    }

    pub fn fire_failed(&self, message: &str) {
        for handler in Self::snapshot(&self.failed) {
            handler(message);
        }
    }

    /// Clone the current observer list so dispatch never holds the lock,
    /// letting a firing handler subscribe or remove handlers.
    fn snapshot<H: ?Sized>(list: &Mutex<Vec<(HandlerId, Arc<H>)>>) -> Vec<Arc<H>> {
        list.lock()
            .unwrap_or_else(PoisonError::into_inner)
            .iter()
            .map(|(_, handler)| Arc::clone(handler))
            .collect()
    }
}

impl Default for EventRegistry {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;
    use std::sync::Arc;

    #[test]
    fn every_observer_fires_on_the_same_transition() {
        let registry = EventRegistry::new();
        let first = Arc::new(AtomicUsize::new(0));
        let second = Arc::new(AtomicUsize::new(0));

        let a = Arc::clone(&first);
        registry.on_established(move || {
            a.fetch_add(1, Ordering::SeqCst);
        });
        let b = Arc::clone(&second);
        registry.on_established(move || {
            b.fetch_add(1, Ordering::SeqCst);
        });

        registry.fire_established();
        assert_eq!(first.load(Ordering::SeqCst), 1);
        assert_eq!(second.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn removed_observer_does_not_fire() {
        let registry = EventRegistry::new();
        let count = Arc::new(AtomicUsize::new(0));

        let c = Arc::clone(&count);
        let id = registry.on_lost(move |_| {
            c.fetch_add(1, Ordering::SeqCst);
        });

        assert!(registry.remove(id));
        assert!(!registry.remove(id));

        registry.fire_lost("gone");
        assert_eq!(count.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn message_reaches_failure_observers() {
        let registry = EventRegistry::new();
        let seen = Arc::new(Mutex::new(String::new()));

        let s = Arc::clone(&seen);
        registry.on_failed(move |message| {
            *s.lock().unwrap() = message.to_string();
        });

        registry.fire_failed("no device named Arduino101");
        assert_eq!(&*seen.lock().unwrap(), "no device named Arduino101");
    }

    #[test]
    fn handler_may_modify_the_registry_while_firing() {
        let registry = Arc::new(EventRegistry::new());
        let count = Arc::new(AtomicUsize::new(0));
        let own_id: Arc<Mutex<Option<HandlerId>>> = Arc::new(Mutex::new(None));

        let reg = Arc::clone(&registry);
        let c = Arc::clone(&count);
        let slot = Arc::clone(&own_id);
        let id = registry.on_established(move || {
            c.fetch_add(1, Ordering::SeqCst);
            if let Some(id) = slot.lock().unwrap().take() {
                reg.remove(id);
            }
        });
        *own_id.lock().unwrap() = Some(id);

        registry.fire_established();
        registry.fire_established();
        assert_eq!(count.load(Ordering::SeqCst), 1);
    }
}
