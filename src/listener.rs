//! Listener traits and the registries that fan messages out to them.

use std::sync::{
    atomic::{AtomicU64, Ordering},
    Arc,
};

use crate::{manager::Status, message::Message};

/// Listener can be registered to a manager and receive every inbound message.
pub trait MessageListener: Send + Sync {
    /// callback executed for each inbound message
    fn on_message(&self, message: &Message);
}

impl<F> MessageListener for F
where
    F: Fn(&Message) + Send + Sync,
{
    fn on_message(&self, message: &Message) {
        self(message)
    }
}

/// Listener can be registered to a manager and receive connection status changes.
pub trait StatusListener: Send + Sync {
    /// callback executed for each status transition
    fn on_status(&self, status: Status);
}

impl<F> StatusListener for F
where
    F: Fn(Status) + Send + Sync,
{
    fn on_status(&self, status: Status) {
        self(status)
    }
}

/// Token identifying one registration, used to remove it later.
///
/// Registering the same listener twice yields two distinct tokens, and the
/// listener runs twice per delivery until one of them is removed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerId(u64);

impl ListenerId {
    pub(crate) fn next() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        Self(COUNTER.fetch_add(1, Ordering::Relaxed))
    }
}

/// Registration-ordered listener set.
pub(crate) struct Registry<T: ?Sized> {
    entries: Vec<(ListenerId, Arc<T>)>,
}

// derive would require T: Debug, which trait objects here never are
impl<T: ?Sized> std::fmt::Debug for Registry<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Registry")
            .field("len", &self.entries.len())
            .finish()
    }
}

impl<T: ?Sized> Registry<T> {
    pub fn new() -> Self {
        Self {
            entries: Vec::new(),
        }
    }

    pub fn insert(&mut self, id: ListenerId, listener: Arc<T>) {
        self.entries.push((id, listener));
    }

    pub fn remove(&mut self, id: ListenerId) {
        self.entries.retain(|(entry_id, _)| *entry_id != id);
    }

    /// Clone the current listener set.
    ///
    /// Delivery iterates this snapshot, so listeners added or removed while a
    /// delivery is in flight only affect later deliveries.
    pub fn snapshot(&self) -> Vec<Arc<T>> {
        self.entries
            .iter()
            .map(|(_, listener)| Arc::clone(listener))
            .collect()
    }
}

#[cfg(test)]
mod test {
    use std::sync::Mutex;

    use super::*;

    #[test]
    fn remove_only_drops_the_matching_registration() {
        let calls = Arc::new(Mutex::new(Vec::new()));

        let mut registry: Registry<dyn MessageListener> = Registry::new();

        let first = ListenerId::next();
        let first_calls = Arc::clone(&calls);
        registry.insert(
            first,
            Arc::new(move |_: &Message| {
                first_calls.lock().unwrap().push("first");
            }),
        );
        let second_calls = Arc::clone(&calls);
        registry.insert(
            ListenerId::next(),
            Arc::new(move |_: &Message| {
                second_calls.lock().unwrap().push("second");
            }),
        );

        registry.remove(first);

        let message = Message::new("weather", "update");
        for listener in registry.snapshot() {
            listener.on_message(&message);
        }

        assert_eq!(*calls.lock().unwrap(), vec!["second"]);
    }

    #[test]
    fn duplicate_registration_runs_twice() {
        let count = Arc::new(Mutex::new(0));

        let mut registry: Registry<dyn MessageListener> = Registry::new();
        for _ in 0..2 {
            let count = Arc::clone(&count);
            registry.insert(
                ListenerId::next(),
                Arc::new(move |_: &Message| {
                    *count.lock().unwrap() += 1;
                }),
            );
        }

        let message = Message::new("weather", "update");
        for listener in registry.snapshot() {
            listener.on_message(&message);
        }

        assert_eq!(*count.lock().unwrap(), 2);
    }

    #[test]
    fn ids_are_unique() {
        let a = ListenerId::next();
        let b = ListenerId::next();

        assert_ne!(a, b);
    }
}
