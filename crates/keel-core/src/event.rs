//! Framework-level event dispatching.
//!
//! Lifecycle hooks, authentication and CSRF checks all broadcast named
//! events through an [`EventDispatcher`]. Dispatch is synchronous and
//! fire-and-forget: listeners may mutate the payload, but nothing they
//! return is seen by the caller.

use std::any::Any;
use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};

/// A payload carried through the dispatcher.
pub trait Event: Any + Send {
    fn as_any(&self) -> &dyn Any;

    fn as_any_mut(&mut self) -> &mut dyn Any;

    /// Whether a listener asked to skip the remaining listeners.
    fn is_propagation_stopped(&self) -> bool {
        false
    }

    /// Ask the dispatcher to skip the remaining listeners.
    fn stop_propagation(&mut self) {}
}

impl<'a> dyn Event + 'a {
    /// Downcast to a concrete payload type.
    pub fn downcast_ref<T: Event>(&self) -> Option<&T> {
        self.as_any().downcast_ref::<T>()
    }

    /// Downcast to a concrete payload type, mutably.
    pub fn downcast_mut<T: Event>(&mut self) -> Option<&mut T> {
        self.as_any_mut().downcast_mut::<T>()
    }
}

/// Anything that can broadcast a named event.
pub trait EventDispatcher: Send + Sync {
    fn dispatch(&self, name: &str, event: &mut dyn Event);
}

/// Listener callback: receives the event name and payload.
pub type Listener = Arc<dyn Fn(&str, &mut dyn Event) + Send + Sync>;

struct ListenerEntry {
    priority: i32,
    seq: u64,
    listener: Listener,
}

#[derive(Default)]
struct Registry {
    listeners: HashMap<String, Vec<ListenerEntry>>,
    next_seq: u64,
}

/// Priority-ordered listener registry.
///
/// Higher priorities run first; listeners with equal priority run in
/// registration order.
#[derive(Default)]
pub struct Dispatcher {
    registry: RwLock<Registry>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        let mut names: Vec<&String> = registry.listeners.keys().collect();
        names.sort();
        f.debug_struct("Dispatcher").field("events", &names).finish()
    }
}

impl Dispatcher {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a listener with priority 0.
    pub fn listen(
        &self,
        name: impl Into<String>,
        listener: impl Fn(&str, &mut dyn Event) + Send + Sync + 'static,
    ) {
        self.listen_with_priority(name, 0, listener);
    }

    /// Register a listener with an explicit priority.
    pub fn listen_with_priority(
        &self,
        name: impl Into<String>,
        priority: i32,
        listener: impl Fn(&str, &mut dyn Event) + Send + Sync + 'static,
    ) {
        let mut registry = self.registry.write().unwrap_or_else(PoisonError::into_inner);
        let seq = registry.next_seq;
        registry.next_seq += 1;

        let entries = registry.listeners.entry(name.into()).or_default();
        entries.push(ListenerEntry {
            priority,
            seq,
            listener: Arc::new(listener),
        });
        entries.sort_by(|a, b| b.priority.cmp(&a.priority).then(a.seq.cmp(&b.seq)));
    }

    /// Whether any listener is registered for `name`.
    pub fn has_listeners(&self, name: &str) -> bool {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry.listeners.get(name).is_some_and(|l| !l.is_empty())
    }

    fn listeners_for(&self, name: &str) -> Vec<Listener> {
        let registry = self.registry.read().unwrap_or_else(PoisonError::into_inner);
        registry
            .listeners
            .get(name)
            .map(|entries| entries.iter().map(|e| Arc::clone(&e.listener)).collect())
            .unwrap_or_default()
    }
}

impl EventDispatcher for Dispatcher {
    fn dispatch(&self, name: &str, event: &mut dyn Event) {
        // Listeners are cloned out so they may register further listeners.
        let listeners = self.listeners_for(name);
        tracing::trace!(event = name, listeners = listeners.len(), "Dispatching event");

        for listener in listeners {
            listener(name, event);
            if event.is_propagation_stopped() {
                tracing::trace!(event = name, "Event propagation stopped");
                break;
            }
        }
    }
}
