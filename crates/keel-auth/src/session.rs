//! Session storage seen by the auth layer.
//!
//! Storage backends live in the host application; this crate only needs a
//! key/value view with an identifier that can be rotated.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::{Rng, distributions::Alphanumeric, thread_rng};
use serde_json::Value;

/// A user session.
pub trait Session: Send {
    /// The current session identifier.
    fn id(&self) -> &str;

    fn get(&self, key: &str) -> Option<Value>;

    fn set(&mut self, key: &str, value: Value);

    fn remove(&mut self, key: &str) -> Option<Value>;

    /// Issue a new identifier and keep the stored data.
    fn migrate(&mut self);

    /// Drop all stored data and issue a new identifier.
    fn invalidate(&mut self);
}

/// A session shared between the auth service, CSRF provider and request code.
pub type SessionHandle = Arc<Mutex<dyn Session>>;

/// Wrap a session so it can be shared.
pub fn session_handle(session: impl Session + 'static) -> SessionHandle {
    Arc::new(Mutex::new(session))
}

pub(crate) fn lock(session: &SessionHandle) -> MutexGuard<'_, dyn Session + 'static> {
    session.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Process-local session backed by a `HashMap`.
#[derive(Debug, Clone)]
pub struct MemorySession {
    id: String,
    data: HashMap<String, Value>,
}

impl Default for MemorySession {
    fn default() -> Self {
        Self::new()
    }
}

impl MemorySession {
    pub fn new() -> Self {
        Self {
            id: generate_id(),
            data: HashMap::new(),
        }
    }

    /// A session with a fixed identifier.
    pub fn with_id(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            data: HashMap::new(),
        }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl Session for MemorySession {
    fn id(&self) -> &str {
        &self.id
    }

    fn get(&self, key: &str) -> Option<Value> {
        self.data.get(key).cloned()
    }

    fn set(&mut self, key: &str, value: Value) {
        self.data.insert(key.to_string(), value);
    }

    fn remove(&mut self, key: &str) -> Option<Value> {
        self.data.remove(key)
    }

    fn migrate(&mut self) {
        self.id = generate_id();
        tracing::trace!("Session migrated");
    }

    fn invalidate(&mut self) {
        self.data.clear();
        self.id = generate_id();
        tracing::trace!("Session invalidated");
    }
}

fn generate_id() -> String {
    thread_rng()
        .sample_iter(&Alphanumeric)
        .take(32)
        .map(char::from)
        .collect()
}
