//! Users and the providers that look them up.

use std::collections::BTreeMap;
use std::sync::Arc;

use keel_core::Result;
use serde_json::Value;

/// Login form data, keyed by parameter name.
pub type Credentials = BTreeMap<String, String>;

/// An authenticated principal.
pub trait UserInterface: Send + Sync + 'static {
    /// Identifier stored in the session. Must round-trip through
    /// [`UserProvider::find`].
    fn id(&self) -> Value;

    fn username(&self) -> &str;
}

/// Source of users for [`Auth`](crate::Auth).
pub trait UserProvider<U: UserInterface>: Send + Sync {
    /// Load a user by the identifier stored in the session.
    fn find(&self, id: &Value) -> Result<Option<Arc<U>>>;

    /// Load the user the credentials claim to be.
    fn find_by_credentials(&self, credentials: &Credentials) -> Result<Option<Arc<U>>>;

    /// Check the credentials against the user, e.g. a password hash.
    fn validate_credentials(&self, user: &U, credentials: &Credentials) -> bool;
}
