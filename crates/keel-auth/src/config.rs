//! Auth and CSRF configuration.

use sha1::{Digest, Sha1};

/// Configuration for [`Auth`](crate::Auth).
#[derive(Debug, Clone)]
pub struct AuthConfig {
    /// Namespace of the session keys. Two services with different realms
    /// never see each other's user.
    pub realm: String,
    /// Credentials entry holding the username.
    pub username_param: String,
    /// Session key remembering the username of the last failed attempt.
    pub last_username_key: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            realm: "keel.auth".to_string(),
            username_param: "username".to_string(),
            last_username_key: "_auth.last_username".to_string(),
        }
    }
}

impl AuthConfig {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the session key namespace (builder pattern).
    #[must_use]
    pub fn realm(mut self, realm: impl Into<String>) -> Self {
        self.realm = realm.into();
        self
    }

    #[must_use]
    pub fn username_param(mut self, param: impl Into<String>) -> Self {
        self.username_param = param.into();
        self
    }

    #[must_use]
    pub fn last_username_key(mut self, key: impl Into<String>) -> Self {
        self.last_username_key = key.into();
        self
    }

    /// Session key for `var`, e.g. `_auth.user_<sha1(realm)>`.
    pub fn session_key(&self, var: &str) -> String {
        format!("_auth.{var}_{:x}", Sha1::digest(self.realm.as_bytes()))
    }
}

/// Configuration for [`SessionCsrfProvider`](crate::SessionCsrfProvider)
/// and [`CsrfListener`](crate::CsrfListener).
#[derive(Clone)]
pub struct CsrfConfig {
    /// HMAC key the tokens are derived with.
    pub secret: Vec<u8>,
    /// Request parameter carrying the token when a route does not name one.
    pub field_name: String,
}

impl std::fmt::Debug for CsrfConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfConfig")
            .field("secret", &"<redacted>")
            .field("field_name", &self.field_name)
            .finish()
    }
}

impl CsrfConfig {
    pub fn new(secret: impl Into<Vec<u8>>) -> Self {
        Self {
            secret: secret.into(),
            field_name: "_csrf".to_string(),
        }
    }

    #[must_use]
    pub fn field_name(mut self, name: impl Into<String>) -> Self {
        self.field_name = name.into();
        self
    }
}
