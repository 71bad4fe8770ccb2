//! CSRF token generation and request checks.

use base64::{Engine as _, engine::general_purpose::URL_SAFE_NO_PAD};
use hmac::{Hmac, Mac};
use keel_core::{AuthErrorKind, Error, Result};
use sha2::Sha256;
use subtle::ConstantTimeEq;

use crate::config::CsrfConfig;
use crate::session::{Session, SessionHandle, lock};

type HmacSha256 = Hmac<Sha256>;

/// Issues and checks CSRF tokens.
pub trait CsrfProvider: Send + Sync {
    fn generate(&self) -> Result<String>;

    fn validate(&self, token: Option<&str>) -> bool;
}

/// Tokens bound to the session identifier.
///
/// A token is the unpadded base64url HMAC-SHA256 of the session id under the
/// configured secret. Migrating or invalidating the session invalidates
/// every token issued before.
pub struct SessionCsrfProvider {
    session: SessionHandle,
    config: CsrfConfig,
}

impl std::fmt::Debug for SessionCsrfProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SessionCsrfProvider")
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl SessionCsrfProvider {
    pub fn new(session: SessionHandle, config: CsrfConfig) -> Self {
        Self { session, config }
    }

    pub fn config(&self) -> &CsrfConfig {
        &self.config
    }

    fn sign(&self) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.config.secret)
            .map_err(|e| Error::Custom(format!("HMAC init failed: {}", e)))?;
        mac.update(lock(&self.session).id().as_bytes());
        Ok(mac.finalize().into_bytes().to_vec())
    }
}

impl CsrfProvider for SessionCsrfProvider {
    fn generate(&self) -> Result<String> {
        Ok(URL_SAFE_NO_PAD.encode(self.sign()?))
    }

    fn validate(&self, token: Option<&str>) -> bool {
        let Some(token) = token else {
            return false;
        };
        let Ok(given) = URL_SAFE_NO_PAD.decode(token) else {
            return false;
        };
        match self.sign() {
            Ok(expected) => bool::from(expected.ct_eq(&given)),
            Err(_) => false,
        }
    }
}

/// Whether a route expects a CSRF token, and under which parameter.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub enum CsrfRequirement {
    #[default]
    None,
    /// Token expected under the configured field name.
    Required,
    /// Token expected under the given parameter.
    Param(String),
}

/// Rejects requests whose route requires a CSRF token that does not validate.
pub struct CsrfListener<P: CsrfProvider> {
    provider: P,
    field_name: String,
}

impl<P: CsrfProvider> std::fmt::Debug for CsrfListener<P> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CsrfListener")
            .field("field_name", &self.field_name)
            .finish_non_exhaustive()
    }
}

impl<P: CsrfProvider> CsrfListener<P> {
    pub fn new(provider: P, config: &CsrfConfig) -> Self {
        Self {
            provider,
            field_name: config.field_name.clone(),
        }
    }

    pub fn provider(&self) -> &P {
        &self.provider
    }

    /// Check a request. `param` looks up a request parameter by name.
    pub fn check<'r>(
        &self,
        requirement: &CsrfRequirement,
        param: impl Fn(&str) -> Option<&'r str>,
    ) -> Result<()> {
        let name = match requirement {
            CsrfRequirement::None => return Ok(()),
            CsrfRequirement::Required => self.field_name.as_str(),
            CsrfRequirement::Param(name) => name.as_str(),
        };

        if self.provider.validate(param(name)) {
            Ok(())
        } else {
            tracing::warn!(param = name, "CSRF validation failed");
            Err(Error::auth(AuthErrorKind::BadToken, 401, "Invalid CSRF token."))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySession, session_handle};
    use std::collections::HashMap;

    fn provider() -> (SessionHandle, SessionCsrfProvider) {
        let session = session_handle(MemorySession::with_id("abc123"));
        let provider = SessionCsrfProvider::new(session.clone(), CsrfConfig::new(b"secret".to_vec()));
        (session, provider)
    }

    #[test]
    fn test_generate_is_stable_per_session() {
        let (_, provider) = provider();
        let token = provider.generate().unwrap();
        assert_eq!(token, provider.generate().unwrap());
        // 32 bytes of HMAC output, unpadded base64url
        assert_eq!(token.len(), 43);
        assert!(!token.contains('='));
        assert!(provider.validate(Some(&token)));
    }

    #[test]
    fn test_validate_rejects_bad_tokens() {
        let (_, provider) = provider();
        assert!(!provider.validate(None));
        assert!(!provider.validate(Some("")));
        assert!(!provider.validate(Some("not base64 !")));
        assert!(!provider.validate(Some("AAAA")));
    }

    #[test]
    fn test_token_depends_on_secret() {
        let (session, provider) = provider();
        let other = SessionCsrfProvider::new(session, CsrfConfig::new(b"other".to_vec()));
        let token = provider.generate().unwrap();
        assert!(!other.validate(Some(&token)));
    }

    #[test]
    fn test_migrate_invalidates_tokens() {
        let (session, provider) = provider();
        let token = provider.generate().unwrap();

        lock(&session).migrate();
        assert!(!provider.validate(Some(&token)));
        assert!(provider.validate(Some(&provider.generate().unwrap())));
    }

    #[test]
    fn test_listener_requirements() {
        let (_, provider) = provider();
        let token = provider.generate().unwrap();
        let listener = CsrfListener::new(provider, &CsrfConfig::new(b"secret".to_vec()));

        let mut params: HashMap<&str, &str> = HashMap::new();
        params.insert("_csrf", token.as_str());
        params.insert("token", "forged");

        let lookup = |name: &str| params.get(name).copied();
        listener.check(&CsrfRequirement::None, lookup).unwrap();
        listener.check(&CsrfRequirement::Required, lookup).unwrap();

        let err = listener
            .check(&CsrfRequirement::Param("token".into()), lookup)
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::BadToken));
        assert!(err.to_string().contains("Invalid CSRF token."), "{err}");

        let err = listener
            .check(&CsrfRequirement::Param("missing".into()), lookup)
            .unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::BadToken));
    }
}
