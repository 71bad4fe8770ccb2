//! Session-backed authentication.

use std::sync::Arc;

use keel_core::{AuthErrorKind, Error, EventDispatcher, Result};
use serde_json::Value;

use crate::config::AuthConfig;
use crate::events::{AuthEvents, AuthenticateEvent, AuthorizeEvent, LoginEvent, LogoutEvent};
use crate::session::{Session, SessionHandle, lock};
use crate::user::{Credentials, UserInterface, UserProvider};

/// Authentication service.
///
/// The session stores the identifier of the logged-in user together with
/// the refresh token that was current when it was written. The user itself
/// is loaded through the registered [`UserProvider`] on first access and
/// cached for the lifetime of the service.
pub struct Auth<U: UserInterface> {
    config: AuthConfig,
    events: Arc<dyn EventDispatcher>,
    session: Option<SessionHandle>,
    provider: Option<Arc<dyn UserProvider<U>>>,
    user: Option<Arc<U>>,
    token: Option<String>,
}

impl<U: UserInterface> std::fmt::Debug for Auth<U> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Auth")
            .field("realm", &self.config.realm)
            .field("has_session", &self.session.is_some())
            .field("has_provider", &self.provider.is_some())
            .field("user", &self.user.as_ref().map(|u| u.username().to_string()))
            .finish_non_exhaustive()
    }
}

impl<U: UserInterface> Auth<U> {
    pub fn new(events: Arc<dyn EventDispatcher>, session: Option<SessionHandle>) -> Self {
        Self::with_config(events, session, AuthConfig::default())
    }

    pub fn with_config(
        events: Arc<dyn EventDispatcher>,
        session: Option<SessionHandle>,
        config: AuthConfig,
    ) -> Self {
        Self {
            config,
            events,
            session,
            provider: None,
            user: None,
            token: None,
        }
    }

    pub fn config(&self) -> &AuthConfig {
        &self.config
    }

    /// The session key for `var`.
    pub fn name(&self, var: &str) -> String {
        self.config.session_key(var)
    }

    pub fn session(&self) -> Result<&SessionHandle> {
        self.session
            .as_ref()
            .ok_or_else(|| Error::auth(AuthErrorKind::Session, 500, "No session has been set."))
    }

    pub fn set_session(&mut self, session: SessionHandle) {
        self.session = Some(session);
        self.user = None;
    }

    pub fn user_provider(&self) -> Result<&Arc<dyn UserProvider<U>>> {
        self.provider.as_ref().ok_or_else(|| {
            Error::auth(
                AuthErrorKind::MissingProvider,
                500,
                "Accessed user provider prior to registering it.",
            )
        })
    }

    pub fn set_user_provider(&mut self, provider: Arc<dyn UserProvider<U>>) {
        self.provider = Some(provider);
    }

    /// The current refresh token.
    pub fn token(&self) -> Option<&str> {
        self.token.as_deref()
    }

    /// The logged-in user, if any.
    ///
    /// When the token stored with the session differs from the current
    /// refresh token, the session is rewritten with the current one.
    pub fn user(&mut self) -> Result<Option<Arc<U>>> {
        if let Some(user) = &self.user {
            return Ok(Some(Arc::clone(user)));
        }

        let user_key = self.name("user");
        let token_key = self.name("token");
        let (id, stored_token) = {
            let session = lock(self.session()?);
            (session.get(&user_key), session.get(&token_key))
        };
        let id = match id {
            Some(id) if !id.is_null() => id,
            _ => return Ok(None),
        };

        let Some(user) = self.user_provider()?.find(&id)? else {
            tracing::debug!(id = %id, "Session user no longer exists");
            let mut session = lock(self.session()?);
            session.remove(&user_key);
            session.remove(&token_key);
            return Ok(None);
        };

        let current = token_value(self.token.as_deref());
        if stored_token.unwrap_or(Value::Null) != current {
            tracing::trace!(user = user.username(), "Refreshing session user");
            let mut session = lock(self.session()?);
            session.set(&user_key, user.id());
            session.set(&token_key, current);
        }

        self.user = Some(Arc::clone(&user));
        Ok(Some(user))
    }

    /// Store `user` in the session and make it the current user.
    pub fn set_user(&mut self, user: Arc<U>) -> Result<()> {
        {
            let mut session = lock(self.session()?);
            session.set(&self.name("user"), user.id());
            session.set(&self.name("token"), token_value(self.token.as_deref()));
        }
        self.user = Some(user);
        Ok(())
    }

    /// Look up and verify the user the credentials belong to.
    ///
    /// On failure the submitted username is remembered in the session under
    /// [`AuthConfig::last_username_key`].
    pub fn authenticate(&mut self, credentials: Credentials) -> Result<Arc<U>> {
        let mut event = AuthenticateEvent::<U>::new(credentials, None);
        self.events.dispatch(AuthEvents::PRE_AUTHENTICATE, &mut event);
        let credentials = event.into_credentials();

        let provider = Arc::clone(self.user_provider()?);
        let user = provider.find_by_credentials(&credentials)?;
        let valid = user
            .as_deref()
            .is_some_and(|u| provider.validate_credentials(u, &credentials));

        match user {
            Some(user) if valid => {
                let mut event = AuthenticateEvent::new(credentials, Some(Arc::clone(&user)));
                self.events.dispatch(AuthEvents::SUCCESS, &mut event);
                lock(self.session()?).remove(&self.config.last_username_key);
                tracing::debug!(user = user.username(), "Authentication succeeded");
                Ok(user)
            }
            user => {
                let username = credentials
                    .get(&self.config.username_param)
                    .cloned()
                    .unwrap_or_default();
                lock(self.session()?).set(&self.config.last_username_key, Value::from(username.as_str()));
                tracing::warn!(username = %username, "Authentication failed");

                let mut event = AuthenticateEvent::new(credentials, user);
                self.events.dispatch(AuthEvents::FAILURE, &mut event);
                Err(Error::auth(AuthErrorKind::BadCredentials, 401, "Invalid credentials."))
            }
        }
    }

    /// Ask the `auth.authorize` listeners whether `user` may log in.
    pub fn authorize(&self, user: &Arc<U>) -> Result<()> {
        let mut event = AuthorizeEvent::new(Arc::clone(user));
        self.events.dispatch(AuthEvents::AUTHORIZE, &mut event);
        match event.denied() {
            Some(message) => {
                tracing::warn!(user = user.username(), reason = message, "Authorization denied");
                Err(Error::auth(AuthErrorKind::Denied, 403, message))
            }
            None => Ok(()),
        }
    }

    /// Log `user` in on a fresh session identifier.
    ///
    /// Returns the redirect location a `auth.login` listener asked for.
    pub fn login(&mut self, user: Arc<U>) -> Result<Option<String>> {
        lock(self.session()?).migrate();
        self.set_user(Arc::clone(&user))?;

        tracing::debug!(user = user.username(), "User logged in");
        let mut event = LoginEvent::new(user);
        self.events.dispatch(AuthEvents::LOGIN, &mut event);
        Ok(event.into_response())
    }

    /// Log the current user out and invalidate the session.
    ///
    /// Returns the redirect location a `auth.logout` listener asked for.
    pub fn logout(&mut self) -> Result<Option<String>> {
        let mut event = LogoutEvent::new(self.user.take());
        self.events.dispatch(AuthEvents::LOGOUT, &mut event);

        lock(self.session()?).invalidate();
        if let Some(user) = event.user() {
            tracing::debug!(user = user.username(), "User logged out");
        }
        Ok(event.into_response())
    }

    /// Replace the refresh token.
    pub fn refresh(&mut self, token: Option<String>) {
        self.token = token;
    }
}

fn token_value(token: Option<&str>) -> Value {
    token.map_or(Value::Null, Value::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::session::{MemorySession, session_handle};
    use keel_core::{Dispatcher, Event};
    use serde_json::json;
    use std::collections::HashMap;
    use std::sync::Mutex;

    #[derive(Debug)]
    struct Account {
        id: i64,
        username: String,
        password: String,
    }

    impl UserInterface for Account {
        fn id(&self) -> Value {
            json!(self.id)
        }

        fn username(&self) -> &str {
            &self.username
        }
    }

    #[derive(Default)]
    struct Accounts {
        by_id: HashMap<i64, Arc<Account>>,
        finds: Mutex<usize>,
    }

    impl Accounts {
        fn with(users: &[(i64, &str, &str)]) -> Self {
            let mut accounts = Self::default();
            for (id, username, password) in users {
                accounts.by_id.insert(
                    *id,
                    Arc::new(Account {
                        id: *id,
                        username: (*username).to_string(),
                        password: (*password).to_string(),
                    }),
                );
            }
            accounts
        }
    }

    impl UserProvider<Account> for Accounts {
        fn find(&self, id: &Value) -> Result<Option<Arc<Account>>> {
            *self.finds.lock().unwrap() += 1;
            Ok(id.as_i64().and_then(|id| self.by_id.get(&id).cloned()))
        }

        fn find_by_credentials(&self, credentials: &Credentials) -> Result<Option<Arc<Account>>> {
            let username = credentials.get("username").map(String::as_str);
            Ok(self
                .by_id
                .values()
                .find(|a| Some(a.username.as_str()) == username)
                .cloned())
        }

        fn validate_credentials(&self, user: &Account, credentials: &Credentials) -> bool {
            credentials.get("password") == Some(&user.password)
        }
    }

    struct Fixture {
        auth: Auth<Account>,
        session: SessionHandle,
        dispatcher: Arc<Dispatcher>,
        provider: Arc<Accounts>,
        log: Arc<Mutex<Vec<String>>>,
    }

    fn fixture() -> Fixture {
        let session = session_handle(MemorySession::with_id("initial"));
        let dispatcher = Arc::new(Dispatcher::new());
        let log = Arc::new(Mutex::new(Vec::new()));
        for name in [
            AuthEvents::PRE_AUTHENTICATE,
            AuthEvents::SUCCESS,
            AuthEvents::FAILURE,
            AuthEvents::AUTHORIZE,
            AuthEvents::LOGIN,
            AuthEvents::LOGOUT,
        ] {
            let log = Arc::clone(&log);
            dispatcher.listen(name, move |name: &str, _: &mut dyn Event| {
                log.lock().unwrap().push(name.to_string());
            });
        }

        let provider = Arc::new(Accounts::with(&[(1, "ann", "secret"), (2, "bob", "hunter2")]));
        let mut auth = Auth::new(dispatcher.clone(), Some(Arc::clone(&session)));
        auth.set_user_provider(provider.clone());
        Fixture {
            auth,
            session,
            dispatcher,
            provider,
            log,
        }
    }

    fn credentials(username: &str, password: &str) -> Credentials {
        Credentials::from([
            ("username".to_string(), username.to_string()),
            ("password".to_string(), password.to_string()),
        ])
    }

    #[test]
    fn test_authenticate_success() {
        let mut f = fixture();
        lock(&f.session).set("_auth.last_username", json!("old"));

        let user = f.auth.authenticate(credentials("ann", "secret")).unwrap();
        assert_eq!(user.username(), "ann");
        assert_eq!(
            *f.log.lock().unwrap(),
            vec!["auth.pre_authenticate", "auth.success"]
        );
        assert!(lock(&f.session).get("_auth.last_username").is_none());
    }

    #[test]
    fn test_authenticate_failure_remembers_username() {
        let mut f = fixture();

        let err = f.auth.authenticate(credentials("ann", "wrong")).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::BadCredentials));
        assert_eq!(
            *f.log.lock().unwrap(),
            vec!["auth.pre_authenticate", "auth.failure"]
        );
        assert_eq!(lock(&f.session).get("_auth.last_username"), Some(json!("ann")));

        let err = f.auth.authenticate(credentials("nobody", "x")).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::BadCredentials));
        assert_eq!(lock(&f.session).get("_auth.last_username"), Some(json!("nobody")));
    }

    #[test]
    fn test_failure_event_carries_matched_user() {
        let mut f = fixture();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        f.dispatcher.listen(AuthEvents::FAILURE, move |_: &str, event: &mut dyn Event| {
            if let Some(event) = event.downcast_ref::<AuthenticateEvent<Account>>() {
                *sink.lock().unwrap() = event.user().map(|u| u.username().to_string());
            }
        });

        f.auth.authenticate(credentials("bob", "wrong")).unwrap_err();
        assert_eq!(seen.lock().unwrap().as_deref(), Some("bob"));
    }

    #[test]
    fn test_pre_authenticate_may_rewrite_credentials() {
        let mut f = fixture();
        f.dispatcher.listen(
            AuthEvents::PRE_AUTHENTICATE,
            |_: &str, event: &mut dyn Event| {
                if let Some(event) = event.downcast_mut::<AuthenticateEvent<Account>>() {
                    event.credentials_mut().insert("username".into(), "bob".into());
                }
            },
        );

        let user = f.auth.authenticate(credentials("BOB", "hunter2")).unwrap();
        assert_eq!(user.username(), "bob");
    }

    #[test]
    fn test_missing_provider() {
        let session = session_handle(MemorySession::new());
        let mut auth: Auth<Account> = Auth::new(Arc::new(Dispatcher::new()), Some(session));

        let err = auth.authenticate(credentials("ann", "secret")).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::MissingProvider));
    }

    #[test]
    fn test_missing_session() {
        let mut auth: Auth<Account> = Auth::new(Arc::new(Dispatcher::new()), None);
        let err = auth.user().unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::Session));
    }

    #[test]
    fn test_authorize_denied_by_listener() {
        let f = fixture();
        f.dispatcher.listen(AuthEvents::AUTHORIZE, |_: &str, event: &mut dyn Event| {
            if let Some(event) = event.downcast_mut::<AuthorizeEvent<Account>>() {
                if event.user().username() == "bob" {
                    event.deny("Your account is blocked.");
                }
            }
        });

        let ann = f.provider.by_id[&1].clone();
        let bob = f.provider.by_id[&2].clone();
        f.auth.authorize(&ann).unwrap();

        let err = f.auth.authorize(&bob).unwrap_err();
        assert_eq!(err.auth_kind(), Some(AuthErrorKind::Denied));
        assert!(err.to_string().contains("blocked"), "{err}");
    }

    #[test]
    fn test_login_migrates_session_and_stores_user() {
        let mut f = fixture();
        f.dispatcher.listen(AuthEvents::LOGIN, |_: &str, event: &mut dyn Event| {
            if let Some(event) = event.downcast_mut::<LoginEvent<Account>>() {
                event.set_response("/dashboard");
            }
        });
        let ann = f.provider.by_id[&1].clone();

        let response = f.auth.login(ann).unwrap();
        assert_eq!(response.as_deref(), Some("/dashboard"));
        assert_ne!(lock(&f.session).id(), "initial");
        assert_eq!(lock(&f.session).get(&f.auth.name("user")), Some(json!(1)));
        assert_eq!(lock(&f.session).get(&f.auth.name("token")), Some(Value::Null));
        assert_eq!(f.auth.user().unwrap().unwrap().username(), "ann");
        assert_eq!(*f.provider.finds.lock().unwrap(), 0);
    }

    #[test]
    fn test_user_loaded_from_session() {
        let mut f = fixture();
        let key = f.auth.name("user");
        lock(&f.session).set(&key, json!(2));
        lock(&f.session).set(&f.auth.name("token"), Value::Null);

        let user = f.auth.user().unwrap().unwrap();
        assert_eq!(user.username(), "bob");
        // cached after the first lookup
        f.auth.user().unwrap();
        assert_eq!(*f.provider.finds.lock().unwrap(), 1);
    }

    #[test]
    fn test_user_refreshed_when_token_changes() {
        let mut f = fixture();
        lock(&f.session).set(&f.auth.name("user"), json!(1));
        lock(&f.session).set(&f.auth.name("token"), json!("v1"));

        f.auth.refresh(Some("v2".to_string()));
        let user = f.auth.user().unwrap().unwrap();
        assert_eq!(user.username(), "ann");
        assert_eq!(lock(&f.session).get(&f.auth.name("token")), Some(json!("v2")));
    }

    #[test]
    fn test_stale_session_user_is_dropped() {
        let mut f = fixture();
        lock(&f.session).set(&f.auth.name("user"), json!(99));

        assert!(f.auth.user().unwrap().is_none());
        assert!(lock(&f.session).get(&f.auth.name("user")).is_none());
    }

    #[test]
    fn test_logout_invalidates_session() {
        let mut f = fixture();
        let seen = Arc::new(Mutex::new(None));
        let sink = Arc::clone(&seen);
        f.dispatcher.listen(AuthEvents::LOGOUT, move |_: &str, event: &mut dyn Event| {
            if let Some(event) = event.downcast_mut::<LogoutEvent<Account>>() {
                *sink.lock().unwrap() = event.user().map(|u| u.username().to_string());
                event.set_response("/");
            }
        });
        let bob = f.provider.by_id[&2].clone();
        f.auth.login(bob).unwrap();

        let response = f.auth.logout().unwrap();
        assert_eq!(response.as_deref(), Some("/"));
        assert_eq!(seen.lock().unwrap().as_deref(), Some("bob"));
        assert!(lock(&f.session).get(&f.auth.name("user")).is_none());
        assert!(f.auth.user().unwrap().is_none());
        assert_eq!(
            *f.log.lock().unwrap(),
            vec!["auth.login", "auth.logout"]
        );
    }

    #[test]
    fn test_realms_do_not_share_users() {
        let f = fixture();
        let mut admin: Auth<Account> = Auth::with_config(
            f.dispatcher.clone(),
            Some(Arc::clone(&f.session)),
            AuthConfig::new().realm("admin"),
        );
        admin.set_user_provider(f.provider.clone());

        let mut auth = f.auth;
        auth.login(f.provider.by_id[&1].clone()).unwrap();
        assert!(admin.user().unwrap().is_none());
    }
}
