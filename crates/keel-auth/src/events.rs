//! Events broadcast by [`Auth`](crate::Auth).

use std::any::Any;
use std::sync::Arc;

use keel_core::Event;

use crate::user::{Credentials, UserInterface};

/// Event names dispatched by the auth service.
pub struct AuthEvents;

impl AuthEvents {
    pub const PRE_AUTHENTICATE: &'static str = "auth.pre_authenticate";
    pub const SUCCESS: &'static str = "auth.success";
    pub const FAILURE: &'static str = "auth.failure";
    pub const AUTHORIZE: &'static str = "auth.authorize";
    pub const LOGIN: &'static str = "auth.login";
    pub const LOGOUT: &'static str = "auth.logout";
}

macro_rules! impl_event {
    ($ty:ident) => {
        impl<U: UserInterface> Event for $ty<U> {
            fn as_any(&self) -> &dyn Any {
                self
            }

            fn as_any_mut(&mut self) -> &mut dyn Any {
                self
            }

            fn is_propagation_stopped(&self) -> bool {
                self.stopped
            }

            fn stop_propagation(&mut self) {
                self.stopped = true;
            }
        }
    };
}

/// Payload of `auth.pre_authenticate`, `auth.success` and `auth.failure`.
pub struct AuthenticateEvent<U: UserInterface> {
    credentials: Credentials,
    user: Option<Arc<U>>,
    stopped: bool,
}

impl<U: UserInterface> AuthenticateEvent<U> {
    pub fn new(credentials: Credentials, user: Option<Arc<U>>) -> Self {
        Self {
            credentials,
            user,
            stopped: false,
        }
    }

    pub fn credentials(&self) -> &Credentials {
        &self.credentials
    }

    /// Listeners of `auth.pre_authenticate` may normalize the credentials.
    pub fn credentials_mut(&mut self) -> &mut Credentials {
        &mut self.credentials
    }

    pub(crate) fn into_credentials(self) -> Credentials {
        self.credentials
    }

    /// The matched user; `None` before lookup or when no user matched.
    pub fn user(&self) -> Option<&Arc<U>> {
        self.user.as_ref()
    }
}

impl_event!(AuthenticateEvent);

/// Payload of `auth.authorize`. Any listener may deny access.
pub struct AuthorizeEvent<U: UserInterface> {
    user: Arc<U>,
    denied: Option<String>,
    stopped: bool,
}

impl<U: UserInterface> AuthorizeEvent<U> {
    pub fn new(user: Arc<U>) -> Self {
        Self {
            user,
            denied: None,
            stopped: false,
        }
    }

    pub fn user(&self) -> &Arc<U> {
        &self.user
    }

    /// Refuse authorization. Remaining listeners are skipped.
    pub fn deny(&mut self, message: impl Into<String>) {
        self.denied = Some(message.into());
        self.stopped = true;
    }

    pub fn denied(&self) -> Option<&str> {
        self.denied.as_deref()
    }
}

impl_event!(AuthorizeEvent);

/// Payload of `auth.login`.
pub struct LoginEvent<U: UserInterface> {
    user: Arc<U>,
    response: Option<String>,
    stopped: bool,
}

impl<U: UserInterface> LoginEvent<U> {
    pub fn new(user: Arc<U>) -> Self {
        Self {
            user,
            response: None,
            stopped: false,
        }
    }

    pub fn user(&self) -> &Arc<U> {
        &self.user
    }

    /// Redirect the client to `location` once logged in.
    pub fn set_response(&mut self, location: impl Into<String>) {
        self.response = Some(location.into());
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub(crate) fn into_response(self) -> Option<String> {
        self.response
    }
}

impl_event!(LoginEvent);

/// Payload of `auth.logout`.
pub struct LogoutEvent<U: UserInterface> {
    user: Option<Arc<U>>,
    response: Option<String>,
    stopped: bool,
}

impl<U: UserInterface> LogoutEvent<U> {
    pub fn new(user: Option<Arc<U>>) -> Self {
        Self {
            user,
            response: None,
            stopped: false,
        }
    }

    /// The user being logged out, if one was loaded.
    pub fn user(&self) -> Option<&Arc<U>> {
        self.user.as_ref()
    }

    pub fn set_response(&mut self, location: impl Into<String>) {
        self.response = Some(location.into());
    }

    pub fn response(&self) -> Option<&str> {
        self.response.as_deref()
    }

    pub(crate) fn into_response(self) -> Option<String> {
        self.response
    }
}

impl_event!(LogoutEvent);
