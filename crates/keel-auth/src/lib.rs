//! Authentication, CSRF protection and cookies for Keel.
//!
//! `keel-auth` sits next to the ORM and shares its event dispatcher:
//!
//! - [`Auth`] authenticates credentials through a [`UserProvider`], keeps the
//!   logged-in user in a [`Session`] and broadcasts the `auth.*` events.
//! - [`SessionCsrfProvider`] derives CSRF tokens from the session id and
//!   [`CsrfListener`] rejects requests that carry a bad one.
//! - [`CookieJar`] reads request cookies and queues outgoing ones.
//!
//! HTTP transport and session storage are left to the host application.

pub mod auth;
pub mod config;
pub mod cookie;
pub mod csrf;
pub mod events;
pub mod session;
pub mod user;

pub use auth::Auth;
pub use config::{AuthConfig, CsrfConfig};
pub use cookie::{Cookie, CookieJar};
pub use csrf::{CsrfListener, CsrfProvider, CsrfRequirement, SessionCsrfProvider};
pub use events::{AuthEvents, AuthenticateEvent, AuthorizeEvent, LoginEvent, LogoutEvent};
pub use session::{MemorySession, Session, SessionHandle, session_handle};
pub use user::{Credentials, UserInterface, UserProvider};
