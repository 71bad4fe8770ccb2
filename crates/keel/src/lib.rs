//! Keel - a metadata-driven entity manager and auth layer for web applications.
//!
//! Keel maps plain Rust structs onto tables and tracks every loaded row as
//! exactly one shared instance:
//!
//! - Declarative mappings through `#[derive(Entity)]` or JSON documents
//! - An identity map defining the NEW / MANAGED / DETACHED lifecycle
//! - Lifecycle callbacks and framework-wide events (`preSave` .. `postLoad`)
//! - Batched relation loading (belongs-to, has-one, has-many, many-to-many)
//! - Session authentication, CSRF tokens and cookie queueing
//!
//! # Quick Start
//!
//! ```ignore
//! use keel::prelude::*;
//! use std::sync::Arc;
//!
//! #[derive(Debug, Default, Entity)]
//! #[entity(table = "users")]
//! struct User {
//!     #[column(id)]
//!     id: Option<i64>,
//!     #[column]
//!     name: String,
//! }
//!
//! let connection = Arc::new(MemoryConnection::new());
//! connection.create_table("users", &["id", "name"], Some("id"));
//!
//! let mut em = EntityManager::new(connection, Arc::new(MetadataManager::new()));
//! let ann = entity_ref(User { name: "Ann".into(), ..Default::default() });
//! em.save(&ann)?;
//! assert_eq!(em.state(&ann)?, EntityState::Managed);
//! ```
//!
//! The derive macro expands to paths under `::keel_orm`, so crates deriving
//! `Entity` depend on `keel-orm` next to `keel`.

pub use keel_core::{
    AuthError, AuthErrorKind, ConfigError, ConfigErrorKind, Connection, Dispatcher, Error, Event,
    EventDispatcher, MemoryConnection, Operation, Projection, QueryError, QueryErrorKind, Result,
    Row, Select, StateError, Statement, Value,
};

// Trait and derive share the name in different namespaces.
pub use keel_macros::Entity;
pub use keel_orm::Entity;

pub use keel_orm::{
    DeclarationLoader, DetachedSavePolicy, EntityConfig, EntityEvent, EntityManager, EntityMap,
    EntityRef, EntityState, FieldConfig, JsonLoader, Loader, ManagerConfig, Metadata,
    MetadataManager, Phase, Relate, RelationConfig, RelationKind, Repository, CustomRepository,
    entity_ref, field_value,
};

pub use keel_auth::{
    Auth, AuthConfig, AuthEvents, AuthenticateEvent, AuthorizeEvent, Cookie, CookieJar,
    Credentials, CsrfConfig, CsrfListener, CsrfProvider, CsrfRequirement, LoginEvent, LogoutEvent,
    MemorySession, Session, SessionCsrfProvider, SessionHandle, UserInterface, UserProvider,
    session_handle,
};

/// Prelude module for convenient imports.
///
/// ```ignore
/// use keel::prelude::*;
/// ```
pub mod prelude {
    pub use crate::{
        Auth, Connection, Dispatcher, Entity, EntityEvent, EntityManager, EntityRef, EntityState,
        Error, Event, EventDispatcher, MemoryConnection, MetadataManager, Relate, Repository,
        Result, Select, Session, Value, entity_ref,
    };
}
