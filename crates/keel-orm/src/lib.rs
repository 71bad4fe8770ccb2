//! Entity manager for Keel.
//!
//! `keel-orm` is the **persistence layer**. It maps plain Rust structs onto
//! tables through declarative metadata and keeps one in-memory instance per
//! row for the lifetime of an [`EntityManager`].
//!
//! # Role In The Architecture
//!
//! - **Metadata**: [`MetadataManager`] builds and caches one immutable
//!   [`Metadata`] per entity type from a pluggable [`Loader`].
//! - **Identity map**: [`EntityMap`] guarantees a single instance per
//!   (type, identifier) and defines the *managed* state.
//! - **Lifecycle**: [`EntityManager`] computes the NEW / MANAGED / DETACHED
//!   state, performs inserts, updates and deletes, and fires the
//!   `preSave` .. `postLoad` events.
//! - **Relations**: belongs-to, has-one, has-many and many-to-many relations
//!   are resolved for a whole set of entities with one query each.
//!
//! # Example
//!
//! ```ignore
//! let connection: Arc<dyn Connection> = Arc::new(MemoryConnection::new());
//! let mut em = EntityManager::new(connection, Arc::new(MetadataManager::new()));
//!
//! let user = entity_ref(User { name: "Ann".into(), ..Default::default() });
//! em.save(&user)?;                        // INSERT, identifier assigned
//! let same = em.find::<User>(1)?;         // served from the identity map
//!
//! let users = em.repository::<User>()?.find_all()?;
//! em.related::<User, Post>(&users, "posts")?;
//! ```

pub mod config;
pub mod entity;
pub mod entity_map;
pub mod events;
pub mod loader;
pub mod manager;
pub mod metadata;
pub mod metadata_manager;
mod relation;
pub mod repository;

pub use config::{DetachedSavePolicy, ManagerConfig};
pub use entity::{Entity, EntityClass, EntityRef, Relate, entity_ref, field_value, unknown_member};
pub use entity_map::EntityMap;
pub use events::{EntityEvent, Phase};
pub use loader::{DeclarationLoader, JsonLoader, Loader};
pub use manager::{EntityManager, EntityState};
pub use metadata::{
    EntityConfig, FieldConfig, FieldMapping, Metadata, RelationConfig, RelationKind,
    RelationMapping,
};
pub use metadata_manager::MetadataManager;
pub use repository::{CustomRepository, Repository};

pub use keel_core::{Error, Result, Select, Value};
