//! The `Entity` trait and shared entity references.
//!
//! An entity is a plain data holder. It knows nothing about storage or its
//! own lifecycle state; it only exposes its mapped fields by name, declares
//! its mapping (usually through `#[derive(Entity)]`) and runs its own
//! lifecycle callbacks when asked to.
//!
//! Entities are handled as [`EntityRef`]s so that every part of a graph that
//! reaches the same row observes the same instance.

use std::any::{TypeId, type_name};
use std::fmt;
use std::sync::{Arc, RwLock};

use keel_core::{ConfigErrorKind, Error, FromValue, Result, Value};

use crate::events::EntityEvent;
use crate::metadata::EntityConfig;

/// A shared, lockable entity instance.
pub type EntityRef<E> = Arc<RwLock<E>>;

/// Wrap an entity value into an [`EntityRef`].
pub fn entity_ref<E: Entity>(entity: E) -> EntityRef<E> {
    Arc::new(RwLock::new(entity))
}

/// A structured record with identity, mapped to a table row.
pub trait Entity: Default + Send + Sync + 'static {
    /// Class name used in error messages, mapping documents and relation targets.
    fn entity_name() -> &'static str {
        short_type_name::<Self>()
    }

    /// The mapping this type declares, or `None` if it is not an entity.
    fn declare() -> Option<EntityConfig> {
        None
    }

    /// Read a mapped field. Returns `None` for names that are not fields.
    fn get_value(&self, field: &str) -> Option<Value>;

    /// Assign a mapped field.
    fn set_value(&mut self, field: &str, value: Value) -> Result<()>;

    /// Run the named lifecycle callback. Returning an error aborts the
    /// operation that dispatched the event.
    fn call_event(&mut self, callback: &str, event: &EntityEvent) -> Result<()> {
        let _ = event;
        Err(unknown_member(Self::entity_name(), "callback", callback))
    }
}

/// Attach resolved related entities of type `T` to a parent entity.
///
/// To-one relations receive at most one element.
pub trait Relate<T: Entity> {
    fn relate(&mut self, relation: &str, related: Vec<EntityRef<T>>) -> Result<()>;
}

/// Error for a field, relation or callback name the entity does not have.
pub fn unknown_member(entity: &str, kind: &str, name: &str) -> Error {
    Error::config_for(
        ConfigErrorKind::UnknownMember,
        entity,
        format!("unknown {} '{}'", kind, name),
    )
}

/// Convert a stored value into a field's Rust type.
///
/// NULL becomes the type's default so that clearing an identifier works for
/// non-optional fields as well.
pub fn field_value<T: FromValue + Default>(field: &str, value: &Value) -> Result<T> {
    if value.is_null() {
        return Ok(T::default());
    }
    T::from_value(value).map_err(|e| match e {
        Error::Type(mut te) => {
            te.column = Some(field.to_string());
            Error::Type(te)
        }
        other => other,
    })
}

fn short_type_name<T: ?Sized>() -> &'static str {
    let full = type_name::<T>();
    let base = full.split('<').next().unwrap_or(full);
    base.rsplit("::").next().unwrap_or(base)
}

/// Descriptor of an entity type, handed to metadata loaders.
#[derive(Clone, Copy)]
pub struct EntityClass {
    name: &'static str,
    type_id: TypeId,
    declare: fn() -> Option<EntityConfig>,
}

impl EntityClass {
    pub fn of<E: Entity>() -> Self {
        Self {
            name: E::entity_name(),
            type_id: TypeId::of::<E>(),
            declare: E::declare,
        }
    }

    pub fn name(&self) -> &'static str {
        self.name
    }

    pub fn type_id(&self) -> TypeId {
        self.type_id
    }

    /// The mapping declared by the type itself.
    pub fn declaration(&self) -> Option<EntityConfig> {
        (self.declare)()
    }
}

impl fmt::Debug for EntityClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityClass").field("name", &self.name).finish()
    }
}
