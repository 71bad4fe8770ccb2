//! Identity map for tracking the managed entity instances of one manager.
//!
//! The map ensures that each row corresponds to exactly one entity instance
//! within an [`EntityManager`](crate::EntityManager):
//!
//! - **Uniqueness**: the same (type, identifier) always yields the same
//!   `EntityRef`
//! - **Consistency**: changes to an instance are visible everywhere it is
//!   reachable from, including relation graphs
//! - **State**: an instance is *managed* exactly when it is registered here
//!
//! # Design
//!
//! Entries are keyed by `(TypeId, ValueKey)` and store the type-erased
//! `Arc<RwLock<E>>` itself, so lookups return clones of the same `Arc`. A
//! second index keyed by the `Arc` address answers "is this instance
//! managed?" regardless of what its identifier field currently holds.

use std::any::{Any, TypeId};
use std::collections::HashMap;
use std::sync::Arc;

use keel_core::{ConfigErrorKind, Error, Result, Row, Value, ValueKey};

use crate::entity::{Entity, EntityRef, entity_ref};
use crate::metadata::Metadata;

type MapKey = (TypeId, ValueKey);

/// A type-erased entry. `entity` stores an `EntityRef<E>` for some `E`.
struct MapEntry {
    entity: Box<dyn Any + Send + Sync>,
    address: usize,
}

fn address_of<E>(entity: &EntityRef<E>) -> usize {
    Arc::as_ptr(entity).cast::<()>() as usize
}

/// Identity map keyed by entity type and identifier value.
#[derive(Default)]
pub struct EntityMap {
    entries: HashMap<MapKey, MapEntry>,
    addresses: HashMap<usize, MapKey>,
}

impl std::fmt::Debug for EntityMap {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityMap")
            .field("entries", &self.entries.len())
            .finish()
    }
}

impl EntityMap {
    /// Create a new empty identity map.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a newly persisted entity under `id`.
    ///
    /// An instance that was registered under another identifier is moved.
    /// Another instance registered under the same identifier is replaced.
    pub fn add<E: Entity>(&mut self, entity: &EntityRef<E>, id: &Value) {
        self.remove(entity);

        let key = (TypeId::of::<E>(), id.key());
        let address = address_of(entity);
        if let Some(previous) = self.entries.insert(
            key.clone(),
            MapEntry {
                entity: Box::new(Arc::clone(entity)),
                address,
            },
        ) {
            self.addresses.remove(&previous.address);
        }
        self.addresses.insert(address, key);
    }

    /// Deregister an entity instance.
    ///
    /// Returns `true` if the instance was managed.
    pub fn remove<E: Entity>(&mut self, entity: &EntityRef<E>) -> bool {
        match self.addresses.remove(&address_of(entity)) {
            Some(key) => {
                self.entries.remove(&key);
                true
            }
            None => false,
        }
    }

    /// Whether this exact instance is managed.
    pub fn has<E: Entity>(&self, entity: &EntityRef<E>) -> bool {
        self.addresses
            .get(&address_of(entity))
            .is_some_and(|key| key.0 == TypeId::of::<E>())
    }

    /// The managed instance of `E` with identifier `id`.
    pub fn get<E: Entity>(&self, id: &Value) -> Option<EntityRef<E>> {
        let entry = self.entries.get(&(TypeId::of::<E>(), id.key()))?;
        entry.entity.downcast_ref::<EntityRef<E>>().map(Arc::clone)
    }

    /// Return the managed instance for `row`, hydrating and registering a
    /// new one when the identifier is not mapped yet.
    ///
    /// An already managed instance is returned unchanged and the row data is
    /// discarded. The flag is `true` when a new instance was created; the
    /// caller is responsible for dispatching `postLoad` for it.
    pub fn load<E: Entity>(&mut self, metadata: &Metadata, row: &Row) -> Result<(EntityRef<E>, bool)> {
        let id = metadata.row_identifier(row).ok_or_else(|| {
            Error::config_for(
                ConfigErrorKind::Identifier,
                metadata.name(),
                format!(
                    "row carries no value for identifier column '{}'",
                    metadata.identifier_column()
                ),
            )
        })?;

        if let Some(existing) = self.get::<E>(&id) {
            return Ok((existing, false));
        }

        let entity = entity_ref(metadata.hydrate::<E>(row)?);
        self.add(&entity, &id);
        Ok((entity, true))
    }

    /// Clear all entries.
    pub fn clear(&mut self) {
        self.entries.clear();
        self.addresses.clear();
    }

    /// Get the number of managed entities.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}
