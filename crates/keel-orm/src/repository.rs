//! Typed query entry points for one entity type.

use std::marker::PhantomData;
use std::sync::Arc;

use keel_core::{Projection, Result, Select, Value};

use crate::entity::{Entity, EntityRef, unknown_member};
use crate::manager::EntityManager;
use crate::metadata::Metadata;

/// Finder for entities of type `E`, bound to one [`EntityManager`].
///
/// Every entity it returns goes through the manager's identity map.
pub struct Repository<'m, E: Entity> {
    manager: &'m mut EntityManager,
    metadata: Arc<Metadata>,
    _entity: PhantomData<fn() -> E>,
}

impl<E: Entity> std::fmt::Debug for Repository<'_, E> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Repository")
            .field("entity", &self.metadata.name())
            .field("table", &self.metadata.table())
            .finish()
    }
}

impl<'m, E: Entity> Repository<'m, E> {
    pub(crate) fn new(manager: &'m mut EntityManager, metadata: Arc<Metadata>) -> Self {
        Self {
            manager,
            metadata,
            _entity: PhantomData,
        }
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn manager(&mut self) -> &mut EntityManager {
        self.manager
    }

    /// A query over the entity's table.
    pub fn query(&self) -> Select {
        Select::from(self.metadata.table())
    }

    /// Find by identifier. Managed instances are served from the identity
    /// map without a query unless the manager is configured otherwise.
    pub fn find(&mut self, id: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        let id = id.into();
        if id.is_empty() {
            return Ok(None);
        }

        if self.manager.config().find_from_identity_map {
            if let Some(entity) = self.manager.get_by_id::<E>(&id) {
                tracing::trace!(entity = self.metadata.name(), id = %id, "Identity map hit");
                return Ok(Some(entity));
            }
        }

        let mut select = self.query();
        select
            .where_eq(self.metadata.identifier_column(), id)
            .limit(1);
        self.fetch_one(&select)
    }

    /// Every row of the table.
    pub fn find_all(&mut self) -> Result<Vec<EntityRef<E>>> {
        let select = self.query();
        self.fetch_all(&select)
    }

    /// Entities whose `field` equals `value`.
    pub fn find_by(&mut self, field: &str, value: impl Into<Value>) -> Result<Vec<EntityRef<E>>> {
        let select = self.by_field(field, value)?;
        self.fetch_all(&select)
    }

    /// The first entity whose `field` equals `value`.
    pub fn find_one_by(&mut self, field: &str, value: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        let mut select = self.by_field(field, value)?;
        select.limit(1);
        self.fetch_one(&select)
    }

    fn by_field(&self, field: &str, value: impl Into<Value>) -> Result<Select> {
        let column = self
            .metadata
            .column(field)
            .ok_or_else(|| unknown_member(self.metadata.name(), "field", field))?;
        let mut select = self.query();
        select.where_eq(column, value);
        Ok(select)
    }

    /// Hydrate the first row of `select`.
    pub fn fetch_one(&mut self, select: &Select) -> Result<Option<EntityRef<E>>> {
        let connection = Arc::clone(self.manager.connection());
        let mut statement = connection.query(select)?;
        self.manager.hydrate_one(&mut *statement, &self.metadata)
    }

    /// Hydrate every row of `select`.
    pub fn fetch_all(&mut self, select: &Select) -> Result<Vec<EntityRef<E>>> {
        let connection = Arc::clone(self.manager.connection());
        let mut statement = connection.query(select)?;
        self.manager.hydrate_all(&mut *statement, &self.metadata)
    }

    /// Number of rows in the table.
    pub fn count(&self) -> Result<u64> {
        let mut select = self.query();
        select.project(Projection::Count);
        let total = self.manager.connection().fetch_column(&select)?;
        Ok(total
            .and_then(|v| v.as_i64())
            .and_then(|n| u64::try_from(n).ok())
            .unwrap_or(0))
    }
}

/// An application repository wrapping the generic one.
///
/// The entity mapping names the repository it expects; the manager refuses
/// to build a custom repository under any other name.
///
/// ```ignore
/// struct UserRepository<'m>(Repository<'m, User>);
///
/// impl<'m> CustomRepository<'m> for UserRepository<'m> {
///     type Entity = User;
///     const NAME: &'static str = "UserRepository";
///
///     fn from_repository(repository: Repository<'m, User>) -> Self {
///         Self(repository)
///     }
/// }
/// ```
pub trait CustomRepository<'m>: Sized {
    type Entity: Entity;

    const NAME: &'static str;

    fn from_repository(repository: Repository<'m, Self::Entity>) -> Self;
}
