//! The entity manager: state machine, persistence and lifecycle events.

use std::collections::HashSet;
use std::sync::{Arc, PoisonError, RwLockReadGuard, RwLockWriteGuard};

use keel_core::{
    ConfigErrorKind, Connection, Error, Projection, Result, Row, Select, Statement, Value,
};

use crate::config::{DetachedSavePolicy, ManagerConfig};
use crate::entity::{Entity, EntityRef, Relate};
use crate::entity_map::EntityMap;
use crate::events::{EntityEvent, Phase};
use crate::metadata::Metadata;
use crate::metadata_manager::MetadataManager;
use crate::relation::Resolver;
use crate::repository::{CustomRepository, Repository};

/// Lifecycle state of an entity relative to one manager.
///
/// The state is computed on demand from the identity map and the
/// identifier value; it is never stored on the entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EntityState {
    /// Empty identifier and not in the identity map.
    New,
    /// Registered in the identity map.
    Managed,
    /// Non-empty identifier but not in the identity map.
    Detached,
}

impl EntityState {
    pub const fn as_str(self) -> &'static str {
        match self {
            EntityState::New => "new",
            EntityState::Managed => "managed",
            EntityState::Detached => "detached",
        }
    }
}

impl std::fmt::Display for EntityState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

pub(crate) fn read<E>(entity: &EntityRef<E>) -> RwLockReadGuard<'_, E> {
    entity.read().unwrap_or_else(PoisonError::into_inner)
}

pub(crate) fn write<E>(entity: &EntityRef<E>) -> RwLockWriteGuard<'_, E> {
    entity.write().unwrap_or_else(PoisonError::into_inner)
}

/// Orchestrates finding, saving and deleting entities.
///
/// One manager (and its identity map) is meant to serve one unit of work,
/// such as a single request. The connection and metadata manager are
/// shared; the identity map is not.
pub struct EntityManager {
    connection: Arc<dyn Connection>,
    metadata: Arc<MetadataManager>,
    entities: EntityMap,
    config: ManagerConfig,
}

impl std::fmt::Debug for EntityManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("EntityManager")
            .field("entities", &self.entities)
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl EntityManager {
    /// Create a manager with the default configuration.
    pub fn new(connection: Arc<dyn Connection>, metadata: Arc<MetadataManager>) -> Self {
        Self::with_config(connection, metadata, ManagerConfig::default())
    }

    /// Create a manager with a custom configuration.
    pub fn with_config(
        connection: Arc<dyn Connection>,
        metadata: Arc<MetadataManager>,
        config: ManagerConfig,
    ) -> Self {
        Self {
            connection,
            metadata,
            entities: EntityMap::new(),
            config,
        }
    }

    pub fn connection(&self) -> &Arc<dyn Connection> {
        &self.connection
    }

    pub fn metadata_manager(&self) -> &Arc<MetadataManager> {
        &self.metadata
    }

    pub fn config(&self) -> &ManagerConfig {
        &self.config
    }

    /// The identity map.
    pub fn entity_map(&self) -> &EntityMap {
        &self.entities
    }

    /// Metadata of entity type `E`.
    pub fn metadata<E: Entity>(&self) -> Result<Arc<Metadata>> {
        self.metadata.get::<E>()
    }

    /// The generic repository for `E`.
    pub fn repository<E: Entity>(&mut self) -> Result<Repository<'_, E>> {
        let metadata = self.metadata::<E>()?;
        Ok(Repository::new(self, metadata))
    }

    /// The custom repository registered in the mapping of `R::Entity`.
    pub fn custom_repository<'m, R: CustomRepository<'m>>(&'m mut self) -> Result<R> {
        let metadata = self.metadata::<R::Entity>()?;
        if metadata.repository() != Some(R::NAME) {
            return Err(Error::config_for(
                ConfigErrorKind::Repository,
                metadata.name(),
                format!(
                    "entity is mapped to repository {:?}, not '{}'",
                    metadata.repository(),
                    R::NAME
                ),
            ));
        }
        Ok(R::from_repository(Repository::new(self, metadata)))
    }

    /// Find an entity by identifier. A missing row is `Ok(None)`.
    pub fn find<E: Entity>(&mut self, id: impl Into<Value>) -> Result<Option<EntityRef<E>>> {
        self.repository::<E>()?.find(id)
    }

    /// The managed instance of `E` with identifier `id`, without touching storage.
    pub fn get_by_id<E: Entity>(&self, id: &Value) -> Option<EntityRef<E>> {
        self.entities.get::<E>(id)
    }

    /// Whether a row with the entity's identifier exists in storage.
    pub fn exists<E: Entity>(&self, entity: &EntityRef<E>) -> Result<bool> {
        let metadata = self.metadata::<E>()?;
        let id = metadata.identifier_value(&*read(entity));
        if id.is_empty() {
            return Ok(false);
        }

        let mut probe = Select::from(metadata.table());
        probe
            .project(Projection::Literal(Value::Int(1)))
            .where_eq(metadata.identifier_column(), id)
            .limit(1);
        Ok(self.connection.fetch_column(&probe)?.is_some())
    }

    /// Compute the lifecycle state of `entity`.
    pub fn state<E: Entity>(&self, entity: &EntityRef<E>) -> Result<EntityState> {
        let metadata = self.metadata::<E>()?;
        Ok(self.compute_state(entity, &metadata))
    }

    fn compute_state<E: Entity>(&self, entity: &EntityRef<E>, metadata: &Metadata) -> EntityState {
        if self.entities.has(entity) {
            EntityState::Managed
        } else if metadata.identifier_value(&*read(entity)).is_empty() {
            EntityState::New
        } else {
            EntityState::Detached
        }
    }

    /// Save an entity: insert it when new, update it when managed.
    pub fn save<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        self.save_with(entity, Vec::<(String, Value)>::new())
    }

    /// Assign `data` onto the entity's fields, then save it.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::entity_name()))]
    pub fn save_with<E, K, V>(
        &mut self,
        entity: &EntityRef<E>,
        data: impl IntoIterator<Item = (K, V)>,
    ) -> Result<()>
    where
        E: Entity,
        K: Into<String>,
        V: Into<Value>,
    {
        let metadata = self.metadata::<E>()?;
        let data: Vec<(String, Value)> = data
            .into_iter()
            .map(|(k, v)| (k.into(), v.into()))
            .collect();
        if !data.is_empty() {
            metadata.set_values(&mut *write(entity), data)?;
        }

        self.dispatch_event(Phase::PreSave, entity, &metadata)?;

        match self.compute_state(entity, &metadata) {
            EntityState::New => self.insert(entity, &metadata)?,
            EntityState::Managed => self.update(entity, &metadata)?,
            EntityState::Detached => match self.config.detached_save {
                DetachedSavePolicy::Reject => {
                    return Err(Error::state(
                        EntityState::Detached.as_str(),
                        "Detached entity can not be saved",
                    ));
                }
                DetachedSavePolicy::Ignore => {
                    tracing::warn!(entity = metadata.name(), "Ignoring save of detached entity");
                }
                DetachedSavePolicy::Insert => self.insert(entity, &metadata)?,
            },
        }

        self.dispatch_event(Phase::PostSave, entity, &metadata)
    }

    fn insert<E: Entity>(&mut self, entity: &EntityRef<E>, metadata: &Arc<Metadata>) -> Result<()> {
        self.dispatch_event(Phase::PreCreate, entity, metadata)?;

        let (mut values, given) = {
            let guard = read(entity);
            (metadata.get_values(&*guard), metadata.identifier_value(&*guard))
        };
        if given.is_empty() {
            values.retain(|(column, _)| column != metadata.identifier_column());
        }

        self.connection.insert(metadata.table(), &values)?;
        let id = if given.is_empty() {
            self.connection.last_insert_id()?
        } else {
            given
        };
        tracing::debug!(table = metadata.table(), id = %id, "Inserted entity");

        self.entities.add(entity, &id);
        metadata.set_value(&mut *write(entity), metadata.identifier(), id)?;

        self.dispatch_event(Phase::PostCreate, entity, metadata)
    }

    fn update<E: Entity>(&mut self, entity: &EntityRef<E>, metadata: &Arc<Metadata>) -> Result<()> {
        self.dispatch_event(Phase::PreUpdate, entity, metadata)?;

        let values = metadata.get_values(&*read(entity));
        let key_column = metadata.identifier_column();
        let id = values
            .iter()
            .find(|(column, _)| column == key_column)
            .map_or(Value::Null, |(_, value)| value.clone());

        let affected = self.connection.update(metadata.table(), &values, (key_column, &id))?;
        tracing::debug!(table = metadata.table(), id = %id, affected, "Updated entity");

        self.dispatch_event(Phase::PostUpdate, entity, metadata)
    }

    /// Delete a managed entity and clear its identifier.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = E::entity_name()))]
    pub fn delete<E: Entity>(&mut self, entity: &EntityRef<E>) -> Result<()> {
        let metadata = self.metadata::<E>()?;

        match self.compute_state(entity, &metadata) {
            EntityState::Managed => {
                self.dispatch_event(Phase::PreDelete, entity, &metadata)?;

                let id = metadata.identifier_value(&*read(entity));
                if id.is_empty() {
                    return Err(Error::state(
                        EntityState::Managed.as_str(),
                        "Can't remove entity with empty identifier value",
                    ));
                }

                self.connection
                    .delete(metadata.table(), (metadata.identifier_column(), &id))?;
                self.entities.remove(entity);
                tracing::debug!(table = metadata.table(), id = %id, "Deleted entity");

                self.dispatch_event(Phase::PostDelete, entity, &metadata)?;

                metadata.set_value(&mut *write(entity), metadata.identifier(), Value::Null)
            }
            EntityState::Detached => Err(Error::state(
                EntityState::Detached.as_str(),
                "Detached entity can not be removed",
            )),
            state @ EntityState::New => Err(Error::state(
                state.as_str(),
                format!("Unexpected entity state: {}", state),
            )),
        }
    }

    /// Load and attach relation `name` for every entity in `entities`.
    pub fn related<P, T>(&mut self, entities: &[EntityRef<P>], name: &str) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let target = self.metadata::<T>()?;
        self.related_with(entities, name, Select::from(target.table()))
    }

    /// Like [`related`](Self::related), starting from a caller-supplied query
    /// over the target table (extra filters, projections, limits).
    #[tracing::instrument(
        level = "debug",
        skip(self, entities, query),
        fields(entity = P::entity_name(), parents = entities.len())
    )]
    pub fn related_with<P, T>(&mut self, entities: &[EntityRef<P>], name: &str, query: Select) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let metadata = self.metadata::<P>()?;
        let mapping = metadata.relation(name)?.clone();
        let target = self.metadata::<T>()?;
        if mapping.target != target.name() {
            return Err(Error::config_for(
                ConfigErrorKind::UnknownRelation,
                metadata.name(),
                format!(
                    "relation '{}' targets '{}', not '{}'",
                    name,
                    mapping.target,
                    target.name()
                ),
            ));
        }

        if entities.is_empty() {
            tracing::warn!(relation = name, "Resolving relation for an empty entity set");
            return Ok(());
        }

        Resolver::new(self, &metadata, &mapping, &target).resolve(entities, query)
    }

    /// Hydrate the next row of `statement`, if any.
    pub fn hydrate_one<E: Entity>(
        &mut self,
        statement: &mut dyn Statement,
        metadata: &Arc<Metadata>,
    ) -> Result<Option<EntityRef<E>>> {
        match statement.fetch()? {
            Some(row) => self.hydrate_row(&row, metadata).map(Some),
            None => Ok(None),
        }
    }

    /// Hydrate every remaining row of `statement`, in row order and
    /// de-duplicated by identifier.
    #[tracing::instrument(level = "debug", skip_all, fields(entity = metadata.name()))]
    pub fn hydrate_all<E: Entity>(
        &mut self,
        statement: &mut dyn Statement,
        metadata: &Arc<Metadata>,
    ) -> Result<Vec<EntityRef<E>>> {
        let mut seen = HashSet::new();
        let mut result = Vec::new();
        while let Some(row) = statement.fetch()? {
            let entity = self.hydrate_row(&row, metadata)?;
            let id = metadata.row_identifier(&row).unwrap_or_default();
            if seen.insert(id.key()) {
                result.push(entity);
            }
        }
        tracing::trace!(count = result.len(), "Hydrated entities");
        Ok(result)
    }

    /// Turn one row into a managed entity, dispatching `postLoad` when the
    /// instance is new to the identity map.
    pub(crate) fn hydrate_row<E: Entity>(&mut self, row: &Row, metadata: &Arc<Metadata>) -> Result<EntityRef<E>> {
        if !metadata.describes::<E>() {
            return Err(Error::config_for(
                ConfigErrorKind::NotAnEntity,
                E::entity_name(),
                format!("metadata for '{}' does not describe this type", metadata.name()),
            ));
        }

        let (entity, fresh) = self.entities.load::<E>(metadata, row)?;
        if fresh {
            self.dispatch_event(Phase::PostLoad, &entity, metadata)?;
        }
        Ok(entity)
    }

    /// Run the entity's callbacks for `phase`, then broadcast
    /// `<prefix>.<phase>` through the connection's dispatcher.
    ///
    /// A failing callback or a listener veto aborts with an error.
    pub fn dispatch_event<E: Entity>(
        &self,
        phase: Phase,
        entity: &EntityRef<E>,
        metadata: &Arc<Metadata>,
    ) -> Result<()> {
        let mut event = EntityEvent::new(phase, entity, Arc::clone(metadata), Arc::clone(&self.metadata));

        let callbacks = metadata.events(phase);
        if !callbacks.is_empty() {
            let mut guard = write(entity);
            for callback in callbacks {
                guard.call_event(callback, &event)?;
            }
        }

        let name = metadata.event_name(phase);
        tracing::trace!(event = %name, "Dispatching lifecycle event");
        self.connection.events().dispatch(&name, &mut event);

        match event.into_veto() {
            Some(message) => {
                tracing::debug!(event = %name, reason = %message, "Lifecycle event vetoed");
                Err(Error::Custom(message))
            }
            None => Ok(()),
        }
    }
}
