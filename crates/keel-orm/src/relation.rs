//! Batch resolution of relations.
//!
//! Each resolver issues exactly one query for the whole parent set, then
//! groups the hydrated targets by key and attaches them through
//! [`Relate`]. Targets go through the identity map, so a row that is already
//! managed resolves to the existing instance.

use std::collections::{HashMap, HashSet};
use std::sync::Arc;

use keel_core::{
    ConfigErrorKind, Error, OrderBy, Projection, Result, Select, Value, ValueKey,
};

use crate::entity::{Entity, EntityRef, Relate};
use crate::manager::{EntityManager, read, write};
use crate::metadata::{Metadata, RelationKind, RelationMapping};

/// Alias of the through-table key in many-to-many result rows.
const THROUGH_KEY: &str = "_through_key";

pub(crate) struct Resolver<'a> {
    manager: &'a mut EntityManager,
    owner: &'a Metadata,
    mapping: &'a RelationMapping,
    target: &'a Arc<Metadata>,
}

impl<'a> Resolver<'a> {
    pub(crate) fn new(
        manager: &'a mut EntityManager,
        owner: &'a Metadata,
        mapping: &'a RelationMapping,
        target: &'a Arc<Metadata>,
    ) -> Self {
        Self {
            manager,
            owner,
            mapping,
            target,
        }
    }

    pub(crate) fn resolve<P, T>(self, parents: &[EntityRef<P>], query: Select) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        match self.mapping.kind {
            RelationKind::BelongsTo => self.belongs_to(parents, query),
            RelationKind::HasOne | RelationKind::HasMany => self.has(parents, query),
            RelationKind::ManyToMany => self.many_to_many(parents, query),
        }
    }

    /// Target key defaults to the target identifier.
    fn belongs_to<P, T>(mut self, parents: &[EntityRef<P>], mut query: Select) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let (mapping, target) = (self.mapping, self.target);
        let key_to = mapping.key_to.as_deref().unwrap_or_else(|| target.identifier());
        let parent_keys = self.parent_keys(parents, &mapping.key_from);

        let mut index: HashMap<ValueKey, EntityRef<T>> = HashMap::new();
        if let Some(keys) = unique(&parent_keys) {
            query
                .set_table(target.table())
                .where_in(qualified(target, key_to)?, keys);
            for entity in self.fetch::<T>(&query)? {
                let key = target.get_value(&*read(&entity), key_to);
                index.entry(key.key()).or_insert(entity);
            }
        }

        for (parent, key) in parents.iter().zip(parent_keys) {
            let related: Vec<EntityRef<T>> = index.get(&key.key()).cloned().into_iter().collect();
            write(parent).relate(&mapping.name, related)?;
        }
        Ok(())
    }

    /// Target key defaults to `<owner table>_id`.
    fn has<P, T>(mut self, parents: &[EntityRef<P>], mut query: Select) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let (mapping, target) = (self.mapping, self.target);
        let key_to = mapping
            .key_to
            .clone()
            .unwrap_or_else(|| format!("{}_id", self.owner.table()));
        let parent_keys = self.parent_keys(parents, &mapping.key_from);

        let mut groups: HashMap<ValueKey, Vec<EntityRef<T>>> = HashMap::new();
        if let Some(keys) = unique(&parent_keys) {
            query
                .set_table(target.table())
                .where_in(qualified(target, &key_to)?, keys);
            self.apply_order(&mut query)?;
            for entity in self.fetch::<T>(&query)? {
                let key = target.get_value(&*read(&entity), &key_to);
                groups.entry(key.key()).or_default().push(entity);
            }
        }

        self.attach(parents, parent_keys, groups)
    }

    /// Joins the through table and groups by its owner-side key.
    fn many_to_many<P, T>(mut self, parents: &[EntityRef<P>], mut query: Select) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let (owner, mapping, target) = (self.owner, self.mapping, self.target);
        let through = mapping.table_through.as_deref().ok_or_else(|| {
            Error::config_for(
                ConfigErrorKind::UnknownRelation,
                owner.name(),
                format!("relation '{}' has no through table", mapping.name),
            )
        })?;
        let through_from = mapping
            .key_through_from
            .clone()
            .unwrap_or_else(|| format!("{}_id", owner.table()));
        let through_to = mapping
            .key_through_to
            .clone()
            .unwrap_or_else(|| format!("{}_id", target.table()));
        let key_to = mapping.key_to.as_deref().unwrap_or_else(|| target.identifier());
        let parent_keys = self.parent_keys(parents, &mapping.key_from);

        let mut groups: HashMap<ValueKey, Vec<EntityRef<T>>> = HashMap::new();
        if let Some(keys) = unique(&parent_keys) {
            query.set_table(target.table());
            if query.projections().is_empty() {
                query.project(Projection::All(target.table().to_string()));
            }
            query
                .column_as(format!("{}.{}", through, through_from), THROUGH_KEY)
                .join(
                    through,
                    format!("{}.{}", through, through_to),
                    qualified(target, key_to)?,
                )
                .where_in(format!("{}.{}", through, through_from), keys);
            self.apply_order(&mut query)?;

            let connection = Arc::clone(self.manager.connection());
            let mut statement = connection.query(&query)?;
            while let Some(row) = statement.fetch()? {
                let owner_key = row.get_by_name(THROUGH_KEY).cloned().unwrap_or_default();
                let entity = self.manager.hydrate_row::<T>(&row, target)?;
                let group = groups.entry(owner_key.key()).or_default();
                if !group.iter().any(|e| Arc::ptr_eq(e, &entity)) {
                    group.push(entity);
                }
            }
        }

        self.attach(parents, parent_keys, groups)
    }

    fn fetch<T: Entity>(&mut self, query: &Select) -> Result<Vec<EntityRef<T>>> {
        let connection = Arc::clone(self.manager.connection());
        let mut statement = connection.query(query)?;
        self.manager.hydrate_all::<T>(&mut *statement, self.target)
    }

    fn parent_keys<P: Entity>(&self, parents: &[EntityRef<P>], field: &str) -> Vec<Value> {
        parents
            .iter()
            .map(|parent| self.owner.get_value(&*read(parent), field))
            .collect()
    }

    fn apply_order(&self, query: &mut Select) -> Result<()> {
        if !self.mapping.kind.is_to_many() {
            return Ok(());
        }
        for (field, direction) in &self.mapping.order_by {
            query.order_by(OrderBy {
                column: qualified(self.target, field)?.into(),
                direction: *direction,
            });
        }
        Ok(())
    }

    /// Hand every parent its group. To-one relations receive at most the
    /// first element.
    fn attach<P, T>(
        &self,
        parents: &[EntityRef<P>],
        parent_keys: Vec<Value>,
        groups: HashMap<ValueKey, Vec<EntityRef<T>>>,
    ) -> Result<()>
    where
        P: Entity + Relate<T>,
        T: Entity,
    {
        let to_many = self.mapping.kind.is_to_many();
        for (parent, key) in parents.iter().zip(parent_keys) {
            let related: Vec<EntityRef<T>> = match groups.get(&key.key()) {
                Some(group) if to_many => group.clone(),
                Some(group) => group.iter().take(1).cloned().collect(),
                None => Vec::new(),
            };
            write(parent).relate(&self.mapping.name, related)?;
        }
        Ok(())
    }
}

/// Non-empty keys without duplicates, or `None` when nothing is left to query.
fn unique(keys: &[Value]) -> Option<Vec<Value>> {
    let mut seen = HashSet::new();
    let unique: Vec<Value> = keys
        .iter()
        .filter(|key| !key.is_empty() && seen.insert(key.key()))
        .cloned()
        .collect();
    (!unique.is_empty()).then_some(unique)
}

/// `table.column` for a mapped field of `metadata`.
fn qualified(metadata: &Metadata, field: &str) -> Result<String> {
    let column = metadata.column(field).ok_or_else(|| {
        Error::config_for(
            ConfigErrorKind::UnknownRelation,
            metadata.name(),
            format!("relation key '{}' is not a mapped field", field),
        )
    })?;
    Ok(format!("{}.{}", metadata.table(), column))
}
