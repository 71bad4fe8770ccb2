//! Metadata loaders.
//!
//! A loader turns an entity class into an [`EntityConfig`] document. The
//! metadata manager never inspects entity types itself, so any declarative
//! source can back it:
//!
//! - [`DeclarationLoader`] - the mapping the type declares through
//!   [`Entity::declare`](crate::Entity::declare), normally generated by
//!   `#[derive(Entity)]`
//! - [`JsonLoader`] - JSON documents keyed by entity name

use std::collections::HashMap;

use keel_core::{ConfigError, ConfigErrorKind, Error, Result};

use crate::entity::EntityClass;
use crate::metadata::EntityConfig;

/// A pluggable source of entity mappings.
pub trait Loader: Send + Sync {
    /// Load the mapping for `class`, extending `config`.
    ///
    /// Fails with a configuration error naming the class when it carries no
    /// entity mapping.
    fn load(&self, class: &EntityClass, config: EntityConfig) -> Result<EntityConfig>;

    /// Whether `class` is not an entity.
    fn is_transient(&self, class: &EntityClass) -> bool;
}

fn not_an_entity(class: &EntityClass) -> Error {
    Error::config_for(
        ConfigErrorKind::NotAnEntity,
        class.name(),
        format!("no entity mapping found for class {}", class.name()),
    )
}

/// Merge `declared` into `config`. Scalars in `declared` win when present.
fn merge(mut config: EntityConfig, declared: EntityConfig) -> EntityConfig {
    if declared.table.is_some() {
        config.table = declared.table;
    }
    if declared.identifier.is_some() {
        config.identifier = declared.identifier;
    }
    if declared.event_prefix.is_some() {
        config.event_prefix = declared.event_prefix;
    }
    if declared.repository.is_some() {
        config.repository = declared.repository;
    }
    config.fields.extend(declared.fields);
    config.relations.extend(declared.relations);
    for (phase, callbacks) in declared.events {
        config.events.entry(phase).or_default().extend(callbacks);
    }
    config
}

/// Reads the mapping declared by the entity type.
#[derive(Debug, Clone, Copy, Default)]
pub struct DeclarationLoader;

impl Loader for DeclarationLoader {
    fn load(&self, class: &EntityClass, config: EntityConfig) -> Result<EntityConfig> {
        let declared = class.declaration().ok_or_else(|| not_an_entity(class))?;
        Ok(merge(config, declared))
    }

    fn is_transient(&self, class: &EntityClass) -> bool {
        class.declaration().is_none()
    }
}

/// Reads mappings from JSON documents.
///
/// The document is an object keyed by entity name:
///
/// ```
/// use keel_orm::JsonLoader;
///
/// let loader = JsonLoader::from_str(r#"{
///     "User": {
///         "table": "users",
///         "fields": [{"name": "id", "id": true}, {"name": "name"}]
///     }
/// }"#).unwrap();
/// assert!(loader.contains("User"));
/// ```
#[derive(Debug, Clone, Default)]
pub struct JsonLoader {
    documents: HashMap<String, EntityConfig>,
}

impl JsonLoader {
    pub fn new() -> Self {
        Self::default()
    }

    /// Parse a JSON object of entity name → mapping.
    pub fn from_str(json: &str) -> Result<Self> {
        let documents: HashMap<String, EntityConfig> =
            serde_json::from_str(json).map_err(|e| {
                Error::Config(ConfigError {
                    kind: ConfigErrorKind::Parse,
                    entity: None,
                    message: format!("invalid mapping document: {}", e),
                    source: Some(Box::new(e)),
                })
            })?;
        Ok(Self { documents })
    }

    /// Add or replace the mapping for one entity.
    pub fn insert(&mut self, entity: impl Into<String>, config: EntityConfig) -> &mut Self {
        self.documents.insert(entity.into(), config);
        self
    }

    pub fn contains(&self, entity: &str) -> bool {
        self.documents.contains_key(entity)
    }
}

impl Loader for JsonLoader {
    fn load(&self, class: &EntityClass, config: EntityConfig) -> Result<EntityConfig> {
        let document = self
            .documents
            .get(class.name())
            .ok_or_else(|| not_an_entity(class))?;
        Ok(merge(config, document.clone()))
    }

    fn is_transient(&self, class: &EntityClass) -> bool {
        !self.contains(class.name())
    }
}
