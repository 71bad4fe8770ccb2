//! Process-wide metadata cache.

use std::any::TypeId;
use std::collections::HashMap;
use std::fmt;
use std::sync::{Arc, PoisonError, RwLock};

use keel_core::Result;

use crate::entity::{Entity, EntityClass};
use crate::loader::{DeclarationLoader, Loader};
use crate::metadata::{EntityConfig, Metadata};

/// Resolves and caches [`Metadata`] per entity type.
///
/// Metadata is built lazily on first access and never changes afterwards,
/// so one manager can be shared (behind an `Arc`) by every entity manager in
/// the process. Each entry is filled at most once; concurrent first
/// accesses may both run the loader but only one result is kept.
pub struct MetadataManager {
    loader: Box<dyn Loader>,
    cache: RwLock<HashMap<TypeId, Arc<Metadata>>>,
    validate_names: bool,
}

impl Default for MetadataManager {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Debug for MetadataManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("MetadataManager")
            .field("cached", &self.len())
            .field("validate_names", &self.validate_names)
            .finish()
    }
}

impl MetadataManager {
    /// Create a manager reading declared mappings.
    pub fn new() -> Self {
        Self::with_loader(DeclarationLoader)
    }

    /// Create a manager backed by a custom loader.
    pub fn with_loader(loader: impl Loader + 'static) -> Self {
        Self {
            loader: Box::new(loader),
            cache: RwLock::new(HashMap::new()),
            validate_names: true,
        }
    }

    /// Toggle table/column name validation (builder pattern).
    #[must_use]
    pub fn validate_names(mut self, value: bool) -> Self {
        self.validate_names = value;
        self
    }

    /// Metadata for `E`.
    pub fn get<E: Entity>(&self) -> Result<Arc<Metadata>> {
        self.get_class(&EntityClass::of::<E>())
    }

    /// Metadata for an entity class descriptor.
    pub fn get_class(&self, class: &EntityClass) -> Result<Arc<Metadata>> {
        {
            let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
            if let Some(metadata) = cache.get(&class.type_id()) {
                return Ok(Arc::clone(metadata));
            }
        }

        let config = self.loader.load(class, EntityConfig::default())?;
        let metadata = Metadata::build(class, config, self.validate_names)?;
        tracing::debug!(
            entity = class.name(),
            table = metadata.table(),
            fields = metadata.fields().len(),
            relations = metadata.relations().len(),
            "Loaded entity metadata"
        );

        let mut cache = self.cache.write().unwrap_or_else(PoisonError::into_inner);
        let entry = cache
            .entry(class.type_id())
            .or_insert_with(|| Arc::new(metadata));
        Ok(Arc::clone(entry))
    }

    /// Whether `E` is not an entity according to the loader.
    pub fn is_transient<E: Entity>(&self) -> bool {
        self.loader.is_transient(&EntityClass::of::<E>())
    }

    /// Whether metadata for `E` has been built already.
    pub fn is_loaded<E: Entity>(&self) -> bool {
        let cache = self.cache.read().unwrap_or_else(PoisonError::into_inner);
        cache.contains_key(&TypeId::of::<E>())
    }

    /// Number of cached descriptors.
    pub fn len(&self) -> usize {
        self.cache.read().unwrap_or_else(PoisonError::into_inner).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
