//! Lifecycle phases and the event payload broadcast for them.

use std::any::Any;
use std::fmt;
use std::sync::{Arc, RwLock};

use keel_core::Event;

use crate::entity::{Entity, EntityRef};
use crate::metadata::Metadata;
use crate::metadata_manager::MetadataManager;

/// A lifecycle hook point.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    PreSave,
    PostSave,
    PreCreate,
    PostCreate,
    PreUpdate,
    PostUpdate,
    PreDelete,
    PostDelete,
    PostLoad,
}

impl Phase {
    pub const ALL: [Phase; 9] = [
        Phase::PreSave,
        Phase::PostSave,
        Phase::PreCreate,
        Phase::PostCreate,
        Phase::PreUpdate,
        Phase::PostUpdate,
        Phase::PreDelete,
        Phase::PostDelete,
        Phase::PostLoad,
    ];

    /// The phase name used in mappings and event names.
    pub const fn as_str(self) -> &'static str {
        match self {
            Phase::PreSave => "preSave",
            Phase::PostSave => "postSave",
            Phase::PreCreate => "preCreate",
            Phase::PostCreate => "postCreate",
            Phase::PreUpdate => "preUpdate",
            Phase::PostUpdate => "postUpdate",
            Phase::PreDelete => "preDelete",
            Phase::PostDelete => "postDelete",
            Phase::PostLoad => "postLoad",
        }
    }

    pub fn parse(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|p| p.as_str() == name)
    }
}

impl fmt::Display for Phase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Payload of a lifecycle event.
///
/// Carries the entity, its metadata and the metadata manager. Entity
/// callbacks receive it while the entity is write-locked, so they must work
/// on `self` instead of locking [`EntityEvent::entity`]. Framework listeners
/// run without the lock held.
pub struct EntityEvent {
    phase: Phase,
    entity: Arc<dyn Any + Send + Sync>,
    metadata: Arc<Metadata>,
    metadata_manager: Arc<MetadataManager>,
    veto: Option<String>,
    stopped: bool,
}

impl EntityEvent {
    pub fn new<E: Entity>(
        phase: Phase,
        entity: &EntityRef<E>,
        metadata: Arc<Metadata>,
        metadata_manager: Arc<MetadataManager>,
    ) -> Self {
        let entity: Arc<dyn Any + Send + Sync> = Arc::clone(entity) as Arc<dyn Any + Send + Sync>;
        Self {
            phase,
            entity,
            metadata,
            metadata_manager,
            veto: None,
            stopped: false,
        }
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    /// The entity, if it is an `E`.
    pub fn entity<E: Entity>(&self) -> Option<EntityRef<E>> {
        Arc::clone(&self.entity).downcast::<RwLock<E>>().ok()
    }

    pub fn metadata(&self) -> &Arc<Metadata> {
        &self.metadata
    }

    pub fn metadata_manager(&self) -> &Arc<MetadataManager> {
        &self.metadata_manager
    }

    /// Abort the running operation. The manager reports `message` as the error.
    pub fn veto(&mut self, message: impl Into<String>) {
        self.veto = Some(message.into());
        self.stopped = true;
    }

    pub fn vetoed(&self) -> Option<&str> {
        self.veto.as_deref()
    }

    pub(crate) fn into_veto(self) -> Option<String> {
        self.veto
    }
}

impl fmt::Debug for EntityEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EntityEvent")
            .field("phase", &self.phase)
            .field("entity", &self.metadata.name())
            .field("veto", &self.veto)
            .finish()
    }
}

impl Event for EntityEvent {
    fn as_any(&self) -> &dyn Any {
        self
    }

    fn as_any_mut(&mut self) -> &mut dyn Any {
        self
    }

    fn is_propagation_stopped(&self) -> bool {
        self.stopped
    }

    fn stop_propagation(&mut self) {
        self.stopped = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_phase_names_round_trip() {
        for phase in Phase::ALL {
            assert_eq!(Phase::parse(phase.as_str()), Some(phase));
        }
        assert_eq!(Phase::parse("PreSave"), None);
        assert_eq!(Phase::PostLoad.to_string(), "postLoad");
    }
}
