//! Entity manager configuration.

/// What `save` does with an entity that carries an identifier but is not
/// managed by the entity manager.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub enum DetachedSavePolicy {
    /// Fail with an invalid-state error. No storage call is made.
    #[default]
    Reject,
    /// Dispatch `preSave`/`postSave` but persist nothing.
    Ignore,
    /// Treat the entity as new and insert it with its current identifier.
    Insert,
}

/// Configuration for an [`EntityManager`](crate::EntityManager).
#[derive(Debug, Clone)]
pub struct ManagerConfig {
    /// Behaviour of `save` for detached entities.
    pub detached_save: DetachedSavePolicy,
    /// Consult the identity map before querying in `Repository::find`.
    pub find_from_identity_map: bool,
}

impl Default for ManagerConfig {
    fn default() -> Self {
        Self {
            detached_save: DetachedSavePolicy::Reject,
            find_from_identity_map: true,
        }
    }
}

impl ManagerConfig {
    /// Create the default configuration.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the detached-save policy (builder pattern).
    #[must_use]
    pub fn detached_save(mut self, policy: DetachedSavePolicy) -> Self {
        self.detached_save = policy;
        self
    }

    /// Toggle identity-map lookups in `find` (builder pattern).
    #[must_use]
    pub fn find_from_identity_map(mut self, value: bool) -> Self {
        self.find_from_identity_map = value;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = ManagerConfig::new();
        assert_eq!(config.detached_save, DetachedSavePolicy::Reject);
        assert!(config.find_from_identity_map);
    }

    #[test]
    fn test_builder() {
        let config = ManagerConfig::new()
            .detached_save(DetachedSavePolicy::Ignore)
            .find_from_identity_map(false);
        assert_eq!(config.detached_save, DetachedSavePolicy::Ignore);
        assert!(!config.find_from_identity_map);
    }
}
