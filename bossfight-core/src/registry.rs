//! Shared set of scopes that currently accept activity.
//!
//! Ingestion consults the registry on every call so that activity for a
//! retired or unknown scope is dropped before it reaches the live counters.

use std::collections::HashSet;
use std::sync::Arc;

use parking_lot::RwLock;

use crate::types::ScopeId;

/// Cheaply clonable handle to the active-scope set.
#[derive(Debug, Clone, Default)]
pub struct ScopeRegistry {
    inner: Arc<RwLock<HashSet<ScopeId>>>,
}

impl ScopeRegistry {
    /// Create an empty registry.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Mark a scope as active.
    pub fn activate(&self, scope: ScopeId) {
        self.inner.write().insert(scope);
    }

    /// Retire a scope. Returns `true` if it was active.
    pub fn retire(&self, scope: ScopeId) -> bool {
        self.inner.write().remove(&scope)
    }

    /// Whether activity for `scope` should be accepted.
    #[must_use]
    pub fn is_active(&self, scope: ScopeId) -> bool {
        self.inner.read().contains(&scope)
    }

    /// Replace the whole set, e.g. after reloading scopes from storage.
    pub fn replace<I: IntoIterator<Item = ScopeId>>(&self, scopes: I) {
        let fresh: HashSet<ScopeId> = scopes.into_iter().collect();
        *self.inner.write() = fresh;
    }

    /// All active scopes, in no particular order.
    #[must_use]
    pub fn active(&self) -> Vec<ScopeId> {
        self.inner.read().iter().copied().collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn activate_and_retire() {
        let registry = ScopeRegistry::new();
        let scope = ScopeId::new();
        assert!(!registry.is_active(scope));
        registry.activate(scope);
        assert!(registry.is_active(scope));
        assert!(registry.retire(scope));
        assert!(!registry.retire(scope));
    }

    #[test]
    fn clones_share_state() {
        let a = ScopeRegistry::new();
        let b = a.clone();
        let scope = ScopeId::new();
        a.activate(scope);
        assert!(b.is_active(scope));
        b.replace(Vec::new());
        assert!(a.active().is_empty());
    }
}
