use std::collections::HashMap;
use std::sync::{PoisonError, RwLock};

use crate::domain::{DomainId, TaskError};
use crate::ports::{DomainEntry, DomainRegistry};

/// Domain settings held in memory.
#[derive(Debug, Default)]
pub struct InMemoryDomainRegistry {
    domains: RwLock<HashMap<DomainId, DomainEntry>>,
}

impl InMemoryDomainRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_domain(self, domain_id: impl Into<DomainId>, entry: DomainEntry) -> Self {
        self.insert(domain_id, entry);
        self
    }

    /// Add or replace a domain (e.g. after a failover).
    pub fn insert(&self, domain_id: impl Into<DomainId>, entry: DomainEntry) {
        self.domains
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(domain_id.into(), entry);
    }
}

impl DomainRegistry for InMemoryDomainRegistry {
    fn get(&self, domain_id: &DomainId) -> Result<DomainEntry, TaskError> {
        self.domains
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(domain_id)
            .cloned()
            .ok_or_else(|| TaskError::DomainNotFound(domain_id.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn unknown_domain_is_an_error() {
        let registry = InMemoryDomainRegistry::new();
        let err = registry.get(&DomainId::new("ghost")).unwrap_err();
        assert_eq!(err, TaskError::DomainNotFound(DomainId::new("ghost")));
    }

    #[test]
    fn insert_replaces_entry() {
        let registry =
            InMemoryDomainRegistry::new().with_domain("orders", DomainEntry::active_in("a"));
        registry.insert("orders", DomainEntry::active_in("b"));

        let entry = registry.get(&DomainId::new("orders")).unwrap();
        assert!(entry.is_active_in("b"));
    }
}
