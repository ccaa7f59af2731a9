//! Lookup of saga templates by reference.

use std::collections::HashMap;
use std::sync::{Arc, RwLock};

use sagalog_core::{DomainError, DomainResult, SagaRef};

use crate::definition::SagaDefinition;

/// Read-only access to authored sagas.
pub trait SagaCatalog: Send + Sync {
    fn get(&self, saga_ref: &SagaRef) -> Option<Arc<SagaDefinition>>;
}

impl<C> SagaCatalog for Arc<C>
where
    C: SagaCatalog + ?Sized,
{
    fn get(&self, saga_ref: &SagaRef) -> Option<Arc<SagaDefinition>> {
        (**self).get(saga_ref)
    }
}

/// Catalog held in memory; templates are validated on insert.
#[derive(Debug, Default)]
pub struct InMemorySagaCatalog {
    sagas: RwLock<HashMap<SagaRef, Arc<SagaDefinition>>>,
}

impl InMemorySagaCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert or replace a template.
    pub fn insert(&self, saga: SagaDefinition) -> DomainResult<()> {
        saga.validate()?;
        let mut sagas = self
            .sagas
            .write()
            .map_err(|_| DomainError::invariant("saga catalog lock poisoned"))?;
        sagas.insert(saga.saga_ref.clone(), Arc::new(saga));
        Ok(())
    }

    pub fn with(self, saga: SagaDefinition) -> DomainResult<Self> {
        self.insert(saga)?;
        Ok(self)
    }

    pub fn len(&self) -> usize {
        self.sagas.read().map(|s| s.len()).unwrap_or(0)
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl SagaCatalog for InMemorySagaCatalog {
    fn get(&self, saga_ref: &SagaRef) -> Option<Arc<SagaDefinition>> {
        self.sagas.read().ok()?.get(saga_ref).cloned()
    }
}
