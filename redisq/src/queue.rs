use std::sync::Arc;

use crate::{
    backend::{CollectionKind, QueueBackend},
    QueueResult,
};

/// A named collection in the shared store
///
/// Read-only apart from `flush`; queue contents only change through the
/// atomic operations.
#[derive(Clone)]
pub struct Queue {
    name: String,
    kind: CollectionKind,
    /// Keys that live and die with this collection
    companions: Vec<String>,
    backend: Arc<dyn QueueBackend>,
}

impl Queue {
    pub fn new(name: impl Into<String>, kind: CollectionKind, backend: Arc<dyn QueueBackend>) -> Self {
        Self {
            name: name.into(),
            kind,
            companions: Vec::new(),
            backend,
        }
    }

    pub fn with_companions(mut self, companions: Vec<String>) -> Self {
        self.companions = companions;
        self
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn kind(&self) -> CollectionKind {
        self.kind
    }

    pub async fn length(&self) -> QueueResult<usize> {
        self.backend.len(&self.name, self.kind).await
    }

    pub async fn any(&self) -> QueueResult<bool> {
        Ok(self.length().await? > 0)
    }

    /// Entries in store order: encoded records for lists, item ids for the
    /// processing set (earliest deadline first)
    pub async fn members(&self) -> QueueResult<Vec<String>> {
        self.backend.members(&self.name, self.kind).await
    }

    /// Delete the collection (and its companions) outright
    pub async fn flush(&self) -> QueueResult<()> {
        let mut names = Vec::with_capacity(1 + self.companions.len());
        names.push(self.name.clone());
        names.extend(self.companions.iter().cloned());
        self.backend.flush(&names).await
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("name", &self.name)
            .field("kind", &self.kind)
            .finish()
    }
}
