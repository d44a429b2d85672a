//! Tether store contracts: the document `Store`, the `TypeRegistry` that maps documents
//! to kinds, and `MemStore`, an in-RAM store with optimistic concurrency.

#![forbid(unsafe_code)]

use async_trait::async_trait;
use tether_core::{Document, KindId, ObjectKey};

mod mem;
mod scheme;

pub use mem::{MemStore, WriteStats};
pub use scheme::{KindInfo, Scheme};

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("{kind} {key} not found")]
    NotFound { kind: String, key: ObjectKey },
    #[error("{kind} {key} already exists")]
    AlreadyExists { kind: String, key: ObjectKey },
    #[error("conflict on {kind} {key}: {reason}")]
    Conflict { kind: String, key: ObjectKey, reason: String },
    #[error("invalid object: {0}")]
    Invalid(String),
    #[error(transparent)]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    pub fn is_not_found(&self) -> bool { matches!(self, StoreError::NotFound { .. }) }
    pub fn is_conflict(&self) -> bool { matches!(self, StoreError::Conflict { .. }) }
}

/// Document store. `get` maps absence to `Ok(None)`; `update` must fail with
/// `Conflict` when the document's resourceVersion is stale.
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, kind: &KindId, key: &ObjectKey) -> Result<Option<Document>, StoreError>;
    async fn create(&self, obj: Document) -> Result<Document, StoreError>;
    async fn update(&self, obj: Document) -> Result<Document, StoreError>;
    /// Write only the `status` of `obj`; same conflict rules as `update`.
    async fn update_status(&self, obj: Document) -> Result<Document, StoreError>;
    async fn delete(&self, obj: &Document) -> Result<(), StoreError>;
    /// All documents of `kind`, optionally restricted to one namespace.
    async fn list(&self, kind: &KindId, namespace: Option<&str>) -> Result<Vec<Document>, StoreError>;
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RegistryError {
    #[error("document {0} carries no apiVersion/kind")]
    Untyped(String),
    #[error("kind {0} is not registered")]
    Unregistered(String),
}

/// Maps documents to kinds and builds zero-valued documents of a kind.
pub trait TypeRegistry: Send + Sync {
    fn resolve_kind(&self, doc: &Document) -> Result<KindId, RegistryError>;
    fn new_object(&self, kind: &KindId) -> Result<Document, RegistryError>;
}

/// Kind carried by a document's type tag, for store implementations.
pub fn kind_of(obj: &Document) -> Result<KindId, StoreError> {
    use tether_core::DocumentExt;
    obj.kind_id().ok_or_else(|| StoreError::Invalid(format!("{} has no apiVersion/kind", obj.key())))
}

/// Registers a watch on documents of `child` kind whose controlling owner is of `owner`
/// kind, so their events re-trigger the owner's reconcile.
pub trait WatchRegistrar: Send + Sync {
    fn watch_owned(&self, child: &KindId, owner: &KindId) -> anyhow::Result<()>;
}
