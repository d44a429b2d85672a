//! Fetch / finalize / initialize flow for the parent document.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{Document, DocumentExt, KindId, ObjectKey, Step};
use tether_store::{Store, StoreError};
use tracing::{error, info};

/// Cleanup run while the parent carries the finalizer and is being deleted. Must be
/// idempotent: a failure leaves the finalizer in place and the step runs again.
#[async_trait]
pub trait Finalize: Send + Sync {
    async fn finalize(&self, store: &dyn Store, instance: &Document) -> anyhow::Result<()>;
}

#[derive(Clone, Default)]
pub struct LifecycleOptions {
    pub finalizer: Option<String>,
    pub finalization: Vec<Arc<dyn Finalize>>,
}

impl LifecycleOptions {
    pub fn new() -> Self { Self::default() }

    pub fn with_finalizer(mut self, name: impl Into<String>) -> Self {
        self.finalizer = Some(name.into());
        self
    }

    pub fn with_step(mut self, step: impl Finalize + 'static) -> Self {
        self.finalization.push(Arc::new(step));
        self
    }
}

#[derive(Debug, thiserror::Error)]
pub enum LifecycleError {
    #[error("unable to get instance {key}: {source}")]
    Get { key: ObjectKey, source: StoreError },
    #[error("finalization of {key} failed: {source:#}")]
    Finalize { key: ObjectKey, source: anyhow::Error },
    #[error("unable to update instance {key}: {source}")]
    Update { key: ObjectKey, source: StoreError },
}

/// Outcome of fetching the parent. `instance` is set when `step` is `Continue`.
#[derive(Debug, Clone)]
pub struct Instance {
    pub step: Step,
    pub instance: Option<Document>,
}

impl Instance {
    fn done(step: Step) -> Self { Self { step, instance: None } }
}

pub async fn get_instance(
    store: &dyn Store,
    kind: &KindId,
    key: &ObjectKey,
    opts: &LifecycleOptions,
) -> Result<Instance, LifecycleError> {
    let Some(mut instance) = store.get(kind, key).await.map_err(|source| LifecycleError::Get { key: key.clone(), source })? else {
        // stale work item
        return Ok(Instance::done(Step::Return));
    };

    if instance.is_being_deleted() {
        let Some(finalizer) = opts.finalizer.as_deref() else { return Ok(Instance::done(Step::Return)) };
        if !instance.has_finalizer(finalizer) {
            return Ok(Instance::done(Step::Return));
        }
        for step in opts.finalization.iter() {
            if let Err(source) = step.finalize(store, &instance).await {
                error!(name = %key.name, namespace = %key.namespace_str(), error = %format!("{:#}", source), "unable to finalize instance");
                return Err(LifecycleError::Finalize { key: key.clone(), source });
            }
        }
        instance.remove_finalizer(finalizer);
        store.update(instance).await.map_err(|source| LifecycleError::Update { key: key.clone(), source })?;
        info!(name = %key.name, namespace = %key.namespace_str(), finalizer, "finalizer removed");
        return Ok(Instance::done(Step::Return));
    }

    if let Some(finalizer) = opts.finalizer.as_deref() {
        if instance.add_finalizer(finalizer) {
            store.update(instance).await.map_err(|source| LifecycleError::Update { key: key.clone(), source })?;
            info!(name = %key.name, namespace = %key.namespace_str(), finalizer, "instance initialized");
            return Ok(Instance::done(Step::requeue()));
        }
    }

    Ok(Instance { step: Step::Continue, instance: Some(instance) })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use tether_core::new_document;
    use tether_store::MemStore;

    struct Count(Arc<AtomicUsize>);

    #[async_trait]
    impl Finalize for Count {
        async fn finalize(&self, _store: &dyn Store, _instance: &Document) -> anyhow::Result<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn kind() -> KindId { KindId::new("", "v1", "ConfigMap") }

    fn key() -> ObjectKey { ObjectKey::new(Some("ns"), "parent") }

    #[tokio::test]
    async fn missing_parent_returns_without_error() {
        let store = MemStore::new();
        let got = get_instance(&store, &kind(), &key(), &LifecycleOptions::new().with_finalizer("f")).await.unwrap();
        assert_eq!(got.step, Step::Return);
        assert!(got.instance.is_none());
    }

    #[tokio::test]
    async fn finalizer_is_added_once_then_continue() {
        let store = MemStore::new();
        store.insert(new_document(&kind(), &key())).unwrap();
        let runs = Arc::new(AtomicUsize::new(0));
        let opts = LifecycleOptions::new().with_finalizer("f").with_step(Count(Arc::clone(&runs)));

        let first = get_instance(&store, &kind(), &key(), &opts).await.unwrap();
        assert_eq!(first.step, Step::requeue());
        let second = get_instance(&store, &kind(), &key(), &opts).await.unwrap();
        assert_eq!(second.step, Step::Continue);
        assert!(second.instance.unwrap().has_finalizer("f"));
        assert_eq!(store.writes().updates, 1);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn deletion_runs_steps_and_releases_finalizer() {
        let store = MemStore::new();
        let mut parent = new_document(&kind(), &key());
        parent.add_finalizer("f");
        let parent = store.insert(parent).unwrap();
        store.delete(&parent).await.unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let opts = LifecycleOptions::new().with_finalizer("f").with_step(Count(Arc::clone(&runs)));
        let got = get_instance(&store, &kind(), &key(), &opts).await.unwrap();
        assert_eq!(got.step, Step::Return);
        assert_eq!(runs.load(Ordering::SeqCst), 1);
        assert!(store.get(&kind(), &key()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn no_finalizer_configured_means_no_cleanup() {
        let store = MemStore::new();
        let mut parent = new_document(&kind(), &key());
        parent.add_finalizer("other");
        let parent = store.insert(parent).unwrap();
        store.delete(&parent).await.unwrap();

        let runs = Arc::new(AtomicUsize::new(0));
        let opts = LifecycleOptions { finalizer: None, finalization: vec![Arc::new(Count(Arc::clone(&runs)))] };
        assert_eq!(get_instance(&store, &kind(), &key(), &opts).await.unwrap().step, Step::Return);
        assert_eq!(runs.load(Ordering::SeqCst), 0);
        assert_eq!(store.writes().updates, 0);
    }
}
