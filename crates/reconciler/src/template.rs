//! Templates: how a child document is built and which of its paths are enforced.

use std::sync::Arc;

use async_trait::async_trait;
use tether_core::{Document, ManagedRef};
use tether_store::Store;

use crate::converge::{converge, ConvergeError, Converger};
use crate::property::Property;

type BuilderFn = dyn Fn() -> anyhow::Result<Document> + Send + Sync;

/// Mutation run after the builder; may read live state through the store.
#[async_trait]
pub trait Mutation: Send + Sync {
    async fn mutate(&self, store: &dyn Store, desired: Document) -> anyhow::Result<Document>;
}

/// Capability every child adapter exposes to the orchestrator.
#[async_trait]
pub trait Resource: Send + Sync {
    /// Desired document for this pass.
    async fn build(&self, store: &dyn Store) -> anyhow::Result<Document>;

    /// Whether the document should exist at all.
    fn enabled(&self) -> bool;

    fn ensure(&self) -> &[Property];

    fn ignore(&self) -> &[Property];

    async fn reconcile(&self, cx: &Converger<'_>, owner: &Document) -> Result<Option<ManagedRef>, ConvergeError> {
        converge(cx, owner, self).await
    }
}

/// Builder + ordered mutations + ensure/ignore paths, rebuilt every pass.
#[derive(Clone)]
pub struct Template {
    builder: Arc<BuilderFn>,
    mutations: Vec<Arc<dyn Mutation>>,
    enabled: bool,
    ensure: Vec<Property>,
    ignore: Vec<Property>,
}

impl Template {
    pub fn new<F>(builder: F) -> Self
    where
        F: Fn() -> anyhow::Result<Document> + Send + Sync + 'static,
    {
        Self { builder: Arc::new(builder), mutations: Vec::new(), enabled: true, ensure: Vec::new(), ignore: Vec::new() }
    }

    /// Template that always builds a copy of `obj`.
    pub fn from_object(obj: Document) -> Self { Self::new(move || Ok(obj.clone())) }

    pub fn with_enabled(mut self, enabled: bool) -> Self {
        self.enabled = enabled;
        self
    }

    /// Chain `f` after the current builder.
    pub fn apply<F>(mut self, f: F) -> Self
    where
        F: Fn(Document) -> anyhow::Result<Document> + Send + Sync + 'static,
    {
        let base = Arc::clone(&self.builder);
        self.builder = Arc::new(move || f(base()?));
        self
    }

    pub fn with_mutation(mut self, m: impl Mutation + 'static) -> Self {
        self.mutations.push(Arc::new(m));
        self
    }

    pub fn with_ensure<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Property>,
    {
        self.ensure.extend(paths.into_iter().map(Into::into));
        self
    }

    pub fn with_ignore<I, P>(mut self, paths: I) -> Self
    where
        I: IntoIterator<Item = P>,
        P: Into<Property>,
    {
        self.ignore.extend(paths.into_iter().map(Into::into));
        self
    }
}

#[async_trait]
impl Resource for Template {
    async fn build(&self, store: &dyn Store) -> anyhow::Result<Document> {
        let mut doc = (self.builder)()?;
        for m in self.mutations.iter() {
            doc = m.mutate(store, doc).await?;
        }
        Ok(doc)
    }

    fn enabled(&self) -> bool { self.enabled }

    fn ensure(&self) -> &[Property] { &self.ensure }

    fn ignore(&self) -> &[Property] { &self.ignore }
}
