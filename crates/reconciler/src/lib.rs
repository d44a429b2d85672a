//! Tether reconciler: converges owned child documents towards their templates, prunes
//! children the owner no longer declares and drives the owner's finalizer lifecycle.

#![forbid(unsafe_code)]

use std::sync::Arc;

use tether_core::{Document, DocumentExt, KindId, ManagedRef, ObjectKey, ReconcilerConfig};
use tether_store::{Store, TypeRegistry, WatchRegistrar};
use tracing::debug;

pub mod converge;
pub mod lifecycle;
pub mod mutators;
pub mod property;
pub mod prune;
pub mod status;
pub mod template;
pub mod tracker;

pub use converge::{converge, ConvergeError, Converger, Target};
pub use lifecycle::{get_instance, Finalize, Instance, LifecycleError, LifecycleOptions};
pub use mutators::{reconcile_deployment_replicas, reconcile_service_node_ports, RolloutTrigger};
pub use property::{Delta, PatchOp, Property};
pub use prune::prune_orphaned;
pub use status::{reconcile_status, StatusMutation};
pub use template::{Mutation, Resource, Template};
pub use tracker::TypeTracker;

/// Per-controller entry point: one instance per owner kind, shared by all passes.
pub struct Reconciler {
    store: Arc<dyn Store>,
    registry: Arc<dyn TypeRegistry>,
    config: ReconcilerConfig,
    owner_kind: KindId,
    tracker: TypeTracker,
}

impl Reconciler {
    pub fn new(store: Arc<dyn Store>, registry: Arc<dyn TypeRegistry>, config: ReconcilerConfig, owner_kind: KindId) -> Self {
        let tracker = TypeTracker::new(owner_kind.clone(), None);
        Self { store, registry, config, owner_kind, tracker }
    }

    /// Register owned-kind watches through `registrar` as new kinds are seen.
    pub fn with_registrar(mut self, registrar: Arc<dyn WatchRegistrar>) -> Self {
        self.tracker = TypeTracker::new(self.owner_kind.clone(), Some(registrar));
        self
    }

    /// Seed the tracker with the configured managed kinds.
    pub fn init(&self) -> anyhow::Result<()> {
        for kind in self.config.seeded_kinds()? {
            self.tracker.track_kind(&kind)?;
        }
        Ok(())
    }

    pub fn store(&self) -> &dyn Store { self.store.as_ref() }

    pub fn config(&self) -> &ReconcilerConfig { &self.config }

    pub fn owner_kind(&self) -> &KindId { &self.owner_kind }

    pub fn tracker(&self) -> &TypeTracker { &self.tracker }

    fn converger(&self) -> Converger<'_> {
        Converger {
            store: self.store.as_ref(),
            registry: self.registry.as_ref(),
            config: &self.config,
            owner_kind: &self.owner_kind,
        }
    }

    pub async fn get_instance(&self, key: &ObjectKey, opts: &LifecycleOptions) -> Result<Instance, LifecycleError> {
        get_instance(self.store.as_ref(), &self.owner_kind, key, opts).await
    }

    pub async fn converge(&self, owner: &Document, res: &dyn Resource) -> Result<Option<ManagedRef>, ConvergeError> {
        self.converger().converge(owner, res).await
    }

    /// Owner annotation `<domain>/prune` (unparsable means true) AND the global switch.
    pub fn is_pruner_enabled(&self, owner: &Document) -> bool {
        let prune = match owner.annotation(&self.config.prune_annotation()) {
            Some(v) => parse_bool(v).unwrap_or(true),
            None => true,
        };
        prune && self.config.resource_pruner
    }

    pub async fn prune_orphaned(&self, owner: &Document, managed: &[ManagedRef]) -> Result<usize, ConvergeError> {
        let kinds = self.tracker.seen().map_err(ConvergeError::Tracker)?;
        prune_orphaned(self.store.as_ref(), &kinds, owner, &self.owner_kind, managed).await
    }

    /// Converge every resource in order, track the kinds produced, then prune.
    pub async fn reconcile_owned(&self, owner: &Document, resources: &[Box<dyn Resource>]) -> Result<Vec<ManagedRef>, ConvergeError> {
        let cx = self.converger();
        let mut managed = Vec::with_capacity(resources.len());
        for res in resources.iter() {
            let Some(r) = cx.converge(owner, res.as_ref()).await? else { continue };
            let kind = KindId::from_api_version(&r.api_version, &r.kind);
            self.tracker.track_kind(&kind).map_err(|source| ConvergeError::Watch { kind, source })?;
            managed.push(r);
        }
        if self.is_pruner_enabled(owner) {
            let n = self.prune_orphaned(owner, &managed).await?;
            debug!(owner = %owner.key(), pruned = n, "prune pass done");
        } else {
            debug!(owner = %owner.key(), "resource pruner disabled");
        }
        Ok(managed)
    }

    /// Aggregate owned Deployment/StatefulSet status into the owner and apply `mutators`.
    pub async fn reconcile_status(
        &self,
        owner: &Document,
        deployments: &[ObjectKey],
        statefulsets: &[ObjectKey],
        mutators: &[Box<dyn StatusMutation>],
    ) -> Result<bool, ConvergeError> {
        reconcile_status(self.store.as_ref(), owner, deployments, statefulsets, mutators).await
    }
}

fn parse_bool(v: &str) -> Option<bool> {
    match v {
        "1" | "t" | "T" | "true" | "TRUE" | "True" => Some(true),
        "0" | "f" | "F" | "false" | "FALSE" | "False" => Some(false),
        _ => None,
    }
}
