//! Owner status aggregation: copies the `status` of owned Deployments and StatefulSets
//! into the owner's `status.deployments.<name>` / `status.statefulSets.<name>` and runs
//! caller mutations, writing the status subresource only when something changed.

use serde_json::{Map, Value};
use tether_core::{semantic_eq, Document, DocumentExt, KindId, ObjectKey};
use tether_store::{Store, StoreError};
use tracing::{debug, error};

use crate::converge::{ConvergeError, Target};

pub const DEPLOYMENTS_FIELD: &str = "deployments";
pub const STATEFULSETS_FIELD: &str = "statefulSets";

/// Caller-supplied status edit; returns whether it changed anything.
pub trait StatusMutation: Send + Sync {
    fn mutate(&self, status: &mut Value) -> bool;
}

impl<F> StatusMutation for F
where
    F: Fn(&mut Value) -> bool + Send + Sync,
{
    fn mutate(&self, status: &mut Value) -> bool { self(status) }
}

/// Returns true when the owner's status was written.
pub async fn reconcile_status(
    store: &dyn Store,
    owner: &Document,
    deployments: &[ObjectKey],
    statefulsets: &[ObjectKey],
    mutators: &[Box<dyn StatusMutation>],
) -> Result<bool, ConvergeError> {
    let mut status = owner.data.get("status").cloned().filter(Value::is_object).unwrap_or_else(|| Value::Object(Map::new()));
    let mut update = false;

    let groups = [
        (KindId::new("apps", "v1", "Deployment"), DEPLOYMENTS_FIELD, deployments),
        (KindId::new("apps", "v1", "StatefulSet"), STATEFULSETS_FIELD, statefulsets),
    ];
    for (kind, field, keys) in groups.iter() {
        for key in keys.iter() {
            let target = Target::new(&kind.kind, key);
            let child = store
                .get(kind, key)
                .await
                .map_err(|e| ConvergeError::store("unable to get resource", &target, e))?
                .ok_or_else(|| {
                    ConvergeError::store(
                        "unable to get resource",
                        &target,
                        StoreError::NotFound { kind: kind.kind.clone(), key: key.clone() },
                    )
                })?;
            let observed = child.data.get("status").cloned().unwrap_or(Value::Null);
            if set_child_status(&mut status, field, &key.name, observed) {
                debug!(owner = %owner.key(), child = %target, "child status changed");
                update = true;
            }
        }
    }

    for m in mutators.iter() {
        if m.mutate(&mut status) {
            update = true;
        }
    }

    if !update {
        return Ok(false);
    }
    let mut next = owner.clone();
    if !next.data.is_object() {
        next.data = Value::Object(Map::new());
    }
    next.data["status"] = status;
    let owner_kind = owner.types.as_ref().map(|t| t.kind.clone()).unwrap_or_default();
    let target = Target::new(&owner_kind, &owner.key());
    if let Err(e) = store.update_status(next).await {
        error!(owner = %target, error = %e, "unable to update status");
        return Err(ConvergeError::store("unable to update status", &target, e));
    }
    metrics::counter!("tether_status_updates_total", 1u64, "kind" => owner_kind);
    Ok(true)
}

fn set_child_status(status: &mut Value, field: &str, name: &str, observed: Value) -> bool {
    let Some(root) = status.as_object_mut() else { return false };
    let group = root.entry(field).or_insert_with(|| Value::Object(Map::new()));
    if !group.is_object() {
        *group = Value::Object(Map::new());
    }
    let Some(group) = group.as_object_mut() else { return false };
    let current = group.get(name).cloned().unwrap_or(Value::Null);
    if semantic_eq(&current, &observed) {
        return false;
    }
    group.insert(name.to_string(), observed);
    true
}
