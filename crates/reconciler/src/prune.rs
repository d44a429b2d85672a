//! Owner-scoped garbage collection of children no longer declared by the owner.

use tether_core::{is_managed, Document, DocumentExt, KindId, ManagedRef, ObjectKey};
use tether_store::Store;
use tracing::{debug, info};

use crate::converge::{ConvergeError, Target};

/// Delete every child of the given kinds, in the owner's namespace, that is owned by
/// `owner`, not already being deleted, and absent from `managed`. Returns the number
/// of deletions issued.
pub async fn prune_orphaned(
    store: &dyn Store,
    kinds: &[KindId],
    owner: &Document,
    owner_kind: &KindId,
    managed: &[ManagedRef],
) -> Result<usize, ConvergeError> {
    let namespace = owner.metadata.namespace.as_deref();
    let mut pruned = 0usize;
    for kind in kinds {
        let items = store.list(kind, namespace).await.map_err(|e| {
            ConvergeError::store("unable to list resources", &Target::new(&kind.kind, &ObjectKey::new(namespace, "")), e)
        })?;
        for obj in items.iter() {
            let key = obj.key();
            if !obj.is_owned_by(owner, owner_kind) || obj.is_being_deleted() || is_managed(managed, &key, &kind.kind) {
                continue;
            }
            let target = Target::new(&kind.kind, &key);
            match store.delete(obj).await {
                Ok(()) => {}
                // already gone
                Err(e) if e.is_not_found() => {
                    debug!(kind = %kind, name = %key.name, "orphan vanished before delete");
                    continue;
                }
                Err(e) => return Err(ConvergeError::store("unable to delete orphaned resource", &target, e)),
            }
            pruned += 1;
            metrics::counter!("tether_resources_pruned_total", 1u64, "kind" => kind.kind.clone());
            info!(kind = %kind, name = %key.name, namespace = %key.namespace_str(), "resource deleted");
        }
    }
    Ok(pruned)
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use tether_core::new_document;
    use tether_store::MemStore;

    fn owned_by(kind: &KindId, name: &str, owner: &str) -> Document {
        let mut d = new_document(kind, &ObjectKey::new(Some("ns"), name));
        d.metadata.owner_references = Some(vec![OwnerReference {
            api_version: "v1".into(),
            kind: "ServiceAccount".into(),
            name: owner.into(),
            uid: "u".into(),
            ..Default::default()
        }]);
        d
    }

    #[tokio::test]
    async fn only_tracked_kinds_are_considered() {
        let store = MemStore::new();
        let owner_kind = KindId::new("", "v1", "ServiceAccount");
        let owner = new_document(&owner_kind, &ObjectKey::new(Some("ns"), "owner"));
        let hpa = KindId::new("autoscaling", "v2", "HorizontalPodAutoscaler");
        let pdb = KindId::new("policy", "v1", "PodDisruptionBudget");
        let dep = KindId::new("apps", "v1", "Deployment");
        store.insert(owned_by(&dep, "deploy", "owner")).unwrap();
        store.insert(owned_by(&hpa, "hpa", "owner")).unwrap();
        store.insert(owned_by(&pdb, "pdb", "owner")).unwrap();
        store.insert(owned_by(&pdb, "foreign", "someone-else")).unwrap();

        let managed = vec![ManagedRef::new(&ObjectKey::new(Some("ns"), "deploy"), &dep)];
        let n = prune_orphaned(&store, &[hpa.clone(), pdb.clone()], &owner, &owner_kind, &managed).await.unwrap();
        assert_eq!(n, 2);
        assert_eq!(store.list(&hpa, Some("ns")).await.unwrap().len(), 0);
        let left: Vec<_> = store.list(&pdb, Some("ns")).await.unwrap().into_iter().map(|o| o.key().name).collect();
        assert_eq!(left, vec!["foreign"]);
        // untracked kind survives even though it is orphaned
        assert_eq!(store.list(&dep, Some("ns")).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn objects_being_deleted_are_left_alone() {
        let store = MemStore::new();
        let owner_kind = KindId::new("", "v1", "ServiceAccount");
        let owner = new_document(&owner_kind, &ObjectKey::new(Some("ns"), "owner"));
        let secret = KindId::new("", "v1", "Secret");
        let mut s = owned_by(&secret, "s", "owner");
        s.add_finalizer("keep");
        let s = store.insert(s).unwrap();
        store.delete(&s).await.unwrap();

        let n = prune_orphaned(&store, &[secret], &owner, &owner_kind, &[]).await.unwrap();
        assert_eq!(n, 0);
        assert_eq!(store.writes().deletes, 1);
    }
}
