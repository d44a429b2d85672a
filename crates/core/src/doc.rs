//! Document identity, ownership and finalizer helpers.

use std::fmt;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use kube::core::{DynamicObject, ObjectMeta};
use serde::{Deserialize, Serialize};
use serde_json::Value as Json;

use crate::KindId;

/// A kind-tagged structured document: apiVersion/kind in `types`, identity in `metadata`,
/// everything else in `data`.
pub type Document = DynamicObject;

/// Namespace + name identity of a document.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ObjectKey {
    pub namespace: Option<String>,
    pub name: String,
}

impl ObjectKey {
    pub fn new(namespace: Option<&str>, name: &str) -> Self {
        Self { namespace: namespace.map(|s| s.to_string()), name: name.to_string() }
    }

    pub fn namespace_str(&self) -> &str { self.namespace.as_deref().unwrap_or("") }
}

impl fmt::Display for ObjectKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.namespace {
            Some(ns) => write!(f, "{}/{}", ns, self.name),
            None => f.write_str(&self.name),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum OwnerRefError {
    #[error("owner {owner} is missing metadata.uid")]
    MissingUid { owner: String },
    #[error("cross-namespace owner references are disallowed: owner {owner}, object namespace {namespace}")]
    CrossNamespace { owner: String, namespace: String },
    #[error("object is already owned by another {kind} controller {name}")]
    AlreadyOwned { kind: String, name: String },
}

/// Build an empty document of `kind` carrying only `key` as identity.
pub fn new_document(kind: &KindId, key: &ObjectKey) -> Document {
    DynamicObject {
        types: Some(kind.type_meta()),
        metadata: ObjectMeta { name: Some(key.name.clone()), namespace: key.namespace.clone(), ..Default::default() },
        data: Json::Object(Default::default()),
    }
}

/// Semi-structured projection of a document.
pub fn to_projection(doc: &Document) -> Result<Json, serde_json::Error> { serde_json::to_value(doc) }

pub fn from_projection(v: Json) -> Result<Document, serde_json::Error> { serde_json::from_value(v) }

pub trait DocumentExt {
    fn key(&self) -> ObjectKey;
    fn kind_id(&self) -> Option<KindId>;
    fn is_being_deleted(&self) -> bool;
    fn has_finalizer(&self, finalizer: &str) -> bool;
    /// Returns false when the finalizer was already present.
    fn add_finalizer(&mut self, finalizer: &str) -> bool;
    /// Returns false when the finalizer was not present.
    fn remove_finalizer(&mut self, finalizer: &str) -> bool;
    fn annotation(&self, key: &str) -> Option<&str>;
    /// Mark `owner` (of kind `owner_kind`) as the controlling owner of this document.
    fn set_controller_reference(&mut self, owner: &Document, owner_kind: &KindId) -> Result<(), OwnerRefError>;
    /// True when any owner reference points at `owner` by kind and name.
    fn is_owned_by(&self, owner: &Document, owner_kind: &KindId) -> bool;
}

impl DocumentExt for Document {
    fn key(&self) -> ObjectKey {
        ObjectKey { namespace: self.metadata.namespace.clone(), name: self.metadata.name.clone().unwrap_or_default() }
    }

    fn kind_id(&self) -> Option<KindId> { self.types.as_ref().map(KindId::from) }

    fn is_being_deleted(&self) -> bool { self.metadata.deletion_timestamp.is_some() }

    fn has_finalizer(&self, finalizer: &str) -> bool {
        self.metadata.finalizers.as_ref().map_or(false, |f| f.iter().any(|x| x == finalizer))
    }

    fn add_finalizer(&mut self, finalizer: &str) -> bool {
        if self.has_finalizer(finalizer) {
            return false;
        }
        self.metadata.finalizers.get_or_insert_with(Vec::new).push(finalizer.to_string());
        true
    }

    fn remove_finalizer(&mut self, finalizer: &str) -> bool {
        let Some(list) = self.metadata.finalizers.as_mut() else { return false };
        let before = list.len();
        list.retain(|x| x != finalizer);
        before != list.len()
    }

    fn annotation(&self, key: &str) -> Option<&str> {
        self.metadata.annotations.as_ref().and_then(|a| a.get(key)).map(|s| s.as_str())
    }

    fn set_controller_reference(&mut self, owner: &Document, owner_kind: &KindId) -> Result<(), OwnerRefError> {
        let owner_name = owner.metadata.name.clone().unwrap_or_default();
        let uid = owner.metadata.uid.clone().ok_or_else(|| OwnerRefError::MissingUid { owner: owner_name.clone() })?;
        if let Some(owner_ns) = owner.metadata.namespace.as_deref() {
            let ns = self.metadata.namespace.as_deref().unwrap_or("");
            if ns != owner_ns {
                return Err(OwnerRefError::CrossNamespace { owner: format!("{}/{}", owner_ns, owner_name), namespace: ns.to_string() });
            }
        }
        let refs = self.metadata.owner_references.get_or_insert_with(Vec::new);
        let same_owner = |r: &OwnerReference| {
            KindId::from_api_version(&r.api_version, &r.kind).group == owner_kind.group && r.kind == owner_kind.kind && r.name == owner_name
        };
        if let Some(existing) = refs.iter().find(|r| r.controller == Some(true) && !same_owner(r)) {
            return Err(OwnerRefError::AlreadyOwned { kind: existing.kind.clone(), name: existing.name.clone() });
        }
        let new_ref = OwnerReference {
            api_version: owner_kind.api_version(),
            kind: owner_kind.kind.clone(),
            name: owner_name.clone(),
            uid,
            controller: Some(true),
            block_owner_deletion: Some(true),
        };
        match refs.iter_mut().find(|r| same_owner(r)) {
            Some(slot) => *slot = new_ref,
            None => refs.push(new_ref),
        }
        Ok(())
    }

    fn is_owned_by(&self, owner: &Document, owner_kind: &KindId) -> bool {
        let owner_name = owner.metadata.name.as_deref().unwrap_or("");
        self.metadata
            .owner_references
            .as_ref()
            .map_or(false, |refs| refs.iter().any(|r| r.kind == owner_kind.kind && r.name == owner_name))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn owner() -> Document {
        let mut o = new_document(&KindId::new("example.com", "v1", "App"), &ObjectKey::new(Some("ns"), "app"));
        o.metadata.uid = Some("0000-1".into());
        o
    }

    #[test]
    fn controller_reference_is_set_once() {
        let kind = KindId::new("example.com", "v1", "App");
        let mut child = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some("ns"), "svc"));
        child.set_controller_reference(&owner(), &kind).unwrap();
        child.set_controller_reference(&owner(), &kind).unwrap();
        let refs = child.metadata.owner_references.as_ref().unwrap();
        assert_eq!(refs.len(), 1);
        assert_eq!(refs[0].api_version, "example.com/v1");
        assert_eq!(refs[0].controller, Some(true));
        assert!(child.is_owned_by(&owner(), &kind));
    }

    #[test]
    fn controller_reference_rejects_foreign_controller_and_namespace() {
        let kind = KindId::new("example.com", "v1", "App");
        let mut other = owner();
        other.metadata.name = Some("other".into());
        let mut child = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some("ns"), "svc"));
        child.set_controller_reference(&other, &kind).unwrap();
        assert!(matches!(child.set_controller_reference(&owner(), &kind), Err(OwnerRefError::AlreadyOwned { .. })));

        let mut elsewhere = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some("other-ns"), "svc"));
        assert!(matches!(elsewhere.set_controller_reference(&owner(), &kind), Err(OwnerRefError::CrossNamespace { .. })));
    }

    #[test]
    fn finalizers_add_and_remove() {
        let mut o = owner();
        assert!(o.add_finalizer("f"));
        assert!(!o.add_finalizer("f"));
        assert!(o.has_finalizer("f"));
        assert!(o.remove_finalizer("f"));
        assert!(!o.remove_finalizer("f"));
        assert!(!o.has_finalizer("f"));
    }

    #[test]
    fn projection_keeps_identity_and_body() {
        let mut d = new_document(&KindId::new("", "v1", "ConfigMap"), &ObjectKey::new(Some("ns"), "cm"));
        d.data = serde_json::json!({"data": {"k": "v"}});
        let p = to_projection(&d).unwrap();
        assert_eq!(p["apiVersion"], "v1");
        assert_eq!(p["kind"], "ConfigMap");
        assert_eq!(p["metadata"]["name"], "cm");
        assert_eq!(p["data"]["k"], "v");
        let back = from_projection(p).unwrap();
        assert_eq!(back.key(), ObjectKey::new(Some("ns"), "cm"));
        assert_eq!(back.data["data"]["k"], "v");
    }
}
