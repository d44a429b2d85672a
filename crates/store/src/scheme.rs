use kube::core::{DynamicObject, ObjectMeta};
use rustc_hash::FxHashMap;
use serde::{Deserialize, Serialize};
use tether_core::{Document, DocumentExt, KindId};

use crate::{RegistryError, TypeRegistry};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KindInfo {
    pub namespaced: bool,
}

/// Explicit kind registry. Built once at controller start and shared by reference.
#[derive(Debug, Clone, Default)]
pub struct Scheme {
    kinds: FxHashMap<KindId, KindInfo>,
}

impl Scheme {
    pub fn new() -> Self { Self::default() }

    /// Registry pre-loaded with the built-in kinds commonly produced by controllers.
    pub fn with_builtins() -> Self {
        let mut s = Self::new();
        for (g, v, k) in [
            ("", "v1", "ConfigMap"),
            ("", "v1", "Secret"),
            ("", "v1", "Service"),
            ("", "v1", "ServiceAccount"),
            ("", "v1", "Pod"),
            ("apps", "v1", "Deployment"),
            ("apps", "v1", "StatefulSet"),
            ("autoscaling", "v2", "HorizontalPodAutoscaler"),
            ("policy", "v1", "PodDisruptionBudget"),
            ("rbac.authorization.k8s.io", "v1", "Role"),
            ("rbac.authorization.k8s.io", "v1", "RoleBinding"),
        ] {
            s.register(KindId::new(g, v, k), true);
        }
        s
    }

    pub fn register(&mut self, kind: KindId, namespaced: bool) -> &mut Self {
        self.kinds.insert(kind, KindInfo { namespaced });
        self
    }

    pub fn info(&self, kind: &KindId) -> Option<&KindInfo> { self.kinds.get(kind) }

    pub fn is_namespaced(&self, kind: &KindId) -> Option<bool> { self.kinds.get(kind).map(|i| i.namespaced) }

    pub fn kinds(&self) -> impl Iterator<Item = &KindId> { self.kinds.keys() }

    pub fn len(&self) -> usize { self.kinds.len() }

    pub fn is_empty(&self) -> bool { self.kinds.is_empty() }
}

impl TypeRegistry for Scheme {
    fn resolve_kind(&self, doc: &Document) -> Result<KindId, RegistryError> {
        let kind = doc.kind_id().ok_or_else(|| RegistryError::Untyped(doc.key().to_string()))?;
        if kind.kind.is_empty() || !self.kinds.contains_key(&kind) {
            return Err(RegistryError::Unregistered(kind.key()));
        }
        Ok(kind)
    }

    fn new_object(&self, kind: &KindId) -> Result<Document, RegistryError> {
        if !self.kinds.contains_key(kind) {
            return Err(RegistryError::Unregistered(kind.key()));
        }
        Ok(DynamicObject {
            types: Some(kind.type_meta()),
            metadata: ObjectMeta::default(),
            data: serde_json::Value::Object(Default::default()),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tether_core::{new_document, ObjectKey};

    #[test]
    fn resolves_registered_kinds_only() {
        let scheme = Scheme::with_builtins();
        let svc = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some("ns"), "svc"));
        assert_eq!(scheme.resolve_kind(&svc).unwrap(), KindId::new("", "v1", "Service"));

        let unknown = new_document(&KindId::new("example.com", "v1", "Widget"), &ObjectKey::new(Some("ns"), "w"));
        assert_eq!(scheme.resolve_kind(&unknown), Err(RegistryError::Unregistered("example.com/v1/Widget".into())));

        let mut untyped = svc.clone();
        untyped.types = None;
        assert!(matches!(scheme.resolve_kind(&untyped), Err(RegistryError::Untyped(_))));
    }

    #[test]
    fn new_object_is_empty_and_tagged() {
        let scheme = Scheme::with_builtins();
        let dep = scheme.new_object(&KindId::new("apps", "v1", "Deployment")).unwrap();
        assert_eq!(dep.types.unwrap().api_version, "apps/v1");
        assert!(dep.metadata.name.is_none());
    }
}
