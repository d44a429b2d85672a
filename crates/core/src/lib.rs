//! Tether core types: path algebra, documents, kinds, managed references and config.

#![forbid(unsafe_code)]

use std::time::Duration;

use serde::{Deserialize, Serialize};

pub mod config;
pub mod doc;
pub mod kind;
pub mod path;
pub mod semantic;

pub use config::{PathConfig, PathDefaults, ReconcilerConfig};
pub use doc::{from_projection, new_document, to_projection, Document, DocumentExt, ObjectKey, OwnerRefError};
pub use kind::{InvalidKindKey, KindId};
pub use path::{PathError, PathExpr};
pub use semantic::{diff_summary, semantic_eq, DiffSummary};

pub mod prelude {
    pub use super::{Document, DocumentExt, KindId, ManagedRef, ObjectKey, PathExpr, Step};
}

/// Identity of a child document the current pass wants to keep. Rebuilt on every pass
/// from the templates, so it carries no store uid.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct ManagedRef {
    pub namespace: Option<String>,
    pub name: String,
    pub kind: String,
    pub api_version: String,
}

impl ManagedRef {
    pub fn new(key: &ObjectKey, kind: &KindId) -> Self {
        Self {
            namespace: key.namespace.clone(),
            name: key.name.clone(),
            kind: kind.kind.clone(),
            api_version: kind.api_version(),
        }
    }

    /// Match on (namespace, name, kind); the api version is not part of the identity.
    pub fn matches(&self, key: &ObjectKey, kind: &str) -> bool {
        self.name == key.name && self.namespace == key.namespace && self.kind == kind
    }
}

pub fn is_managed(managed: &[ManagedRef], key: &ObjectKey, kind: &str) -> bool {
    managed.iter().any(|m| m.matches(key, kind))
}

/// Outcome of a lifecycle/orchestration step. The first non-`Continue` step
/// short-circuits the caller.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Step {
    Continue,
    Return,
    ReturnAndRequeue { after: Option<Duration> },
}

impl Step {
    pub fn requeue() -> Self { Step::ReturnAndRequeue { after: None } }

    pub fn requeue_after(d: Duration) -> Self { Step::ReturnAndRequeue { after: Some(d) } }

    pub fn is_continue(&self) -> bool { matches!(self, Step::Continue) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn managed_ref_identity_ignores_api_version() {
        let key = ObjectKey::new(Some("ns"), "svc");
        let r = ManagedRef::new(&key, &KindId::new("", "v1", "Service"));
        assert!(r.matches(&key, "Service"));
        assert!(!r.matches(&key, "Deployment"));
        assert!(!r.matches(&ObjectKey::new(Some("other"), "svc"), "Service"));
        let mut moved = r.clone();
        moved.api_version = "v2".into();
        assert!(is_managed(&[moved], &key, "Service"));
    }

    #[test]
    fn only_continue_lets_the_pass_proceed() {
        assert!(Step::Continue.is_continue());
        assert!(!Step::Return.is_continue());
        assert!(!Step::requeue().is_continue());
        assert_eq!(Step::requeue_after(Duration::from_secs(5)), Step::ReturnAndRequeue { after: Some(Duration::from_secs(5)) });
    }
}
