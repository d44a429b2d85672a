//! Group/version/kind identity and its `group/version/Kind` key form.

use std::fmt;
use std::str::FromStr;

use kube::core::{GroupVersionKind, TypeMeta};
use serde::{Deserialize, Serialize};

/// Group/Version/Kind of a document. The string key is `v1/Kind` for the core group and
/// `group/v1/Kind` otherwise.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct KindId {
    pub group: String,
    pub version: String,
    pub kind: String,
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid kind key: {0} (expect v1/Kind or group/v1/Kind)")]
pub struct InvalidKindKey(pub String);

impl KindId {
    pub fn new(group: &str, version: &str, kind: &str) -> Self {
        Self { group: group.to_string(), version: version.to_string(), kind: kind.to_string() }
    }

    /// Split an `apiVersion` (`v1` or `apps/v1`) and pair it with `kind`.
    pub fn from_api_version(api_version: &str, kind: &str) -> Self {
        match api_version.split_once('/') {
            Some((g, v)) => Self::new(g, v, kind),
            None => Self::new("", api_version, kind),
        }
    }

    pub fn api_version(&self) -> String {
        if self.group.is_empty() { self.version.clone() } else { format!("{}/{}", self.group, self.version) }
    }

    pub fn key(&self) -> String {
        if self.group.is_empty() {
            format!("{}/{}", self.version, self.kind)
        } else {
            format!("{}/{}/{}", self.group, self.version, self.kind)
        }
    }

    pub fn type_meta(&self) -> TypeMeta {
        TypeMeta { api_version: self.api_version(), kind: self.kind.clone() }
    }
}

impl FromStr for KindId {
    type Err = InvalidKindKey;
    fn from_str(key: &str) -> Result<Self, Self::Err> {
        let parts: Vec<_> = key.split('/').collect();
        match parts.as_slice() {
            [version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new("", version, kind)),
            [group, version, kind] if !version.is_empty() && !kind.is_empty() => Ok(Self::new(group, version, kind)),
            _ => Err(InvalidKindKey(key.to_string())),
        }
    }
}

impl fmt::Display for KindId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { f.write_str(&self.key()) }
}

impl From<&TypeMeta> for KindId {
    fn from(t: &TypeMeta) -> Self { Self::from_api_version(&t.api_version, &t.kind) }
}

impl From<&KindId> for GroupVersionKind {
    fn from(k: &KindId) -> Self { GroupVersionKind::gvk(&k.group, &k.version, &k.kind) }
}
