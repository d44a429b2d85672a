//! Reconciler configuration: annotations domain, pruner switch, seeded kinds and
//! per-kind default ensure/ignore paths.

use std::collections::BTreeMap;
use std::path::Path;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use crate::KindId;

pub const DEFAULT_ANNOTATIONS_DOMAIN: &str = "tether.dev";

/// Ensure/ignore path expressions for one kind.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PathConfig {
    pub ensure: Vec<String>,
    pub ignore: Vec<String>,
}

impl PathConfig {
    fn new(ensure: &[&str], ignore: &[&str]) -> Self {
        Self {
            ensure: ensure.iter().map(|s| s.to_string()).collect(),
            ignore: ignore.iter().map(|s| s.to_string()).collect(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct PathDefaults {
    pub wildcard: PathConfig,
    /// Keyed by kind key (`v1/ConfigMap`, `apps/v1/Deployment`).
    pub per_kind: BTreeMap<String, PathConfig>,
}

impl Default for PathDefaults {
    fn default() -> Self {
        let meta = ["metadata.annotations", "metadata.labels"];
        let with = |extra: &[&str]| {
            let mut v: Vec<&str> = meta.to_vec();
            v.extend_from_slice(extra);
            PathConfig::new(&v, &[])
        };
        let mut per_kind = BTreeMap::new();
        per_kind.insert("v1/ConfigMap".to_string(), with(&["data"]));
        per_kind.insert("v1/Secret".to_string(), with(&["type", "data"]));
        per_kind.insert("v1/ServiceAccount".to_string(), with(&[]));
        per_kind.insert("rbac.authorization.k8s.io/v1/Role".to_string(), with(&["rules"]));
        per_kind.insert("rbac.authorization.k8s.io/v1/RoleBinding".to_string(), with(&["roleRef", "subjects"]));
        Self { wildcard: with(&["spec"]), per_kind }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, rename_all = "camelCase")]
pub struct ReconcilerConfig {
    pub annotations_domain: String,
    pub resource_pruner: bool,
    /// Kind keys seeded into the type tracker at controller start.
    pub managed_types: Vec<String>,
    pub defaults: PathDefaults,
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            annotations_domain: DEFAULT_ANNOTATIONS_DOMAIN.to_string(),
            resource_pruner: true,
            managed_types: Vec::new(),
            defaults: PathDefaults::default(),
        }
    }
}

impl ReconcilerConfig {
    pub fn from_yaml(yaml: &str) -> Result<Self> {
        serde_yaml::from_str(yaml).context("parsing reconciler config YAML")
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path).with_context(|| format!("reading config {}", path.display()))?;
        Self::from_yaml(&raw)
    }

    /// Apply `TETHER_ANNOTATIONS_DOMAIN` and `TETHER_DISABLE_PRUNER`.
    pub fn with_env_overrides(mut self) -> Self {
        if let Ok(domain) = std::env::var("TETHER_ANNOTATIONS_DOMAIN") {
            if !domain.is_empty() { self.annotations_domain = domain; }
        }
        let disable = std::env::var("TETHER_DISABLE_PRUNER")
            .ok()
            .map(|v| v == "1" || v.eq_ignore_ascii_case("true"))
            .unwrap_or(false);
        if disable { self.resource_pruner = false; }
        self
    }

    /// Per-kind default paths, falling back to the wildcard entry.
    pub fn defaults_for(&self, kind: &KindId) -> &PathConfig {
        self.defaults.per_kind.get(&kind.key()).unwrap_or(&self.defaults.wildcard)
    }

    pub fn prune_annotation(&self) -> String { format!("{}/prune", self.annotations_domain) }

    pub fn seeded_kinds(&self) -> Result<Vec<KindId>> {
        self.managed_types
            .iter()
            .map(|k| k.parse::<KindId>().map_err(anyhow::Error::from))
            .collect()
    }
}
