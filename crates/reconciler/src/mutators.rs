//! Template mutations that fold live cluster state into the desired document.

use anyhow::{bail, Context};
use async_trait::async_trait;
use serde_json::{Map, Value};
use tether_core::{Document, DocumentExt, KindId, ObjectKey};
use tether_store::Store;

use crate::template::Mutation;

async fn live_of(store: &dyn Store, desired: &Document) -> anyhow::Result<Option<Document>> {
    let kind = desired.kind_id().context("desired document has no apiVersion/kind")?;
    store.get(&kind, &desired.key()).await.context("unable to retrieve live object")
}

fn spec_mut(doc: &mut Document) -> anyhow::Result<&mut Map<String, Value>> {
    let root = doc.data.as_object_mut().context("document body is not a map")?;
    root.entry("spec").or_insert_with(|| Value::Object(Map::new())).as_object_mut().context("spec is not a map")
}

/// Keep live `spec.replicas` (e.g. set by an autoscaler) unless `enforce` is set.
pub fn reconcile_deployment_replicas(enforce: bool) -> DeploymentReplicas { DeploymentReplicas { enforce } }

#[derive(Debug, Clone, Copy)]
pub struct DeploymentReplicas {
    enforce: bool,
}

#[async_trait]
impl Mutation for DeploymentReplicas {
    async fn mutate(&self, store: &dyn Store, mut desired: Document) -> anyhow::Result<Document> {
        if self.enforce {
            return Ok(desired);
        }
        let Some(live) = live_of(store, &desired).await? else { return Ok(desired) };
        let replicas = live.data.pointer("/spec/replicas").cloned();
        let spec = spec_mut(&mut desired)?;
        match replicas {
            Some(r) => spec.insert("replicas".into(), r),
            None => spec.remove("replicas"),
        };
        Ok(desired)
    }
}

/// Carry over the values the API server allocates for a Service.
pub fn reconcile_service_node_ports() -> ServiceNodePorts { ServiceNodePorts }

#[derive(Debug, Clone, Copy)]
pub struct ServiceNodePorts;

const ALLOCATED_SERVICE_FIELDS: [&str; 4] = ["clusterIP", "clusterIPs", "ipFamilies", "ipFamilyPolicy"];

// Ports are unique by (port, protocol); protocol defaults to TCP.
fn port_id(p: &Value) -> (Option<i64>, &str) {
    (p.get("port").and_then(Value::as_i64), p.get("protocol").and_then(Value::as_str).unwrap_or("TCP"))
}

#[async_trait]
impl Mutation for ServiceNodePorts {
    async fn mutate(&self, store: &dyn Store, mut desired: Document) -> anyhow::Result<Document> {
        let Some(live) = live_of(store, &desired).await? else { return Ok(desired) };
        let empty = Map::new();
        let live_spec = live.data.get("spec").and_then(Value::as_object).unwrap_or(&empty);
        let spec = spec_mut(&mut desired)?;
        for field in ALLOCATED_SERVICE_FIELDS {
            match live_spec.get(field) {
                Some(v) => spec.insert(field.to_string(), v.clone()),
                None => spec.remove(field),
            };
        }
        let svc_type = spec.get("type").and_then(Value::as_str).unwrap_or("ClusterIP");
        if svc_type == "ClusterIP" {
            return Ok(desired);
        }
        let live_ports = live_spec.get("ports").and_then(Value::as_array).map(Vec::as_slice).unwrap_or(&[]);
        if let Some(ports) = spec.get_mut("ports").and_then(Value::as_array_mut) {
            for port in ports.iter_mut() {
                let id = port_id(port);
                let node_port = live_ports.iter().find(|lp| port_id(lp) == id).and_then(|lp| lp.get("nodePort")).cloned();
                if let (Some(np), Some(obj)) = (node_port, port.as_object_mut()) {
                    obj.insert("nodePort".into(), np);
                }
            }
        }
        Ok(desired)
    }
}

/// A config source whose data changes should roll the pods of a workload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RolloutTrigger {
    pub name: String,
    pub config_map: Option<String>,
    pub secret: Option<String>,
}

impl RolloutTrigger {
    pub fn config_map(name: &str, config_map: &str) -> Self {
        Self { name: name.to_string(), config_map: Some(config_map.to_string()), secret: None }
    }

    pub fn secret(name: &str, secret: &str) -> Self {
        Self { name: name.to_string(), config_map: None, secret: Some(secret.to_string()) }
    }

    pub fn annotation_key(&self, domain: &str) -> String {
        let suffix = if self.secret.is_some() { "secret-hash" } else { "configmap-hash" };
        format!("{}/{}.{}", domain, self.name, suffix)
    }

    /// Hash of the source's `data`; empty when the source does not exist yet.
    pub async fn hash(&self, store: &dyn Store, namespace: Option<&str>) -> anyhow::Result<String> {
        let (kind, name) = match (&self.secret, &self.config_map) {
            (Some(s), _) => (KindId::new("", "v1", "Secret"), s),
            (None, Some(c)) => (KindId::new("", "v1", "ConfigMap"), c),
            (None, None) => bail!("empty rollout trigger {}", self.name),
        };
        let key = ObjectKey::new(namespace, name);
        let Some(src) = store.get(&kind, &key).await.with_context(|| format!("unable to get {} {}", kind.kind, key))? else {
            return Ok(String::new());
        };
        Ok(hash_data(src.data.get("data")))
    }

    /// Mutation stamping the hash into the pod template annotations.
    pub fn add(&self, domain: &str) -> RolloutTriggerMutation {
        RolloutTriggerMutation { trigger: self.clone(), domain: domain.to_string() }
    }
}

pub struct RolloutTriggerMutation {
    trigger: RolloutTrigger,
    domain: String,
}

#[async_trait]
impl Mutation for RolloutTriggerMutation {
    async fn mutate(&self, store: &dyn Store, mut desired: Document) -> anyhow::Result<Document> {
        let hash = self.trigger.hash(store, desired.metadata.namespace.as_deref()).await?;
        let kind = desired.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
        if kind != "Deployment" && kind != "StatefulSet" {
            return Ok(desired);
        }
        let spec = spec_mut(&mut desired)?;
        let annotations = spec
            .entry("template")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .context("spec.template is not a map")?
            .entry("metadata")
            .or_insert_with(|| Value::Object(Map::new()))
            .as_object_mut()
            .context("spec.template.metadata is not a map")?
            .entry("annotations")
            .or_insert_with(|| Value::Object(Map::new()));
        if annotations.is_null() {
            *annotations = Value::Object(Map::new());
        }
        let annotations = annotations.as_object_mut().context("pod template annotations are not a map")?;
        annotations.insert(self.trigger.annotation_key(&self.domain), Value::String(hash));
        Ok(desired)
    }
}

/// 64-bit FNV-1a over the sorted key/value pairs, hex encoded.
fn hash_data(data: Option<&Value>) -> String {
    let mut h: u64 = 0xcbf29ce484222325;
    let mut feed = |bytes: &[u8]| {
        for b in bytes {
            h ^= *b as u64;
            h = h.wrapping_mul(0x100000001b3);
        }
    };
    if let Some(Value::Object(map)) = data {
        let mut entries: Vec<_> = map.iter().collect();
        entries.sort_by(|a, b| a.0.cmp(b.0));
        for (k, v) in entries {
            feed(k.as_bytes());
            feed(&[0]);
            match v {
                Value::String(s) => feed(s.as_bytes()),
                other => feed(other.to_string().as_bytes()),
            }
            feed(&[0]);
        }
    }
    format!("{:016x}", h)
}
