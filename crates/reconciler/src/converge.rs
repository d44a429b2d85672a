//! Create-or-update of one child document against the store.

use std::fmt;
use std::time::Instant;

use serde_json::{json, Value};
use tether_core::{
    diff_summary, from_projection, semantic_eq, to_projection, Document, DocumentExt, KindId, ManagedRef, ObjectKey,
    OwnerRefError, PathError, PathExpr, ReconcilerConfig,
};
use tether_core::path::Segment;
use tether_store::{RegistryError, Store, StoreError, TypeRegistry};
use tracing::{debug, error, info};

use crate::property::Property;
use crate::template::Resource;

/// Kind and identity an error refers to; renders as `Kind/name/namespace`.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Target {
    pub kind: String,
    pub name: String,
    pub namespace: String,
}

impl Target {
    pub fn new(kind: &str, key: &ObjectKey) -> Self {
        Self { kind: kind.to_string(), name: key.name.clone(), namespace: key.namespace_str().to_string() }
    }
}

impl fmt::Display for Target {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{}/{}/{}", self.kind, self.name, self.namespace) }
}

#[derive(Debug, thiserror::Error)]
pub enum ConvergeError {
    #[error("unable to build template: {0:#}")]
    Build(#[source] anyhow::Error),
    #[error("unable to resolve kind {target}: {source}")]
    Resolve { target: Target, source: RegistryError },
    #[error("unable to set controller reference {target}: {source}")]
    OwnerRef { target: Target, source: OwnerRefError },
    #[error("{msg} {target}: {source}")]
    Store { msg: &'static str, target: Target, source: StoreError },
    #[error("{msg} {target}: {source}")]
    Conversion { msg: &'static str, target: Target, source: serde_json::Error },
    #[error("unable to watch owned kind {kind}: {source:#}")]
    Watch { kind: KindId, source: anyhow::Error },
    #[error("unable to read tracked kinds: {0:#}")]
    Tracker(#[source] anyhow::Error),
}

impl ConvergeError {
    pub fn store(msg: &'static str, target: &Target, source: StoreError) -> Self {
        ConvergeError::Store { msg, target: target.clone(), source }
    }

    fn conversion(msg: &'static str, target: &Target, source: serde_json::Error) -> Self {
        ConvergeError::Conversion { msg, target: target.clone(), source }
    }
}

/// Collaborators one converge call needs.
#[derive(Clone, Copy)]
pub struct Converger<'a> {
    pub store: &'a dyn Store,
    pub registry: &'a dyn TypeRegistry,
    pub config: &'a ReconcilerConfig,
    pub owner_kind: &'a KindId,
}

impl<'a> Converger<'a> {
    pub async fn converge<R: Resource + ?Sized>(&self, owner: &Document, res: &R) -> Result<Option<ManagedRef>, ConvergeError> {
        res.reconcile(self, owner).await
    }
}

// Template paths win; an empty ensure list falls back to the configured defaults.
fn resolve_paths<R: Resource + ?Sized>(cfg: &ReconcilerConfig, kind: &KindId, res: &R) -> (Vec<Property>, Vec<Property>) {
    if !res.ensure().is_empty() {
        return (res.ensure().to_vec(), res.ignore().to_vec());
    }
    let d = cfg.defaults_for(kind);
    (
        d.ensure.iter().cloned().map(Property::from).collect(),
        d.ignore.iter().cloned().map(Property::from).collect(),
    )
}

fn path_error(target: &Target, path: &Property, err: &PathError) {
    metrics::counter!("tether_path_errors_total", 1u64, "kind" => target.kind.clone());
    error!(kind = %target.kind, name = %target.name, namespace = %target.namespace, path = %path, error = %err, "skipping path");
}

/// Make the live child match `res` on its ensured paths. Returns the managed reference,
/// or `None` when the template is disabled.
pub async fn converge<R: Resource + ?Sized>(cx: &Converger<'_>, owner: &Document, res: &R) -> Result<Option<ManagedRef>, ConvergeError> {
    let started = Instant::now();
    let mut desired = res.build(cx.store).await.map_err(ConvergeError::Build)?;
    let key = desired.key();
    let kind = cx.registry.resolve_kind(&desired).map_err(|source| {
        let tag = desired.types.as_ref().map(|t| t.kind.as_str()).unwrap_or("");
        ConvergeError::Resolve { target: Target::new(tag, &key), source }
    })?;
    let target = Target::new(&kind.kind, &key);

    let live = cx.store.get(&kind, &key).await.map_err(|e| ConvergeError::store("unable to get resource", &target, e))?;
    let live = match (live, res.enabled()) {
        (None, true) => {
            desired
                .set_controller_reference(owner, cx.owner_kind)
                .map_err(|source| ConvergeError::OwnerRef { target: target.clone(), source })?;
            cx.store.create(desired).await.map_err(|e| ConvergeError::store("unable to create resource", &target, e))?;
            metrics::counter!("tether_resources_created_total", 1u64, "kind" => kind.kind.clone());
            info!(kind = %kind, name = %key.name, namespace = %key.namespace_str(), "resource created");
            return Ok(Some(ManagedRef::new(&key, &kind)));
        }
        (None, false) => return Ok(None),
        (Some(live), false) => {
            cx.store.delete(&live).await.map_err(|e| ConvergeError::store("unable to delete resource", &target, e))?;
            metrics::counter!("tether_resources_deleted_total", 1u64, "kind" => kind.kind.clone());
            info!(kind = %kind, name = %key.name, namespace = %key.namespace_str(), "resource deleted");
            return Ok(None);
        }
        (Some(live), true) => live,
    };

    let (ensure, ignore) = resolve_paths(cx.config, &kind, res);

    let mut normalized = cx
        .registry
        .new_object(&kind)
        .map_err(|source| ConvergeError::Resolve { target: target.clone(), source })?;
    normalized.metadata.name = Some(key.name.clone());
    normalized.metadata.namespace = key.namespace.clone();

    let mut u_desired = to_projection(&desired).map_err(|e| ConvergeError::conversion("unable to convert to unstructured", &target, e))?;
    let mut u_live = to_projection(&live).map_err(|e| ConvergeError::conversion("unable to convert to unstructured", &target, e))?;
    let mut u_normalized =
        to_projection(&normalized).map_err(|e| ConvergeError::conversion("unable to convert to unstructured", &target, e))?;
    // desired values at the ensured paths, on the same identity stub
    let mut u_wanted = u_normalized.clone();

    let preserved = ignored_live_values(&ignore, &u_live);

    for p in ensure.iter() {
        let res = p.reconcile(&mut u_live, &u_desired, &mut u_normalized).and_then(|_| p.capture(&u_desired, &mut u_wanted));
        if let Err(e) = res {
            path_error(&target, p, &e);
        }
    }

    for p in ignore.iter() {
        for tree in [&mut u_live, &mut u_desired, &mut u_normalized, &mut u_wanted] {
            if let Err(e) = p.ignore(tree) {
                path_error(&target, p, &e);
                break;
            }
        }
    }

    // the update replaces the whole document, so ignored live values go back in
    restore(&mut u_live, preserved);

    if !semantic_eq(&u_normalized, &u_wanted) {
        log_update_diff(&target, &u_normalized, &u_wanted);
        let patched =
            from_projection(u_live).map_err(|e| ConvergeError::conversion("unable to convert from unstructured", &target, e))?;
        cx.store.update(patched).await.map_err(|e| ConvergeError::store("unable to update resource", &target, e))?;
        metrics::counter!("tether_resources_updated_total", 1u64, "kind" => kind.kind.clone());
        info!(kind = %kind, name = %key.name, namespace = %key.namespace_str(), "resource updated");
    }
    metrics::histogram!("tether_converge_latency_ms", started.elapsed().as_secs_f64() * 1000.0);

    Ok(Some(ManagedRef::new(&live.key(), &kind)))
}

/// One step from a container to a child. List items remember the key of the element
/// they were read from so they can be found again after the list is rewritten.
#[derive(Debug, Clone, PartialEq)]
enum Hop {
    Field(String),
    Item { index: usize, key: Option<Value> },
}

#[derive(Debug)]
struct Preserved {
    hops: Vec<Hop>,
    value: Value,
}

// List elements are keyed by `name`, else (`port`, `protocol`), else `key`.
fn element_key(v: &Value) -> Option<Value> {
    let obj = v.as_object()?;
    if let Some(name) = obj.get("name") {
        return Some(json!({ "name": name }));
    }
    if let Some(port) = obj.get("port") {
        let protocol = obj.get("protocol").and_then(Value::as_str).unwrap_or("TCP");
        return Some(json!({ "port": port, "protocol": protocol }));
    }
    obj.get("key").map(|k| json!({ "key": k }))
}

fn ignored_live_values(ignore: &[Property], live: &Value) -> Vec<Preserved> {
    let mut out = Vec::new();
    for p in ignore {
        let Ok(expr) = p.expr() else { continue };
        out.extend(expr.resolve(live).iter().filter_map(|at| anchor(at, live)));
    }
    out
}

fn anchor(at: &PathExpr, live: &Value) -> Option<Preserved> {
    let mut cur = live;
    let mut hops = Vec::with_capacity(at.segments().len());
    for seg in at.segments() {
        match seg {
            Segment::Field(k) => {
                cur = cur.get(k.as_str())?;
                hops.push(Hop::Field(k.clone()));
            }
            Segment::Index(i) => {
                let index = usize::try_from(*i).ok()?;
                cur = cur.get(index)?;
                hops.push(Hop::Item { index, key: element_key(cur) });
            }
            Segment::Wildcard | Segment::Filter(_) => return None,
        }
    }
    Some(Preserved { hops, value: cur.clone() })
}

// Keyed items are matched by key; unkeyed ones fall back to their old index.
fn position(arr: &[Value], hop: &Hop) -> Option<usize> {
    match hop {
        Hop::Item { key: Some(k), .. } => arr.iter().position(|e| element_key(e).as_ref() == Some(k)),
        Hop::Item { index, key: None } => (*index < arr.len()).then_some(*index),
        Hop::Field(_) => None,
    }
}

fn locate<'v>(mut cur: &'v mut Value, hops: &[Hop]) -> Option<&'v mut Value> {
    for hop in hops {
        cur = match hop {
            Hop::Field(k) => cur.as_object_mut()?.get_mut(k)?,
            Hop::Item { .. } => {
                let arr = cur.as_array_mut()?;
                let i = position(arr, hop)?;
                &mut arr[i]
            }
        };
    }
    Some(cur)
}

fn restore(live: &mut Value, preserved: Vec<Preserved>) {
    for p in preserved {
        let Some((last, path)) = p.hops.split_last() else { continue };
        let Some(parent) = locate(live, path) else {
            debug!(hops = ?p.hops, "ignored value has no home after patching");
            continue;
        };
        match (last, parent) {
            (Hop::Field(k), Value::Object(map)) => {
                map.insert(k.clone(), p.value);
            }
            (Hop::Item { .. }, Value::Array(arr)) => {
                if let Some(i) = position(arr, last) {
                    arr[i] = p.value;
                }
            }
            _ => {}
        }
    }
}

fn log_update_diff(target: &Target, normalized: &Value, desired: &Value) {
    if !tracing::enabled!(tracing::Level::DEBUG) {
        return;
    }
    let s = diff_summary(desired, normalized);
    debug!(
        kind = %target.kind,
        name = %target.name,
        namespace = %target.namespace,
        adds = s.adds,
        updates = s.updates,
        removes = s.removes,
        "resource update required"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::template::Template;
    use serde_json::json;
    use tether_core::new_document;
    use tether_store::{MemStore, Scheme, WriteStats};

    fn owner() -> Document {
        let mut o = new_document(&KindId::new("example.com", "v1", "App"), &ObjectKey::new(Some("ns"), "app"));
        o.metadata.uid = Some("owner-uid".into());
        o
    }

    fn cm(data: Value) -> Document {
        let mut d = new_document(&KindId::new("", "v1", "ConfigMap"), &ObjectKey::new(Some("ns"), "cm"));
        d.data = json!({ "data": data });
        d
    }

    #[test]
    fn errors_name_kind_name_and_namespace() {
        let target = Target::new("Service", &ObjectKey::new(Some("ns"), "svc"));
        let err = ConvergeError::store("unable to update resource", &target, StoreError::Invalid("bad".into()));
        assert_eq!(err.to_string(), "unable to update resource Service/svc/ns: invalid object: bad");
    }

    #[tokio::test]
    async fn template_paths_override_defaults() {
        let store = MemStore::new();
        let scheme = Scheme::with_builtins();
        let cfg = ReconcilerConfig::default();
        let owner_kind = KindId::new("example.com", "v1", "App");
        let cx = Converger { store: &store, registry: &scheme, config: &cfg, owner_kind: &owner_kind };

        let mut live = cm(json!({"a": "1"}));
        live.metadata.labels = Some([("team".to_string(), "x".to_string())].into_iter().collect());
        store.insert(live).unwrap();

        // only `data` is ensured, so the unmanaged label survives and data is patched
        let t = Template::from_object(cm(json!({"a": "2"}))).with_ensure(["data"]);
        let r = cx.converge(&owner(), &t).await.unwrap().unwrap();
        assert_eq!(r.kind, "ConfigMap");
        assert_eq!(store.writes(), WriteStats { creates: 0, updates: 1, deletes: 0 });

        let got = store.get(&KindId::new("", "v1", "ConfigMap"), &ObjectKey::new(Some("ns"), "cm")).await.unwrap().unwrap();
        assert_eq!(got.data["data"], json!({"a": "2"}));
        assert_eq!(got.metadata.labels.unwrap()["team"], "x");

        // default config for ConfigMap ensures labels too, which now strips the label
        let t = Template::from_object(cm(json!({"a": "2"})));
        cx.converge(&owner(), &t).await.unwrap();
        let got = store.get(&KindId::new("", "v1", "ConfigMap"), &ObjectKey::new(Some("ns"), "cm")).await.unwrap().unwrap();
        assert!(got.metadata.labels.map_or(true, |l| l.is_empty()));
        assert_eq!(store.writes().updates, 2);
    }

    #[tokio::test]
    async fn malformed_paths_are_skipped() {
        let store = MemStore::new();
        let scheme = Scheme::with_builtins();
        let cfg = ReconcilerConfig::default();
        let owner_kind = KindId::new("example.com", "v1", "App");
        let cx = Converger { store: &store, registry: &scheme, config: &cfg, owner_kind: &owner_kind };
        store.insert(cm(json!({"a": "1"}))).unwrap();

        let t = Template::from_object(cm(json!({"a": "2"}))).with_ensure(["data[", "data"]).with_ignore(["]"]);
        assert!(cx.converge(&owner(), &t).await.unwrap().is_some());
        assert_eq!(store.writes().updates, 1);
    }

    #[tokio::test]
    async fn unregistered_kind_is_a_resolve_error() {
        let store = MemStore::new();
        let scheme = Scheme::new();
        let cfg = ReconcilerConfig::default();
        let owner_kind = KindId::new("example.com", "v1", "App");
        let cx = Converger { store: &store, registry: &scheme, config: &cfg, owner_kind: &owner_kind };
        let err = cx.converge(&owner(), &Template::from_object(cm(json!({})))).await.unwrap_err();
        assert!(matches!(err, ConvergeError::Resolve { .. }));
        assert!(err.to_string().contains("ConfigMap/cm/ns"), "{}", err);
    }
}
