//! Tether kubehub: discovery, a kube-backed `Store`, and owned-kind watches.

#![forbid(unsafe_code)]

use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use async_trait::async_trait;
use futures::TryStreamExt;
use kube::{
    api::{Api, DeleteParams, ListParams, PostParams},
    core::{ApiResource, DynamicObject},
    discovery::{Discovery, Scope},
    runtime::watcher::{self, Event},
    Client,
};
use rustc_hash::FxHashMap;
use tether_core::{Document, DocumentExt, KindId, ObjectKey};
use tether_store::{kind_of, Scheme, Store, StoreError, WatchRegistrar};
use tokio::sync::{mpsc, OnceCell};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

static CLIENT: OnceCell<Client> = OnceCell::const_new();

/// Shared kube client built from the default kubeconfig / in-cluster env.
pub async fn get_kube_client() -> Result<Client> {
    let client = CLIENT
        .get_or_try_init(|| async { Client::try_default().await })
        .await
        .context("building kube client")?;
    Ok(client.clone())
}

#[derive(Debug, Clone)]
pub struct ServedKind {
    pub resource: ApiResource,
    pub namespaced: bool,
}

/// Discover served resources (incl. CRDs) keyed by kind.
pub async fn discover(client: Client) -> Result<FxHashMap<KindId, ServedKind>> {
    let discovery = Discovery::new(client).run().await.context("running API discovery")?;
    let mut out = FxHashMap::default();
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            let namespaced = matches!(caps.scope, Scope::Namespaced);
            let kind = KindId::new(&ar.group, &ar.version, &ar.kind);
            out.insert(kind, ServedKind { resource: ar, namespaced });
        }
    }
    debug!(count = out.len(), "discovery done");
    Ok(out)
}

fn dynamic_api(client: Client, served: &ServedKind, namespace: Option<&str>) -> Api<DynamicObject> {
    match (served.namespaced, namespace) {
        (true, Some(ns)) => Api::namespaced_with(client, ns, &served.resource),
        _ => Api::all_with(client, &served.resource),
    }
}

fn map_kube_err(kind: &KindId, key: &ObjectKey, err: kube::Error) -> StoreError {
    match err {
        kube::Error::Api(resp) => match resp.code {
            404 => StoreError::NotFound { kind: kind.kind.clone(), key: key.clone() },
            409 if resp.reason == "AlreadyExists" => StoreError::AlreadyExists { kind: kind.kind.clone(), key: key.clone() },
            409 => StoreError::Conflict { kind: kind.kind.clone(), key: key.clone(), reason: resp.message },
            400 | 422 => StoreError::Invalid(resp.message),
            _ => StoreError::Backend(anyhow!("{} ({})", resp.message, resp.code)),
        },
        other => StoreError::Backend(anyhow::Error::new(other)),
    }
}

/// `Store` over the Kubernetes API using dynamic objects.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
    served: Arc<FxHashMap<KindId, ServedKind>>,
}

impl KubeStore {
    pub async fn connect() -> Result<Self> {
        let client = get_kube_client().await?;
        let served = discover(client.clone()).await?;
        Ok(Self { client, served: Arc::new(served) })
    }

    pub fn client(&self) -> Client { self.client.clone() }

    /// Registry of every served kind.
    pub fn scheme(&self) -> Scheme {
        let mut scheme = Scheme::new();
        for (kind, served) in self.served.iter() {
            scheme.register(kind.clone(), served.namespaced);
        }
        scheme
    }

    /// Watch registrar sharing this store's client and discovery; owner keys are sent on `tx`.
    pub fn registrar(&self, namespace: Option<&str>, tx: mpsc::Sender<ObjectKey>) -> KubeWatchRegistrar {
        KubeWatchRegistrar {
            client: self.client.clone(),
            served: Arc::clone(&self.served),
            namespace: namespace.map(|s| s.to_string()),
            tx,
            tasks: Mutex::new(Vec::new()),
        }
    }

    fn served(&self, kind: &KindId) -> Result<&ServedKind, StoreError> {
        self.served.get(kind).ok_or_else(|| StoreError::Backend(anyhow!("kind not served: {}", kind)))
    }

    fn api_for(&self, kind: &KindId, namespace: Option<&str>) -> Result<Api<DynamicObject>, StoreError> {
        Ok(dynamic_api(self.client.clone(), self.served(kind)?, namespace))
    }
}

#[async_trait]
impl Store for KubeStore {
    async fn get(&self, kind: &KindId, key: &ObjectKey) -> Result<Option<Document>, StoreError> {
        let api = self.api_for(kind, key.namespace.as_deref())?;
        let obj = api.get_opt(&key.name).await.map_err(|e| map_kube_err(kind, key, e))?;
        Ok(obj.map(|mut o| {
            o.types.get_or_insert_with(|| kind.type_meta());
            o
        }))
    }

    async fn create(&self, obj: Document) -> Result<Document, StoreError> {
        let kind = kind_of(&obj)?;
        let key = obj.key();
        let api = self.api_for(&kind, key.namespace.as_deref())?;
        api.create(&PostParams::default(), &obj).await.map_err(|e| map_kube_err(&kind, &key, e))
    }

    async fn update(&self, obj: Document) -> Result<Document, StoreError> {
        let kind = kind_of(&obj)?;
        let key = obj.key();
        let api = self.api_for(&kind, key.namespace.as_deref())?;
        api.replace(&key.name, &PostParams::default(), &obj).await.map_err(|e| map_kube_err(&kind, &key, e))
    }

    async fn update_status(&self, obj: Document) -> Result<Document, StoreError> {
        let kind = kind_of(&obj)?;
        let key = obj.key();
        let api = self.api_for(&kind, key.namespace.as_deref())?;
        let body = serde_json::to_vec(&obj).map_err(|e| StoreError::Invalid(format!("encoding {} {}: {}", kind, key, e)))?;
        let mut out = api
            .replace_status(&key.name, &PostParams::default(), body)
            .await
            .map_err(|e| map_kube_err(&kind, &key, e))?;
        out.types.get_or_insert_with(|| kind.type_meta());
        Ok(out)
    }

    async fn delete(&self, obj: &Document) -> Result<(), StoreError> {
        let kind = kind_of(obj)?;
        let key = obj.key();
        let api = self.api_for(&kind, key.namespace.as_deref())?;
        api.delete(&key.name, &DeleteParams::background()).await.map_err(|e| map_kube_err(&kind, &key, e))?;
        Ok(())
    }

    async fn list(&self, kind: &KindId, namespace: Option<&str>) -> Result<Vec<Document>, StoreError> {
        let api = self.api_for(kind, namespace)?;
        let list = api
            .list(&ListParams::default())
            .await
            .map_err(|e| map_kube_err(kind, &ObjectKey::new(namespace, "*"), e))?;
        // list items come back without apiVersion/kind
        Ok(list
            .items
            .into_iter()
            .map(|mut o| {
                o.types = Some(kind.type_meta());
                o
            })
            .collect())
    }
}

/// Key of `obj`'s controlling owner when that owner is of kind `owner`.
pub fn controller_owner_key(obj: &Document, owner: &KindId) -> Option<ObjectKey> {
    let refs = obj.metadata.owner_references.as_ref()?;
    refs.iter()
        .find(|r| {
            r.controller == Some(true)
                && r.kind == owner.kind
                && KindId::from_api_version(&r.api_version, &r.kind).group == owner.group
        })
        .map(|r| ObjectKey { namespace: obj.metadata.namespace.clone(), name: r.name.clone() })
}

/// Spawns one `kube::runtime::watcher` per registered child kind and forwards the
/// controlling owner's key of every event into the work channel.
pub struct KubeWatchRegistrar {
    client: Client,
    served: Arc<FxHashMap<KindId, ServedKind>>,
    namespace: Option<String>,
    tx: mpsc::Sender<ObjectKey>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl KubeWatchRegistrar {
    pub fn active(&self) -> usize { self.tasks.lock().map(|t| t.len()).unwrap_or(0) }

    pub fn shutdown(&self) {
        if let Ok(mut tasks) = self.tasks.lock() {
            for t in tasks.drain(..) { t.abort(); }
        }
    }
}

impl WatchRegistrar for KubeWatchRegistrar {
    fn watch_owned(&self, child: &KindId, owner: &KindId) -> Result<()> {
        let served = self.served.get(child).ok_or_else(|| anyhow!("kind not served: {}", child))?;
        let api = dynamic_api(self.client.clone(), served, self.namespace.as_deref());
        let task = tokio::spawn(run_owned_watch(api, child.clone(), owner.clone(), self.tx.clone()));
        self.tasks.lock().map_err(|e| anyhow!("watch registry lock poisoned: {}", e))?.push(task);
        Ok(())
    }
}

async fn run_owned_watch(api: Api<DynamicObject>, child: KindId, owner: KindId, tx: mpsc::Sender<ObjectKey>) {
    let stream = watcher::watcher(api, watcher::Config::default());
    futures::pin_mut!(stream);
    info!(kind = %child, owner = %owner, "owned watch started");
    loop {
        match stream.try_next().await {
            Ok(Some(ev)) => {
                let objs = match ev {
                    Event::Applied(o) | Event::Deleted(o) => vec![o],
                    Event::Restarted(list) => list,
                };
                for o in objs.iter() {
                    if let Some(key) = controller_owner_key(o, &owner) {
                        metrics::counter!("tether_owned_events_total", 1u64);
                        if tx.send(key).await.is_err() {
                            debug!(kind = %child, "work channel closed; stopping watch");
                            return;
                        }
                    }
                }
            }
            Ok(None) => break,
            Err(e) => {
                warn!(kind = %child, error = %e, "owned watch error; retrying");
                tokio::time::sleep(Duration::from_secs(1)).await;
            }
        }
    }
    warn!(kind = %child, "owned watch stream ended");
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use tether_core::new_document;

    fn owned(controller: Option<bool>, api_version: &str) -> Document {
        let mut d = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some("ns"), "svc"));
        d.metadata.owner_references = Some(vec![OwnerReference {
            api_version: api_version.to_string(),
            kind: "App".into(),
            name: "app".into(),
            uid: "1".into(),
            controller,
            block_owner_deletion: None,
        }]);
        d
    }

    #[test]
    fn controller_owner_key_requires_controller_flag_and_group() {
        let owner = KindId::new("example.com", "v1", "App");
        assert_eq!(controller_owner_key(&owned(Some(true), "example.com/v1"), &owner), Some(ObjectKey::new(Some("ns"), "app")));
        assert_eq!(controller_owner_key(&owned(None, "example.com/v1"), &owner), None);
        assert_eq!(controller_owner_key(&owned(Some(true), "other.io/v1"), &owner), None);
    }
}
