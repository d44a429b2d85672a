//! In-RAM `Store` with resourceVersion conflicts and finalizer-aware deletion.

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::RwLock;

use anyhow::anyhow;
use async_trait::async_trait;
use k8s_openapi::apimachinery::pkg::apis::meta::v1::Time;
use rustc_hash::FxHashMap;
use tether_core::{Document, DocumentExt, KindId, ObjectKey};
use tracing::debug;
use uuid::Uuid;

use crate::{kind_of, Store, StoreError};

/// Write calls observed by a `MemStore`, seeding via `insert` excluded.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct WriteStats {
    pub creates: usize,
    pub updates: usize,
    pub deletes: usize,
}

#[derive(Default)]
pub struct MemStore {
    objects: RwLock<FxHashMap<(KindId, ObjectKey), Document>>,
    rv: AtomicU64,
    creates: AtomicUsize,
    updates: AtomicUsize,
    deletes: AtomicUsize,
    status_updates: AtomicUsize,
}

impl MemStore {
    pub fn new() -> Self { Self::default() }

    fn next_rv(&self) -> String { (self.rv.fetch_add(1, Ordering::SeqCst) + 1).to_string() }

    fn stamp(&self, obj: &mut Document) {
        if obj.metadata.uid.is_none() {
            obj.metadata.uid = Some(Uuid::new_v4().to_string());
        }
        obj.metadata.resource_version = Some(self.next_rv());
    }

    fn poisoned<T>(e: std::sync::PoisonError<T>) -> StoreError { StoreError::Backend(anyhow!("store lock poisoned: {}", e)) }

    /// Seed a document without counting it as a write.
    pub fn insert(&self, mut obj: Document) -> Result<Document, StoreError> {
        let kind = kind_of(&obj)?;
        self.stamp(&mut obj);
        let mut map = self.objects.write().map_err(Self::poisoned)?;
        map.insert((kind, obj.key()), obj.clone());
        Ok(obj)
    }

    pub fn writes(&self) -> WriteStats {
        WriteStats {
            creates: self.creates.load(Ordering::SeqCst),
            updates: self.updates.load(Ordering::SeqCst),
            deletes: self.deletes.load(Ordering::SeqCst),
        }
    }

    /// Status subresource writes, kept apart from `writes()`.
    pub fn status_updates(&self) -> usize { self.status_updates.load(Ordering::SeqCst) }

    pub fn len(&self) -> usize { self.objects.read().map(|m| m.len()).unwrap_or(0) }

    pub fn is_empty(&self) -> bool { self.len() == 0 }
}

#[async_trait]
impl Store for MemStore {
    async fn get(&self, kind: &KindId, key: &ObjectKey) -> Result<Option<Document>, StoreError> {
        let map = self.objects.read().map_err(Self::poisoned)?;
        Ok(map.get(&(kind.clone(), key.clone())).cloned())
    }

    async fn create(&self, mut obj: Document) -> Result<Document, StoreError> {
        self.creates.fetch_add(1, Ordering::SeqCst);
        let kind = kind_of(&obj)?;
        let key = obj.key();
        if key.name.is_empty() {
            return Err(StoreError::Invalid(format!("{} has no name", kind)));
        }
        let mut map = self.objects.write().map_err(Self::poisoned)?;
        if map.contains_key(&(kind.clone(), key.clone())) {
            return Err(StoreError::AlreadyExists { kind: kind.kind, key });
        }
        obj.metadata.uid = None;
        obj.metadata.deletion_timestamp = None;
        self.stamp(&mut obj);
        debug!(kind = %kind, key = %key, "mem store: create");
        map.insert((kind, key), obj.clone());
        Ok(obj)
    }

    async fn update(&self, mut obj: Document) -> Result<Document, StoreError> {
        self.updates.fetch_add(1, Ordering::SeqCst);
        let kind = kind_of(&obj)?;
        let key = obj.key();
        let mut map = self.objects.write().map_err(Self::poisoned)?;
        let slot = (kind.clone(), key.clone());
        let stored = map.get(&slot).ok_or_else(|| StoreError::NotFound { kind: kind.kind.clone(), key: key.clone() })?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            let current = stored.metadata.resource_version.as_deref().unwrap_or("");
            if rv != current {
                return Err(StoreError::Conflict {
                    kind: kind.kind.clone(),
                    key,
                    reason: format!("resourceVersion {} is stale (current {})", rv, current),
                });
            }
        }
        // server-owned fields
        obj.metadata.uid = stored.metadata.uid.clone();
        obj.metadata.deletion_timestamp = stored.metadata.deletion_timestamp.clone();
        obj.metadata.resource_version = None;
        self.stamp(&mut obj);
        let finalizers_empty = obj.metadata.finalizers.as_ref().map_or(true, |f| f.is_empty());
        if obj.is_being_deleted() && finalizers_empty {
            debug!(kind = %kind, key = %key, "mem store: last finalizer removed, object gone");
            map.remove(&slot);
        } else {
            map.insert(slot, obj.clone());
        }
        Ok(obj)
    }

    async fn update_status(&self, obj: Document) -> Result<Document, StoreError> {
        self.status_updates.fetch_add(1, Ordering::SeqCst);
        let kind = kind_of(&obj)?;
        let key = obj.key();
        let mut map = self.objects.write().map_err(Self::poisoned)?;
        let slot = (kind.clone(), key.clone());
        let stored = map.get_mut(&slot).ok_or_else(|| StoreError::NotFound { kind: kind.kind.clone(), key: key.clone() })?;
        if let Some(rv) = obj.metadata.resource_version.as_deref() {
            let current = stored.metadata.resource_version.as_deref().unwrap_or("");
            if rv != current {
                return Err(StoreError::Conflict {
                    kind: kind.kind.clone(),
                    key,
                    reason: format!("resourceVersion {} is stale (current {})", rv, current),
                });
            }
        }
        let status = obj.data.get("status").cloned().unwrap_or(serde_json::Value::Null);
        if !stored.data.is_object() {
            stored.data = serde_json::Value::Object(Default::default());
        }
        if let Some(body) = stored.data.as_object_mut() {
            if status.is_null() {
                body.remove("status");
            } else {
                body.insert("status".into(), status);
            }
        }
        stored.metadata.resource_version = Some(self.next_rv());
        debug!(kind = %kind, key = %key, "mem store: status update");
        Ok(stored.clone())
    }

    async fn delete(&self, obj: &Document) -> Result<(), StoreError> {
        self.deletes.fetch_add(1, Ordering::SeqCst);
        let kind = kind_of(obj)?;
        let key = obj.key();
        let mut map = self.objects.write().map_err(Self::poisoned)?;
        let slot = (kind.clone(), key.clone());
        let Some(stored) = map.get_mut(&slot) else {
            return Err(StoreError::NotFound { kind: kind.kind, key });
        };
        let has_finalizers = stored.metadata.finalizers.as_ref().map_or(false, |f| !f.is_empty());
        if has_finalizers {
            if stored.metadata.deletion_timestamp.is_none() {
                stored.metadata.deletion_timestamp = Some(Time(chrono::Utc::now()));
                stored.metadata.resource_version = Some(self.next_rv());
            }
        } else {
            map.remove(&slot);
        }
        Ok(())
    }

    async fn list(&self, kind: &KindId, namespace: Option<&str>) -> Result<Vec<Document>, StoreError> {
        let map = self.objects.read().map_err(Self::poisoned)?;
        let mut out: Vec<Document> = map
            .iter()
            .filter(|((k, key), _)| k == kind && namespace.map_or(true, |ns| key.namespace.as_deref() == Some(ns)))
            .map(|(_, o)| o.clone())
            .collect();
        out.sort_by(|a, b| a.key().cmp(&b.key()));
        Ok(out)
    }
}
