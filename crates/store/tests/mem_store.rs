#![forbid(unsafe_code)]

use std::sync::Arc;

use serde_json::json;
use tether_core::{new_document, Document, DocumentExt, KindId, ObjectKey};
use tether_store::{MemStore, Store, StoreError, WriteStats};

fn svc(ns: &str, name: &str) -> Document {
    let mut d = new_document(&KindId::new("", "v1", "Service"), &ObjectKey::new(Some(ns), name));
    d.data = json!({"spec": {"ports": [{"port": 80}]}});
    d
}

#[tokio::test]
async fn list_is_scoped_by_kind_and_namespace() {
    let store = MemStore::new();
    store.insert(svc("a", "web")).unwrap();
    store.insert(svc("a", "api")).unwrap();
    store.insert(svc("b", "web")).unwrap();
    store
        .insert(new_document(&KindId::new("", "v1", "ConfigMap"), &ObjectKey::new(Some("a"), "cfg")))
        .unwrap();

    let kind = KindId::new("", "v1", "Service");
    let names: Vec<String> = store.list(&kind, Some("a")).await.unwrap().into_iter().map(|d| d.key().name).collect();
    assert_eq!(names, vec!["api", "web"]);
    assert_eq!(store.list(&kind, None).await.unwrap().len(), 3);
    assert_eq!(store.writes(), WriteStats::default());
}

#[tokio::test]
async fn create_reports_duplicates_and_missing_names() {
    let store = MemStore::new();
    store.create(svc("ns", "web")).await.unwrap();
    let err = store.create(svc("ns", "web")).await.unwrap_err();
    assert!(matches!(err, StoreError::AlreadyExists { .. }), "err={}", err);

    let err = store.create(svc("ns", "")).await.unwrap_err();
    assert!(matches!(err, StoreError::Invalid(_)));

    let mut untyped = svc("ns", "x");
    untyped.types = None;
    assert!(matches!(store.create(untyped).await, Err(StoreError::Invalid(_))));
}

#[tokio::test]
async fn update_and_delete_of_absent_documents_are_not_found() {
    let store = MemStore::new();
    assert!(store.update(svc("ns", "ghost")).await.unwrap_err().is_not_found());
    assert!(store.delete(&svc("ns", "ghost")).await.unwrap_err().is_not_found());
    assert_eq!(store.writes(), WriteStats { creates: 0, updates: 1, deletes: 1 });
}

#[tokio::test]
async fn update_keeps_server_owned_fields() {
    let store = MemStore::new();
    let created = store.create(svc("ns", "web")).await.unwrap();
    let uid = created.metadata.uid.clone();

    let mut next = created.clone();
    next.metadata.uid = Some("forged".into());
    next.metadata.resource_version = None;
    let updated = store.update(next).await.unwrap();
    assert_eq!(updated.metadata.uid, uid);
    assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);
}

#[tokio::test]
async fn concurrent_updates_from_the_same_version_conflict() {
    let store = Arc::new(MemStore::new());
    let base = store.create(svc("ns", "web")).await.unwrap();

    let handles: Vec<_> = (0..4)
        .map(|i| {
            let store = Arc::clone(&store);
            let mut obj = base.clone();
            obj.data["spec"]["ports"][0]["port"] = json!(8000 + i);
            tokio::spawn(async move { store.update(obj).await })
        })
        .collect();
    let mut ok = 0;
    for h in handles {
        match h.await.unwrap() {
            Ok(_) => ok += 1,
            Err(e) => assert!(e.is_conflict(), "err={}", e),
        }
    }
    assert_eq!(ok, 1);
}

#[tokio::test]
async fn status_update_touches_only_status() {
    let store = MemStore::new();
    let created = store.create(svc("ns", "web")).await.unwrap();

    let mut next = created.clone();
    next.data["spec"]["ports"][0]["port"] = json!(9090);
    next.data["status"] = json!({"ready": true});
    let updated = store.update_status(next).await.unwrap();
    assert_eq!(updated.data["spec"]["ports"][0]["port"], json!(80));
    assert_eq!(updated.data["status"], json!({"ready": true}));
    assert_ne!(updated.metadata.resource_version, created.metadata.resource_version);

    let err = store.update_status(created).await.unwrap_err();
    assert!(err.is_conflict(), "err={}", err);
    assert_eq!(store.status_updates(), 2);
    assert_eq!(store.writes(), WriteStats { creates: 1, updates: 0, deletes: 0 });
}
