use std::sync::{Arc, Mutex};

use anyhow::anyhow;
use tether_core::KindId;
use tether_store::WatchRegistrar;
use tracing::info;

/// Child kinds this controller has produced. Grows for the controller's lifetime; each
/// new kind gets an owned-object watch registered under the same lock.
pub struct TypeTracker {
    owner: KindId,
    seen: Mutex<Vec<KindId>>,
    registrar: Option<Arc<dyn WatchRegistrar>>,
}

impl TypeTracker {
    pub fn new(owner: KindId, registrar: Option<Arc<dyn WatchRegistrar>>) -> Self {
        Self { owner, seen: Mutex::new(Vec::new()), registrar }
    }

    /// Record `kind`; true when it was not seen before. A failed watch registration
    /// leaves the kind unseen so the next pass retries it.
    pub fn track_kind(&self, kind: &KindId) -> anyhow::Result<bool> {
        let mut seen = self.seen.lock().map_err(|e| anyhow!("type tracker lock poisoned: {}", e))?;
        if seen.contains(kind) {
            return Ok(false);
        }
        if let Some(r) = &self.registrar {
            r.watch_owned(kind, &self.owner)?;
        }
        seen.push(kind.clone());
        info!(kind = %kind, owner = %self.owner, "tracking owned kind");
        Ok(true)
    }

    /// Snapshot of the seen kinds in first-seen order.
    pub fn seen(&self) -> anyhow::Result<Vec<KindId>> {
        let seen = self.seen.lock().map_err(|e| anyhow!("type tracker lock poisoned: {}", e))?;
        Ok(seen.clone())
    }

    pub fn owner(&self) -> &KindId { &self.owner }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

    #[derive(Default)]
    struct Recorder {
        calls: AtomicUsize,
        fail: AtomicBool,
    }

    impl WatchRegistrar for Recorder {
        fn watch_owned(&self, _child: &KindId, _owner: &KindId) -> anyhow::Result<()> {
            if self.fail.load(Ordering::SeqCst) {
                anyhow::bail!("watch refused");
            }
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    #[test]
    fn tracks_each_kind_once() {
        let rec = Arc::new(Recorder::default());
        let t = TypeTracker::new(KindId::new("example.com", "v1", "App"), Some(rec.clone()));
        let sa = KindId::new("", "v1", "ServiceAccount");
        let svc = KindId::new("", "v1", "Service");
        assert!(t.track_kind(&sa).unwrap());
        assert!(t.track_kind(&svc).unwrap());
        assert!(!t.track_kind(&svc).unwrap());
        assert_eq!(t.seen().unwrap(), vec![sa, svc]);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn failed_watch_is_retried() {
        let rec = Arc::new(Recorder::default());
        rec.fail.store(true, Ordering::SeqCst);
        let t = TypeTracker::new(KindId::new("example.com", "v1", "App"), Some(rec.clone()));
        let svc = KindId::new("", "v1", "Service");
        assert!(t.track_kind(&svc).is_err());
        assert!(t.seen().unwrap().is_empty());
        rec.fail.store(false, Ordering::SeqCst);
        assert!(t.track_kind(&svc).unwrap());
    }

    #[test]
    fn concurrent_tracking_registers_once() {
        let rec = Arc::new(Recorder::default());
        let t = Arc::new(TypeTracker::new(KindId::new("example.com", "v1", "App"), Some(rec.clone())));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let t = Arc::clone(&t);
                std::thread::spawn(move || t.track_kind(&KindId::new("apps", "v1", "Deployment")).unwrap())
            })
            .collect();
        let newly: usize = handles.into_iter().map(|h| h.join().unwrap() as usize).sum();
        assert_eq!(newly, 1);
        assert_eq!(rec.calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn poisoned_lock_is_an_error() {
        let t = Arc::new(TypeTracker::new(KindId::new("example.com", "v1", "App"), None));
        let t2 = Arc::clone(&t);
        let _ = std::thread::spawn(move || {
            let _guard = t2.seen.lock().unwrap();
            panic!("poison the tracker lock");
        })
        .join();
        assert!(t.seen().is_err());
        assert!(t.track_kind(&KindId::new("", "v1", "Service")).is_err());
    }
}
