use std::collections::BTreeMap;
use std::sync::{Mutex, MutexGuard, PoisonError};

use multiverse_core::{DeleteOutcome, RemoteError, RemoteObject, RemoteStore, TargetCollection};
use serde_json::Value as Json;
use uuid::Uuid;

type ObjKey = (String, String, String);

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord)]
pub enum StoreOp {
    Get,
    Create,
    Update,
    Delete,
}

#[derive(Default)]
struct Inner {
    objects: BTreeMap<ObjKey, RemoteObject>,
    failures: BTreeMap<StoreOp, RemoteError>,
    calls: Vec<StoreOp>,
    rv: u64,
}

/// In-memory [`RemoteStore`] with server-like behavior: it assigns uids and
/// resourceVersions, rejects duplicate creates, and replaces objects whole on
/// update. Tests can inject failures and mutate objects behind the reconciler's back.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

fn key(target: &TargetCollection, namespace: Option<&str>, name: &str) -> ObjKey {
    (target.to_string(), namespace.unwrap_or("").to_string(), name.to_string())
}

fn api_error(code: u16, reason: &str, message: String) -> RemoteError {
    RemoteError::Api { code, reason: reason.to_string(), message }
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make the next call of `op` fail with `err`.
    pub fn fail_next(&self, op: StoreOp, err: RemoteError) {
        self.lock().failures.insert(op, err);
    }

    /// Operations served so far, in order.
    pub fn calls(&self) -> Vec<StoreOp> {
        self.lock().calls.clone()
    }

    pub fn len(&self) -> usize {
        self.lock().objects.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Current stored object, bypassing call accounting.
    pub fn peek(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Option<RemoteObject> {
        self.lock().objects.get(&key(target, namespace, name)).cloned()
    }

    /// Remove an object as another actor would.
    pub fn remove(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Option<RemoteObject> {
        self.lock().objects.remove(&key(target, namespace, name))
    }

    /// Overwrite the spec of a stored object as another actor would.
    pub fn set_spec(&self, target: &TargetCollection, namespace: Option<&str>, name: &str, spec: Json) -> bool {
        match self.lock().objects.get_mut(&key(target, namespace, name)) {
            Some(obj) => {
                obj.spec = spec;
                true
            }
            None => false,
        }
    }

    fn begin(&self, op: StoreOp) -> Result<MutexGuard<'_, Inner>, RemoteError> {
        let mut inner = self.lock();
        inner.calls.push(op);
        let failure = inner.failures.remove(&op);
        match failure {
            Some(err) => Err(err),
            None => Ok(inner),
        }
    }
}

fn next_rv(inner: &mut Inner) -> Json {
    inner.rv += 1;
    Json::String(inner.rv.to_string())
}

#[async_trait::async_trait]
impl RemoteStore for MemStore {
    async fn get(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<Option<RemoteObject>, RemoteError> {
        let inner = self.begin(StoreOp::Get)?;
        Ok(inner.objects.get(&key(target, namespace, name)).cloned())
    }

    async fn create(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError> {
        let mut inner = self.begin(StoreOp::Create)?;
        let k = key(target, namespace, &object.metadata.name);
        if inner.objects.contains_key(&k) {
            return Err(api_error(409, "AlreadyExists", format!("{} {:?} already exists", target, object.metadata.name)));
        }
        let mut stored = object.clone();
        stored.metadata.namespace = namespace.map(|s| s.to_string());
        stored.metadata.uid = Some(Uuid::new_v4().to_string());
        let rv = next_rv(&mut inner);
        stored.metadata.rest.insert("resourceVersion".into(), rv);
        inner.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn update(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError> {
        let mut inner = self.begin(StoreOp::Update)?;
        let k = key(target, namespace, &object.metadata.name);
        let Some(live) = inner.objects.get(&k) else {
            return Err(api_error(404, "NotFound", format!("{} {:?} not found", target, object.metadata.name)));
        };
        let uid = live.metadata.uid.clone();
        let mut stored = object.clone();
        stored.metadata.namespace = namespace.map(|s| s.to_string());
        stored.metadata.uid = uid;
        let rv = next_rv(&mut inner);
        stored.metadata.rest.insert("resourceVersion".into(), rv);
        inner.objects.insert(k, stored.clone());
        Ok(stored)
    }

    async fn delete(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<DeleteOutcome, RemoteError> {
        let mut inner = self.begin(StoreOp::Delete)?;
        Ok(match inner.objects.remove(&key(target, namespace, name)) {
            Some(_) => DeleteOutcome::Deleted,
            None => DeleteOutcome::Absent,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use multiverse_core::ResourceDescriptor;

    fn desc() -> ResourceDescriptor {
        ResourceDescriptor::new("example.io/v1", "Widget", "w", Some("ns"))
    }

    #[tokio::test]
    async fn create_assigns_uid_and_rejects_duplicates() {
        let store = MemStore::new();
        let d = desc();
        let t = d.target().unwrap();
        let obj = RemoteObject::desired(&d, serde_json::json!({ "size": 1 }));
        let created = store.create(&t, d.ns(), &obj).await.unwrap();
        assert!(created.metadata.uid.is_some());
        let err = store.create(&t, d.ns(), &obj).await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { code: 409, .. }));
        assert_eq!(store.len(), 1);
    }

    #[tokio::test]
    async fn update_replaces_whole_object_and_keeps_uid() {
        let store = MemStore::new();
        let d = desc();
        let t = d.target().unwrap();
        let created = store.create(&t, d.ns(), &RemoteObject::desired(&d, serde_json::json!({ "a": 1, "b": 2 }))).await.unwrap();
        let updated = store.update(&t, d.ns(), &RemoteObject::desired(&d, serde_json::json!({ "a": 5 }))).await.unwrap();
        assert_eq!(updated.metadata.uid, created.metadata.uid);
        assert_eq!(updated.spec, serde_json::json!({ "a": 5 }));
        assert_ne!(updated.metadata.rest.get("resourceVersion"), created.metadata.rest.get("resourceVersion"));
    }

    #[tokio::test]
    async fn update_of_missing_object_is_404() {
        let store = MemStore::new();
        let d = desc();
        let err = store.update(&d.target().unwrap(), d.ns(), &RemoteObject::desired(&d, Json::Null)).await.unwrap_err();
        assert!(matches!(err, RemoteError::Api { code: 404, .. }));
    }

    #[tokio::test]
    async fn delete_reports_absent_and_injected_failures_fire_once() {
        let store = MemStore::new();
        let d = desc();
        let t = d.target().unwrap();
        assert_eq!(store.delete(&t, d.ns(), "w").await.unwrap(), DeleteOutcome::Absent);
        store.fail_next(StoreOp::Get, RemoteError::Transport("connection reset".into()));
        assert!(store.get(&t, d.ns(), "w").await.is_err());
        assert_eq!(store.get(&t, d.ns(), "w").await.unwrap(), None);
        assert_eq!(store.calls(), vec![StoreOp::Delete, StoreOp::Get, StoreOp::Get]);
    }
}
