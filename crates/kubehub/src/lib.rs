//! Multiverse kubehub: remote stores for dynamically typed objects.
//!
//! [`KubeStore`] talks to a live cluster through `kube` dynamic objects;
//! [`MemStore`] keeps objects in memory and stands in for the cluster in tests.

#![forbid(unsafe_code)]

use anyhow::{Context, Result};
use kube::{
    api::{Api, DeleteParams, PostParams},
    core::{ApiResource, DynamicObject},
    Client,
};
use metrics::counter;
use multiverse_core::{DeleteOutcome, RemoteError, RemoteObject, RemoteStore, TargetCollection};
use tracing::debug;

mod mem;

pub use mem::{MemStore, StoreOp};

/// [`RemoteStore`] backed by the cluster the ambient kubeconfig points at.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Build a client from the ambient configuration (kubeconfig or in-cluster env).
    /// Configuration failures are returned, never papered over.
    pub async fn try_default() -> Result<Self> {
        let client = Client::try_default().await.context("building kube client from ambient config")?;
        Ok(Self { client })
    }

    fn api(&self, target: &TargetCollection, kind: &str, namespace: Option<&str>) -> Api<DynamicObject> {
        let ar = api_resource(target, kind);
        match namespace {
            Some(ns) => Api::namespaced_with(self.client.clone(), ns, &ar),
            None => Api::all_with(self.client.clone(), &ar),
        }
    }
}

/// The URL only depends on group, version and plural; `kind` is informational
/// and left empty by `get` and `delete`, which have no object to take it from.
fn api_resource(target: &TargetCollection, kind: &str) -> ApiResource {
    ApiResource {
        group: target.group.clone(),
        version: target.version.clone(),
        api_version: target.api_version(),
        kind: kind.to_string(),
        plural: target.resource_plural.clone(),
    }
}

fn is_not_found(e: &kube::Error) -> bool {
    matches!(e, kube::Error::Api(ae) if ae.code == 404)
}

fn remote_err(e: kube::Error) -> RemoteError {
    counter!("kubehub_remote_err_total", 1u64);
    match e {
        kube::Error::Api(ae) => RemoteError::Api { code: ae.code, reason: ae.reason, message: ae.message },
        other => RemoteError::Transport(other.to_string()),
    }
}

fn strip_managed_fields(v: &mut serde_json::Value) {
    if let Some(meta) = v.get_mut("metadata") {
        if let Some(obj) = meta.as_object_mut() {
            obj.remove("managedFields");
        }
    }
}

fn to_dynamic(obj: &RemoteObject) -> Result<DynamicObject, RemoteError> {
    let raw = serde_json::to_value(obj).map_err(|e| RemoteError::Codec(format!("encoding object: {e}")))?;
    serde_json::from_value(raw).map_err(|e| RemoteError::Codec(format!("building dynamic object: {e}")))
}

fn from_dynamic(obj: &DynamicObject) -> Result<RemoteObject, RemoteError> {
    let mut raw = serde_json::to_value(obj).map_err(|e| RemoteError::Codec(format!("serializing DynamicObject: {e}")))?;
    strip_managed_fields(&mut raw);
    serde_json::from_value(raw).map_err(|e| RemoteError::Codec(format!("decoding remote object: {e}")))
}

#[async_trait::async_trait]
impl RemoteStore for KubeStore {
    async fn get(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<Option<RemoteObject>, RemoteError> {
        debug!(gvr = %target, ns = ?namespace, name = %name, "get");
        let api = self.api(target, "", namespace);
        match api.get_opt(name).await.map_err(remote_err)? {
            Some(obj) => from_dynamic(&obj).map(Some),
            None => Ok(None),
        }
    }

    async fn create(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError> {
        debug!(gvr = %target, ns = ?namespace, name = %object.metadata.name, "create");
        let api = self.api(target, &object.kind, namespace);
        let created = api.create(&PostParams::default(), &to_dynamic(object)?).await.map_err(remote_err)?;
        from_dynamic(&created)
    }

    async fn update(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError> {
        let name = object.metadata.name.as_str();
        debug!(gvr = %target, ns = ?namespace, name = %name, "replace");
        let api = self.api(target, &object.kind, namespace);
        // Replace needs the live resourceVersion; concurrent writers resolve last-writer-wins.
        let live = api.get(name).await.map_err(remote_err)?;
        let mut desired = to_dynamic(object)?;
        desired.metadata.resource_version = live.metadata.resource_version;
        let replaced = api.replace(name, &PostParams::default(), &desired).await.map_err(remote_err)?;
        from_dynamic(&replaced)
    }

    async fn delete(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<DeleteOutcome, RemoteError> {
        debug!(gvr = %target, ns = ?namespace, name = %name, "delete");
        let api = self.api(target, "", namespace);
        match api.delete(name, &DeleteParams::default()).await {
            Ok(_) => Ok(DeleteOutcome::Deleted),
            Err(e) if is_not_found(&e) => Ok(DeleteOutcome::Absent),
            Err(e) => Err(remote_err(e)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kube::core::ErrorResponse;

    fn api_error(code: u16) -> kube::Error {
        kube::Error::Api(ErrorResponse {
            status: "Failure".into(),
            message: format!("status {code}"),
            reason: if code == 404 { "NotFound".into() } else { "Forbidden".into() },
            code,
        })
    }

    fn target() -> TargetCollection {
        multiverse_core::address("example.io/v1", "Widget").unwrap()
    }

    #[test]
    fn api_resource_uses_naive_plural() {
        let ar = api_resource(&target(), "Widget");
        assert_eq!(ar.api_version, "example.io/v1");
        assert_eq!(ar.plural, "widgets");
        assert_eq!(ar.kind, "Widget");
    }

    #[test]
    fn not_found_is_recognized() {
        assert!(is_not_found(&api_error(404)));
        assert!(!is_not_found(&api_error(403)));
    }

    #[test]
    fn remote_err_keeps_api_details() {
        let e = remote_err(api_error(403));
        assert_eq!(e, RemoteError::Api { code: 403, reason: "Forbidden".into(), message: "status 403".into() });
    }

    #[test]
    fn dynamic_round_trip_strips_managed_fields() {
        let raw = serde_json::json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": {
                "name": "w",
                "namespace": "ns",
                "uid": "0b5f7a8e-8d1c-4d35-a1a1-2f5c7e0e9d11",
                "managedFields": [ { "manager": "kubectl" } ]
            },
            "spec": { "size": 3 }
        });
        let dynamic: DynamicObject = serde_json::from_value(raw).unwrap();
        let obj = from_dynamic(&dynamic).unwrap();
        assert_eq!(obj.metadata.uid.as_deref(), Some("0b5f7a8e-8d1c-4d35-a1a1-2f5c7e0e9d11"));
        assert!(!obj.metadata.rest.contains_key("managedFields"));
        assert_eq!(obj.spec, serde_json::json!({ "size": 3 }));

        let back = to_dynamic(&obj).unwrap();
        assert_eq!(back.metadata.name.as_deref(), Some("w"));
        assert_eq!(back.data["spec"]["size"], 3);
    }
}
