//! Multiverse core types: resource addressing, canonical payloads, and the
//! collaborator seams (remote store, tracked local state) the reconciler drives.

#![forbid(unsafe_code)]

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value as Json};

mod address;
mod canonical;

pub use address::{address, AddressError, TargetCollection};
pub use canonical::{canonicalize, to_json, KeyTypeError};

/// Identifies one remote object instance.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResourceDescriptor {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
}

impl ResourceDescriptor {
    pub fn new(api_version: &str, kind: &str, name: &str, namespace: Option<&str>) -> Self {
        Self {
            api_version: api_version.to_string(),
            kind: kind.to_string(),
            name: name.to_string(),
            namespace: namespace.map(|s| s.to_string()),
        }
    }

    /// Namespace, treating an empty string the same as absent.
    pub fn ns(&self) -> Option<&str> {
        self.namespace.as_deref().filter(|s| !s.is_empty())
    }

    /// Resolve the remote collection this descriptor lives in.
    pub fn target(&self) -> Result<TargetCollection, AddressError> {
        address(&self.api_version, &self.kind)
    }

    /// Stable key for persisting tracked state: `<apiVersion>/<kind>/<namespace>/<name>`.
    pub fn key(&self) -> String {
        format!("{}/{}/{}/{}", self.api_version, self.kind, self.ns().unwrap_or(""), self.name)
    }
}

/// Metadata subset the reconciler reads; everything else rides along in `rest`.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct RemoteMeta {
    #[serde(default)]
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub namespace: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub uid: Option<String>,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

/// Server-side representation of an object. Status and any other top-level
/// fields are opaque and kept in `rest`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RemoteObject {
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub kind: String,
    #[serde(default)]
    pub metadata: RemoteMeta,
    #[serde(default, skip_serializing_if = "Json::is_null")]
    pub spec: Json,
    #[serde(flatten)]
    pub rest: Map<String, Json>,
}

impl RemoteObject {
    /// Desired-state document for `desc` carrying an already canonical `spec`.
    pub fn desired(desc: &ResourceDescriptor, spec: Json) -> Self {
        Self {
            api_version: desc.api_version.clone(),
            kind: desc.kind.clone(),
            metadata: RemoteMeta {
                name: desc.name.clone(),
                namespace: desc.ns().map(|s| s.to_string()),
                uid: None,
                rest: Map::new(),
            },
            spec,
            rest: Map::new(),
        }
    }
}

/// Failure reported by a [`RemoteStore`] other than "not found".
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum RemoteError {
    #[error("api error {code} ({reason}): {message}")]
    Api { code: u16, reason: String, message: String },
    #[error("transport: {0}")]
    Transport(String),
    #[error("codec: {0}")]
    Codec(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DeleteOutcome {
    Deleted,
    /// The object was already gone.
    Absent,
}

/// Remote object store addressed by collection/namespace/name.
///
/// `get` reports a missing object as `Ok(None)` and `delete` as
/// [`DeleteOutcome::Absent`]; every other failure is a [`RemoteError`].
#[async_trait::async_trait]
pub trait RemoteStore: Send + Sync {
    async fn get(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<Option<RemoteObject>, RemoteError>;
    async fn create(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError>;
    /// Full replace of the named object with `object`.
    async fn update(&self, target: &TargetCollection, namespace: Option<&str>, object: &RemoteObject) -> Result<RemoteObject, RemoteError>;
    async fn delete(&self, target: &TargetCollection, namespace: Option<&str>, name: &str) -> Result<DeleteOutcome, RemoteError>;
}

/// Tracked attributes besides the id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Attr {
    Name,
    Kind,
    Namespace,
    ApiVersion,
    Spec,
}

impl Attr {
    pub const ALL: [Attr; 5] = [Attr::Name, Attr::Kind, Attr::Namespace, Attr::ApiVersion, Attr::Spec];

    pub fn as_str(self) -> &'static str {
        match self {
            Attr::Name => "name",
            Attr::Kind => "kind",
            Attr::Namespace => "namespace",
            Attr::ApiVersion => "apiVersion",
            Attr::Spec => "spec",
        }
    }
}

/// Local record of a reconciled object. An empty id means untracked.
pub trait LocalState {
    fn id(&self) -> &str;
    fn set_id(&mut self, id: &str);
    fn get(&self, attr: Attr) -> &str;
    fn set(&mut self, attr: Attr, value: &str);

    fn is_tracked(&self) -> bool {
        !self.id().is_empty()
    }
}

/// Plain in-memory [`LocalState`].
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedState {
    pub id: String,
    pub name: String,
    pub kind: String,
    pub namespace: String,
    #[serde(rename = "apiVersion")]
    pub api_version: String,
    pub spec: String,
}

impl LocalState for TrackedState {
    fn id(&self) -> &str {
        &self.id
    }

    fn set_id(&mut self, id: &str) {
        self.id = id.to_string();
    }

    fn get(&self, attr: Attr) -> &str {
        match attr {
            Attr::Name => &self.name,
            Attr::Kind => &self.kind,
            Attr::Namespace => &self.namespace,
            Attr::ApiVersion => &self.api_version,
            Attr::Spec => &self.spec,
        }
    }

    fn set(&mut self, attr: Attr, value: &str) {
        let slot = match attr {
            Attr::Name => &mut self.name,
            Attr::Kind => &mut self.kind,
            Attr::Namespace => &mut self.namespace,
            Attr::ApiVersion => &mut self.api_version,
            Attr::Spec => &mut self.spec,
        };
        *slot = value.to_string();
    }
}

pub mod prelude {
    pub use super::{
        Attr, DeleteOutcome, LocalState, RemoteError, RemoteMeta, RemoteObject, RemoteStore, ResourceDescriptor, TargetCollection, TrackedState,
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn descriptor_key_and_empty_namespace() {
        let d = ResourceDescriptor::new("batch/v1", "Job", "n", Some(""));
        assert_eq!(d.ns(), None);
        assert_eq!(d.key(), "batch/v1/Job//n");
        let d = ResourceDescriptor::new("batch/v1", "Job", "n", Some("ns"));
        assert_eq!(d.key(), "batch/v1/Job/ns/n");
    }

    #[test]
    fn remote_object_keeps_opaque_fields() {
        let raw = serde_json::json!({
            "apiVersion": "example.io/v1",
            "kind": "Widget",
            "metadata": { "name": "w", "namespace": "ns", "uid": "u-1", "resourceVersion": "7" },
            "spec": { "size": 2 },
            "status": { "ready": true }
        });
        let obj: RemoteObject = serde_json::from_value(raw.clone()).unwrap();
        assert_eq!(obj.metadata.uid.as_deref(), Some("u-1"));
        assert_eq!(obj.metadata.rest.get("resourceVersion"), Some(&Json::String("7".into())));
        assert!(obj.rest.contains_key("status"));
        assert_eq!(serde_json::to_value(&obj).unwrap(), raw);
    }

    #[test]
    fn desired_document_omits_null_spec_and_empty_namespace() {
        let d = ResourceDescriptor::new("example.io/v1", "Widget", "w", None);
        let v = serde_json::to_value(RemoteObject::desired(&d, Json::Null)).unwrap();
        assert!(v.get("spec").is_none());
        assert!(v["metadata"].get("namespace").is_none());
        assert_eq!(v["metadata"]["name"], "w");
    }

    #[test]
    fn tracked_state_accessors() {
        let mut s = TrackedState::default();
        assert!(!s.is_tracked());
        s.set_id("abc");
        for attr in Attr::ALL {
            s.set(attr, attr.as_str());
        }
        assert!(s.is_tracked());
        assert_eq!(s.get(Attr::ApiVersion), "apiVersion");
        assert_eq!(s.spec, "spec");
    }
}
