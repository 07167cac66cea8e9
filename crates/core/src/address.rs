use std::fmt;

use serde::{Deserialize, Serialize};

/// Remote collection an object lives in: group, version and plural resource name.
/// Derived per operation, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TargetCollection {
    pub group: String,
    pub version: String,
    pub resource_plural: String,
}

impl TargetCollection {
    pub fn api_version(&self) -> String {
        format!("{}/{}", self.group, self.version)
    }
}

impl fmt::Display for TargetCollection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}/{}", self.group, self.version, self.resource_plural)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum AddressError {
    #[error("invalid apiVersion {0:?} (expect <group>/<version>)")]
    MalformedApiVersion(String),
}

/// Derive the target collection from an `apiVersion` and a `kind`.
///
/// `apiVersion` must be exactly `<group>/<version>` with both halves non-empty,
/// so core-group kinds (`apiVersion: v1`) are rejected.
///
/// The plural is `lowercase(kind) + "s"`. There is no irregular-plural table
/// and no API discovery: `Ingress` maps to `ingresss`, `Policy` to `policys`.
/// Kinds whose served plural differs from this rule cannot be addressed.
pub fn address(api_version: &str, kind: &str) -> Result<TargetCollection, AddressError> {
    let parts: Vec<_> = api_version.split('/').collect();
    match parts.as_slice() {
        [group, version] if !group.is_empty() && !version.is_empty() => Ok(TargetCollection {
            group: (*group).to_string(),
            version: (*version).to_string(),
            resource_plural: format!("{}s", kind.to_lowercase()),
        }),
        _ => Err(AddressError::MalformedApiVersion(api_version.to_string())),
    }
}
