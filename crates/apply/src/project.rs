//! State projection between remote objects and tracked local attributes.

use multiverse_core::{Attr, LocalState, RemoteObject, TrackedState};

use crate::document::encode_spec;
use crate::ReconcileError;

/// Project a remote object onto tracked attributes. Absence projects to the
/// all-cleared state (empty id).
pub fn project(remote: Option<&RemoteObject>) -> Result<TrackedState, ReconcileError> {
    let Some(obj) = remote else {
        return Ok(TrackedState::default());
    };
    let id = obj
        .metadata
        .uid
        .as_deref()
        .filter(|s| !s.is_empty())
        .ok_or_else(|| ReconcileError::MissingUid(obj.metadata.name.clone()))?;
    Ok(TrackedState {
        id: id.to_string(),
        name: obj.metadata.name.clone(),
        kind: obj.kind.clone(),
        namespace: obj.metadata.namespace.clone().unwrap_or_default(),
        api_version: obj.api_version.clone(),
        spec: encode_spec(&obj.spec).map_err(ReconcileError::Encode)?,
    })
}

/// Write projected attributes into `state`, id last.
pub fn write_back<L: LocalState + ?Sized>(state: &mut L, projected: &TrackedState) {
    for attr in Attr::ALL {
        state.set(attr, projected.get(attr));
    }
    state.set_id(&projected.id);
}

/// Drop tracking: clears the id and every tracked attribute.
pub fn clear<L: LocalState + ?Sized>(state: &mut L) {
    write_back(state, &TrackedState::default());
}
