//! Multiverse reconcile: create/read/update/delete of one dynamically typed
//! remote object, with tracked state projected back after every mutation.

#![forbid(unsafe_code)]

use std::sync::Arc;
use std::time::Instant;

use metrics::{counter, histogram};
use multiverse_core::{
    canonicalize, to_json, AddressError, DeleteOutcome, KeyTypeError, LocalState, RemoteError, RemoteObject, RemoteStore,
    ResourceDescriptor, TargetCollection,
};
use serde_json::Value as Json;
use tracing::{debug, info, warn};

pub mod config;
pub mod document;
pub mod project;

pub use config::{ReconcileConfig, SpecLimits};
pub use document::DecodeError;

#[derive(Debug, thiserror::Error)]
pub enum ReconcileError {
    #[error(transparent)]
    Address(#[from] AddressError),
    #[error(transparent)]
    KeyType(#[from] KeyTypeError),
    #[error(transparent)]
    Decode(#[from] DecodeError),
    #[error("rendering spec as YAML: {0}")]
    Encode(#[source] serde_yaml::Error),
    #[error("remote store: {0}")]
    Remote(#[from] RemoteError),
    #[error("remote object {0:?} has no uid")]
    MissingUid(String),
    #[error("nothing to import: {0} does not exist")]
    NotTracked(String),
}

#[derive(Debug, Clone, Copy)]
enum Op {
    Exists,
    Create,
    Read,
    Update,
    Delete,
    Import,
}

impl Op {
    fn as_str(self) -> &'static str {
        match self {
            Op::Exists => "exists",
            Op::Create => "create",
            Op::Read => "read",
            Op::Update => "update",
            Op::Delete => "delete",
            Op::Import => "import",
        }
    }
}

fn observe<T>(op: Op, t0: Instant, res: &Result<T, ReconcileError>) {
    histogram!("reconcile_latency_ms", t0.elapsed().as_secs_f64() * 1000.0, "op" => op.as_str());
    match res {
        Ok(_) => counter!("reconcile_ok_total", 1u64, "op" => op.as_str()),
        Err(e) => {
            counter!("reconcile_err_total", 1u64, "op" => op.as_str());
            warn!(op = op.as_str(), error = %e, "reconcile failed");
        }
    }
}

/// Drives one remote object through its lifecycle.
///
/// Every call resolves the target collection afresh and awaits each store
/// round trip before issuing the next. Mutations are always followed by a
/// Read, so tracked state reflects what the store holds, not what was sent.
pub struct Reconciler {
    store: Arc<dyn RemoteStore>,
    config: ReconcileConfig,
}

impl Reconciler {
    pub fn new(store: Arc<dyn RemoteStore>, config: ReconcileConfig) -> Self {
        Self { store, config }
    }

    pub fn config(&self) -> &ReconcileConfig {
        &self.config
    }

    /// Whether the object currently exists. Not-found is `Ok(false)`.
    pub async fn exists(&self, desc: &ResourceDescriptor) -> Result<bool, ReconcileError> {
        let t0 = Instant::now();
        let res = self.exists_inner(desc).await;
        observe(Op::Exists, t0, &res);
        res
    }

    async fn exists_inner(&self, desc: &ResourceDescriptor) -> Result<bool, ReconcileError> {
        let target = desc.target()?;
        let found = self.store.get(&target, desc.ns(), &desc.name).await?;
        Ok(found.is_some())
    }

    /// Create the object from `spec` text, then refresh `state` from the store.
    /// On failure `state` is left untouched.
    pub async fn create<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, spec: &str, state: &mut L) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        let res = self.create_inner(desc, spec, state).await;
        observe(Op::Create, t0, &res);
        res
    }

    async fn create_inner<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, spec: &str, state: &mut L) -> Result<(), ReconcileError> {
        let target = desc.target()?;
        let desired = self.desired(desc, spec)?;
        let created = self.store.create(&target, desc.ns(), &desired).await?;
        info!(gvr = %target, ns = ?desc.ns(), name = %desc.name, uid = ?created.metadata.uid, "created");
        self.read_at(&target, desc, state).await
    }

    /// Refresh `state` from the store. A missing object clears tracking and is
    /// not an error.
    pub async fn read<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        let res = match desc.target() {
            Ok(target) => self.read_at(&target, desc, state).await,
            Err(e) => Err(e.into()),
        };
        observe(Op::Read, t0, &res);
        res
    }

    async fn read_at<L: LocalState + ?Sized>(&self, target: &TargetCollection, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let found = match self.store.get(target, desc.ns(), &desc.name).await {
            Ok(found) => found,
            Err(e) if self.config.untrack_on_read_error => {
                warn!(gvr = %target, ns = ?desc.ns(), name = %desc.name, error = %e, "fetch failed; dropping tracking");
                None
            }
            Err(e) => return Err(e.into()),
        };
        if found.is_none() {
            debug!(gvr = %target, ns = ?desc.ns(), name = %desc.name, "absent; untracking");
            counter!("reconcile_untracked_total", 1u64);
        }
        let projected = project::project(found.as_ref())?;
        project::write_back(state, &projected);
        Ok(())
    }

    /// Replace the object with one built from `spec`, then refresh `state`.
    /// Fields missing from `spec` are removed, not merged.
    pub async fn update<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, spec: &str, state: &mut L) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        let res = self.update_inner(desc, spec, state).await;
        observe(Op::Update, t0, &res);
        res
    }

    async fn update_inner<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, spec: &str, state: &mut L) -> Result<(), ReconcileError> {
        let target = desc.target()?;
        let desired = self.desired(desc, spec)?;
        self.store.update(&target, desc.ns(), &desired).await?;
        info!(gvr = %target, ns = ?desc.ns(), name = %desc.name, "replaced");
        self.read_at(&target, desc, state).await
    }

    /// Remove the object and clear `state`. Already absent counts as success.
    pub async fn delete<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        let res = self.delete_inner(desc, state).await;
        observe(Op::Delete, t0, &res);
        res
    }

    async fn delete_inner<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let target = desc.target()?;
        match self.store.delete(&target, desc.ns(), &desc.name).await? {
            DeleteOutcome::Deleted => info!(gvr = %target, ns = ?desc.ns(), name = %desc.name, "deleted"),
            DeleteOutcome::Absent => debug!(gvr = %target, ns = ?desc.ns(), name = %desc.name, "already absent"),
        }
        project::clear(state);
        Ok(())
    }

    /// Adopt an object created elsewhere. Fails with `NotTracked` if it does not exist.
    pub async fn import<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let t0 = Instant::now();
        let res = self.import_inner(desc, state).await;
        observe(Op::Import, t0, &res);
        res
    }

    async fn import_inner<L: LocalState + ?Sized>(&self, desc: &ResourceDescriptor, state: &mut L) -> Result<(), ReconcileError> {
        let target = desc.target()?;
        let Some(found) = self.store.get(&target, desc.ns(), &desc.name).await? else {
            return Err(ReconcileError::NotTracked(desc.key()));
        };
        let projected = project::project(Some(&found))?;
        project::write_back(state, &projected);
        info!(gvr = %target, ns = ?desc.ns(), name = %desc.name, id = %projected.id, "imported");
        Ok(())
    }

    /// Decode, canonicalize and wrap `spec` into a desired-state document.
    fn desired(&self, desc: &ResourceDescriptor, spec: &str) -> Result<RemoteObject, ReconcileError> {
        let parsed = document::decode_spec(spec, &self.config.limits)?;
        let canonical = canonicalize(&parsed)?;
        let json: Json = to_json(&canonical)?;
        Ok(RemoteObject::desired(desc, json))
    }
}
