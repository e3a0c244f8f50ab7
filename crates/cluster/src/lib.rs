//! Motif cluster access: the store handle the apply engine talks through.
//!
//! `ClusterStore` fixes the semantics the engine needs (namespace point
//! lookup, full-object server-side apply with a named field manager and
//! forced conflicts); `KubeStore` speaks the kube protocol, `mem::MemStore`
//! stands in for tests and offline orchestration.

#![forbid(unsafe_code)]

pub mod mem;

use async_trait::async_trait;
use k8s_openapi::api::core::v1::Namespace;
use kube::{
    api::{Api, Patch, PatchParams},
    core::{DynamicObject, GroupVersionKind},
    discovery::{Discovery, Scope},
    Client,
};
use thiserror::Error;
use tracing::debug;

/// Failures surfaced by a store handle. The remote cause stays intact so the
/// orchestrator can branch on it; retry and backoff policy is theirs, not ours.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Any failure returned by the remote store: transport, auth, validation.
    #[error("cluster request failed")]
    Api(#[from] kube::Error),

    /// Discovery found no served resource for the desired object's type.
    #[error("no served resource matches {group}/{version}/{kind}")]
    UnknownKind {
        group: String,
        version: String,
        kind: String,
    },

    /// A namespaced kind was addressed without a namespace.
    #[error("namespace required for namespaced kind {kind}")]
    MissingNamespace { kind: String },
}

/// Handle to the remote object store.
#[async_trait]
pub trait ClusterStore: Send + Sync {
    /// Point lookup of a namespace by name. `Ok(true)` only on a definitive
    /// found response; lookup failures are reported faithfully, not collapsed.
    async fn lookup_namespace(&self, name: &str) -> Result<bool, StoreError>;

    /// Create-or-merge the full `payload` at `(namespace, name)` under the
    /// given field manager. With `force`, field claims held by other managers
    /// are overridden instead of failing the patch. Returns the server's
    /// authoritative object.
    async fn apply_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        payload: &serde_json::Value,
        field_manager: &str,
        force: bool,
    ) -> Result<DynamicObject, StoreError>;
}

/// Pre-condition gate for namespaced creation: true only when the namespace
/// definitively exists. Not-found and every lookup error collapse to false —
/// creating into a namespace we could not confirm is exactly what this gate
/// is there to stop.
pub async fn namespace_exists(store: &dyn ClusterStore, name: &str) -> bool {
    match store.lookup_namespace(name).await {
        Ok(found) => found,
        Err(e) => {
            debug!(namespace = %name, error = %e, "namespace lookup failed; treating as absent");
            false
        }
    }
}

/// Store handle backed by a kube client. The client is injected by the caller
/// (auth, deadlines and cancellation live in its config); nothing here is
/// process-global.
#[derive(Clone)]
pub struct KubeStore {
    client: Client,
}

impl KubeStore {
    pub fn new(client: Client) -> Self {
        Self { client }
    }

    /// Client from the ambient kubeconfig / in-cluster environment.
    pub async fn try_default() -> Result<Self, StoreError> {
        Ok(Self::new(Client::try_default().await?))
    }

    async fn dynamic_api(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
    ) -> Result<Api<DynamicObject>, StoreError> {
        let (ar, namespaced) = find_api_resource(self.client.clone(), gvk).await?;
        if namespaced {
            match namespace {
                Some(ns) => Ok(Api::namespaced_with(self.client.clone(), ns, &ar)),
                None => Err(StoreError::MissingNamespace {
                    kind: gvk.kind.clone(),
                }),
            }
        } else {
            Ok(Api::all_with(self.client.clone(), &ar))
        }
    }
}

#[async_trait]
impl ClusterStore for KubeStore {
    async fn lookup_namespace(&self, name: &str) -> Result<bool, StoreError> {
        let api: Api<Namespace> = Api::all(self.client.clone());
        Ok(api.get_opt(name).await?.is_some())
    }

    async fn apply_object(
        &self,
        gvk: &GroupVersionKind,
        namespace: Option<&str>,
        name: &str,
        payload: &serde_json::Value,
        field_manager: &str,
        force: bool,
    ) -> Result<DynamicObject, StoreError> {
        let api = self.dynamic_api(gvk, namespace).await?;
        let mut pp = PatchParams::apply(field_manager);
        if force {
            pp = pp.force();
        }
        let gvk_label = format!("{}/{}/{}", gvk.group, gvk.version, gvk.kind);
        debug!(gvk = %gvk_label, ns = ?namespace, name = %name, manager = %field_manager, force, "server-side apply");
        Ok(api.patch(name, &pp, &Patch::Apply(payload)).await?)
    }
}

/// Resolve the served ApiResource (and its scope) for a GVK via discovery.
async fn find_api_resource(
    client: Client,
    gvk: &GroupVersionKind,
) -> Result<(kube::core::ApiResource, bool), StoreError> {
    let discovery = Discovery::new(client).run().await?;
    for group in discovery.groups() {
        for (ar, caps) in group.recommended_resources() {
            if ar.group == gvk.group && ar.version == gvk.version && ar.kind == gvk.kind {
                let namespaced = matches!(caps.scope, Scope::Namespaced);
                return Ok((ar.clone(), namespaced));
            }
        }
    }
    Err(StoreError::UnknownKind {
        group: gvk.group.clone(),
        version: gvk.version.clone(),
        kind: gvk.kind.clone(),
    })
}
