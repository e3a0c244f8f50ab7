//! Motif apply engine: converge a desired object onto the cluster.
//!
//! One call, one patch. The full desired state goes to the store as a
//! server-side apply under this engine's field manager with conflicts forced,
//! and the server's response comes back as the new truth. No retries here;
//! backoff is the reconcile loop's business.

#![forbid(unsafe_code)]

use std::time::Instant;

use kube::core::{DynamicObject, GroupVersionKind};
use metrics::{counter, histogram};
use motif_cluster::{ClusterStore, StoreError};
use thiserror::Error;
use tracing::debug;

/// Field manager identity the engine claims its fields under.
pub const DEFAULT_FIELD_MANAGER: &str = "motif-apply";

fn field_manager() -> String {
    std::env::var("MOTIF_FIELD_MANAGER").unwrap_or_else(|_| DEFAULT_FIELD_MANAGER.to_string())
}

#[derive(Debug, Error)]
pub enum ApplyError {
    /// The desired object cannot be targeted by apply; the input must change.
    #[error("unsupported apply target: {0}")]
    Unsupported(String),

    /// Serializing the desired object into the exchange format failed.
    #[error("encoding desired object failed")]
    Encoding(#[source] serde_json::Error),

    /// The remote store rejected or failed the patch; cause preserved verbatim.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Push the full `desired` object to the store as a forced server-side apply
/// and return the server's authoritative result.
///
/// The returned object (server-assigned uid, resourceVersion, defaulted
/// fields) is the caller's truth from here on; `desired` is stale once this
/// returns. Applying the same desired object again converges to the same
/// state rather than creating anything new, which is why generated names are
/// refused: a second apply under a generate-name policy would mint a second
/// object instead of converging the first.
pub async fn apply(
    store: &dyn ClusterStore,
    desired: &DynamicObject,
) -> Result<DynamicObject, ApplyError> {
    let t0 = Instant::now();
    counter!("apply_attempts", 1u64);

    let name = desired.metadata.name.clone().unwrap_or_default();
    if name.is_empty() {
        let generated = desired.metadata.generate_name.clone().unwrap_or_default();
        counter!("apply_rejected", 1u64);
        return Err(if generated.is_empty() {
            ApplyError::Unsupported("desired object has neither name nor generateName".into())
        } else {
            ApplyError::Unsupported(format!(
                "from {generated}: cannot combine generated names with apply"
            ))
        });
    }

    let gvk = target_gvk(desired)?;

    // Full desired state, not a client-computed diff: the server merges
    // against its per-field manager bookkeeping, which stays correct under
    // concurrent writers even when our last-known state is stale.
    let payload = serde_json::to_value(desired).map_err(ApplyError::Encoding)?;

    let manager = field_manager();
    let namespace = desired.metadata.namespace.as_deref();
    match store
        .apply_object(&gvk, namespace, &name, &payload, &manager, true)
        .await
    {
        Ok(observed) => {
            histogram!("apply_latency_ms", t0.elapsed().as_secs_f64() * 1000.0);
            counter!("apply_ok", 1u64);
            Ok(observed)
        }
        Err(e) => {
            counter!("apply_err", 1u64);
            debug!(
                error = %e,
                object = %motif_core::render::object_yaml(desired),
                "apply failed",
            );
            Err(e.into())
        }
    }
}

fn target_gvk(desired: &DynamicObject) -> Result<GroupVersionKind, ApplyError> {
    let types = desired
        .types
        .as_ref()
        .ok_or_else(|| ApplyError::Unsupported("desired object carries no apiVersion/kind".into()))?;
    let (group, version) = match types.api_version.split_once('/') {
        Some((g, v)) => (g.to_string(), v.to_string()),
        None => (String::new(), types.api_version.clone()),
    };
    Ok(GroupVersionKind {
        group,
        version,
        kind: types.kind.clone(),
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
    use kube::core::{ObjectMeta, TypeMeta};
    use motif_cluster::mem::MemStore;

    fn desired_deployment() -> DynamicObject {
        DynamicObject {
            types: Some(TypeMeta {
                api_version: "apps/v1".to_string(),
                kind: "Deployment".to_string(),
            }),
            metadata: ObjectMeta {
                name: Some("foo".to_string()),
                namespace: Some("ns1".to_string()),
                owner_references: Some(vec![OwnerReference {
                    api_version: "apps/v1".to_string(),
                    kind: "Pattern".to_string(),
                    name: "parent1".to_string(),
                    uid: "9a5e7c10-71d2-4b5e-b1fd-4d2f8a6c3e90".to_string(),
                    ..OwnerReference::default()
                }]),
                ..ObjectMeta::default()
            },
            data: serde_json::json!({ "spec": { "replicas": 2 } }),
        }
    }

    #[tokio::test]
    async fn generated_names_are_rejected_before_any_store_call() {
        let store = MemStore::new();
        let mut desired = desired_deployment();
        desired.metadata.name = None;
        desired.metadata.generate_name = Some("web-".to_string());

        let err = apply(&store, &desired).await.unwrap_err();
        match err {
            ApplyError::Unsupported(msg) => {
                assert!(msg.contains("cannot combine generated names with apply"), "msg={msg}")
            }
            other => panic!("expected Unsupported, got {other:?}"),
        }
        assert!(store.applies().is_empty(), "store must not be touched");
    }

    #[tokio::test]
    async fn unnamed_object_is_rejected() {
        let store = MemStore::new();
        let mut desired = desired_deployment();
        desired.metadata.name = None;

        assert!(matches!(
            apply(&store, &desired).await,
            Err(ApplyError::Unsupported(_))
        ));
        assert!(store.applies().is_empty());
    }

    #[tokio::test]
    async fn missing_type_meta_is_rejected() {
        let store = MemStore::new();
        let mut desired = desired_deployment();
        desired.types = None;

        assert!(matches!(
            apply(&store, &desired).await,
            Err(ApplyError::Unsupported(_))
        ));
        assert!(store.applies().is_empty());
    }

    #[tokio::test]
    async fn first_apply_creates_with_server_identity() -> anyhow::Result<()> {
        let store = MemStore::new();
        let observed = apply(&store, &desired_deployment()).await?;

        let uid = observed.metadata.uid.as_deref().expect("server-assigned uid");
        assert!(!uid.is_empty());
        assert_eq!(observed.metadata.name.as_deref(), Some("foo"));

        let calls = store.applies();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0].gvk.group, "apps");
        assert_eq!(calls[0].gvk.kind, "Deployment");
        assert_eq!(calls[0].namespace.as_deref(), Some("ns1"));
        assert_eq!(calls[0].field_manager, DEFAULT_FIELD_MANAGER);
        assert!(calls[0].force);
        Ok(())
    }

    #[tokio::test]
    async fn repeated_apply_converges_to_the_same_state() -> anyhow::Result<()> {
        let store = MemStore::new();
        let desired = desired_deployment();

        let first = apply(&store, &desired).await?;
        let second = apply(&store, &desired).await?;

        assert_eq!(first.metadata.uid, second.metadata.uid);
        assert_eq!(first.data, second.data);
        assert_eq!(
            first.metadata.owner_references,
            second.metadata.owner_references
        );
        Ok(())
    }

    #[tokio::test]
    async fn store_failures_propagate_unchanged() {
        let store = MemStore::new();
        store.fail_applies();

        let err = apply(&store, &desired_deployment()).await.unwrap_err();
        assert!(matches!(err, ApplyError::Store(StoreError::Api(_))));
    }

    #[tokio::test]
    async fn core_group_kinds_resolve_without_a_group() -> anyhow::Result<()> {
        let store = MemStore::new();
        let mut desired = desired_deployment();
        desired.types = Some(TypeMeta {
            api_version: "v1".to_string(),
            kind: "ConfigMap".to_string(),
        });
        desired.data = serde_json::json!({ "data": { "k": "v" } });

        apply(&store, &desired).await?;
        let calls = store.applies();
        assert_eq!(calls[0].gvk.group, "");
        assert_eq!(calls[0].gvk.version, "v1");
        assert_eq!(calls[0].gvk.kind, "ConfigMap");
        Ok(())
    }
}
