//! In-memory store double.
//!
//! Deterministic on purpose: uids and resource versions come from a monotonic
//! serial, and every apply call is recorded so tests can assert on the target,
//! field manager and force flag that reached the store.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Mutex;

use async_trait::async_trait;
use kube::core::{DynamicObject, ErrorResponse, GroupVersionKind};
use uuid::Uuid;

use crate::{ClusterStore, StoreError};

/// A recorded `apply_object` invocation.
#[derive(Debug, Clone)]
pub struct AppliedCall {
    pub gvk: GroupVersionKind,
    pub namespace: Option<String>,
    pub name: String,
    pub field_manager: String,
    pub force: bool,
}

#[derive(Default)]
struct Inner {
    namespaces: BTreeSet<String>,
    objects: BTreeMap<(String, String), DynamicObject>,
    applies: Vec<AppliedCall>,
    fail_namespace_lookups: bool,
    fail_applies: bool,
    serial: u64,
}

/// `ClusterStore` double holding namespaces and objects in memory.
#[derive(Default)]
pub struct MemStore {
    inner: Mutex<Inner>,
}

impl MemStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_namespace(&self, name: &str) {
        self.inner
            .lock()
            .unwrap()
            .namespaces
            .insert(name.to_string());
    }

    /// Make every subsequent namespace lookup fail with a transport-style error.
    pub fn fail_namespace_lookups(&self) {
        self.inner.lock().unwrap().fail_namespace_lookups = true;
    }

    /// Make every subsequent apply fail with a transport-style error. The call
    /// is still recorded before it fails.
    pub fn fail_applies(&self) {
        self.inner.lock().unwrap().fail_applies = true;
    }

    /// Every apply call seen so far, oldest first.
    pub fn applies(&self) -> Vec<AppliedCall> {
        self.inner.lock().unwrap().applies.clone()
    }

    /// Stored object at `(namespace, name)`, if any.
    pub fn object(&self, namespace: Option<&str>, name: &str) -> Option<DynamicObject> {
        let key = (namespace.unwrap_or("").to_string(), name.to_string());
        self.inner.lock().unwrap().objects.get(&key).cloned()
    }

    fn outage() -> StoreError {
        StoreError::Api(kube::Error::Api(ErrorResponse {
            status: "Failure".to_string(),
            message: "injected outage".to_string(),
            reason: "ServiceUnavailable".to_string(),
            code: 503,
        }))
    }
}

#[async_trait]
impl ClusterStore for MemStore {
    async fn lookup_namespace(&self, name: &str) -> Result<bool, StoreError> {
        let inner = self.inner.lock().unwrap();
        if inner.fail_namespace_lookups {
            return Err(Self::outage());
        }
        Ok(inner.namespaces.contains(name))
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
        let mut inner = self.inner.lock().unwrap();
        inner.applies.push(AppliedCall {
            gvk: gvk.clone(),
            namespace: namespace.map(str::to_string),
            name: name.to_string(),
            field_manager: field_manager.to_string(),
            force,
        });
        if inner.fail_applies {
            return Err(Self::outage());
        }

        let mut incoming: DynamicObject =
            serde_json::from_value(payload.clone()).map_err(|e| {
                StoreError::Api(kube::Error::Api(ErrorResponse {
                    status: "Failure".to_string(),
                    message: format!("payload rejected: {e}"),
                    reason: "Invalid".to_string(),
                    code: 422,
                }))
            })?;

        let key = (namespace.unwrap_or("").to_string(), name.to_string());
        inner.serial += 1;
        let serial = inner.serial;
        // uid is identity: assigned once at creation, stable across merges
        let uid = match inner.objects.get(&key) {
            Some(existing) => existing.metadata.uid.clone(),
            None => Some(Uuid::from_u128(u128::from(serial)).to_string()),
        };
        incoming.metadata.name = Some(name.to_string());
        incoming.metadata.namespace = namespace.map(str::to_string);
        incoming.metadata.uid = uid;
        incoming.metadata.resource_version = Some(serial.to_string());
        inner.objects.insert(key, incoming.clone());
        Ok(incoming)
    }
}
