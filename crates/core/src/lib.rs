//! Motif core types: parent identity and the owner-reference stamp.
//!
//! Objects under management are plain `kube::core::DynamicObject` values; the
//! metadata surface this crate reasons about is `ObjectMeta`, which every
//! concrete object variant (typed or dynamic) can expose.

#![forbid(unsafe_code)]

pub mod owner;
pub mod render;

use k8s_openapi::apimachinery::pkg::apis::meta::v1::OwnerReference;
use serde::{Deserialize, Serialize};

/// Read access to the four identity fields a parent resource must expose so
/// that the children it manages can be stamped with an owner reference.
pub trait OwnerIdentity {
    fn api_version(&self) -> &str;
    fn kind(&self) -> &str;
    fn name(&self) -> &str;
    fn uid(&self) -> &str;
}

/// Concrete parent identity for callers that don't hold a typed resource.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ParentId {
    pub api_version: String,
    pub kind: String,
    pub name: String,
    pub uid: String,
}

impl OwnerIdentity for ParentId {
    fn api_version(&self) -> &str {
        &self.api_version
    }
    fn kind(&self) -> &str {
        &self.kind
    }
    fn name(&self) -> &str {
        &self.name
    }
    fn uid(&self) -> &str {
        &self.uid
    }
}

/// Build the owner reference that children of `parent` carry. The reference
/// names the parent by group/version, kind, name and uid; the store's garbage
/// collection keys off it when the parent goes away.
pub fn owner_reference<P: OwnerIdentity + ?Sized>(parent: &P) -> OwnerReference {
    OwnerReference {
        api_version: parent.api_version().to_string(),
        kind: parent.kind().to_string(),
        name: parent.name().to_string(),
        uid: parent.uid().to_string(),
        ..OwnerReference::default()
    }
}
