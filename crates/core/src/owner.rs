//! Ownership predicates.
//!
//! An owning object's identity is its API group + kind + name; the version an
//! owner was observed under and its uid play no part in the comparison. These
//! checks back adoption decisions: before an observed object is updated as
//! "ours", the orchestrator verifies it is at least co-owned by everything the
//! expected object names.

use k8s_openapi::apimachinery::pkg::apis::meta::v1::{ObjectMeta, OwnerReference};

/// Group component of an `apiVersion` string: "apps/v1" -> "apps", "v1" -> "".
/// More than one separator cannot be a group/version pair; `None` marks it
/// malformed so the caller can refuse the match.
fn api_group(api_version: &str) -> Option<&str> {
    match api_version.split_once('/') {
        None => Some(""),
        Some((group, version)) if !version.contains('/') => Some(group),
        Some(_) => None,
    }
}

/// True when `a` and `b` refer to the same owning object.
///
/// A reference with an unparseable apiVersion matches nothing: it could never
/// equal a well-formed one, and defaulting to a match could hand an unrelated
/// object over for adoption.
pub fn same_owner(a: &OwnerReference, b: &OwnerReference) -> bool {
    let (Some(a_group), Some(b_group)) = (api_group(&a.api_version), api_group(&b.api_version))
    else {
        return false;
    };
    a_group == b_group && a.kind == b.kind && a.name == b.name
}

/// True when `meta` carries an owner reference denoting the same object as `wanted`.
pub fn owned_by(meta: &ObjectMeta, wanted: &OwnerReference) -> bool {
    meta.owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .any(|r| same_owner(r, wanted))
}

/// True when every owner reference on `expected` is satisfied by `observed`.
///
/// One-directional on purpose: `observed` may carry additional owners and
/// still pass. The question answered is "is this object at least co-owned by
/// everything we expect", not "do the owner sets match exactly".
pub fn owned_by_same(expected: &ObjectMeta, observed: &ObjectMeta) -> bool {
    expected
        .owner_references
        .as_deref()
        .unwrap_or_default()
        .iter()
        .all(|r| owned_by(observed, r))
}
