//! Human-readable object rendering for error reports.

use serde::Serialize;

/// YAML rendering of `object` for logs and error messages.
///
/// A marshalling failure yields a fallback string carrying the cause instead
/// of an error: this runs on failure paths and must not mask the problem that
/// got us here.
pub fn object_yaml<T: Serialize + ?Sized>(object: &T) -> String {
    match serde_yaml::to_string(object) {
        Ok(s) => s,
        Err(e) => format!("error rendering object: {e}"),
    }
}
