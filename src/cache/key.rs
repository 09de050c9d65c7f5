//! Deterministic cache key derivation.

use std::collections::{BTreeMap, HashSet};

use serde_json::{Map, Value};
use sha2::{Digest, Sha256};

/// Prefix shared by every key written for `resource`.
pub fn resource_prefix(resource: &str) -> String {
    format!("cache:{}:", resource)
}

/// Prefix shared by every key written for `resource` and `operation`.
pub fn operation_prefix(resource: &str, operation: &str) -> String {
    format!("cache:{}:{}:", resource, operation)
}

/// Derive `cache:{resource}:{operation}:{hash}`.
///
/// Params named in `volatile` are dropped; the rest are hashed in key order
/// so call-time metadata never splits one logical request across keys.
pub fn derive_key(
    resource: &str,
    operation: &str,
    params: &Map<String, Value>,
    volatile: &HashSet<String>,
) -> String {
    let stable: BTreeMap<&String, &Value> = params
        .iter()
        .filter(|(k, _)| !volatile.contains(k.as_str()))
        .collect();

    // Serializing a map of references cannot fail.
    let canonical = serde_json::to_string(&stable).unwrap_or_default();
    let digest = Sha256::digest(canonical.as_bytes());
    let hash = hex::encode(digest);

    format!("{}{}", operation_prefix(resource, operation), &hash[..16])
}
