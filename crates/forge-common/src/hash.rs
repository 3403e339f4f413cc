//! Content hashing for child resources
//!
//! The desired form of every child resource is hashed and the digest stored
//! as an annotation on the object that gets created. A later pass compares
//! the digest of its freshly rendered object with the stored one to decide
//! between leaving the child alone and replacing it.

use aws_lc_rs::digest;
use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use kube::Resource;
use serde::Serialize;

use crate::Result;

/// Annotation carrying the hash of the desired spec a child was created from
pub const LAST_APPLIED_HASH_ANNOTATION: &str = "forge.dev/last-applied-hash";

/// SHA-512 over the canonical JSON form of `obj`, base64 encoded.
///
/// Every map in the object model is ordered, so equal objects always
/// serialize to equal bytes.
pub fn content_hash<T: Serialize>(obj: &T) -> Result<String> {
    let bytes = serde_json::to_vec(obj)?;
    let hash = digest::digest(&digest::SHA512, &bytes);
    Ok(STANDARD.encode(hash.as_ref()))
}

/// Hash `obj` without its own hash annotation and store the result on it.
///
/// Returns the digest that was stored.
pub fn stamp_hash<K: Resource + Serialize>(obj: &mut K) -> Result<String> {
    if let Some(annotations) = obj.meta_mut().annotations.as_mut() {
        annotations.remove(LAST_APPLIED_HASH_ANNOTATION);
    }
    let hash = content_hash(obj)?;
    obj.meta_mut()
        .annotations
        .get_or_insert_with(Default::default)
        .insert(LAST_APPLIED_HASH_ANNOTATION.to_string(), hash.clone());
    Ok(hash)
}

/// Hash recorded on an existing object, if any
pub fn stored_hash<K: Resource>(obj: &K) -> Option<&str> {
    obj.meta()
        .annotations
        .as_ref()
        .and_then(|a| a.get(LAST_APPLIED_HASH_ANNOTATION))
        .map(String::as_str)
}
