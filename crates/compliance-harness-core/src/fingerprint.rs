//! Content fingerprints for cache invalidation.
//!
//! A fingerprint is the SHA-256 (lowercase hex) of the canonical JSON
//! encoding of a document-set description. Derived indexes store the
//! fingerprint they were built from; a mismatch means the index is stale.

use anyhow::Result;
use serde::Serialize;
use sha2::{Digest, Sha256};

use crate::models::DocumentMetadata;

/// Fingerprint of any serializable description.
///
/// Struct fields serialize in declaration order and `serde_json` maps are
/// key-sorted, so equal values always produce equal fingerprints.
pub fn fingerprint<T: Serialize + ?Sized>(value: &T) -> Result<String> {
    let canonical = serde_json::to_vec(value)?;
    let mut hasher = Sha256::new();
    hasher.update(&canonical);
    Ok(format!("{:x}", hasher.finalize()))
}

/// Fingerprint of an ordered document set.
pub fn fingerprint_documents(documents: &[DocumentMetadata]) -> Result<String> {
    fingerprint(documents)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn doc(id: &str, url: &str) -> DocumentMetadata {
        DocumentMetadata {
            id: id.to_string(),
            url: url.to_string(),
            title: format!("Ley {}", id),
            language: "es".to_string(),
            topics: vec!["reportes".to_string()],
        }
    }

    #[test]
    fn test_stable_for_equal_input() {
        let docs = vec![doc("a", "https://x/a.pdf"), doc("b", "https://x/b.pdf")];
        let again = docs.clone();
        assert_eq!(
            fingerprint_documents(&docs).unwrap(),
            fingerprint_documents(&again).unwrap()
        );
    }

    #[test]
    fn test_hex_sha256_shape() {
        let fp = fingerprint_documents(&[doc("a", "u")]).unwrap();
        assert_eq!(fp.len(), 64);
        assert!(fp.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_changes_when_any_field_changes() {
        let base = vec![doc("a", "https://x/a.pdf"), doc("b", "https://x/b.pdf")];
        let base_fp = fingerprint_documents(&base).unwrap();

        let mut changed = base.clone();
        changed[1].url = "https://x/b-v2.pdf".to_string();
        assert_ne!(base_fp, fingerprint_documents(&changed).unwrap());

        let mut topics = base.clone();
        topics[0].topics.push("uaf".to_string());
        assert_ne!(base_fp, fingerprint_documents(&topics).unwrap());
    }

    #[test]
    fn test_order_sensitive() {
        let a = vec![doc("a", "u1"), doc("b", "u2")];
        let b = vec![doc("b", "u2"), doc("a", "u1")];
        assert_ne!(
            fingerprint_documents(&a).unwrap(),
            fingerprint_documents(&b).unwrap()
        );
    }
}
