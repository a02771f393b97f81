//! Durable key-value storage abstraction for Compliance Harness.
//!
//! The [`Store`] trait is the only shared mutable resource of the engine.
//! Run records, cached document text, chunk/embedding sets and index
//! fingerprints all live under string keys built by [`keys`]. No operation
//! spans more than one key, so backends need no cross-key transactions.
//!
//! Implementations must be `Send + Sync` to work with async runtimes.

pub mod memory;

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

/// Abstract key-value backend.
///
/// | Method | Purpose |
/// |--------|---------|
/// | [`get`](Store::get) | Read a JSON value, `None` when absent |
/// | [`put`](Store::put) | Insert or overwrite a JSON value |
#[async_trait]
pub trait Store: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<Value>>;

    async fn put(&self, key: &str, value: &Value) -> Result<()>;
}

/// Read `key` and decode it into `T`.
pub async fn get_json<T: DeserializeOwned>(store: &dyn Store, key: &str) -> Result<Option<T>> {
    match store.get(key).await? {
        Some(value) => {
            let decoded = serde_json::from_value(value)
                .with_context(|| format!("Failed to decode stored value at {}", key))?;
            Ok(Some(decoded))
        }
        None => Ok(None),
    }
}

/// Encode `value` and write it under `key`.
pub async fn put_json<T: Serialize + ?Sized>(store: &dyn Store, key: &str, value: &T) -> Result<()> {
    let encoded = serde_json::to_value(value)
        .with_context(|| format!("Failed to encode value for {}", key))?;
    store.put(key, &encoded).await
}

/// Key layout.
pub mod keys {
    pub fn run(run_id: &str) -> String {
        format!("run:{}", run_id)
    }

    pub fn document_text(document_id: &str) -> String {
        format!("doc:{}:text", document_id)
    }

    pub fn document_chunks(document_id: &str) -> String {
        format!("doc:{}:chunks", document_id)
    }

    pub fn index_fingerprint(index_name: &str) -> String {
        format!("search:index:{}:fingerprint", index_name)
    }
}

#[cfg(test)]
mod tests {
    use super::memory::InMemoryStore;
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, PartialEq, Serialize, Deserialize)]
    struct Sample {
        n: u32,
    }

    #[tokio::test]
    async fn test_json_helpers_roundtrip_typed_value() {
        let store = InMemoryStore::new();
        put_json(&store, "k", &Sample { n: 3 }).await.unwrap();
        let back: Option<Sample> = get_json(&store, "k").await.unwrap();
        assert_eq!(back, Some(Sample { n: 3 }));
        let missing: Option<Sample> = get_json(&store, "nope").await.unwrap();
        assert!(missing.is_none());
    }

    #[tokio::test]
    async fn test_get_json_reports_key_on_decode_error() {
        let store = InMemoryStore::new();
        store.put("k", &Value::from("not a sample")).await.unwrap();
        let err = get_json::<Sample>(&store, "k").await.unwrap_err();
        assert!(err.to_string().contains("k"));
    }

    #[test]
    fn test_key_layout() {
        assert_eq!(keys::run("abc"), "run:abc");
        assert_eq!(keys::document_text("ley-1"), "doc:ley-1:text");
        assert_eq!(keys::document_chunks("ley-1"), "doc:ley-1:chunks");
        assert_eq!(
            keys::index_fingerprint("compliance-chile"),
            "search:index:compliance-chile:fingerprint"
        );
    }
}
