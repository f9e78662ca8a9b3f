//! Deterministic cache key generation.

use sha2::{Digest, Sha256};

/// Compute a cache key from a namespace and a canonical serialized request.
///
/// The namespace keeps identical payloads for different resource types apart.
pub fn compute_cache_key(namespace: &str, canonical: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(namespace.as_bytes());
    hasher.update(b"\n");
    hasher.update(canonical.as_bytes());
    format!("{namespace}:{}", hex::encode(hasher.finalize()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let key1 = compute_cache_key("jobs", r#"{"query":"developer"}"#);
        let key2 = compute_cache_key("jobs", r#"{"query":"developer"}"#);
        assert_eq!(key1, key2);
    }

    #[test]
    fn test_hash_different_namespace() {
        let jobs = compute_cache_key("jobs", r#"{"query":"developer"}"#);
        let offers = compute_cache_key("offers", r#"{"query":"developer"}"#);
        assert_ne!(jobs, offers);
    }

    #[test]
    fn test_hash_different_payload() {
        let a = compute_cache_key("jobs", r#"{"page":1}"#);
        let b = compute_cache_key("jobs", r#"{"page":2}"#);
        assert_ne!(a, b);
    }

    #[test]
    fn test_hash_format() {
        let key = compute_cache_key("jobs", "{}");
        let digest = key.strip_prefix("jobs:").unwrap();
        assert_eq!(digest.len(), 64);
        assert!(digest.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
