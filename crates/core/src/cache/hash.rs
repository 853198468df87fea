//! Request-addressed cache key generation.

use sha2::{Digest, Sha256};

/// Compute the cache key for a request.
///
/// The method is uppercased so `get` and `GET` share an entry. The URL is
/// hashed exactly as given, query string included.
pub fn compute_cache_key(method: &str, url: &str) -> String {
    let mut hasher = Sha256::new();
    hasher.update(method.to_ascii_uppercase().as_bytes());
    hasher.update(b"\n");
    hasher.update(url.as_bytes());
    hex::encode(hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hash_stability() {
        let hash1 = compute_cache_key("GET", "https://app.test/");
        let hash2 = compute_cache_key("GET", "https://app.test/");
        assert_eq!(hash1, hash2);
    }

    #[test]
    fn test_hash_method_case_insensitive() {
        assert_eq!(compute_cache_key("get", "https://app.test/"), compute_cache_key("GET", "https://app.test/"));
    }

    #[test]
    fn test_hash_different_method() {
        assert_ne!(compute_cache_key("GET", "https://app.test/"), compute_cache_key("POST", "https://app.test/"));
    }

    #[test]
    fn test_hash_query_is_significant() {
        assert_ne!(
            compute_cache_key("GET", "https://app.test/api/users?page=1"),
            compute_cache_key("GET", "https://app.test/api/users?page=2")
        );
    }

    #[test]
    fn test_hash_format() {
        let hash = compute_cache_key("GET", "https://app.test/");
        assert_eq!(hash.len(), 64);
        assert!(hash.chars().all(|c| c.is_ascii_hexdigit()));
    }
}
