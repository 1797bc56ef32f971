//! Content-addressed caching.
//!
//! Expensive results are keyed by the SHA-256 of the uploaded file, optionally
//! combined with the parameters of the operation that produced them:
//!
//! | Artifact            | Key                                               |
//! |---------------------|---------------------------------------------------|
//! | extracted audio     | source hash                                       |
//! | original transcript | source hash + `original`                          |
//! | translation         | source hash + target language                     |
//! | dubbed audio        | derived: language, transcript id, voice assignment |
//! | final video         | derived: language, dubbed audio key               |
//! | lip-synced video    | derived: final video key                          |

pub mod content;
pub mod expiring;

pub use content::ContentCache;
pub use expiring::ExpiringCache;

use sha2::{Digest, Sha256};

/// SHA-256 of raw file bytes as 64 lower-case hex characters.
pub fn compute_content_hash(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

/// Cache key for a result that depends on more than the source bytes.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CacheKey(String);

impl CacheKey {
    /// Derive a key from the source hash, the producing operation and its parameters.
    ///
    /// Parameters are hashed in the order given, so callers must pass them in a fixed order.
    pub fn derive(source_hash: &str, operation: &str, params: &[(&str, &str)]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(source_hash.as_bytes());
        hasher.update(b"\n");
        hasher.update(operation.as_bytes());
        for (name, value) in params {
            hasher.update(b"\n");
            hasher.update(name.as_bytes());
            hasher.update(b"=");
            hasher.update(value.as_bytes());
        }
        Self(hex::encode(hasher.finalize()))
    }

    /// Key of a language-independent artifact: the source hash itself.
    pub fn source(source_hash: &str) -> Self {
        Self(source_hash.to_string())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_content_hash_is_deterministic() {
        let a = compute_content_hash(b"same bytes");
        let b = compute_content_hash(b"same bytes");
        assert_eq!(a, b);
        assert_eq!(a.len(), 64);
        assert!(a.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }

    #[test]
    fn test_single_byte_changes_hash() {
        let a = compute_content_hash(b"video-bytes-0");
        let b = compute_content_hash(b"video-bytes-1");
        assert_ne!(a, b);
    }

    #[test]
    fn test_known_vector() {
        assert_eq!(
            compute_content_hash(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }

    #[test]
    fn test_derived_keys_separate_languages() {
        let es = CacheKey::derive("abc123", "dubbed_audio", &[("language", "es")]);
        let fr = CacheKey::derive("abc123", "dubbed_audio", &[("language", "fr")]);
        assert_ne!(es, fr);
        assert_eq!(
            es,
            CacheKey::derive("abc123", "dubbed_audio", &[("language", "es")])
        );
        assert_ne!(
            es,
            CacheKey::derive("abc123", "final_video", &[("language", "es")])
        );
        assert_eq!(es.as_str().len(), 64);
        assert_eq!(CacheKey::source("abc123").as_str(), "abc123");
    }
}
