//! Content fingerprints for change detection.
//!
//! Fingerprints are SHA-256 hex digests. They only need to tell "same" from
//! "different" between two imports, so they are never compared across
//! algorithms or treated as a security boundary.

use sha2::{Digest, Sha256};

/// Fingerprint of a raw document, computed over the exact bytes received.
pub fn content_fingerprint(content: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(content);
    format!("{:x}", hasher.finalize())
}

/// Fingerprint of an aggregate of `(title number, word count)` members.
///
/// Members are sorted by title number before hashing, so the result depends
/// only on the set and not on the order it was collected in. Each member is
/// encoded as `"{title}:{words};"`. The empty set hashes the empty string.
pub fn aggregate_fingerprint(members: &[(i64, i64)]) -> String {
    let mut sorted = members.to_vec();
    sorted.sort_unstable();

    let mut hasher = Sha256::new();
    for (title, words) in &sorted {
        hasher.update(format!("{}:{};", title, words).as_bytes());
    }
    format!("{:x}", hasher.finalize())
}

#[cfg(test)]
mod tests {
    use super::*;

    const EMPTY_SHA256: &str = "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855";

    #[test]
    fn test_content_fingerprint_is_stable() {
        assert_eq!(content_fingerprint(b"X"), content_fingerprint(b"X"));
        assert_ne!(content_fingerprint(b"X"), content_fingerprint(b"Y"));
        assert_eq!(content_fingerprint(b""), EMPTY_SHA256);
    }

    #[test]
    fn test_aggregate_ignores_member_order() {
        let a = aggregate_fingerprint(&[(3, 10), (1, 5), (2, 7)]);
        let b = aggregate_fingerprint(&[(1, 5), (2, 7), (3, 10)]);
        assert_eq!(a, b);
    }

    #[test]
    fn test_aggregate_tracks_word_counts() {
        let a = aggregate_fingerprint(&[(1, 5)]);
        let b = aggregate_fingerprint(&[(1, 6)]);
        assert_ne!(a, b);
    }

    #[test]
    fn test_aggregate_of_empty_set() {
        assert_eq!(aggregate_fingerprint(&[]), EMPTY_SHA256);
    }

    #[test]
    fn test_aggregate_matches_encoded_input() {
        assert_eq!(
            aggregate_fingerprint(&[(2, 20), (1, 10)]),
            content_fingerprint(b"1:10;2:20;")
        );
    }
}
