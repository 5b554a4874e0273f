//! Content hashing.
//!
//! Digests are lowercase hex MD5. The same digest is used for chunk
//! integrity, whole-file integrity and as the deduplication key.

use md5::{Digest, Md5};

use crate::error::AppError;

/// Length of a hex-encoded digest.
pub const HASH_HEX_LEN: usize = 32;

/// Stateless one-shot hasher.
pub struct ContentHasher;

impl ContentHasher {
    /// Hex digest of `bytes`.
    pub fn digest(bytes: &[u8]) -> String {
        hex::encode(Md5::digest(bytes))
    }

    /// Compare a computed digest with a client-declared one.
    pub fn matches(computed: &str, declared: &str) -> bool {
        computed.eq_ignore_ascii_case(declared.trim())
    }
}

/// Incremental digest for streaming passes (chunk merge).
#[derive(Clone, Default)]
pub struct ContentDigest {
    inner: Md5,
    bytes: u64,
}

impl ContentDigest {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn update(&mut self, data: &[u8]) {
        self.inner.update(data);
        self.bytes += data.len() as u64;
    }

    /// Number of bytes fed so far.
    pub fn len(&self) -> u64 {
        self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.bytes == 0
    }

    pub fn finalize(self) -> String {
        hex::encode(self.inner.finalize())
    }
}

/// Validate a client-supplied digest and return its canonical lowercase form.
pub fn normalize_hash(input: &str) -> Result<String, AppError> {
    let trimmed = input.trim();
    if trimmed.len() != HASH_HEX_LEN || !trimmed.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(AppError::InvalidInput(format!(
            "content hash must be {} hex characters, got {:?}",
            HASH_HEX_LEN, input
        )));
    }
    Ok(trimmed.to_ascii_lowercase())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digest_of_known_input() {
        assert_eq!(
            ContentHasher::digest(b"hello world"),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
        assert_eq!(
            ContentHasher::digest(b""),
            "d41d8cd98f00b204e9800998ecf8427e"
        );
    }

    #[test]
    fn incremental_digest_equals_one_shot() {
        let data: Vec<u8> = (0..10_000u32).map(|i| (i % 251) as u8).collect();
        let mut digest = ContentDigest::new();
        for part in data.chunks(977) {
            digest.update(part);
        }
        assert_eq!(digest.len(), data.len() as u64);
        assert_eq!(digest.finalize(), ContentHasher::digest(&data));
    }

    #[test]
    fn normalize_rejects_malformed() {
        assert!(normalize_hash("abc").is_err());
        assert!(normalize_hash(&"z".repeat(32)).is_err());
        assert_eq!(
            normalize_hash(" 5EB63BBBE01EEED093CB22BB8F5ACDC3 ").unwrap(),
            "5eb63bbbe01eeed093cb22bb8f5acdc3"
        );
    }

    #[test]
    fn matches_is_case_insensitive() {
        assert!(ContentHasher::matches(
            "5eb63bbbe01eeed093cb22bb8f5acdc3",
            "5EB63BBBE01EEED093CB22BB8F5ACDC3"
        ));
        assert!(!ContentHasher::matches("aa", "ab"));
    }
}
