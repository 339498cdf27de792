//! Pluggable fingerprint digests.
//!
//! SHA-256 is the default; BLAKE3 is available for callers that prefer it.
//! Fingerprints are lowercase hex strings of the raw digest.

use sha2::{Digest, Sha256};

/// The digest algorithm backing fingerprints.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum HashBackend {
    #[default]
    Sha256,
    Blake3,
}

impl HashBackend {
    /// Digest a canonical byte string into a hex fingerprint.
    pub fn digest(&self, data: &[u8]) -> String {
        match self {
            Self::Sha256 => hex::encode(Sha256::digest(data)),
            Self::Blake3 => hex::encode(blake3::hash(data).as_bytes()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn digests_are_deterministic() {
        for backend in [HashBackend::Sha256, HashBackend::Blake3] {
            assert_eq!(backend.digest(b"abc"), backend.digest(b"abc"));
            assert_ne!(backend.digest(b"abc"), backend.digest(b"abd"));
        }
    }

    #[test]
    fn backends_disagree_with_each_other() {
        assert_ne!(
            HashBackend::Sha256.digest(b"abc"),
            HashBackend::Blake3.digest(b"abc")
        );
    }

    #[test]
    fn sha256_known_vector() {
        assert_eq!(
            HashBackend::Sha256.digest(b""),
            "e3b0c44298fc1c149afbf4c8996fb92427ae41e4649b934ca495991b7852b855"
        );
    }
}
