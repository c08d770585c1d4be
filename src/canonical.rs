use std::collections::BTreeMap;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

use crate::error::Rejection;

/// Hash algorithm name used in [`FileMeta::hashes`].
pub const SHA256: &str = "sha256";

/// Serializes a value to JCS (RFC 8785) canonical JSON.
///
/// This is the byte representation signatures are computed over and key ids are derived from.
pub fn canonical_json<T: Serialize>(value: &T) -> Result<Vec<u8>> {
    let jcs = serde_jcs::to_string(value)?;
    Ok(jcs.into_bytes())
}

/// Hex encoded sha256 of `data`.
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// Length, hashes and (optionally) version of a metadata document as listed by the document
/// that references it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMeta {
    /// Exact length in bytes
    pub length: u64,
    /// Hash algorithm name to hex digest
    pub hashes: BTreeMap<String, String>,
    /// Version of the referenced document, when the referencing role records it
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub version: Option<u64>,
}

impl FileMeta {
    /// Describes `data` with its length and sha256.
    pub fn from_bytes(data: &[u8], version: Option<u64>) -> Self {
        let mut hashes = BTreeMap::new();
        hashes.insert(SHA256.to_owned(), sha256_hex(data));
        Self {
            length: data.len() as u64,
            hashes,
            version,
        }
    }

    /// Checks that `data` has exactly the declared length and sha256.
    pub fn check(&self, data: &[u8]) -> Result<(), Rejection> {
        let actual_length = data.len() as u64;
        if actual_length != self.length {
            return Err(Rejection::LengthMismatch {
                expected: self.length,
                actual: actual_length,
            });
        }

        let expected = self
            .hashes
            .get(SHA256)
            .ok_or_else(|| Rejection::Malformed("no sha256 hash listed".to_owned()))?;
        let actual = sha256_hex(data);
        if !expected.eq_ignore_ascii_case(&actual) {
            return Err(Rejection::HashMismatch {
                expected: expected.clone(),
                actual,
            });
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn canonical_json_sorts_keys() {
        let a = canonical_json(&json!({"b": 1, "a": [true, null]})).unwrap();
        let b = canonical_json(&json!({"a": [true, null], "b": 1})).unwrap();
        assert_eq!(a, b);
        assert_eq!(a, br#"{"a":[true,null],"b":1}"#.to_vec());
    }

    #[test]
    fn file_meta_detects_changes() {
        let meta = FileMeta::from_bytes(b"hello world", Some(2));
        assert!(meta.check(b"hello world").is_ok());

        assert_eq!(
            meta.check(b"hello"),
            Err(Rejection::LengthMismatch {
                expected: 11,
                actual: 5
            })
        );
        assert!(matches!(
            meta.check(b"hello worle"),
            Err(Rejection::HashMismatch { .. })
        ));
    }

    #[test]
    fn file_meta_requires_sha256() {
        let meta = FileMeta {
            length: 3,
            hashes: BTreeMap::new(),
            version: None,
        };
        assert!(matches!(meta.check(b"abc"), Err(Rejection::Malformed(_))));
    }
}
