//! Hashing System - SHA-1 identity digests, SHA-256 artifact digests
//!
//! The identity digest is a fixed wire contract shared by issuance and
//! verification. Do not change the algorithm or the truncation length.

use serde::Serialize;
use serde_json::{to_string, Value};
use sha1::Sha1;
use sha2::{Digest, Sha256};

/// Number of hex characters kept from the identity digest.
pub const IDENTITY_HASH_LEN: usize = 8;

/// Compute SHA-256 hash of bytes, return hex string
pub fn sha256_hex(data: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(data);
    hex::encode(hasher.finalize())
}

/// First eight lowercase hex characters of SHA-1 over `data`.
pub fn sha1_hash8(data: &[u8]) -> String {
    let mut hasher = Sha1::new();
    hasher.update(data);
    let mut digest = hex::encode(hasher.finalize());
    digest.truncate(IDENTITY_HASH_LEN);
    digest
}

/// Convert to canonical JSON (sorted keys, no whitespace)
pub fn canonical_json<T: Serialize>(value: &T) -> Result<String, serde_json::Error> {
    let v: Value = serde_json::to_value(value)?;
    let sorted = sort_value(&v);
    to_string(&sorted)
}

fn sort_value(v: &Value) -> Value {
    match v {
        Value::Object(map) => {
            let mut sorted: Vec<_> = map.iter().collect();
            sorted.sort_by(|a, b| a.0.cmp(b.0));
            let sorted_map: serde_json::Map<String, Value> = sorted
                .into_iter()
                .map(|(k, v)| (k.clone(), sort_value(v)))
                .collect();
            Value::Object(sorted_map)
        }
        Value::Array(arr) => Value::Array(arr.iter().map(sort_value).collect()),
        _ => v.clone(),
    }
}

/// Digest recorded in the ledger for a composed ticket file.
pub fn ticket_digest(png_bytes: &[u8]) -> String {
    sha256_hex(png_bytes)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_canonical_json_sorted() {
        let obj = json!({"z": 1, "a": 2, "m": 3});
        let canonical = canonical_json(&obj).unwrap();
        assert_eq!(canonical, r#"{"a":2,"m":3,"z":1}"#);
    }

    #[test]
    fn test_sha1_hash8_known_vector() {
        // sha1("abc") = a9993e364706816aba3e25717850c26c9cd0d89d
        assert_eq!(sha1_hash8(b"abc"), "a9993e36");
    }

    #[test]
    fn test_sha256_known_vector() {
        assert_eq!(
            sha256_hex(b"abc"),
            "ba7816bf8f01cfea414140de5dae2223b00361a396177a9cb410ff61f20015ad"
        );
    }

    #[test]
    fn test_hash8_length_and_case() {
        let h = sha1_hash8("9/14/2025 10:00:00a@b.com".as_bytes());
        assert_eq!(h.len(), IDENTITY_HASH_LEN);
        assert!(h.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
}
