//! Canonical packed encoding.
//!
//! Every content-addressed id and every on-disk value uses this encoding:
//! bincode with its default fixed-width little-endian integer layout, which
//! is deterministic for a given type. Human-readable formats (genesis JSON)
//! go through `serde_json` instead and are never hashed field-by-field; the
//! chain id hashes the packed form of the parsed document.

use serde::de::DeserializeOwned;
use serde::Serialize;

/// Failure to decode a packed value.
#[derive(Debug, thiserror::Error)]
#[error("packed decoding failed: {0}")]
pub struct EncodeError(#[from] bincode::Error);

/// Serialize `value` with the canonical packed encoding.
///
/// Packing cannot fail for the record types in this crate (no maps with
/// non-string keys in human-readable mode, no floats).
pub fn packed<T: Serialize>(value: &T) -> Vec<u8> {
    bincode::serialize(value).expect("packed encoding is infallible for record types")
}

/// Decode a packed value.
pub fn unpack<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, EncodeError> {
    Ok(bincode::deserialize(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{hash160, Hash160};

    #[test]
    fn packed_roundtrip_preserves_hash_types() {
        let value = (hash160(b"x"), 42u64, vec![Hash160::default()]);
        let bytes = packed(&value);
        let back: (Hash160, u64, Vec<Hash160>) = unpack(&bytes).unwrap();
        assert_eq!(back, value);
    }

    #[test]
    fn packed_encoding_is_deterministic() {
        let value = (7u64, "delegate".to_string());
        assert_eq!(packed(&value), packed(&value.clone()));
    }
}
