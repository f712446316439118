//! Hashes, keys, recoverable signatures and addresses.
//!
//! All content addressing in the engine goes through [`hash160`]
//! (ripemd160 over sha256), matching the wire format of block and
//! transaction ids. Signatures are 65-byte compact recoverable secp256k1
//! signatures; the signer public key is recovered rather than transmitted.

use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, SecretKey, SECP256K1};
use serde::de::{Error as DeError, Visitor};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::constants::ADDRESS_PREFIX;

/// Errors from signature recovery and address parsing.
#[derive(Debug, thiserror::Error)]
pub enum CryptoError {
    /// The signature bytes do not form a valid recoverable signature.
    #[error("malformed signature: {0}")]
    MalformedSignature(secp256k1::Error),
    /// Public key recovery failed for the given digest/signature pair.
    #[error("signature recovery failed: {0}")]
    RecoveryFailed(secp256k1::Error),
    /// An address string had a bad prefix, length or checksum.
    #[error("invalid address string {0:?}")]
    InvalidAddress(String),
}

macro_rules! impl_fixed_hash {
    ($(#[$doc:meta])* $name:ident, $len:expr) => {
        $(#[$doc])*
        #[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(pub [u8; $len]);

        impl $name {
            /// Byte length of the hash.
            pub const LEN: usize = $len;

            /// Returns the raw bytes.
            pub const fn as_bytes(&self) -> &[u8; $len] {
                &self.0
            }

            /// True for the all-zero value.
            pub fn is_zero(&self) -> bool {
                self.0 == [0u8; $len]
            }
        }

        impl From<[u8; $len]> for $name {
            fn from(bytes: [u8; $len]) -> Self {
                Self(bytes)
            }
        }

        impl AsRef<[u8]> for $name {
            fn as_ref(&self) -> &[u8] {
                &self.0
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(&hex::encode(self.0))
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, "{}({})", stringify!($name), self)
            }
        }

        impl FromStr for $name {
            type Err = hex::FromHexError;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let mut out = [0u8; $len];
                hex::decode_to_slice(s, &mut out)?;
                Ok(Self(out))
            }
        }

        impl Serialize for $name {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serialize_fixed(&self.0, serializer)
            }
        }

        impl<'de> Deserialize<'de> for $name {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                deserialize_fixed(deserializer).map(Self)
            }
        }
    };
}

impl_fixed_hash!(
    /// 160-bit hash; the id type for blocks, transactions, balances,
    /// producer secrets and the random seed.
    Hash160,
    20
);
impl_fixed_hash!(
    /// 256-bit hash; used for digests and the chain id.
    Hash256,
    32
);

/// sha256 of `data`.
pub fn sha256(data: &[u8]) -> Hash256 {
    let digest = Sha256::digest(data);
    Hash256(digest.into())
}

/// ripemd160 of `data`.
pub fn ripemd160(data: &[u8]) -> Hash160 {
    let digest = Ripemd160::digest(data);
    Hash160(digest.into())
}

/// ripemd160 over sha256; the canonical content-address hash.
pub fn hash160(data: &[u8]) -> Hash160 {
    ripemd160(sha256(data).as_ref())
}

/// Compressed secp256k1 public key.
#[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct PublicKey(pub [u8; 33]);

impl Default for PublicKey {
    fn default() -> Self {
        Self([0u8; 33])
    }
}

impl PublicKey {
    /// The address derived from this key.
    pub fn address(&self) -> Address {
        Address(hash160(&self.0))
    }
}

impl From<secp256k1::PublicKey> for PublicKey {
    fn from(key: secp256k1::PublicKey) -> Self {
        Self(key.serialize())
    }
}

impl fmt::Display for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for PublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "PublicKey({self})")
    }
}

impl FromStr for PublicKey {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 33];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_fixed(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_fixed(deserializer).map(Self)
    }
}

/// 65-byte compact recoverable signature: recovery id then `r || s`.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct Signature(pub [u8; 65]);

impl Default for Signature {
    fn default() -> Self {
        Self([0u8; 65])
    }
}

impl fmt::Display for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&hex::encode(self.0))
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({self})")
    }
}

impl FromStr for Signature {
    type Err = hex::FromHexError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let mut out = [0u8; 65];
        hex::decode_to_slice(s, &mut out)?;
        Ok(Self(out))
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serialize_fixed(&self.0, serializer)
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        deserialize_fixed(deserializer).map(Self)
    }
}

/// Sign a 256-bit digest with `secret`, producing a recoverable signature.
pub fn sign_digest(secret: &SecretKey, digest: Hash256) -> Signature {
    let message = Message::from_digest(digest.0);
    let signature = SECP256K1.sign_ecdsa_recoverable(&message, secret);
    let (recovery_id, compact) = signature.serialize_compact();
    let mut out = [0u8; 65];
    out[0] = recovery_id.to_i32() as u8;
    out[1..].copy_from_slice(&compact);
    Signature(out)
}

/// Recover the public key that produced `signature` over `digest`.
pub fn recover(digest: Hash256, signature: &Signature) -> Result<PublicKey, CryptoError> {
    let recovery_id =
        RecoveryId::from_i32(signature.0[0] as i32).map_err(CryptoError::MalformedSignature)?;
    let compact = RecoverableSignature::from_compact(&signature.0[1..], recovery_id)
        .map_err(CryptoError::MalformedSignature)?;
    let message = Message::from_digest(digest.0);
    let key = SECP256K1
        .recover_ecdsa(&message, &compact)
        .map_err(CryptoError::RecoveryFailed)?;
    Ok(key.into())
}

/// Derive the compressed public key for a secret key.
pub fn public_key_of(secret: &SecretKey) -> PublicKey {
    secret.public_key(SECP256K1).into()
}

/// hash160 of a compressed public key; the owner identity used by withdraw
/// conditions and the account address index.
#[derive(Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Address(pub Hash160);

impl Address {
    /// Render with the given chain prefix and a 4-byte ripemd checksum.
    pub fn to_string_with_prefix(&self, prefix: &str) -> String {
        let check = ripemd160(self.0.as_ref());
        let mut payload = Vec::with_capacity(24);
        payload.extend_from_slice(self.0.as_ref());
        payload.extend_from_slice(&check.0[..4]);
        format!("{prefix}{}", hex::encode(payload))
    }

    /// Parse an address rendered with the given prefix, validating the
    /// checksum.
    pub fn from_str_with_prefix(s: &str, prefix: &str) -> Result<Self, CryptoError> {
        let bad = || CryptoError::InvalidAddress(s.to_string());
        let body = s.strip_prefix(prefix).ok_or_else(bad)?;
        let payload = hex::decode(body).map_err(|_| bad())?;
        if payload.len() != 24 {
            return Err(bad());
        }
        let mut raw = [0u8; 20];
        raw.copy_from_slice(&payload[..20]);
        let check = ripemd160(&raw);
        if check.0[..4] != payload[20..] {
            return Err(bad());
        }
        Ok(Self(Hash160(raw)))
    }
}

impl From<PublicKey> for Address {
    fn from(key: PublicKey) -> Self {
        key.address()
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_string_with_prefix(ADDRESS_PREFIX))
    }
}

impl fmt::Debug for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Address({self})")
    }
}

impl FromStr for Address {
    type Err = CryptoError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_str_with_prefix(s, ADDRESS_PREFIX)
    }
}

impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        if serializer.is_human_readable() {
            serializer.serialize_str(&self.to_string())
        } else {
            self.0.serialize(serializer)
        }
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        if deserializer.is_human_readable() {
            let s = String::deserialize(deserializer)?;
            s.parse().map_err(DeError::custom)
        } else {
            Hash160::deserialize(deserializer).map(Self)
        }
    }
}

fn serialize_fixed<S: Serializer, const N: usize>(
    bytes: &[u8; N],
    serializer: S,
) -> Result<S::Ok, S::Error> {
    if serializer.is_human_readable() {
        serializer.serialize_str(&hex::encode(bytes))
    } else {
        serializer.serialize_bytes(bytes)
    }
}

fn deserialize_fixed<'de, D: Deserializer<'de>, const N: usize>(
    deserializer: D,
) -> Result<[u8; N], D::Error> {
    struct FixedVisitor<const N: usize>;

    impl<'de, const N: usize> Visitor<'de> for FixedVisitor<N> {
        type Value = [u8; N];

        fn expecting(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            write!(f, "{N} bytes")
        }

        fn visit_bytes<E: DeError>(self, v: &[u8]) -> Result<Self::Value, E> {
            v.try_into().map_err(|_| E::invalid_length(v.len(), &self))
        }

        fn visit_str<E: DeError>(self, v: &str) -> Result<Self::Value, E> {
            let mut out = [0u8; N];
            hex::decode_to_slice(v, &mut out).map_err(E::custom)?;
            Ok(out)
        }

        fn visit_seq<A: serde::de::SeqAccess<'de>>(
            self,
            mut seq: A,
        ) -> Result<Self::Value, A::Error> {
            let mut out = [0u8; N];
            for (i, slot) in out.iter_mut().enumerate() {
                *slot = seq
                    .next_element()?
                    .ok_or_else(|| A::Error::invalid_length(i, &self))?;
            }
            Ok(out)
        }
    }

    if deserializer.is_human_readable() {
        deserializer.deserialize_str(FixedVisitor::<N>)
    } else {
        deserializer.deserialize_bytes(FixedVisitor::<N>)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use secp256k1::rand::rngs::OsRng;

    #[test]
    fn sign_and_recover_roundtrip() {
        let (secret, public) = SECP256K1.generate_keypair(&mut OsRng);
        let digest = sha256(b"block header bytes");
        let signature = sign_digest(&secret, digest);
        let recovered = recover(digest, &signature).unwrap();
        assert_eq!(recovered, PublicKey::from(public));
    }

    #[test]
    fn recover_rejects_garbage() {
        let digest = sha256(b"payload");
        let mut sig = Signature::default();
        sig.0[0] = 9; // out-of-range recovery id
        assert!(recover(digest, &sig).is_err());
    }

    #[test]
    fn address_string_roundtrip() {
        let address = Address(hash160(b"some key material"));
        let rendered = address.to_string();
        assert!(rendered.starts_with(ADDRESS_PREFIX));
        assert_eq!(rendered.parse::<Address>().unwrap(), address);
    }

    #[test]
    fn address_checksum_detects_corruption() {
        let address = Address(hash160(b"some key material"));
        let mut rendered = address.to_string();
        let tail = rendered.pop().unwrap();
        rendered.push(if tail == '0' { '1' } else { '0' });
        assert!(rendered.parse::<Address>().is_err());
    }

    #[test]
    fn packed_hashes_are_stable() {
        // Hash of fixed bytes must never change across refactors; ids on
        // disk depend on it.
        let h = hash160(b"meridian");
        assert_eq!(h, ripemd160(sha256(b"meridian").as_ref()));
        assert_eq!(h.to_string().len(), 40);
    }
}
