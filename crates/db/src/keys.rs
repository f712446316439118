//! Order-preserving key encodings.

use meridian_primitives::{
    Address, FeedIndex, Hash160, Hash256, MarketHistoryGranularity, MarketHistoryKey,
    MarketIndexKey, Price,
};

use crate::DbError;

/// A table key with an order-preserving byte encoding.
///
/// `encode_key` must be monotone with respect to the key's natural order:
/// `a < b` implies `encode_key(a) < encode_key(b)` bytewise. Integers encode
/// big-endian; signed integers flip the sign bit first.
pub trait TableKey: Sized {
    /// Encode to ordered bytes.
    fn encode_key(&self) -> Vec<u8>;

    /// Decode from bytes produced by [`TableKey::encode_key`].
    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError>;
}

fn take<const N: usize>(bytes: &[u8], at: usize, table: &'static str) -> Result<[u8; N], DbError> {
    bytes
        .get(at..at + N)
        .and_then(|slice| slice.try_into().ok())
        .ok_or(DbError::CorruptKey { table })
}

impl TableKey for u8 {
    fn encode_key(&self) -> Vec<u8> {
        vec![*self]
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        match bytes {
            [value] => Ok(*value),
            _ => Err(DbError::CorruptKey { table }),
        }
    }
}

impl TableKey for u32 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(u32::from_be_bytes(take::<4>(bytes, 0, table)?))
    }
}

impl TableKey for u64 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(u64::from_be_bytes(take::<8>(bytes, 0, table)?))
    }
}

impl TableKey for u128 {
    fn encode_key(&self) -> Vec<u8> {
        self.to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(u128::from_be_bytes(take::<16>(bytes, 0, table)?))
    }
}

impl TableKey for i64 {
    fn encode_key(&self) -> Vec<u8> {
        // Sign-bit flip keeps negative values before positive ones.
        ((*self as u64) ^ (1 << 63)).to_be_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok((u64::from_be_bytes(take::<8>(bytes, 0, table)?) ^ (1 << 63)) as i64)
    }
}

impl TableKey for String {
    fn encode_key(&self) -> Vec<u8> {
        self.as_bytes().to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        String::from_utf8(bytes.to_vec()).map_err(|_| DbError::CorruptKey { table })
    }
}

impl TableKey for Hash160 {
    fn encode_key(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(Self(take::<20>(bytes, 0, table)?))
    }
}

impl TableKey for Hash256 {
    fn encode_key(&self) -> Vec<u8> {
        self.0.to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(Self(take::<32>(bytes, 0, table)?))
    }
}

impl TableKey for Address {
    fn encode_key(&self) -> Vec<u8> {
        self.0 .0.to_vec()
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(Self(Hash160(take::<20>(bytes, 0, table)?)))
    }
}

impl TableKey for MarketIndexKey {
    fn encode_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(52);
        out.extend_from_slice(&self.order_price.ratio.to_be_bytes());
        out.extend_from_slice(&self.order_price.quote_asset_id.to_be_bytes());
        out.extend_from_slice(&self.order_price.base_asset_id.to_be_bytes());
        out.extend_from_slice(&self.owner.0 .0);
        out
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(Self {
            order_price: Price {
                ratio: u128::from_be_bytes(take::<16>(bytes, 0, table)?),
                quote_asset_id: u64::from_be_bytes(take::<8>(bytes, 16, table)?),
                base_asset_id: u64::from_be_bytes(take::<8>(bytes, 24, table)?),
            },
            owner: Address(Hash160(take::<20>(bytes, 32, table)?)),
        })
    }
}

impl TableKey for FeedIndex {
    fn encode_key(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(16);
        out.extend_from_slice(&self.quote_id.to_be_bytes());
        out.extend_from_slice(&self.delegate_id.to_be_bytes());
        out
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        Ok(Self {
            quote_id: u64::from_be_bytes(take::<8>(bytes, 0, table)?),
            delegate_id: u64::from_be_bytes(take::<8>(bytes, 8, table)?),
        })
    }
}

impl TableKey for MarketHistoryKey {
    fn encode_key(&self) -> Vec<u8> {
        let granularity = match self.granularity {
            MarketHistoryGranularity::PerBlock => 0u8,
            MarketHistoryGranularity::PerHour => 1,
            MarketHistoryGranularity::PerDay => 2,
        };
        let mut out = Vec::with_capacity(25);
        out.extend_from_slice(&self.quote_id.to_be_bytes());
        out.extend_from_slice(&self.base_id.to_be_bytes());
        out.push(granularity);
        out.extend_from_slice(&self.timestamp.to_be_bytes());
        out
    }

    fn decode_key(bytes: &[u8], table: &'static str) -> Result<Self, DbError> {
        let granularity = match bytes.get(16) {
            Some(0) => MarketHistoryGranularity::PerBlock,
            Some(1) => MarketHistoryGranularity::PerHour,
            Some(2) => MarketHistoryGranularity::PerDay,
            _ => return Err(DbError::CorruptKey { table }),
        };
        Ok(Self {
            quote_id: u64::from_be_bytes(take::<8>(bytes, 0, table)?),
            base_id: u64::from_be_bytes(take::<8>(bytes, 8, table)?),
            granularity,
            timestamp: u64::from_be_bytes(take::<8>(bytes, 17, table)?),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn integer_keys_preserve_order() {
        assert!(5u64.encode_key() < 6u64.encode_key());
        assert!(255u64.encode_key() < 256u64.encode_key());
        assert!((-3i64).encode_key() < 0i64.encode_key());
        assert!(0i64.encode_key() < 7i64.encode_key());
    }

    #[test]
    fn signed_key_roundtrip() {
        for value in [i64::MIN, -1, 0, 1, i64::MAX] {
            let encoded = value.encode_key();
            assert_eq!(i64::decode_key(&encoded, "t").unwrap(), value);
        }
    }

    #[test]
    fn market_index_key_order_matches_struct_order() {
        let cheap = MarketIndexKey {
            order_price: Price { ratio: 10, quote_asset_id: 1, base_asset_id: 0 },
            owner: Address::default(),
        };
        let dear = MarketIndexKey {
            order_price: Price { ratio: 11, quote_asset_id: 1, base_asset_id: 0 },
            owner: Address::default(),
        };
        assert!(cheap < dear);
        assert!(cheap.encode_key() < dear.encode_key());
        let back = MarketIndexKey::decode_key(&dear.encode_key(), "t").unwrap();
        assert_eq!(back, dear);
    }
}
