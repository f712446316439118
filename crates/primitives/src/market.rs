//! Order book, collateral and price-feed records.

use serde::{Deserialize, Serialize};

use crate::crypto::Address;
use crate::{AccountId, AssetId, ShareAmount, Timestamp};

/// A quote/base price as a fixed-point ratio.
///
/// Ordering is `(ratio, quote, base)`, which gives order books their
/// price-major sort.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct Price {
    /// Quote units per base unit, scaled by [`Price::SCALE`].
    pub ratio: u128,
    /// Asset the price is quoted in.
    pub quote_asset_id: AssetId,
    /// Asset being priced.
    pub base_asset_id: AssetId,
}

impl Price {
    /// Fixed-point scale of [`Price::ratio`].
    pub const SCALE: u128 = 100_000_000;

    /// Build a price from a rational quote/base pair.
    pub fn from_ratio(
        quote_amount: ShareAmount,
        base_amount: ShareAmount,
        quote_asset_id: AssetId,
        base_asset_id: AssetId,
    ) -> Self {
        let ratio = if base_amount <= 0 {
            0
        } else {
            (quote_amount.max(0) as u128 * Self::SCALE) / base_amount as u128
        };
        Self { ratio, quote_asset_id, base_asset_id }
    }
}

/// Which side / style of the order book an order lives on. Each kind is its
/// own table.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum OrderKind {
    /// Buy the base asset at or below the price.
    Bid,
    /// Sell the base asset at or above the price.
    Ask,
    /// Bid priced relative to the feed.
    RelativeBid,
    /// Ask priced relative to the feed.
    RelativeAsk,
    /// Short the quote asset against base collateral.
    Short,
}

impl OrderKind {
    /// All order kinds, in table order.
    pub const ALL: [Self; 5] =
        [Self::Bid, Self::Ask, Self::RelativeBid, Self::RelativeAsk, Self::Short];
}

/// Key of every order-book table: price-major, then owner.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct MarketIndexKey {
    /// Limit price of the order.
    pub order_price: Price,
    /// Owner of the order balance.
    pub owner: Address,
}

/// An open order's remaining balance.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRecord {
    /// Amount still on the book.
    pub balance: ShareAmount,
}

/// An open margin position backing market-issued supply.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollateralRecord {
    /// Base-asset collateral held.
    pub collateral_balance: ShareAmount,
    /// Quote-asset debt to be covered.
    pub payoff_balance: ShareAmount,
    /// Annualized interest on the debt, in basis points.
    pub interest_rate_bps: u64,
    /// Time by which the position must be covered.
    pub expiration: Timestamp,
}

/// Key of the price-feed table: per quote asset, per publishing delegate.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub struct FeedIndex {
    /// Asset the feed prices (against the base asset).
    pub quote_id: AssetId,
    /// Delegate that published the feed.
    pub delegate_id: AccountId,
}

/// A published price feed.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedRecord {
    /// Table key.
    pub index: FeedIndex,
    /// Published price.
    pub value: Price,
    /// Publication time; feeds older than a day are ignored by the median.
    pub last_update: Timestamp,
}

/// Bucketing of market history records.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
pub enum MarketHistoryGranularity {
    /// One record per block that executed the market.
    PerBlock,
    /// Hourly rollup.
    PerHour,
    /// Daily rollup.
    PerDay,
}

/// Key of the market-history table.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct MarketHistoryKey {
    /// Quote asset of the market.
    pub quote_id: AssetId,
    /// Base asset of the market.
    pub base_id: AssetId,
    /// Rollup granularity.
    pub granularity: MarketHistoryGranularity,
    /// Bucket start time.
    pub timestamp: Timestamp,
}

/// One market-history bucket.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketHistoryRecord {
    /// First trade price in the bucket.
    pub opening: Price,
    /// Last trade price in the bucket.
    pub closing: Price,
    /// Highest trade price in the bucket.
    pub highest: Price,
    /// Lowest trade price in the bucket.
    pub lowest: Price,
    /// Base-asset volume traded.
    pub volume: ShareAmount,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::Hash160;

    #[test]
    fn price_ordering_is_ratio_major() {
        let low = Price::from_ratio(1, 2, 1, 0);
        let high = Price::from_ratio(3, 2, 1, 0);
        assert!(low < high);
    }

    #[test]
    fn market_index_sorts_by_price_then_owner() {
        let price = Price::from_ratio(1, 1, 1, 0);
        let a = MarketIndexKey { order_price: price, owner: Address(Hash160([1; 20])) };
        let b = MarketIndexKey { order_price: price, owner: Address(Hash160([2; 20])) };
        assert!(a < b);
    }
}
