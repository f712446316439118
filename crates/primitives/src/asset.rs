//! Asset records and typed amounts.

use serde::{Deserialize, Serialize};

use crate::{AccountId, AssetId, ShareAmount, Timestamp};

/// Sentinel issuer id marking a market-issued asset: supply is driven by
/// collateralized short positions rather than by an issuer.
pub const MARKET_ISSUER_ACCOUNT_ID: AccountId = AccountId::MAX;

/// Issuer permission / restriction bits carried on an asset.
pub mod asset_permissions {
    /// No restrictions.
    pub const NONE: u32 = 0;
    /// Transfers must be approved by the issuer.
    pub const RESTRICTED: u32 = 1 << 0;
    /// Balances may be retracted by the issuer.
    pub const RETRACTABLE: u32 = 1 << 1;
    /// Market trading against the base asset is halted.
    pub const MARKET_HALT: u32 = 1 << 2;
    /// Supply may not be increased further.
    pub const SUPPLY_LOCK: u32 = 1 << 3;
}

/// An asset registered on the chain.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetRecord {
    /// Sequential id; 0 is the base asset.
    pub id: AssetId,
    /// Unique ticker symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Issuing account, or [`MARKET_ISSUER_ACCOUNT_ID`].
    pub issuer_account_id: AccountId,
    /// Subunits per whole unit.
    pub precision: u64,
    /// Registration time.
    pub registration_date: Timestamp,
    /// Last modification time.
    pub last_update: Timestamp,
    /// Shares currently in existence.
    pub current_share_supply: ShareAmount,
    /// Hard cap on supply.
    pub maximum_share_supply: ShareAmount,
    /// Fees collected in this asset, awaiting distribution or destruction.
    pub collected_fees: ShareAmount,
    /// Active restriction bits.
    pub flags: u32,
    /// Restriction bits the issuer may ever activate.
    pub issuer_permissions: u32,
}

impl AssetRecord {
    /// True if supply is driven by short positions rather than an issuer.
    pub fn is_market_issued(&self) -> bool {
        self.issuer_account_id == MARKET_ISSUER_ACCOUNT_ID
    }
}

/// An amount of a particular asset.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetAmount {
    /// Amount in subunits.
    pub amount: ShareAmount,
    /// The asset the amount is denominated in.
    pub asset_id: AssetId,
}

impl AssetAmount {
    /// Construct an amount.
    pub const fn new(amount: ShareAmount, asset_id: AssetId) -> Self {
        Self { amount, asset_id }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn market_issued_detection() {
        let mut asset = AssetRecord { issuer_account_id: 7, ..Default::default() };
        assert!(!asset.is_market_issued());
        asset.issuer_account_id = MARKET_ISSUER_ACCOUNT_ID;
        assert!(asset.is_market_issued());
    }
}
