//! Protocol constants. Runtime-tunable values (intervals, delegate count,
//! queue limits) live in `meridian_chain::ChainConfig`; the values here are
//! baked into the record model itself.

use crate::ShareAmount;

/// Ticker symbol of the base asset (asset id 0).
pub const BASE_ASSET_SYMBOL: &str = "MRD";

/// Display name of the base asset.
pub const BASE_ASSET_NAME: &str = "Meridian";

/// Subunits per whole share of the base asset.
pub const PRECISION: u64 = 100_000;

/// Hard cap on the share supply of any asset.
pub const MAX_SHARES: ShareAmount = 1_000_000_000_000_000_000;

/// Prefix on rendered addresses.
pub const ADDRESS_PREFIX: &str = "MRD";

/// Legacy address prefixes accepted by the genesis balance importer.
pub const LEGACY_ADDRESS_PREFIXES: &[&str] = &["BTS", "KEY", "DVS", "XTS"];

/// Version stamp of the on-disk index layout. Opening a database written by
/// a newer version fails; an older version triggers a reindex.
pub const DATABASE_VERSION: u64 = 1;
