//! Genesis documents and state bootstrap.
//!
//! The chain id is the sha256 of the packed genesis document (with an
//! optional legacy substitution for historical continuity). Balance
//! snapshots may carry addresses rendered with foreign prefixes; the
//! importer decodes them prefix-aware.

use meridian_primitives::constants::{
    ADDRESS_PREFIX, BASE_ASSET_NAME, BASE_ASSET_SYMBOL, LEGACY_ADDRESS_PREFIXES, MAX_SHARES,
    PRECISION,
};
use meridian_primitives::{
    packed, sha256, unpack, AccountRecord, Address, AssetRecord, BalanceRecord, DelegateStats,
    Hash256, PublicKey, ShareAmount, SnapshotRecord, Timestamp, WithdrawClaim, WithdrawCondition,
    MARKET_ISSUER_ACCOUNT_ID,
};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{info, warn};

use crate::config::ChainConfig;
use crate::error::{ChainError, ChainResult};
use crate::fork::BlockForkData;
use crate::state::{ChainProperty, ChainState, PropertyValue};
use crate::store::ChainStore;

/// One initial delegate.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisDelegate {
    /// Registered account name.
    pub name: String,
    /// Owner (and initial active/signing) key.
    pub owner: PublicKey,
}

/// One snapshot balance.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisBalance {
    /// Address string, possibly with a legacy prefix.
    pub raw_address: String,
    /// Base-asset amount.
    pub balance: ShareAmount,
}

/// Vesting balances shared-dropped onto the chain.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisSharedrop {
    /// Vesting start for every balance in the drop.
    pub start_time: Timestamp,
    /// Vesting duration in days.
    pub duration_days: u64,
    /// The vesting balances.
    pub vesting_balances: Vec<GenesisBalance>,
}

/// One initial market-issued asset.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenesisAsset {
    /// Ticker symbol.
    pub symbol: String,
    /// Display name.
    pub name: String,
    /// Free-form description.
    pub description: String,
    /// Subunits per whole unit.
    pub precision: u64,
}

/// The genesis document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GenesisState {
    /// Chain start time; also the registration date of everything genesis
    /// creates.
    pub timestamp: Timestamp,
    /// Initial delegates, becoming accounts 1..=K.
    pub delegates: Vec<GenesisDelegate>,
    /// Initial signature balances.
    #[serde(default)]
    pub initial_balances: Vec<GenesisBalance>,
    /// Initial vesting balances.
    #[serde(default)]
    pub sharedrop_balances: GenesisSharedrop,
    /// Initial market-issued assets.
    #[serde(default)]
    pub market_assets: Vec<GenesisAsset>,
}

impl GenesisState {
    /// Load a genesis document from `.json` (human readable) or any other
    /// extension as the packed encoding.
    pub fn from_file(path: &Path) -> ChainResult<Self> {
        let bytes = std::fs::read(path)
            .map_err(|error| ChainError::InvalidGenesis(format!("{}: {error}", path.display())))?;
        if path.extension().and_then(|ext| ext.to_str()) == Some("json") {
            serde_json::from_slice(&bytes)
                .map_err(|error| ChainError::InvalidGenesis(error.to_string()))
        } else {
            Ok(unpack(&bytes)?)
        }
    }

    /// The chain id this document produces (before any legacy
    /// substitution).
    pub fn chain_id(&self) -> Hash256 {
        sha256(&packed(self))
    }
}

/// Where the genesis document comes from.
#[derive(Debug, Clone)]
pub enum GenesisSource {
    /// Read from a file at open time.
    File(PathBuf),
    /// Provided in memory.
    Embedded(GenesisState),
}

impl GenesisSource {
    pub(crate) fn load(&self) -> ChainResult<GenesisState> {
        match self {
            Self::File(path) => GenesisState::from_file(path),
            Self::Embedded(state) => Ok(state.clone()),
        }
    }
}

/// Decode a snapshot address rendered with this chain's prefix or any of
/// the known legacy prefixes.
pub(crate) fn convert_raw_address(raw: &str) -> ChainResult<Address> {
    if let Ok(address) = Address::from_str_with_prefix(raw, ADDRESS_PREFIX) {
        return Ok(address);
    }
    for prefix in LEGACY_ADDRESS_PREFIXES {
        if raw.starts_with(prefix) {
            if let Ok(address) = Address::from_str_with_prefix(raw, prefix) {
                return Ok(address);
            }
        }
    }
    Err(ChainError::InvalidLegacyAddress(raw.to_string()))
}

/// Initialize chain id, accounts, delegates, assets and balances from the
/// genesis document. Idempotent: a chain that already has an id is left
/// untouched.
pub(crate) fn initialize_genesis(
    store: &ChainStore,
    config: &ChainConfig,
    genesis: &GenesisState,
) -> ChainResult<Hash256> {
    if let Some(existing) = store
        .get_property(ChainProperty::ChainId)?
        .and_then(|value| value.as_hash256())
    {
        warn!(target: "chain::genesis", chain_id = %existing, "genesis state already initialized");
        store.set_chain_id(existing);
        return Ok(existing);
    }

    let mut chain_id = genesis.chain_id();
    if Some(chain_id) == config.expected_chain_id {
        if let Some(desired) = config.desired_chain_id {
            chain_id = desired;
        }
    }
    info!(target: "chain::genesis", %chain_id, delegates = genesis.delegates.len(),
          "initializing genesis state");

    if genesis.delegates.len() < config.num_delegates {
        return Err(ChainError::InvalidGenesis(format!(
            "genesis document provides {} delegates but {} are required",
            genesis.delegates.len(),
            config.num_delegates
        )));
    }

    store.set_chain_id(chain_id);
    store.store_property(
        ChainProperty::ChainId,
        Some(&PropertyValue::Hash256(chain_id)),
    )?;

    let timestamp = genesis.timestamp;

    // Account 0 is a reserved sentinel that issues the base asset.
    let sentinel = AccountRecord {
        id: 0,
        name: "genesis".to_string(),
        registration_date: timestamp,
        last_update: timestamp,
        ..Default::default()
    };
    store.store_account_record(0, Some(&sentinel))?;

    let mut account_id = 0;
    for delegate in &genesis.delegates {
        account_id += 1;
        let mut record = AccountRecord {
            id: account_id,
            name: delegate.name.clone(),
            owner_key: delegate.owner,
            registration_date: timestamp,
            last_update: timestamp,
            delegate_info: Some(DelegateStats { pay_rate: 100, ..Default::default() }),
            ..Default::default()
        };
        record.set_active_key(timestamp, delegate.owner);
        store.store_account_record(account_id, Some(&record))?;
    }

    let mut total_base_supply: ShareAmount = 0;

    for genesis_balance in &genesis.initial_balances {
        let owner = convert_raw_address(&genesis_balance.raw_address)?;
        let condition = WithdrawCondition::signature(owner, 0, 0);
        let id = condition.balance_id();
        let mut record = BalanceRecord::new(condition, genesis_balance.balance, timestamp);
        // Snapshots may list the same address twice.
        if let Some(existing) = store.get_balance(&id)? {
            record.balance += existing.balance;
        }
        record.snapshot_info = Some(SnapshotRecord {
            original_address: genesis_balance.raw_address.clone(),
            original_balance: genesis_balance.balance,
        });
        store.store_balance_record(id, Some(&record))?;
        total_base_supply += genesis_balance.balance;
    }

    for genesis_balance in &genesis.sharedrop_balances.vesting_balances {
        let owner = convert_raw_address(&genesis_balance.raw_address)?;
        let condition = WithdrawCondition {
            asset_id: 0,
            slate_id: 0,
            claim: WithdrawClaim::Vesting {
                owner,
                start_time: genesis.sharedrop_balances.start_time,
                duration_secs: genesis.sharedrop_balances.duration_days * 24 * 60 * 60,
                original_balance: genesis_balance.balance,
            },
        };
        let id = condition.balance_id();
        let mut record = BalanceRecord::new(condition, genesis_balance.balance, timestamp);
        if let Some(existing) = store.get_balance(&id)? {
            record.balance += existing.balance;
        }
        record.snapshot_info = Some(SnapshotRecord {
            original_address: genesis_balance.raw_address.clone(),
            original_balance: genesis_balance.balance,
        });
        store.store_balance_record(id, Some(&record))?;
        total_base_supply += genesis_balance.balance;
    }

    let base_asset = AssetRecord {
        id: 0,
        symbol: BASE_ASSET_SYMBOL.to_string(),
        name: BASE_ASSET_NAME.to_string(),
        description: String::new(),
        issuer_account_id: 0,
        precision: PRECISION,
        registration_date: timestamp,
        last_update: timestamp,
        current_share_supply: total_base_supply,
        maximum_share_supply: MAX_SHARES,
        collected_fees: 0,
        flags: 0,
        issuer_permissions: 0,
    };
    store.store_asset_record(0, Some(&base_asset))?;

    let mut asset_id = 0;
    for market_asset in &genesis.market_assets {
        asset_id += 1;
        let record = AssetRecord {
            id: asset_id,
            symbol: market_asset.symbol.clone(),
            name: market_asset.name.clone(),
            description: market_asset.description.clone(),
            issuer_account_id: MARKET_ISSUER_ACCOUNT_ID,
            precision: market_asset.precision,
            registration_date: timestamp,
            last_update: timestamp,
            current_share_supply: 0,
            maximum_share_supply: MAX_SHARES,
            collected_fees: 0,
            flags: 0,
            issuer_permissions: 0,
        };
        store.store_asset_record(asset_id, Some(&record))?;
    }

    // The genesis parent is a first-class fork node so block 1 links.
    let genesis_fork = BlockForkData {
        is_known: true,
        is_linked: true,
        is_included: true,
        is_valid: Some(true),
        ..Default::default()
    };
    store.fork_data.put(&Default::default(), &genesis_fork)?;

    store.store_property(
        ChainProperty::ActiveDelegateList,
        Some(&PropertyValue::AccountList(store.next_round_active_delegates())),
    )?;
    store.store_property(ChainProperty::LastAssetId, Some(&PropertyValue::U64(asset_id)))?;
    store.store_property(
        ChainProperty::LastAccountId,
        Some(&PropertyValue::U64(genesis.delegates.len() as u64)),
    )?;
    store.store_property(ChainProperty::LastObjectId, Some(&PropertyValue::U64(0)))?;

    Ok(chain_id)
}
