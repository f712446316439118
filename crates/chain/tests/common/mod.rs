//! A deterministic five-delegate test network.

use meridian_chain::{
    ChainConfig, ChainDatabase, ChainState, GenesisBalance, GenesisDelegate, GenesisSource,
    GenesisState, ManualClock,
};
use meridian_primitives::{
    hash160, public_key_of, ripemd160, AccountId, Address, BlockId, FullBlock, Hash160,
    Operation, ShareAmount, SignedBlockHeader, SignedTransaction, Timestamp, WithdrawCondition,
};
use secp256k1::SecretKey;
use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

pub const INTERVAL: u64 = 10;
pub const NUM_DELEGATES: usize = 5;
pub const GENESIS_TIME: Timestamp = 1_000_000;
pub const FUNDER_SUPPLY: ShareAmount = 1_000_000_000;

pub struct TestNet {
    pub db: ChainDatabase,
    pub clock: Arc<ManualClock>,
    pub config: ChainConfig,
    pub genesis: GenesisState,
    pub delegate_keys: HashMap<AccountId, SecretKey>,
    pub delegate_secrets: HashMap<AccountId, Hash160>,
    pub funder: SecretKey,
    pub funder_condition: WithdrawCondition,
    /// Every block produced through this net, in production order.
    pub blocks: Vec<FullBlock>,
}

#[allow(dead_code)]
impl TestNet {
    pub fn config() -> ChainConfig {
        ChainConfig {
            block_interval_secs: INTERVAL,
            num_delegates: NUM_DELEGATES,
            max_undo_history: 10,
            min_feeds: 3,
            max_pending_queue_size: 2,
            default_relay_fee: 10,
            ..Default::default()
        }
    }

    pub fn new() -> Self {
        Self::with_config(Self::config())
    }

    pub fn with_config(config: ChainConfig) -> Self {
        let (genesis, delegate_keys, funder) = Self::fixtures(config.num_delegates);
        let clock = Arc::new(ManualClock::new(GENESIS_TIME));
        let db =
            ChainDatabase::in_memory(config.clone(), genesis.clone(), clock.clone()).unwrap();
        Self::assemble(db, clock, config, genesis, delegate_keys, funder)
    }

    pub fn on_disk(data_dir: &Path) -> Self {
        let config = Self::config();
        let (genesis, delegate_keys, funder) = Self::fixtures(config.num_delegates);
        let clock = Arc::new(ManualClock::new(GENESIS_TIME));
        let db = ChainDatabase::open_with(
            data_dir,
            config.clone(),
            GenesisSource::Embedded(genesis.clone()),
            clock.clone(),
            Arc::new(meridian_chain::StandardEvaluator),
            Arc::new(meridian_chain::NoopMarketEngine),
        )
        .unwrap();
        Self::assemble(db, clock, config, genesis, delegate_keys, funder)
    }

    fn fixtures(
        num_delegates: usize,
    ) -> (GenesisState, HashMap<AccountId, SecretKey>, SecretKey) {
        let mut delegate_keys = HashMap::new();
        let mut delegates = Vec::new();
        for index in 0..num_delegates {
            let key = SecretKey::from_slice(&[index as u8 + 1; 32]).unwrap();
            delegate_keys.insert(index as AccountId + 1, key);
            delegates.push(GenesisDelegate {
                name: format!("delegate-{index}"),
                owner: public_key_of(&key),
            });
        }
        let funder = SecretKey::from_slice(&[0x77; 32]).unwrap();
        let funder_address = public_key_of(&funder).address();
        let genesis = GenesisState {
            timestamp: GENESIS_TIME,
            delegates,
            initial_balances: vec![GenesisBalance {
                raw_address: funder_address.to_string(),
                balance: FUNDER_SUPPLY,
            }],
            ..Default::default()
        };
        (genesis, delegate_keys, funder)
    }

    fn assemble(
        db: ChainDatabase,
        clock: Arc<ManualClock>,
        config: ChainConfig,
        genesis: GenesisState,
        delegate_keys: HashMap<AccountId, SecretKey>,
        funder: SecretKey,
    ) -> Self {
        let delegate_secrets = delegate_keys
            .keys()
            .map(|id| (*id, hash160(&id.to_le_bytes())))
            .collect();
        let funder_condition =
            WithdrawCondition::signature(public_key_of(&funder).address(), 0, 0);
        Self {
            db,
            clock,
            config,
            genesis,
            delegate_keys,
            delegate_secrets,
            funder,
            funder_condition,
            blocks: Vec::new(),
        }
    }

    /// A second database over the same genesis and clock, for replay
    /// comparisons.
    pub fn fresh_peer(&self) -> ChainDatabase {
        ChainDatabase::in_memory(self.config.clone(), self.genesis.clone(), self.clock.clone())
            .unwrap()
    }

    /// Timestamp of the slot right after the current head.
    pub fn next_slot(&self) -> Timestamp {
        let head = self.db.get_head_block();
        if head.block_num == 0 {
            GENESIS_TIME + INTERVAL
        } else {
            head.timestamp + INTERVAL
        }
    }

    /// Build a correctly signed block at `timestamp` on the given parent
    /// (default: the current head). Delegates reveal a fixed per-delegate
    /// secret, so the commitment check holds across forks.
    pub fn produce_block(
        &self,
        timestamp: Timestamp,
        parent: Option<(BlockId, u64)>,
        transactions: Vec<SignedTransaction>,
    ) -> FullBlock {
        let (previous, parent_num) =
            parent.unwrap_or((self.db.get_head_block_id(), self.db.get_head_block_num()));
        let producer = self.db.slot_signee_account(timestamp).unwrap();
        let secret = self.delegate_secrets[&producer.id];
        let mut block = FullBlock {
            header: SignedBlockHeader {
                previous,
                block_num: parent_num + 1,
                timestamp,
                previous_secret: secret,
                next_secret_hash: ripemd160(secret.as_ref()),
                ..Default::default()
            },
            user_transactions: transactions,
        };
        block.header.transaction_digest = block.compute_transaction_digest();
        block.header.sign(&self.delegate_keys[&producer.id]);
        block
    }

    /// Produce and push the next block on the head chain.
    pub fn push_next(&mut self) -> meridian_chain::BlockForkData {
        self.push_next_with(Vec::new())
    }

    /// Produce and push the next head block carrying `transactions`.
    pub fn push_next_with(
        &mut self,
        transactions: Vec<SignedTransaction>,
    ) -> meridian_chain::BlockForkData {
        let timestamp = self.next_slot();
        self.clock.set(timestamp);
        let block = self.produce_block(timestamp, None, transactions);
        self.blocks.push(block.clone());
        self.db.push_block(block).unwrap()
    }

    /// A signed transfer from the funder: withdraw `amount + fee`, deposit
    /// `amount` to `to`.
    pub fn transfer(&self, to: Address, amount: ShareAmount, fee: ShareAmount) -> SignedTransaction {
        let mut trx = SignedTransaction {
            expiration: GENESIS_TIME + 1_000_000,
            operations: vec![
                Operation::Withdraw {
                    balance_id: self.funder_condition.balance_id(),
                    amount: amount + fee,
                },
                Operation::Deposit {
                    condition: WithdrawCondition::signature(to, 0, 0),
                    amount,
                },
            ],
            signatures: Vec::new(),
        };
        trx.sign(&self.funder, self.db.chain_id());
        trx
    }

    /// Current funder balance.
    pub fn funder_balance(&self) -> ShareAmount {
        self.db
            .state()
            .get_balance(&self.funder_condition.balance_id())
            .unwrap()
            .map(|record| record.balance)
            .unwrap_or(0)
    }

    /// Assert property: recorded supply equals the recomputed scan.
    pub fn assert_supply_conserved(&self) {
        let recorded = self
            .db
            .state()
            .get_asset(0)
            .unwrap()
            .expect("base asset exists")
            .current_share_supply;
        let computed = self.db.calculate_supply(0).unwrap().amount;
        assert_eq!(recorded, computed, "base asset supply drifted from state scan");
    }
}

/// A throwaway address derived from a tag.
#[allow(dead_code)]
pub fn address(tag: u8) -> Address {
    Address(hash160(&[0xA0, tag]))
}
