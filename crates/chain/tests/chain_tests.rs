//! End-to-end scenarios: linear growth, equal-height forks, reorgs,
//! future and invalid blocks, the undo window, mempool pressure and
//! observer ordering.

mod common;

use common::{address, TestNet, FUNDER_SUPPLY, INTERVAL};
use meridian_chain::{
    ChainDatabase, ChainError, ChainNotification, ChainState, ProducerConfig,
    ShareableChainDatabase,
};
use meridian_primitives::{
    ripemd160, FullBlock, SignedBlockHeader, WithdrawCondition,
};

#[test]
fn linear_extension_advances_head() {
    let mut net = TestNet::new();

    let transfer = net.transfer(address(1), 5_000, 100);
    net.db.store_pending_transaction(transfer.clone(), false).unwrap().unwrap();
    assert_eq!(net.db.get_pending_transactions().len(), 1);

    for n in 1..=10u64 {
        let transactions = if n == 3 { vec![transfer.clone()] } else { Vec::new() };
        let fork_data = net.push_next_with(transactions);
        assert!(fork_data.is_included, "pushed block {n} should be head");
        assert_eq!(net.db.get_head_block_num(), n);
        net.assert_supply_conserved();
    }
    assert_eq!(net.db.get_head_block_id(), net.blocks[9].id());

    // The transfer landed, and is retrievable through its block.
    let recipient = WithdrawCondition::signature(address(1), 0, 0);
    assert_eq!(
        net.db.state().get_balance(&recipient.balance_id()).unwrap().unwrap().balance,
        5_000
    );
    assert_eq!(net.funder_balance(), FUNDER_SUPPLY - 5_100);
    let confirmed = net.db.get_transactions_for_block(&net.blocks[2].id()).unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].location.block_num, 3);
    assert_eq!(confirmed[0].fees, 100);

    // Ten blocks, undo history ten: every block still undoable.
    for block in &net.blocks {
        assert!(net.db.has_undo_entry(&block.id()).unwrap());
    }
    // One more block prunes the oldest undo entry.
    net.push_next();
    assert!(!net.db.has_undo_entry(&net.blocks[0].id()).unwrap());
    assert!(net.db.has_undo_entry(&net.blocks[10].id()).unwrap());

    // The confirmed transfer is no longer pending after revalidation.
    assert!(net.db.revalidation_scheduled());
    net.db.revalidate_pending().unwrap();
    assert!(net.db.get_pending_transactions().is_empty());
}

#[test]
fn equal_height_fork_is_tracked_but_not_adopted() {
    let mut net = TestNet::new();
    for _ in 0..5 {
        net.push_next();
    }
    let parent = (net.db.get_head_block_id(), 5);

    let slot_a = net.next_slot();
    net.clock.set(slot_a);
    let block_a = net.produce_block(slot_a, None, Vec::new());
    net.db.push_block(block_a.clone()).unwrap();
    assert_eq!(net.db.get_head_block_id(), block_a.id());

    // A sibling at the same height arrives; the head must not move.
    let slot_b = slot_a + INTERVAL;
    net.clock.set(slot_b);
    let block_b = net.produce_block(slot_b, Some(parent), Vec::new());
    let fork_data = net.db.push_block(block_b.clone()).unwrap();

    assert_eq!(net.db.get_head_block_id(), block_a.id());
    assert!(fork_data.is_linked);
    assert!(!fork_data.is_included);
    assert_eq!(fork_data.is_valid, None);
}

#[test]
fn longer_fork_triggers_reorg_and_matches_fresh_replay() {
    let mut net = TestNet::new();
    for _ in 0..5 {
        net.push_next();
    }
    let common_parent = (net.db.get_head_block_id(), 5);

    let slot_a = net.next_slot();
    net.clock.set(slot_a);
    let block_6a = net.produce_block(slot_a, None, Vec::new());
    net.db.push_block(block_6a.clone()).unwrap();

    let slot_b = slot_a + INTERVAL;
    net.clock.set(slot_b);
    let transfer = net.transfer(address(7), 9_000, 250);
    let block_6b = net.produce_block(slot_b, Some(common_parent), vec![transfer]);
    net.db.push_block(block_6b.clone()).unwrap();
    assert_eq!(net.db.get_head_block_id(), block_6a.id());

    let slot_c = slot_b + INTERVAL;
    net.clock.set(slot_c);
    let block_7b = net.produce_block(slot_c, Some((block_6b.id(), 6)), Vec::new());
    net.db.push_block(block_7b.clone()).unwrap();

    // The heavier fork won.
    assert_eq!(net.db.get_head_block_num(), 7);
    assert_eq!(net.db.get_head_block_id(), block_7b.id());
    assert!(!net.db.get_block_fork_data(&block_6a.id()).unwrap().unwrap().is_included);
    for id in [block_6b.id(), block_7b.id()] {
        assert!(net.db.get_block_fork_data(&id).unwrap().unwrap().is_included);
    }

    // Exactly one included block per height.
    for num in 1..=7u64 {
        let included: Vec<_> = net
            .db
            .fetch_blocks_at_number(num)
            .unwrap()
            .into_iter()
            .filter(|id| {
                net.db.get_block_fork_data(id).unwrap().unwrap().is_included
            })
            .collect();
        assert_eq!(included.len(), 1, "height {num} must have one included block");
    }

    // Replaying the winning history on a fresh database produces the same
    // state.
    let mut peer = net.fresh_peer();
    for block in net.blocks.iter().take(5) {
        peer.push_block(block.clone()).unwrap();
    }
    peer.push_block(block_6b).unwrap();
    peer.push_block(block_7b).unwrap();

    assert_eq!(peer.get_head_block_id(), net.db.get_head_block_id());
    assert_eq!(
        peer.calculate_supply(0).unwrap().amount,
        net.db.calculate_supply(0).unwrap().amount
    );
    for delegate_id in 1..=5u64 {
        assert_eq!(
            peer.state().get_account(delegate_id).unwrap(),
            net.db.state().get_account(delegate_id).unwrap(),
            "delegate {delegate_id} state diverged after reorg"
        );
    }
    let funder_id = net.funder_condition.balance_id();
    assert_eq!(
        peer.state().get_balance(&funder_id).unwrap(),
        net.db.state().get_balance(&funder_id).unwrap()
    );
    net.assert_supply_conserved();
}

#[test]
fn future_block_is_queued_for_revalidation_not_invalidated() {
    let mut net = TestNet::new();
    for _ in 0..5 {
        net.push_next();
    }
    let head_id = net.db.get_head_block_id();

    // Ten intervals ahead of the local clock.
    let future_slot = net.next_slot() + 10 * INTERVAL;
    let block = net.produce_block(future_slot, None, Vec::new());
    net.db.push_block(block.clone()).unwrap();

    assert_eq!(net.db.get_head_block_id(), head_id, "head must not move");
    let fork_data = net.db.get_block_fork_data(&block.id()).unwrap().unwrap();
    assert_eq!(fork_data.is_valid, None, "future blocks stay unchecked");
    assert!(net.db.is_queued_for_revalidation(&block.id()).unwrap());
}

#[test]
fn wrong_signer_is_invalid_and_poisons_descendants() {
    let mut net = TestNet::new();
    for _ in 0..5 {
        net.push_next();
    }
    let head_id = net.db.get_head_block_id();

    let slot = net.next_slot();
    net.clock.set(slot);
    let mut bad_block = net.produce_block(slot, None, Vec::new());
    // Re-sign with a delegate that does not own the slot.
    let scheduled = net.db.slot_signee_account(slot).unwrap().id;
    let imposter = (1..=5u64).find(|id| *id != scheduled).unwrap();
    bad_block.header.sign(&net.delegate_keys[&imposter]);
    net.db.push_block(bad_block.clone()).unwrap();

    assert_eq!(net.db.get_head_block_id(), head_id);
    let fork_data = net.db.get_block_fork_data(&bad_block.id()).unwrap().unwrap();
    assert!(fork_data.is_invalid());
    let reason = fork_data.invalid_reason.unwrap();
    assert!(reason.contains("signee"), "unexpected reason: {reason}");

    // A child of the invalid block inherits the verdict on arrival.
    let child_slot = slot + INTERVAL;
    net.clock.set(child_slot);
    let child = net.produce_block(child_slot, Some((bad_block.id(), 6)), Vec::new());
    let child_data = net.db.push_block(child).unwrap();
    assert!(child_data.is_invalid());
    assert_eq!(child_data.invalid_reason.as_deref(), Some(reason.as_str()));
    assert_eq!(net.db.get_head_block_id(), head_id);
}

#[test]
fn blocks_behind_the_undo_window_are_rejected() {
    let mut net = TestNet::new();
    for _ in 0..21 {
        net.push_next();
    }
    // Undo history is 10, head is 21: number 5 is out of reach.
    let stale = FullBlock {
        header: SignedBlockHeader { block_num: 5, ..Default::default() },
        user_transactions: Vec::new(),
    };
    match net.db.push_block(stale) {
        Err(ChainError::BlockOlderThanUndoHistory { block_num: 5, head_num: 21, .. }) => {}
        other => panic!("expected undo-history rejection, got {other:?}"),
    }
    assert_eq!(net.db.get_head_block_num(), 21);
}

#[test]
fn pop_block_restores_the_previous_state() {
    let mut net = TestNet::new();
    net.push_next();
    net.push_next();
    let balance_before = net.funder_balance();
    let supply_before = net.db.state().get_asset(0).unwrap().unwrap().current_share_supply;

    let transfer = net.transfer(address(3), 1_234, 50);
    net.push_next_with(vec![transfer]);
    assert_ne!(net.funder_balance(), balance_before);

    let popped_id = net.db.get_head_block_id();
    net.db.pop_block().unwrap();

    assert_eq!(net.db.get_head_block_num(), 2);
    assert_eq!(net.funder_balance(), balance_before);
    assert_eq!(
        net.db.state().get_asset(0).unwrap().unwrap().current_share_supply,
        supply_before
    );
    assert!(!net.db.get_block_fork_data(&popped_id).unwrap().unwrap().is_included);
    net.assert_supply_conserved();
}

#[test]
fn duplicate_pending_transactions_are_ignored() {
    let mut net = TestNet::new();
    net.push_next();

    let transfer = net.transfer(address(4), 800, 40);
    assert!(net.db.store_pending_transaction(transfer.clone(), false).unwrap().is_some());
    assert!(net.db.store_pending_transaction(transfer, false).unwrap().is_none());
    assert_eq!(net.db.get_pending_transactions().len(), 1);

    // Revalidation preserves the set of still-valid transactions.
    net.db.revalidate_pending().unwrap();
    assert_eq!(net.db.get_pending_transactions().len(), 1);
}

#[test]
fn queue_pressure_escalates_the_relay_fee() {
    let mut net = TestNet::new();
    net.push_next();

    // Queue cap is 2 and the relay fee 10. The first four admissions see a
    // required fee of at most 10 (overage 1 squared is still 1).
    for tag in 0..4u8 {
        let transfer = net.transfer(address(tag), 1_000, 10);
        assert!(net.db.store_pending_transaction(transfer, false).unwrap().is_some());
    }

    // Overage is now 2: the required fee is 10 * 2² = 40.
    let cheap = net.transfer(address(10), 1_000, 10);
    match net.db.store_pending_transaction(cheap.clone(), false) {
        Err(ChainError::InsufficientRelayFee { fees: 10, required: 40 }) => {}
        other => panic!("expected relay-fee rejection, got {other:?}"),
    }

    // Local submissions bypass the escalation but not the floor.
    assert!(net.db.store_pending_transaction(cheap, true).unwrap().is_some());
}

#[test]
fn block_template_takes_highest_fees_first() {
    let mut net = TestNet::new();
    net.push_next();

    let low = net.transfer(address(20), 1_000, 20);
    let high = net.transfer(address(21), 1_000, 500);
    net.db.store_pending_transaction(low.clone(), false).unwrap();
    net.db.store_pending_transaction(high.clone(), false).unwrap();

    let timestamp = net.next_slot();
    net.clock.set(timestamp);
    let producer = net.db.slot_signee_account(timestamp).unwrap();
    let secret = net.delegate_secrets[&producer.id];
    let mut template = net
        .db
        .generate_block_template(
            timestamp,
            secret,
            ripemd160(secret.as_ref()),
            &ProducerConfig::default(),
        )
        .unwrap();
    assert_eq!(
        template.user_transactions.iter().map(|t| t.id()).collect::<Vec<_>>(),
        vec![high.id(), low.id()],
        "template must order by fee, descending"
    );

    template.header.sign(&net.delegate_keys[&producer.id]);
    let fork_data = net.db.push_block(template).unwrap();
    assert!(fork_data.is_included);
    net.db.revalidate_pending().unwrap();
    assert!(net.db.get_pending_transactions().is_empty());
    net.assert_supply_conserved();
}

#[test]
fn observers_receive_commits_in_order_and_pops_in_reverse() {
    let net = TestNet::new();
    let shared = ShareableChainDatabase::new(net.fresh_peer());
    let mut notifications = shared.subscribe();

    // Drive the shared database with blocks produced by a twin net.
    let mut twin = net;
    twin.push_next();
    twin.push_next();
    for block in &twin.blocks {
        shared.push_block(block.clone()).unwrap();
    }

    match notifications.try_recv().unwrap() {
        ChainNotification::BlockApplied(summary) => {
            assert_eq!(summary.block.id(), twin.blocks[0].id());
            assert!(!summary.applied_changes.accounts.is_empty());
        }
        other => panic!("expected BlockApplied, got {other:?}"),
    }
    match notifications.try_recv().unwrap() {
        ChainNotification::BlockApplied(summary) => {
            assert_eq!(summary.block.id(), twin.blocks[1].id());
        }
        other => panic!("expected BlockApplied, got {other:?}"),
    }

    shared.pop_block().unwrap();
    match notifications.try_recv().unwrap() {
        ChainNotification::StateChanged(undo) => {
            assert!(!undo.accounts.is_empty(), "undo must carry pre-images");
        }
        other => panic!("expected StateChanged, got {other:?}"),
    }
    assert_eq!(shared.read().get_head_block_num(), 1);
}

#[test]
fn reopening_a_database_restores_head_and_reindexes_when_wiped() {
    let dir = tempfile::tempdir().unwrap();
    let funder_id;
    let head_id;
    let final_clock;
    {
        let mut net = TestNet::on_disk(dir.path());
        let transfer = net.transfer(address(30), 2_500, 75);
        net.push_next();
        net.push_next_with(vec![transfer]);
        net.push_next();
        funder_id = net.funder_condition.balance_id();
        head_id = net.db.get_head_block_id();
        final_clock = net.clock.now();
        assert_eq!(net.db.get_head_block_num(), 3);
    }

    // Plain reopen: indices are intact.
    {
        let net = reopen(dir.path(), final_clock);
        assert_eq!(net.get_head_block_num(), 3);
        assert_eq!(net.get_head_block_id(), head_id);
        assert_eq!(
            net.state().get_balance(&funder_id).unwrap().unwrap().balance,
            FUNDER_SUPPLY - 2_575
        );
    }

    // Wipe the index: reopen replays the raw chain from genesis.
    std::fs::remove_dir_all(dir.path().join("index")).unwrap();
    {
        let net = reopen(dir.path(), final_clock);
        assert_eq!(net.get_head_block_num(), 3);
        assert_eq!(net.get_head_block_id(), head_id);
        assert_eq!(
            net.state().get_balance(&funder_id).unwrap().unwrap().balance,
            FUNDER_SUPPLY - 2_575
        );
    }
}

fn reopen(path: &std::path::Path, now: u64) -> ChainDatabase {
    let config = TestNet::config();
    let probe = TestNet::new();
    let genesis = probe.genesis.clone();
    ChainDatabase::open_with(
        path,
        config,
        meridian_chain::GenesisSource::Embedded(genesis),
        std::sync::Arc::new(meridian_chain::ManualClock::new(now)),
        std::sync::Arc::new(meridian_chain::StandardEvaluator),
        std::sync::Arc::new(meridian_chain::NoopMarketEngine),
    )
    .unwrap()
}
