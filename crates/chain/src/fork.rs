//! The fork tree: per-block linkage/validity metadata and the
//! store-and-index insertion algorithm.
//!
//! Every referenced block id has a node. A node whose body has not arrived
//! yet is a placeholder (`is_known == false`) created by the child that
//! referenced it, which keeps insertion order-independent. Linkage and
//! invalidity propagate to descendants by breadth-first walks over
//! `next_blocks`.

use meridian_primitives::{BlockId, BlockRecord, FullBlock};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;
use tracing::{debug, warn};

use crate::error::{ChainError, ChainResult};
use crate::store::ChainStore;

/// Fork-tree metadata of one known-or-referenced block id.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct BlockForkData {
    /// Children that reference this block as previous.
    pub next_blocks: BTreeSet<BlockId>,
    /// The block body has been received.
    pub is_known: bool,
    /// A chain of known blocks reaches from here back to genesis.
    pub is_linked: bool,
    /// The block lies on the current main chain.
    pub is_included: bool,
    /// Tri-state validity: unchecked / valid / invalid.
    pub is_valid: Option<bool>,
    /// Reason the block (or an ancestor) was rejected.
    pub invalid_reason: Option<String>,
}

impl BlockForkData {
    /// True once the block has been fully validated and applied.
    pub fn is_valid(&self) -> bool {
        self.is_valid == Some(true)
    }

    /// True if the block or an ancestor was rejected.
    pub fn is_invalid(&self) -> bool {
        self.is_valid == Some(false)
    }

    /// Whether the reorg controller may try switching to this block.
    pub fn can_link(&self) -> bool {
        self.is_linked && !self.is_invalid()
    }
}

impl ChainStore {
    /// Place a block in the fork tree and return the deepest linked
    /// descendant `(id, fork data)`, or the new node itself when it is
    /// not linked.
    ///
    /// Precondition: the block body has not been stored before.
    pub(crate) fn store_and_index(
        &self,
        block_id: BlockId,
        block: &FullBlock,
    ) -> ChainResult<(BlockId, BlockForkData)> {
        debug_assert!(
            !self.block_data.contains(&block_id)?,
            "store_and_index called twice for one block"
        );

        self.block_data.put(&block_id, block)?;
        if self.block_record.get(&block_id)?.is_none() {
            let latency = self.clock.now().saturating_sub(block.header.timestamp);
            self.block_record.put(&block_id, &BlockRecord::new(block, latency))?;
        }

        let mut siblings = self.fetch_blocks_at_number(block.block_num())?;
        if !siblings.contains(&block_id) {
            siblings.push(block_id);
            self.fork_number.put(&block.block_num(), &siblings)?;
        }

        // Tell the parent node about us, creating a placeholder if the
        // parent has never been referenced before.
        let previous = block.header.previous;
        let parent = match self.fork_data.get(&previous)? {
            Some(mut parent) => {
                parent.next_blocks.insert(block_id);
                self.fork_data.put(&previous, &parent)?;
                parent
            }
            None => {
                warn!(target: "chain::fork", parent = %previous, block = %block_id,
                      "previous block unknown, creating placeholder");
                let parent = BlockForkData {
                    next_blocks: BTreeSet::from([block_id]),
                    ..Default::default()
                };
                self.fork_data.put(&previous, &parent)?;
                parent
            }
        };

        match self.fork_data.get(&block_id)? {
            // A placeholder for this block already exists: children arrived
            // first. Keep them, mark the body known.
            Some(mut node) => {
                debug_assert!(!node.is_known && !node.is_linked);
                node.is_known = true;
                if parent.is_linked {
                    node.is_linked = true;
                    if parent.is_invalid() {
                        node.is_valid = Some(false);
                        node.invalid_reason = parent.invalid_reason.clone();
                        self.fork_data.put(&block_id, &node)?;
                        self.propagate_invalidity(
                            &node.next_blocks,
                            parent.invalid_reason.as_deref().unwrap_or("ancestor invalid"),
                        )?;
                        return Ok((block_id, node));
                    }
                    self.fork_data.put(&block_id, &node)?;
                    let children = node.next_blocks.clone();
                    return self.propagate_linkage(&children, block_id, node);
                }
                self.fork_data.put(&block_id, &node)?;
                Ok((block_id, node))
            }
            // First mention of this id: a fresh leaf.
            None => {
                let mut node = BlockForkData { is_known: true, ..Default::default() };
                node.is_linked = parent.is_linked;
                if parent.is_invalid() {
                    node.is_valid = Some(false);
                    node.invalid_reason = parent.invalid_reason.clone();
                }
                self.fork_data.put(&block_id, &node)?;
                Ok((block_id, node))
            }
        }
    }

    /// Breadth-first: mark every transitive descendant linked, tracking the
    /// one with the greatest block number.
    fn propagate_linkage(
        &self,
        children: &BTreeSet<BlockId>,
        start_id: BlockId,
        start_data: BlockForkData,
    ) -> ChainResult<(BlockId, BlockForkData)> {
        let mut deepest_num = self.block_number_of(&start_id)?;
        let mut deepest = (start_id, start_data);

        let mut frontier: BTreeSet<BlockId> = children.clone();
        while !frontier.is_empty() {
            let mut next_frontier = BTreeSet::new();
            for id in &frontier {
                let mut node = self
                    .fork_data
                    .get(id)?
                    .ok_or(ChainError::Inconsistent("fork child without fork data"))?;
                node.is_linked = true;
                next_frontier.extend(node.next_blocks.iter().copied());
                self.fork_data.put(id, &node)?;

                let number = self.block_number_of(id)?;
                if number > deepest_num {
                    deepest_num = number;
                    deepest = (*id, node);
                }
            }
            frontier = next_frontier;
        }
        Ok(deepest)
    }

    /// Breadth-first: mark every transitive descendant invalid with the
    /// ancestor's reason.
    pub(crate) fn propagate_invalidity(
        &self,
        children: &BTreeSet<BlockId>,
        reason: &str,
    ) -> ChainResult<()> {
        let mut frontier: BTreeSet<BlockId> = children.clone();
        while !frontier.is_empty() {
            let mut next_frontier = BTreeSet::new();
            for id in &frontier {
                let mut node = self
                    .fork_data
                    .get(id)?
                    .ok_or(ChainError::Inconsistent("fork child without fork data"))?;
                debug_assert!(!node.is_valid(), "invalidating a validated block");
                node.is_valid = Some(false);
                node.invalid_reason = Some(reason.to_string());
                next_frontier.extend(node.next_blocks.iter().copied());
                self.fork_data.put(id, &node)?;
            }
            frontier = next_frontier;
        }
        Ok(())
    }

    /// Mark a block and all its descendants invalid.
    pub(crate) fn mark_invalid(&self, block_id: &BlockId, reason: &str) -> ChainResult<()> {
        let mut node = self
            .fork_data
            .get(block_id)?
            .ok_or(ChainError::Inconsistent("marking unknown block invalid"))?;
        debug_assert!(!node.is_valid(), "invalidating a validated block");
        node.is_valid = Some(false);
        node.invalid_reason = Some(reason.to_string());
        self.fork_data.put(block_id, &node)?;
        self.propagate_invalidity(&node.next_blocks, reason)
    }

    /// Reset a block and all its descendants to unchecked, so a later
    /// switch re-validates them. Used at open for blocks that arrived from
    /// the future.
    pub(crate) fn mark_unchecked(&self, block_id: &BlockId) -> ChainResult<()> {
        let Some(mut node) = self.fork_data.get(block_id)? else {
            return Ok(());
        };
        debug_assert!(!node.is_valid(), "unchecking a validated block");
        node.is_valid = None;
        node.invalid_reason = None;
        self.fork_data.put(block_id, &node)?;

        let mut frontier = node.next_blocks;
        while !frontier.is_empty() {
            let mut next_frontier = BTreeSet::new();
            for id in &frontier {
                let mut child = self
                    .fork_data
                    .get(id)?
                    .ok_or(ChainError::Inconsistent("fork child without fork data"))?;
                child.is_valid = None;
                child.invalid_reason = None;
                next_frontier.extend(child.next_blocks.iter().copied());
                self.fork_data.put(id, &child)?;
            }
            frontier = next_frontier;
        }
        Ok(())
    }

    /// Flip a node's inclusion flag; inclusion also asserts validity.
    pub(crate) fn mark_included(&self, block_id: &BlockId, included: bool) -> ChainResult<()> {
        let mut node = self
            .fork_data
            .get(block_id)?
            .ok_or(ChainError::Inconsistent("marking unknown block included"))?;
        node.is_included = included;
        if included {
            node.is_valid = Some(true);
        }
        self.fork_data.put(block_id, &node)?;
        Ok(())
    }

    /// Walk `previous` pointers from `block_id` until an included block.
    ///
    /// The last element of the result is the common ancestor already on the
    /// main chain (possibly the zero genesis parent).
    pub(crate) fn get_fork_history(&self, block_id: &BlockId) -> ChainResult<Vec<BlockId>> {
        let mut history = vec![*block_id];
        let mut cursor = *block_id;
        loop {
            let header = self.get_block_header(&cursor)?;
            history.push(header.previous);
            if header.previous.is_zero() {
                debug!(target: "chain::fork", len = history.len(), "fork history reaches genesis");
                return Ok(history);
            }
            let previous = self
                .fork_data
                .get(&header.previous)?
                .ok_or(ChainError::Inconsistent("fork history hit unknown block"))?;
            if !previous.is_linked {
                return Err(ChainError::Inconsistent("fork history hit an unlinked block"));
            }
            if previous.is_included {
                return Ok(history);
            }
            cursor = header.previous;
        }
    }

    fn block_number_of(&self, block_id: &BlockId) -> ChainResult<u64> {
        Ok(self
            .block_record
            .get(block_id)?
            .ok_or(ChainError::UnknownBlock(*block_id))?
            .header
            .block_num)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ChainConfig;
    use meridian_primitives::{sha256, SignedBlockHeader};
    use std::sync::Arc;

    fn store() -> ChainStore {
        let store = ChainStore::in_memory(
            Arc::new(ChainConfig::default()),
            Arc::new(ManualClock::new(1_000_000)),
        );
        // The genesis parent node, as genesis initialization creates it.
        let genesis = BlockForkData {
            is_known: true,
            is_linked: true,
            is_included: true,
            is_valid: Some(true),
            ..Default::default()
        };
        store.fork_data.put(&BlockId::default(), &genesis).unwrap();
        store
    }

    fn block(previous: BlockId, block_num: u64, salt: u8) -> FullBlock {
        FullBlock {
            header: SignedBlockHeader {
                previous,
                block_num,
                timestamp: block_num * 10,
                transaction_digest: sha256(&[salt]),
                ..Default::default()
            },
            user_transactions: Vec::new(),
        }
    }

    #[test]
    fn linked_insertion_returns_the_new_leaf() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let (deepest, data) = store.store_and_index(first.id(), &first).unwrap();
        assert_eq!(deepest, first.id());
        assert!(data.is_known && data.is_linked);
        assert!(!data.is_included);
        assert_eq!(data.is_valid, None);
        assert_eq!(store.fetch_blocks_at_number(1).unwrap(), vec![first.id()]);
    }

    #[test]
    fn out_of_order_arrival_links_descendants() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let second = block(first.id(), 2, 0);
        let third = block(second.id(), 3, 0);

        // Children arrive before their parent: placeholders keep them.
        let (_, data) = store.store_and_index(second.id(), &second).unwrap();
        assert!(!data.is_linked);
        let (_, data) = store.store_and_index(third.id(), &third).unwrap();
        assert!(!data.is_linked);

        // The missing link arrives; everything links and the deepest
        // descendant comes back.
        let (deepest, data) = store.store_and_index(first.id(), &first).unwrap();
        assert_eq!(deepest, third.id());
        assert!(data.is_linked);
        for id in [first.id(), second.id(), third.id()] {
            assert!(store.get_fork_data(&id).unwrap().unwrap().is_linked);
        }
    }

    #[test]
    fn invalidity_is_inherited_by_descendants() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let second = block(first.id(), 2, 0);

        store.store_and_index(first.id(), &first).unwrap();
        store.mark_invalid(&first.id(), "bad signee").unwrap();

        let (_, data) = store.store_and_index(second.id(), &second).unwrap();
        assert!(data.is_invalid());
        assert_eq!(data.invalid_reason.as_deref(), Some("bad signee"));
        assert!(!data.can_link());
    }

    #[test]
    fn mark_unchecked_clears_the_subtree() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let second = block(first.id(), 2, 0);
        store.store_and_index(first.id(), &first).unwrap();
        store.mark_invalid(&first.id(), "time in future").unwrap();
        store.store_and_index(second.id(), &second).unwrap();

        store.mark_unchecked(&first.id()).unwrap();
        for id in [first.id(), second.id()] {
            let data = store.get_fork_data(&id).unwrap().unwrap();
            assert_eq!(data.is_valid, None);
            assert_eq!(data.invalid_reason, None);
        }
    }

    #[test]
    fn sibling_forks_share_the_number_index() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let fork_a = block(first.id(), 2, 0);
        let fork_b = block(first.id(), 2, 1);
        store.store_and_index(first.id(), &first).unwrap();
        store.store_and_index(fork_a.id(), &fork_a).unwrap();
        store.store_and_index(fork_b.id(), &fork_b).unwrap();

        let mut at_two = store.fetch_blocks_at_number(2).unwrap();
        at_two.sort();
        let mut expected = vec![fork_a.id(), fork_b.id()];
        expected.sort();
        assert_eq!(at_two, expected);

        let parent = store.get_fork_data(&first.id()).unwrap().unwrap();
        assert_eq!(parent.next_blocks.len(), 2);
    }

    #[test]
    fn fork_history_stops_at_an_included_block() {
        let store = store();
        let first = block(BlockId::default(), 1, 0);
        let second = block(first.id(), 2, 0);
        store.store_and_index(first.id(), &first).unwrap();
        store.store_and_index(second.id(), &second).unwrap();
        store.mark_included(&first.id(), true).unwrap();

        let history = store.get_fork_history(&second.id()).unwrap();
        assert_eq!(history, vec![second.id(), first.id()]);
    }
}
