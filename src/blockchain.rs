//! The local chain and its authoritative ledger

use crate::block::Block;
use crate::consensus::{self, ReplayState};
use crate::error::ValidationError;
use crate::ledger::AccountLedger;
use std::collections::HashSet;

/// Local chain state. Only `append_block` and `adopt_chain` mutate it, and
/// both leave it untouched when they fail.
#[derive(Debug, Clone)]
pub struct Blockchain {
    blocks: Vec<Block>,
    state: ReplayState,
}

impl Default for Blockchain {
    fn default() -> Self {
        Self::new()
    }
}

impl Blockchain {
    /// A chain holding only the genesis block
    pub fn new() -> Self {
        Self {
            blocks: vec![Block::genesis()],
            state: ReplayState::new(),
        }
    }

    pub fn blocks(&self) -> &[Block] {
        &self.blocks
    }

    pub fn len(&self) -> usize {
        self.blocks.len()
    }

    /// A chain always holds at least the genesis block
    pub fn is_empty(&self) -> bool {
        false
    }

    pub fn latest_block(&self) -> &Block {
        // The genesis block is never removed.
        &self.blocks[self.blocks.len() - 1]
    }

    /// Ledger and confirmed ids as of the tip
    pub fn state(&self) -> &ReplayState {
        &self.state
    }

    pub fn ledger(&self) -> &AccountLedger {
        &self.state.ledger
    }

    pub fn balance(&self, identity: &str) -> i64 {
        self.state.ledger.balance(identity)
    }

    /// Whether a transaction id is already confirmed on this chain
    pub fn contains_transaction(&self, id: &str) -> bool {
        self.state.seen.contains(id)
    }

    /// Extend the chain by one block received from gossip or forged locally.
    ///
    /// Returns the ids the block confirmed.
    pub fn append_block(&mut self, block: Block) -> Result<HashSet<String>, ValidationError> {
        consensus::validate_link(self.latest_block(), &block)?;

        consensus::check_block(&self.state, &block)?;
        // Cannot fail once the check above passed.
        consensus::replay_block(&mut self.state, &block)?;

        let confirmed = block.transaction_ids().map(str::to_string).collect();
        self.blocks.push(block);
        Ok(confirmed)
    }

    /// Replace the local chain with a strictly longer valid candidate.
    ///
    /// Returns every transaction id confirmed by the adopted chain.
    pub fn adopt_chain(&mut self, candidate: Vec<Block>) -> Result<HashSet<String>, ValidationError> {
        if candidate.len() <= self.blocks.len() {
            return Err(ValidationError::ChainNotLonger {
                candidate: candidate.len(),
                local: self.blocks.len(),
            });
        }

        let state = consensus::validate_chain(&candidate)?;
        let confirmed = state.seen.clone();
        self.blocks = candidate;
        self.state = state;
        Ok(confirmed)
    }
}
