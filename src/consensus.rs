//! Consensus rules for blocks and chains
//!
//! A candidate chain is accepted only if, in order:
//!
//! 1. its first block is exactly the genesis sentinel,
//! 2. every later block links to its predecessor (number, hash, forger
//!    signature),
//! 3. replaying every transaction from genesis keeps the ledger consistent:
//!    no transaction id twice, at most one exempt transaction per block, every
//!    transfer covered by the sender's balance at that point in history, and
//!    every transaction signature valid.
//!
//! The first failure wins. Nothing here touches node state; callers swap in
//! the resulting [`ReplayState`] themselves.

use crate::block::Block;
use crate::error::ValidationError;
use crate::ledger::{AccountLedger, LedgerEffect};
use crate::transaction::Transaction;
use std::collections::HashSet;

/// Ledger and confirmed ids reconstructed by replaying a chain
#[derive(Debug, Clone, Default)]
pub struct ReplayState {
    pub ledger: AccountLedger,
    pub seen: HashSet<String>,
}

impl ReplayState {
    pub fn new() -> Self {
        Self::default()
    }
}

/// Check that `current` directly extends `previous`.
pub fn validate_link(previous: &Block, current: &Block) -> Result<(), ValidationError> {
    let broken = || ValidationError::InvalidLinkage {
        block_number: current.block_number(),
    };

    if previous.block_number().checked_add(1) != Some(current.block_number()) {
        return Err(broken());
    }
    let previous_hash = previous.hash().map_err(|_| broken())?;
    if previous_hash != current.previous_hash() {
        return Err(broken());
    }
    if !current.signature_valid() {
        return Err(broken());
    }
    Ok(())
}

/// Replay one block on top of `state`.
///
/// On failure the ledger may hold a partial replay while `seen` is left
/// untouched; callers that need atomicity run [`check_block`] first.
pub fn replay_block(state: &mut ReplayState, block: &Block) -> Result<(), ValidationError> {
    let block_ids = replay_onto(&mut state.ledger, &state.seen, block)?;
    state.seen.extend(block_ids);
    Ok(())
}

/// Check that `block` replays cleanly on top of `state` without touching it.
///
/// Only the balances the block moves are copied into a scratch ledger.
pub fn check_block(state: &ReplayState, block: &Block) -> Result<(), ValidationError> {
    let touched = block
        .transactions()
        .iter()
        .flat_map(|tx| [tx.sender(), tx.receiver()]);
    let mut scratch = state.ledger.restricted_to(touched);
    replay_onto(&mut scratch, &state.seen, block).map(|_| ())
}

/// Apply a block's transactions to `ledger`, returning the ids it confirmed.
fn replay_onto(
    ledger: &mut AccountLedger,
    confirmed: &HashSet<String>,
    block: &Block,
) -> Result<HashSet<String>, ValidationError> {
    let mut block_ids = HashSet::new();
    let mut has_exempt = false;

    for tx in block.transactions() {
        if confirmed.contains(tx.id()) || !block_ids.insert(tx.id().to_string()) {
            return Err(ValidationError::DuplicateTransaction {
                id: tx.id().to_string(),
            });
        }

        if tx.kind().is_exempt() {
            if has_exempt {
                return Err(ValidationError::MultipleRewardsInBlock {
                    block_number: block.block_number(),
                });
            }
            has_exempt = true;
        } else {
            tx.check(ledger)?;
        }

        if !tx.signature_valid() {
            return Err(ValidationError::InvalidSignature);
        }

        tx.apply(ledger)?;
    }
    Ok(block_ids)
}

/// Validate a full candidate chain from genesis and return its replayed state.
pub fn validate_chain(chain: &[Block]) -> Result<ReplayState, ValidationError> {
    match chain.first() {
        Some(first) if *first == Block::genesis() => {},
        _ => return Err(ValidationError::InvalidGenesis),
    }

    for pair in chain.windows(2) {
        validate_link(&pair[0], &pair[1])?;
    }

    let mut state = ReplayState::new();
    for block in chain {
        replay_block(&mut state, block)?;
    }
    Ok(state)
}

/// Pick the pending transactions a new block on top of `state` can carry.
///
/// Candidates are taken in order and kept only if they would replay cleanly:
/// not yet confirmed, validly signed, covered by the balance left after the
/// transactions already picked, and at most one exempt transaction. Stops at
/// `limit`.
pub fn select_covered(
    state: &ReplayState,
    candidates: impl IntoIterator<Item = Transaction>,
    limit: usize,
) -> Vec<Transaction> {
    let mut ledger = state.ledger.clone();
    let mut picked_ids = HashSet::new();
    let mut has_exempt = false;
    let mut selected = Vec::new();

    for tx in candidates {
        if selected.len() >= limit {
            break;
        }
        if state.seen.contains(tx.id()) || picked_ids.contains(tx.id()) {
            continue;
        }
        if tx.kind().is_exempt() && has_exempt {
            continue;
        }
        if tx.check(&ledger).is_err() || !tx.signature_valid() {
            continue;
        }
        if tx.apply(&mut ledger).is_err() {
            continue;
        }
        has_exempt |= tx.kind().is_exempt();
        picked_ids.insert(tx.id().to_string());
        selected.push(tx);
    }
    selected
}
