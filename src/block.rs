//! Blocks and the genesis sentinel

use crate::canonical::{self, CanonicalBytes};
use crate::crypto;
use crate::error::{CryptoError, Result};
use crate::transaction::Transaction;
use crate::utils::current_time_millis;
use serde::{Deserialize, Serialize};

/// Previous-hash value carried by the genesis block
pub const GENESIS_PREVIOUS_HASH: &str = "genesis_hash";

/// Forger value carried by the genesis block
pub const GENESIS_FORGER: &str = "genesis_forger";

/// An ordered batch of transactions linked to its predecessor by hash.
///
/// Equality is structural over every field, which is what the genesis check
/// relies on.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Block {
    transactions: Vec<Transaction>,
    previous_hash: String,
    forger: String,
    block_number: u64,
    timestamp: u64,
    #[serde(default)]
    signature: String,
}

impl Block {
    /// Create an unsigned block
    pub fn new(
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        forger: impl Into<String>,
        block_number: u64,
    ) -> Self {
        Self {
            transactions,
            previous_hash: previous_hash.into(),
            forger: forger.into(),
            block_number,
            timestamp: current_time_millis(),
            signature: String::new(),
        }
    }

    /// The fixed first block every chain starts from
    pub fn genesis() -> Self {
        Self {
            transactions: Vec::new(),
            previous_hash: GENESIS_PREVIOUS_HASH.to_string(),
            forger: GENESIS_FORGER.to_string(),
            block_number: 0,
            timestamp: 0,
            signature: String::new(),
        }
    }

    pub fn transactions(&self) -> &[Transaction] {
        &self.transactions
    }

    pub fn previous_hash(&self) -> &str {
        &self.previous_hash
    }

    pub fn forger(&self) -> &str {
        &self.forger
    }

    pub fn block_number(&self) -> u64 {
        self.block_number
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    /// Attach the forger's signature. A block is signed once.
    pub fn sign(&mut self, signature: String) -> Result<()> {
        if !self.signature.is_empty() {
            return Err(CryptoError::AlreadySigned.into());
        }
        self.signature = signature;
        Ok(())
    }

    /// Canonical bytes with the block signature blanked. Transactions keep
    /// their own signatures.
    pub fn payload(&self) -> Result<CanonicalBytes> {
        canonical::payload(self)
    }

    /// Hash successors must carry as `previous_hash`
    pub fn hash(&self) -> Result<String> {
        Ok(self.payload()?.hash_hex())
    }

    /// Whether the block signature verifies against `forger`
    pub fn signature_valid(&self) -> bool {
        match self.payload() {
            Ok(payload) => crypto::verify(&self.forger, &payload.digest(), &self.signature),
            Err(_) => false,
        }
    }

    /// Ids of every transaction in the block, in order
    pub fn transaction_ids(&self) -> impl Iterator<Item = &str> {
        self.transactions.iter().map(|tx| tx.id())
    }
}
