//! Wallet: a key pair that creates signed transactions and blocks

use crate::block::Block;
use crate::canonical::CanonicalBytes;
use crate::crypto::{KeyPair, KeyType};
use crate::error::Result;
use crate::transaction::{Transaction, TransactionKind};

/// Owns this process's signing key. The exported public key is both the
/// account address and the wallet's name on the network.
#[derive(Debug, Clone)]
pub struct Wallet {
    key_pair: KeyPair,
}

impl Wallet {
    pub fn new(key_pair: KeyPair) -> Self {
        Self { key_pair }
    }

    pub fn generate(key_type: KeyType) -> Self {
        Self::new(KeyPair::generate(key_type))
    }

    pub fn key_type(&self) -> KeyType {
        self.key_pair.key_type()
    }

    pub fn public_key_string(&self) -> String {
        self.key_pair.export_public()
    }

    /// Sign the digest of a canonical payload
    pub fn sign(&self, payload: &CanonicalBytes) -> String {
        self.key_pair.sign(&payload.digest())
    }

    /// Create and sign a transaction from this wallet
    pub fn create_transaction(
        &self,
        receiver: impl Into<String>,
        amount: u64,
        kind: TransactionKind,
    ) -> Result<Transaction> {
        let mut transaction = Transaction::new(self.public_key_string(), receiver, amount, kind);
        let signature = self.sign(&transaction.payload()?);
        transaction.sign(signature)?;
        Ok(transaction)
    }

    /// Create and sign a block forged by this wallet
    pub fn create_block(
        &self,
        transactions: Vec<Transaction>,
        previous_hash: impl Into<String>,
        block_number: u64,
    ) -> Result<Block> {
        let mut block = Block::new(transactions, previous_hash, self.public_key_string(), block_number);
        let signature = self.sign(&block.payload()?);
        block.sign(signature)?;
        Ok(block)
    }
}
