//! Signed transactions

use crate::canonical::{self, CanonicalBytes};
use crate::crypto;
use crate::error::{CryptoError, Result};
use crate::utils::current_time_millis;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::hash::{Hash, Hasher};
use uuid::Uuid;

/// What a transaction does to the ledger
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TransactionKind {
    /// Ordinary value transfer, must be covered by the sender's balance
    Transfer,
    /// Privileged issuance (exchange / reward), exempt from the balance check
    /// but limited to one per block
    Exchange,
}

impl TransactionKind {
    /// Whether the sender's balance is checked before applying
    pub fn is_exempt(&self) -> bool {
        matches!(self, TransactionKind::Exchange)
    }
}

impl fmt::Display for TransactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransactionKind::Transfer => write!(f, "TRANSFER"),
            TransactionKind::Exchange => write!(f, "EXCHANGE"),
        }
    }
}

/// An immutable, signed transfer between two identities.
///
/// Two transactions are equal exactly when their ids match; the id is the
/// duplicate and double-spend guard.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    id: String,
    sender: String,
    receiver: String,
    amount: u64,
    kind: TransactionKind,
    timestamp: u64,
    #[serde(default)]
    signature: String,
}

impl Transaction {
    /// Create an unsigned transaction with a fresh id and timestamp
    pub fn new(
        sender: impl Into<String>,
        receiver: impl Into<String>,
        amount: u64,
        kind: TransactionKind,
    ) -> Self {
        Self {
            id: Uuid::new_v4().simple().to_string(),
            sender: sender.into(),
            receiver: receiver.into(),
            amount,
            kind,
            timestamp: current_time_millis(),
            signature: String::new(),
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn sender(&self) -> &str {
        &self.sender
    }

    pub fn receiver(&self) -> &str {
        &self.receiver
    }

    pub fn amount(&self) -> u64 {
        self.amount
    }

    pub fn kind(&self) -> TransactionKind {
        self.kind
    }

    pub fn timestamp(&self) -> u64 {
        self.timestamp
    }

    pub fn signature(&self) -> &str {
        &self.signature
    }

    pub fn is_signed(&self) -> bool {
        !self.signature.is_empty()
    }

    /// Attach the creator's signature. A transaction is signed once.
    pub fn sign(&mut self, signature: String) -> Result<()> {
        if self.is_signed() {
            return Err(CryptoError::AlreadySigned.into());
        }
        self.signature = signature;
        Ok(())
    }

    /// Canonical bytes with the signature blanked
    pub fn payload(&self) -> Result<CanonicalBytes> {
        canonical::payload(self)
    }

    /// Whether the signature verifies against `sender` over the payload digest
    pub fn signature_valid(&self) -> bool {
        match self.payload() {
            Ok(payload) => crypto::verify(&self.sender, &payload.digest(), &self.signature),
            Err(_) => false,
        }
    }

    /// Identity comparison, by id only
    pub fn equals(&self, other: &Transaction) -> bool {
        self.id == other.id
    }
}

impl PartialEq for Transaction {
    fn eq(&self, other: &Self) -> bool {
        self.equals(other)
    }
}

impl Eq for Transaction {}

impl Hash for Transaction {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.id.hash(state);
    }
}
