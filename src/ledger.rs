//! Account balances derived from confirmed transactions

use crate::error::ValidationError;
use crate::transaction::Transaction;
use serde::Serialize;
use std::collections::HashMap;

/// Mapping from identity to balance. Unseen identities hold 0.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct AccountLedger {
    balances: HashMap<String, i64>,
}

impl AccountLedger {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn balance(&self, identity: &str) -> i64 {
        self.balances.get(identity).copied().unwrap_or(0)
    }

    /// Number of identities that have appeared in a transaction
    pub fn len(&self) -> usize {
        self.balances.len()
    }

    pub fn is_empty(&self) -> bool {
        self.balances.is_empty()
    }

    /// Copy of the balances of `identities` only; every other identity reads 0.
    pub fn restricted_to<'a>(&self, identities: impl IntoIterator<Item = &'a str>) -> Self {
        let balances = identities
            .into_iter()
            .filter_map(|identity| {
                self.balances
                    .get_key_value(identity)
                    .map(|(key, balance)| (key.clone(), *balance))
            })
            .collect();
        Self { balances }
    }

    fn adjust(&mut self, identity: &str, delta: i64) -> Option<()> {
        let entry = self.balances.entry(identity.to_string()).or_insert(0);
        *entry = entry.checked_add(delta)?;
        Some(())
    }
}

/// The effect a confirmed item has on the ledger.
///
/// `check` looks at the ledger as it stands immediately before the item;
/// `apply` mutates it and must leave it untouched when it fails.
pub trait LedgerEffect {
    fn check(&self, ledger: &AccountLedger) -> Result<(), ValidationError>;

    fn apply(&self, ledger: &mut AccountLedger) -> Result<(), ValidationError>;
}

impl LedgerEffect for Transaction {
    fn check(&self, ledger: &AccountLedger) -> Result<(), ValidationError> {
        let amount = signed_amount(self)?;
        if self.kind().is_exempt() {
            return Ok(());
        }
        let balance = ledger.balance(self.sender());
        if balance < amount {
            return Err(ValidationError::InsufficientFunds {
                id: self.id().to_string(),
                balance,
                amount: self.amount(),
            });
        }
        Ok(())
    }

    fn apply(&self, ledger: &mut AccountLedger) -> Result<(), ValidationError> {
        let amount = signed_amount(self)?;
        let overflow = || ValidationError::InvalidAmount {
            id: self.id().to_string(),
        };

        // Pre-check both sides so a failure never leaves a half-applied transfer.
        let sender_after = ledger.balance(self.sender()).checked_sub(amount);
        let receiver_after = if self.sender() == self.receiver() {
            Some(ledger.balance(self.receiver()))
        } else {
            ledger.balance(self.receiver()).checked_add(amount)
        };
        if sender_after.is_none() || receiver_after.is_none() {
            return Err(overflow());
        }

        ledger.adjust(self.sender(), -amount).ok_or_else(overflow)?;
        ledger.adjust(self.receiver(), amount).ok_or_else(overflow)?;
        Ok(())
    }
}

fn signed_amount(tx: &Transaction) -> Result<i64, ValidationError> {
    i64::try_from(tx.amount()).map_err(|_| ValidationError::InvalidAmount {
        id: tx.id().to_string(),
    })
}
