//! Pending transactions waiting to be confirmed

use crate::transaction::Transaction;
use indexmap::IndexMap;
use std::collections::HashSet;

/// Staging set of signed, unconfirmed transactions keyed by id.
///
/// Iteration order is admission order, which block assembly uses as an
/// oldest-first policy.
#[derive(Debug, Clone, Default)]
pub struct TransactionPool {
    transactions: IndexMap<String, Transaction>,
}

impl TransactionPool {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert `transaction` unless its id is already pending.
    pub fn admit(&mut self, transaction: Transaction) -> bool {
        if self.transactions.contains_key(transaction.id()) {
            return false;
        }
        self.transactions
            .insert(transaction.id().to_string(), transaction);
        true
    }

    pub fn contains(&self, id: &str) -> bool {
        self.transactions.contains_key(id)
    }

    /// Remove every pending transaction whose id is in `confirmed`.
    /// Returns how many were removed.
    pub fn drain_confirmed(&mut self, confirmed: &HashSet<String>) -> usize {
        let before = self.transactions.len();
        self.transactions.retain(|id, _| !confirmed.contains(id));
        before - self.transactions.len()
    }

    /// Owned copy of the pending set, oldest first
    pub fn snapshot(&self) -> Vec<Transaction> {
        self.transactions.values().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.transactions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.transactions.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;

    fn tx(amount: u64) -> Transaction {
        Transaction::new("alice", "bob", amount, TransactionKind::Transfer)
    }

    #[test]
    fn test_admit_is_idempotent() {
        let mut pool = TransactionPool::new();
        let t = tx(1);
        assert!(pool.admit(t.clone()));
        assert!(!pool.admit(t.clone()));
        assert_eq!(pool.len(), 1);
        assert!(pool.contains(t.id()));
    }

    #[test]
    fn test_drain_removes_exactly_given_ids() {
        let mut pool = TransactionPool::new();
        let (a, b, c) = (tx(1), tx(2), tx(3));
        for t in [&a, &b, &c] {
            pool.admit(t.clone());
        }

        let confirmed: HashSet<String> = [a.id().to_string(), "unknown".to_string()].into();
        assert_eq!(pool.drain_confirmed(&confirmed), 1);
        assert!(!pool.contains(a.id()));
        assert!(pool.contains(b.id()));
        assert!(pool.contains(c.id()));
    }

    #[test]
    fn test_snapshot_is_oldest_first() {
        let mut pool = TransactionPool::new();
        let (a, b) = (tx(1), tx(2));
        pool.admit(a.clone());
        pool.admit(b.clone());
        let ids: Vec<String> = pool.snapshot().iter().map(|t| t.id().to_string()).collect();
        assert_eq!(ids, vec![a.id().to_string(), b.id().to_string()]);
    }
}
