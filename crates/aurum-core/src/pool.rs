// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - TRANSACTION POOL
//
// Unconfirmed transactions awaiting inclusion, stored by value and indexed
// by content hash. Selection order: fee descending, then earliest timestamp,
// then id lexicographic. Entries expire after a TTL; at capacity the lowest
// ranked entry is evicted for a better-paying newcomer.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::ChainError;
use crate::Transaction;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Maximum pool entries before eviction kicks in
pub const MAX_POOL_SIZE: usize = 10_000;

/// Entries older than this are purged by the sweeper (1 hour)
pub const TX_EXPIRATION_MS: u64 = 3_600_000;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PoolEntry {
    pub transaction: Transaction,
    /// Millis since Unix epoch when the entry was accepted locally
    pub received_at: u64,
}

/// Ranking key: better transactions sort first.
fn rank(tx: &Transaction) -> (std::cmp::Reverse<u64>, u64, String) {
    (std::cmp::Reverse(tx.fee), tx.timestamp, tx.id.clone())
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TxPool {
    /// BTreeMap keyed by id for deterministic iteration and serialization
    entries: BTreeMap<String, PoolEntry>,
    pub total_received: u64,
    pub total_accepted: u64,
    pub total_rejected: u64,
    pub total_expired: u64,
}

impl Default for TxPool {
    fn default() -> Self {
        Self::new()
    }
}

impl TxPool {
    pub fn new() -> Self {
        Self {
            entries: BTreeMap::new(),
            total_received: 0,
            total_accepted: 0,
            total_rejected: 0,
            total_expired: 0,
        }
    }

    /// Insert a transaction the ledger has already validated.
    /// Rejects duplicates; at capacity, evicts the worst-ranked entry if the
    /// newcomer ranks better, otherwise fails with PoolFull.
    pub fn insert(&mut self, tx: Transaction, now_ms: u64) -> Result<(), ChainError> {
        self.total_received += 1;

        if self.entries.contains_key(&tx.id) {
            self.total_rejected += 1;
            return Err(ChainError::DuplicateTransaction(tx.id));
        }

        if self.entries.len() >= MAX_POOL_SIZE {
            let worst = self
                .entries
                .values()
                .max_by_key(|e| rank(&e.transaction))
                .map(|e| (e.transaction.id.clone(), rank(&e.transaction)));
            match worst {
                Some((worst_id, worst_rank)) if rank(&tx) < worst_rank => {
                    self.entries.remove(&worst_id);
                }
                _ => {
                    self.total_rejected += 1;
                    return Err(ChainError::PoolFull);
                }
            }
        }

        self.total_accepted += 1;
        self.entries.insert(
            tx.id.clone(),
            PoolEntry {
                transaction: tx,
                received_at: now_ms,
            },
        );
        Ok(())
    }

    pub fn contains(&self, id: &str) -> bool {
        self.entries.contains_key(id)
    }

    pub fn get(&self, id: &str) -> Option<&Transaction> {
        self.entries.get(id).map(|e| &e.transaction)
    }

    pub fn remove(&mut self, id: &str) -> Option<Transaction> {
        self.entries.remove(id).map(|e| e.transaction)
    }

    /// All transactions in selection order (fee desc, timestamp asc, id).
    pub fn ordered(&self) -> Vec<Transaction> {
        let mut txs: Vec<Transaction> =
            self.entries.values().map(|e| e.transaction.clone()).collect();
        txs.sort_by_key(rank);
        txs
    }

    /// Purge entries older than the TTL. Returns how many were dropped.
    pub fn remove_expired(&mut self, now_ms: u64) -> usize {
        let expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| now_ms.saturating_sub(e.received_at) > TX_EXPIRATION_MS)
            .map(|(id, _)| id.clone())
            .collect();

        for id in &expired {
            self.entries.remove(id);
        }
        self.total_expired += expired.len() as u64;
        expired.len()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxKind;

    fn tx(sender: &str, fee: u64, timestamp: u64, sequence: u64) -> Transaction {
        Transaction::new(
            TxKind::Transfer,
            sender,
            "aur1bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            10,
            fee,
            timestamp,
            None,
            sequence,
        )
    }

    #[test]
    fn test_insert_and_duplicate() {
        let mut pool = TxPool::new();
        let t = tx("aur1a", 1, 1_000, 0);
        pool.insert(t.clone(), 0).unwrap();
        assert_eq!(pool.len(), 1);

        match pool.insert(t, 0) {
            Err(ChainError::DuplicateTransaction(_)) => {}
            other => panic!("expected DuplicateTransaction, got {:?}", other),
        }
    }

    #[test]
    fn test_selection_order() {
        let mut pool = TxPool::new();
        let low_fee = tx("aur1a", 1, 1_000, 0);
        let high_fee = tx("aur1b", 9, 2_000, 0);
        let high_fee_earlier = tx("aur1c", 9, 1_500, 0);
        pool.insert(low_fee.clone(), 0).unwrap();
        pool.insert(high_fee.clone(), 0).unwrap();
        pool.insert(high_fee_earlier.clone(), 0).unwrap();

        let ordered = pool.ordered();
        assert_eq!(ordered[0].id, high_fee_earlier.id);
        assert_eq!(ordered[1].id, high_fee.id);
        assert_eq!(ordered[2].id, low_fee.id);
    }

    #[test]
    fn test_expiry() {
        let mut pool = TxPool::new();
        pool.insert(tx("aur1a", 1, 1_000, 0), 0).unwrap();
        pool.insert(tx("aur1b", 1, 1_000, 0), TX_EXPIRATION_MS).unwrap();

        let dropped = pool.remove_expired(TX_EXPIRATION_MS + 1);
        assert_eq!(dropped, 1);
        assert_eq!(pool.len(), 1);
        assert_eq!(pool.total_expired, 1);
    }

    #[test]
    fn test_eviction_prefers_better_fee() {
        let mut pool = TxPool::new();
        for i in 0..MAX_POOL_SIZE {
            pool.insert(tx("aur1a", 2, i as u64, i as u64), 0).unwrap();
        }

        // Worse than everything in the pool → rejected
        match pool.insert(tx("aur1b", 1, 0, 0), 0) {
            Err(ChainError::PoolFull) => {}
            other => panic!("expected PoolFull, got {:?}", other),
        }

        // Better fee → accepted, worst entry evicted
        pool.insert(tx("aur1c", 5, 0, 0), 0).unwrap();
        assert_eq!(pool.len(), MAX_POOL_SIZE);
    }
}
