// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - MERKLE ROOT
//
// Leaf = SHA-256 of a transaction's canonical signing bytes (no signature).
// Internal node = SHA-256(left || right); an odd node pairs with itself.
// Empty list → the all-zero root. Single leaf → that leaf.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::{Transaction, ZERO_HASH};
use sha2::{Digest, Sha256};

/// Compute the hex-encoded Merkle root of an ordered transaction list.
pub fn merkle_root(transactions: &[Transaction]) -> String {
    if transactions.is_empty() {
        return ZERO_HASH.to_string();
    }

    let mut level: Vec<[u8; 32]> = transactions.iter().map(|tx| tx.leaf_hash()).collect();

    while level.len() > 1 {
        let mut next = Vec::with_capacity(level.len().div_ceil(2));
        for pair in level.chunks(2) {
            let left = pair[0];
            let right = pair.get(1).copied().unwrap_or(left); // duplicate odd node
            let mut hasher = Sha256::new();
            hasher.update(left);
            hasher.update(right);
            next.push(hasher.finalize().into());
        }
        level = next;
    }

    hex::encode(level[0])
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::TxKind;

    fn tx(amount: u64, sequence: u64) -> Transaction {
        Transaction::new(
            TxKind::Transfer,
            "aur1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aur1bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            amount,
            1,
            1_700_000_001_000,
            None,
            sequence,
        )
    }

    #[test]
    fn test_empty_list_is_zero_root() {
        assert_eq!(merkle_root(&[]), ZERO_HASH);
    }

    #[test]
    fn test_single_tx_root_equals_leaf() {
        let t = tx(10, 0);
        assert_eq!(merkle_root(std::slice::from_ref(&t)), hex::encode(t.leaf_hash()));
        // and the leaf pre-image is the id pre-image
        assert_eq!(merkle_root(std::slice::from_ref(&t)), t.id);
    }

    #[test]
    fn test_root_is_order_sensitive() {
        let a = tx(10, 0);
        let b = tx(20, 1);
        let forward = merkle_root(&[a.clone(), b.clone()]);
        let reversed = merkle_root(&[b, a]);
        assert_ne!(forward, reversed);
    }

    #[test]
    fn test_odd_count_duplicates_last() {
        // Three leaves: root = H(H(l0||l1) || H(l2||l2))
        let txs = [tx(1, 0), tx(2, 1), tx(3, 2)];
        let l: Vec<[u8; 32]> = txs.iter().map(|t| t.leaf_hash()).collect();

        let h = |x: &[u8], y: &[u8]| -> [u8; 32] {
            let mut hasher = Sha256::new();
            hasher.update(x);
            hasher.update(y);
            hasher.finalize().into()
        };
        let left = h(&l[0], &l[1]);
        let right = h(&l[2], &l[2]);
        assert_eq!(merkle_root(&txs), hex::encode(h(&left, &right)));
    }

    #[test]
    fn test_signature_does_not_affect_root() {
        let mut a = tx(10, 0);
        let plain = merkle_root(std::slice::from_ref(&a));
        a.signature = "ab".repeat(65);
        assert_eq!(merkle_root(std::slice::from_ref(&a)), plain);
    }
}
