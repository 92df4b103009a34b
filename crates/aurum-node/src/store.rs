// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - CHAIN STORE
//
// sled key-value store for per-block and per-transaction records, plus the
// JSON ledger snapshot. Keys:
//   block:h:<height>  → serialized block (height zero-padded for ordering)
//   block:x:<hash>    → serialized block
//   tx:<id>           → serialized transaction
// Snapshot writes go through a temp file + rename so a crash never leaves
// a torn blockchain_state.json.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Block, Ledger, Transaction};
use std::path::{Path, PathBuf};

pub const SNAPSHOT_FILE: &str = "blockchain_state.json";
pub const DB_DIR: &str = "blockchain/db";

#[derive(Debug)]
pub struct StoreError(pub String);

impl std::fmt::Display for StoreError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        write!(f, "StorageFailure: {}", self.0)
    }
}

impl std::error::Error for StoreError {}

fn height_key(height: u64) -> String {
    // Zero-padded so sled's lexicographic prefix scan is numeric
    format!("block:h:{:020}", height)
}

fn hash_key(hash: &str) -> String {
    format!("block:x:{}", hash)
}

fn tx_key(id: &str) -> String {
    format!("tx:{}", id)
}

pub struct ChainStore {
    db: sled::Db,
    data_dir: PathBuf,
}

impl ChainStore {
    pub fn open(data_dir: &Path) -> Result<Self, StoreError> {
        let db_path = data_dir.join(DB_DIR);
        let db = sled::open(&db_path).map_err(|e| StoreError(e.to_string()))?;
        Ok(Self {
            db,
            data_dir: data_dir.to_path_buf(),
        })
    }

    /// Index one block and its transactions. Fire-and-forget durability:
    /// the snapshot is the recovery anchor, these records fill the tail.
    pub fn put_block(&self, block: &Block) -> Result<(), StoreError> {
        let encoded = serde_json::to_vec(block).map_err(|e| StoreError(e.to_string()))?;
        self.db
            .insert(height_key(block.header.height).as_bytes(), encoded.clone())
            .map_err(|e| StoreError(e.to_string()))?;
        self.db
            .insert(hash_key(&block.hash()).as_bytes(), encoded)
            .map_err(|e| StoreError(e.to_string()))?;

        for tx in &block.transactions {
            let tx_json = serde_json::to_vec(tx).map_err(|e| StoreError(e.to_string()))?;
            self.db
                .insert(tx_key(&tx.id).as_bytes(), tx_json)
                .map_err(|e| StoreError(e.to_string()))?;
        }
        Ok(())
    }

    pub fn block_by_height(&self, height: u64) -> Result<Option<Block>, StoreError> {
        self.get_json(height_key(height).as_bytes())
    }

    pub fn block_by_hash(&self, hash: &str) -> Result<Option<Block>, StoreError> {
        self.get_json(hash_key(hash).as_bytes())
    }

    pub fn transaction(&self, id: &str) -> Result<Option<Transaction>, StoreError> {
        self.get_json(tx_key(id).as_bytes())
    }

    fn get_json<T: serde::de::DeserializeOwned>(&self, key: &[u8]) -> Result<Option<T>, StoreError> {
        match self.db.get(key).map_err(|e| StoreError(e.to_string()))? {
            Some(raw) => serde_json::from_slice(&raw)
                .map(Some)
                .map_err(|e| StoreError(e.to_string())),
            None => Ok(None),
        }
    }

    /// Blocks with height strictly above `height`, ascending. Used by crash
    /// recovery to replay the tail the snapshot missed.
    pub fn blocks_above(&self, height: u64) -> Result<Vec<Block>, StoreError> {
        let mut out = Vec::new();
        for entry in self.db.scan_prefix(b"block:h:") {
            let (_, raw) = entry.map_err(|e| StoreError(e.to_string()))?;
            let block: Block =
                serde_json::from_slice(&raw).map_err(|e| StoreError(e.to_string()))?;
            if block.header.height > height {
                out.push(block);
            }
        }
        out.sort_by_key(|b| b.header.height);
        Ok(out)
    }

    pub fn flush(&self) -> Result<(), StoreError> {
        self.db.flush().map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }

    // ─────────────────────────────────────────────────────────────────
    // SNAPSHOT
    // ─────────────────────────────────────────────────────────────────

    pub fn snapshot_path(&self) -> PathBuf {
        self.data_dir.join(SNAPSHOT_FILE)
    }

    /// Atomic snapshot write: serialize to <file>.tmp, then rename over the
    /// live file.
    pub fn save_snapshot(&self, ledger: &Ledger) -> Result<(), StoreError> {
        let path = self.snapshot_path();
        let tmp = path.with_extension("json.tmp");
        let json = serde_json::to_vec(ledger).map_err(|e| StoreError(e.to_string()))?;
        std::fs::write(&tmp, &json).map_err(|e| StoreError(e.to_string()))?;
        std::fs::rename(&tmp, &path).map_err(|e| StoreError(e.to_string()))?;
        Ok(())
    }

    /// Load the snapshot if one exists. The returned ledger has its indexes
    /// rebuilt and is ready to use.
    pub fn load_snapshot(&self) -> Result<Option<Ledger>, StoreError> {
        let path = self.snapshot_path();
        let raw = match std::fs::read_to_string(&path) {
            Ok(raw) => raw,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(None),
            Err(e) => return Err(StoreError(e.to_string())),
        };
        let mut ledger: Ledger =
            serde_json::from_str(&raw).map_err(|e| StoreError(e.to_string()))?;
        ledger.rebuild_indexes();
        Ok(Some(ledger))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use aurum_core::ChainParams;

    fn ledger_with_blocks(count: usize) -> (Ledger, aurum_crypto::KeyPair) {
        let mut params = ChainParams::new("store-test");
        params.block_reward = 100;
        let mut ledger = Ledger::new(params);
        let keys = aurum_crypto::generate_keypair();
        for i in 0..count {
            let ts = 1_700_000_000_000 + (i as u64 + 1) * 15_000;
            let block = ledger
                .assemble_block(&keys.address(), &keys.secret_key, ts)
                .unwrap();
            ledger.append_block(block, ts).unwrap();
        }
        (ledger, keys)
    }

    #[test]
    fn test_block_and_tx_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let (ledger, _) = ledger_with_blocks(2);

        let block = ledger.block_by_height(1).unwrap().clone();
        store.put_block(&block).unwrap();

        assert_eq!(store.block_by_height(1).unwrap(), Some(block.clone()));
        assert_eq!(store.block_by_hash(&block.hash()).unwrap(), Some(block.clone()));
        let reward_id = &block.transactions[0].id;
        assert_eq!(
            store.transaction(reward_id).unwrap().map(|t| t.id),
            Some(reward_id.clone())
        );
    }

    #[test]
    fn test_blocks_above() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        let (ledger, _) = ledger_with_blocks(3);
        for h in 1..=3 {
            store.put_block(ledger.block_by_height(h).unwrap()).unwrap();
        }

        let tail = store.blocks_above(1).unwrap();
        assert_eq!(tail.len(), 2);
        assert_eq!(tail[0].header.height, 2);
        assert_eq!(tail[1].header.height, 3);
    }

    #[test]
    fn test_snapshot_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let store = ChainStore::open(dir.path()).unwrap();
        assert!(store.load_snapshot().unwrap().is_none());

        let (ledger, _) = ledger_with_blocks(2);
        store.save_snapshot(&ledger).unwrap();

        let restored = store.load_snapshot().unwrap().expect("snapshot exists");
        assert_eq!(restored.height(), 2);
        assert_eq!(restored.tip_hash(), ledger.tip_hash());
        // no temp file left behind
        assert!(!store.snapshot_path().with_extension("json.tmp").exists());
    }
}
