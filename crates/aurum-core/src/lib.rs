// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - CORE MODULE
//
// Blockchain primitives: Transaction, Block, Account, Validator, and the
// ledger state machine. All amounts are u64 in smallest units (no
// floating-point). All hashes are hex-encoded SHA-256 digests.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};

pub mod election;
pub mod error;
pub mod ledger;
pub mod merkle;
pub mod pool;

pub use election::elect_proposer;
pub use error::ChainError;
pub use ledger::{AppendOutcome, Ledger};
pub use pool::TxPool;

/// Sender address carried by ledger-synthesized Reward transactions.
pub const REWARD_SENDER: &str = "network";

/// Proposer literal on the genesis block. Genesis is the only block exempt
/// from proposer signature verification.
pub const GENESIS_PROPOSER: &str = "AURUM_GENESIS";

/// All-zero parent hash of the genesis block, and the Merkle root of an
/// empty transaction list.
pub const ZERO_HASH: &str = "0000000000000000000000000000000000000000000000000000000000000000";

/// Maximum transactions per assembled block (excluding the Reward).
pub const MAX_BLOCK_TX: usize = 200;

/// Default genesis timestamp (millis). Every node on a network must share
/// this value or genesis header hashes diverge.
pub const DEFAULT_GENESIS_TIMESTAMP_MS: u64 = 1_700_000_000_000;

/// Consensus parameters fixed at genesis.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ChainParams {
    pub network_id: String,
    /// Target block interval in milliseconds
    pub block_time_ms: u64,
    /// Units minted to the proposer per produced block
    pub block_reward: u64,
    /// Minimum stake to register as a validator
    pub min_stake: u64,
    pub max_supply: u64,
    /// Notional pre-mine; not assigned to any account (see DESIGN.md)
    pub initial_supply: u64,
    /// Reserved for future difficulty retargeting; consumed by nothing yet
    pub difficulty_adjustment_interval: u64,
    pub genesis_timestamp: u64,
}

impl ChainParams {
    pub fn new(network_id: &str) -> Self {
        Self {
            network_id: network_id.to_string(),
            block_time_ms: 15_000,
            block_reward: 5,
            min_stake: 1_000,
            max_supply: 100_000_000,
            initial_supply: 10_000_000,
            difficulty_adjustment_interval: 2_016,
            genesis_timestamp: DEFAULT_GENESIS_TIMESTAMP_MS,
        }
    }
}

impl Default for ChainParams {
    fn default() -> Self {
        Self::new("aurum-main")
    }
}

/// Canonical byte encoding used for every hash and signature in the system:
/// the record as a JSON object with keys in declared order and no
/// insignificant whitespace. Defined once here; ad-hoc formatting elsewhere
/// is a consensus bug.
fn canonical_bytes<T: Serialize>(value: &T) -> Vec<u8> {
    // Struct-to-JSON serialization of these records cannot fail
    serde_json::to_vec(value).expect("canonical encoding is infallible")
}

fn sha256_hex(bytes: &[u8]) -> String {
    hex::encode(Sha256::digest(bytes))
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum TxKind {
    Transfer,
    Reward,
    Stake,
    Unstake,
    /// Reserved: accepted on the wire, rejected by validation
    ContractDeploy,
    /// Reserved: accepted on the wire, rejected by validation
    ContractCall,
}

/// A signed ledger transaction. Immutable once signed; `id` is the content
/// hash over every field except the signature.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Transaction {
    pub id: String,
    pub kind: TxKind,
    pub sender: String,
    pub recipient: String,
    pub amount: u64,
    pub fee: u64,
    /// Millis since Unix epoch
    pub timestamp: u64,
    pub payload: Option<String>,
    /// Sender's account sequence at signing time (replay protection)
    pub sequence: u64,
    /// Hex of 65 bytes: compact ECDSA signature + recovery byte.
    /// Empty on Reward transactions.
    pub signature: String,
}

/// Signing view of a transaction: declared field order, no id, no signature.
#[derive(Serialize)]
struct TxSigningView<'a> {
    kind: &'a TxKind,
    sender: &'a str,
    recipient: &'a str,
    amount: u64,
    fee: u64,
    timestamp: u64,
    payload: &'a Option<String>,
    sequence: u64,
}

impl Transaction {
    /// Build an unsigned transaction with its id filled in.
    /// The caller signs `signing_bytes()` and sets `signature`.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        kind: TxKind,
        sender: &str,
        recipient: &str,
        amount: u64,
        fee: u64,
        timestamp: u64,
        payload: Option<String>,
        sequence: u64,
    ) -> Self {
        let mut tx = Self {
            id: String::new(),
            kind,
            sender: sender.to_string(),
            recipient: recipient.to_string(),
            amount,
            fee,
            timestamp,
            payload,
            sequence,
            signature: String::new(),
        };
        tx.id = tx.compute_id();
        tx
    }

    /// Ledger-synthesized block reward. No signature, no sequence.
    pub fn reward(recipient: &str, amount: u64, timestamp: u64) -> Self {
        Self::new(TxKind::Reward, REWARD_SENDER, recipient, amount, 0, timestamp, None, 0)
    }

    /// Canonical signing bytes: all fields except id and signature,
    /// in declared order. Also the Merkle leaf pre-image.
    pub fn signing_bytes(&self) -> Vec<u8> {
        canonical_bytes(&TxSigningView {
            kind: &self.kind,
            sender: &self.sender,
            recipient: &self.recipient,
            amount: self.amount,
            fee: self.fee,
            timestamp: self.timestamp,
            payload: &self.payload,
            sequence: self.sequence,
        })
    }

    /// Content hash over all fields except the signature.
    pub fn compute_id(&self) -> String {
        sha256_hex(&self.signing_bytes())
    }

    /// Leaf hash for the Merkle tree (raw digest of the signing bytes).
    pub fn leaf_hash(&self) -> [u8; 32] {
        Sha256::digest(self.signing_bytes()).into()
    }

    pub fn is_reward(&self) -> bool {
        self.kind == TxKind::Reward
    }
}

/// Block header. The header hash (content hash over all header fields)
/// identifies the block and chains it to its child.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlockHeader {
    pub height: u64,
    pub parent_hash: String,
    /// Millis since Unix epoch
    pub timestamp: u64,
    pub merkle_root: String,
    pub proposer: String,
    /// Opaque field reserved for future difficulty
    pub nonce: u32,
}

impl BlockHeader {
    /// Canonical header bytes: every field in declared order.
    /// This is both the hash pre-image and the proposer-signature message.
    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(self)
    }

    pub fn hash(&self) -> String {
        sha256_hex(&self.canonical_bytes())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Block {
    pub header: BlockHeader,
    pub transactions: Vec<Transaction>,
    /// Hex of the proposer's 65-byte signature over the header bytes.
    /// Empty on genesis.
    pub signature: String,
}

impl Block {
    /// The genesis block: height 0, zero parent, no transactions, the
    /// well-known proposer literal, and no signature.
    pub fn genesis(params: &ChainParams) -> Self {
        Self {
            header: BlockHeader {
                height: 0,
                parent_hash: ZERO_HASH.to_string(),
                timestamp: params.genesis_timestamp,
                merkle_root: ZERO_HASH.to_string(),
                proposer: GENESIS_PROPOSER.to_string(),
                nonce: 0,
            },
            transactions: Vec::new(),
            signature: String::new(),
        }
    }

    pub fn hash(&self) -> String {
        self.header.hash()
    }

    pub fn is_genesis(&self) -> bool {
        self.header.height == 0 && self.header.parent_hash == ZERO_HASH
    }

    /// Verify the proposer signature over the header bytes.
    /// `public_key` is the proposer's recorded compressed key.
    pub fn verify_proposer_signature(&self, public_key: &[u8]) -> bool {
        let sig = match hex::decode(&self.signature) {
            Ok(s) => s,
            Err(_) => return false,
        };
        aurum_crypto::verify_signature(&self.header.canonical_bytes(), &sig, public_key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Account {
    pub address: String,
    pub balance: u64,
    /// Monotonically increasing per-sender counter (replay protection)
    pub sequence: u64,
    pub staked: u64,
}

impl Account {
    pub fn new(address: &str) -> Self {
        Self {
            address: address.to_string(),
            balance: 0,
            sequence: 0,
            staked: 0,
        }
    }
}

/// Validator registry entry. Retained after deactivation for historical
/// queries; `active` tracks stake ≥ MinStake.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Validator {
    pub address: String,
    pub stake: u64,
    pub active: bool,
    /// Compressed public key recovered from the registering Stake
    /// transaction's signature; verifies this validator's block headers.
    pub public_key: String,
    pub last_produced_height: u64,
    pub blocks_produced: u64,
    /// Millis since Unix epoch of the first Stake transaction
    pub registered_at: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_tx() -> Transaction {
        Transaction::new(
            TxKind::Transfer,
            "aur1aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa",
            "aur1bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb",
            10,
            1,
            1_700_000_001_000,
            None,
            0,
        )
    }

    #[test]
    fn test_tx_id_excludes_signature() {
        let mut tx = sample_tx();
        let before = tx.compute_id();
        tx.signature = "ff".repeat(65);
        assert_eq!(tx.compute_id(), before);
        assert_eq!(tx.id, before);
    }

    #[test]
    fn test_tx_id_changes_with_amount() {
        let a = sample_tx();
        let mut b = sample_tx();
        b.amount += 1;
        assert_ne!(a.compute_id(), b.compute_id());
    }

    #[test]
    fn test_canonical_bytes_declared_order() {
        let tx = sample_tx();
        let json = String::from_utf8(tx.signing_bytes()).unwrap();
        // Keys appear in declared order with no whitespace
        let kind_pos = json.find("\"kind\"").unwrap();
        let sender_pos = json.find("\"sender\"").unwrap();
        let seq_pos = json.find("\"sequence\"").unwrap();
        assert!(kind_pos < sender_pos && sender_pos < seq_pos);
        assert!(!json.contains(": "));
        assert!(!json.contains("\"signature\""));
        assert!(!json.contains("\"id\""));
    }

    #[test]
    fn test_genesis_shape() {
        let genesis = Block::genesis(&ChainParams::default());
        assert_eq!(genesis.header.height, 0);
        assert_eq!(genesis.header.parent_hash, ZERO_HASH);
        assert_eq!(genesis.header.proposer, GENESIS_PROPOSER);
        assert!(genesis.transactions.is_empty());
        assert!(genesis.is_genesis());
    }

    #[test]
    fn test_genesis_hash_is_stable_across_nodes() {
        let a = Block::genesis(&ChainParams::new("testnet"));
        let b = Block::genesis(&ChainParams::new("testnet"));
        assert_eq!(a.hash(), b.hash());
    }

    #[test]
    fn test_header_signature_round_trip() {
        let keys = aurum_crypto::generate_keypair();
        let mut block = Block::genesis(&ChainParams::default());
        block.header.height = 1;
        block.header.proposer = keys.address();

        let sig = aurum_crypto::sign_message(&block.header.canonical_bytes(), &keys.secret_key)
            .expect("sign failed");
        block.signature = hex::encode(sig);
        assert!(block.verify_proposer_signature(&keys.public_key));

        block.header.nonce = 7; // any header change invalidates the signature
        assert!(!block.verify_proposer_signature(&keys.public_key));
    }

    #[test]
    fn test_reward_shape() {
        let reward = Transaction::reward("aur1cccc", 5, 1_700_000_002_000);
        assert_eq!(reward.sender, REWARD_SENDER);
        assert_eq!(reward.fee, 0);
        assert!(reward.signature.is_empty());
        assert!(reward.is_reward());
    }
}
