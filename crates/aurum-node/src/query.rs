// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - QUERY PROJECTIONS
//
// Read-only summaries over the ledger for explorers and the REST surface.
// Pure functions of a ledger reference; no locks, no I/O.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Block, Ledger, Transaction, Validator};
use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeStatus {
    pub node_id: String,
    pub network: String,
    pub height: u64,
    pub tip_hash: String,
    pub peer_count: usize,
    pub pool_size: usize,
    pub validator_count: usize,
    pub active_validators: usize,
    pub total_supply: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChainInfo {
    pub network: String,
    pub height: u64,
    pub tip_hash: String,
    pub genesis_hash: String,
    pub block_time_ms: u64,
    pub block_reward: u64,
    pub min_stake: u64,
    pub max_supply: u64,
    pub initial_supply: u64,
    pub total_supply: u64,
    pub fees_burned: u64,
}

/// A confirmed transaction with its block coordinates.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionView {
    #[serde(flatten)]
    pub transaction: Transaction,
    pub block_height: u64,
    pub block_hash: String,
    /// tipHeight − blockHeight + 1
    pub confirmations: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddressView {
    pub address: String,
    pub balance: u64,
    pub staked: u64,
    pub sequence: u64,
    pub validator: Option<Validator>,
    pub transactions: Vec<TransactionView>,
}

pub fn node_status(ledger: &Ledger, node_id: &str, peer_count: usize) -> NodeStatus {
    NodeStatus {
        node_id: node_id.to_string(),
        network: ledger.params.network_id.clone(),
        height: ledger.height(),
        tip_hash: ledger.tip_hash(),
        peer_count,
        pool_size: ledger.pool.len(),
        validator_count: ledger.validators.len(),
        active_validators: ledger.active_validator_count(),
        total_supply: ledger.total_supply(),
    }
}

pub fn chain_info(ledger: &Ledger) -> ChainInfo {
    ChainInfo {
        network: ledger.params.network_id.clone(),
        height: ledger.height(),
        tip_hash: ledger.tip_hash(),
        genesis_hash: ledger
            .block_by_height(0)
            .map(|b| b.hash())
            .unwrap_or_default(),
        block_time_ms: ledger.params.block_time_ms,
        block_reward: ledger.params.block_reward,
        min_stake: ledger.params.min_stake,
        max_supply: ledger.params.max_supply,
        initial_supply: ledger.params.initial_supply,
        total_supply: ledger.total_supply(),
        fees_burned: ledger.fees_burned,
    }
}

pub fn latest_blocks(ledger: &Ledger, count: usize) -> Vec<Block> {
    ledger.latest_blocks(count)
}

pub fn block_by_height(ledger: &Ledger, height: u64) -> Option<Block> {
    ledger.block_by_height(height).cloned()
}

pub fn block_by_hash(ledger: &Ledger, hash: &str) -> Option<Block> {
    ledger.block_by_hash(hash).cloned()
}

pub fn transaction_by_id(ledger: &Ledger, id: &str) -> Option<TransactionView> {
    let (transaction, block_height, block_hash) = ledger.find_transaction(id)?;
    Some(TransactionView {
        transaction,
        block_height,
        block_hash,
        confirmations: ledger.height() - block_height + 1,
    })
}

pub fn address_view(ledger: &Ledger, address: &str) -> AddressView {
    let account = ledger.account(address);
    let tip = ledger.height();
    let transactions = ledger
        .address_history(address)
        .into_iter()
        .map(|(transaction, block_height)| {
            let block_hash = ledger
                .block_by_height(block_height)
                .map(|b| b.hash())
                .unwrap_or_default();
            TransactionView {
                transaction,
                block_height,
                block_hash,
                confirmations: tip - block_height + 1,
            }
        })
        .collect();

    AddressView {
        address: address.to_string(),
        balance: account.map(|a| a.balance).unwrap_or(0),
        staked: account.map(|a| a.staked).unwrap_or(0),
        sequence: account.map(|a| a.sequence).unwrap_or(0),
        validator: ledger.validator(address).cloned(),
        transactions,
    }
}
