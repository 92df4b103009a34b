// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - LEDGER STATE MACHINE
//
// Chain, accounts, validators, and pool behind a single-writer API.
// Blocks are validated transaction-by-transaction against the evolving
// post-state and committed atomically. Fork choice is longest-valid-wins:
// competing branches are buffered by parent hash and switched to via a
// reversible journal of per-block effects.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::error::ChainError;
use crate::merkle::merkle_root;
use crate::pool::TxPool;
use crate::{
    Account, Block, BlockHeader, ChainParams, Transaction, TxKind, Validator, MAX_BLOCK_TX,
    REWARD_SENDER,
};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap, VecDeque};

/// How many recent blocks keep reversible journal entries. Bounds the
/// maximum reorg depth; side branches forking deeper stay buffered.
pub const JOURNAL_DEPTH: usize = 128;

/// Cap on buffered side-branch blocks.
const MAX_ORPHANS: usize = 1_024;

/// Result of offering a block to the ledger.
#[derive(Debug, Clone, PartialEq)]
pub enum AppendOutcome {
    /// Block extended the main tip and was applied
    Appended,
    /// Block hash already known (no state change)
    Duplicate,
    /// Block does not attach to the tip; buffered as a side branch
    Buffered,
    /// A side branch overtook the main chain and became canonical
    Reorged { reverted: u64, applied: u64 },
}

impl AppendOutcome {
    /// True when the offer changed chain state (worth persisting and
    /// rebroadcasting).
    pub fn is_new(&self) -> bool {
        matches!(self, AppendOutcome::Appended | AppendOutcome::Reorged { .. })
    }
}

/// Before-images captured when a block is applied, enough to undo it.
#[derive(Debug, Clone)]
struct BlockJournal {
    accounts_before: Vec<(String, Option<Account>)>,
    validators_before: Vec<(String, Option<Validator>)>,
    minted_before: u64,
    fees_burned_before: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Ledger {
    pub params: ChainParams,
    /// Main chain ordered by height; chain[0] is genesis
    chain: Vec<Block>,
    /// BTreeMaps for deterministic iteration and serialization
    pub accounts: BTreeMap<String, Account>,
    pub validators: BTreeMap<String, Validator>,
    pub pool: TxPool,
    /// Units minted through Reward transactions
    pub minted: u64,
    /// Fees deducted from senders and removed from circulation
    pub fees_burned: u64,

    // Rebuilt / re-accumulated after snapshot load; not part of the snapshot
    #[serde(skip)]
    by_hash: HashMap<String, u64>,
    #[serde(skip)]
    journal: VecDeque<BlockJournal>,
    #[serde(skip)]
    orphans: HashMap<String, Block>,
    #[serde(skip)]
    orphans_by_parent: HashMap<String, Vec<String>>,
}

impl Ledger {
    /// Fresh ledger holding only the genesis block.
    pub fn new(params: ChainParams) -> Self {
        let genesis = Block::genesis(&params);
        let mut ledger = Self {
            params,
            chain: vec![genesis],
            accounts: BTreeMap::new(),
            validators: BTreeMap::new(),
            pool: TxPool::new(),
            minted: 0,
            fees_burned: 0,
            by_hash: HashMap::new(),
            journal: VecDeque::new(),
            orphans: HashMap::new(),
            orphans_by_parent: HashMap::new(),
        };
        ledger.rebuild_indexes();
        ledger
    }

    /// Rebuild the hash index after deserializing a snapshot.
    pub fn rebuild_indexes(&mut self) {
        self.by_hash = self
            .chain
            .iter()
            .enumerate()
            .map(|(i, b)| (b.hash(), i as u64))
            .collect();
    }

    // ─────────────────────────────────────────────────────────────────
    // READ API
    // ─────────────────────────────────────────────────────────────────

    pub fn tip(&self) -> &Block {
        // chain always holds at least genesis
        self.chain.last().expect("chain never empty")
    }

    pub fn height(&self) -> u64 {
        self.tip().header.height
    }

    pub fn tip_hash(&self) -> String {
        self.tip().hash()
    }

    pub fn block_by_height(&self, height: u64) -> Option<&Block> {
        self.chain.get(height as usize)
    }

    pub fn block_by_hash(&self, hash: &str) -> Option<&Block> {
        self.by_hash
            .get(hash)
            .and_then(|&h| self.chain.get(h as usize))
    }

    /// Blocks in [from, from+count), for sync responses.
    pub fn blocks_range(&self, from: u64, count: usize) -> Vec<Block> {
        self.chain
            .iter()
            .skip(from as usize)
            .take(count)
            .cloned()
            .collect()
    }

    pub fn latest_blocks(&self, count: usize) -> Vec<Block> {
        self.chain.iter().rev().take(count).cloned().collect()
    }

    pub fn account(&self, address: &str) -> Option<&Account> {
        self.accounts.get(address)
    }

    /// Current sequence for an address (0 for unseen accounts). Wallets call
    /// this at signing time; a constant would only work for the first send.
    pub fn sequence_of(&self, address: &str) -> u64 {
        self.accounts.get(address).map(|a| a.sequence).unwrap_or(0)
    }

    pub fn validator(&self, address: &str) -> Option<&Validator> {
        self.validators.get(address)
    }

    pub fn active_validator_count(&self) -> usize {
        self.validators.values().filter(|v| v.active).count()
    }

    /// initial supply plus every minted reward; fees are burned, never
    /// re-entering circulation.
    pub fn total_supply(&self) -> u64 {
        self.params.initial_supply.saturating_add(self.minted)
    }

    /// Locate a confirmed transaction: (tx, block height, block hash).
    pub fn find_transaction(&self, id: &str) -> Option<(Transaction, u64, String)> {
        for block in self.chain.iter().rev() {
            if let Some(tx) = block.transactions.iter().find(|t| t.id == id) {
                return Some((tx.clone(), block.header.height, block.hash()));
            }
        }
        None
    }

    /// Confirmed transactions touching an address, newest first.
    pub fn address_history(&self, address: &str) -> Vec<(Transaction, u64)> {
        let mut out = Vec::new();
        for block in self.chain.iter().rev() {
            for tx in &block.transactions {
                if tx.sender == address || tx.recipient == address {
                    out.push((tx.clone(), block.header.height));
                }
            }
        }
        out
    }

    /// Proposer expected for the next block, derived from the tip hash.
    pub fn expected_proposer(&self) -> Option<String> {
        crate::election::elect_proposer(&self.validators, &self.tip_hash())
    }

    // ─────────────────────────────────────────────────────────────────
    // TRANSACTION VALIDATION
    // ─────────────────────────────────────────────────────────────────

    /// Validate a transaction against the current confirmed state.
    /// On success returns the recovered sender public key (hex) for
    /// non-reward kinds.
    pub fn validate_transaction(&self, tx: &Transaction) -> Result<Option<String>, ChainError> {
        Self::validate_against(tx, &self.accounts, &self.params)
    }

    /// Pure validation against an explicit account view. Used both for pool
    /// admission and for sequential in-block validation, so the two paths
    /// cannot disagree.
    fn validate_against(
        tx: &Transaction,
        accounts: &BTreeMap<String, Account>,
        params: &ChainParams,
    ) -> Result<Option<String>, ChainError> {
        if tx.id != tx.compute_id() {
            return Err(ChainError::InvalidSignature(
                "id does not match content hash".to_string(),
            ));
        }

        match tx.kind {
            TxKind::ContractDeploy | TxKind::ContractCall => {
                return Err(ChainError::UnsupportedKind(format!("{:?}", tx.kind)));
            }
            TxKind::Reward => {
                // Synthesized by the ledger; exempt from signature checks
                if tx.sender != REWARD_SENDER {
                    return Err(ChainError::InvalidReward(format!(
                        "reward sender must be {:?}, got {:?}",
                        REWARD_SENDER, tx.sender
                    )));
                }
                if tx.fee != 0 {
                    return Err(ChainError::InvalidReward("reward fee must be 0".to_string()));
                }
                return Ok(None);
            }
            TxKind::Transfer | TxKind::Stake | TxKind::Unstake => {}
        }

        if tx.amount == 0 {
            return Err(ChainError::InvalidAmount("amount must be positive".to_string()));
        }

        // Signature: recover the public key from the recovery byte, require
        // it to hash to the sender address, then verify. Only addresses are
        // stored on-chain, so signatures without a recovery byte are
        // unverifiable by construction.
        let sig = hex::decode(&tx.signature)
            .map_err(|_| ChainError::InvalidSignature("signature is not valid hex".to_string()))?;
        if sig.len() != aurum_crypto::SIGNATURE_LEN {
            return Err(ChainError::InvalidSignature(format!(
                "signature must be {} bytes, got {}",
                aurum_crypto::SIGNATURE_LEN,
                sig.len()
            )));
        }
        let signing_bytes = tx.signing_bytes();
        let recovered = aurum_crypto::recover_public_key(&signing_bytes, &sig)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
        if aurum_crypto::public_key_to_address(&recovered) != tx.sender {
            return Err(ChainError::InvalidSignature(
                "recovered key does not match sender address".to_string(),
            ));
        }
        if !aurum_crypto::verify_signature(&signing_bytes, &sig, &recovered) {
            return Err(ChainError::InvalidSignature("verification failed".to_string()));
        }

        let account = accounts
            .get(&tx.sender)
            .ok_or_else(|| ChainError::UnknownSender(tx.sender.clone()))?;

        if tx.sequence != account.sequence {
            return Err(ChainError::InvalidSequence {
                expected: account.sequence,
                got: tx.sequence,
            });
        }

        let total_debit = tx
            .amount
            .checked_add(tx.fee)
            .ok_or_else(|| ChainError::InvalidAmount("amount + fee overflows".to_string()))?;

        match tx.kind {
            TxKind::Transfer => {
                if account.balance < total_debit {
                    return Err(ChainError::InsufficientBalance {
                        needed: total_debit,
                        available: account.balance,
                    });
                }
            }
            TxKind::Stake => {
                if tx.amount < params.min_stake {
                    return Err(ChainError::StakeBelowMinimum {
                        amount: tx.amount,
                        min: params.min_stake,
                    });
                }
                if account.balance < total_debit {
                    return Err(ChainError::InsufficientBalance {
                        needed: total_debit,
                        available: account.balance,
                    });
                }
            }
            TxKind::Unstake => {
                if account.staked < tx.amount {
                    return Err(ChainError::InsufficientStake {
                        needed: tx.amount,
                        available: account.staked,
                    });
                }
                if account.balance < tx.fee {
                    return Err(ChainError::InsufficientBalance {
                        needed: tx.fee,
                        available: account.balance,
                    });
                }
            }
            _ => unreachable!("handled above"),
        }

        Ok(Some(hex::encode(recovered)))
    }

    /// Apply an already-validated transaction to a working state.
    fn apply_to(
        tx: &Transaction,
        accounts: &mut BTreeMap<String, Account>,
        validators: &mut BTreeMap<String, Validator>,
        params: &ChainParams,
        recovered_pk: Option<&str>,
        minted: &mut u64,
        fees_burned: &mut u64,
    ) {
        match tx.kind {
            TxKind::Reward => {
                let recipient = accounts
                    .entry(tx.recipient.clone())
                    .or_insert_with(|| Account::new(&tx.recipient));
                recipient.balance = recipient.balance.saturating_add(tx.amount);
                *minted = minted.saturating_add(tx.amount);
            }
            TxKind::Transfer => {
                {
                    let sender = accounts
                        .entry(tx.sender.clone())
                        .or_insert_with(|| Account::new(&tx.sender));
                    sender.balance = sender.balance.saturating_sub(tx.amount + tx.fee);
                    sender.sequence += 1;
                }
                let recipient = accounts
                    .entry(tx.recipient.clone())
                    .or_insert_with(|| Account::new(&tx.recipient));
                recipient.balance = recipient.balance.saturating_add(tx.amount);
                *fees_burned = fees_burned.saturating_add(tx.fee);
            }
            TxKind::Stake => {
                let staked_total;
                {
                    let sender = accounts
                        .entry(tx.sender.clone())
                        .or_insert_with(|| Account::new(&tx.sender));
                    sender.balance = sender.balance.saturating_sub(tx.amount + tx.fee);
                    sender.staked = sender.staked.saturating_add(tx.amount);
                    sender.sequence += 1;
                    staked_total = sender.staked;
                }
                *fees_burned = fees_burned.saturating_add(tx.fee);

                let entry = validators
                    .entry(tx.sender.clone())
                    .or_insert_with(|| Validator {
                        address: tx.sender.clone(),
                        stake: 0,
                        active: false,
                        public_key: String::new(),
                        last_produced_height: 0,
                        blocks_produced: 0,
                        registered_at: tx.timestamp,
                    });
                if entry.public_key.is_empty() {
                    if let Some(pk) = recovered_pk {
                        entry.public_key = pk.to_string();
                    }
                }
                entry.stake = staked_total;
                entry.active = entry.stake >= params.min_stake;
            }
            TxKind::Unstake => {
                let staked_total;
                {
                    let sender = accounts
                        .entry(tx.sender.clone())
                        .or_insert_with(|| Account::new(&tx.sender));
                    sender.staked = sender.staked.saturating_sub(tx.amount);
                    sender.balance = sender
                        .balance
                        .saturating_add(tx.amount)
                        .saturating_sub(tx.fee);
                    sender.sequence += 1;
                    staked_total = sender.staked;
                }
                *fees_burned = fees_burned.saturating_add(tx.fee);

                if let Some(entry) = validators.get_mut(&tx.sender) {
                    entry.stake = staked_total;
                    // Record retained for historical queries even when inactive
                    entry.active = entry.stake >= params.min_stake;
                }
            }
            TxKind::ContractDeploy | TxKind::ContractCall => {
                unreachable!("rejected during validation")
            }
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // POOL ADMISSION
    // ─────────────────────────────────────────────────────────────────

    /// Validate and admit a transaction into the pending pool.
    pub fn insert_transaction(&mut self, tx: Transaction, now_ms: u64) -> Result<(), ChainError> {
        if tx.is_reward() {
            return Err(ChainError::InvalidReward(
                "rewards are ledger-synthesized, not submitted".to_string(),
            ));
        }
        if self.pool.contains(&tx.id) {
            return Err(ChainError::DuplicateTransaction(tx.id));
        }
        self.validate_transaction(&tx)?;
        self.pool.insert(tx, now_ms)
    }

    /// Drop pool entries whose sequence has been consumed by a confirmed
    /// block. Called after every append so stale entries cannot wedge
    /// block assembly.
    fn prune_stale_pool(&mut self) {
        let stale: Vec<String> = self
            .pool
            .ordered()
            .iter()
            .filter(|tx| tx.sequence < self.sequence_of(&tx.sender))
            .map(|tx| tx.id.clone())
            .collect();
        for id in stale {
            self.pool.remove(&id);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // BLOCK VALIDATION + APPEND
    // ─────────────────────────────────────────────────────────────────

    /// Validate a block against the current tip and apply it.
    /// All-or-nothing: on any error the ledger is unchanged.
    fn connect_block(&mut self, block: &Block) -> Result<(), ChainError> {
        let tip = self.tip();
        let expected_height = tip.header.height + 1;
        if block.header.height != expected_height {
            return Err(ChainError::InvalidHeight {
                expected: expected_height,
                got: block.header.height,
            });
        }
        let tip_hash = tip.hash();
        if block.header.parent_hash != tip_hash {
            return Err(ChainError::InvalidParent {
                expected: tip_hash,
                got: block.header.parent_hash.clone(),
            });
        }

        // Proposer signature over the header bytes. The key comes from the
        // validator registry when the proposer is registered; otherwise it is
        // recovered from the signature itself and checked against the
        // proposer address (first-produced-block registration).
        let sig = hex::decode(&block.signature).map_err(|_| {
            ChainError::InvalidSignature("block signature is not valid hex".to_string())
        })?;
        let header_bytes = block.header.canonical_bytes();
        match self
            .validators
            .get(&block.header.proposer)
            .filter(|v| !v.public_key.is_empty())
        {
            Some(validator) => {
                let pk = hex::decode(&validator.public_key).map_err(|_| {
                    ChainError::UnknownProposer(block.header.proposer.clone())
                })?;
                if !aurum_crypto::verify_signature(&header_bytes, &sig, &pk) {
                    return Err(ChainError::InvalidSignature(
                        "proposer signature verification failed".to_string(),
                    ));
                }
            }
            None => {
                let recovered = aurum_crypto::recover_public_key(&header_bytes, &sig)
                    .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
                if aurum_crypto::public_key_to_address(&recovered) != block.header.proposer {
                    return Err(ChainError::UnknownProposer(block.header.proposer.clone()));
                }
            }
        }

        // Exactly one Reward per produced block, paying the fixed amount
        let rewards: Vec<&Transaction> =
            block.transactions.iter().filter(|t| t.is_reward()).collect();
        if rewards.len() != 1 {
            return Err(ChainError::InvalidReward(format!(
                "expected exactly 1 reward, found {}",
                rewards.len()
            )));
        }
        if rewards[0].amount != self.params.block_reward {
            return Err(ChainError::InvalidReward(format!(
                "reward amount {} != block reward {}",
                rewards[0].amount, self.params.block_reward
            )));
        }
        if self
            .total_supply()
            .saturating_add(rewards[0].amount)
            > self.params.max_supply
        {
            return Err(ChainError::InvalidReward("max supply exceeded".to_string()));
        }

        let computed_root = merkle_root(&block.transactions);
        if computed_root != block.header.merkle_root {
            return Err(ChainError::InvalidMerkleRoot {
                expected: block.header.merkle_root.clone(),
                got: computed_root,
            });
        }

        // Sequential validation+application on working copies; order-dependent
        // failures (balance spent twice, sequence gaps) surface here.
        let mut accounts = self.accounts.clone();
        let mut validators = self.validators.clone();
        let mut minted = self.minted;
        let mut fees_burned = self.fees_burned;
        for tx in &block.transactions {
            let recovered = Self::validate_against(tx, &accounts, &self.params)?;
            Self::apply_to(
                tx,
                &mut accounts,
                &mut validators,
                &self.params,
                recovered.as_deref(),
                &mut minted,
                &mut fees_burned,
            );
        }

        if let Some(entry) = validators.get_mut(&block.header.proposer) {
            entry.last_produced_height = block.header.height;
            entry.blocks_produced += 1;
        }

        // Commit: capture before-images for the journal, then swap state in
        let mut touched_accounts: Vec<String> = accounts
            .keys()
            .filter(|k| self.accounts.get(*k) != accounts.get(*k))
            .cloned()
            .collect();
        touched_accounts.sort();
        let mut touched_validators: Vec<String> = validators
            .keys()
            .filter(|k| self.validators.get(*k) != validators.get(*k))
            .cloned()
            .collect();
        touched_validators.sort();

        let entry = BlockJournal {
            accounts_before: touched_accounts
                .iter()
                .map(|k| (k.clone(), self.accounts.get(k).cloned()))
                .collect(),
            validators_before: touched_validators
                .iter()
                .map(|k| (k.clone(), self.validators.get(k).cloned()))
                .collect(),
            minted_before: self.minted,
            fees_burned_before: self.fees_burned,
        };

        self.accounts = accounts;
        self.validators = validators;
        self.minted = minted;
        self.fees_burned = fees_burned;
        self.by_hash.insert(block.hash(), block.header.height);
        self.chain.push(block.clone());
        self.journal.push_back(entry);
        if self.journal.len() > JOURNAL_DEPTH {
            self.journal.pop_front();
        }

        Ok(())
    }

    /// Offer a block to the ledger: append, deduplicate, buffer, or reorg.
    pub fn append_block(&mut self, block: Block, now_ms: u64) -> Result<AppendOutcome, ChainError> {
        let hash = block.hash();
        if self.by_hash.contains_key(&hash) || self.orphans.contains_key(&hash) {
            return Ok(AppendOutcome::Duplicate);
        }

        if block.header.parent_hash == self.tip_hash() {
            self.connect_block(&block)?;
            self.finish_append(&block, now_ms);
            self.connect_ready_orphans(now_ms);
            return Ok(AppendOutcome::Appended);
        }

        // Not extending the tip: keep as a side-branch candidate
        self.store_orphan(block.clone());
        match self.try_reorg(&hash, now_ms)? {
            Some(outcome) => Ok(outcome),
            None => Ok(AppendOutcome::Buffered),
        }
    }

    /// Post-append housekeeping: included transactions leave the pool and
    /// stale entries are pruned.
    fn finish_append(&mut self, block: &Block, _now_ms: u64) {
        for tx in &block.transactions {
            self.pool.remove(&tx.id);
        }
        self.prune_stale_pool();
    }

    fn store_orphan(&mut self, block: Block) {
        if self.orphans.len() >= MAX_ORPHANS {
            return; // buffer full; the block can be re-fetched via sync
        }
        let hash = block.hash();
        self.orphans_by_parent
            .entry(block.header.parent_hash.clone())
            .or_default()
            .push(hash.clone());
        self.orphans.insert(hash, block);
    }

    /// Connect buffered blocks that now extend the tip (e.g. children that
    /// arrived before their parent during sync). Competing siblings stay
    /// buffered for fork choice.
    fn connect_ready_orphans(&mut self, now_ms: u64) {
        loop {
            let tip_hash = self.tip_hash();
            let Some(children) = self.orphans_by_parent.remove(&tip_hash) else {
                break;
            };
            let mut advanced = false;
            let mut remaining = Vec::new();
            for child_hash in children {
                if advanced {
                    remaining.push(child_hash);
                    continue;
                }
                let Some(child) = self.orphans.get(&child_hash).cloned() else {
                    continue;
                };
                if self.connect_block(&child).is_ok() {
                    self.orphans.remove(&child_hash);
                    self.finish_append(&child, now_ms);
                    advanced = true;
                } else {
                    remaining.push(child_hash);
                }
            }
            if !remaining.is_empty() {
                self.orphans_by_parent.insert(tip_hash, remaining);
            }
            if !advanced {
                break;
            }
        }
    }

    /// Attempt to switch to the branch ending at `candidate_hash`.
    /// Returns Ok(None) when the branch is incomplete or not longer.
    fn try_reorg(
        &mut self,
        candidate_hash: &str,
        now_ms: u64,
    ) -> Result<Option<AppendOutcome>, ChainError> {
        // Assemble the branch tip→ancestor by walking buffered parents
        let mut branch: Vec<Block> = Vec::new();
        let mut cursor = candidate_hash.to_string();
        let ancestor_height = loop {
            let Some(block) = self.orphans.get(&cursor) else {
                // Walked off the buffer without reaching the main chain
                return Ok(None);
            };
            branch.push(block.clone());
            let parent = &block.header.parent_hash;
            if let Some(&height) = self.by_hash.get(parent) {
                break height;
            }
            cursor = parent.clone();
        };
        branch.reverse();

        let candidate_height = branch
            .last()
            .map(|b| b.header.height)
            .unwrap_or(0);
        if candidate_height <= self.height() {
            return Ok(None);
        }

        let rewind_depth = (self.height() - ancestor_height) as usize;
        if rewind_depth > self.journal.len() {
            // Fork deeper than the journal window; leave it buffered
            return Ok(None);
        }

        // Rewind to the common ancestor, keeping the detached blocks so the
        // switch can be undone if the branch fails validation.
        let detached = self.rewind_to(ancestor_height);

        for (i, block) in branch.iter().enumerate() {
            if let Err(err) = self.connect_block(block) {
                // Branch invalid: undo the partial switch, restore the main
                // chain. Detached blocks were valid against this exact state,
                // so re-connecting them cannot fail.
                let _ = self.rewind_to(ancestor_height);
                for main_block in &detached {
                    self.connect_block(main_block)?;
                }
                // Drop the bad branch from the buffer
                for bad in &branch[i..] {
                    self.drop_orphan(&bad.hash());
                }
                return Err(err);
            }
        }

        // Branch is canonical: remove its blocks from the buffer
        for block in &branch {
            self.drop_orphan(&block.hash());
        }

        // Orphaned transactions re-enter the pool if still valid; anything
        // confirmed by the new branch leaves it
        let confirmed: std::collections::HashSet<String> = branch
            .iter()
            .flat_map(|b| b.transactions.iter().map(|t| t.id.clone()))
            .collect();
        for block in &detached {
            for tx in &block.transactions {
                if tx.is_reward() || confirmed.contains(&tx.id) {
                    continue;
                }
                let _ = self.insert_transaction(tx.clone(), now_ms);
            }
        }
        for block in &branch {
            for tx in &block.transactions {
                self.pool.remove(&tx.id);
            }
        }
        self.prune_stale_pool();

        Ok(Some(AppendOutcome::Reorged {
            reverted: detached.len() as u64,
            applied: branch.len() as u64,
        }))
    }

    fn drop_orphan(&mut self, hash: &str) {
        if let Some(block) = self.orphans.remove(hash) {
            if let Some(siblings) = self.orphans_by_parent.get_mut(&block.header.parent_hash) {
                siblings.retain(|h| h != hash);
                if siblings.is_empty() {
                    self.orphans_by_parent.remove(&block.header.parent_hash);
                }
            }
        }
    }

    /// Undo blocks above `target_height` using the journal. Returns the
    /// detached blocks in ascending height order.
    fn rewind_to(&mut self, target_height: u64) -> Vec<Block> {
        let mut detached = Vec::new();
        while self.height() > target_height {
            let Some(entry) = self.journal.pop_back() else {
                break; // callers check journal depth first
            };
            let block = self.chain.pop().expect("chain never empty");
            self.by_hash.remove(&block.hash());
            for (key, before) in entry.accounts_before {
                match before {
                    Some(account) => self.accounts.insert(key, account),
                    None => self.accounts.remove(&key),
                };
            }
            for (key, before) in entry.validators_before {
                match before {
                    Some(validator) => self.validators.insert(key, validator),
                    None => self.validators.remove(&key),
                };
            }
            self.minted = entry.minted_before;
            self.fees_burned = entry.fees_burned_before;
            detached.push(block);
        }
        detached.reverse();
        detached
    }

    // ─────────────────────────────────────────────────────────────────
    // BLOCK ASSEMBLY (proposer side)
    // ─────────────────────────────────────────────────────────────────

    /// Assemble and sign the next block. Pool transactions are taken in
    /// selection order and simulated against the evolving post-state;
    /// selection stops at the first transaction that would violate an
    /// invariant, or at the block size cap. The synthesized Reward is
    /// appended last.
    pub fn assemble_block(
        &self,
        proposer: &str,
        secret_key: &[u8],
        timestamp_ms: u64,
    ) -> Result<Block, ChainError> {
        let keypair = aurum_crypto::keypair_from_secret(secret_key)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;
        if keypair.address() != proposer {
            return Err(ChainError::UnknownProposer(proposer.to_string()));
        }

        let mut accounts = self.accounts.clone();
        let mut validators = self.validators.clone();
        let mut minted = self.minted;
        let mut fees_burned = self.fees_burned;

        let mut selected: Vec<Transaction> = Vec::new();
        for tx in self.pool.ordered() {
            if selected.len() >= MAX_BLOCK_TX {
                break;
            }
            match Self::validate_against(&tx, &accounts, &self.params) {
                Ok(recovered) => {
                    Self::apply_to(
                        &tx,
                        &mut accounts,
                        &mut validators,
                        &self.params,
                        recovered.as_deref(),
                        &mut minted,
                        &mut fees_burned,
                    );
                    selected.push(tx);
                }
                Err(_) => break,
            }
        }

        selected.push(Transaction::reward(
            proposer,
            self.params.block_reward,
            timestamp_ms,
        ));

        let header = BlockHeader {
            height: self.height() + 1,
            parent_hash: self.tip_hash(),
            timestamp: timestamp_ms,
            merkle_root: merkle_root(&selected),
            proposer: proposer.to_string(),
            nonce: 0,
        };

        let sig = aurum_crypto::sign_message(&header.canonical_bytes(), secret_key)
            .map_err(|e| ChainError::InvalidSignature(e.to_string()))?;

        Ok(Block {
            header,
            transactions: selected,
            signature: hex::encode(sig),
        })
    }
}
