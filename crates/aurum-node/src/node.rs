// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - NODE ORCHESTRATOR
//
// Bridges gossip and ledger, owns the lifecycle, runs the validator loop.
// The orchestrator task is the only ledger writer: network events, API
// submissions, the validator tick, and the pool sweeper all funnel into one
// select loop. Snapshots go to a worker over a bounded channel so disk
// writes never block validation.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::config::NodeConfig;
use crate::store::ChainStore;
use aurum_core::{AppendOutcome, ChainParams, Ledger, Transaction};
use aurum_crypto::KeyPair;
use aurum_network::{NetworkConfig, NetworkEvent, PeerManager};
use log::{debug, error, info, warn};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use std::time::Duration;
use tokio::sync::{mpsc, watch};

/// Write a snapshot after every Kth appended block
pub const SNAPSHOT_INTERVAL_BLOCKS: u64 = 1;

/// Consecutive snapshot failures that escalate to fatal
const SNAPSHOT_FAILURE_LIMIT: u32 = 3;

/// Pool expiry sweep cadence
const SWEEP_INTERVAL_MS: u64 = 60_000;

/// Blocks per sync batch
const SYNC_BATCH: u32 = 128;

/// Largest batch served to a peer's GetBlocks
const MAX_SERVED_BATCH: u32 = 512;

/// Environment variable holding the validator wallet password
pub const VALIDATOR_PASSWORD_ENV: &str = "AURUM_VALIDATOR_PASSWORD";

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn read_ledger(ledger: &Arc<RwLock<Ledger>>) -> std::sync::RwLockReadGuard<'_, Ledger> {
    match ledger.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

fn write_ledger(ledger: &Arc<RwLock<Ledger>>) -> std::sync::RwLockWriteGuard<'_, Ledger> {
    match ledger.write() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub struct Node {
    pub cfg: NodeConfig,
    pub data_dir: PathBuf,
    pub ledger: Arc<RwLock<Ledger>>,
    pub store: Arc<ChainStore>,
    pub manager: Arc<PeerManager>,
    pub submit_tx: mpsc::Sender<Transaction>,
    pub shutdown_tx: watch::Sender<bool>,
    /// Actual p2p port after binding (differs when configured as 0)
    pub p2p_port: u16,

    events_rx: Option<mpsc::Receiver<NetworkEvent>>,
    submit_rx: Option<mpsc::Receiver<Transaction>>,
    shutdown_rx: watch::Receiver<bool>,
    snapshot_tx: mpsc::Sender<Ledger>,
    validator: Option<KeyPair>,
    /// One sync task at a time; overlapping passes would fight over batches
    syncing: Arc<AtomicBool>,
}

impl Node {
    /// Load persisted state, start gossip and the API, and prepare the
    /// orchestrator. `run()` then drives everything until shutdown.
    pub async fn start(cfg: NodeConfig, data_dir: &Path) -> Result<Self, String> {
        std::fs::create_dir_all(data_dir).map_err(|e| e.to_string())?;
        let store = Arc::new(ChainStore::open(data_dir).map_err(|e| e.to_string())?);

        // Snapshot first, then replay any KV tail the snapshot missed
        let mut ledger = match store.load_snapshot().map_err(|e| e.to_string())? {
            Some(ledger) => {
                if ledger.params.network_id != cfg.network {
                    return Err(format!(
                        "snapshot belongs to network {:?}, node configured for {:?}",
                        ledger.params.network_id, cfg.network
                    ));
                }
                info!("restored snapshot at height {}", ledger.height());
                ledger
            }
            None => {
                info!("no snapshot, starting from genesis");
                Ledger::new(ChainParams::new(&cfg.network))
            }
        };
        let tail = store.blocks_above(ledger.height()).map_err(|e| e.to_string())?;
        if !tail.is_empty() {
            info!("re-verifying {} block(s) from the kv tail", tail.len());
            for block in tail {
                let height = block.header.height;
                match ledger.append_block(block, now_ms()) {
                    Ok(outcome) if outcome.is_new() => {}
                    Ok(_) => {}
                    Err(e) => {
                        warn!("kv tail block {} failed re-validation: {}", height, e);
                        break;
                    }
                }
            }
        }
        info!(
            "chain ready: height {} on network {:?}",
            ledger.height(),
            cfg.network
        );

        // Validator key, if this node produces blocks
        let validator = match &cfg.validator_address {
            Some(address) => match std::env::var(VALIDATOR_PASSWORD_ENV) {
                Ok(password) => match aurum_wallet::load_wallet(data_dir, address, &password) {
                    Ok(keypair) => {
                        info!("validator wallet {} unlocked", address);
                        Some(keypair)
                    }
                    Err(e) => {
                        warn!("cannot unlock validator wallet {}: {}; running as observer", address, e);
                        None
                    }
                },
                Err(_) => {
                    warn!(
                        "validator address set but {} is unset; running as observer",
                        VALIDATOR_PASSWORD_ENV
                    );
                    None
                }
            },
            None => None,
        };

        let ledger = Arc::new(RwLock::new(ledger));
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let (events_tx, events_rx) = mpsc::channel(1_024);
        let (submit_tx, submit_rx) = mpsc::channel(256);
        let (snapshot_tx, snapshot_rx) = mpsc::channel::<Ledger>(1);

        Self::spawn_snapshot_worker(store.clone(), snapshot_rx, shutdown_tx.clone());

        let manager = PeerManager::new(
            NetworkConfig {
                node_id: cfg.node_id.clone(),
                network_id: cfg.network.clone(),
                listen_port: cfg.p2p_port,
                max_peers: cfg.max_peers,
                bootstrap: cfg.bootstrap.clone(),
                discovery: cfg.enable_discovery,
            },
            events_tx,
            shutdown_rx.clone(),
        );
        let p2p_port = manager.clone().start().await.map_err(|e| e.to_string())?;
        manager.clone().dial_bootstrap().await;

        if cfg.enable_api {
            tokio::spawn(crate::api::serve(
                cfg.api_port,
                ledger.clone(),
                manager.clone(),
                submit_tx.clone(),
                shutdown_rx.clone(),
            ));
        }

        Ok(Self {
            cfg,
            data_dir: data_dir.to_path_buf(),
            ledger,
            store,
            manager,
            submit_tx,
            shutdown_tx,
            p2p_port,
            events_rx: Some(events_rx),
            submit_rx: Some(submit_rx),
            shutdown_rx,
            snapshot_tx,
            validator,
            syncing: Arc::new(AtomicBool::new(false)),
        })
    }

    /// Persistence task: one snapshot job at a time, newer jobs supersede.
    /// Repeated failures are not survivable; a node that cannot persist
    /// state would silently lose the chain on its next restart.
    fn spawn_snapshot_worker(
        store: Arc<ChainStore>,
        mut jobs: mpsc::Receiver<Ledger>,
        shutdown_tx: watch::Sender<bool>,
    ) {
        tokio::spawn(async move {
            let mut consecutive_failures = 0u32;
            while let Some(ledger) = jobs.recv().await {
                match store.save_snapshot(&ledger) {
                    Ok(()) => consecutive_failures = 0,
                    Err(e) => {
                        consecutive_failures += 1;
                        error!(
                            "snapshot write failed ({}/{}): {}",
                            consecutive_failures, SNAPSHOT_FAILURE_LIMIT, e
                        );
                        if consecutive_failures >= SNAPSHOT_FAILURE_LIMIT {
                            error!("persistent snapshot failures, shutting down");
                            let _ = shutdown_tx.send(true);
                            return;
                        }
                    }
                }
            }
        });
    }

    /// Drive the node until shutdown is signalled.
    pub async fn run(mut self) {
        let mut events_rx = self.events_rx.take().expect("run() called once");
        let mut submit_rx = self.submit_rx.take().expect("run() called once");
        let mut shutdown_rx = self.shutdown_rx.clone();

        let block_time = read_ledger(&self.ledger).params.block_time_ms;
        let mut produce_tick =
            tokio::time::interval(Duration::from_millis((block_time / 3).max(250)));
        let mut sync_tick = tokio::time::interval(Duration::from_millis(block_time.max(1_000)));
        let mut sweep_tick = tokio::time::interval(Duration::from_millis(SWEEP_INTERVAL_MS));

        loop {
            tokio::select! {
                _ = shutdown_rx.changed() => break,
                Some(event) = events_rx.recv() => self.handle_network_event(event),
                Some(tx) = submit_rx.recv() => self.handle_submission(tx),
                _ = produce_tick.tick() => self.validator_tick(),
                _ = sync_tick.tick() => self.spawn_sync(None),
                _ = sweep_tick.tick() => self.sweep_pool(),
            }
        }

        self.stop().await;
    }

    /// Cooperative shutdown: notify peers, stop tasks, flush state.
    async fn stop(&self) {
        info!("shutting down");
        self.manager.shutdown_all();
        // Give sessions one beat to flush the Disconnect frames
        tokio::time::sleep(Duration::from_millis(200)).await;
        let _ = self.shutdown_tx.send(true);

        let snapshot = read_ledger(&self.ledger).clone();
        if let Err(e) = self.store.save_snapshot(&snapshot) {
            error!("final snapshot failed: {}", e);
        }
        if let Err(e) = self.store.flush() {
            error!("kv flush failed: {}", e);
        }
        // Bounded grace for background tasks to unwind
        tokio::time::sleep(Duration::from_millis(300)).await;
        info!("shutdown complete at height {}", snapshot.height());
    }

    // ─────────────────────────────────────────────────────────────────
    // EVENT HANDLING
    // ─────────────────────────────────────────────────────────────────

    fn handle_network_event(&mut self, event: NetworkEvent) {
        match event {
            NetworkEvent::BlockReceived { from, block } => {
                let height = block.header.height;
                let outcome = write_ledger(&self.ledger).append_block(block.clone(), now_ms());
                match outcome {
                    Ok(outcome) if outcome.is_new() => {
                        info!("accepted block {} from {}", height, from);
                        self.persist_from(match &outcome {
                            AppendOutcome::Reorged { applied, .. } => {
                                let tip = read_ledger(&self.ledger).height();
                                tip.saturating_sub(applied.saturating_sub(1))
                            }
                            _ => height,
                        });
                        self.schedule_snapshot();
                        self.manager.broadcast_block(&block, Some(&from));
                    }
                    Ok(AppendOutcome::Buffered) => {
                        debug!("buffered out-of-line block {} from {}", height, from);
                    }
                    Ok(_) => {}
                    Err(e) => debug!("rejected block {} from {}: {}", height, from, e),
                }
            }
            NetworkEvent::TransactionReceived { from, transaction } => {
                let id = transaction.id.clone();
                let result =
                    write_ledger(&self.ledger).insert_transaction(transaction.clone(), now_ms());
                match result {
                    Ok(()) => {
                        debug!("pooled transaction {} from {}", id, from);
                        self.manager.broadcast_transaction(&transaction, Some(&from));
                    }
                    Err(e) => debug!("rejected transaction {} from {}: {}", id, from, e),
                }
            }
            NetworkEvent::BlocksRequested { from, from_height, count } => {
                let blocks = read_ledger(&self.ledger)
                    .blocks_range(from_height, count.min(MAX_SERVED_BATCH) as usize);
                self.manager.send_blocks_to(&from, blocks);
            }
            NetworkEvent::TransactionsRequested { from } => {
                let transactions = read_ledger(&self.ledger).pool.ordered();
                self.manager.send_transactions_to(&from, transactions);
            }
            NetworkEvent::PeerConnected { peer_id } => {
                debug!("peer {} joined, syncing", peer_id);
                self.spawn_sync(Some(peer_id));
            }
            NetworkEvent::PeerDisconnected { peer_id, reason } => {
                debug!("peer {} left ({})", peer_id, reason);
            }
        }
    }

    /// Local submission (API / CLI): insert, then announce.
    fn handle_submission(&mut self, transaction: Transaction) {
        let id = transaction.id.clone();
        let result = write_ledger(&self.ledger).insert_transaction(transaction.clone(), now_ms());
        match result {
            Ok(()) => {
                info!("pooled local transaction {}", id);
                self.manager.broadcast_transaction(&transaction, None);
            }
            Err(e) => warn!("local transaction {} rejected: {}", id, e),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // VALIDATOR LOOP
    // ─────────────────────────────────────────────────────────────────

    /// If the ledger elects us for the next height and a full block time has
    /// passed since the tip, produce.
    fn validator_tick(&mut self) {
        let Some(keypair) = self.validator.clone() else {
            return;
        };
        let address = keypair.address();
        let now = now_ms();

        {
            let ledger = read_ledger(&self.ledger);
            if ledger.expected_proposer().as_deref() != Some(address.as_str()) {
                return;
            }
            if now < ledger.tip().header.timestamp + ledger.params.block_time_ms {
                return;
            }
        }

        let produced = {
            let mut ledger = write_ledger(&self.ledger);
            match ledger.assemble_block(&address, &keypair.secret_key, now) {
                Ok(block) => match ledger.append_block(block.clone(), now) {
                    Ok(outcome) if outcome.is_new() => Some(block),
                    Ok(_) => None,
                    Err(e) => {
                        warn!("own block failed validation: {}", e);
                        None
                    }
                },
                Err(e) => {
                    warn!("block assembly failed: {}", e);
                    None
                }
            }
        };

        if let Some(block) = produced {
            info!(
                "produced block {} with {} transaction(s)",
                block.header.height,
                block.transactions.len()
            );
            self.persist_from(block.header.height);
            self.schedule_snapshot();
            self.manager.broadcast_block(&block, None);
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // SYNC
    // ─────────────────────────────────────────────────────────────────

    /// Run one sync pass on its own task, so the orchestrator keeps serving
    /// peer requests while the pass awaits responses. At most one pass runs
    /// at a time.
    fn spawn_sync(&self, peer: Option<String>) {
        let peer = match peer.or_else(|| self.manager.random_sync_peer()) {
            Some(peer) => peer,
            None => return,
        };
        if self.syncing.swap(true, Ordering::SeqCst) {
            return; // a pass is already running
        }
        let manager = self.manager.clone();
        let ledger = self.ledger.clone();
        let store = self.store.clone();
        let snapshot_tx = self.snapshot_tx.clone();
        let syncing = self.syncing.clone();
        tokio::spawn(async move {
            sync_with(&manager, &ledger, &store, &snapshot_tx, &peer).await;
            syncing.store(false, Ordering::SeqCst);
        });
    }

    // ─────────────────────────────────────────────────────────────────
    // HOUSEKEEPING
    // ─────────────────────────────────────────────────────────────────

    fn sweep_pool(&mut self) {
        let dropped = write_ledger(&self.ledger).pool.remove_expired(now_ms());
        if dropped > 0 {
            debug!("expired {} pooled transaction(s)", dropped);
        }
    }

    fn persist_from(&self, from_height: u64) {
        persist_from(&self.store, &self.ledger, from_height);
    }

    fn schedule_snapshot(&self) {
        schedule_snapshot(&self.snapshot_tx, &self.ledger);
    }
}

/// Index every main-chain block from `from_height` to the tip into the kv
/// store (fire-and-forget durability).
fn persist_from(store: &ChainStore, ledger: &Arc<RwLock<Ledger>>, from_height: u64) {
    let blocks: Vec<_> = {
        let guard = read_ledger(ledger);
        (from_height..=guard.height())
            .filter_map(|h| guard.block_by_height(h).cloned())
            .collect()
    };
    for block in blocks {
        if let Err(e) = store.put_block(&block) {
            warn!("kv write for block {} failed: {}", block.header.height, e);
        }
    }
}

/// Queue a snapshot of the current state; a full queue means a snapshot is
/// already pending and this one is redundant.
fn schedule_snapshot(snapshot_tx: &mpsc::Sender<Ledger>, ledger: &Arc<RwLock<Ledger>>) {
    let snapshot = {
        let guard = read_ledger(ledger);
        if guard.height() % SNAPSHOT_INTERVAL_BLOCKS != 0 {
            return;
        }
        guard.clone()
    };
    let _ = snapshot_tx.try_send(snapshot);
}

/// One sync pass against one peer: pull batches from localTip+1 while they
/// are non-empty and validate, then top up the pool from the peer's pending
/// set. Any failure puts the peer on cool-off.
async fn sync_with(
    manager: &Arc<PeerManager>,
    ledger: &Arc<RwLock<Ledger>>,
    store: &ChainStore,
    snapshot_tx: &mpsc::Sender<Ledger>,
    peer: &str,
) {
    loop {
        let from = read_ledger(ledger).height() + 1;
        let batch = match manager.request_blocks(peer, from, SYNC_BATCH).await {
            Ok(batch) => batch,
            Err(aurum_network::NetworkError::Cancelled) => return,
            Err(e) => {
                debug!("sync request to {} failed: {}", peer, e);
                manager.note_sync_failure(peer);
                return;
            }
        };
        if batch.is_empty() {
            break;
        }

        let mut progressed = false;
        for block in batch {
            let height = block.header.height;
            let outcome = write_ledger(ledger).append_block(block, now_ms());
            match outcome {
                Ok(outcome) if outcome.is_new() => {
                    persist_from(store, ledger, height);
                    progressed = true;
                }
                Ok(_) => {}
                Err(e) => {
                    warn!("sync block {} from {} invalid: {}", height, peer, e);
                    manager.note_sync_failure(peer);
                    return;
                }
            }
        }
        if progressed {
            schedule_snapshot(snapshot_tx, ledger);
        } else {
            break;
        }
    }

    // Top up the pool from the peer's pending transactions
    if let Ok(transactions) = manager.request_transactions(peer).await {
        let mut guard = write_ledger(ledger);
        for tx in transactions {
            let _ = guard.insert_transaction(tx, now_ms());
        }
    }
}
