// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - PEER MANAGER
//
// Owns the peer table, session lifecycle, broadcast, and request/response
// correlation. Ledger-touching requests (blocks, transactions) are forwarded
// to the orchestrator as events; everything peer-table-local is answered
// here. Only the manager mutates the peer table.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::dedup::DedupCache;
use crate::message::{
    BlocksPayload, DisconnectPayload, EmptyPayload, Envelope, GetBlocksPayload, HandshakePayload,
    MessageType, NewBlockPayload, NewTransactionPayload, PeerInfo, PeersPayload,
    TransactionsPayload, PROTOCOL_VERSION,
};
use crate::peer::{exchange_handshake, run_session};
use crate::{
    now_ms, NetworkError, NetworkEvent, OUTBOUND_QUEUE_DEPTH, PEER_COOLOFF_MS, REQUEST_TIMEOUT_MS,
};
use aurum_core::{Block, Transaction};
use log::{debug, info, warn};
use rand::seq::SliceRandom;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU16, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::net::TcpListener;
use tokio::sync::{mpsc, oneshot, watch};
use tokio_tungstenite::WebSocketStream;

/// Recover a poisoned mutex instead of cascading panics across sessions.
fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    match mutex.lock() {
        Ok(guard) => guard,
        Err(poisoned) => {
            warn!("mutex poisoned, recovering");
            poisoned.into_inner()
        }
    }
}

#[derive(Debug, Clone)]
pub struct NetworkConfig {
    pub node_id: String,
    pub network_id: String,
    pub listen_port: u16,
    pub max_peers: usize,
    /// Bootstrap endpoints, "ip:port"
    pub bootstrap: Vec<String>,
    /// When false, learned peers are never dialed and GetPeers is not sent
    pub discovery: bool,
}

struct PeerHandle {
    info: PeerInfo,
    outbound: mpsc::Sender<Envelope>,
}

pub struct PeerManager {
    cfg: NetworkConfig,
    peers: Mutex<HashMap<String, PeerHandle>>,
    /// Endpoints already dialed, to stop discovery loops
    dialed: Mutex<HashSet<String>>,
    pending: Mutex<HashMap<(String, MessageType), oneshot::Sender<Envelope>>>,
    seen_blocks: Mutex<DedupCache>,
    seen_txs: Mutex<DedupCache>,
    /// peer id → skip-until timestamp after a sync failure
    cooloff: Mutex<HashMap<String, u64>>,
    events: mpsc::Sender<NetworkEvent>,
    shutdown: watch::Receiver<bool>,
    /// Actual listener port, set by start(); advertised in handshakes
    bound_port: AtomicU16,
}

impl PeerManager {
    pub fn new(
        cfg: NetworkConfig,
        events: mpsc::Sender<NetworkEvent>,
        shutdown: watch::Receiver<bool>,
    ) -> Arc<Self> {
        Arc::new(Self {
            cfg,
            peers: Mutex::new(HashMap::new()),
            dialed: Mutex::new(HashSet::new()),
            pending: Mutex::new(HashMap::new()),
            seen_blocks: Mutex::new(DedupCache::new()),
            seen_txs: Mutex::new(DedupCache::new()),
            cooloff: Mutex::new(HashMap::new()),
            events,
            shutdown,
            bound_port: AtomicU16::new(0),
        })
    }

    pub fn node_id(&self) -> &str {
        &self.cfg.node_id
    }

    /// The port the listener actually bound (differs from the configured
    /// port when that was 0).
    pub fn listen_port(&self) -> u16 {
        let bound = self.bound_port.load(Ordering::Relaxed);
        if bound != 0 {
            bound
        } else {
            self.cfg.listen_port
        }
    }

    fn our_handshake(&self) -> HandshakePayload {
        HandshakePayload {
            node_id: self.cfg.node_id.clone(),
            version: PROTOCOL_VERSION.to_string(),
            listen_port: self.listen_port(),
            network_id: self.cfg.network_id.clone(),
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // LIFECYCLE
    // ─────────────────────────────────────────────────────────────────

    /// Bind the listener and spawn the acceptor task. Returns the bound
    /// port (useful when configured with port 0 in tests).
    pub async fn start(self: Arc<Self>) -> Result<u16, NetworkError> {
        let listener = TcpListener::bind(("0.0.0.0", self.cfg.listen_port))
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;
        let port = listener
            .local_addr()
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?
            .port();
        self.bound_port.store(port, Ordering::Relaxed);
        info!("p2p listening on port {}", port);

        let manager = self.clone();
        let mut shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = shutdown.changed() => break,
                    accepted = listener.accept() => {
                        let Ok((stream, addr)) = accepted else { continue };
                        let manager = manager.clone();
                        tokio::spawn(async move {
                            let ws = match tokio_tungstenite::accept_async(stream).await {
                                Ok(ws) => ws,
                                Err(e) => {
                                    debug!("websocket accept failed from {}: {}", addr, e);
                                    return;
                                }
                            };
                            manager.establish(ws, addr.ip().to_string()).await;
                        });
                    }
                }
            }
        });

        Ok(port)
    }

    /// Dial every configured bootstrap endpoint.
    pub async fn dial_bootstrap(self: Arc<Self>) {
        for endpoint in self.cfg.bootstrap.clone() {
            if let Some((ip, port)) = split_endpoint(&endpoint) {
                if let Err(e) = self.clone().dial(&ip, port).await {
                    warn!("bootstrap dial {} failed: {}", endpoint, e);
                }
            } else {
                warn!("ignoring malformed bootstrap endpoint {:?}", endpoint);
            }
        }
    }

    /// Dial one peer endpoint and run the session if the handshake holds.
    pub async fn dial(self: Arc<Self>, ip: &str, port: u16) -> Result<(), NetworkError> {
        let endpoint = format!("{}:{}", ip, port);
        lock(&self.dialed).insert(endpoint.clone());

        if self.peer_count() >= self.cfg.max_peers {
            return Ok(());
        }

        let url = format!("ws://{}", endpoint);
        let (mut ws, _) = tokio_tungstenite::connect_async(url.as_str())
            .await
            .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

        let ours = self.our_handshake();
        let theirs = exchange_handshake(&mut ws, &ours).await?;
        self.register(ws, theirs, ip.to_string()).await;
        Ok(())
    }

    /// Inbound path: handshake then register.
    async fn establish<S>(self: Arc<Self>, mut ws: WebSocketStream<S>, ip: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        let ours = self.our_handshake();
        match exchange_handshake(&mut ws, &ours).await {
            Ok(theirs) => self.register(ws, theirs, ip).await,
            Err(e) => debug!("inbound handshake from {} rejected: {}", ip, e),
        }
    }

    /// Register a handshaken session: guard self-connections, duplicates and
    /// the peer cap, then spawn the I/O task and kick off discovery.
    async fn register<S>(self: Arc<Self>, ws: WebSocketStream<S>, theirs: HandshakePayload, ip: String)
    where
        S: AsyncRead + AsyncWrite + Unpin + Send + 'static,
    {
        if theirs.node_id == self.cfg.node_id {
            debug!("dropping self-connection");
            return;
        }

        let (outbound_tx, outbound_rx) = mpsc::channel(OUTBOUND_QUEUE_DEPTH);
        {
            let mut peers = lock(&self.peers);
            if peers.contains_key(&theirs.node_id) {
                debug!("duplicate session with {}, keeping the first", theirs.node_id);
                return;
            }
            if peers.len() >= self.cfg.max_peers {
                debug!("peer cap reached, refusing {}", theirs.node_id);
                return;
            }
            peers.insert(
                theirs.node_id.clone(),
                PeerHandle {
                    info: PeerInfo {
                        id: theirs.node_id.clone(),
                        ip,
                        port: theirs.listen_port,
                    },
                    outbound: outbound_tx,
                },
            );
        }
        info!("peer connected: {}", theirs.node_id);

        let manager = self.clone();
        let peer_id = theirs.node_id.clone();
        let shutdown = self.shutdown.clone();
        tokio::spawn(async move {
            run_session(manager, ws, peer_id, outbound_rx, shutdown).await;
        });

        let _ = self
            .events
            .send(NetworkEvent::PeerConnected {
                peer_id: theirs.node_id.clone(),
            })
            .await;

        // A fresh peer is asked for its peers right away
        if self.cfg.discovery {
            let env = self.envelope(MessageType::GetPeers, &EmptyPayload {});
            let _ = self.send_to(&theirs.node_id, env);
        }
    }

    /// Drop a peer from the table and notify the orchestrator. The session
    /// task ends on its own once the outbound sender is gone.
    pub(crate) async fn unregister(&self, peer_id: &str, reason: &str) {
        let removed = lock(&self.peers).remove(peer_id).is_some();
        lock(&self.pending).retain(|(id, _), _| id.as_str() != peer_id);
        if removed {
            info!("peer disconnected: {} ({})", peer_id, reason);
            let _ = self
                .events
                .send(NetworkEvent::PeerDisconnected {
                    peer_id: peer_id.to_string(),
                    reason: reason.to_string(),
                })
                .await;
        }
    }

    /// Queue Disconnect("shutdown") on every session. Sessions flush the
    /// frame and close themselves.
    pub fn shutdown_all(&self) {
        let env = self.envelope(
            MessageType::Disconnect,
            &DisconnectPayload {
                reason: "shutdown".to_string(),
            },
        );
        let peers = lock(&self.peers);
        for handle in peers.values() {
            let _ = handle.outbound.try_send(env.clone());
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // SENDING
    // ─────────────────────────────────────────────────────────────────

    fn envelope<T: serde::Serialize>(&self, kind: MessageType, payload: &T) -> Envelope {
        Envelope::new(kind, payload, &self.cfg.node_id, now_ms())
    }

    /// Queue a frame for one peer. A full queue marks the peer slow; the
    /// caller-visible error carries the stable reason and the peer is
    /// dropped asynchronously.
    fn send_to(&self, peer_id: &str, envelope: Envelope) -> Result<(), NetworkError> {
        let sender = {
            let peers = lock(&self.peers);
            match peers.get(peer_id) {
                Some(handle) => handle.outbound.clone(),
                None => return Err(NetworkError::NotConnected(peer_id.to_string())),
            }
        };
        match sender.try_send(envelope) {
            Ok(()) => Ok(()),
            Err(mpsc::error::TrySendError::Full(_)) => {
                warn!("outbound queue full, dropping slow peer {}", peer_id);
                // Removing the handle drops the only sender; the session's
                // write loop ends and the socket closes
                lock(&self.peers).remove(peer_id);
                let _ = self.events.try_send(NetworkEvent::PeerDisconnected {
                    peer_id: peer_id.to_string(),
                    reason: "slow".to_string(),
                });
                Err(NetworkError::PeerSlow(peer_id.to_string()))
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                Err(NetworkError::NotConnected(peer_id.to_string()))
            }
        }
    }

    fn send_all(&self, envelope: Envelope, exclude: Option<&str>) {
        let targets: Vec<String> = {
            let peers = lock(&self.peers);
            peers
                .keys()
                .filter(|id| Some(id.as_str()) != exclude)
                .cloned()
                .collect()
        };
        for peer_id in targets {
            let _ = self.send_to(&peer_id, envelope.clone());
        }
    }

    /// Broadcast a locally-accepted block to every connected peer once.
    /// `origin` (for rebroadcasts) is skipped; its copy came from there.
    pub fn broadcast_block(&self, block: &Block, origin: Option<&str>) {
        lock(&self.seen_blocks).insert(&block.hash(), now_ms());
        let env = self.envelope(
            MessageType::NewBlock,
            &NewBlockPayload { block: block.clone() },
        );
        self.send_all(env, origin);
    }

    /// Broadcast a locally-accepted transaction.
    pub fn broadcast_transaction(&self, transaction: &Transaction, origin: Option<&str>) {
        lock(&self.seen_txs).insert(&transaction.id, now_ms());
        let env = self.envelope(
            MessageType::NewTransaction,
            &NewTransactionPayload {
                transaction: transaction.clone(),
            },
        );
        self.send_all(env, origin);
    }

    /// Answer a peer's GetBlocks (called by the orchestrator).
    pub fn send_blocks_to(&self, peer_id: &str, blocks: Vec<Block>) {
        let env = self.envelope(MessageType::Blocks, &BlocksPayload { blocks });
        let _ = self.send_to(peer_id, env);
    }

    /// Answer a peer's GetTransactions (called by the orchestrator).
    pub fn send_transactions_to(&self, peer_id: &str, transactions: Vec<Transaction>) {
        let env = self.envelope(MessageType::Transactions, &TransactionsPayload { transactions });
        let _ = self.send_to(peer_id, env);
    }

    // ─────────────────────────────────────────────────────────────────
    // REQUEST / RESPONSE
    // ─────────────────────────────────────────────────────────────────

    /// Fetch a block batch from one peer. Timeout resolves to an empty
    /// batch; shutdown resolves to Cancelled, never to "empty".
    pub async fn request_blocks(
        &self,
        peer_id: &str,
        from_height: u64,
        count: u32,
    ) -> Result<Vec<Block>, NetworkError> {
        let envelope = self.envelope(
            MessageType::GetBlocks,
            &GetBlocksPayload { from_height, count },
        );
        let response = self
            .request(peer_id, MessageType::Blocks, envelope)
            .await?;
        match response {
            Some(env) => env
                .payload::<BlocksPayload>()
                .map(|p| p.blocks)
                .map_err(NetworkError::ConnectionFailed),
            None => Ok(Vec::new()),
        }
    }

    /// Fetch a peer's pending transactions.
    pub async fn request_transactions(
        &self,
        peer_id: &str,
    ) -> Result<Vec<Transaction>, NetworkError> {
        let envelope = self.envelope(MessageType::GetTransactions, &EmptyPayload {});
        let response = self
            .request(peer_id, MessageType::Transactions, envelope)
            .await?;
        match response {
            Some(env) => env
                .payload::<TransactionsPayload>()
                .map(|p| p.transactions)
                .map_err(NetworkError::ConnectionFailed),
            None => Ok(Vec::new()),
        }
    }

    /// Shared request plumbing: one in-flight request per (peer, response
    /// kind). Ok(None) = timeout.
    async fn request(
        &self,
        peer_id: &str,
        response_kind: MessageType,
        envelope: Envelope,
    ) -> Result<Option<Envelope>, NetworkError> {
        let key = (peer_id.to_string(), response_kind);
        let (tx, rx) = oneshot::channel();
        lock(&self.pending).insert(key.clone(), tx);

        if let Err(e) = self.send_to(peer_id, envelope) {
            lock(&self.pending).remove(&key);
            return Err(e);
        }

        let mut shutdown = self.shutdown.clone();
        tokio::select! {
            response = rx => match response {
                Ok(env) => Ok(Some(env)),
                // Sender dropped: the peer disconnected mid-request
                Err(_) => Err(NetworkError::NotConnected(peer_id.to_string())),
            },
            _ = tokio::time::sleep(Duration::from_millis(REQUEST_TIMEOUT_MS)) => {
                lock(&self.pending).remove(&key);
                Ok(None)
            }
            _ = shutdown.changed() => {
                lock(&self.pending).remove(&key);
                Err(NetworkError::Cancelled)
            }
        }
    }

    fn resolve_pending(&self, peer_id: &str, kind: MessageType, envelope: &Envelope) -> bool {
        let key = (peer_id.to_string(), kind);
        match lock(&self.pending).remove(&key) {
            Some(tx) => tx.send(envelope.clone()).is_ok(),
            None => false,
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // INBOUND DISPATCH
    // ─────────────────────────────────────────────────────────────────

    pub(crate) async fn handle_envelope(self: Arc<Self>, peer_id: &str, envelope: Envelope) {
        match envelope.kind {
            MessageType::Handshake => {
                // Already handshaken; a repeat is harmless noise
            }
            MessageType::Disconnect => {
                let reason = envelope
                    .payload::<DisconnectPayload>()
                    .map(|p| p.reason)
                    .unwrap_or_else(|_| "unspecified".to_string());
                self.unregister(peer_id, &reason).await;
            }
            MessageType::GetPeers => {
                let peers: Vec<PeerInfo> = {
                    let table = lock(&self.peers);
                    table
                        .values()
                        .filter(|h| h.info.id != peer_id)
                        .map(|h| h.info.clone())
                        .collect()
                };
                let env = self.envelope(MessageType::Peers, &PeersPayload { peers });
                let _ = self.send_to(peer_id, env);
            }
            MessageType::Peers => {
                let was_awaited = self.resolve_pending(peer_id, MessageType::Peers, &envelope);
                if let Ok(payload) = envelope.payload::<PeersPayload>() {
                    self.clone().learn_peers(payload.peers);
                } else if !was_awaited {
                    debug!("undecodable Peers payload from {}", peer_id);
                }
            }
            MessageType::GetBlocks => {
                if let Ok(payload) = envelope.payload::<GetBlocksPayload>() {
                    let _ = self
                        .events
                        .send(NetworkEvent::BlocksRequested {
                            from: peer_id.to_string(),
                            from_height: payload.from_height,
                            count: payload.count,
                        })
                        .await;
                }
            }
            MessageType::Blocks => {
                if !self.resolve_pending(peer_id, MessageType::Blocks, &envelope) {
                    debug!("unsolicited Blocks from {}", peer_id);
                }
            }
            MessageType::GetTransactions => {
                let _ = self
                    .events
                    .send(NetworkEvent::TransactionsRequested {
                        from: peer_id.to_string(),
                    })
                    .await;
            }
            MessageType::Transactions => {
                if !self.resolve_pending(peer_id, MessageType::Transactions, &envelope) {
                    debug!("unsolicited Transactions from {}", peer_id);
                }
            }
            MessageType::NewBlock => {
                let Ok(payload) = envelope.payload::<NewBlockPayload>() else {
                    debug!("undecodable NewBlock from {}", peer_id);
                    return;
                };
                let fresh = lock(&self.seen_blocks).insert(&payload.block.hash(), now_ms());
                if fresh {
                    let _ = self
                        .events
                        .send(NetworkEvent::BlockReceived {
                            from: peer_id.to_string(),
                            block: payload.block,
                        })
                        .await;
                }
            }
            MessageType::NewTransaction => {
                let Ok(payload) = envelope.payload::<NewTransactionPayload>() else {
                    debug!("undecodable NewTransaction from {}", peer_id);
                    return;
                };
                let fresh = lock(&self.seen_txs).insert(&payload.transaction.id, now_ms());
                if fresh {
                    let _ = self
                        .events
                        .send(NetworkEvent::TransactionReceived {
                            from: peer_id.to_string(),
                            transaction: payload.transaction,
                        })
                        .await;
                }
            }
        }
    }

    /// Opportunistically dial newly learned peers while below the cap.
    fn learn_peers(self: Arc<Self>, learned: Vec<PeerInfo>) {
        if !self.cfg.discovery {
            return;
        }
        for peer in learned {
            if peer.id == self.cfg.node_id {
                continue;
            }
            if self.peer_count() >= self.cfg.max_peers {
                break;
            }
            if lock(&self.peers).contains_key(&peer.id) {
                continue;
            }
            let endpoint = format!("{}:{}", peer.ip, peer.port);
            if !lock(&self.dialed).insert(endpoint) {
                continue; // already attempted
            }
            let manager = self.clone();
            tokio::spawn(async move {
                if let Err(e) = manager.dial(&peer.ip, peer.port).await {
                    debug!("discovery dial {}:{} failed: {}", peer.ip, peer.port, e);
                }
            });
        }
    }

    // ─────────────────────────────────────────────────────────────────
    // PEER TABLE READS + SYNC SUPPORT
    // ─────────────────────────────────────────────────────────────────

    pub fn peer_count(&self) -> usize {
        lock(&self.peers).len()
    }

    pub fn peers(&self) -> Vec<PeerInfo> {
        lock(&self.peers).values().map(|h| h.info.clone()).collect()
    }

    pub fn is_connected(&self, peer_id: &str) -> bool {
        lock(&self.peers).contains_key(peer_id)
    }

    /// A random connected peer that is not cooling off, for sync.
    pub fn random_sync_peer(&self) -> Option<String> {
        let now = now_ms();
        let cooled: HashSet<String> = {
            let cooloff = lock(&self.cooloff);
            cooloff
                .iter()
                .filter(|(_, &until)| until > now)
                .map(|(id, _)| id.clone())
                .collect()
        };
        let candidates: Vec<String> = {
            let peers = lock(&self.peers);
            peers
                .keys()
                .filter(|id| !cooled.contains(*id))
                .cloned()
                .collect()
        };
        candidates.choose(&mut rand::thread_rng()).cloned()
    }

    /// Disqualify a peer from sync for the cool-off period.
    pub fn note_sync_failure(&self, peer_id: &str) {
        lock(&self.cooloff).insert(peer_id.to_string(), now_ms() + PEER_COOLOFF_MS);
    }
}

fn split_endpoint(endpoint: &str) -> Option<(String, u16)> {
    let (ip, port) = endpoint.rsplit_once(':')?;
    let port: u16 = port.parse().ok()?;
    if ip.is_empty() {
        return None;
    }
    Some((ip.to_string(), port))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_split_endpoint() {
        assert_eq!(split_endpoint("127.0.0.1:7001"), Some(("127.0.0.1".to_string(), 7001)));
        assert_eq!(split_endpoint("nohost"), None);
        assert_eq!(split_endpoint(":7001"), None);
        assert_eq!(split_endpoint("127.0.0.1:notaport"), None);
    }
}
