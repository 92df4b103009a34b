// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - NETWORK MODULE
//
// Session-oriented WebSocket gossip overlay.
// - Symmetric handshake with network-id enforcement
// - Typed message dispatch into an event stream for the orchestrator
// - Best-effort broadcast with content-hash dedup
// - Request/response pairs (peers, blocks, transactions) with timeouts
// - Bounded per-peer outbound queues; overflow disconnects the slow peer
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Block, Transaction};

pub mod dedup;
pub mod manager;
pub mod message;
mod peer;

pub use manager::{NetworkConfig, PeerManager};
pub use message::{MessageType, PeerInfo, MAX_FRAME_BYTES, PROTOCOL_VERSION};

/// Per-peer outbound queue depth; a peer that lets this fill up is dropped
/// with reason "slow".
pub const OUTBOUND_QUEUE_DEPTH: usize = 256;

/// Handshake and request/response deadline
pub const REQUEST_TIMEOUT_MS: u64 = 10_000;

/// Failed sync peers are skipped for this long
pub const PEER_COOLOFF_MS: u64 = 30_000;

/// Typed events delivered to the node orchestrator. One stream, serialized,
/// so all ledger mutations funnel through a single consumer.
#[derive(Debug, Clone)]
pub enum NetworkEvent {
    PeerConnected {
        peer_id: String,
    },
    PeerDisconnected {
        peer_id: String,
        reason: String,
    },
    BlockReceived {
        from: String,
        block: Block,
    },
    TransactionReceived {
        from: String,
        transaction: Transaction,
    },
    /// A peer asked for blocks; the orchestrator answers from the ledger
    BlocksRequested {
        from: String,
        from_height: u64,
        count: u32,
    },
    /// A peer asked for the pending pool
    TransactionsRequested {
        from: String,
    },
}

#[derive(Debug)]
pub enum NetworkError {
    NetworkIdMismatch { ours: String, theirs: String },
    HandshakeTimeout,
    PeerSlow(String),
    Cancelled,
    ConnectionFailed(String),
    FrameTooLarge(usize),
    NotConnected(String),
}

impl std::fmt::Display for NetworkError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            NetworkError::NetworkIdMismatch { ours, theirs } => {
                write!(f, "NetworkIdMismatch: ours {:?}, peer {:?}", ours, theirs)
            }
            NetworkError::HandshakeTimeout => write!(f, "HandshakeTimeout"),
            NetworkError::PeerSlow(id) => write!(f, "PeerSlow: outbound queue full for {}", id),
            NetworkError::Cancelled => write!(f, "Cancelled"),
            NetworkError::ConnectionFailed(msg) => write!(f, "ConnectionFailed: {}", msg),
            NetworkError::FrameTooLarge(size) => {
                write!(f, "FrameTooLarge: {} bytes exceeds 4 MiB", size)
            }
            NetworkError::NotConnected(id) => write!(f, "NotConnected: {}", id),
        }
    }
}

impl std::error::Error for NetworkError {}

pub(crate) fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}
