// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - WIRE MESSAGES
//
// One JSON document per WebSocket text frame: {type, data, from, timestamp}.
// Payload field names are camelCase on the wire. Frames above 4 MiB are
// rejected and the offending peer disconnected.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Block, Transaction};
use serde::{Deserialize, Serialize};

/// Hard cap on a single frame
pub const MAX_FRAME_BYTES: usize = 4 * 1024 * 1024;

/// Protocol version carried in the handshake
pub const PROTOCOL_VERSION: &str = "1";

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub enum MessageType {
    Handshake,
    Disconnect,
    GetPeers,
    Peers,
    GetBlocks,
    Blocks,
    GetTransactions,
    Transactions,
    NewBlock,
    NewTransaction,
}

/// Frame envelope. `data` stays untyped here; each handler decodes the
/// payload struct it expects.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Envelope {
    #[serde(rename = "type")]
    pub kind: MessageType,
    pub data: serde_json::Value,
    /// Sender's node id
    pub from: String,
    /// Millis since Unix epoch
    pub timestamp: u64,
}

impl Envelope {
    pub fn new<T: Serialize>(kind: MessageType, payload: &T, from: &str, timestamp: u64) -> Self {
        Self {
            kind,
            // Payload structs serialize infallibly
            data: serde_json::to_value(payload).expect("payload encoding is infallible"),
            from: from.to_string(),
            timestamp,
        }
    }

    /// Serialize to one text frame, enforcing the size cap.
    pub fn encode(&self) -> Result<String, String> {
        let text = serde_json::to_string(self).map_err(|e| e.to_string())?;
        if text.len() > MAX_FRAME_BYTES {
            return Err(format!("frame of {} bytes exceeds 4 MiB cap", text.len()));
        }
        Ok(text)
    }

    /// Parse one text frame, enforcing the size cap.
    pub fn decode(text: &str) -> Result<Self, String> {
        if text.len() > MAX_FRAME_BYTES {
            return Err(format!("frame of {} bytes exceeds 4 MiB cap", text.len()));
        }
        serde_json::from_str(text).map_err(|e| e.to_string())
    }

    pub fn payload<T: for<'de> Deserialize<'de>>(&self) -> Result<T, String> {
        serde_json::from_value(self.data.clone()).map_err(|e| e.to_string())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HandshakePayload {
    pub node_id: String,
    pub version: String,
    pub listen_port: u16,
    pub network_id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DisconnectPayload {
    pub reason: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct PeerInfo {
    pub id: String,
    pub ip: String,
    pub port: u16,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PeersPayload {
    pub peers: Vec<PeerInfo>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GetBlocksPayload {
    pub from_height: u64,
    pub count: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BlocksPayload {
    pub blocks: Vec<Block>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransactionsPayload {
    pub transactions: Vec<Transaction>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewBlockPayload {
    pub block: Block,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NewTransactionPayload {
    pub transaction: Transaction,
}

/// Empty payload for GetPeers / GetTransactions
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmptyPayload {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_envelope_round_trip() {
        let payload = HandshakePayload {
            node_id: "node-1".into(),
            version: PROTOCOL_VERSION.into(),
            listen_port: 7001,
            network_id: "aurum-test".into(),
        };
        let env = Envelope::new(MessageType::Handshake, &payload, "node-1", 1_700_000_000_000);
        let text = env.encode().unwrap();

        // camelCase on the wire
        assert!(text.contains("\"nodeId\""));
        assert!(text.contains("\"listenPort\""));
        assert!(text.contains("\"type\":\"Handshake\""));

        let decoded = Envelope::decode(&text).unwrap();
        assert_eq!(decoded.kind, MessageType::Handshake);
        let back: HandshakePayload = decoded.payload().unwrap();
        assert_eq!(back.network_id, "aurum-test");
    }

    #[test]
    fn test_oversized_frame_rejected() {
        let big = "x".repeat(MAX_FRAME_BYTES + 1);
        assert!(Envelope::decode(&big).is_err());

        let payload = DisconnectPayload { reason: "y".repeat(MAX_FRAME_BYTES) };
        let env = Envelope::new(MessageType::Disconnect, &payload, "node-1", 0);
        assert!(env.encode().is_err());
    }

    #[test]
    fn test_get_blocks_payload_field_names() {
        let env = Envelope::new(
            MessageType::GetBlocks,
            &GetBlocksPayload { from_height: 5, count: 64 },
            "node-1",
            0,
        );
        let text = env.encode().unwrap();
        assert!(text.contains("\"fromHeight\":5"));
        assert!(text.contains("\"count\":64"));
    }
}
