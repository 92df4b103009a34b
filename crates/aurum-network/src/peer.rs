// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - PEER SESSION
//
// One I/O task per peer link. The session exchanges handshakes, then pumps
// frames: inbound frames are dispatched to the manager in arrival order,
// outbound frames drain from the bounded per-peer queue.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::manager::PeerManager;
use crate::message::{
    DisconnectPayload, Envelope, HandshakePayload, MessageType, MAX_FRAME_BYTES,
};
use crate::{now_ms, NetworkError, REQUEST_TIMEOUT_MS};
use futures::{SinkExt, StreamExt};
use log::{debug, warn};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, watch};
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::WebSocketStream;

/// Send our handshake, await the peer's, and enforce the network id.
/// A mismatch sends Disconnect("NetworkIdMismatch") before closing, so the
/// remote learns why it was refused.
pub(crate) async fn exchange_handshake<S>(
    ws: &mut WebSocketStream<S>,
    ours: &HandshakePayload,
) -> Result<HandshakePayload, NetworkError>
where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let hello = Envelope::new(MessageType::Handshake, ours, &ours.node_id, now_ms());
    let text = hello.encode().map_err(NetworkError::ConnectionFailed)?;
    ws.send(WsMessage::Text(text))
        .await
        .map_err(|e| NetworkError::ConnectionFailed(e.to_string()))?;

    let deadline = Duration::from_millis(REQUEST_TIMEOUT_MS);
    let frame = tokio::time::timeout(deadline, ws.next())
        .await
        .map_err(|_| NetworkError::HandshakeTimeout)?;

    let text = match frame {
        Some(Ok(WsMessage::Text(text))) => text,
        Some(Ok(other)) => {
            return Err(NetworkError::ConnectionFailed(format!(
                "expected handshake text frame, got {:?}",
                other
            )))
        }
        Some(Err(e)) => return Err(NetworkError::ConnectionFailed(e.to_string())),
        None => return Err(NetworkError::ConnectionFailed("closed during handshake".into())),
    };
    if text.len() > MAX_FRAME_BYTES {
        return Err(NetworkError::FrameTooLarge(text.len()));
    }

    let envelope = Envelope::decode(&text).map_err(NetworkError::ConnectionFailed)?;
    if envelope.kind != MessageType::Handshake {
        return Err(NetworkError::ConnectionFailed(format!(
            "expected Handshake, got {:?}",
            envelope.kind
        )));
    }
    let theirs: HandshakePayload = envelope
        .payload()
        .map_err(NetworkError::ConnectionFailed)?;

    if theirs.network_id != ours.network_id {
        let bye = Envelope::new(
            MessageType::Disconnect,
            &DisconnectPayload {
                reason: "NetworkIdMismatch".to_string(),
            },
            &ours.node_id,
            now_ms(),
        );
        if let Ok(text) = bye.encode() {
            let _ = ws.send(WsMessage::Text(text)).await;
        }
        let _ = ws.close(None).await;
        return Err(NetworkError::NetworkIdMismatch {
            ours: ours.network_id.clone(),
            theirs: theirs.network_id,
        });
    }

    Ok(theirs)
}

/// Pump one established session until the link drops, the manager drops the
/// peer's outbound sender, or shutdown is signalled.
pub(crate) async fn run_session<S>(
    manager: Arc<PeerManager>,
    ws: WebSocketStream<S>,
    peer_id: String,
    mut outbound_rx: mpsc::Receiver<Envelope>,
    mut shutdown: watch::Receiver<bool>,
) where
    S: AsyncRead + AsyncWrite + Unpin,
{
    let (mut sink, mut stream) = ws.split();
    let mut close_reason = "closed".to_string();

    loop {
        tokio::select! {
            _ = shutdown.changed() => {
                close_reason = "shutdown".to_string();
                break;
            }
            outgoing = outbound_rx.recv() => {
                match outgoing {
                    Some(envelope) => {
                        let disconnecting = envelope.kind == MessageType::Disconnect;
                        match envelope.encode() {
                            Ok(text) => {
                                if sink.send(WsMessage::Text(text)).await.is_err() {
                                    break;
                                }
                            }
                            Err(e) => {
                                // Oversized outbound frames are a local bug;
                                // drop the frame, keep the session
                                warn!("dropping oversized frame to {}: {}", peer_id, e);
                            }
                        }
                        if disconnecting {
                            close_reason = "disconnected".to_string();
                            break;
                        }
                    }
                    // Manager dropped the handle (slow peer or removal)
                    None => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(WsMessage::Text(text))) => {
                        if text.len() > MAX_FRAME_BYTES {
                            warn!("peer {} sent oversized frame ({} bytes)", peer_id, text.len());
                            close_reason = "FrameTooLarge".to_string();
                            break;
                        }
                        match Envelope::decode(&text) {
                            Ok(envelope) => {
                                // In-order dispatch: the next frame is not read
                                // until this one is fully handled
                                manager.clone().handle_envelope(&peer_id, envelope).await;
                            }
                            Err(e) => debug!("undecodable frame from {}: {}", peer_id, e),
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Ok(_)) => continue, // ping/pong/binary handled upstream
                    Some(Err(e)) => {
                        debug!("read error from {}: {}", peer_id, e);
                        break;
                    }
                }
            }
        }
    }

    let _ = sink.close().await;
    manager.unregister(&peer_id, &close_reason).await;
}
