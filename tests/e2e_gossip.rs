// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM E2E — GOSSIP
//
// Real nodes over real WebSocket links on loopback: handshake, block and
// transaction propagation, startup sync, and network-id rejection.
// Ports are ephemeral (configured as 0) so tests never collide.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Ledger, Transaction, TxKind};
use aurum_node::config::NodeConfig;
use aurum_node::node::Node;
use std::sync::{Arc, RwLock};
use std::time::Duration;

fn config(network: &str, bootstrap: Vec<String>) -> NodeConfig {
    let mut cfg = NodeConfig::default();
    cfg.network = network.to_string();
    cfg.p2p_port = 0;
    cfg.enable_api = false;
    cfg.enable_discovery = true;
    cfg.bootstrap = bootstrap;
    cfg
}

async fn wait_until<F: Fn() -> bool>(what: &str, condition: F) {
    for _ in 0..200 {
        if condition() {
            return;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    panic!("timed out waiting for {}", what);
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap()
        .as_millis() as u64
}

/// Produce a block directly on a shared ledger handle (the test plays the
/// role of the validator loop).
fn produce_on(ledger: &Arc<RwLock<Ledger>>, keys: &aurum_crypto::KeyPair) -> aurum_core::Block {
    let mut guard = ledger.write().unwrap();
    let ts = now_ms();
    let block = guard
        .assemble_block(&keys.address(), &keys.secret_key, ts)
        .unwrap();
    assert!(guard.append_block(block.clone(), ts).unwrap().is_new());
    block
}

#[tokio::test]
async fn blocks_and_transactions_propagate() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();

    let node1 = Node::start(config("aurum-gossip", vec![]), dir1.path())
        .await
        .expect("node1 starts");
    let ledger1 = node1.ledger.clone();
    let manager1 = node1.manager.clone();
    let shutdown1 = node1.shutdown_tx.clone();
    let port1 = node1.p2p_port;
    tokio::spawn(node1.run());

    let node2 = Node::start(
        config("aurum-gossip", vec![format!("127.0.0.1:{}", port1)]),
        dir2.path(),
    )
    .await
    .expect("node2 starts");
    let ledger2 = node2.ledger.clone();
    let manager2 = node2.manager.clone();
    let submit2 = node2.submit_tx.clone();
    let shutdown2 = node2.shutdown_tx.clone();
    tokio::spawn(node2.run());

    wait_until("peers to link up", || {
        manager1.peer_count() == 1 && manager2.peer_count() == 1
    })
    .await;

    // A block produced on node1 reaches node2 via NewBlock gossip
    let producer = aurum_crypto::generate_keypair();
    let block = produce_on(&ledger1, &producer);
    manager1.broadcast_block(&block, None);

    wait_until("block to propagate", || {
        ledger2.read().unwrap().height() == 1
    })
    .await;
    assert_eq!(
        ledger1.read().unwrap().tip_hash(),
        ledger2.read().unwrap().tip_hash()
    );

    // A transaction submitted on node2 lands in node1's pool
    let recipient = aurum_crypto::generate_keypair();
    let mut tx = Transaction::new(
        TxKind::Transfer,
        &producer.address(),
        &recipient.address(),
        // block_reward defaults to 5 on fresh params
        3,
        1,
        now_ms(),
        None,
        0,
    );
    let sig = aurum_crypto::sign_message(&tx.signing_bytes(), &producer.secret_key).unwrap();
    tx.signature = hex::encode(sig);
    let tx_id = tx.id.clone();

    submit2.send(tx).await.unwrap();
    wait_until("transaction to propagate", || {
        ledger1.read().unwrap().pool.contains(&tx_id)
    })
    .await;

    let _ = shutdown1.send(true);
    let _ = shutdown2.send(true);
}

#[tokio::test]
async fn late_joiner_syncs_missing_blocks() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();

    let node1 = Node::start(config("aurum-sync", vec![]), dir1.path())
        .await
        .expect("node1 starts");
    let ledger1 = node1.ledger.clone();
    let shutdown1 = node1.shutdown_tx.clone();
    let port1 = node1.p2p_port;
    tokio::spawn(node1.run());

    // Node1 accumulates history before anyone else exists
    let producer = aurum_crypto::generate_keypair();
    for _ in 0..5 {
        produce_on(&ledger1, &producer);
    }

    let node2 = Node::start(
        config("aurum-sync", vec![format!("127.0.0.1:{}", port1)]),
        dir2.path(),
    )
    .await
    .expect("node2 starts");
    let ledger2 = node2.ledger.clone();
    let shutdown2 = node2.shutdown_tx.clone();
    tokio::spawn(node2.run());

    // GetBlocks(localTip+1, batch) catches the late joiner up
    wait_until("late joiner to sync", || {
        ledger2.read().unwrap().height() == 5
    })
    .await;
    assert_eq!(
        ledger1.read().unwrap().tip_hash(),
        ledger2.read().unwrap().tip_hash()
    );

    let _ = shutdown1.send(true);
    let _ = shutdown2.send(true);
}

/// Scenario: a peer on another network is refused at handshake and not
/// retained in the peer table.
#[tokio::test]
async fn network_id_mismatch_terminates_session() {
    let dir1 = tempfile::tempdir().unwrap();
    let dir2 = tempfile::tempdir().unwrap();

    let node1 = Node::start(config("aurum-main", vec![]), dir1.path())
        .await
        .expect("node1 starts");
    let manager1 = node1.manager.clone();
    let shutdown1 = node1.shutdown_tx.clone();
    let port1 = node1.p2p_port;
    tokio::spawn(node1.run());

    let node2 = Node::start(
        config("other", vec![format!("127.0.0.1:{}", port1)]),
        dir2.path(),
    )
    .await
    .expect("node2 starts despite refused bootstrap");
    let manager2 = node2.manager.clone();
    let shutdown2 = node2.shutdown_tx.clone();
    tokio::spawn(node2.run());

    // Give the refused dial time to complete either way
    tokio::time::sleep(Duration::from_millis(800)).await;
    assert_eq!(manager1.peer_count(), 0, "mismatched peer must not be retained");
    assert_eq!(manager2.peer_count(), 0, "mismatched peer must not be retained");

    let _ = shutdown1.send(true);
    let _ = shutdown2.send(true);
}
