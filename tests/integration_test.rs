// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM INTEGRATION TESTS
//
// End-to-end scenarios across the crates: genesis boot, wallet-signed
// transfers, staking and election, crash recovery from snapshot + kv tail.
// Networking scenarios live in e2e_gossip.rs.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{ChainParams, Ledger, TxKind, GENESIS_PROPOSER, ZERO_HASH};
use aurum_node::config::NodeConfig;
use aurum_node::node::Node;
use aurum_node::store::ChainStore;

fn test_config(network: &str) -> NodeConfig {
    let mut cfg = NodeConfig::default();
    cfg.network = network.to_string();
    cfg.p2p_port = 0; // ephemeral
    cfg.enable_api = false;
    cfg.enable_discovery = false;
    cfg
}

/// Scenario: a node started with empty state sits on genesis alone.
#[tokio::test]
async fn genesis_only_node() {
    let dir = tempfile::tempdir().unwrap();
    let node = Node::start(test_config("aurum-genesis-test"), dir.path())
        .await
        .expect("node starts");

    {
        let ledger = node.ledger.read().unwrap();
        assert_eq!(ledger.height(), 0);
        let genesis = ledger.tip();
        assert_eq!(genesis.header.parent_hash, ZERO_HASH);
        assert_eq!(genesis.header.proposer, GENESIS_PROPOSER);
        assert!(genesis.transactions.is_empty());
        assert_eq!(ledger.total_supply(), ledger.params.initial_supply);
    }

    let _ = node.shutdown_tx.send(true);
}

/// Scenario: wallet-signed transfer round-trip. A is credited 100 by a
/// produced block's Reward, sends 10 with fee 1; after one more block
/// A = 89, B = 10, A.sequence = 1.
#[test]
fn wallet_transfer_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let a = aurum_wallet::create_wallet(dir.path(), "a", "pw-a").unwrap();
    let b = aurum_wallet::create_wallet(dir.path(), "b", "pw-b").unwrap();
    let c = aurum_wallet::create_wallet(dir.path(), "c", "pw-c").unwrap();

    let mut params = ChainParams::new("aurum-transfer-test");
    params.block_reward = 100;
    let mut ledger = Ledger::new(params);

    // Block 1, produced by A: the Reward credits A with 100
    let key_a = aurum_wallet::load_wallet(dir.path(), &a.address, "pw-a").unwrap();
    let ts1 = ledger.params.genesis_timestamp + ledger.params.block_time_ms;
    let block1 = ledger
        .assemble_block(&a.address, &key_a.secret_key, ts1)
        .unwrap();
    assert!(ledger.append_block(block1, ts1).unwrap().is_new());
    assert_eq!(ledger.account(&a.address).unwrap().balance, 100);

    // A signs a transfer with the ledger-supplied sequence
    let sequence = ledger.sequence_of(&a.address);
    let tx = aurum_wallet::create_transaction(
        dir.path(),
        &a.address,
        &b.address,
        10,
        1,
        "pw-a",
        TxKind::Transfer,
        sequence,
    )
    .unwrap();
    ledger.insert_transaction(tx, ts1).unwrap();

    // Block 2, produced by C, confirms the transfer
    let key_c = aurum_wallet::load_wallet(dir.path(), &c.address, "pw-c").unwrap();
    let ts2 = ts1 + ledger.params.block_time_ms;
    let block2 = ledger
        .assemble_block(&c.address, &key_c.secret_key, ts2)
        .unwrap();
    assert!(ledger.append_block(block2, ts2).unwrap().is_new());

    assert_eq!(ledger.account(&a.address).unwrap().balance, 89);
    assert_eq!(ledger.account(&b.address).unwrap().balance, 10);
    assert_eq!(ledger.account(&a.address).unwrap().sequence, 1);
    // the fee was burned, not granted to anyone
    assert_eq!(ledger.fees_burned, 1);
    assert!(ledger.pool.is_empty());
}

/// Scenario: two wallets stake MinStake each; 1000 elections with per-draw
/// deterministic seeds split ~evenly (±10% of 500).
#[test]
fn stake_and_elect() {
    let mut params = ChainParams::new("aurum-stake-test");
    params.block_reward = 2_000;
    let min_stake = params.min_stake;
    let mut ledger = Ledger::new(params);

    let v1 = aurum_crypto::generate_keypair();
    let v2 = aurum_crypto::generate_keypair();

    let mut ts = ledger.params.genesis_timestamp;
    for keys in [&v1, &v2] {
        // Fund with a produced block, then stake exactly MinStake
        ts += ledger.params.block_time_ms;
        let block = ledger
            .assemble_block(&keys.address(), &keys.secret_key, ts)
            .unwrap();
        ledger.append_block(block, ts).unwrap();

        let mut stake = aurum_core::Transaction::new(
            TxKind::Stake,
            &keys.address(),
            &keys.address(),
            min_stake,
            1,
            ts,
            None,
            ledger.sequence_of(&keys.address()),
        );
        let sig = aurum_crypto::sign_message(&stake.signing_bytes(), &keys.secret_key).unwrap();
        stake.signature = hex::encode(sig);
        ledger.insert_transaction(stake, ts).unwrap();

        ts += ledger.params.block_time_ms;
        let block = ledger
            .assemble_block(&keys.address(), &keys.secret_key, ts)
            .unwrap();
        ledger.append_block(block, ts).unwrap();
    }

    let val1 = ledger.validator(&v1.address()).expect("v1 registered");
    let val2 = ledger.validator(&v2.address()).expect("v2 registered");
    assert!(val1.active && val2.active);
    assert_eq!(val1.stake, min_stake);
    assert_eq!(val2.stake, min_stake);

    let mut wins = std::collections::BTreeMap::new();
    for i in 0..1_000u32 {
        let seed = format!("draw-{}", i);
        let winner = aurum_core::elect_proposer(&ledger.validators, &seed).expect("winner");
        *wins.entry(winner).or_insert(0u32) += 1;
    }
    for (address, count) in &wins {
        assert!(
            (450..=550).contains(count),
            "{} won {}/1000, expected 500 ± 10%",
            address,
            count
        );
    }
}

/// Scenario: crash after height 3. The snapshot knows height 2; block 3
/// exists only in the kv store. Restart recovers to height 3 with matching
/// account state.
#[tokio::test]
async fn crash_recovery_from_snapshot_and_kv_tail() {
    let dir = tempfile::tempdir().unwrap();
    let producer = aurum_crypto::generate_keypair();

    let pre_crash_accounts;
    {
        let store = ChainStore::open(dir.path()).unwrap();
        let mut params = ChainParams::new("aurum-recovery-test");
        params.block_reward = 100;
        let mut ledger = Ledger::new(params);

        let mut ts = ledger.params.genesis_timestamp;
        for height in 1..=3u64 {
            ts += ledger.params.block_time_ms;
            let block = ledger
                .assemble_block(&producer.address(), &producer.secret_key, ts)
                .unwrap();
            ledger.append_block(block, ts).unwrap();
            // every block reaches the kv store
            store
                .put_block(ledger.block_by_height(height).unwrap())
                .unwrap();
            // ... but the "crash" happens before the height-3 snapshot
            if height == 2 {
                store.save_snapshot(&ledger).unwrap();
            }
        }
        pre_crash_accounts = ledger.accounts.clone();
        store.flush().unwrap();
        // store dropped = crash
    }

    let node = Node::start(test_config("aurum-recovery-test"), dir.path())
        .await
        .expect("node recovers");
    {
        let ledger = node.ledger.read().unwrap();
        assert_eq!(ledger.height(), 3, "kv tail re-verified on top of snapshot");
        assert_eq!(ledger.accounts, pre_crash_accounts);
        assert_eq!(ledger.account(&producer.address()).unwrap().balance, 300);
    }
    let _ = node.shutdown_tx.send(true);
}
