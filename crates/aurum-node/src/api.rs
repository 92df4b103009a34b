// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - REST SURFACE
//
// Thin warp layer over the query projections plus transaction submission.
// Read handlers take a short read lock; writes go through the orchestrator's
// submission channel (the ledger has exactly one writer).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use crate::query;
use aurum_core::{Ledger, Transaction};
use aurum_network::PeerManager;
use serde::Deserialize;
use std::net::Ipv4Addr;
use std::sync::{Arc, RwLock};
use tokio::sync::{mpsc, watch};
use warp::Filter;

/// JSON reply with an HTTP status derived from the body: an `error` key
/// means 400 unless the error object carries its own `code`-derived status.
fn api_json(body: serde_json::Value) -> warp::reply::WithStatus<warp::reply::Json> {
    let status = if body.get("error").is_some() {
        warp::http::StatusCode::BAD_REQUEST
    } else {
        warp::http::StatusCode::OK
    };
    warp::reply::with_status(warp::reply::json(&body), status)
}

fn not_found(what: &str) -> warp::reply::WithStatus<warp::reply::Json> {
    warp::reply::with_status(
        warp::reply::json(&serde_json::json!({
            "error": { "code": "NotFound", "message": format!("{} not found", what) }
        })),
        warp::http::StatusCode::NOT_FOUND,
    )
}

fn error_body(code: &str, message: &str) -> serde_json::Value {
    serde_json::json!({ "error": { "code": code, "message": message } })
}

#[derive(Debug, Deserialize)]
struct LatestQuery {
    count: Option<usize>,
}

type SharedLedger = Arc<RwLock<Ledger>>;

fn with_ledger(
    ledger: SharedLedger,
) -> impl Filter<Extract = (SharedLedger,), Error = std::convert::Infallible> + Clone {
    warp::any().map(move || ledger.clone())
}

/// Read the ledger, recovering from a poisoned lock.
fn read(ledger: &SharedLedger) -> std::sync::RwLockReadGuard<'_, Ledger> {
    match ledger.read() {
        Ok(guard) => guard,
        Err(poisoned) => poisoned.into_inner(),
    }
}

pub fn routes(
    ledger: SharedLedger,
    manager: Arc<PeerManager>,
    submit: mpsc::Sender<Transaction>,
) -> impl Filter<Extract = (impl warp::Reply,), Error = warp::Rejection> + Clone {
    let node_id = manager.node_id().to_string();

    let status = warp::path!("status")
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map({
            let manager = manager.clone();
            let node_id = node_id.clone();
            move |ledger: SharedLedger| {
                let view = query::node_status(&read(&ledger), &node_id, manager.peer_count());
                api_json(serde_json::json!(view))
            }
        });

    let chain = warp::path!("chain")
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|ledger: SharedLedger| api_json(serde_json::json!(query::chain_info(&read(&ledger)))));

    let latest = warp::path!("blocks" / "latest")
        .and(warp::get())
        .and(warp::query::<LatestQuery>())
        .and(with_ledger(ledger.clone()))
        .map(|params: LatestQuery, ledger: SharedLedger| {
            let count = params.count.unwrap_or(10).min(100);
            api_json(serde_json::json!({
                "blocks": query::latest_blocks(&read(&ledger), count)
            }))
        });

    let by_height = warp::path!("blocks" / "height" / u64)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|height: u64, ledger: SharedLedger| {
            match query::block_by_height(&read(&ledger), height) {
                Some(block) => api_json(serde_json::json!(block)),
                None => not_found("block"),
            }
        });

    let by_hash = warp::path!("blocks" / "hash" / String)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|hash: String, ledger: SharedLedger| {
            match query::block_by_hash(&read(&ledger), &hash) {
                Some(block) => api_json(serde_json::json!(block)),
                None => not_found("block"),
            }
        });

    let tx_by_id = warp::path!("transactions" / String)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|id: String, ledger: SharedLedger| {
            match query::transaction_by_id(&read(&ledger), &id) {
                Some(view) => api_json(serde_json::json!(view)),
                None => not_found("transaction"),
            }
        });

    let address = warp::path!("address" / String)
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|addr: String, ledger: SharedLedger| {
            api_json(serde_json::json!(query::address_view(&read(&ledger), &addr)))
        });

    let pool = warp::path!("pool")
        .and(warp::get())
        .and(with_ledger(ledger.clone()))
        .map(|ledger: SharedLedger| {
            let guard = read(&ledger);
            api_json(serde_json::json!({
                "size": guard.pool.len(),
                "total_received": guard.pool.total_received,
                "total_accepted": guard.pool.total_accepted,
                "total_rejected": guard.pool.total_rejected,
                "total_expired": guard.pool.total_expired,
                "transactions": guard.pool.ordered(),
            }))
        });

    let submit_tx = warp::path!("transactions")
        .and(warp::post())
        .and(warp::body::content_length_limit(1024 * 64))
        .and(warp::body::json())
        .and(with_ledger(ledger))
        .and_then(move |tx: Transaction, ledger: SharedLedger| {
            let submit = submit.clone();
            async move {
                // Pre-validate for a useful error payload; the orchestrator
                // revalidates on insert (it is the only writer)
                let verdict = {
                    let guard = read(&ledger);
                    if guard.pool.contains(&tx.id) {
                        Err(error_body("DuplicateTransaction", &tx.id))
                    } else {
                        guard
                            .validate_transaction(&tx)
                            .map(|_| ())
                            .map_err(|e| error_body(e.kind(), &e.to_string()))
                    }
                };
                let reply = match verdict {
                    Ok(()) => {
                        let id = tx.id.clone();
                        match submit.send(tx).await {
                            Ok(()) => api_json(serde_json::json!({
                                "status": "accepted",
                                "id": id,
                            })),
                            Err(_) => api_json(error_body("StorageFailure", "node is shutting down")),
                        }
                    }
                    Err(body) => api_json(body),
                };
                Ok::<_, warp::Rejection>(reply)
            }
        });

    status
        .or(chain)
        .or(latest)
        .or(by_height)
        .or(by_hash)
        .or(tx_by_id)
        .or(address)
        .or(pool)
        .or(submit_tx)
}

/// Serve the REST surface until shutdown is signalled.
pub async fn serve(
    port: u16,
    ledger: SharedLedger,
    manager: Arc<PeerManager>,
    submit: mpsc::Sender<Transaction>,
    mut shutdown: watch::Receiver<bool>,
) {
    let filter = routes(ledger, manager, submit);
    let (addr, server) = warp::serve(filter).bind_with_graceful_shutdown(
        (Ipv4Addr::UNSPECIFIED, port),
        async move {
            let _ = shutdown.changed().await;
        },
    );
    log::info!("api listening on http://{}", addr);
    server.await;
}
