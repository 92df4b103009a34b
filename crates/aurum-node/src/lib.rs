// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - NODE LIBRARY
//
// Everything the aurum-node binary is built from: configuration, the sled
// chain store + snapshots, read-only query projections, the REST surface,
// and the orchestrator that wires gossip to the ledger.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

pub mod api;
pub mod config;
pub mod node;
pub mod query;
pub mod store;
