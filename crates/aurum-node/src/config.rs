// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - NODE CONFIGURATION
//
// config.json under the data dir. Written on first start, reloaded on later
// starts; CLI flags override file values and the merged result is saved
// back, so a flag used once sticks.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use serde::{Deserialize, Serialize};
use std::path::Path;

pub const CONFIG_FILE: &str = "config.json";

pub const DEFAULT_P2P_PORT: u16 = 7800;
pub const DEFAULT_RPC_PORT: u16 = 7801;
pub const DEFAULT_API_PORT: u16 = 7802;
pub const DEFAULT_MAX_PEERS: usize = 25;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NodeConfig {
    /// Network identifier; handshakes with a different one are refused
    pub network: String,
    pub p2p_port: u16,
    /// Reserved for the JSON-RPC surface; carried in config, nothing binds
    /// it yet
    pub rpc_port: u16,
    pub api_port: u16,
    pub max_peers: usize,
    /// Bootstrap endpoints, "ip:port"
    pub bootstrap: Vec<String>,
    pub enable_api: bool,
    pub enable_discovery: bool,
    /// Wallet address used by the validator loop. The wallet password is
    /// taken from AURUM_VALIDATOR_PASSWORD, never from this file.
    pub validator_address: Option<String>,
    /// Stable gossip identity, generated on first start
    pub node_id: String,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            network: "aurum-main".to_string(),
            p2p_port: DEFAULT_P2P_PORT,
            rpc_port: DEFAULT_RPC_PORT,
            api_port: DEFAULT_API_PORT,
            max_peers: DEFAULT_MAX_PEERS,
            bootstrap: Vec::new(),
            enable_api: true,
            enable_discovery: true,
            validator_address: None,
            node_id: generate_node_id(),
        }
    }
}

fn generate_node_id() -> String {
    use rand::RngCore;
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    format!("aurum-{}", hex::encode(bytes))
}

impl NodeConfig {
    /// Load config.json from the data dir, or start from defaults.
    pub fn load_or_default(data_dir: &Path) -> Self {
        let path = data_dir.join(CONFIG_FILE);
        match std::fs::read_to_string(&path) {
            Ok(raw) => match serde_json::from_str(&raw) {
                Ok(cfg) => cfg,
                Err(e) => {
                    log::warn!("unreadable {}: {}; using defaults", path.display(), e);
                    Self::default()
                }
            },
            Err(_) => Self::default(),
        }
    }

    pub fn save(&self, data_dir: &Path) -> Result<(), String> {
        std::fs::create_dir_all(data_dir).map_err(|e| e.to_string())?;
        let path = data_dir.join(CONFIG_FILE);
        let json = serde_json::to_string_pretty(self).map_err(|e| e.to_string())?;
        std::fs::write(&path, json).map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults_when_missing() {
        let dir = tempfile::tempdir().unwrap();
        let cfg = NodeConfig::load_or_default(dir.path());
        assert_eq!(cfg.p2p_port, DEFAULT_P2P_PORT);
        assert!(cfg.enable_api);
        assert!(cfg.node_id.starts_with("aurum-"));
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let mut cfg = NodeConfig::default();
        cfg.network = "aurum-test".to_string();
        cfg.p2p_port = 9999;
        cfg.save(dir.path()).unwrap();

        let reloaded = NodeConfig::load_or_default(dir.path());
        assert_eq!(reloaded.network, "aurum-test");
        assert_eq!(reloaded.p2p_port, 9999);
        assert_eq!(reloaded.node_id, cfg.node_id);
    }
}
