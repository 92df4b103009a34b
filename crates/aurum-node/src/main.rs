// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - NODE BINARY
//
// CLI front-end: `start` runs the full node; `wallet:*` manage the local
// keystore. Exit codes: 0 success, 1 start-up failure, 2 invalid arguments
// (clap's default).
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_node::config::NodeConfig;
use aurum_node::node::Node;
use clap::{Args, Parser, Subcommand};
use colored::Colorize;
use std::path::PathBuf;

const DEFAULT_DATA_DIR: &str = "aurum-data";

#[derive(Parser)]
#[command(name = "aurum-node")]
#[command(about = "Aurum Proof-of-Stake full node", long_about = None)]
#[command(version)]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the full node
    Start(StartArgs),

    /// Create a new encrypted wallet
    #[command(name = "wallet:create")]
    WalletCreate(WalletCreateArgs),

    /// Import a private key into a new encrypted wallet
    #[command(name = "wallet:import")]
    WalletImport(WalletImportArgs),

    /// List wallets in the keystore
    #[command(name = "wallet:list")]
    WalletList(WalletListArgs),
}

#[derive(Args)]
struct StartArgs {
    /// Gossip listen port
    #[arg(long = "p2p-port")]
    p2p_port: Option<u16>,

    /// Reserved JSON-RPC port
    #[arg(long = "rpc-port")]
    rpc_port: Option<u16>,

    /// REST query surface port
    #[arg(long = "api-port")]
    api_port: Option<u16>,

    /// State directory (config, snapshot, kv store, wallets)
    #[arg(long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,

    /// Network identifier; peers on other networks are refused
    #[arg(long)]
    network: Option<String>,

    /// Log filter (error, warn, info, debug, trace)
    #[arg(long = "log-level", default_value = "info")]
    log_level: String,

    /// Disable the REST query surface
    #[arg(long = "no-api")]
    no_api: bool,

    /// Disable peer discovery (bootstrap-only connections)
    #[arg(long = "no-discovery")]
    no_discovery: bool,

    /// Connection cap
    #[arg(long = "max-peers")]
    max_peers: Option<usize>,

    /// Comma-separated bootstrap endpoints, "ip:port"
    #[arg(long, value_delimiter = ',')]
    bootstrap: Vec<String>,

    /// Wallet address to produce blocks with (password from
    /// AURUM_VALIDATOR_PASSWORD)
    #[arg(long)]
    validator: Option<String>,
}

#[derive(Args)]
struct WalletCreateArgs {
    /// Wallet name
    #[arg(long)]
    name: String,

    /// Encryption password (prompted when omitted)
    #[arg(long)]
    password: Option<String>,

    #[arg(long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
}

#[derive(Args)]
struct WalletImportArgs {
    /// Hex-encoded private key
    #[arg(long = "private-key")]
    private_key: String,

    /// Wallet name
    #[arg(long)]
    name: String,

    /// Encryption password (prompted when omitted)
    #[arg(long)]
    password: Option<String>,

    #[arg(long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
}

#[derive(Args)]
struct WalletListArgs {
    #[arg(long = "data-dir", default_value = DEFAULT_DATA_DIR)]
    data_dir: PathBuf,
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    let result = match cli.command {
        Commands::Start(args) => run_start(args).await,
        Commands::WalletCreate(args) => wallet_create(args),
        Commands::WalletImport(args) => wallet_import(args),
        Commands::WalletList(args) => wallet_list(args),
    };

    if let Err(message) = result {
        eprintln!("{} {}", "error:".red().bold(), message);
        std::process::exit(1);
    }
}

fn init_logging(level: &str) {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();
}

async fn run_start(args: StartArgs) -> Result<(), String> {
    init_logging(&args.log_level);

    // config.json is the base; flags override and the merge is saved back
    let mut cfg = NodeConfig::load_or_default(&args.data_dir);
    if let Some(port) = args.p2p_port {
        cfg.p2p_port = port;
    }
    if let Some(port) = args.rpc_port {
        cfg.rpc_port = port;
    }
    if let Some(port) = args.api_port {
        cfg.api_port = port;
    }
    if let Some(network) = args.network {
        cfg.network = network;
    }
    if let Some(max_peers) = args.max_peers {
        cfg.max_peers = max_peers;
    }
    if !args.bootstrap.is_empty() {
        cfg.bootstrap = args.bootstrap;
    }
    if args.validator.is_some() {
        cfg.validator_address = args.validator;
    }
    if args.no_api {
        cfg.enable_api = false;
    }
    if args.no_discovery {
        cfg.enable_discovery = false;
    }
    cfg.save(&args.data_dir)?;

    log::info!(
        "starting aurum-node on network {:?} (p2p {}, api {})",
        cfg.network,
        cfg.p2p_port,
        cfg.api_port
    );

    let node = Node::start(cfg, &args.data_dir).await?;

    let shutdown = node.shutdown_tx.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::info!("interrupt received");
            let _ = shutdown.send(true);
        }
    });

    node.run().await;
    Ok(())
}

fn resolve_password(given: Option<String>) -> Result<String, String> {
    match given {
        Some(password) => Ok(password),
        None => rpassword::prompt_password("Password: ").map_err(|e| e.to_string()),
    }
}

fn wallet_create(args: WalletCreateArgs) -> Result<(), String> {
    let password = resolve_password(args.password)?;
    let summary = aurum_wallet::create_wallet(&args.data_dir, &args.name, &password)
        .map_err(|e| e.to_string())?;

    println!("{} {}", "Created wallet".green().bold(), summary.name);
    println!("  address: {}", summary.address.cyan());
    println!(
        "  keystore: {}",
        args.data_dir
            .join(aurum_wallet::WALLET_DIR)
            .join(format!("{}.json", summary.address))
            .display()
    );
    Ok(())
}

fn wallet_import(args: WalletImportArgs) -> Result<(), String> {
    let password = resolve_password(args.password)?;
    let summary =
        aurum_wallet::import_wallet(&args.data_dir, &args.private_key, &args.name, &password)
            .map_err(|e| e.to_string())?;

    println!("{} {}", "Imported wallet".green().bold(), summary.name);
    println!("  address: {}", summary.address.cyan());
    Ok(())
}

fn wallet_list(args: WalletListArgs) -> Result<(), String> {
    let wallets = aurum_wallet::list_wallets(&args.data_dir).map_err(|e| e.to_string())?;
    if wallets.is_empty() {
        println!("no wallets in {}", args.data_dir.display());
        return Ok(());
    }

    println!("{}", format!("{} wallet(s):", wallets.len()).bold());
    for wallet in wallets {
        println!("  {}  {}", wallet.address.cyan(), wallet.name);
    }
    Ok(())
}
