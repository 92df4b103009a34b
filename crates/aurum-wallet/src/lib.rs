// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - KEYSTORE & WALLET
//
// Encrypted on-disk key records (one file per address) and the
// transaction-signing pipeline. The keystore directory is only ever
// mutated through these operations; an existing file for an address is a
// collision, not something to overwrite.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aurum_core::{Transaction, TxKind};
use aurum_crypto::{CryptoError, EncryptedKey, KeyPair};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use zeroize::Zeroize;

/// Subdirectory of the data dir holding one JSON record per address
pub const WALLET_DIR: &str = "wallets";

#[derive(Debug)]
pub enum WalletError {
    /// Wrong password or no such wallet. One message for both cases so a
    /// caller probing addresses learns nothing.
    InvalidCredential,
    CorruptKeystore(String),
    AddressCollision(String),
    Io(String),
    Crypto(CryptoError),
}

impl std::fmt::Display for WalletError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            WalletError::InvalidCredential => {
                write!(f, "InvalidCredential: cannot unlock wallet")
            }
            WalletError::CorruptKeystore(msg) => write!(f, "CorruptKeystore: {}", msg),
            WalletError::AddressCollision(addr) => {
                write!(f, "AddressCollision: keystore file already exists for {}", addr)
            }
            WalletError::Io(msg) => write!(f, "StorageFailure: {}", msg),
            WalletError::Crypto(err) => write!(f, "{}", err),
        }
    }
}

impl std::error::Error for WalletError {}

impl From<CryptoError> for WalletError {
    fn from(err: CryptoError) -> Self {
        match err {
            CryptoError::InvalidCredential => WalletError::InvalidCredential,
            CryptoError::CorruptKeystore(msg) => WalletError::CorruptKeystore(msg),
            other => WalletError::Crypto(other),
        }
    }
}

/// On-disk keystore record: `wallets/<address>.json`.
/// The secret key exists only inside `crypto.ciphertext`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeystoreFile {
    pub address: String,
    /// Compressed public key, hex
    pub public_key: String,
    pub name: String,
    pub crypto: EncryptedKey,
    /// Millis since Unix epoch
    pub created_at: u64,
}

/// Listing entry: everything except key material.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WalletSummary {
    pub address: String,
    pub name: String,
    pub created_at: u64,
}

fn wallet_dir(data_dir: &Path) -> PathBuf {
    data_dir.join(WALLET_DIR)
}

fn wallet_path(data_dir: &Path, address: &str) -> PathBuf {
    wallet_dir(data_dir).join(format!("{}.json", address))
}

fn now_ms() -> u64 {
    std::time::SystemTime::now()
        .duration_since(std::time::UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn write_keystore(data_dir: &Path, record: &KeystoreFile) -> Result<(), WalletError> {
    let dir = wallet_dir(data_dir);
    std::fs::create_dir_all(&dir).map_err(|e| WalletError::Io(e.to_string()))?;

    let path = wallet_path(data_dir, &record.address);
    if path.exists() {
        return Err(WalletError::AddressCollision(record.address.clone()));
    }

    let json = serde_json::to_string_pretty(record)
        .map_err(|e| WalletError::Io(e.to_string()))?;
    std::fs::write(&path, json).map_err(|e| WalletError::Io(e.to_string()))?;
    Ok(())
}

/// Generate a keypair, encrypt the secret key under `password`, and write
/// the keystore file. Returns the new wallet's summary.
pub fn create_wallet(
    data_dir: &Path,
    name: &str,
    password: &str,
) -> Result<WalletSummary, WalletError> {
    let keypair = aurum_crypto::generate_keypair();
    store_keypair(data_dir, &keypair, name, password)
}

/// Import an existing hex-encoded private key under a new keystore file.
pub fn import_wallet(
    data_dir: &Path,
    private_key_hex: &str,
    name: &str,
    password: &str,
) -> Result<WalletSummary, WalletError> {
    let mut secret = hex::decode(private_key_hex)
        .map_err(|_| WalletError::CorruptKeystore("private key is not valid hex".to_string()))?;
    let keypair = aurum_crypto::keypair_from_secret(&secret).map_err(WalletError::from)?;
    secret.zeroize();
    store_keypair(data_dir, &keypair, name, password)
}

fn store_keypair(
    data_dir: &Path,
    keypair: &KeyPair,
    name: &str,
    password: &str,
) -> Result<WalletSummary, WalletError> {
    let crypto = aurum_crypto::encrypt_secret_key(&keypair.secret_key, password)?;
    let record = KeystoreFile {
        address: keypair.address(),
        public_key: hex::encode(&keypair.public_key),
        name: name.to_string(),
        crypto,
        created_at: now_ms(),
    };
    write_keystore(data_dir, &record)?;
    Ok(WalletSummary {
        address: record.address,
        name: record.name,
        created_at: record.created_at,
    })
}

/// Load and decrypt a wallet. A missing file and a wrong password both
/// surface as `InvalidCredential`.
pub fn load_wallet(
    data_dir: &Path,
    address: &str,
    password: &str,
) -> Result<KeyPair, WalletError> {
    let path = wallet_path(data_dir, address);
    let raw = std::fs::read_to_string(&path).map_err(|_| WalletError::InvalidCredential)?;
    let record: KeystoreFile = serde_json::from_str(&raw)
        .map_err(|e| WalletError::CorruptKeystore(e.to_string()))?;

    let mut secret = aurum_crypto::decrypt_secret_key(&record.crypto, password)?;
    let keypair = aurum_crypto::keypair_from_secret(&secret).map_err(WalletError::from)?;
    secret.zeroize();

    // The stored public key must match the decrypted secret; a mismatch
    // means the file was tampered with or corrupted
    if hex::encode(&keypair.public_key) != record.public_key {
        return Err(WalletError::CorruptKeystore(
            "public key does not match decrypted secret".to_string(),
        ));
    }
    Ok(keypair)
}

/// All wallet summaries under the data dir, sorted by name.
pub fn list_wallets(data_dir: &Path) -> Result<Vec<WalletSummary>, WalletError> {
    let dir = wallet_dir(data_dir);
    if !dir.exists() {
        return Ok(Vec::new());
    }

    let mut out = Vec::new();
    let entries = std::fs::read_dir(&dir).map_err(|e| WalletError::Io(e.to_string()))?;
    for entry in entries {
        let entry = entry.map_err(|e| WalletError::Io(e.to_string()))?;
        if entry.path().extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let raw = std::fs::read_to_string(entry.path())
            .map_err(|e| WalletError::Io(e.to_string()))?;
        match serde_json::from_str::<KeystoreFile>(&raw) {
            Ok(record) => out.push(WalletSummary {
                address: record.address,
                name: record.name,
                created_at: record.created_at,
            }),
            Err(_) => continue, // unreadable records are skipped, not fatal
        }
    }
    out.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(out)
}

/// Build and sign a transaction from an unlocked keypair.
///
/// `sequence` must be the sender's current ledger sequence at signing time;
/// anything else is rejected by every node's pool.
pub fn build_transaction(
    keypair: &KeyPair,
    kind: TxKind,
    recipient: &str,
    amount: u64,
    fee: u64,
    sequence: u64,
) -> Result<Transaction, WalletError> {
    let mut tx = Transaction::new(
        kind,
        &keypair.address(),
        recipient,
        amount,
        fee,
        now_ms(),
        None,
        sequence,
    );
    let sig = aurum_crypto::sign_message(&tx.signing_bytes(), &keypair.secret_key)
        .map_err(WalletError::from)?;
    tx.signature = hex::encode(sig);
    Ok(tx)
}

/// Load a wallet and sign a transaction in one step (the CLI path).
#[allow(clippy::too_many_arguments)]
pub fn create_transaction(
    data_dir: &Path,
    from: &str,
    to: &str,
    amount: u64,
    fee: u64,
    password: &str,
    kind: TxKind,
    sequence: u64,
) -> Result<Transaction, WalletError> {
    let keypair = load_wallet(data_dir, from, password)?;
    build_transaction(&keypair, kind, to, amount, fee, sequence)
}
