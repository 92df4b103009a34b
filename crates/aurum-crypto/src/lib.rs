// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - CRYPTOGRAPHY MODULE
//
// Elliptic-curve cryptography over secp256k1.
// - Key generation (rejection-sampled private keys)
// - Recoverable ECDSA signing and verification (SHA-256 prehash)
// - Aurum address derivation (aur1 + RIPEMD-160 of SHA-256 of pubkey)
// - Private key encryption: scrypt KDF + AES-256-CTR + SHA-256 MAC
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

use aes::Aes256;
use ctr::cipher::{KeyIvInit, StreamCipher};
use ctr::Ctr128BE;
use rand::RngCore;
use ripemd::Ripemd160;
use secp256k1::ecdsa::{RecoverableSignature, RecoveryId};
use secp256k1::{Message, PublicKey, Secp256k1, SecretKey};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use zeroize::Zeroize;

/// Address prefix for all Aurum accounts
pub const ADDRESS_PREFIX: &str = "aur1";

/// Total address length: 4 prefix chars + 40 hex chars (RIPEMD-160 digest)
pub const ADDRESS_LEN: usize = 44;

/// Recoverable signature length: 64-byte compact signature + 1 recovery byte
pub const SIGNATURE_LEN: usize = 65;

/// Compressed secp256k1 public key length
pub const PUBLIC_KEY_LEN: usize = 33;

/// scrypt cost parameter N = 2^14 = 16384
pub const SCRYPT_LOG_N: u8 = 14;
/// scrypt block size
pub const SCRYPT_R: u32 = 8;
/// scrypt parallelism
pub const SCRYPT_P: u32 = 1;
/// Derived key length (32 bytes = AES-256 key)
pub const SCRYPT_DKLEN: usize = 32;

type Aes256Ctr = Ctr128BE<Aes256>;

#[derive(Debug)]
pub enum CryptoError {
    InvalidKey,
    InvalidSignature,
    VerificationFailed,
    InvalidCredential,
    CorruptKeystore(String),
}

impl std::fmt::Display for CryptoError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            CryptoError::InvalidKey => write!(f, "Invalid key format"),
            CryptoError::InvalidSignature => write!(f, "Invalid signature format"),
            CryptoError::VerificationFailed => write!(f, "Signature verification failed"),
            CryptoError::InvalidCredential => write!(f, "InvalidCredential: cannot decrypt key"),
            CryptoError::CorruptKeystore(msg) => write!(f, "CorruptKeystore: {}", msg),
        }
    }
}

impl std::error::Error for CryptoError {}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct KeyPair {
    /// Compressed secp256k1 public key (33 bytes)
    pub public_key: Vec<u8>,
    pub secret_key: Vec<u8>,
}

/// SECURITY: Zeroize secret key from memory on drop to prevent
/// recovery via memory dump, swap file, or core dump.
impl Drop for KeyPair {
    fn drop(&mut self) {
        self.secret_key.zeroize();
    }
}

impl KeyPair {
    /// Aurum address of this keypair's public key.
    pub fn address(&self) -> String {
        public_key_to_address(&self.public_key)
    }
}

/// Generate a new secp256k1 keypair.
///
/// The private key is 32 uniformly random bytes, rejection-sampled until it
/// parses as a valid scalar (nonzero and below the curve order). The public
/// key is the compressed 33-byte encoding of priv·G.
pub fn generate_keypair() -> KeyPair {
    let secp = Secp256k1::new();
    let mut rng = rand::thread_rng();
    let mut candidate = [0u8; 32];

    let sk = loop {
        rng.fill_bytes(&mut candidate);
        // from_slice rejects zero and values >= the curve order
        if let Ok(sk) = SecretKey::from_slice(&candidate) {
            break sk;
        }
    };
    candidate.zeroize();

    let pk = PublicKey::from_secret_key(&secp, &sk);
    KeyPair {
        public_key: pk.serialize().to_vec(),
        secret_key: sk.secret_bytes().to_vec(),
    }
}

/// Reconstruct a keypair from raw 32-byte secret key material.
pub fn keypair_from_secret(secret_bytes: &[u8]) -> Result<KeyPair, CryptoError> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_bytes).map_err(|_| CryptoError::InvalidKey)?;
    let pk = PublicKey::from_secret_key(&secp, &sk);
    Ok(KeyPair {
        public_key: pk.serialize().to_vec(),
        secret_key: sk.secret_bytes().to_vec(),
    })
}

/// Sign a message with a secret key.
///
/// The message is hashed with SHA-256 before ECDSA signing. Returns 65 bytes:
/// the 64-byte compact signature followed by the recovery id byte, so that
/// verifiers can reconstruct the public key from the signature alone.
pub fn sign_message(message: &[u8], secret_key_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let secp = Secp256k1::new();
    let sk = SecretKey::from_slice(secret_key_bytes).map_err(|_| CryptoError::InvalidKey)?;

    let digest: [u8; 32] = Sha256::digest(message).into();
    let msg = Message::from_digest(digest);

    let sig = secp.sign_ecdsa_recoverable(&msg, &sk);
    let (recovery_id, compact) = sig.serialize_compact();

    let mut out = Vec::with_capacity(SIGNATURE_LEN);
    out.extend_from_slice(&compact);
    out.push(recovery_id.to_i32() as u8);
    Ok(out)
}

/// Verify a 65-byte signature against a compressed public key.
///
/// The trailing recovery byte is ignored for verification. Library errors
/// (malformed key or signature) are treated as verification failure.
pub fn verify_signature(message: &[u8], signature_bytes: &[u8], public_key_bytes: &[u8]) -> bool {
    if signature_bytes.len() != SIGNATURE_LEN {
        return false;
    }
    let secp = Secp256k1::new();

    let pk = match PublicKey::from_slice(public_key_bytes) {
        Ok(k) => k,
        Err(_) => return false,
    };
    let sig = match secp256k1::ecdsa::Signature::from_compact(&signature_bytes[..64]) {
        Ok(s) => s,
        Err(_) => return false,
    };

    let digest: [u8; 32] = Sha256::digest(message).into();
    let msg = Message::from_digest(digest);

    secp.verify_ecdsa(&msg, &sig, &pk).is_ok()
}

/// Recover the compressed public key from a 65-byte recoverable signature.
pub fn recover_public_key(message: &[u8], signature_bytes: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if signature_bytes.len() != SIGNATURE_LEN {
        return Err(CryptoError::InvalidSignature);
    }
    let secp = Secp256k1::new();

    let recovery_id = RecoveryId::from_i32(signature_bytes[64] as i32)
        .map_err(|_| CryptoError::InvalidSignature)?;
    let sig = RecoverableSignature::from_compact(&signature_bytes[..64], recovery_id)
        .map_err(|_| CryptoError::InvalidSignature)?;

    let digest: [u8; 32] = Sha256::digest(message).into();
    let msg = Message::from_digest(digest);

    let pk = secp
        .recover_ecdsa(&msg, &sig)
        .map_err(|_| CryptoError::VerificationFailed)?;
    Ok(pk.serialize().to_vec())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// ADDRESS DERIVATION MODULE
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Derive an Aurum address from a compressed public key.
///
/// Format: `"aur1" + hex(ripemd160(sha256(pubkey)))`, 44 characters total.
pub fn public_key_to_address(public_key_bytes: &[u8]) -> String {
    let sha = Sha256::digest(public_key_bytes);
    let ripe = Ripemd160::digest(sha);
    format!("{}{}", ADDRESS_PREFIX, hex::encode(ripe))
}

/// Validate address format: `aur1` prefix + 40 lowercase hex characters.
pub fn validate_address(address: &str) -> bool {
    if address.len() != ADDRESS_LEN || !address.starts_with(ADDRESS_PREFIX) {
        return false;
    }
    address[ADDRESS_PREFIX.len()..]
        .chars()
        .all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase())
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// KEY ENCRYPTION MODULE (scrypt + AES-256-CTR)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// scrypt parameters stored alongside the ciphertext.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct KdfParams {
    pub n: u32,
    pub r: u32,
    pub p: u32,
    pub dklen: u32,
    /// 32-byte random salt, hex-encoded
    pub salt: String,
}

/// Encrypted secret key record as written to keystore files.
///
/// The MAC binds the derived key's second half to the ciphertext so a wrong
/// password is detected before garbage bytes ever reach a key parser
/// (CTR mode itself has no authentication).
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct EncryptedKey {
    pub cipher: String,
    /// Hex-encoded ciphertext
    pub ciphertext: String,
    /// 16-byte random IV, hex-encoded
    pub iv: String,
    pub kdf: String,
    pub kdfparams: KdfParams,
    /// hex(sha256(derived_key[16..32] || ciphertext))
    pub mac: String,
}

const CIPHER_ID: &str = "aes-256-ctr";
const KDF_ID: &str = "scrypt";

fn derive_key(password: &str, salt: &[u8], params: &KdfParams) -> Result<[u8; 32], CryptoError> {
    let log_n = params.n.trailing_zeros() as u8;
    if 1u32.checked_shl(log_n as u32) != Some(params.n) {
        return Err(CryptoError::CorruptKeystore("kdf n is not a power of two".into()));
    }
    let scrypt_params = scrypt::Params::new(log_n, params.r, params.p, params.dklen as usize)
        .map_err(|e| CryptoError::CorruptKeystore(format!("bad kdf params: {}", e)))?;

    let mut dk = [0u8; 32];
    scrypt::scrypt(password.as_bytes(), salt, &scrypt_params, &mut dk)
        .map_err(|e| CryptoError::CorruptKeystore(format!("kdf failure: {}", e)))?;
    Ok(dk)
}

fn compute_mac(derived_key: &[u8; 32], ciphertext: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(&derived_key[16..32]);
    hasher.update(ciphertext);
    hex::encode(hasher.finalize())
}

/// Encrypt a secret key with a password.
///
/// scrypt (N=16384, r=8, p=1, dkLen=32) derives the AES-256 key from the
/// password and a fresh 32-byte salt; the key material is encrypted with
/// AES-256-CTR under a fresh 16-byte IV.
pub fn encrypt_secret_key(secret_key: &[u8], password: &str) -> Result<EncryptedKey, CryptoError> {
    let mut rng = rand::thread_rng();
    let mut salt = [0u8; 32];
    let mut iv = [0u8; 16];
    rng.fill_bytes(&mut salt);
    rng.fill_bytes(&mut iv);

    let kdfparams = KdfParams {
        n: 1 << SCRYPT_LOG_N,
        r: SCRYPT_R,
        p: SCRYPT_P,
        dklen: SCRYPT_DKLEN as u32,
        salt: hex::encode(salt),
    };

    let mut dk = derive_key(password, &salt, &kdfparams)?;

    let mut buf = secret_key.to_vec();
    let mut cipher = Aes256Ctr::new_from_slices(&dk, &iv)
        .map_err(|_| CryptoError::CorruptKeystore("cipher init failed".into()))?;
    cipher.apply_keystream(&mut buf);

    let mac = compute_mac(&dk, &buf);
    dk.zeroize();

    Ok(EncryptedKey {
        cipher: CIPHER_ID.to_string(),
        ciphertext: hex::encode(&buf),
        iv: hex::encode(iv),
        kdf: KDF_ID.to_string(),
        kdfparams,
        mac,
    })
}

/// Decrypt a secret key with a password.
///
/// A wrong password fails the MAC check and surfaces as `InvalidCredential`;
/// structural problems with the record surface as `CorruptKeystore`.
/// The caller must zeroize the returned bytes after use.
pub fn decrypt_secret_key(encrypted: &EncryptedKey, password: &str) -> Result<Vec<u8>, CryptoError> {
    if encrypted.cipher != CIPHER_ID {
        return Err(CryptoError::CorruptKeystore(format!(
            "unsupported cipher: {}",
            encrypted.cipher
        )));
    }
    if encrypted.kdf != KDF_ID {
        return Err(CryptoError::CorruptKeystore(format!(
            "unsupported kdf: {}",
            encrypted.kdf
        )));
    }

    let salt = hex::decode(&encrypted.kdfparams.salt)
        .map_err(|_| CryptoError::CorruptKeystore("salt is not valid hex".into()))?;
    let iv = hex::decode(&encrypted.iv)
        .map_err(|_| CryptoError::CorruptKeystore("iv is not valid hex".into()))?;
    if iv.len() != 16 {
        return Err(CryptoError::CorruptKeystore("iv must be 16 bytes".into()));
    }
    let mut buf = hex::decode(&encrypted.ciphertext)
        .map_err(|_| CryptoError::CorruptKeystore("ciphertext is not valid hex".into()))?;

    let mut dk = derive_key(password, &salt, &encrypted.kdfparams)?;

    // MAC check BEFORE decryption; wrong password must not yield garbage keys
    if compute_mac(&dk, &buf) != encrypted.mac {
        dk.zeroize();
        return Err(CryptoError::InvalidCredential);
    }

    let mut cipher = Aes256Ctr::new_from_slices(&dk, &iv)
        .map_err(|_| CryptoError::CorruptKeystore("cipher init failed".into()))?;
    cipher.apply_keystream(&mut buf);
    dk.zeroize();

    Ok(buf)
}
