// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// AURUM - LEDGER ERROR KINDS
//
// Stable error identifiers for validation failures. Every Display string
// begins with the machine-readable kind, so logs and API payloads can be
// matched without parsing the human text.
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

#[derive(Debug, Clone, PartialEq)]
pub enum ChainError {
    InvalidSignature(String),
    InvalidSequence { expected: u64, got: u64 },
    InsufficientBalance { needed: u64, available: u64 },
    InsufficientStake { needed: u64, available: u64 },
    StakeBelowMinimum { amount: u64, min: u64 },
    UnknownSender(String),
    InvalidParent { expected: String, got: String },
    InvalidHeight { expected: u64, got: u64 },
    InvalidMerkleRoot { expected: String, got: String },
    UnknownProposer(String),
    DuplicateTransaction(String),
    PoolFull,
    InvalidAmount(String),
    InvalidReward(String),
    UnsupportedKind(String),
}

impl ChainError {
    /// Machine-readable kind, stable across releases.
    pub fn kind(&self) -> &'static str {
        match self {
            ChainError::InvalidSignature(_) => "InvalidSignature",
            ChainError::InvalidSequence { .. } => "InvalidSequence",
            ChainError::InsufficientBalance { .. } => "InsufficientBalance",
            ChainError::InsufficientStake { .. } => "InsufficientStake",
            ChainError::StakeBelowMinimum { .. } => "StakeBelowMinimum",
            ChainError::UnknownSender(_) => "UnknownSender",
            ChainError::InvalidParent { .. } => "InvalidParent",
            ChainError::InvalidHeight { .. } => "InvalidHeight",
            ChainError::InvalidMerkleRoot { .. } => "InvalidMerkleRoot",
            ChainError::UnknownProposer(_) => "UnknownProposer",
            ChainError::DuplicateTransaction(_) => "DuplicateTransaction",
            ChainError::PoolFull => "PoolFull",
            ChainError::InvalidAmount(_) => "InvalidAmount",
            ChainError::InvalidReward(_) => "InvalidReward",
            ChainError::UnsupportedKind(_) => "UnsupportedKind",
        }
    }
}

impl std::fmt::Display for ChainError {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        match self {
            ChainError::InvalidSignature(msg) => write!(f, "InvalidSignature: {}", msg),
            ChainError::InvalidSequence { expected, got } => {
                write!(f, "InvalidSequence: expected {}, got {}", expected, got)
            }
            ChainError::InsufficientBalance { needed, available } => write!(
                f,
                "InsufficientBalance: need {} units, have {}",
                needed, available
            ),
            ChainError::InsufficientStake { needed, available } => write!(
                f,
                "InsufficientStake: need {} staked, have {}",
                needed, available
            ),
            ChainError::StakeBelowMinimum { amount, min } => write!(
                f,
                "StakeBelowMinimum: stake of {} is below the minimum of {}",
                amount, min
            ),
            ChainError::UnknownSender(addr) => write!(f, "UnknownSender: {}", addr),
            ChainError::InvalidParent { expected, got } => {
                write!(f, "InvalidParent: expected {}, got {}", expected, got)
            }
            ChainError::InvalidHeight { expected, got } => {
                write!(f, "InvalidHeight: expected {}, got {}", expected, got)
            }
            ChainError::InvalidMerkleRoot { expected, got } => {
                write!(f, "InvalidMerkleRoot: header says {}, computed {}", expected, got)
            }
            ChainError::UnknownProposer(addr) => write!(f, "UnknownProposer: {}", addr),
            ChainError::DuplicateTransaction(id) => write!(f, "DuplicateTransaction: {}", id),
            ChainError::PoolFull => write!(f, "PoolFull: transaction pool is at capacity"),
            ChainError::InvalidAmount(msg) => write!(f, "InvalidAmount: {}", msg),
            ChainError::InvalidReward(msg) => write!(f, "InvalidReward: {}", msg),
            ChainError::UnsupportedKind(kind) => {
                write!(f, "UnsupportedKind: {} transactions are not executable yet", kind)
            }
        }
    }
}

impl std::error::Error for ChainError {}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_starts_with_kind() {
        let errors = vec![
            ChainError::InvalidSignature("bad".into()),
            ChainError::InvalidSequence { expected: 1, got: 0 },
            ChainError::InsufficientBalance { needed: 10, available: 5 },
            ChainError::PoolFull,
            ChainError::UnknownSender("aur1x".into()),
        ];
        for err in errors {
            assert!(err.to_string().starts_with(err.kind()), "{}", err);
        }
    }
}
