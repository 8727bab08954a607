//! Error types for DecayChain

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ChainError {
    // Admission errors
    #[error("the blockchain is empty")]
    EmptyLedger,
    #[error("the transaction timestamp is too far in the future: {timestamp}, next block timestamp: {next_block_timestamp}")]
    TooFarInFuture {
        timestamp: i64,
        next_block_timestamp: i64,
    },
    #[error("the transaction timestamp is too old: {timestamp}, current block timestamp: {block_timestamp}")]
    TooOld { timestamp: i64, block_timestamp: i64 },
    #[error("the transaction is already in the transactions pool")]
    Duplicate,
    #[error("failed to verify signature: {0}")]
    InvalidSignature(String),
    #[error("failed to find input UTXO: {0}")]
    InputNotFound(String),
    #[error("failed to verify input recipient address: {0}")]
    AddressMismatch(String),
    #[error("fee is negative")]
    NegativeFee,
    #[error("fee is too low, fee: {fee}, minimal fee: {minimal_fee}")]
    FeeTooLow { fee: u64, minimal_fee: u64 },
    #[error("income requested for several UTXOs for address: {0}")]
    IncomeConflict(String),
    #[error("transaction ID already exists: {0}")]
    DuplicateTransactionId(String),

    // Consensus errors
    #[error("neighbor's blockchain is too short")]
    ChainTooShort,
    #[error("neighbor's blockchain is a fork")]
    ForkDetected,
    #[error("a previous neighbor block hash is invalid: block height: {height}")]
    InvalidPreviousHash { height: usize },
    #[error("neighbor block timestamp is invalid: block timestamp is {timestamp}, expected is {expected}")]
    TimestampCadenceInvalid { timestamp: i64, expected: i64 },
    #[error("neighbor block timestamp is in the future: block timestamp is {timestamp}, now is {now}")]
    TimestampInFuture { timestamp: i64, now: i64 },
    #[error("failed to verify registered addresses: {0}")]
    RegistrationConflict(String),
    #[error("multiple rewards attempt for the same neighbor block")]
    MultipleRewards,
    #[error("neighbor block reward exceeds the consented one: reward {reward}, fees {fees}")]
    RewardExceedsFees { reward: u64, fees: u64 },
    #[error("neighbor's response timeout")]
    NeighborTimeout,
    #[error("failed to get neighbor's blockchain: {0}")]
    NeighborUnreachable(String),

    // Structural and ambient errors
    #[error("Invalid transaction: {0}")]
    InvalidTransaction(String),
    #[error("Invalid block: {0}")]
    InvalidBlock(String),
    #[error("Cryptographic error: {0}")]
    CryptoError(String),
    #[error("Serialization error: {0}")]
    Serialization(String),
    #[error("Configuration error: {0}")]
    Config(String),
    #[error("IO error: {0}")]
    Io(String),
}

impl From<std::io::Error> for ChainError {
    fn from(err: std::io::Error) -> Self {
        ChainError::Io(err.to_string())
    }
}

impl From<Box<bincode::ErrorKind>> for ChainError {
    fn from(err: Box<bincode::ErrorKind>) -> Self {
        ChainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for ChainError {
    fn from(err: toml::de::Error) -> Self {
        ChainError::Config(err.to_string())
    }
}

/// Convenience alias used across the crate
pub type Result<T> = std::result::Result<T, ChainError>;
