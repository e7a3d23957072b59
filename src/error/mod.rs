//! Error handling for the node
//!
//! Every fallible operation in the crate returns [`Result`]. Variants map onto the
//! failure classes the node cares about: storage, crypto, wire, transaction rules.

use std::fmt;

/// Result type alias for node operations
pub type Result<T> = std::result::Result<T, BlockchainError>;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BlockchainError {
    /// Storage engine failures (open, read, transaction commit)
    Database(String),
    /// Key generation, signing and timestamp errors
    Crypto(String),
    /// Peer communication errors
    Network(String),
    /// Transaction construction and validation errors
    Transaction(String),
    /// Wallet lookup and wallet file errors
    Wallet(String),
    /// Configuration errors
    Config(String),
    /// Record and wire codec errors
    Serialization(String),
    /// File I/O errors
    Io(String),
    /// Invalid address format or checksum
    InvalidAddress(String),
    /// Spend selection could not cover the requested amount
    InsufficientFunds { required: u64, available: u64 },
    /// Block validation errors
    InvalidBlock(String),
    /// Proof-of-work search errors
    Mining(String),
    /// Requested block or record does not exist
    NotFound(String),
    /// An input references a transaction that is not on the chain
    MissingPreviousTransaction(String),
}

impl fmt::Display for BlockchainError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockchainError::Database(msg) => write!(f, "Database error: {msg}"),
            BlockchainError::Crypto(msg) => write!(f, "Cryptographic error: {msg}"),
            BlockchainError::Network(msg) => write!(f, "Network error: {msg}"),
            BlockchainError::Transaction(msg) => write!(f, "Transaction error: {msg}"),
            BlockchainError::Wallet(msg) => write!(f, "Wallet error: {msg}"),
            BlockchainError::Config(msg) => write!(f, "Configuration error: {msg}"),
            BlockchainError::Serialization(msg) => write!(f, "Serialization error: {msg}"),
            BlockchainError::Io(msg) => write!(f, "I/O error: {msg}"),
            BlockchainError::InvalidAddress(addr) => write!(f, "Invalid address: {addr}"),
            BlockchainError::InsufficientFunds {
                required,
                available,
            } => {
                write!(
                    f,
                    "Insufficient funds: required {required}, available {available}"
                )
            }
            BlockchainError::InvalidBlock(msg) => write!(f, "Invalid block: {msg}"),
            BlockchainError::Mining(msg) => write!(f, "Mining error: {msg}"),
            BlockchainError::NotFound(what) => write!(f, "Not found: {what}"),
            BlockchainError::MissingPreviousTransaction(txid) => {
                write!(f, "Previous transaction {txid} is not on the chain")
            }
        }
    }
}

impl std::error::Error for BlockchainError {}

impl From<std::io::Error> for BlockchainError {
    fn from(err: std::io::Error) -> Self {
        BlockchainError::Io(err.to_string())
    }
}

impl From<sled::Error> for BlockchainError {
    fn from(err: sled::Error) -> Self {
        BlockchainError::Database(err.to_string())
    }
}

impl From<sled::transaction::TransactionError<BlockchainError>> for BlockchainError {
    fn from(err: sled::transaction::TransactionError<BlockchainError>) -> Self {
        match err {
            sled::transaction::TransactionError::Abort(inner) => inner,
            sled::transaction::TransactionError::Storage(e) => {
                BlockchainError::Database(e.to_string())
            }
        }
    }
}

impl From<bincode::error::EncodeError> for BlockchainError {
    fn from(err: bincode::error::EncodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<bincode::error::DecodeError> for BlockchainError {
    fn from(err: bincode::error::DecodeError) -> Self {
        BlockchainError::Serialization(err.to_string())
    }
}

impl From<toml::de::Error> for BlockchainError {
    fn from(err: toml::de::Error) -> Self {
        BlockchainError::Config(err.to_string())
    }
}
