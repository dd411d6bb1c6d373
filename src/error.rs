//! Error types for the Stakechain library

use thiserror::Error;

/// Result type alias for Stakechain operations
pub type Result<T> = std::result::Result<T, StakechainError>;

/// Main error type for Stakechain operations
#[derive(Error, Debug)]
pub enum StakechainError {
    /// Network-related errors
    #[error("Network error: {0}")]
    Network(#[from] NetworkError),

    /// Cryptographic errors
    #[error("Cryptographic error: {0}")]
    Crypto(#[from] CryptoError),

    /// Serialization errors
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Chain, block or transaction rejected by consensus rules
    #[error("Validation error: {0}")]
    Validation(#[from] ValidationError),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Generic IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

/// Network-specific error types
#[derive(Error, Debug)]
pub enum NetworkError {
    /// Failed to bind to socket
    #[error("Failed to bind to {addr}: {source}")]
    BindFailed { addr: String, source: std::io::Error },

    /// Failed to connect to peer
    #[error("Failed to connect to {addr}: {source}")]
    ConnectionFailed { addr: String, source: std::io::Error },

    /// No live connection to the requested peer
    #[error("Peer {addr} is not connected")]
    PeerNotConnected { addr: String },

    /// Connection was closed before the frame could be queued
    #[error("Connection to {addr} is closed")]
    ConnectionClosed { addr: String },

    /// Invalid peer address
    #[error("Invalid peer address: {reason}")]
    InvalidAddress { reason: String },

    /// Accepting was requested before a listener was bound
    #[error("No listener is bound")]
    NotListening,
}

/// Cryptographic error types
#[derive(Error, Debug)]
pub enum CryptoError {
    /// Invalid public key
    #[error("Invalid public key: {reason}")]
    InvalidPublicKey { reason: String },

    /// Invalid signature encoding
    #[error("Invalid signature: {reason}")]
    InvalidSignature { reason: String },

    /// A signature was already attached to the entity
    #[error("Entity is already signed")]
    AlreadySigned,
}

/// Serialization error types
#[derive(Error, Debug)]
pub enum SerializationError {
    /// JSON serialization error
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Invalid message format
    #[error("Invalid message format: expected {expected}, got {actual}")]
    InvalidFormat { expected: String, actual: String },
}

/// Reasons a transaction, block or candidate chain is rejected.
///
/// All of these are recoverable: the offending item is dropped and the local
/// state is left untouched.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ValidationError {
    #[error("Signature does not verify against the signer")]
    InvalidSignature,

    #[error("First block is not the genesis block")]
    InvalidGenesis,

    #[error("Block {block_number} does not link to its predecessor")]
    InvalidLinkage { block_number: u64 },

    #[error("Transaction {id} was already seen")]
    DuplicateTransaction { id: String },

    #[error("Block {block_number} carries more than one exempt transaction")]
    MultipleRewardsInBlock { block_number: u64 },

    #[error("Transaction {id} spends {amount} but the sender holds {balance}")]
    InsufficientFunds { id: String, balance: i64, amount: u64 },

    #[error("Transaction {id} has an amount outside the balance range")]
    InvalidAmount { id: String },

    #[error("Malformed message: {reason}")]
    MalformedMessage { reason: String },

    #[error("Candidate chain of length {candidate} is not longer than local chain of length {local}")]
    ChainNotLonger { candidate: usize, local: usize },
}

impl ValidationError {
    /// Create a malformed-message rejection
    pub fn malformed<T: Into<String>>(reason: T) -> Self {
        ValidationError::MalformedMessage {
            reason: reason.into(),
        }
    }
}

impl StakechainError {
    /// Create a configuration error
    pub fn config<T: Into<String>>(msg: T) -> Self {
        StakechainError::Config(msg.into())
    }
}

impl From<serde_json::Error> for StakechainError {
    fn from(err: serde_json::Error) -> Self {
        StakechainError::Serialization(SerializationError::Json(err))
    }
}
