//! Stakechain - a minimal proof-of-stake node
//!
//! Signed transactions, hash-linked blocks, full-replay chain validation,
//! a pending transaction pool and epidemic peer discovery over TCP.

pub mod block;
pub mod blockchain;
pub mod canonical;
pub mod consensus;
pub mod crypto;
pub mod discovery;
pub mod error;
pub mod ledger;
pub mod message;
pub mod network;
pub mod node;
pub mod periodic;
pub mod pool;
pub mod transaction;
pub mod transport;
pub mod utils;
pub mod wallet;

// Re-exports
pub use block::Block;
pub use blockchain::Blockchain;
pub use error::{Result, StakechainError, ValidationError};
pub use message::{Envelope, MessageKind};
pub use network::PeerAddress;
pub use node::{NodeConfig, NodeState, StakechainNode, StakechainNodeBuilder};
pub use pool::TransactionPool;
pub use transaction::{Transaction, TransactionKind};
pub use transport::{EnvelopeHandler, Transport};
pub use wallet::Wallet;

// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
pub const NAME: &str = env!("CARGO_PKG_NAME");
pub const DESCRIPTION: &str = env!("CARGO_PKG_DESCRIPTION");

/// Default network port for Stakechain nodes
pub const DEFAULT_PORT: u16 = 10001;

/// Default gossip refresh interval in milliseconds
pub const DEFAULT_GOSSIP_INTERVAL_MS: u64 = 10_000;

/// Default status report interval in milliseconds
pub const DEFAULT_STATUS_INTERVAL_MS: u64 = 10_000;

/// Default cap on transactions in a forged block
pub const DEFAULT_MAX_BLOCK_TRANSACTIONS: usize = 100;

/// Longest accepted wire line; a full chain travels in one line
pub const MAX_FRAME_LENGTH: usize = 16 * 1024 * 1024;
