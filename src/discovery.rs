//! Peer discovery for Stakechain
//!
//! Membership spreads epidemically. Every new connection opens with a
//! `DISCOVERY` handshake carrying the sender's address and known peers, and
//! the same handshake is re-broadcast on a fixed interval. A receiver records
//! the sender and dials every listed peer it does not know yet. There are no
//! acknowledgements; reachable nodes converge within a few refresh rounds.

use crate::{
    error::Result,
    message::Envelope,
    network::PeerAddress,
    DEFAULT_GOSSIP_INTERVAL_MS, DEFAULT_STATUS_INTERVAL_MS,
};
use indexmap::IndexSet;
use tokio::sync::RwLock;
use tokio::time::Duration;

/// Discovery configuration
#[derive(Debug, Clone)]
pub struct DiscoveryConfig {
    /// How often the handshake is re-broadcast to every peer
    pub gossip_interval: Duration,
    /// How often the current peer set is logged
    pub status_interval: Duration,
    /// Enable discovery protocol
    pub enabled: bool,
}

impl Default for DiscoveryConfig {
    fn default() -> Self {
        Self {
            gossip_interval: Duration::from_millis(DEFAULT_GOSSIP_INTERVAL_MS),
            status_interval: Duration::from_millis(DEFAULT_STATUS_INTERVAL_MS),
            enabled: true,
        }
    }
}

/// Known peers plus this node's own address, deduplicated by address.
#[derive(Debug, Clone)]
pub struct PeerDirectory {
    own: PeerAddress,
    peers: IndexSet<PeerAddress>,
}

impl PeerDirectory {
    pub fn new(own: PeerAddress) -> Self {
        Self {
            own,
            peers: IndexSet::new(),
        }
    }

    pub fn own_address(&self) -> &PeerAddress {
        &self.own
    }

    pub fn is_known(&self, addr: &PeerAddress) -> bool {
        *addr == self.own || self.peers.contains(addr)
    }

    /// Add `addr` unless it is this node or already known.
    pub fn insert(&mut self, addr: PeerAddress) -> bool {
        if addr == self.own {
            return false;
        }
        self.peers.insert(addr)
    }

    pub fn peers(&self) -> Vec<PeerAddress> {
        self.peers.iter().cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.peers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.peers.is_empty()
    }
}

/// What a received `DISCOVERY` message changed
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DiscoveryOutcome {
    /// The sender was not in the directory before
    pub sender_added: bool,
    /// Listed peers this node does not know and should dial
    pub to_connect: Vec<PeerAddress>,
}

/// Peer discovery manager
pub struct DiscoveryManager {
    directory: RwLock<PeerDirectory>,
    config: DiscoveryConfig,
}

impl DiscoveryManager {
    /// Create a new discovery manager
    pub fn new(own: PeerAddress, config: DiscoveryConfig) -> Self {
        Self {
            directory: RwLock::new(PeerDirectory::new(own)),
            config,
        }
    }

    pub fn config(&self) -> &DiscoveryConfig {
        &self.config
    }

    pub async fn own_address(&self) -> PeerAddress {
        self.directory.read().await.own_address().clone()
    }

    /// Replace the own address once the listener has resolved its port
    pub async fn set_own_address(&self, own: PeerAddress) {
        let mut directory = self.directory.write().await;
        directory.peers.shift_remove(&own);
        directory.own = own;
    }

    /// Get all known peers
    pub async fn known_peers(&self) -> Vec<PeerAddress> {
        self.directory.read().await.peers()
    }

    /// Build the handshake: own address plus the full known-peer list
    pub async fn handshake_message(&self) -> Result<Envelope> {
        let directory = self.directory.read().await;
        Envelope::discovery(directory.own_address().clone(), &directory.peers())
    }

    /// Merge a `DISCOVERY` message from `sender` carrying `peers`.
    ///
    /// The check-then-insert for the sender and the unknown-peer scan happen
    /// under one write guard, so concurrent handshakes cannot add the same
    /// address twice. Dialling is left to the caller.
    pub async fn handle_discovery(
        &self,
        sender: PeerAddress,
        peers: Vec<PeerAddress>,
    ) -> DiscoveryOutcome {
        let mut directory = self.directory.write().await;
        let sender_added = directory.insert(sender);

        let mut to_connect: Vec<PeerAddress> = Vec::new();
        for peer in peers {
            if !directory.is_known(&peer) && !to_connect.contains(&peer) {
                to_connect.push(peer);
            }
        }

        DiscoveryOutcome {
            sender_added,
            to_connect,
        }
    }

    /// Get discovery statistics
    pub async fn get_stats(&self) -> DiscoveryStats {
        let directory = self.directory.read().await;
        DiscoveryStats {
            own_address: directory.own_address().clone(),
            total_known_peers: directory.len(),
        }
    }
}

/// Discovery statistics
#[derive(Debug, Clone)]
pub struct DiscoveryStats {
    pub own_address: PeerAddress,
    pub total_known_peers: usize,
}
