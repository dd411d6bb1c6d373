//! Stakechain node implementation

use crate::{
    block::Block,
    blockchain::Blockchain,
    consensus,
    crypto::KeyType,
    discovery::{DiscoveryConfig, DiscoveryManager},
    error::{Result, StakechainError, ValidationError},
    message::{Envelope, MessageKind},
    network::PeerAddress,
    periodic::PeriodicTask,
    pool::TransactionPool,
    transaction::{Transaction, TransactionKind},
    transport::{EnvelopeHandler, TcpTransport, Transport},
    wallet::Wallet,
    DEFAULT_MAX_BLOCK_TRANSACTIONS, DEFAULT_PORT,
};
use async_trait::async_trait;
use std::sync::{Arc, Weak};
use tokio::sync::RwLock;
use tokio::time::Duration;
use tokio_util::sync::CancellationToken;

/// Node configuration
#[derive(Debug, Clone)]
pub struct NodeConfig {
    /// Host to bind and to announce to peers
    pub host: String,

    /// Port to listen on; 0 picks an ephemeral port at start
    pub port: u16,

    /// Peers dialled at start
    pub bootstrap_peers: Vec<PeerAddress>,

    /// Gossip refresh and status reporting
    pub discovery: DiscoveryConfig,

    /// Key type of a generated wallet
    pub key_type: KeyType,

    /// Upper bound on transactions per forged block
    pub max_block_transactions: usize,
}

impl Default for NodeConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: DEFAULT_PORT,
            bootstrap_peers: Vec::new(),
            discovery: DiscoveryConfig::default(),
            key_type: KeyType::default(),
            max_block_transactions: DEFAULT_MAX_BLOCK_TRANSACTIONS,
        }
    }
}

impl NodeConfig {
    pub fn validate(&self) -> Result<()> {
        if self.host.is_empty() {
            return Err(StakechainError::config("host must not be empty"));
        }
        if self.max_block_transactions == 0 {
            return Err(StakechainError::config("max_block_transactions must be at least 1"));
        }
        if self.discovery.gossip_interval.is_zero() || self.discovery.status_interval.is_zero() {
            return Err(StakechainError::config("periodic intervals must be non-zero"));
        }
        Ok(())
    }
}

/// What an inbound block did to the local chain
enum BlockOutcome {
    Appended(Block),
    /// Numbered beyond the next slot
    Ahead,
    /// Fills the next slot but links to a different predecessor
    Forked,
}

/// Everything a node knows: wallet, chain with its ledger, pending pool and
/// peer directory. Inbound envelopes from every connection are dispatched
/// here.
///
/// Locks are taken chain first, then pool. Nothing is sent while a guard is
/// held.
pub struct NodeState {
    wallet: Wallet,
    chain: RwLock<Blockchain>,
    pool: RwLock<TransactionPool>,
    discovery: DiscoveryManager,
    transport: Arc<dyn Transport>,
    config: NodeConfig,
}

impl NodeState {
    /// Build a node context around an existing transport
    pub fn new(config: NodeConfig, wallet: Wallet, transport: Arc<dyn Transport>) -> Self {
        let own = PeerAddress::new(config.host.clone(), config.port);
        Self {
            wallet,
            chain: RwLock::new(Blockchain::new()),
            pool: RwLock::new(TransactionPool::new()),
            discovery: DiscoveryManager::new(own, config.discovery.clone()),
            transport,
            config,
        }
    }

    pub fn wallet(&self) -> &Wallet {
        &self.wallet
    }

    pub fn config(&self) -> &NodeConfig {
        &self.config
    }

    pub fn discovery(&self) -> &DiscoveryManager {
        &self.discovery
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    /// Address this node announces to peers
    pub async fn address(&self) -> PeerAddress {
        self.discovery.own_address().await
    }

    pub async fn known_peers(&self) -> Vec<PeerAddress> {
        self.discovery.known_peers().await
    }

    /// Snapshot of the local chain
    pub async fn chain_view(&self) -> Vec<Block> {
        self.chain.read().await.blocks().to_vec()
    }

    pub async fn chain_len(&self) -> usize {
        self.chain.read().await.len()
    }

    pub async fn balance(&self, identity: &str) -> i64 {
        self.chain.read().await.balance(identity)
    }

    /// Pending transactions, oldest first
    pub async fn pending_transactions(&self) -> Vec<Transaction> {
        self.pool.read().await.snapshot()
    }

    /// Create a transaction signed by this node's wallet and submit it
    pub async fn create_transaction(
        &self,
        receiver: impl Into<String>,
        amount: u64,
        kind: TransactionKind,
    ) -> Result<Transaction> {
        let transaction = self.wallet.create_transaction(receiver, amount, kind)?;
        self.submit_transaction(transaction.clone()).await?;
        Ok(transaction)
    }

    /// Validate a transaction, admit it to the pool and broadcast it.
    pub async fn submit_transaction(&self, transaction: Transaction) -> std::result::Result<(), ValidationError> {
        self.admit_transaction(transaction.clone()).await?;
        tracing::debug!("Accepted transaction {}", transaction.id());
        self.broadcast_transaction(&transaction).await;
        Ok(())
    }

    async fn admit_transaction(&self, transaction: Transaction) -> std::result::Result<(), ValidationError> {
        if !transaction.signature_valid() {
            return Err(ValidationError::InvalidSignature);
        }

        let chain = self.chain.read().await;
        let duplicate = || ValidationError::DuplicateTransaction {
            id: transaction.id().to_string(),
        };
        if chain.contains_transaction(transaction.id()) {
            return Err(duplicate());
        }
        let mut pool = self.pool.write().await;
        if !pool.admit(transaction.clone()) {
            return Err(duplicate());
        }
        Ok(())
    }

    async fn broadcast_transaction(&self, transaction: &Transaction) {
        let own = self.address().await;
        match Envelope::transaction(own, transaction) {
            Ok(envelope) => self.broadcast(&envelope).await,
            Err(e) => tracing::warn!("Could not encode transaction {}: {}", transaction.id(), e),
        }
    }

    /// Forge a block from the pending pool on top of the local tip, append it
    /// and broadcast it.
    pub async fn forge_block(&self) -> Result<Block> {
        let block = {
            let mut chain = self.chain.write().await;
            let mut pool = self.pool.write().await;

            let selected = consensus::select_covered(
                chain.state(),
                pool.snapshot(),
                self.config.max_block_transactions,
            );
            let tip = chain.latest_block();
            let block = self
                .wallet
                .create_block(selected, tip.hash()?, tip.block_number() + 1)?;

            let confirmed = chain.append_block(block.clone())?;
            pool.drain_confirmed(&confirmed);
            block
        };

        tracing::info!(
            "Forged block {} with {} transactions",
            block.block_number(),
            block.transactions().len()
        );
        let own = self.address().await;
        self.broadcast(&Envelope::block(own, &block)?).await;
        Ok(block)
    }

    /// One gossip refresh round: re-send the handshake everywhere and redial
    /// known peers that have no live connection.
    pub async fn gossip_refresh(&self) {
        match self.discovery.handshake_message().await {
            Ok(handshake) => self.broadcast(&handshake).await,
            Err(e) => tracing::warn!("Could not build handshake: {}", e),
        }

        let connected = self.transport.connected_peers().await;
        for peer in self.discovery.known_peers().await {
            if !connected.contains(&peer) {
                self.dial(peer);
            }
        }
    }

    /// Log the current peer set
    pub async fn report_status(&self) {
        let stats = self.discovery.get_stats().await;
        let peers = self.discovery.known_peers().await;
        let chain_len = self.chain_len().await;
        tracing::info!(
            "Node {} knows {} peers {:?}, chain length {}",
            stats.own_address,
            stats.total_known_peers,
            peers.iter().map(ToString::to_string).collect::<Vec<_>>(),
            chain_len
        );
    }

    async fn broadcast(&self, envelope: &Envelope) {
        match self.transport.broadcast(envelope).await {
            Ok(reached) => tracing::debug!("Broadcast {} to {} peers", envelope.kind, reached),
            Err(e) => tracing::warn!("Broadcast of {} failed: {}", envelope.kind, e),
        }
    }

    fn dial(&self, peer: PeerAddress) {
        let transport = self.transport.clone();
        tokio::spawn(async move {
            if let Err(e) = transport.connect(&peer).await {
                tracing::debug!("Could not reach {}: {}", peer, e);
            }
        });
    }

    async fn request_chain(&self, peer: &PeerAddress) {
        let request = Envelope::chain_request(self.address().await);
        if let Err(e) = self.transport.send_to(peer, &request).await {
            tracing::debug!("Could not request chain from {}: {}", peer, e);
        }
    }

    /// Dispatch one decoded inbound envelope. Invalid content is logged and
    /// dropped; it never reaches the chain or the pool.
    pub async fn dispatch(&self, envelope: Envelope) {
        let kind = envelope.kind;
        let sender = envelope.sender.clone();
        let outcome = match kind {
            MessageKind::Discovery => self.on_discovery(envelope).await,
            MessageKind::Transaction => self.on_transaction(envelope).await,
            MessageKind::Block => self.on_block(envelope).await,
            MessageKind::ChainRequest => self.on_chain_request(envelope).await,
            MessageKind::Chain => self.on_chain(envelope).await,
        };
        if let Err(e) = outcome {
            tracing::warn!("Dropped {} from {}: {}", kind, sender, e);
        }
    }

    async fn on_discovery(&self, envelope: Envelope) -> Result<()> {
        let peers: Vec<PeerAddress> = envelope.decode_payload()?;
        let outcome = self
            .discovery
            .handle_discovery(envelope.sender.clone(), peers)
            .await;

        for peer in outcome.to_connect {
            tracing::debug!("Discovered {} via {}", peer, envelope.sender);
            self.dial(peer);
        }
        if outcome.sender_added {
            tracing::info!("New peer {}", envelope.sender);
            self.request_chain(&envelope.sender).await;
        }
        Ok(())
    }

    async fn on_transaction(&self, envelope: Envelope) -> Result<()> {
        let transaction: Transaction = envelope.decode_payload()?;
        match self.admit_transaction(transaction.clone()).await {
            Ok(()) => {
                self.broadcast_transaction(&transaction).await;
                Ok(())
            },
            Err(ValidationError::DuplicateTransaction { .. }) => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn on_block(&self, envelope: Envelope) -> Result<()> {
        let block: Block = envelope.decode_payload()?;
        let number = block.block_number();

        let outcome = {
            let mut chain = self.chain.write().await;
            let tip = chain.latest_block().block_number();
            if number <= tip {
                tracing::debug!("Ignoring block {} at or below tip {}", number, tip);
                return Ok(());
            }
            if number > tip + 1 {
                BlockOutcome::Ahead
            } else {
                match chain.append_block(block.clone()) {
                    Ok(confirmed) => {
                        self.pool.write().await.drain_confirmed(&confirmed);
                        BlockOutcome::Appended(block)
                    },
                    Err(ValidationError::InvalidLinkage { .. }) => BlockOutcome::Forked,
                    Err(e) => return Err(e.into()),
                }
            }
        };

        match outcome {
            BlockOutcome::Appended(block) => {
                tracing::info!("Appended block {} from {}", number, envelope.sender);
                let own = self.address().await;
                self.broadcast(&Envelope::block(own, &block)?).await;
            },
            BlockOutcome::Ahead => {
                tracing::debug!("Block {} from {} is ahead of us, requesting chain", number, envelope.sender);
                self.request_chain(&envelope.sender).await;
            },
            BlockOutcome::Forked => {
                tracing::debug!("Block {} from {} does not extend our tip, requesting chain", number, envelope.sender);
                self.request_chain(&envelope.sender).await;
            },
        }
        Ok(())
    }

    async fn on_chain_request(&self, envelope: Envelope) -> Result<()> {
        let blocks = self.chain_view().await;
        let reply = Envelope::chain(self.address().await, &blocks)?;
        self.transport.send_to(&envelope.sender, &reply).await
    }

    async fn on_chain(&self, envelope: Envelope) -> Result<()> {
        let blocks: Vec<Block> = envelope.decode_payload()?;
        let mut chain = self.chain.write().await;
        match chain.adopt_chain(blocks) {
            Ok(confirmed) => {
                let drained = self.pool.write().await.drain_confirmed(&confirmed);
                tracing::info!(
                    "Adopted chain of length {} from {}, {} pending transactions confirmed",
                    chain.len(),
                    envelope.sender,
                    drained
                );
                Ok(())
            },
            Err(ValidationError::ChainNotLonger { candidate, local }) => {
                tracing::debug!("Kept local chain ({} >= {})", local, candidate);
                Ok(())
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[async_trait]
impl EnvelopeHandler for NodeState {
    async fn handshake(&self) -> Result<Envelope> {
        self.discovery.handshake_message().await
    }

    async fn receive_envelope(&self, envelope: Envelope) {
        self.dispatch(envelope).await
    }
}

/// A node listening on TCP with its background tasks
pub struct StakechainNode {
    state: Arc<NodeState>,
    cancel: CancellationToken,
    tasks: Vec<PeriodicTask>,
    running: bool,
    stopped: bool,
}

impl StakechainNode {
    /// Create a builder for this node
    pub fn builder() -> StakechainNodeBuilder {
        StakechainNodeBuilder::new()
    }

    pub fn state(&self) -> &Arc<NodeState> {
        &self.state
    }

    pub fn config(&self) -> &NodeConfig {
        self.state.config()
    }

    pub fn public_key(&self) -> String {
        self.state.wallet().public_key_string()
    }

    pub fn is_running(&self) -> bool {
        self.running
    }

    /// Bind the listener, start gossip and status tasks, dial bootstrap peers
    pub async fn start(&mut self) -> Result<()> {
        if self.running {
            return Ok(());
        }
        if self.stopped {
            return Err(StakechainError::config("a stopped node cannot be restarted"));
        }

        let config = self.state.config().clone();
        let bind = PeerAddress::new(config.host.clone(), config.port);
        let bound = self.state.transport().listen(&bind).await?;
        self.state.discovery().set_own_address(bound.clone()).await;
        self.state.transport().accept_connections().await?;

        if config.discovery.enabled {
            let state = self.state.clone();
            self.tasks.push(PeriodicTask::spawn(
                "gossip-refresh",
                config.discovery.gossip_interval,
                self.cancel.child_token(),
                move || {
                    let state = state.clone();
                    async move { state.gossip_refresh().await }
                },
            ));
        }

        let state = self.state.clone();
        self.tasks.push(PeriodicTask::spawn(
            "status-report",
            config.discovery.status_interval,
            self.cancel.child_token(),
            move || {
                let state = state.clone();
                async move { state.report_status().await }
            },
        ));

        for peer in &config.bootstrap_peers {
            if let Err(e) = self.state.transport().connect(peer).await {
                tracing::warn!("Bootstrap peer {} unreachable: {}", peer, e);
            }
        }

        self.running = true;
        tracing::info!("Node {} started at {}", self.public_key(), bound);
        Ok(())
    }

    /// Stop background tasks and close every connection
    pub async fn stop(&mut self) -> Result<()> {
        if !self.running {
            return Ok(());
        }
        self.cancel.cancel();
        for task in self.tasks.drain(..) {
            task.stop().await;
        }
        self.state.transport().shutdown().await;
        self.running = false;
        self.stopped = true;
        tracing::info!("Node stopped");
        Ok(())
    }

    /// Address this node announces; resolved after `start`
    pub async fn address(&self) -> PeerAddress {
        self.state.address().await
    }

    pub async fn known_peers(&self) -> Vec<PeerAddress> {
        self.state.known_peers().await
    }

    pub async fn submit_transaction(&self, transaction: Transaction) -> std::result::Result<(), ValidationError> {
        self.state.submit_transaction(transaction).await
    }

    pub async fn create_transaction(
        &self,
        receiver: impl Into<String>,
        amount: u64,
        kind: TransactionKind,
    ) -> Result<Transaction> {
        self.state.create_transaction(receiver, amount, kind).await
    }

    pub async fn forge_block(&self) -> Result<Block> {
        self.state.forge_block().await
    }

    pub async fn chain_view(&self) -> Vec<Block> {
        self.state.chain_view().await
    }

    pub async fn balance(&self, identity: &str) -> i64 {
        self.state.balance(identity).await
    }
}

impl Drop for StakechainNode {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

/// Builder for Stakechain nodes
pub struct StakechainNodeBuilder {
    config: NodeConfig,
    wallet: Option<Wallet>,
}

impl StakechainNodeBuilder {
    /// Create a new node builder
    pub fn new() -> Self {
        Self {
            config: NodeConfig::default(),
            wallet: None,
        }
    }

    /// Set the node configuration
    pub fn with_config(mut self, config: NodeConfig) -> Self {
        self.config = config;
        self
    }

    /// Use an existing wallet instead of generating one
    pub fn with_wallet(mut self, wallet: Wallet) -> Self {
        self.wallet = Some(wallet);
        self
    }

    pub fn host(mut self, host: impl Into<String>) -> Self {
        self.config.host = host.into();
        self
    }

    /// Set the port
    pub fn port(mut self, port: u16) -> Self {
        self.config.port = port;
        self
    }

    pub fn bootstrap_peer(mut self, peer: PeerAddress) -> Self {
        self.config.bootstrap_peers.push(peer);
        self
    }

    pub fn bootstrap_peers(mut self, peers: impl IntoIterator<Item = PeerAddress>) -> Self {
        self.config.bootstrap_peers.extend(peers);
        self
    }

    pub fn gossip_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.gossip_interval = interval;
        self
    }

    pub fn status_interval(mut self, interval: Duration) -> Self {
        self.config.discovery.status_interval = interval;
        self
    }

    pub fn discovery_enabled(mut self, enabled: bool) -> Self {
        self.config.discovery.enabled = enabled;
        self
    }

    pub fn key_type(mut self, key_type: KeyType) -> Self {
        self.config.key_type = key_type;
        self
    }

    pub fn max_block_transactions(mut self, max: usize) -> Self {
        self.config.max_block_transactions = max;
        self
    }

    /// Build the node
    pub fn build(self) -> Result<StakechainNode> {
        self.config.validate()?;

        let wallet = self
            .wallet
            .unwrap_or_else(|| Wallet::generate(self.config.key_type));
        let config = self.config;
        let cancel = CancellationToken::new();
        let transport_cancel = cancel.child_token();

        let state = Arc::new_cyclic(|weak: &Weak<NodeState>| {
            let handler: Weak<dyn EnvelopeHandler> = weak.clone();
            let transport: Arc<dyn Transport> = Arc::new(TcpTransport::new(handler, transport_cancel));
            NodeState::new(config, wallet, transport)
        });

        Ok(StakechainNode {
            state,
            cancel,
            tasks: Vec::new(),
            running: false,
            stopped: false,
        })
    }
}

impl Default for StakechainNodeBuilder {
    fn default() -> Self {
        Self::new()
    }
}
