use async_trait::async_trait;
use serde_json::json;
use stakechain::crypto::KeyType;
use stakechain::{
    Block, Envelope, MessageKind, NodeConfig, NodeState, PeerAddress, Result, Transaction,
    TransactionKind, Transport, ValidationError, Wallet,
};
use std::sync::{Arc, Mutex};
use tokio::time::{sleep, Duration};

/// Transport double that records every outbound call.
#[derive(Default)]
struct RecordingTransport {
    broadcasts: Mutex<Vec<Envelope>>,
    sent: Mutex<Vec<(PeerAddress, Envelope)>>,
    dialled: Mutex<Vec<PeerAddress>>,
}

impl RecordingTransport {
    fn broadcast_kinds(&self) -> Vec<MessageKind> {
        self.broadcasts.lock().unwrap().iter().map(|e| e.kind).collect()
    }

    fn sent_to(&self, peer: &PeerAddress) -> Vec<Envelope> {
        self.sent
            .lock()
            .unwrap()
            .iter()
            .filter(|(to, _)| to == peer)
            .map(|(_, envelope)| envelope.clone())
            .collect()
    }
}

#[async_trait]
impl Transport for RecordingTransport {
    async fn listen(&self, bind: &PeerAddress) -> Result<PeerAddress> {
        Ok(bind.clone())
    }

    async fn accept_connections(&self) -> Result<()> {
        Ok(())
    }

    async fn connect(&self, peer: &PeerAddress) -> Result<()> {
        self.dialled.lock().unwrap().push(peer.clone());
        Ok(())
    }

    async fn broadcast(&self, envelope: &Envelope) -> Result<usize> {
        self.broadcasts.lock().unwrap().push(envelope.clone());
        Ok(1)
    }

    async fn send_to(&self, peer: &PeerAddress, envelope: &Envelope) -> Result<()> {
        self.sent.lock().unwrap().push((peer.clone(), envelope.clone()));
        Ok(())
    }

    async fn connected_peers(&self) -> Vec<PeerAddress> {
        Vec::new()
    }

    async fn shutdown(&self) {}
}

fn addr(port: u16) -> PeerAddress {
    PeerAddress::new("127.0.0.1", port)
}

fn node() -> (NodeState, Arc<RecordingTransport>) {
    let transport = Arc::new(RecordingTransport::default());
    let config = NodeConfig {
        port: 10001,
        ..NodeConfig::default()
    };
    let state = NodeState::new(config, Wallet::generate(KeyType::Ed25519), transport.clone());
    (state, transport)
}

/// A signed exchange from a fresh issuer, which any node will accept.
fn reward_to(receiver: &str, amount: u64) -> Transaction {
    Wallet::generate(KeyType::Ed25519)
        .create_transaction(receiver, amount, TransactionKind::Exchange)
        .unwrap()
}

#[tokio::test]
async fn test_discovery_adds_sender_dials_unknown_and_requests_chain() -> Result<()> {
    let (state, transport) = node();
    let envelope = Envelope::discovery(addr(2), &[addr(10001), addr(3)])?;

    state.dispatch(envelope).await;
    sleep(Duration::from_millis(50)).await;

    assert_eq!(state.known_peers().await, vec![addr(2)]);
    assert_eq!(*transport.dialled.lock().unwrap(), vec![addr(3)]);
    let requests = transport.sent_to(&addr(2));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, MessageKind::ChainRequest);

    // A repeated handshake changes nothing and requests nothing.
    state.dispatch(Envelope::discovery(addr(2), &[])?).await;
    assert_eq!(transport.sent_to(&addr(2)).len(), 1);
    Ok(())
}

#[tokio::test]
async fn test_transaction_is_admitted_once_and_rebroadcast() -> Result<()> {
    let (state, transport) = node();
    let tx = reward_to("alice", 10);
    let envelope = Envelope::transaction(addr(2), &tx)?;

    state.dispatch(envelope.clone()).await;
    state.dispatch(envelope).await;

    assert_eq!(state.pending_transactions().await, vec![tx]);
    assert_eq!(transport.broadcast_kinds(), vec![MessageKind::Transaction]);
    Ok(())
}

#[tokio::test]
async fn test_unsigned_transaction_is_dropped() -> Result<()> {
    let (state, transport) = node();
    let unsigned = Transaction::new("alice", "bob", 1, TransactionKind::Transfer);

    state.dispatch(Envelope::transaction(addr(2), &unsigned)?).await;

    assert!(state.pending_transactions().await.is_empty());
    assert!(transport.broadcast_kinds().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_malformed_payload_is_dropped() -> Result<()> {
    let (state, transport) = node();
    let envelope = Envelope {
        sender: addr(2),
        kind: MessageKind::Block,
        payload: json!({"not": "a block"}),
    };

    state.dispatch(envelope).await;

    assert_eq!(state.chain_len().await, 1);
    assert!(transport.broadcast_kinds().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_submit_reports_rejection_reason() -> Result<()> {
    let (state, _transport) = node();

    let mut forged = Transaction::new("alice", "bob", 1, TransactionKind::Transfer);
    forged.sign("00".repeat(64))?;
    assert_eq!(
        state.submit_transaction(forged).await.unwrap_err(),
        ValidationError::InvalidSignature
    );

    let tx = reward_to("alice", 10);
    state.submit_transaction(tx.clone()).await.unwrap();
    assert!(matches!(
        state.submit_transaction(tx.clone()).await,
        Err(ValidationError::DuplicateTransaction { .. })
    ));

    // Once confirmed, the id stays rejected even though the pool is empty.
    state.forge_block().await?;
    assert!(state.pending_transactions().await.is_empty());
    assert!(matches!(
        state.submit_transaction(tx).await,
        Err(ValidationError::DuplicateTransaction { .. })
    ));
    Ok(())
}

#[tokio::test]
async fn test_forge_only_includes_covered_transactions() -> Result<()> {
    let (state, transport) = node();
    let own = state.wallet().public_key_string();

    let reward = reward_to(&own, 10);
    state.submit_transaction(reward.clone()).await.unwrap();
    let spend = state.create_transaction("bob", 4, TransactionKind::Transfer).await?;
    let overspend = state.create_transaction("bob", 7, TransactionKind::Transfer).await?;

    let block = state.forge_block().await?;

    assert_eq!(block.block_number(), 1);
    assert_eq!(block.transactions(), &[reward, spend][..]);
    assert_eq!(state.balance(&own).await, 6);
    assert_eq!(state.balance("bob").await, 4);
    assert_eq!(state.pending_transactions().await, vec![overspend]);
    assert_eq!(transport.broadcast_kinds().last(), Some(&MessageKind::Block));
    Ok(())
}

#[tokio::test]
async fn test_next_block_is_appended_and_drains_pool() -> Result<()> {
    let (state, transport) = node();
    let forger = Wallet::generate(KeyType::Ed25519);
    let tx = reward_to("alice", 10);
    state.submit_transaction(tx.clone()).await.unwrap();

    let genesis = Block::genesis();
    let block = forger.create_block(vec![tx], genesis.hash()?, 1)?;
    state.dispatch(Envelope::block(addr(2), &block)?).await;

    assert_eq!(state.chain_view().await, vec![genesis, block.clone()]);
    assert!(state.pending_transactions().await.is_empty());
    assert_eq!(state.balance("alice").await, 10);
    let rebroadcast = transport.broadcasts.lock().unwrap().last().cloned().unwrap();
    assert_eq!(rebroadcast.decode_payload::<Block>().unwrap(), block);

    // The echo of the same block is ignored.
    let before = transport.broadcast_kinds().len();
    state.dispatch(Envelope::block(addr(3), &block)?).await;
    assert_eq!(transport.broadcast_kinds().len(), before);
    Ok(())
}

#[tokio::test]
async fn test_invalid_block_is_not_rebroadcast() -> Result<()> {
    let (state, transport) = node();
    let forger = Wallet::generate(KeyType::Ed25519);
    let overspend = forger.create_transaction("bob", 5, TransactionKind::Transfer)?;
    let block = forger.create_block(vec![overspend], Block::genesis().hash()?, 1)?;

    state.dispatch(Envelope::block(addr(2), &block)?).await;

    assert_eq!(state.chain_len().await, 1);
    assert!(transport.broadcast_kinds().is_empty());
    Ok(())
}

#[tokio::test]
async fn test_block_ahead_of_tip_requests_chain() -> Result<()> {
    let (state, transport) = node();
    let forger = Wallet::generate(KeyType::Ed25519);
    let ahead = forger.create_block(Vec::new(), "unknown", 5)?;

    state.dispatch(Envelope::block(addr(2), &ahead)?).await;

    assert_eq!(state.chain_len().await, 1);
    let requests = transport.sent_to(&addr(2));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, MessageKind::ChainRequest);
    Ok(())
}

#[tokio::test]
async fn test_competing_block_at_next_slot_requests_chain() -> Result<()> {
    let (state, transport) = node();
    let (remote, _remote_transport) = node();
    state.forge_block().await?;
    remote.forge_block().await?;
    let competing = remote.forge_block().await?;
    let local = state.chain_view().await;

    state.dispatch(Envelope::block(addr(2), &competing)?).await;

    // The block is dropped and not relayed, but the sender's chain is asked for.
    assert_eq!(state.chain_view().await, local);
    assert_eq!(transport.broadcast_kinds(), vec![MessageKind::Block]);
    let requests = transport.sent_to(&addr(2));
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].kind, MessageKind::ChainRequest);

    // The reply resolves the fork in favour of the longer chain.
    state.dispatch(Envelope::chain(addr(2), &remote.chain_view().await)?).await;
    assert_eq!(state.chain_view().await, remote.chain_view().await);
    Ok(())
}

#[tokio::test]
async fn test_chain_request_is_answered_with_full_chain() -> Result<()> {
    let (state, transport) = node();
    state.forge_block().await?;

    state.dispatch(Envelope::chain_request(addr(2))).await;

    let replies = transport.sent_to(&addr(2));
    assert_eq!(replies.len(), 1);
    assert_eq!(replies[0].kind, MessageKind::Chain);
    let blocks: Vec<Block> = replies[0].decode_payload().unwrap();
    assert_eq!(blocks, state.chain_view().await);
    Ok(())
}

#[tokio::test]
async fn test_longer_chain_is_adopted_and_prunes_pool() -> Result<()> {
    let (state, _transport) = node();
    let (remote, _remote_transport) = node();

    let tx = reward_to("alice", 10);
    state.submit_transaction(tx.clone()).await.unwrap();
    remote.submit_transaction(tx).await.unwrap();
    remote.forge_block().await?;
    remote.forge_block().await?;

    state.dispatch(Envelope::chain(addr(2), &remote.chain_view().await)?).await;

    assert_eq!(state.chain_view().await, remote.chain_view().await);
    assert!(state.pending_transactions().await.is_empty());
    assert_eq!(state.balance("alice").await, 10);
    Ok(())
}

#[tokio::test]
async fn test_shorter_chain_is_ignored() -> Result<()> {
    let (state, _transport) = node();
    state.forge_block().await?;
    let local = state.chain_view().await;

    state
        .dispatch(Envelope::chain(addr(2), &[Block::genesis()])?)
        .await;

    assert_eq!(state.chain_view().await, local);
    Ok(())
}
