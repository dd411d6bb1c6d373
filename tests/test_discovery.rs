use stakechain::{Envelope, MessageKind, PeerAddress, Result, StakechainNode, TransactionKind};
use std::future::Future;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
use tokio::net::TcpStream;
use tokio::time::{sleep, timeout, Duration, Instant};

const GOSSIP_INTERVAL: Duration = Duration::from_millis(200);

async fn start_node(bootstrap: Option<PeerAddress>) -> Result<StakechainNode> {
    let mut node = StakechainNode::builder()
        .port(0)
        .gossip_interval(GOSSIP_INTERVAL)
        .status_interval(Duration::from_secs(60))
        .bootstrap_peers(bootstrap)
        .build()?;
    node.start().await?;
    Ok(node)
}

/// Poll `condition` until it holds or `timeout` passes.
async fn eventually<F, Fut>(timeout: Duration, mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition().await {
            return true;
        }
        sleep(Duration::from_millis(50)).await;
    }
    false
}

#[tokio::test]
async fn test_ephemeral_port_becomes_own_address() -> Result<()> {
    let mut node = start_node(None).await?;
    let address = node.address().await;
    assert_eq!(address.host, "127.0.0.1");
    assert_ne!(address.port, 0);
    node.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_handshake_makes_peers_known_both_ways() -> Result<()> {
    let mut b = start_node(None).await?;
    let mut a = start_node(Some(b.address().await)).await?;
    let a_addr = a.address().await;
    let b_addr = b.address().await;

    let (a_ref, b_ref) = (&a, &b);
    let (a_addr_ref, b_addr_ref) = (&a_addr, &b_addr);
    assert!(
        eventually(Duration::from_secs(5), || async move {
            a_ref.known_peers().await == vec![b_addr_ref.clone()]
                && b_ref.known_peers().await == vec![a_addr_ref.clone()]
        })
        .await
    );

    a.stop().await?;
    b.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_gossip_spreads_transitively() -> Result<()> {
    // A knows only B, B knows only C.
    let mut c = start_node(None).await?;
    let mut b = start_node(Some(c.address().await)).await?;
    let mut a = start_node(Some(b.address().await)).await?;
    let a_addr = a.address().await;
    let c_addr = c.address().await;

    let (a_ref, c_ref) = (&a, &c);
    let (a_addr_ref, c_addr_ref) = (&a_addr, &c_addr);
    assert!(
        eventually(GOSSIP_INTERVAL * 20, || async move {
            a_ref.known_peers().await.contains(c_addr_ref)
                && c_ref.known_peers().await.contains(a_addr_ref)
        })
        .await,
        "A and C never discovered each other"
    );

    for node in [&a, &b, &c] {
        let peers = node.known_peers().await;
        assert_eq!(peers.len(), 2, "unexpected peer set {:?}", peers);
        assert!(!peers.contains(&node.address().await));
    }

    a.stop().await?;
    b.stop().await?;
    c.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_unreachable_bootstrap_is_not_fatal() -> Result<()> {
    // Grab a free port, then release it so nothing listens there.
    let listener = std::net::TcpListener::bind("127.0.0.1:0")?;
    let dead = PeerAddress::from(listener.local_addr()?);
    drop(listener);

    let mut node = start_node(Some(dead)).await?;
    assert!(node.is_running());
    assert!(node.known_peers().await.is_empty());
    node.stop().await?;
    Ok(())
}

#[tokio::test]
async fn test_malformed_line_closes_only_that_connection() -> Result<()> {
    let mut node = start_node(None).await?;
    let own = node.address().await;
    let pending = node.create_transaction("alice", 1, TransactionKind::Exchange).await?;

    let stream = TcpStream::connect(own.to_connect_string()).await?;
    let (read, mut write) = stream.into_split();
    let mut lines = BufReader::new(read).lines();

    // The handshake announces the resolved port, never the requested 0.
    let first = lines.next_line().await?.expect("handshake line");
    let handshake = Envelope::from_json(&first)?;
    assert_eq!(handshake.kind, MessageKind::Discovery);
    assert_eq!(handshake.sender, own);

    write.write_all(b"this is not an envelope\n").await?;
    let closed = timeout(Duration::from_secs(5), lines.next_line()).await;
    assert!(matches!(closed, Ok(Ok(None)) | Ok(Err(_))), "connection stayed open");

    assert!(node.is_running());
    assert!(node.known_peers().await.is_empty());
    assert_eq!(node.state().pending_transactions().await, vec![pending]);
    assert_eq!(node.chain_view().await.len(), 1);

    // The listener keeps serving new connections.
    let stream = TcpStream::connect(own.to_connect_string()).await?;
    let mut lines = BufReader::new(stream).lines();
    let again = lines.next_line().await?.expect("handshake line");
    assert_eq!(Envelope::from_json(&again)?.sender, own);

    node.stop().await?;
    Ok(())
}
