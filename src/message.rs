//! Message envelopes exchanged between nodes

use crate::block::Block;
use crate::error::{Result, SerializationError, StakechainError, ValidationError};
use crate::network::PeerAddress;
use crate::transaction::Transaction;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;

/// Message kinds routed by the node
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MessageKind {
    /// Handshake / gossip refresh carrying the sender's known peers
    Discovery,
    /// A signed transaction for the pool
    Transaction,
    /// A forged block extending the sender's chain
    Block,
    /// Ask the receiver for its full chain
    ChainRequest,
    /// A full chain offered for adoption
    Chain,
}

impl fmt::Display for MessageKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MessageKind::Discovery => write!(f, "DISCOVERY"),
            MessageKind::Transaction => write!(f, "TRANSACTION"),
            MessageKind::Block => write!(f, "BLOCK"),
            MessageKind::ChainRequest => write!(f, "CHAIN_REQUEST"),
            MessageKind::Chain => write!(f, "CHAIN"),
        }
    }
}

/// `{sender, kind, payload}` wrapper, built fresh for every send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Envelope {
    pub sender: PeerAddress,
    pub kind: MessageKind,
    pub payload: Value,
}

impl Envelope {
    fn wrap<T: Serialize>(sender: PeerAddress, kind: MessageKind, payload: &T) -> Result<Self> {
        Ok(Self {
            sender,
            kind,
            payload: serde_json::to_value(payload)?,
        })
    }

    pub fn discovery(sender: PeerAddress, peers: &[PeerAddress]) -> Result<Self> {
        Self::wrap(sender, MessageKind::Discovery, &peers)
    }

    pub fn transaction(sender: PeerAddress, transaction: &Transaction) -> Result<Self> {
        Self::wrap(sender, MessageKind::Transaction, transaction)
    }

    pub fn block(sender: PeerAddress, block: &Block) -> Result<Self> {
        Self::wrap(sender, MessageKind::Block, block)
    }

    pub fn chain_request(sender: PeerAddress) -> Self {
        Self {
            sender,
            kind: MessageKind::ChainRequest,
            payload: Value::Null,
        }
    }

    pub fn chain(sender: PeerAddress, blocks: &[Block]) -> Result<Self> {
        Self::wrap(sender, MessageKind::Chain, &blocks)
    }

    /// Decode the payload into the type its kind carries.
    pub fn decode_payload<T: DeserializeOwned>(&self) -> std::result::Result<T, ValidationError> {
        serde_json::from_value(self.payload.clone()).map_err(|e| {
            ValidationError::malformed(format!("{} payload from {}: {}", self.kind, self.sender, e))
        })
    }

    /// Serialize to a single JSON line
    pub fn to_json(&self) -> Result<String> {
        serde_json::to_string(self)
            .map_err(|e| StakechainError::Serialization(SerializationError::Json(e)))
    }

    /// Deserialize from JSON
    pub fn from_json(json: &str) -> std::result::Result<Self, ValidationError> {
        serde_json::from_str(json).map_err(|e| ValidationError::malformed(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::transaction::TransactionKind;

    fn me() -> PeerAddress {
        PeerAddress::new("127.0.0.1", 10001)
    }

    #[test]
    fn test_kind_wire_names() {
        let json = serde_json::to_string(&MessageKind::ChainRequest).unwrap();
        assert_eq!(json, "\"CHAIN_REQUEST\"");
        assert_eq!(MessageKind::Discovery.to_string(), "DISCOVERY");
    }

    #[test]
    fn test_discovery_payload_decodes() {
        let peers = vec![PeerAddress::new("a", 1), PeerAddress::new("b", 2)];
        let envelope = Envelope::discovery(me(), &peers).unwrap();
        let line = envelope.to_json().unwrap();
        let decoded = Envelope::from_json(&line).unwrap();
        assert_eq!(decoded.kind, MessageKind::Discovery);
        assert_eq!(decoded.decode_payload::<Vec<PeerAddress>>().unwrap(), peers);
    }

    #[test]
    fn test_wrong_payload_shape_is_malformed() {
        let tx = Transaction::new("a", "b", 1, TransactionKind::Transfer);
        let envelope = Envelope::transaction(me(), &tx).unwrap();
        assert!(matches!(
            envelope.decode_payload::<Block>(),
            Err(ValidationError::MalformedMessage { .. })
        ));
    }

    #[test]
    fn test_garbage_line_is_malformed() {
        assert!(matches!(
            Envelope::from_json("{not json"),
            Err(ValidationError::MalformedMessage { .. })
        ));
        assert!(Envelope::from_json(r#"{"sender":{"host":"a","port":1},"kind":"PING","payload":null}"#).is_err());
    }
}
