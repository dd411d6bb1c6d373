//! Peer addressing

use crate::error::{NetworkError, StakechainError};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;
use std::str::FromStr;

/// Network address of a node, compared by host and port.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct PeerAddress {
    pub host: String,
    pub port: u16,
}

impl PeerAddress {
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
        }
    }

    /// `host:port` form accepted by `TcpStream::connect`
    pub fn to_connect_string(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }
}

impl fmt::Display for PeerAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.host, self.port)
    }
}

impl From<SocketAddr> for PeerAddress {
    fn from(addr: SocketAddr) -> Self {
        Self::new(addr.ip().to_string(), addr.port())
    }
}

impl FromStr for PeerAddress {
    type Err = StakechainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (host, port) = s.rsplit_once(':').ok_or_else(|| NetworkError::InvalidAddress {
            reason: format!("expected host:port, got '{}'", s),
        })?;
        if host.is_empty() {
            return Err(NetworkError::InvalidAddress {
                reason: "empty host".to_string(),
            }
            .into());
        }
        let port = port.parse().map_err(|_| NetworkError::InvalidAddress {
            reason: format!("invalid port '{}'", port),
        })?;
        Ok(Self::new(host, port))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_and_display() {
        let addr: PeerAddress = "localhost:10001".parse().unwrap();
        assert_eq!(addr, PeerAddress::new("localhost", 10001));
        assert_eq!(addr.to_string(), "localhost:10001");
    }

    #[test]
    fn test_invalid_addresses() {
        assert!("localhost".parse::<PeerAddress>().is_err());
        assert!(":80".parse::<PeerAddress>().is_err());
        assert!("host:notaport".parse::<PeerAddress>().is_err());
    }

    #[test]
    fn test_wire_shape() {
        let json = serde_json::to_string(&PeerAddress::new("10.0.0.1", 9000)).unwrap();
        assert_eq!(json, r#"{"host":"10.0.0.1","port":9000}"#);
    }
}
