//! Identity and signing primitives
//!
//! An identity is an asymmetric key pair. Its externally visible name is the
//! lowercase hex encoding of the public key, which doubles as the account
//! address in the ledger. Signatures are always produced over a payload
//! digest, never over structured data, and travel as lowercase hex.

pub mod hash;

use crate::error::{CryptoError, Result, StakechainError};
use ed25519_dalek::{Signer, Verifier};
use k256::elliptic_curve::sec1::ToEncodedPoint;
use serde::{Deserialize, Serialize};

const ED25519_PUBLIC_KEY_LEN: usize = 32;
const SECP256K1_PUBLIC_KEY_LEN: usize = 33;

/// Public key types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PublicKey {
    Ed25519(ed25519_dalek::VerifyingKey),
    Secp256k1(k256::PublicKey),
}

impl PublicKey {
    /// Get the key as bytes (compressed SEC1 for secp256k1)
    pub fn as_bytes(&self) -> Vec<u8> {
        match self {
            PublicKey::Ed25519(key) => key.as_bytes().to_vec(),
            PublicKey::Secp256k1(key) => key.to_encoded_point(true).as_bytes().to_vec(),
        }
    }

    /// Convert to the exported public key string
    pub fn to_hex(&self) -> String {
        hex::encode(self.as_bytes())
    }

    /// Parse an exported public key string. The key type is recovered from the
    /// encoded length.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidPublicKey {
            reason: "Invalid hex encoding".to_string(),
        })?;

        match bytes.len() {
            ED25519_PUBLIC_KEY_LEN => {
                let mut key_bytes = [0u8; ED25519_PUBLIC_KEY_LEN];
                key_bytes.copy_from_slice(&bytes);
                let key = ed25519_dalek::VerifyingKey::from_bytes(&key_bytes).map_err(|_| {
                    CryptoError::InvalidPublicKey {
                        reason: "Invalid Ed25519 key".to_string(),
                    }
                })?;
                Ok(PublicKey::Ed25519(key))
            },
            SECP256K1_PUBLIC_KEY_LEN => {
                let key = k256::PublicKey::from_sec1_bytes(&bytes).map_err(|_| {
                    CryptoError::InvalidPublicKey {
                        reason: "Invalid Secp256k1 key".to_string(),
                    }
                })?;
                Ok(PublicKey::Secp256k1(key))
            },
            other => Err(StakechainError::Crypto(CryptoError::InvalidPublicKey {
                reason: format!("Unexpected key length {}", other),
            })),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PublicKey::Ed25519(_) => KeyType::Ed25519,
            PublicKey::Secp256k1(_) => KeyType::Secp256k1,
        }
    }

    /// Verify a signature over `message`. Mismatched key and signature types
    /// simply fail verification.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        match (self, signature) {
            (PublicKey::Ed25519(pk), Signature::Ed25519(sig)) => pk.verify(message, sig).is_ok(),
            (PublicKey::Secp256k1(pk), Signature::Secp256k1(sig)) => {
                use k256::ecdsa::{signature::Verifier as _, VerifyingKey};
                let verifying_key = VerifyingKey::from(pk);
                verifying_key.verify(message, sig).is_ok()
            },
            _ => false,
        }
    }
}

/// Private key types. Deliberately not serializable.
#[derive(Clone)]
pub enum PrivateKey {
    Ed25519(ed25519_dalek::SigningKey),
    Secp256k1(k256::SecretKey),
}

impl std::fmt::Debug for PrivateKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "PrivateKey::{}(..)", self.key_type().as_str())
    }
}

impl PrivateKey {
    /// Get the corresponding public key
    pub fn public_key(&self) -> PublicKey {
        match self {
            PrivateKey::Ed25519(key) => PublicKey::Ed25519(key.verifying_key()),
            PrivateKey::Secp256k1(key) => PublicKey::Secp256k1(key.public_key()),
        }
    }

    pub fn key_type(&self) -> KeyType {
        match self {
            PrivateKey::Ed25519(_) => KeyType::Ed25519,
            PrivateKey::Secp256k1(_) => KeyType::Secp256k1,
        }
    }

    pub fn sign(&self, message: &[u8]) -> Signature {
        match self {
            PrivateKey::Ed25519(key) => Signature::Ed25519(key.sign(message)),
            PrivateKey::Secp256k1(key) => {
                use k256::ecdsa::{signature::Signer as _, SigningKey};
                let signing_key = SigningKey::from(key);
                let signature: k256::ecdsa::Signature = signing_key.sign(message);
                Signature::Secp256k1(signature)
            },
        }
    }
}

/// Signature types
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Signature {
    Ed25519(ed25519_dalek::Signature),
    Secp256k1(k256::ecdsa::Signature),
}

impl Signature {
    /// Convert to bytes
    pub fn to_bytes(&self) -> Vec<u8> {
        match self {
            Signature::Ed25519(sig) => sig.to_bytes().to_vec(),
            Signature::Secp256k1(sig) => sig.to_bytes().to_vec(),
        }
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.to_bytes())
    }

    /// Create from hex string
    pub fn from_hex(hex_str: &str, key_type: KeyType) -> Result<Self> {
        let bytes = hex::decode(hex_str).map_err(|_| CryptoError::InvalidSignature {
            reason: "Invalid hex encoding".to_string(),
        })?;

        match key_type {
            KeyType::Ed25519 => {
                let sig_bytes: [u8; 64] =
                    bytes.try_into().map_err(|_| CryptoError::InvalidSignature {
                        reason: "Invalid length for Ed25519".to_string(),
                    })?;
                Ok(Signature::Ed25519(ed25519_dalek::Signature::from_bytes(&sig_bytes)))
            },
            KeyType::Secp256k1 => {
                let sig = k256::ecdsa::Signature::from_slice(&bytes).map_err(|_| {
                    CryptoError::InvalidSignature {
                        reason: "Invalid Secp256k1 signature".to_string(),
                    }
                })?;
                Ok(Signature::Secp256k1(sig))
            },
        }
    }
}

/// Key types supported by the system
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum KeyType {
    #[default]
    Ed25519,
    Secp256k1,
}

impl KeyType {
    /// Get the string representation
    pub fn as_str(&self) -> &'static str {
        match self {
            KeyType::Ed25519 => "ed25519",
            KeyType::Secp256k1 => "secp256k1",
        }
    }
}

impl std::str::FromStr for KeyType {
    type Err = StakechainError;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_lowercase().as_str() {
            "ed25519" => Ok(KeyType::Ed25519),
            "secp256k1" => Ok(KeyType::Secp256k1),
            other => Err(StakechainError::config(format!("Unknown key type: {}", other))),
        }
    }
}

/// A key pair owned by exactly one process.
#[derive(Debug, Clone)]
pub struct KeyPair {
    private_key: PrivateKey,
    public_key: PublicKey,
}

impl KeyPair {
    /// Generate a fresh key pair
    pub fn generate(key_type: KeyType) -> Self {
        let mut rng = rand::rngs::OsRng;
        let private_key = match key_type {
            KeyType::Ed25519 => PrivateKey::Ed25519(ed25519_dalek::SigningKey::generate(&mut rng)),
            KeyType::Secp256k1 => PrivateKey::Secp256k1(k256::SecretKey::random(&mut rng)),
        };
        let public_key = private_key.public_key();
        Self {
            private_key,
            public_key,
        }
    }

    pub fn key_type(&self) -> KeyType {
        self.private_key.key_type()
    }

    pub fn public_key(&self) -> &PublicKey {
        &self.public_key
    }

    /// The public key string used as account address and wallet name
    pub fn export_public(&self) -> String {
        self.public_key.to_hex()
    }

    /// Sign `data` and return the hex-encoded signature
    pub fn sign(&self, data: &[u8]) -> String {
        self.private_key.sign(data).to_hex()
    }
}

/// Check `signature_hex` over `data` against an exported public key string.
///
/// Malformed keys and malformed signatures are reported as `false`, exactly
/// like a signature that does not match.
pub fn verify(public_key: &str, data: &[u8], signature_hex: &str) -> bool {
    let Ok(public_key) = PublicKey::from_hex(public_key) else {
        return false;
    };
    let Ok(signature) = Signature::from_hex(signature_hex, public_key.key_type()) else {
        return false;
    };
    public_key.verify(data, &signature)
}
