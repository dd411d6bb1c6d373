//! Canonical payload encoding
//!
//! The payload of a signed entity is its JSON form with the `signature` field
//! present but blank. Field order follows struct declaration order, so every
//! peer derives the same bytes for the same entity. Building a payload never
//! touches the entity it was computed from.

use crate::crypto::hash::{sha256, sha256_hex};
use crate::error::{Result, SerializationError};
use serde::Serialize;
use serde_json::Value;

/// Name of the field blanked out when computing a payload
pub const SIGNATURE_FIELD: &str = "signature";

/// Canonical bytes of an entity with its signature blanked
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CanonicalBytes(Vec<u8>);

impl CanonicalBytes {
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    /// SHA-256 digest of the payload; this is what gets signed
    pub fn digest(&self) -> [u8; 32] {
        sha256(&self.0)
    }

    /// Lowercase hex SHA-256 of the payload; this is what blocks link by
    pub fn hash_hex(&self) -> String {
        sha256_hex(&self.0)
    }
}

/// Derive the canonical payload of `entity`.
pub fn payload<T: Serialize>(entity: &T) -> Result<CanonicalBytes> {
    let mut fields = match serde_json::to_value(entity)? {
        Value::Object(fields) => fields,
        other => {
            return Err(SerializationError::InvalidFormat {
                expected: "object".to_string(),
                actual: json_type_name(&other).to_string(),
            }
            .into())
        },
    };
    fields.insert(SIGNATURE_FIELD.to_string(), Value::String(String::new()));
    Ok(CanonicalBytes(serde_json::to_vec(&Value::Object(fields))?))
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
