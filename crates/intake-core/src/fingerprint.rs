//! Content fingerprint over a designated, ordered subset of sections.
//!
//! Each section payload is canonicalized (object keys sorted at every depth, array order and
//! leaf values untouched), the ordered `[section_id, payload]` pairs are serialized as compact
//! JSON, and the bytes are hashed with BLAKE3.

use crate::error::IntakeError;
use crate::store::FormData;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::fmt;

/// Hex-encoded BLAKE3 digest of canonicalized section data.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Fingerprint(String);

impl Fingerprint {
    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn into_string(self) -> String {
        self.0
    }
}

impl fmt::Display for Fingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Rebuild `value` with every object's keys in lexicographic order.
pub fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            let mut sorted = Map::with_capacity(map.len());
            for key in keys {
                sorted.insert(key.clone(), canonicalize(&map[key.as_str()]));
            }
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        leaf => leaf.clone(),
    }
}

/// Canonical byte form of the designated sections, in the given order.
pub fn canonical_bytes(data: &FormData, section_ids: &[String]) -> Result<Vec<u8>, IntakeError> {
    let mut pairs = Vec::with_capacity(section_ids.len());
    for id in section_ids {
        let payload = data
            .get(id)
            .ok_or_else(|| IntakeError::UnknownSection(id.clone()))?;
        pairs.push(Value::Array(vec![
            Value::String(id.clone()),
            canonicalize(payload),
        ]));
    }

    Ok(serde_json::to_vec(&Value::Array(pairs))?)
}

pub fn fingerprint(data: &FormData, section_ids: &[String]) -> Result<Fingerprint, IntakeError> {
    let bytes = canonical_bytes(data, section_ids)?;
    Ok(Fingerprint(blake3::hash(&bytes).to_hex().to_string()))
}
