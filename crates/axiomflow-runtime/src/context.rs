use std::collections::BTreeMap;
use std::sync::Arc;

use serde_json::Value;
use sha2::{Digest, Sha256};

use axiomflow_core::error::{AxiomError, Result};

pub type ContextData = BTreeMap<String, Value>;

/// Immutable bundle handed between agents, with a content hash fixed at
/// construction.
#[derive(Debug, Clone, PartialEq)]
pub struct Context {
    data: Arc<ContextData>,
    hash: String,
}

impl Context {
    pub fn new<I, K>(entries: I) -> Self
    where
        I: IntoIterator<Item = (K, Value)>,
        K: Into<String>,
    {
        Self::from_map(entries.into_iter().map(|(k, v)| (k.into(), v)).collect())
    }

    pub fn from_map(data: ContextData) -> Self {
        let hash = content_hash(&data);
        Self {
            data: Arc::new(data),
            hash,
        }
    }

    /// Build from a JSON object. Any other value is rejected.
    pub fn from_value(value: Value) -> Result<Self> {
        match value {
            Value::Object(map) => Ok(Self::from_map(map.into_iter().collect())),
            other => Err(AxiomError::Execution(format!(
                "context must be a JSON object, got {}",
                type_name(&other)
            ))),
        }
    }

    pub fn data(&self) -> &ContextData {
        &self.data
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.data.get(key)
    }

    /// Hex SHA-256 of the canonical serialization.
    pub fn hash(&self) -> &str {
        &self.hash
    }

    pub fn canonical_bytes(&self) -> Vec<u8> {
        canonical_bytes(&self.data)
    }
}

/// Compact JSON with object keys sorted at every depth.
pub fn canonical_bytes(data: &ContextData) -> Vec<u8> {
    let object: serde_json::Map<String, Value> = data
        .iter()
        .map(|(k, v)| (k.clone(), canonicalize(v)))
        .collect();
    // Serializing a Value cannot fail
    serde_json::to_vec(&Value::Object(object)).unwrap_or_default()
}

pub fn content_hash(data: &ContextData) -> String {
    hex::encode(Sha256::digest(canonical_bytes(data)))
}

fn canonicalize(value: &Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut keys: Vec<&String> = map.keys().collect();
            keys.sort();
            Value::Object(
                keys.into_iter()
                    .map(|k| (k.clone(), canonicalize(&map[k])))
                    .collect(),
            )
        }
        Value::Array(items) => Value::Array(items.iter().map(canonicalize).collect()),
        other => other.clone(),
    }
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
