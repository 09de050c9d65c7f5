//! Param remapping between an organ's operation and a native tool.

use std::collections::HashMap;

use serde_json::{Map, Value};

/// Pure transform from the primary's params to a tool's params.
pub type ParamMapper = fn(&Map<String, Value>) -> Map<String, Value>;

/// Mappers keyed by (source resource, target tool). Unregistered pairs pass
/// params through unchanged.
#[derive(Debug, Clone, Default)]
pub struct ParamMapperRegistry {
    mappers: HashMap<(String, String), ParamMapper>,
}

impl ParamMapperRegistry {
    /// Registry with no mappers; every pair is identity.
    pub fn empty() -> Self {
        Self::default()
    }

    /// Registry preloaded with the bundled mappers.
    pub fn with_builtins() -> Self {
        let mut registry = Self::empty();
        registry.register("gmail", "archon:send_email", gmail_to_send_email);
        registry.register("bitcoin", "archon:blockchain_query", bitcoin_to_blockchain_query);
        registry
    }

    pub fn register(&mut self, source: &str, tool: &str, mapper: ParamMapper) {
        self.mappers.insert((source.to_string(), tool.to_string()), mapper);
    }

    pub fn map(&self, source: &str, tool: &str, params: &Map<String, Value>) -> Map<String, Value> {
        match self.mappers.get(&(source.to_string(), tool.to_string())) {
            Some(mapper) => mapper(params),
            None => params.clone(),
        }
    }
}

fn gmail_to_send_email(params: &Map<String, Value>) -> Map<String, Value> {
    ["to", "subject", "body"]
        .iter()
        .filter_map(|field| params.get(*field).map(|v| (field.to_string(), v.clone())))
        .collect()
}

fn bitcoin_to_blockchain_query(params: &Map<String, Value>) -> Map<String, Value> {
    let mut mapped = Map::new();
    mapped.insert("query_type".into(), Value::String("transaction".into()));
    mapped.insert(
        "tx_hash".into(),
        params.get("tx_hash").cloned().unwrap_or(Value::Null),
    );
    mapped
}
