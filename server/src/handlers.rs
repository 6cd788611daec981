//! Handler registry and the two required handlers, `search` and `ping`.
//! Registration is an explicit `registry.register(class, handler)` call at
//! startup rather than decorator sugar.

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::warn;

use bloomdex_core::query::eval;
use bloomdex_core::IndexStore;

/// A registered message handler. Handlers return any JSON value; the
/// dispatcher applies the JSON-output wrapping contract, so a handler need
/// not wrap its own result in `{"response": ...}`.
#[async_trait]
pub trait Handler: Send + Sync {
    async fn handle(&self, payload: &str, store: &IndexStore) -> serde_json::Value;
}

/// Populated once at startup and never mutated afterward — read-only for the
/// lifetime of the server, so no lock is required.
#[derive(Clone, Default)]
pub struct HandlerRegistry {
    handlers: HashMap<String, Arc<dyn Handler>>,
}

impl HandlerRegistry {
    pub fn new() -> Self {
        Self { handlers: HashMap::new() }
    }

    pub fn register(&mut self, class: impl Into<String>, handler: Arc<dyn Handler>) {
        self.handlers.insert(class.into(), handler);
    }

    pub fn get(&self, class: &str) -> Option<Arc<dyn Handler>> {
        self.handlers.get(class).cloned()
    }

    /// The set of class names this registry can dispatch to — doubles as the
    /// set of known handler tags the frame parser requires a closing tag to
    /// name.
    pub fn known_classes(&self) -> Vec<String> {
        self.handlers.keys().cloned().collect()
    }
}

/// Wraps a handler's result per the JSON-output contract: an object passes
/// through unchanged; anything else becomes `{"response": value}`.
pub fn wrap_json_output(value: serde_json::Value) -> serde_json::Value {
    if value.is_object() {
        value
    } else {
        serde_json::json!({ "response": value })
    }
}

#[derive(Debug, Deserialize)]
struct SearchInput {
    bloom_source: String,
    files: String,
    query: bloomdex_core::Query,
}

/// `search`: decodes the payload as JSON, validates `bloom_source`/`files`/
/// `query`, and returns the matched shard ids as a JSON array.
pub struct SearchHandler;

#[async_trait]
impl Handler for SearchHandler {
    async fn handle(&self, payload: &str, store: &IndexStore) -> serde_json::Value {
        let input: SearchInput = match serde_json::from_str(payload) {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, "invalid search_input payload");
                return serde_json::json!({ "error": "Invalid search_input" });
            }
        };

        let mut shard_ids: Vec<String> =
            eval(store, &input.bloom_source, &input.files, &input.query).await.into_iter().collect();
        // The result is logically a set; sorting gives a stable wire order
        // across identical inputs without claiming any particular
        // significance for the order itself.
        shard_ids.sort();
        serde_json::Value::Array(shard_ids.into_iter().map(serde_json::Value::String).collect())
    }
}

/// `ping`: the literal string `"alive"`, wrapped by the JSON-output contract.
pub struct PingHandler;

#[async_trait]
impl Handler for PingHandler {
    async fn handle(&self, _payload: &str, _store: &IndexStore) -> serde_json::Value {
        serde_json::Value::String("alive".to_string())
    }
}

/// Builds the registry with the required handlers.
pub fn default_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::new();
    registry.register("search", Arc::new(SearchHandler));
    registry.register("ping", Arc::new(PingHandler));
    registry
}
