use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

// =============================================================================
// Operation
// =============================================================================

/// A caller-submitted unit of work description.
///
/// Immutable once built; the executor takes it by value and consumes it.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Operation {
    /// Unique operation ID.
    id: String,
    /// Operation type (e.g., "content.create").
    operation_type: String,
    /// Payload handed to the unit of work.
    payload: Value,
    /// Capabilities the caller must hold, in addition to the profile's.
    required_capabilities: BTreeSet<String>,
    /// Optional deduplication key.
    idempotency_key: Option<String>,
}

impl Operation {
    /// Create a new operation with a JSON payload.
    pub fn new(operation_type: impl Into<String>, payload: Value) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            operation_type: operation_type.into(),
            payload,
            required_capabilities: BTreeSet::new(),
            idempotency_key: None,
        }
    }

    /// Require a capability.
    pub fn require(mut self, capability: impl Into<String>) -> Self {
        self.required_capabilities.insert(capability.into());
        self
    }

    /// Attach an idempotency key.
    pub fn with_idempotency_key(mut self, key: impl Into<String>) -> Self {
        self.idempotency_key = Some(key.into());
        self
    }

    /// Override the generated ID.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn operation_type(&self) -> &str {
        &self.operation_type
    }

    pub fn payload(&self) -> &Value {
        &self.payload
    }

    pub fn required_capabilities(&self) -> &BTreeSet<String> {
        &self.required_capabilities
    }

    pub fn idempotency_key(&self) -> Option<&str> {
        self.idempotency_key.as_deref()
    }

    /// Split into descriptor and payload.
    pub fn into_parts(self) -> (OperationMeta, Value) {
        let meta = OperationMeta {
            id: self.id,
            operation_type: self.operation_type,
            required_capabilities: self.required_capabilities,
            idempotency_key: self.idempotency_key,
        };
        (meta, self.payload)
    }
}

/// Everything about an operation except its payload.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationMeta {
    pub id: String,
    pub operation_type: String,
    pub required_capabilities: BTreeSet<String>,
    pub idempotency_key: Option<String>,
}

/// Join key parts with `:`, escaping `\` and `:` inside each part so
/// distinct part lists never produce the same key.
pub fn composite_key(parts: &[&str]) -> String {
    let mut key = String::new();
    for (i, part) in parts.iter().enumerate() {
        if i > 0 {
            key.push(':');
        }
        for c in part.chars() {
            if c == '\\' || c == ':' {
                key.push('\\');
            }
            key.push(c);
        }
    }
    key
}
