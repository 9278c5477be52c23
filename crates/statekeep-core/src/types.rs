//! Core types for statekeep

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// A keyed state document. Keys are kept sorted so serialized output is stable.
pub type Document = Map<String, Value>;

/// Build a document from a JSON value, returning `None` unless it is an object.
pub fn document_from_value(value: Value) -> Option<Document> {
    match value {
        Value::Object(map) => Some(map),
        _ => None,
    }
}

/// One record in a bounded append log. Immutable once appended.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct LogEntry {
    /// Unix time in seconds.
    pub timestamp: f64,
    pub kind: String,
    pub payload: Map<String, Value>,
    /// Monotonic per log instance, starting at 1.
    pub sequence: u64,
}

impl LogEntry {
    pub fn get(&self, field: &str) -> Option<&Value> {
        self.payload.get(field)
    }
}

/// Observable lifecycle of a store's backing file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StoreState {
    /// File absent, just initialized with defaults, recovered from corruption, or reset.
    Fresh,
    /// File existed and parsed, or an update has been saved.
    Populated,
}

impl std::fmt::Display for StoreState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            StoreState::Fresh => write!(f, "fresh"),
            StoreState::Populated => write!(f, "populated"),
        }
    }
}
