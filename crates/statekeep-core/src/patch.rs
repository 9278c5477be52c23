//! Typed document patches
//!
//! A patch is an ordered list of operations. `apply` is pure: it returns a new
//! document and leaves its input untouched, so a failed patch never leaves a
//! half-applied state behind.

use crate::error::{Error, Result};
use crate::types::Document;
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(tag = "op", rename_all = "snake_case")]
pub enum PatchOp {
    /// Replace (or insert) a top-level value.
    Set { key: String, value: Value },
    /// Set one field of a nested mapping. A missing key starts as `{}`.
    SetField {
        key: String,
        field: String,
        value: Value,
    },
    Remove { key: String },
    /// Add to an integer value. A missing key starts at 0.
    Increment { key: String, by: i64 },
    /// Push onto an array value. A missing key starts as `[]`.
    Append { key: String, value: Value },
}

impl PatchOp {
    pub fn key(&self) -> &str {
        match self {
            PatchOp::Set { key, .. }
            | PatchOp::SetField { key, .. }
            | PatchOp::Remove { key }
            | PatchOp::Increment { key, .. }
            | PatchOp::Append { key, .. } => key,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct DocumentPatch {
    pub ops: Vec<PatchOp>,
}

impl DocumentPatch {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Set {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn set_field(
        mut self,
        key: impl Into<String>,
        field: impl Into<String>,
        value: impl Into<Value>,
    ) -> Self {
        self.ops.push(PatchOp::SetField {
            key: key.into(),
            field: field.into(),
            value: value.into(),
        });
        self
    }

    pub fn remove(mut self, key: impl Into<String>) -> Self {
        self.ops.push(PatchOp::Remove { key: key.into() });
        self
    }

    pub fn increment(mut self, key: impl Into<String>, by: i64) -> Self {
        self.ops.push(PatchOp::Increment { key: key.into(), by });
        self
    }

    pub fn append(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.ops.push(PatchOp::Append {
            key: key.into(),
            value: value.into(),
        });
        self
    }

    pub fn is_empty(&self) -> bool {
        self.ops.is_empty()
    }

    /// Top-level keys this patch touches, in first-touched order.
    pub fn keys(&self) -> Vec<&str> {
        let mut keys: Vec<&str> = Vec::new();
        for op in &self.ops {
            if !keys.contains(&op.key()) {
                keys.push(op.key());
            }
        }
        keys
    }
}

/// Apply `patch` to a copy of `doc` and return the result.
pub fn apply(doc: &Document, patch: &DocumentPatch) -> Result<Document> {
    let mut next = doc.clone();
    for op in &patch.ops {
        apply_op(&mut next, op)?;
    }
    Ok(next)
}

fn apply_op(doc: &mut Document, op: &PatchOp) -> Result<()> {
    match op {
        PatchOp::Set { key, value } => {
            doc.insert(key.clone(), value.clone());
        }
        PatchOp::SetField { key, field, value } => {
            match doc.entry(key.clone()).or_insert_with(|| Value::Object(Map::new())) {
                Value::Object(map) => {
                    map.insert(field.clone(), value.clone());
                }
                other => {
                    return Err(Error::invalid_patch(
                        key,
                        format!("cannot set field `{}` on {}", field, type_name(other)),
                    ))
                }
            }
        }
        PatchOp::Remove { key } => {
            doc.remove(key);
        }
        PatchOp::Increment { key, by } => {
            let current = match doc.get(key) {
                None | Some(Value::Null) => 0,
                Some(Value::Number(n)) => n.as_i64().ok_or_else(|| {
                    Error::invalid_patch(key, format!("cannot increment non-integer {}", n))
                })?,
                Some(other) => {
                    return Err(Error::invalid_patch(
                        key,
                        format!("cannot increment {}", type_name(other)),
                    ))
                }
            };
            let next = current
                .checked_add(*by)
                .ok_or_else(|| Error::invalid_patch(key, "integer overflow"))?;
            doc.insert(key.clone(), Value::from(next));
        }
        PatchOp::Append { key, value } => {
            match doc.entry(key.clone()).or_insert_with(|| Value::Array(Vec::new())) {
                Value::Array(items) => items.push(value.clone()),
                other => {
                    return Err(Error::invalid_patch(
                        key,
                        format!("cannot append to {}", type_name(other)),
                    ))
                }
            }
        }
    }
    Ok(())
}

fn type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "a mapping",
    }
}
