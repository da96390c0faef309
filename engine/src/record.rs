//! Value buffers: the row representation the tracking core wraps.
//!
//! The core only needs a primary key and an independent copy of each row. The
//! [`RowBuffer`] trait captures that capability; [`Row`] is a JSON-column
//! implementation for hosts that have no mapping layer of their own.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::hash::Hash;

/// Capability interface of a column-keyed row buffer.
///
/// `Clone` must produce an independent buffer: the tracking core never
/// aliases a buffer across two changes.
pub trait RowBuffer: Clone + fmt::Debug {
    /// Primary key type identifying a logical row.
    type Key: Clone + Eq + Hash + Ord + fmt::Debug;
    /// Column value type.
    type Value;

    /// Primary key of this row.
    fn primary_key(&self) -> Self::Key;

    /// Read a column.
    fn get(&self, column: &str) -> Option<&Self::Value>;

    /// Write a column.
    fn set(&mut self, column: &str, value: Self::Value);
}

/// Primary key of a [`Row`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(untagged)]
pub enum RowKey {
    Int(i64),
    Text(String),
}

impl fmt::Display for RowKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RowKey::Int(v) => write!(f, "{v}"),
            RowKey::Text(v) => f.write_str(v),
        }
    }
}

impl From<i64> for RowKey {
    fn from(value: i64) -> Self {
        RowKey::Int(value)
    }
}

impl From<i32> for RowKey {
    fn from(value: i32) -> Self {
        RowKey::Int(i64::from(value))
    }
}

impl From<&str> for RowKey {
    fn from(value: &str) -> Self {
        RowKey::Text(value.to_string())
    }
}

impl From<String> for RowKey {
    fn from(value: String) -> Self {
        RowKey::Text(value)
    }
}

/// A row of JSON column values keyed by a primary key.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Row {
    /// Primary key, kept out of the column map so it cannot be rewritten
    key: RowKey,
    /// Column values ordered by column name
    columns: BTreeMap<String, serde_json::Value>,
}

impl Row {
    /// Create a row with no columns.
    pub fn new(key: impl Into<RowKey>) -> Self {
        Self {
            key: key.into(),
            columns: BTreeMap::new(),
        }
    }

    /// Builder-style column assignment.
    pub fn with(mut self, column: impl Into<String>, value: serde_json::Value) -> Self {
        self.columns.insert(column.into(), value);
        self
    }

    /// Primary key by reference.
    pub fn key(&self) -> &RowKey {
        &self.key
    }

    /// All columns.
    pub fn columns(&self) -> &BTreeMap<String, serde_json::Value> {
        &self.columns
    }
}

impl RowBuffer for Row {
    type Key = RowKey;
    type Value = serde_json::Value;

    fn primary_key(&self) -> RowKey {
        self.key.clone()
    }

    fn get(&self, column: &str) -> Option<&serde_json::Value> {
        self.columns.get(column)
    }

    fn set(&mut self, column: &str, value: serde_json::Value) {
        self.columns.insert(column.to_string(), value);
    }
}
