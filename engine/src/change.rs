//! Row changes: one row's pending or committed mutation plus its version
//! stamps.

use crate::{RowBuffer, TxId};
use serde::{Deserialize, Serialize};
use std::hash::{Hash, Hasher};

/// Pending mutation kind of a row snapshot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RowAction {
    /// No pending mutation
    #[default]
    None,
    Insert,
    Update,
    Delete,
}

/// Snapshot of one row.
///
/// Set membership is decided by primary key alone: `PartialEq` and `Hash`
/// ignore versions and content. Use [`Change::same_content`] to compare every
/// field.
///
/// Invariant: `read_id <= write_id`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Change<B> {
    pub(crate) record: B,
    pub(crate) read_id: TxId,
    pub(crate) write_id: TxId,
    pub(crate) is_written: bool,
    pub(crate) row_action: RowAction,
}

impl<B: RowBuffer> Change<B> {
    /// The row values.
    pub fn record(&self) -> &B {
        &self.record
    }

    /// Primary key of the wrapped row.
    pub fn key(&self) -> B::Key {
        self.record.primary_key()
    }

    /// Transaction version the snapshot's basis was established at.
    pub fn read_id(&self) -> TxId {
        self.read_id
    }

    /// Transaction version that produced the snapshot.
    pub fn write_id(&self) -> TxId {
        self.write_id
    }

    /// Whether this exact value has been durably persisted.
    pub fn is_written(&self) -> bool {
        self.is_written
    }

    pub fn row_action(&self) -> RowAction {
        self.row_action
    }

    /// Persisted and without a pending mutation.
    pub fn is_clean(&self) -> bool {
        self.is_written && self.row_action == RowAction::None
    }

    /// Record that this value reached physical storage.
    pub fn mark_as_written(&mut self) {
        self.is_written = true;
        self.row_action = RowAction::None;
    }

    /// Primary key, version stamps and flags all equal. Row values are not
    /// compared.
    pub fn same_stamps(&self, other: &Self) -> bool {
        self.key() == other.key()
            && self.read_id == other.read_id
            && self.write_id == other.write_id
            && self.is_written == other.is_written
            && self.row_action == other.row_action
    }
}

impl<B: RowBuffer + PartialEq> Change<B> {
    /// Every field equal, row values included.
    pub fn same_content(&self, other: &Self) -> bool {
        self.same_stamps(other) && self.record == other.record
    }
}

impl<B: RowBuffer> PartialEq for Change<B> {
    fn eq(&self, other: &Self) -> bool {
        self.key() == other.key()
    }
}

impl<B: RowBuffer> Eq for Change<B> {}

impl<B: RowBuffer> Hash for Change<B> {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.key().hash(state);
    }
}
