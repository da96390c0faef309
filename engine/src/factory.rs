//! Constructors for the four row lifecycle events.

use crate::{Change, RowAction, RowBuffer, TxId};

/// A row hydrated from physical storage: clean, stamped with `seed_id`.
pub fn initial<B: RowBuffer>(record: B, seed_id: TxId) -> Change<B> {
    Change {
        record,
        read_id: seed_id,
        write_id: seed_id,
        is_written: true,
        row_action: RowAction::None,
    }
}

/// A row inserted by transaction `tx_id` with no prior baseline entry.
pub fn new_change<B: RowBuffer>(record: B, tx_id: TxId) -> Change<B> {
    Change {
        record,
        read_id: tx_id,
        write_id: tx_id,
        is_written: false,
        row_action: RowAction::Insert,
    }
}

/// New values for `existing`, written by `write_id`. Keeps the read basis and
/// persistence flag of `existing`.
pub fn update<B: RowBuffer>(existing: &Change<B>, record: B, write_id: TxId) -> Change<B> {
    derive(existing, record, write_id, RowAction::Update)
}

/// Deletion of `existing` by `write_id`.
pub fn delete<B: RowBuffer>(existing: &Change<B>, record: B, write_id: TxId) -> Change<B> {
    derive(existing, record, write_id, RowAction::Delete)
}

fn derive<B: RowBuffer>(
    existing: &Change<B>,
    record: B,
    write_id: TxId,
    row_action: RowAction,
) -> Change<B> {
    Change {
        record,
        read_id: existing.read_id,
        write_id,
        is_written: existing.is_written,
        row_action,
    }
}
