//! Resolution of two snapshots of the same row into one.
//!
//! # Algorithm
//!
//! 1. Reject the incoming snapshot if the existing one already reflects a newer
//!    read basis (the only conflict condition, no value diffing)
//! 2. Pick the resulting action: a persisted row takes the incoming action, an
//!    unpersisted row keeps its own unless the incoming change deletes it, in
//!    which case both annihilate
//! 3. Build the resulting snapshot: incoming values and write stamp, the
//!    existing persistence flag, and a read basis that only advances at commit

use crate::{error::Result, Change, Error, RowAction, RowBuffer};

/// Which fold a resolution performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MergePhase {
    /// Two writes of one transaction folded into its private set
    Transaction,
    /// A transaction's change folded onto the shared baseline
    Commit,
}

/// Outcome of resolving two snapshots.
#[derive(Debug, Clone)]
pub enum Resolution<B> {
    Merged(Change<B>),
    /// An unpersisted row was deleted before it ever reached storage
    Annihilated,
}

impl<B> Resolution<B> {
    pub fn is_annihilated(&self) -> bool {
        matches!(self, Resolution::Annihilated)
    }
}

/// Fold `incoming` onto `existing`. Both must describe the same primary key.
pub fn resolve<B: RowBuffer>(
    existing: &Change<B>,
    incoming: Change<B>,
    phase: MergePhase,
) -> Result<Resolution<B>> {
    debug_assert!(existing.key() == incoming.key());

    if existing.read_id > incoming.read_id {
        return Err(Error::conflict(
            &incoming.key(),
            existing.read_id,
            incoming.read_id,
        ));
    }

    let row_action = if existing.is_written {
        incoming.row_action
    } else if incoming.row_action == RowAction::Delete {
        return Ok(Resolution::Annihilated);
    } else {
        existing.row_action
    };

    let read_id = match phase {
        MergePhase::Commit => incoming.write_id,
        MergePhase::Transaction => existing.read_id,
    };

    Ok(Resolution::Merged(Change {
        record: incoming.record,
        read_id,
        write_id: incoming.write_id,
        is_written: existing.is_written,
        row_action,
    }))
}
