//! Change sets: the per-key state of every tracked row.
//!
//! A change set maps primary keys to [`Change`] snapshots and remembers
//! dangling keys, rows the baseline used to hold that were removed by a
//! committed transaction. Entries are kept in key order so that merges and
//! adapter batches are deterministic.

use crate::{
    error::Result,
    merge::{self, MergePhase, Resolution},
    Change, Error, RowAction, RowBuffer, TxId, INIT_ID,
};
use std::collections::{BTreeMap, BTreeSet};

/// Primary key to change mapping plus the dangling-key set.
#[derive(Debug, Clone)]
pub struct ChangeSet<B: RowBuffer> {
    changes: BTreeMap<B::Key, Change<B>>,
    dangling: BTreeSet<B::Key>,
}

/// Result of [`ChangeSet::merge`].
#[derive(Debug, Clone)]
pub struct MergeOutcome<B: RowBuffer> {
    /// The merged set
    pub changes: ChangeSet<B>,
    /// Keys whose pending insert was annihilated by an incoming delete
    pub removed: Vec<B::Key>,
}

impl<B: RowBuffer> MergeOutcome<B> {
    /// Fold the removed keys into the dangling set and return the merged set.
    pub fn into_baseline(self) -> ChangeSet<B> {
        let mut changes = self.changes;
        changes.dangling.extend(self.removed);
        changes
    }
}

impl<B: RowBuffer> Default for ChangeSet<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RowBuffer> ChangeSet<B> {
    /// Create an empty change set.
    pub fn new() -> Self {
        Self {
            changes: BTreeMap::new(),
            dangling: BTreeSet::new(),
        }
    }

    /// Get the change tracked for a key.
    pub fn get(&self, key: &B::Key) -> Option<&Change<B>> {
        self.changes.get(key)
    }

    pub fn contains_key(&self, key: &B::Key) -> bool {
        self.changes.contains_key(key)
    }

    /// Number of tracked rows.
    pub fn len(&self) -> usize {
        self.changes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.changes.is_empty()
    }

    /// All changes in key order.
    pub fn iter(&self) -> impl Iterator<Item = &Change<B>> {
        self.changes.values()
    }

    /// Changes that still have to reach storage.
    pub fn pending(&self) -> Vec<Change<B>> {
        self.changes
            .values()
            .filter(|c| !c.is_clean())
            .cloned()
            .collect()
    }

    pub fn dangling_keys(&self) -> impl Iterator<Item = &B::Key> {
        self.dangling.iter()
    }

    pub fn is_dangling(&self, key: &B::Key) -> bool {
        self.dangling.contains(key)
    }

    pub fn add_dangling(&mut self, key: B::Key) {
        self.dangling.insert(key);
    }

    /// Forget a dangling key because a fresh insert brings the row back.
    /// Returns whether the key was dangling.
    pub fn revive(&mut self, key: &B::Key) -> bool {
        self.dangling.remove(key)
    }

    /// Drop the entry for a key without any merge, returning it.
    pub fn discard(&mut self, key: &B::Key) -> Option<Change<B>> {
        self.changes.remove(key)
    }

    /// Fold a change written inside one transaction.
    ///
    /// When the tracked entry was written by the same transaction the two are
    /// resolved and the entry is replaced, or removed if they annihilate.
    /// Otherwise the incoming change replaces the entry outright.
    pub fn add(&mut self, incoming: Change<B>) -> Result<()> {
        let key = incoming.key();

        let same_writer = self
            .changes
            .get(&key)
            .is_some_and(|existing| existing.write_id == incoming.write_id);
        if !same_writer {
            self.changes.insert(key, incoming);
            return Ok(());
        }

        let existing = &self.changes[&key];
        match merge::resolve(existing, incoming, MergePhase::Transaction)? {
            Resolution::Merged(change) => {
                self.changes.insert(key, change);
            }
            Resolution::Annihilated => {
                tracing::debug!(key = ?key, "pending insert annihilated inside transaction");
                self.changes.remove(&key);
            }
        }

        Ok(())
    }

    /// Fold a transaction's set (`incoming`) onto the baseline (`existing`).
    ///
    /// Fails without side effects on the first conflicting or illegitimate
    /// row. The merged set carries `incoming`'s dangling keys.
    pub fn merge(existing: &ChangeSet<B>, incoming: ChangeSet<B>) -> Result<MergeOutcome<B>> {
        let ChangeSet {
            changes: incoming_changes,
            dangling,
        } = incoming;

        let mut merged = existing.changes.clone();
        let mut removed = Vec::new();

        for (key, change) in incoming_changes {
            match merged.get(&key) {
                Some(current) => match merge::resolve(current, change, MergePhase::Commit)? {
                    Resolution::Merged(change) => {
                        merged.insert(key, change);
                    }
                    Resolution::Annihilated => {
                        merged.remove(&key);
                        removed.push(key);
                    }
                },
                None => {
                    let provenance =
                        change.row_action == RowAction::Insert || change.write_id == INIT_ID;
                    if !provenance || dangling.contains(&key) {
                        return Err(Error::non_existing(&key));
                    }
                    merged.insert(key, change);
                }
            }
        }

        Ok(MergeOutcome {
            changes: ChangeSet {
                changes: merged,
                dangling,
            },
            removed,
        })
    }

    /// Replace entries and dangling keys in place with those of `other`.
    pub fn replace_range(&mut self, other: ChangeSet<B>) {
        self.changes = other.changes;
        self.dangling = other.dangling;
    }

    /// Independent deep copy.
    pub fn copy(&self) -> Self {
        self.clone()
    }

    /// The entries written by `tx_id`, with this set's dangling keys.
    pub fn authored_by(&self, tx_id: TxId) -> Self {
        Self {
            changes: self
                .changes
                .iter()
                .filter(|(_, c)| c.write_id == tx_id)
                .map(|(k, c)| (k.clone(), c.clone()))
                .collect(),
            dangling: self.dangling.clone(),
        }
    }

    /// Record that every entry reached storage: deletes are dropped, the rest
    /// become clean, and dangling keys are forgotten.
    pub fn mark_as_written(&mut self) {
        self.changes
            .retain(|_, c| c.row_action != RowAction::Delete);
        for change in self.changes.values_mut() {
            change.mark_as_written();
        }
        self.dangling.clear();
    }

    /// Reconcile the set with a batch the adapter has persisted.
    ///
    /// Entries still identical to what was persisted are marked as written.
    /// Entries a commit replaced while the batch was in flight stay pending,
    /// re-based on what storage now holds: a row storage has is never inserted
    /// again, a row storage dropped is inserted afresh. A persisted row whose
    /// entry was annihilated in the meantime comes back as a pending delete
    /// stamped `stamp`, so the next flush removes it from storage.
    ///
    /// Returns the number of entries marked or dropped.
    pub fn mark_flushed(&mut self, flushed: &[Change<B>], stamp: TxId) -> usize {
        let mut marked = 0;

        for written in flushed {
            let key = written.key();
            let stored = written.row_action != RowAction::Delete;

            let (same, action) = match self.changes.get(&key) {
                Some(current) => (current.same_stamps(written), current.row_action),
                None => {
                    if stored {
                        tracing::debug!(
                            key = ?key,
                            "flushed row annihilated meanwhile, scheduling delete"
                        );
                        self.dangling.remove(&key);
                        self.changes.insert(
                            key,
                            Change {
                                record: written.record.clone(),
                                read_id: stamp,
                                write_id: stamp,
                                is_written: true,
                                row_action: RowAction::Delete,
                            },
                        );
                    }
                    continue;
                }
            };

            if action == RowAction::Delete && (same || !stored) {
                self.changes.remove(&key);
                marked += usize::from(same);
                continue;
            }

            let Some(current) = self.changes.get_mut(&key) else {
                continue;
            };
            if same {
                current.mark_as_written();
                marked += 1;
            } else if stored {
                current.is_written = true;
                if action == RowAction::Insert {
                    current.row_action = RowAction::Update;
                }
            } else {
                current.is_written = false;
                current.row_action = RowAction::Insert;
            }
        }

        // Nothing left in flight: same end state as mark_as_written
        if self.changes.values().all(Change::is_clean) {
            self.dangling.clear();
        }

        marked
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{factory, Row, RowKey};
    use serde_json::json;

    fn row(key: i64, n: i64) -> Row {
        Row::new(key).with("n", json!(n))
    }

    fn baseline(keys: &[i64], id: TxId) -> ChangeSet<Row> {
        let mut set = ChangeSet::new();
        for &k in keys {
            set.add(factory::initial(row(k, 0), id)).unwrap();
        }
        set
    }

    #[test]
    fn add_replaces_foreign_snapshot() {
        let mut set = baseline(&[1], 5);
        let base = set.get(&RowKey::Int(1)).unwrap().clone();

        set.add(factory::update(&base, row(1, 2), 6)).unwrap();

        let change = set.get(&RowKey::Int(1)).unwrap();
        assert_eq!(change.write_id(), 6);
        assert_eq!(change.read_id(), 5);
        assert_eq!(change.row_action(), RowAction::Update);
    }

    #[test]
    fn add_folds_same_transaction_writes() {
        let mut set = ChangeSet::new();
        let insert = factory::new_change(row(1, 1), 3);
        set.add(insert.clone()).unwrap();
        set.add(factory::update(&insert, row(1, 2), 3)).unwrap();

        let change = set.get(&RowKey::Int(1)).unwrap();
        assert_eq!(change.row_action(), RowAction::Insert);
        assert_eq!(change.record().get("n"), Some(&json!(2)));
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn insert_then_delete_annihilates() {
        let mut set = ChangeSet::new();
        let insert = factory::new_change(row(1, 1), 1);
        set.add(insert.clone()).unwrap();
        set.add(factory::delete(&insert, row(1, 2), 1)).unwrap();

        assert!(!set.contains_key(&RowKey::Int(1)));
        assert!(set.is_empty());
    }

    #[test]
    fn merge_advances_read_basis() {
        let existing = baseline(&[1, 2], 5);
        let mut private = existing.copy();
        let base = private.get(&RowKey::Int(1)).unwrap().clone();
        private.add(factory::update(&base, row(1, 9), 6)).unwrap();

        let outcome = ChangeSet::merge(&existing, private.authored_by(6)).unwrap();
        assert!(outcome.removed.is_empty());

        let merged = outcome.into_baseline();
        let change = merged.get(&RowKey::Int(1)).unwrap();
        assert_eq!(change.read_id(), 6);
        assert_eq!(change.write_id(), 6);
        assert_eq!(change.row_action(), RowAction::Update);
        assert!(merged.get(&RowKey::Int(2)).unwrap().is_clean());
    }

    #[test]
    fn merge_rejects_update_of_unknown_row() {
        let existing = baseline(&[1], 5);
        let ghost = factory::initial(row(7, 0), 5);
        let mut incoming = ChangeSet::new();
        incoming.add(factory::update(&ghost, row(7, 1), 6)).unwrap();

        let err = ChangeSet::merge(&existing, incoming).unwrap_err();
        assert!(matches!(err, Error::NonExistingRow { .. }));
        assert!(!err.is_retryable());

        let mut incoming = ChangeSet::new();
        incoming.add(factory::delete(&ghost, row(7, 1), 6)).unwrap();
        assert!(ChangeSet::merge(&existing, incoming).is_err());
    }

    #[test]
    fn merge_accepts_seeded_rows() {
        let existing = ChangeSet::new();
        let incoming = baseline(&[1, 2, 3], INIT_ID);

        let merged = ChangeSet::merge(&existing, incoming).unwrap().into_baseline();
        assert_eq!(merged.len(), 3);
        assert!(merged.iter().all(Change::is_clean));
    }

    #[test]
    fn merge_rejects_insert_of_dangling_key() {
        let existing = ChangeSet::new();
        let mut incoming = ChangeSet::new();
        incoming.add(factory::new_change(row(4, 1), 2)).unwrap();
        incoming.add_dangling(RowKey::Int(4));

        let err = ChangeSet::merge(&existing, incoming).unwrap_err();
        assert!(matches!(err, Error::NonExistingRow { .. }));
    }

    #[test]
    fn merge_reports_annihilated_keys() {
        let mut existing = ChangeSet::new();
        existing.add(factory::new_change(row(1, 1), 2)).unwrap();
        let pending = existing.get(&RowKey::Int(1)).unwrap().clone();

        let mut incoming = existing.copy();
        incoming.add(factory::delete(&pending, row(1, 1), 3)).unwrap();

        let outcome = ChangeSet::merge(&existing, incoming.authored_by(3)).unwrap();
        assert_eq!(outcome.removed, vec![RowKey::Int(1)]);

        let merged = outcome.into_baseline();
        assert!(merged.is_empty());
        assert!(merged.is_dangling(&RowKey::Int(1)));
    }

    #[test]
    fn merge_takes_incoming_dangling_keys() {
        let mut existing = baseline(&[1], 5);
        existing.add_dangling(RowKey::Int(8));
        let mut incoming = ChangeSet::new();
        incoming.add_dangling(RowKey::Int(9));

        let merged = ChangeSet::merge(&existing, incoming).unwrap().into_baseline();
        assert_eq!(merged.len(), 1);
        assert!(!merged.is_dangling(&RowKey::Int(8)));
        assert!(merged.is_dangling(&RowKey::Int(9)));
    }

    #[test]
    fn failed_merge_leaves_existing_untouched() {
        let existing = baseline(&[1, 2], 5);
        let mut incoming = ChangeSet::new();
        incoming.add(factory::new_change(row(0, 1), 6)).unwrap();
        let ghost = factory::initial(row(3, 0), 5);
        incoming.add(factory::update(&ghost, row(3, 1), 6)).unwrap();

        assert!(ChangeSet::merge(&existing, incoming).is_err());
        assert_eq!(existing.len(), 2);
        assert!(!existing.contains_key(&RowKey::Int(0)));
    }

    #[test]
    fn replace_range_swaps_contents() {
        let mut target = baseline(&[1], 5);
        let mut source = baseline(&[2, 3], 5);
        source.add_dangling(RowKey::Int(1));

        target.replace_range(source);
        assert_eq!(target.len(), 2);
        assert!(!target.contains_key(&RowKey::Int(1)));
        assert!(target.is_dangling(&RowKey::Int(1)));
    }

    #[test]
    fn copy_is_independent() {
        let original = baseline(&[1], 5);
        let mut copy = original.copy();
        copy.add(factory::new_change(row(2, 0), 6)).unwrap();
        copy.add_dangling(RowKey::Int(3));

        assert_eq!(original.len(), 1);
        assert!(!original.is_dangling(&RowKey::Int(3)));
    }

    #[test]
    fn mark_as_written_flushes_and_is_idempotent() {
        let mut set = baseline(&[1, 2], 5);
        let one = set.get(&RowKey::Int(1)).unwrap().clone();
        let two = set.get(&RowKey::Int(2)).unwrap().clone();
        set.add(factory::update(&one, row(1, 1), 6)).unwrap();
        set.add(factory::delete(&two, row(2, 0), 6)).unwrap();
        set.add(factory::new_change(row(3, 0), 6)).unwrap();
        set.add_dangling(RowKey::Int(9));

        set.mark_as_written();
        assert_eq!(set.len(), 2);
        assert!(!set.contains_key(&RowKey::Int(2)));
        assert!(set.iter().all(Change::is_clean));
        assert_eq!(set.dangling_keys().count(), 0);

        let before: Vec<_> = set.iter().cloned().collect();
        set.mark_as_written();
        let after: Vec<_> = set.iter().cloned().collect();
        assert_eq!(before.len(), after.len());
        assert!(before.iter().zip(&after).all(|(a, b)| a.same_content(b)));
    }

    #[test]
    fn mark_flushed_skips_rewritten_entries() {
        let mut set = ChangeSet::new();
        set.add(factory::new_change(row(1, 1), 2)).unwrap();
        set.add(factory::new_change(row(2, 1), 2)).unwrap();
        let flushed = set.pending();

        // A later commit rewrites row 2 before the flush completes
        let current = set.get(&RowKey::Int(2)).unwrap().clone();
        set.add(factory::update(&current, row(2, 5), 3)).unwrap();

        assert_eq!(set.mark_flushed(&flushed, 4), 1);
        assert!(set.get(&RowKey::Int(1)).unwrap().is_clean());

        let rewritten = set.get(&RowKey::Int(2)).unwrap();
        assert!(!rewritten.is_clean());
        assert!(rewritten.is_written());
        assert_eq!(rewritten.row_action(), RowAction::Update);
        assert_eq!(set.pending().len(), 1);
    }

    #[test]
    fn mark_flushed_turns_rewritten_insert_into_update() {
        let mut set = ChangeSet::new();
        set.add(factory::new_change(row(1, 1), 2)).unwrap();
        let flushed = set.pending();

        // Commit 3 updates the pending insert: the merged entry stays an insert
        let mut incoming = set.copy();
        let current = incoming.get(&RowKey::Int(1)).unwrap().clone();
        incoming.add(factory::update(&current, row(1, 9), 3)).unwrap();
        let mut set = ChangeSet::merge(&set, incoming.authored_by(3))
            .unwrap()
            .into_baseline();
        assert_eq!(set.get(&RowKey::Int(1)).unwrap().row_action(), RowAction::Insert);

        assert_eq!(set.mark_flushed(&flushed, 4), 0);
        let change = set.get(&RowKey::Int(1)).unwrap();
        assert!(change.is_written());
        assert_eq!(change.row_action(), RowAction::Update);
        assert_eq!(change.record().get("n"), Some(&json!(9)));
    }

    #[test]
    fn mark_flushed_restores_delete_of_annihilated_row() {
        let mut set = ChangeSet::new();
        set.add(factory::new_change(row(1, 1), 2)).unwrap();
        let flushed = set.pending();

        // Commit 3 deletes the still-unwritten insert, annihilating it
        let mut incoming = set.copy();
        let current = incoming.get(&RowKey::Int(1)).unwrap().clone();
        incoming.add(factory::delete(&current, row(1, 1), 3)).unwrap();
        let outcome = ChangeSet::merge(&set, incoming.authored_by(3)).unwrap();
        assert_eq!(outcome.removed, vec![RowKey::Int(1)]);
        let mut set = outcome.into_baseline();
        assert!(set.is_empty());

        assert_eq!(set.mark_flushed(&flushed, 4), 0);
        let change = set.get(&RowKey::Int(1)).unwrap();
        assert_eq!(change.row_action(), RowAction::Delete);
        assert!(change.is_written());
        assert_eq!(change.read_id(), 4);
        assert_eq!(change.write_id(), 4);
        assert!(!set.is_dangling(&RowKey::Int(1)));

        // The follow-up flush removes the entry for good
        let next = set.pending();
        assert_eq!(set.mark_flushed(&next, 5), 1);
        assert!(set.is_empty());
    }

    #[test]
    fn mark_flushed_reinserts_row_dropped_by_flushed_delete() {
        let mut set = baseline(&[1], 1);
        let current = set.get(&RowKey::Int(1)).unwrap().clone();
        set.add(factory::delete(&current, row(1, 0), 2)).unwrap();
        let flushed = set.pending();

        // Commit 3 inserts the row again before the delete is marked
        let mut incoming = ChangeSet::new();
        incoming.add(factory::new_change(row(1, 7), 3)).unwrap();
        let mut set = ChangeSet::merge(&set, incoming).unwrap().into_baseline();

        assert_eq!(set.mark_flushed(&flushed, 4), 0);
        let change = set.get(&RowKey::Int(1)).unwrap();
        assert!(!change.is_written());
        assert_eq!(change.row_action(), RowAction::Insert);
    }

    #[test]
    fn pending_lists_unclean_entries_in_key_order() {
        let mut set = baseline(&[1, 2, 3], 5);
        let three = set.get(&RowKey::Int(3)).unwrap().clone();
        let one = set.get(&RowKey::Int(1)).unwrap().clone();
        set.add(factory::update(&three, row(3, 1), 6)).unwrap();
        set.add(factory::delete(&one, row(1, 0), 6)).unwrap();

        let keys: Vec<_> = set.pending().iter().map(Change::key).collect();
        assert_eq!(keys, vec![RowKey::Int(1), RowKey::Int(3)]);
    }
}
