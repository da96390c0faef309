//! Transactions: private change sets merged into the baseline on commit.

use crate::{
    context::Baseline, error::Result, factory, ChangeSet, Error, RowAction, RowBuffer, TxId,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Lifecycle of a transaction. Moves strictly forward.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransactionState {
    Open,
    Committing,
    Closed,
}

/// Result of a successful commit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CommitSummary<K> {
    /// The committed transaction
    pub tx_id: TxId,
    /// Rows folded into the baseline
    pub written: usize,
    /// Rows whose pending insert was cancelled by this commit's delete
    pub removed: Vec<K>,
}

/// A unit of work against one data context.
///
/// Row writes only touch the private copy of the baseline taken at
/// [`begin`](crate::DataContext::begin_transaction). Nothing is shared until
/// [`commit`](Transaction::commit). Dropping an open transaction rolls it back.
pub struct Transaction<B: RowBuffer> {
    id: TxId,
    state: TransactionState,
    private: ChangeSet<B>,
    baseline: Arc<Baseline<B>>,
}

impl<B: RowBuffer> Transaction<B> {
    pub(crate) fn begin(baseline: Arc<Baseline<B>>) -> Result<Self> {
        let (id, private) = baseline.snapshot()?;
        tracing::debug!(
            tx_id = id,
            context = %baseline.name(),
            rows = private.len(),
            "transaction started"
        );
        Ok(Self {
            id,
            state: TransactionState::Open,
            private,
            baseline,
        })
    }

    pub fn id(&self) -> TxId {
        self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    pub fn is_open(&self) -> bool {
        self.state == TransactionState::Open
    }

    /// The private change set as seen by this transaction.
    pub fn changes(&self) -> &ChangeSet<B> {
        &self.private
    }

    /// Current values of a row, unless it is missing or deleted here.
    pub fn get(&self, key: &B::Key) -> Option<&B> {
        self.private
            .get(key)
            .filter(|c| c.row_action() != RowAction::Delete)
            .map(|c| c.record())
    }

    /// Insert a new row.
    ///
    /// Re-inserting a row this transaction deleted turns the pair into an
    /// update. Re-inserting a row whose delete was already committed starts a
    /// fresh insert.
    pub fn insert(&mut self, row: B) -> Result<()> {
        self.ensure_open()?;
        let key = row.primary_key();

        let tracked = self
            .private
            .get(&key)
            .map(|c| (c.row_action(), c.write_id()));

        let change = match tracked {
            None => {
                self.private.revive(&key);
                factory::new_change(row, self.id)
            }
            Some((RowAction::Delete, writer)) if writer == self.id => {
                let deleted = self
                    .private
                    .discard(&key)
                    .ok_or_else(|| Error::non_existing(&key))?;
                factory::update(&deleted, row, self.id)
            }
            // Deleted by a committed transaction: the row is gone, start over
            Some((RowAction::Delete, _)) => {
                self.private.discard(&key);
                factory::new_change(row, self.id)
            }
            Some(_) => return Err(Error::already_exists(&key)),
        };

        self.private.add(change)
    }

    /// Replace the values of an existing row.
    pub fn update(&mut self, row: B) -> Result<()> {
        self.ensure_open()?;
        let key = row.primary_key();
        let existing = self.live(&key)?;
        let change = factory::update(existing, row, self.id);
        self.private.add(change)
    }

    /// Delete an existing row, recording `row` as its last values.
    pub fn delete(&mut self, row: B) -> Result<()> {
        self.ensure_open()?;
        let key = row.primary_key();
        let existing = self.live(&key)?;
        let change = factory::delete(existing, row, self.id);
        self.private.add(change)
    }

    /// Delete an existing row by key.
    pub fn delete_key(&mut self, key: &B::Key) -> Result<()> {
        self.ensure_open()?;
        let existing = self.live(key)?;
        let change = factory::delete(existing, existing.record().clone(), self.id);
        self.private.add(change)
    }

    /// Merge the rows this transaction wrote into the baseline.
    ///
    /// On a [`Error::ConcurrencyConflict`] the baseline is untouched and the
    /// caller should retry with a new transaction. The transaction is closed
    /// whatever the outcome.
    pub fn commit(&mut self) -> Result<CommitSummary<B::Key>> {
        self.ensure_open()?;
        self.state = TransactionState::Committing;

        let span = tracing::debug_span!("commit", tx_id = self.id, context = %self.baseline.name());
        let _enter = span.enter();

        // Untouched rows of the snapshot are left out so they cannot conflict
        let written = std::mem::take(&mut self.private).authored_by(self.id);
        let result = self.baseline.install(self.id, written);
        self.state = TransactionState::Closed;

        match &result {
            Ok(summary) => tracing::debug!(
                written = summary.written,
                removed = summary.removed.len(),
                "transaction committed"
            ),
            Err(err) => tracing::warn!(
                error = %err,
                retryable = err.is_retryable(),
                "transaction commit rejected"
            ),
        }

        result
    }

    /// Abandon the transaction. The baseline is never touched.
    pub fn rollback(&mut self) {
        if self.state == TransactionState::Closed {
            return;
        }
        self.state = TransactionState::Closed;
        self.private = ChangeSet::new();
        tracing::debug!(tx_id = self.id, "transaction rolled back");
    }

    fn ensure_open(&self) -> Result<()> {
        if self.is_open() {
            Ok(())
        } else {
            Err(Error::TransactionClosed { tx_id: self.id })
        }
    }

    fn live(&self, key: &B::Key) -> Result<&crate::Change<B>> {
        self.private
            .get(key)
            .filter(|c| c.row_action() != RowAction::Delete)
            .ok_or_else(|| Error::non_existing(key))
    }
}

impl<B: RowBuffer> Drop for Transaction<B> {
    fn drop(&mut self) {
        if self.is_open() {
            self.rollback();
        }
    }
}

impl<B: RowBuffer> std::fmt::Debug for Transaction<B> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Transaction")
            .field("id", &self.id)
            .field("state", &self.state)
            .field("rows", &self.private.len())
            .finish()
    }
}
