//! Persistence adapter seam.
//!
//! The engine never touches storage itself. A [`PersistenceAdapter`] receives
//! the pending changes of the baseline and reports success or failure for the
//! whole batch; only after success does the baseline get marked as written.

use crate::{error::AdapterError, Change, RowAction, RowBuffer};
use std::collections::BTreeMap;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard};

/// Outbound collaborator applying row mutations to physical storage.
pub trait PersistenceAdapter<B: RowBuffer>: Send + Sync {
    /// Apply one batch of changes. Must be all-or-nothing from the engine's
    /// point of view.
    fn persist(&self, changes: &[Change<B>]) -> Result<(), AdapterError>;

    /// Rows currently in storage, used to hydrate a fresh baseline.
    fn load(&self) -> Result<Vec<B>, AdapterError>;
}

/// Adapter backed by an in-memory map.
///
/// Useful for tests and benches: it counts batches and can be told to fail
/// the next one.
#[derive(Debug)]
pub struct MemoryAdapter<B: RowBuffer> {
    rows: Mutex<BTreeMap<B::Key, B>>,
    batches: AtomicUsize,
    fail_next: AtomicBool,
}

impl<B: RowBuffer> Default for MemoryAdapter<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: RowBuffer> MemoryAdapter<B> {
    /// Create an empty adapter.
    pub fn new() -> Self {
        Self::with_rows(Vec::new())
    }

    /// Create an adapter whose storage already holds `rows`.
    pub fn with_rows(rows: impl IntoIterator<Item = B>) -> Self {
        Self {
            rows: Mutex::new(rows.into_iter().map(|r| (r.primary_key(), r)).collect()),
            batches: AtomicUsize::new(0),
            fail_next: AtomicBool::new(false),
        }
    }

    /// Make the next `persist` call fail.
    pub fn fail_next_batch(&self) {
        self.fail_next.store(true, Ordering::SeqCst);
    }

    /// Number of successfully applied batches.
    pub fn batch_count(&self) -> usize {
        self.batches.load(Ordering::SeqCst)
    }

    /// Stored rows in key order.
    pub fn rows(&self) -> Result<Vec<B>, AdapterError> {
        Ok(self.storage()?.values().cloned().collect())
    }

    /// Stored row for a key.
    pub fn get(&self, key: &B::Key) -> Result<Option<B>, AdapterError> {
        Ok(self.storage()?.get(key).cloned())
    }

    fn storage(&self) -> Result<MutexGuard<'_, BTreeMap<B::Key, B>>, AdapterError> {
        self.rows
            .lock()
            .map_err(|_| AdapterError::new("memory adapter lock poisoned"))
    }
}

impl<B> PersistenceAdapter<B> for MemoryAdapter<B>
where
    B: RowBuffer + Send + Sync,
    B::Key: Send + Sync,
{
    fn persist(&self, changes: &[Change<B>]) -> Result<(), AdapterError> {
        if self.fail_next.swap(false, Ordering::SeqCst) {
            return Err(AdapterError::new("injected batch failure"));
        }

        let mut rows = self.storage()?;

        for change in changes {
            match change.row_action() {
                RowAction::Insert | RowAction::Update => {
                    rows.insert(change.key(), change.record().clone());
                }
                RowAction::Delete => {
                    rows.remove(&change.key());
                }
                RowAction::None => {}
            }
        }

        self.batches.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }

    fn load(&self) -> Result<Vec<B>, AdapterError> {
        self.rows()
    }
}
