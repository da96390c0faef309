//! Data context: owner of the baseline change set.
//!
//! The baseline is the only shared mutable state. Taking a snapshot for a new
//! transaction and installing a merged commit both happen under one mutex, so
//! commits are serialized and a snapshot never observes a half-installed
//! baseline. Adapter I/O runs outside that mutex; commits landing while a
//! batch is in flight are reconciled with it afterwards.

use crate::{
    adapter::PersistenceAdapter,
    config::Config,
    error::{AdapterError, Result},
    factory, ChangeSet, CommitSummary, Error, RowAction, RowBuffer, Transaction, TxCounter, TxId,
    INIT_ID,
};
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex, MutexGuard};

/// Result of a flush.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FlushSummary {
    /// Changes handed to the adapter
    pub persisted: usize,
    /// Baseline entries marked clean or dropped afterwards
    pub marked: usize,
}

/// The shared baseline with its lock and version counter.
#[derive(Debug)]
pub(crate) struct Baseline<B: RowBuffer> {
    name: String,
    changes: Mutex<ChangeSet<B>>,
    counter: TxCounter,
    /// Keeps at most one adapter batch in flight
    flush_lock: Mutex<()>,
}

impl<B: RowBuffer> Baseline<B> {
    fn new(name: String) -> Self {
        Self {
            name,
            changes: Mutex::new(ChangeSet::new()),
            counter: TxCounter::new(),
            flush_lock: Mutex::new(()),
        }
    }

    pub(crate) fn name(&self) -> &str {
        &self.name
    }

    fn lock(&self) -> Result<MutexGuard<'_, ChangeSet<B>>> {
        self.changes
            .lock()
            .map_err(|_| Error::LockPoisoned("baseline"))
    }

    /// Issue a transaction id and copy the baseline, atomically.
    pub(crate) fn snapshot(&self) -> Result<(TxId, ChangeSet<B>)> {
        let changes = self.lock()?;
        let id = self.counter.tick();
        Ok((id, changes.copy()))
    }

    /// Merge `incoming` onto the baseline and install the result. On error
    /// the baseline is left exactly as it was.
    pub(crate) fn install(
        &self,
        tx_id: TxId,
        incoming: ChangeSet<B>,
    ) -> Result<CommitSummary<B::Key>> {
        let written = incoming.len();
        let mut baseline = self.lock()?;

        let outcome = ChangeSet::merge(&baseline, incoming)?;
        let removed = outcome.removed.clone();
        baseline.replace_range(outcome.into_baseline());

        Ok(CommitSummary {
            tx_id,
            written,
            removed,
        })
    }

    fn flush<A: PersistenceAdapter<B> + ?Sized>(&self, adapter: &A) -> Result<FlushSummary> {
        let _flushing = self
            .flush_lock
            .lock()
            .map_err(|_| Error::LockPoisoned("flush"))?;

        let pending = self.lock()?.pending();
        if pending.is_empty() {
            tracing::debug!(context = %self.name, "nothing to flush");
            return Ok(FlushSummary::default());
        }

        if let Err(err) = adapter.persist(&pending) {
            tracing::warn!(
                context = %self.name,
                changes = pending.len(),
                error = %err,
                "flush failed, baseline left pending"
            );
            return Err(err.into());
        }

        let marked = {
            let mut changes = self.lock()?;
            // Restored deletes outrank every snapshot taken before this point
            let annihilated = pending
                .iter()
                .any(|c| c.row_action() != RowAction::Delete && !changes.contains_key(&c.key()));
            let stamp = if annihilated {
                self.counter.tick()
            } else {
                self.counter.current()
            };
            changes.mark_flushed(&pending, stamp)
        };
        tracing::info!(
            context = %self.name,
            persisted = pending.len(),
            marked,
            "baseline flushed"
        );

        Ok(FlushSummary {
            persisted: pending.len(),
            marked,
        })
    }
}

/// Entry point for transactions against one baseline and one adapter.
pub struct DataContext<B: RowBuffer, A> {
    baseline: Arc<Baseline<B>>,
    adapter: Arc<A>,
    config: Config,
}

impl<B, A> DataContext<B, A>
where
    B: RowBuffer,
    A: PersistenceAdapter<B>,
{
    /// Create a context with an empty baseline.
    pub fn new(adapter: A, config: Config) -> Self {
        Self {
            baseline: Arc::new(Baseline::new(config.name.clone())),
            adapter: Arc::new(adapter),
            config,
        }
    }

    /// Create a context and hydrate its baseline from the adapter's storage.
    pub fn open(adapter: A, config: Config) -> Result<Self> {
        let rows = adapter.load()?;
        let context = Self::new(adapter, config);
        context.hydrate(rows)?;
        Ok(context)
    }

    pub fn config(&self) -> &Config {
        &self.config
    }

    pub fn adapter(&self) -> &A {
        &self.adapter
    }

    /// Seed the baseline with rows that already exist in storage.
    ///
    /// The rows enter clean, stamped with [`INIT_ID`]. Returns the number of
    /// rows seeded.
    pub fn hydrate(&self, rows: impl IntoIterator<Item = B>) -> Result<usize> {
        let mut seed = ChangeSet::new();
        for row in rows {
            seed.add(factory::initial(row, INIT_ID))?;
        }
        let count = seed.len();

        let mut baseline = self.baseline.lock()?;
        for key in baseline.dangling_keys() {
            seed.add_dangling(key.clone());
        }
        let outcome = ChangeSet::merge(&baseline, seed)?;
        baseline.replace_range(outcome.into_baseline());

        tracing::info!(context = %self.config.name, rows = count, "baseline hydrated");
        Ok(count)
    }

    /// Start a transaction on a snapshot of the current baseline.
    pub fn begin_transaction(&self) -> Result<Transaction<B>> {
        Transaction::begin(Arc::clone(&self.baseline))
    }

    /// Commit a transaction, then flush if the context is configured to.
    ///
    /// A flush failure is reported after the commit already took effect; the
    /// baseline keeps the changes pending for the next flush.
    pub fn commit(&self, tx: &mut Transaction<B>) -> Result<CommitSummary<B::Key>> {
        let summary = tx.commit()?;
        if self.config.auto_flush {
            self.flush()?;
        }
        Ok(summary)
    }

    /// Hand every pending baseline change to the adapter and mark the ones
    /// it persisted as written.
    pub fn flush(&self) -> Result<FlushSummary> {
        self.baseline.flush(self.adapter.as_ref())
    }

    /// Copy of the current baseline.
    pub fn baseline(&self) -> Result<ChangeSet<B>> {
        Ok(self.baseline.lock()?.copy())
    }

    /// Highest transaction id issued so far.
    pub fn last_tx_id(&self) -> TxId {
        self.baseline.counter.current()
    }
}

impl<B, A> DataContext<B, A>
where
    B: RowBuffer + Send + Sync + 'static,
    B::Key: Send + Sync,
    A: PersistenceAdapter<B> + 'static,
{
    /// Run [`flush`](Self::flush) on the blocking thread pool so async callers
    /// are not held up by storage latency.
    pub async fn flush_async(&self) -> Result<FlushSummary> {
        let baseline = Arc::clone(&self.baseline);
        let adapter = Arc::clone(&self.adapter);

        tokio::task::spawn_blocking(move || baseline.flush(adapter.as_ref()))
            .await
            .map_err(|e| Error::Adapter(AdapterError::new(format!("flush task failed: {e}"))))?
    }
}

impl<B: RowBuffer, A> std::fmt::Debug for DataContext<B, A> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DataContext")
            .field("config", &self.config)
            .field("last_tx_id", &self.baseline.counter.current())
            .finish()
    }
}
