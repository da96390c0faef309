//! Transaction version counter.
//!
//! Every transaction is stamped with an id drawn from a monotonically
//! increasing counter. Rows hydrated from storage carry the reserved
//! [`INIT_ID`], which no live transaction ever receives.

use crate::TxId;
use std::sync::atomic::{AtomicU64, Ordering};

/// Version stamp of rows loaded from the persistence layer at startup.
pub const INIT_ID: TxId = 0;

/// Monotonic source of transaction ids.
///
/// Shared by every transaction of one data context. Live ids start right
/// after [`INIT_ID`].
#[derive(Debug)]
pub struct TxCounter {
    last: AtomicU64,
}

impl TxCounter {
    /// Create a counter whose first issued id is `INIT_ID + 1`.
    pub fn new() -> Self {
        Self {
            last: AtomicU64::new(INIT_ID),
        }
    }

    /// Issue the next transaction id.
    pub fn tick(&self) -> TxId {
        self.last.fetch_add(1, Ordering::SeqCst) + 1
    }

    /// The most recently issued id, or `INIT_ID` if none was issued yet.
    pub fn current(&self) -> TxId {
        self.last.load(Ordering::SeqCst)
    }
}

impl Default for TxCounter {
    fn default() -> Self {
        Self::new()
    }
}
