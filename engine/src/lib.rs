//! # Rowtrack Engine
//!
//! Row-level change tracking and optimistic-concurrency merging for an
//! in-memory row store.
//!
//! Every logical row, identified by its primary key, is tracked as a
//! [`Change`]: the row values, the pending mutation ([`RowAction`]) and two
//! version stamps. Transactions work on a private copy of the shared baseline
//! and merge back on commit, where write-write conflicts are detected.
//!
//! ## Design Principles
//!
//! - **No IO**: Storage is reached only through a [`PersistenceAdapter`]
//! - **All-or-nothing commits**: A rejected merge leaves the baseline untouched
//! - **Serialized installs**: One lock per [`DataContext`] guards the baseline;
//!   open transactions never lock
//!
//! ## Core Concepts
//!
//! ### Changes
//!
//! A [`Change`] carries:
//! - The row values (any [`RowBuffer`], e.g. [`Row`])
//! - `read_id`: the transaction version its basis was established at
//! - `write_id`: the transaction version that produced it
//! - Whether it already reached storage
//! - The pending [`RowAction`]
//!
//! Changes are built by the constructors in [`factory`] and folded together by
//! [`merge::resolve`].
//!
//! ### Change Sets
//!
//! A [`ChangeSet`] maps primary keys to changes and remembers dangling keys,
//! rows that were removed by a committed transaction.
//!
//! ### Conflicts
//!
//! A commit fails with [`Error::ConcurrencyConflict`] when the baseline's read
//! basis for a row is newer than the transaction's. Discard the transaction and
//! retry on a fresh one. Touching a row the baseline never held, without
//! inserting it, fails with [`Error::NonExistingRow`] and is not retryable.
//!
//! ## Quick Start
//!
//! ```rust
//! use rowtrack_engine::{Config, DataContext, Error, MemoryAdapter, Row, RowKey};
//! use serde_json::json;
//!
//! // 1. Open a context over storage that already holds one row
//! let adapter = MemoryAdapter::with_rows([Row::new(1).with("name", json!("Alice"))]);
//! let ctx = DataContext::open(adapter, Config::default()).unwrap();
//!
//! // 2. Two transactions start from the same baseline
//! let mut a = ctx.begin_transaction().unwrap();
//! let mut b = ctx.begin_transaction().unwrap();
//!
//! a.update(Row::new(1).with("name", json!("Alice Smith"))).unwrap();
//! b.update(Row::new(1).with("name", json!("Alicia"))).unwrap();
//!
//! // 3. The first commit wins, the second conflicts
//! a.commit().unwrap();
//! let err = b.commit().unwrap_err();
//! assert!(matches!(err, Error::ConcurrencyConflict { .. }));
//!
//! // 4. Persist the baseline
//! ctx.flush().unwrap();
//! let stored = ctx.adapter().get(&RowKey::Int(1)).unwrap().unwrap();
//! assert_eq!(stored.columns()["name"], json!("Alice Smith"));
//! ```

pub mod adapter;
pub mod change;
pub mod change_set;
pub mod clock;
pub mod config;
pub mod context;
pub mod error;
pub mod factory;
pub mod merge;
pub mod record;
pub mod transaction;

// Re-export main types at crate root
pub use adapter::{MemoryAdapter, PersistenceAdapter};
pub use change::{Change, RowAction};
pub use change_set::{ChangeSet, MergeOutcome};
pub use clock::{TxCounter, INIT_ID};
pub use config::{Config, ConfigError};
pub use context::{DataContext, FlushSummary};
pub use error::{AdapterError, Error};
pub use merge::{MergePhase, Resolution};
pub use record::{Row, RowBuffer, RowKey};
pub use transaction::{CommitSummary, Transaction, TransactionState};

/// Transaction version stamp.
pub type TxId = u64;
