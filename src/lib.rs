//! `optimistic-lock` applies deltas to a single versioned numeric record
//! (e.g. a balance) under contention from many concurrent writers,
//! without taking any lock on the record.
//!
//! Every update reads the [`Record`], computes its next state and writes
//! it back with a conditional write guarded by the [`Version`] it read:
//! the number of rows affected tells whether the write won the race.
//!
//! - [`Optimistic`] surfaces a conflict to the caller right away,
//! - [`Retrying`] tries again with a fresh read after a jittered,
//!   exponentially growing backoff, up to [`RetryPolicy::max_attempts`].
//!
//! ```
//! # async fn dox() -> Result<(), optimistic_lock::ApplyError> {
//! use optimistic_lock::{Apply, InMemory, Record, Retrying};
//!
//! let store = InMemory::default();
//! store.insert(Record::new("balance", 1000));
//!
//! Retrying::from(store.clone()).apply(&"balance", 10).await?;
//!
//! assert_eq!(Some(1010), store.get(&"balance").map(|record| record.value));
//! # Ok(())
//! # }
//! ```

#![deny(unsafe_code, unused_qualifications, trivial_casts)]
#![deny(clippy::all)]
#![warn(clippy::pedantic)]
#![allow(clippy::module_name_repetitions)]

pub mod protocol;
pub mod record;
pub mod retry;
pub mod store;
#[cfg(feature = "tracing")]
pub mod tracing;
pub mod version;

pub use protocol::{Apply, ApplyError, Optimistic};
pub use record::Record;
pub use retry::{RetryPolicy, Retrying};
pub use store::{InMemory, Store};
pub use version::{ConflictError, Version, INITIAL_VERSION};
