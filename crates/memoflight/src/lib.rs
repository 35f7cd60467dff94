//! # Single-flight memoization
//!
//! This crate provides [`Memo`], a cache that wraps an expensive, possibly failing
//! computation (a [`Producer`]) and serves any number of concurrent callers:
//!
//! - The producer runs at most once per key, even when many callers ask for the
//!   same key at the same time. There is no thundering herd of recomputations.
//! - A slow computation never blocks callers that are interested in other keys.
//! - Results, including errors, are memoized for the lifetime of the cache.
//!
//! ## How it works
//!
//! Every key maps to one [`Entry`](entry::Entry) in a table. An entry is a slot that
//! is written exactly once, together with a readiness signal that fires when the
//! write happens. The table itself is only touched by a single authority, which
//! atomically either attaches a request to an existing entry or inserts a new,
//! pending one. Only in the latter case is a computation spawned, after the
//! authority was relinquished. All callers then wait on the entry's signal rather
//! than on the table.
//!
//! There are two ways of providing that authority, selected via [`Strategy`]:
//!
//! - [`Strategy::Actor`]: a dedicated task owns the table and serves lookups from a
//!   bounded request queue.
//! - [`Strategy::Locked`]: the table is guarded by a mutex, and the lookup-or-insert
//!   is a single critical section.
//!
//! ## Metrics
//!
//! When statsd is configured via [`metrics::configure_statsd`], the following
//! metrics are emitted, all tagged with `memo` set to the name of the cache:
//!
//! - `memo.access`: All accesses.
//! - `memo.channel.hit`: Accesses that attached to an existing entry.
//! - `memo.channel.miss`: Accesses that created a new entry.
//! - `memo.closed_access`: Accesses after the cache was closed.
//! - `memo.computation`: Finished computations, tagged with `status`.
//! - `memo.computation.duration`: Time spent in the producer.
//! - `memo.computations.inflight`: Number of running computations.

#![warn(missing_docs)]

#[macro_use]
#[allow(missing_docs)]
pub mod metrics;

mod computation;
#[allow(missing_docs)]
pub mod config;
mod coordinator;
pub mod entry;
mod error;
mod key;
mod locked;
#[allow(missing_docs)]
pub mod logging;
mod memo;
mod producer;
mod table;
mod utils;

#[cfg(test)]
mod tests;

pub use config::{MemoConfig, Strategy};
pub use error::MemoError;
pub use key::CacheKey;
pub use memo::Memo;
pub use producer::{Blocking, FromFn, Producer, blocking, from_fn};
