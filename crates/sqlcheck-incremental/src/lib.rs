//! Incremental validation caching
//!
//! A check pass validates every live query and view. Most of them are
//! unchanged between passes (a file watcher re-runs the pass on every save),
//! so their answers are looked up by fingerprint instead of being
//! recomputed against the database.
//!
//! ## Pass lifecycle
//!
//! Each pass builds a fresh cache: every answer, hit or miss, is written into
//! the new cache, which replaces the old one when the pass finishes. Entries
//! for queries that disappeared from source are dropped by construction.
//!
//! ```rust,ignore
//! use sqlcheck_incremental::ValidationCache;
//!
//! let mut cache: ValidationCache<Answer> = ValidationCache::new();
//!
//! let mut pass = cache.begin_pass();
//! let answer = match pass.lookup(&fingerprint) {
//!     Some(answer) => answer,
//!     None => validate(&query).await?,
//! };
//! pass.record(fingerprint, answer);
//! cache = pass.finish();
//! ```

pub mod cache;

pub use cache::{CachePass, CacheStats, ValidationCache};
