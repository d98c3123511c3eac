#![forbid(unsafe_code)]
//! Distributed bug tracking inside a content-addressed object store.
//!
//! Every bug is an append-only sequence of operations; every identity is
//! an append-only chain of versions. Both live as blobs, trees, commits
//! and refs in an object store the crate consumes through the
//! [`store::ObjectStore`] trait. Replicas synchronize by pushing and
//! pulling refs and merging the resulting histories.
//!
//! The usual entry point is [`cache::RepoCache`]:
//!
//! ```no_run
//! use cicada_core::cache::RepoCache;
//! use cicada_core::store::mem::MemStore;
//!
//! # fn main() -> cicada_core::Result<()> {
//! let mut cache = RepoCache::open(MemStore::with_user("Jane", "jane@example.com"))?;
//! let jane = cache.new_identity("Jane", "jane@example.com")?;
//! cache.set_user_identity(&jane)?;
//!
//! let id = cache.new_bug("login broken", "cannot sign in")?;
//! cache.add_comment(&id, "reproduces on 1.2")?;
//! cache.change_labels(&id, &["bug"], &[])?;
//! # Ok(())
//! # }
//! ```
//!
//! # Conventions
//!
//! - **Errors**: typed [`Error`] values with machine-readable codes;
//!   module-local error enums convert upward via `From`.
//! - **Logging**: `tracing` macros (`info!`, `debug!`, `warn!`).

pub mod bug;
pub mod cache;
pub mod error;
pub mod hash;
pub mod identity;
pub mod lock;
pub mod op;
pub mod query;
pub mod store;
pub mod sync;

pub use error::{Error, ErrorCode, Result};
pub use hash::Hash;
