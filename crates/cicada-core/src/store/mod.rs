//! The content-addressed object store interface.
//!
//! Bug and identity storage is expressed entirely against [`ObjectStore`]:
//! blobs, trees, commits and refs, plus scalar config, the configured user,
//! and named logical clocks. The trait is consumed, not implemented, by the
//! rest of the crate; any store with these capabilities can back a
//! repository. [`mem::MemStore`] is an in-memory implementation with
//! attachable peer remotes, used by the test suite and by tooling that
//! needs a repository without touching disk.
//!
//! # Ref naming
//!
//! Refs live under `refs/`. Fetching a namespace from a remote lands its
//! refs under `refs/remotes/<remote>/<rest>`, mirroring the usual
//! remote-tracking layout.

pub mod mem;

use std::path::Path;

use crate::error::Result;
use crate::hash::Hash;

/// A named blob reference inside a tree.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TreeEntry {
    pub name: String,
    pub hash: Hash,
}

impl TreeEntry {
    #[must_use]
    pub fn new(name: impl Into<String>, hash: Hash) -> Self {
        Self {
            name: name.into(),
            hash,
        }
    }
}

/// Content-addressed storage with refs, config and logical clocks.
///
/// Reads take `&self`, mutations take `&mut self`; a store handle is not
/// expected to be shared across threads.
pub trait ObjectStore {
    /// Write a blob, returning its content address.
    fn store_blob(&mut self, data: &[u8]) -> Result<Hash>;

    /// Read a blob's bytes.
    fn read_blob(&self, hash: &Hash) -> Result<Vec<u8>>;

    /// Whether a blob with this address exists.
    fn has_blob(&self, hash: &Hash) -> bool;

    /// Store a tree built from the given entries.
    fn store_tree(&mut self, entries: &[TreeEntry]) -> Result<Hash>;

    /// List the entries of a tree. Accepts either a tree hash or a commit
    /// hash (resolved to the commit's tree).
    fn tree_entries(&self, hash: &Hash) -> Result<Vec<TreeEntry>>;

    /// Store a commit pointing at `tree`, with zero, one (ordinary) or two
    /// (merge) parents.
    fn store_commit(&mut self, tree: &Hash, parents: &[Hash]) -> Result<Hash>;

    /// List the commits reachable from a ref along the first-parent chain,
    /// oldest first.
    fn list_commits(&self, ref_name: &str) -> Result<Vec<Hash>>;

    /// Resolve a ref to its target commit, or `None` if it does not exist.
    fn resolve_ref(&self, name: &str) -> Result<Option<Hash>>;

    /// Point a ref at a commit, creating it if needed.
    fn update_ref(&mut self, name: &str, target: &Hash) -> Result<()>;

    /// Delete a ref. Deleting a missing ref is not an error.
    fn remove_ref(&mut self, name: &str) -> Result<()>;

    /// List full ref names starting with `prefix`, sorted.
    fn list_refs(&self, prefix: &str) -> Result<Vec<String>>;

    /// Whether `ancestor` is an ancestor of (or equal to) `descendant`.
    fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool>;

    /// Fetch every ref under `prefix` from `remote` into the matching
    /// remote-tracking refs, transferring the objects they need. Returns
    /// the store's textual transfer output.
    fn fetch_refs(&mut self, remote: &str, prefix: &str) -> Result<String>;

    /// Push every local ref under `prefix` to `remote`. Returns the
    /// store's textual transfer output.
    fn push_refs(&mut self, remote: &str, prefix: &str) -> Result<String>;

    /// Read every value recorded for a config key. Most keys hold zero or
    /// one value; multi-valued keys are possible and callers decide whether
    /// that is an error.
    fn read_config(&self, key: &str) -> Result<Vec<String>>;

    /// Replace a config key with a single value.
    fn store_config(&mut self, key: &str, value: &str) -> Result<()>;

    /// Remove every value of a config key.
    fn remove_config(&mut self, key: &str) -> Result<()>;

    /// The user name configured for the store, if any.
    fn user_name(&self) -> Result<Option<String>>;

    /// The user email configured for the store, if any.
    fn user_email(&self) -> Result<Option<String>>;

    /// Current value of a named logical clock (0 if never incremented).
    fn clock_value(&self, name: &str) -> Result<u64>;

    /// Increment a named logical clock and return the new value.
    fn clock_increment(&mut self, name: &str) -> Result<u64>;

    /// Directory for repository metadata (cache file, lock file).
    fn metadata_dir(&self) -> &Path;
}

/// Translate a local ref name into its remote-tracking counterpart.
///
/// `refs/cicada/bugs/abc` fetched from `origin` becomes
/// `refs/remotes/origin/cicada/bugs/abc`.
#[must_use]
pub fn remote_tracking_ref(remote: &str, local_ref: &str) -> String {
    let rest = local_ref.strip_prefix("refs/").unwrap_or(local_ref);
    format!("refs/remotes/{remote}/{rest}")
}

/// Inverse of [`remote_tracking_ref`]: recover the local ref name from a
/// remote-tracking ref, or `None` if the ref belongs to another remote.
#[must_use]
pub fn local_ref_of(remote: &str, tracking_ref: &str) -> Option<String> {
    let rest = tracking_ref.strip_prefix(&format!("refs/remotes/{remote}/"))?;
    Some(format!("refs/{rest}"))
}
