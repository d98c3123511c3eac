//! Operation packs: the on-disk grouping of operations.
//!
//! A pack is the unit of atomic commit: every operation staged on a bug is
//! serialized together as one JSON document (`{"operations":[…]}`), written
//! as one blob, wrapped in one tree, committed as one commit. Media blobs
//! referenced by the pack's operations get one extra tree entry each, named
//! by their hex hash.

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::op::canonical::to_canonical_string;
use crate::op::Operation;
use crate::store::TreeEntry;

/// Name of the tree entry holding the serialized pack.
pub const OPS_ENTRY_NAME: &str = "ops";

/// An ordered group of operations committed together.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OperationPack {
    pub operations: Vec<Operation>,
}

impl OperationPack {
    /// Serialize to the canonical pack document.
    ///
    /// The canonical form (sorted keys, compact) keeps the blob, and with
    /// it the commit, deterministic across replicas.
    ///
    /// # Errors
    ///
    /// Returns `internal` if an operation fails to serialize.
    pub fn encode(&self) -> Result<Vec<u8>> {
        let ops: Result<Vec<serde_json::Value>> =
            self.operations.iter().map(Operation::to_json_value).collect();
        let document = serde_json::json!({ "operations": ops? });
        Ok(to_canonical_string(&document).into_bytes())
    }

    /// Decode a pack document.
    ///
    /// # Errors
    ///
    /// Returns `corrupt_storage` when the blob is not a valid pack.
    pub fn decode(data: &[u8]) -> Result<Self> {
        serde_json::from_slice(data)
            .map_err(|e| Error::CorruptStorage(format!("bad operation pack: {e}")))
    }

    /// Every media blob referenced by the pack's operations, deduplicated.
    #[must_use]
    pub fn media_files(&self) -> Vec<Hash> {
        let mut files: Vec<Hash> = self
            .operations
            .iter()
            .flat_map(|op| op.data.files().iter().cloned())
            .collect();
        files.sort_unstable();
        files.dedup();
        files
    }

    /// The tree entries for a commit of this pack: the `ops` blob plus one
    /// entry per media blob, named by its hex hash.
    #[must_use]
    pub fn tree_entries(&self, ops_blob: Hash) -> Vec<TreeEntry> {
        let mut entries = vec![TreeEntry::new(OPS_ENTRY_NAME, ops_blob)];
        for file in self.media_files() {
            entries.push(TreeEntry::new(file.as_str().to_owned(), file));
        }
        entries
    }
}
