//! Three-way merge of divergent bug histories.
//!
//! Bug histories are append-only, so merging two divergent replicas is a
//! set union with a deterministic total order: every operation the remote
//! has and the local does not is appended after the local sequence, in the
//! order it appears remotely. The remote-only operations are packed into a
//! merge commit whose two parents are the local and remote heads; walking
//! the first-parent chain afterwards therefore yields the full merged
//! sequence.
//!
//! A remote history that would violate a bug invariant (a second create,
//! an operation colliding by hash) does not merge; it is reported as
//! invalid and the local replica is left untouched.

use std::collections::HashSet;

use crate::bug::{Bug, OperationPack, bug_ref};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::op::data::OpData;
use crate::op::validate::validate_sequence;
use crate::op::Operation;
use crate::store::ObjectStore;

/// Outcome of merging one remote bug history into the local one.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BugMergeOutcome {
    /// The remote brought nothing new.
    Nothing,
    /// Remote-only operations were appended; the local ref moved to the
    /// new merge commit.
    Updated { head: Hash },
    /// The remote history violates a bug invariant; nothing was written.
    Invalid { reason: String },
}

/// Merge `remote` into `local` with a three-way operation merge.
///
/// Both sides must be fully committed; the staging region is a local
/// concern that never takes part in a merge.
///
/// # Errors
///
/// Returns `internal` when either side has staged operations or no id,
/// and propagates object-store failures. Invariant violations are not
/// errors; they come back as [`BugMergeOutcome::Invalid`].
pub fn merge_histories<S: ObjectStore>(
    store: &mut S,
    local: &Bug,
    remote: &Bug,
) -> Result<BugMergeOutcome> {
    if local.has_pending() || remote.has_pending() {
        return Err(Error::Internal(
            "cannot merge a bug with staged operations".into(),
        ));
    }
    let id = local
        .id()
        .ok_or_else(|| Error::Internal("cannot merge into an uncommitted bug".into()))?;
    let (Some(local_head), Some(remote_head)) = (local.head(), remote.head()) else {
        return Err(Error::Internal("cannot merge a headless bug".into()));
    };

    // Set difference by operation hash.
    let known: HashSet<&Hash> = local.committed_ops().iter().map(|c| &c.hash).collect();
    let remote_only: Vec<Operation> = remote
        .committed_ops()
        .iter()
        .filter(|c| !known.contains(&c.hash))
        .map(|c| c.op.clone())
        .collect();

    if remote_only.is_empty() {
        return Ok(BugMergeOutcome::Nothing);
    }

    if remote_only
        .iter()
        .any(|op| matches!(op.data, OpData::Create(_)))
    {
        return Ok(BugMergeOutcome::Invalid {
            reason: "remote history contains a second create".into(),
        });
    }

    // The merged sequence is local order then remote-only order; check it
    // holds every history invariant before writing anything.
    let merged: Vec<&Operation> = local
        .committed_ops()
        .iter()
        .map(|c| &c.op)
        .chain(remote_only.iter())
        .collect();
    if let Err(violation) = validate_sequence(merged.into_iter()) {
        return Ok(BugMergeOutcome::Invalid {
            reason: violation.to_string(),
        });
    }

    let pack = OperationPack {
        operations: remote_only,
    };
    let blob = store.store_blob(&pack.encode()?)?;
    let tree = store.store_tree(&pack.tree_entries(blob))?;
    let head = store.store_commit(&tree, &[local_head.clone(), remote_head.clone()])?;
    store.update_ref(&bug_ref(id), &head)?;

    Ok(BugMergeOutcome::Updated { head })
}
