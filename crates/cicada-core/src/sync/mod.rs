//! Synchronization between replicas.
//!
//! Fetch and push delegate ref-namespace transfer to the object store.
//! Merging is explicit and per-ref: every remote-tracking ref under the
//! bug and identity namespaces is reconciled against its local
//! counterpart: adopted when new, fast-forwarded when the local side is
//! an ancestor, three-way merged when the histories diverged (bugs only;
//! divergent identity chains do not merge).
//!
//! The per-ref driver never touches the excerpt cache; the cache layer
//! applies its own updates while draining the results.

pub mod merge;

pub use merge::{BugMergeOutcome, merge_histories};

use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tracing::debug;

use crate::bug::{BUGS_REF_PREFIX, Bug, bug_ref};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identity::{IDENTITIES_REF_PREFIX, Identity, identity_ref};
use crate::store::{ObjectStore, remote_tracking_ref};

// ---------------------------------------------------------------------------
// Fetch / push
// ---------------------------------------------------------------------------

/// Pull the bug and identity namespaces from a remote into
/// remote-tracking refs. No local ref changes.
pub fn fetch<S: ObjectStore>(store: &mut S, remote: &str) -> Result<String> {
    let mut output = store.fetch_refs(remote, BUGS_REF_PREFIX)?;
    output.push_str(&store.fetch_refs(remote, IDENTITIES_REF_PREFIX)?);
    Ok(output)
}

/// Publish the local bug and identity namespaces to a remote. No local
/// state change.
pub fn push<S: ObjectStore>(store: &mut S, remote: &str) -> Result<String> {
    let mut output = store.push_refs(remote, BUGS_REF_PREFIX)?;
    output.push_str(&store.push_refs(remote, IDENTITIES_REF_PREFIX)?);
    Ok(output)
}

// ---------------------------------------------------------------------------
// Merge results
// ---------------------------------------------------------------------------

/// What merging one remote ref did.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum MergeStatus {
    /// The local side already had everything.
    Nothing,
    /// The entity did not exist locally; the remote head was adopted.
    New,
    /// The local ref moved (fast-forward or merge commit).
    Updated,
    /// The remote history violates an invariant; nothing was written.
    Invalid(String),
}

impl fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nothing => f.write_str("nothing"),
            Self::New => f.write_str("new"),
            Self::Updated => f.write_str("updated"),
            Self::Invalid(reason) => write!(f, "invalid: {reason}"),
        }
    }
}

/// Per-ref element of the merge-all stream.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MergeResult {
    /// The bug or identity id behind the merged ref.
    pub id: Hash,
    pub status: MergeStatus,
}

// ---------------------------------------------------------------------------
// Cancellation
// ---------------------------------------------------------------------------

/// Cooperative cancellation token, honored between refs.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    flag: Arc<AtomicBool>,
}

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation. Idempotent.
    pub fn cancel(&self) {
        self.flag.store(true, Ordering::Relaxed);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.flag.load(Ordering::Relaxed)
    }
}

// ---------------------------------------------------------------------------
// Per-ref merging
// ---------------------------------------------------------------------------

/// Every remote-tracking ref that merge-all will visit, bugs first.
pub fn pending_merge_refs<S: ObjectStore>(store: &S, remote: &str) -> Result<Vec<String>> {
    let mut refs = store.list_refs(&remote_tracking_ref(remote, BUGS_REF_PREFIX))?;
    refs.extend(store.list_refs(&remote_tracking_ref(remote, IDENTITIES_REF_PREFIX))?);
    Ok(refs)
}

/// Reconcile one remote-tracking ref against its local counterpart.
///
/// # Errors
///
/// Object-store failures and malformed ref names. Invariant violations in
/// the remote history are not errors; they come back as
/// [`MergeStatus::Invalid`].
pub fn merge_ref<S: ObjectStore>(
    store: &mut S,
    remote: &str,
    tracking_ref: &str,
) -> Result<MergeResult> {
    let bugs_prefix = remote_tracking_ref(remote, BUGS_REF_PREFIX);
    let identities_prefix = remote_tracking_ref(remote, IDENTITIES_REF_PREFIX);

    if let Some(raw_id) = tracking_ref.strip_prefix(bugs_prefix.as_str()) {
        merge_bug_ref(store, tracking_ref, &parse_id(tracking_ref, raw_id)?)
    } else if let Some(raw_id) = tracking_ref.strip_prefix(identities_prefix.as_str()) {
        merge_identity_ref(store, tracking_ref, &parse_id(tracking_ref, raw_id)?)
    } else {
        Err(Error::Internal(format!(
            "ref '{tracking_ref}' is not under a mergeable namespace of remote '{remote}'"
        )))
    }
}

fn parse_id(tracking_ref: &str, raw_id: &str) -> Result<Hash> {
    Hash::from_hex(raw_id).map_err(|e| {
        Error::CorruptStorage(format!("malformed id in ref '{tracking_ref}': {e}"))
    })
}

fn merge_bug_ref<S: ObjectStore>(
    store: &mut S,
    tracking_ref: &str,
    id: &Hash,
) -> Result<MergeResult> {
    let remote_head = store.resolve_ref(tracking_ref)?.ok_or_else(|| Error::NotFound {
        kind: "ref",
        id: tracking_ref.to_owned(),
    })?;

    let result = |status| {
        Ok(MergeResult {
            id: id.clone(),
            status,
        })
    };

    let local_ref = bug_ref(id);
    let Some(local_head) = store.resolve_ref(&local_ref)? else {
        // Unknown bug: validate the remote history, then adopt its head.
        let remote_bug = match Bug::read_ref(store, tracking_ref) {
            Ok(bug) => bug,
            Err(Error::InvalidInput(reason)) => return result(MergeStatus::Invalid(reason)),
            Err(other) => return Err(other),
        };
        if remote_bug.id() != Some(id) {
            return result(MergeStatus::Invalid(
                "remote history does not start at the bug id its ref claims".into(),
            ));
        }

        store.update_ref(&local_ref, &remote_head)?;
        debug!(bug = %id.human(), "adopted remote bug");
        return result(MergeStatus::New);
    };

    if local_head == remote_head || store.is_ancestor(&remote_head, &local_head)? {
        return result(MergeStatus::Nothing);
    }

    if store.is_ancestor(&local_head, &remote_head)? {
        // Validate before moving the ref; a fast-forward adopts remote
        // history wholesale.
        match Bug::read_ref(store, tracking_ref) {
            Ok(_) => {}
            Err(Error::InvalidInput(reason)) => return result(MergeStatus::Invalid(reason)),
            Err(other) => return Err(other),
        }
        store.update_ref(&local_ref, &remote_head)?;
        debug!(bug = %id.human(), "fast-forwarded");
        return result(MergeStatus::Updated);
    }

    let local_bug = Bug::read_ref(store, &local_ref)?;
    let remote_bug = match Bug::read_ref(store, tracking_ref) {
        Ok(bug) => bug,
        Err(Error::InvalidInput(reason)) => return result(MergeStatus::Invalid(reason)),
        Err(other) => return Err(other),
    };

    match merge_histories(store, &local_bug, &remote_bug)? {
        BugMergeOutcome::Nothing => result(MergeStatus::Nothing),
        BugMergeOutcome::Updated { .. } => {
            debug!(bug = %id.human(), "three-way merged");
            result(MergeStatus::Updated)
        }
        BugMergeOutcome::Invalid { reason } => result(MergeStatus::Invalid(reason)),
    }
}

fn merge_identity_ref<S: ObjectStore>(
    store: &mut S,
    tracking_ref: &str,
    id: &Hash,
) -> Result<MergeResult> {
    let remote_head = store.resolve_ref(tracking_ref)?.ok_or_else(|| Error::NotFound {
        kind: "ref",
        id: tracking_ref.to_owned(),
    })?;

    let result = |status| {
        Ok(MergeResult {
            id: id.clone(),
            status,
        })
    };

    let local_ref = identity_ref(id);
    let Some(local_head) = store.resolve_ref(&local_ref)? else {
        store.update_ref(&local_ref, &remote_head)?;
        // Validate after adoption so a broken chain surfaces as invalid
        // and the adopted ref can simply be re-fetched later.
        return match Identity::read(store, id) {
            Ok(_) => result(MergeStatus::New),
            Err(err) => {
                store.remove_ref(&local_ref)?;
                result(MergeStatus::Invalid(err.to_string()))
            }
        };
    };

    if local_head == remote_head || store.is_ancestor(&remote_head, &local_head)? {
        return result(MergeStatus::Nothing);
    }

    if store.is_ancestor(&local_head, &remote_head)? {
        store.update_ref(&local_ref, &remote_head)?;
        return match Identity::read(store, id) {
            Ok(_) => result(MergeStatus::Updated),
            Err(err) => {
                store.update_ref(&local_ref, &local_head)?;
                result(MergeStatus::Invalid(err.to_string()))
            }
        };
    }

    // Identity chains carry no mergeable operation sets; divergence needs
    // a human.
    result(MergeStatus::Invalid(
        "local and remote identity chains diverged".into(),
    ))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
