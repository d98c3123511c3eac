//! The bug aggregate.
//!
//! A [`Bug`] is an ordered operation sequence split in two regions:
//! committed operations loaded from (or already written to) the object
//! store, and a staging region of operations appended in memory. The
//! staging region is one logical pack: everything in it commits together,
//! atomically, as one blob + tree + commit, and the bug ref moves only
//! after all writes succeed.
//!
//! A bug is identified by the hash of its first commit.

pub mod pack;
pub mod snapshot;

pub use pack::{OperationPack, OPS_ENTRY_NAME};
pub use snapshot::{
    Comment, CommentItem, LabelChangeResult, LabelChangeStatus, Snapshot, TimelineItem,
    label_change_results,
};

use tracing::debug;

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::op::data::OpData;
use crate::op::validate::validate_sequence;
use crate::op::Operation;
use crate::store::ObjectStore;

/// Ref prefix for bug heads.
pub const BUGS_REF_PREFIX: &str = "refs/cicada/bugs/";

/// Logical clock witnessing bug creations.
pub const CREATE_CLOCK_NAME: &str = "bug-create";

/// Logical clock witnessing bug edits.
pub const EDIT_CLOCK_NAME: &str = "bug-edit";

/// Full ref name for a bug id.
#[must_use]
pub fn bug_ref(id: &Hash) -> String {
    format!("{BUGS_REF_PREFIX}{id}")
}

/// An operation that has been written to the store, together with its
/// stable hash and the commit that carries it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommittedOp {
    pub op: Operation,
    /// The operation's content address, stable from commit on.
    pub hash: Hash,
    /// The commit whose pack contains the operation.
    pub commit: Hash,
}

/// A bug: committed history plus a staging region.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Bug {
    id: Option<Hash>,
    committed: Vec<CommittedOp>,
    staged: Vec<Operation>,
    head: Option<Hash>,
}

impl Bug {
    /// A bug with no history at all. It only gains an id on first commit.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// The bug id: the hash of the first commit. `None` before that.
    #[must_use]
    pub fn id(&self) -> Option<&Hash> {
        self.id.as_ref()
    }

    /// Short prefix of the id shown to humans.
    #[must_use]
    pub fn human_id(&self) -> Option<&str> {
        self.id.as_ref().map(Hash::human)
    }

    /// The current tip commit, if any.
    #[must_use]
    pub fn head(&self) -> Option<&Hash> {
        self.head.as_ref()
    }

    /// Whether the staging region holds anything.
    #[must_use]
    pub fn has_pending(&self) -> bool {
        !self.staged.is_empty()
    }

    /// Every operation, committed first, then staged, in order.
    pub fn operations(&self) -> impl Iterator<Item = &Operation> {
        self.committed.iter().map(|c| &c.op).chain(self.staged.iter())
    }

    /// The committed region.
    #[must_use]
    pub fn committed_ops(&self) -> &[CommittedOp] {
        &self.committed
    }

    /// The staging region.
    #[must_use]
    pub fn staged_ops(&self) -> &[Operation] {
        &self.staged
    }

    /// Mutable access to a staged operation, for metadata attachment
    /// before commit. Committed operations are immutable.
    pub fn staged_op_mut(&mut self, index: usize) -> Option<&mut Operation> {
        self.staged.get_mut(index)
    }

    /// The create operation, once the bug has any history.
    #[must_use]
    pub fn first_op(&self) -> Option<&Operation> {
        self.operations().next()
    }

    /// Logical creation time: the create operation's stamp.
    #[must_use]
    pub fn create_lamport_time(&self) -> u64 {
        self.first_op().map_or(0, |op| op.lamport_time)
    }

    /// Logical last-edit time: the newest edit stamp, falling back to the
    /// creation stamp for a bug that was never edited.
    #[must_use]
    pub fn edit_lamport_time(&self) -> u64 {
        self.operations()
            .filter(|op| !matches!(op.data, OpData::Create(_)))
            .map(|op| op.lamport_time)
            .max()
            .unwrap_or_else(|| self.create_lamport_time())
    }

    /// Append an operation to the staging region.
    ///
    /// The operation is validated first, together with its position in the
    /// sequence; a failed append leaves the bug unchanged.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` naming the violated rule.
    pub fn append(&mut self, op: Operation) -> Result<()> {
        op.validate()?;

        let is_create = matches!(op.data, OpData::Create(_));
        let is_first = self.committed.is_empty() && self.staged.is_empty();
        if is_first && !is_create {
            return Err(Error::InvalidInput(
                "the first operation of a bug must be a create".into(),
            ));
        }
        if !is_first && is_create {
            return Err(Error::InvalidInput(
                "a bug can only be created once".into(),
            ));
        }

        self.staged.push(op);
        Ok(())
    }

    /// Validate the full operation sequence against the history
    /// invariants.
    pub fn validate(&self) -> Result<()> {
        validate_sequence(self.operations())?;
        Ok(())
    }

    /// Compile the snapshot from the full operation sequence.
    ///
    /// # Errors
    ///
    /// Returns `internal` if an operation in the history cannot be hashed.
    pub fn compile(&self) -> Result<Snapshot> {
        let mut snapshot = Snapshot::for_bug(self.id.clone());
        for op in self.operations() {
            snapshot.apply(op)?;
        }
        Ok(snapshot)
    }

    /// Commit the staging region as one pack.
    ///
    /// Staged operations are stamped from the logical clocks, serialized
    /// into a single pack blob, wrapped in a tree (plus one entry per
    /// media blob) and committed on top of the current head. The bug ref
    /// moves last, once every object write has succeeded. The first commit
    /// hash becomes the bug id.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` when nothing is staged or the resulting
    /// sequence would violate a history invariant.
    pub fn commit<S: ObjectStore>(&mut self, store: &mut S) -> Result<Hash> {
        if self.staged.is_empty() {
            return Err(Error::InvalidInput(
                "nothing staged; a bug cannot commit without operations".into(),
            ));
        }

        // Every commit witnesses the edit clock; the creation additionally
        // witnesses the create clock. Stamps land on the operations before
        // serialization, so the hashes cover them.
        let edit_tick = store.clock_increment(EDIT_CLOCK_NAME)?;
        for op in &mut self.staged {
            op.lamport_time = if matches!(op.data, OpData::Create(_)) {
                store.clock_increment(CREATE_CLOCK_NAME)?
            } else {
                edit_tick
            };
        }

        self.validate()?;

        let pack = OperationPack {
            operations: self.staged.clone(),
        };
        let blob = store.store_blob(&pack.encode()?)?;
        let tree = store.store_tree(&pack.tree_entries(blob))?;

        let parents: Vec<Hash> = self.head.iter().cloned().collect();
        let commit = store.store_commit(&tree, &parents)?;

        let id = self.id.clone().unwrap_or_else(|| commit.clone());
        store.update_ref(&bug_ref(&id), &commit)?;

        for op in self.staged.drain(..) {
            let hash = op
                .hash()
                .map_err(|e| Error::Internal(format!("freshly committed operation is unhashable: {e}")))?;
            self.committed.push(CommittedOp {
                op,
                hash,
                commit: commit.clone(),
            });
        }

        self.id = Some(id.clone());
        self.head = Some(commit.clone());
        debug!(bug = %id.human(), commit = %commit, "committed operation pack");

        Ok(commit)
    }

    /// Commit only when the staging region holds something.
    ///
    /// # Errors
    ///
    /// Same as [`Bug::commit`], minus the empty-staging case.
    pub fn commit_as_needed<S: ObjectStore>(&mut self, store: &mut S) -> Result<Option<Hash>> {
        if self.has_pending() {
            Ok(Some(self.commit(store)?))
        } else {
            Ok(None)
        }
    }

    /// Load a bug by id from its canonical ref.
    ///
    /// # Errors
    ///
    /// `not_found` when the bug does not exist; `corrupt_storage` when a
    /// commit tree has no `ops` entry or its pack does not decode.
    pub fn read<S: ObjectStore>(store: &S, id: &Hash) -> Result<Self> {
        let bug = Self::read_ref(store, &bug_ref(id)).map_err(|err| match err {
            Error::NotFound { kind: "ref", .. } => Error::NotFound {
                kind: "bug",
                id: id.to_string(),
            },
            other => other,
        })?;

        if bug.id() != Some(id) {
            return Err(Error::CorruptStorage(format!(
                "bug ref for {id} holds a history whose first commit is {}",
                bug.id().map_or_else(|| "missing".to_owned(), Hash::to_string),
            )));
        }
        Ok(bug)
    }

    /// Load a bug from an arbitrary ref (canonical or remote-tracking).
    ///
    /// Commits are walked oldest first; each commit contributes its pack's
    /// operations in pack order. The resulting sequence is validated.
    pub fn read_ref<S: ObjectStore>(store: &S, ref_name: &str) -> Result<Self> {
        let commits = store.list_commits(ref_name)?;

        let mut bug = Self::new();
        for commit in &commits {
            let entries = store.tree_entries(commit)?;
            let ops_entry = entries
                .iter()
                .find(|entry| entry.name == OPS_ENTRY_NAME)
                .ok_or_else(|| {
                    Error::CorruptStorage(format!(
                        "bug commit {commit} has no '{OPS_ENTRY_NAME}' tree entry"
                    ))
                })?;

            let pack = OperationPack::decode(&store.read_blob(&ops_entry.hash)?)?;
            for op in pack.operations {
                let hash = op.hash().map_err(|e| {
                    Error::CorruptStorage(format!("stored operation is unhashable: {e}"))
                })?;
                bug.committed.push(CommittedOp {
                    op,
                    hash,
                    commit: commit.clone(),
                });
            }
        }

        bug.id = commits.first().cloned();
        bug.head = commits.last().cloned();
        bug.validate()?;
        Ok(bug)
    }
}

// ---------------------------------------------------------------------------
// Bug streaming
// ---------------------------------------------------------------------------

/// One element of the all-bugs stream.
#[derive(Debug)]
pub struct BugStreamItem {
    /// The bug id taken from the ref name.
    pub id: Hash,
    /// The loaded bug, or the error hit while loading it.
    pub outcome: Result<Bug>,
}

/// Stream every bug known to the store.
///
/// Each element carries its own outcome, so consumers never interleave
/// iteration with error inspection; one unreadable bug does not stop the
/// stream.
pub fn read_all_bugs<S: ObjectStore>(
    store: &S,
) -> Result<impl Iterator<Item = BugStreamItem> + '_> {
    let refs = store.list_refs(BUGS_REF_PREFIX)?;
    Ok(refs.into_iter().map(move |ref_name| {
        let raw_id = ref_name.strip_prefix(BUGS_REF_PREFIX).unwrap_or(&ref_name);
        match Hash::from_hex(raw_id) {
            Ok(id) => {
                let outcome = Bug::read(store, &id);
                BugStreamItem { id, outcome }
            }
            Err(err) => BugStreamItem {
                id: Hash::of_bytes(ref_name.as_bytes()),
                outcome: Err(Error::CorruptStorage(format!(
                    "malformed bug ref '{ref_name}': {err}"
                ))),
            },
        }
    }))
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::AuthorRef;
    use crate::op::data::{AddCommentData, CreateData, SetStatusData, Status};
    use crate::store::mem::MemStore;

    fn author() -> AuthorRef {
        AuthorRef::Identity {
            id: Hash::of_bytes(b"rene"),
        }
    }

    fn create_op(title: &str, message: &str) -> Operation {
        Operation::new(
            author(),
            100,
            OpData::Create(CreateData {
                title: title.into(),
                message: message.into(),
                files: vec![],
            }),
        )
    }

    fn comment_op(message: &str) -> Operation {
        Operation::new(
            author(),
            200,
            OpData::AddComment(AddCommentData {
                message: message.into(),
                files: vec![],
            }),
        )
    }

    fn fresh_bug() -> Bug {
        let mut bug = Bug::new();
        bug.append(create_op("login broken", "cannot sign in")).unwrap();
        bug
    }

    // -------------------------------------------------------------------
    // Append
    // -------------------------------------------------------------------

    #[test]
    fn first_append_must_be_create() {
        let mut bug = Bug::new();
        assert!(bug.append(comment_op("too early")).is_err());
        assert!(!bug.has_pending(), "failed append leaves the bug unchanged");

        bug.append(create_op("t", "m")).unwrap();
        assert!(bug.has_pending());
    }

    #[test]
    fn second_create_is_rejected() {
        let mut bug = fresh_bug();
        assert!(bug.append(create_op("again", "m")).is_err());
        assert_eq!(bug.staged_ops().len(), 1);
    }

    #[test]
    fn invalid_op_is_rejected_on_append() {
        let mut bug = fresh_bug();
        let before = bug.staged_ops().len();
        assert!(bug.append(create_op("", "m")).is_err());
        assert_eq!(bug.staged_ops().len(), before);
    }

    // -------------------------------------------------------------------
    // Commit
    // -------------------------------------------------------------------

    #[test]
    fn empty_bug_cannot_commit() {
        let mut store = MemStore::new();
        let mut bug = Bug::new();
        assert!(bug.commit(&mut store).is_err());
    }

    #[test]
    fn first_commit_hash_becomes_the_id() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        let commit = bug.commit(&mut store).unwrap();

        assert_eq!(bug.id(), Some(&commit));
        assert_eq!(bug.head(), Some(&commit));
        assert!(!bug.has_pending());
        assert_eq!(
            store.resolve_ref(&bug_ref(&commit)).unwrap(),
            Some(commit.clone())
        );
    }

    #[test]
    fn staged_region_commits_as_one_pack() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        bug.append(comment_op("first")).unwrap();
        bug.append(comment_op("second")).unwrap();
        let commit = bug.commit(&mut store).unwrap();

        assert!(bug.committed_ops().iter().all(|c| c.commit == commit));
        assert_eq!(bug.committed_ops().len(), 3);
    }

    #[test]
    fn later_commits_chain_on_the_head() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        let first = bug.commit(&mut store).unwrap();

        bug.append(comment_op("follow-up")).unwrap();
        let second = bug.commit(&mut store).unwrap();

        assert_ne!(first, second);
        assert_eq!(bug.id(), Some(&first), "the id never changes");
        assert_eq!(bug.head(), Some(&second));
        assert_eq!(
            store.list_commits(&bug_ref(&first)).unwrap(),
            vec![first, second]
        );
    }

    #[test]
    fn commit_as_needed_is_a_no_op_when_clean() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        assert!(bug.commit_as_needed(&mut store).unwrap().is_some());
        assert!(bug.commit_as_needed(&mut store).unwrap().is_none());
    }

    #[test]
    fn commit_stamps_logical_clocks() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        bug.append(comment_op("c")).unwrap();
        bug.commit(&mut store).unwrap();

        assert_eq!(bug.create_lamport_time(), 1);
        assert!(bug.edit_lamport_time() >= 1);

        let mut other = Bug::new();
        other.append(create_op("second bug", "m")).unwrap();
        other.commit(&mut store).unwrap();
        assert!(
            other.create_lamport_time() > bug.create_lamport_time(),
            "later creations get later stamps"
        );
    }

    #[test]
    fn committed_hashes_are_stable_across_reload() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        bug.append(comment_op("c")).unwrap();
        bug.commit(&mut store).unwrap();

        let loaded = Bug::read(&store, bug.id().unwrap()).unwrap();
        let original: Vec<&Hash> = bug.committed_ops().iter().map(|c| &c.hash).collect();
        let reloaded: Vec<&Hash> = loaded.committed_ops().iter().map(|c| &c.hash).collect();
        assert_eq!(original, reloaded);
    }

    // -------------------------------------------------------------------
    // Load and compile
    // -------------------------------------------------------------------

    #[test]
    fn commit_load_compile_round_trip() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        bug.append(comment_op("reproduces on 1.2")).unwrap();

        let precommit = bug.compile().unwrap();
        bug.commit(&mut store).unwrap();

        let loaded = Bug::read(&store, bug.id().unwrap()).unwrap();
        let compiled = loaded.compile().unwrap();

        assert_eq!(compiled.title, precommit.title);
        assert_eq!(compiled.comments, precommit.comments);
        assert_eq!(compiled.status, precommit.status);
        assert_eq!(compiled.id, loaded.id().cloned());
    }

    #[test]
    fn read_missing_bug_is_not_found() {
        let store = MemStore::new();
        let id = Hash::of_bytes(b"ghost");
        assert!(matches!(
            Bug::read(&store, &id),
            Err(Error::NotFound { kind: "bug", .. })
        ));
    }

    #[test]
    fn compile_reflects_staged_operations() {
        let mut store = MemStore::new();
        let mut bug = fresh_bug();
        bug.commit(&mut store).unwrap();

        bug.append(Operation::new(
            author(),
            300,
            OpData::SetStatus(SetStatusData {
                status: Status::Closed,
            }),
        ))
        .unwrap();

        let snapshot = bug.compile().unwrap();
        assert_eq!(snapshot.status, Status::Closed);
        assert_eq!(snapshot.operations.len(), 2);
    }

    // -------------------------------------------------------------------
    // Streaming
    // -------------------------------------------------------------------

    #[test]
    fn stream_yields_every_bug_with_outcomes() {
        let mut store = MemStore::new();
        let mut first = fresh_bug();
        first.commit(&mut store).unwrap();
        let mut second = Bug::new();
        second.append(create_op("other bug", "m")).unwrap();
        second.commit(&mut store).unwrap();

        let mut ids: Vec<Hash> = read_all_bugs(&store)
            .unwrap()
            .map(|item| {
                item.outcome.expect("bug should load");
                item.id
            })
            .collect();
        ids.sort();

        let mut expected = vec![
            first.id().unwrap().clone(),
            second.id().unwrap().clone(),
        ];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
