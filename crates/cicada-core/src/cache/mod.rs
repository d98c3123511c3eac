//! The repo cache: the primary entry point of the crate.
//!
//! A [`RepoCache`] owns the object store handle, the process lock, the
//! persisted excerpt index and every aggregate loaded in memory. Clients
//! resolve or create bugs through it, mutate them through its high-level
//! operations, and synchronize replicas through fetch / push / merge-all.
//!
//! Mutators return their effect explicitly and the cache applies the
//! excerpt refresh itself; aggregates never call back into the cache.
//! The cache file is rewritten on every update (write-through), so a
//! crash at worst costs a rebuild.
//!
//! A `RepoCache` must not be mutated from several threads; callers
//! serialize externally. Reads (`query_bugs`, excerpt lookups, snapshot
//! access on loaded bugs) take `&self` and may run concurrently with each
//! other.

pub mod codec;
pub mod excerpt;

pub use excerpt::{BugExcerpt, IdentityExcerpt};

use std::collections::BTreeMap;
use std::path::PathBuf;

use tracing::info;

use crate::bug::{Bug, LabelChangeResult, Snapshot, label_change_results, read_all_bugs};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identity::{self, AuthorRef, Identity, read_all_identities};
use crate::lock::RepoLock;
use crate::op::data::{
    AddCommentData, CreateData, EditCommentData, Label, LabelChangeData, OpData, SetStatusData,
    SetTitleData, Status,
};
use crate::op::Operation;
use crate::query::Query;
use crate::store::ObjectStore;
use crate::sync::{self, CancelToken, MergeResult, MergeStatus};

/// Name of the cache file under the metadata directory.
pub const CACHE_FILE_NAME: &str = "cache";

/// A loaded bug together with its compiled snapshot, kept current across
/// mutations.
#[derive(Debug)]
pub struct CachedBug {
    id: Hash,
    bug: Bug,
    snapshot: Snapshot,
}

impl CachedBug {
    fn new(bug: Bug) -> Result<Self> {
        let id = bug
            .id()
            .cloned()
            .ok_or_else(|| Error::Internal("cannot cache an uncommitted bug".into()))?;
        let snapshot = bug.compile()?;
        Ok(Self { id, bug, snapshot })
    }

    #[must_use]
    pub fn id(&self) -> &Hash {
        &self.id
    }

    /// Short prefix of the id shown to humans.
    #[must_use]
    pub fn human_id(&self) -> &str {
        self.id.human()
    }

    #[must_use]
    pub fn bug(&self) -> &Bug {
        &self.bug
    }

    #[must_use]
    pub fn snapshot(&self) -> &Snapshot {
        &self.snapshot
    }
}

/// The per-repository cache handle. See the module docs.
pub struct RepoCache<S: ObjectStore> {
    store: S,
    #[allow(dead_code)] // held for its exclusion side effect until drop
    lock: RepoLock,
    excerpts: BTreeMap<Hash, BugExcerpt>,
    identity_excerpts: BTreeMap<Hash, IdentityExcerpt>,
    bugs: BTreeMap<Hash, CachedBug>,
    identities: BTreeMap<Hash, Identity>,
}

impl<S: ObjectStore> RepoCache<S> {
    /// Open the repository: take the process lock, then load the excerpt
    /// cache from disk, rebuilding it from the refs when the file is
    /// missing, outdated or unreadable.
    ///
    /// # Errors
    ///
    /// `locked` when another live process holds the repository; any store
    /// error hit during a rebuild.
    pub fn open(store: S) -> Result<Self> {
        let lock = RepoLock::acquire(store.metadata_dir())?;
        let mut cache = Self {
            store,
            lock,
            excerpts: BTreeMap::new(),
            identity_excerpts: BTreeMap::new(),
            bugs: BTreeMap::new(),
            identities: BTreeMap::new(),
        };

        if let Err(err) = cache.load() {
            info!(reason = %err, "excerpt cache unusable, rebuilding");
            cache.rebuild()?;
            cache.write()?;
        }

        Ok(cache)
    }

    /// Write the cache out and hand the store back, releasing the lock.
    pub fn close(self) -> Result<S> {
        self.write()?;
        let Self { store, lock, .. } = self;
        drop(lock);
        Ok(store)
    }

    /// The underlying object store.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.store
    }

    fn cache_path(&self) -> PathBuf {
        self.store.metadata_dir().join(CACHE_FILE_NAME)
    }

    fn load(&mut self) -> Result<()> {
        let bytes = std::fs::read(self.cache_path())?;
        let (excerpts, identity_excerpts) = codec::decode(&bytes)?;
        self.excerpts = excerpts;
        self.identity_excerpts = identity_excerpts;
        Ok(())
    }

    /// Rebuild every excerpt by walking all bug and identity refs.
    fn rebuild(&mut self) -> Result<()> {
        info!("building excerpt cache from refs");
        self.excerpts.clear();
        self.identity_excerpts.clear();

        for item in read_all_bugs(&self.store)? {
            let bug = item.outcome?;
            let snapshot = bug.compile()?;
            let excerpt = BugExcerpt::new(&bug, &snapshot)?;
            self.excerpts.insert(excerpt.id.clone(), excerpt);
        }

        for item in read_all_identities(&self.store)? {
            let identity = item.outcome?;
            let excerpt = IdentityExcerpt::new(&identity)?;
            self.identity_excerpts.insert(excerpt.id.clone(), excerpt);
        }

        Ok(())
    }

    fn write(&self) -> Result<()> {
        let bytes = codec::encode(&self.excerpts, &self.identity_excerpts);
        std::fs::create_dir_all(self.store.metadata_dir())?;
        std::fs::write(self.cache_path(), bytes)?;
        Ok(())
    }

    // -----------------------------------------------------------------
    // Resolution
    // -----------------------------------------------------------------

    fn ensure_bug_loaded(&mut self, id: &Hash) -> Result<()> {
        if self.bugs.contains_key(id) {
            return Ok(());
        }
        let bug = Bug::read(&self.store, id)?;
        self.bugs.insert(id.clone(), CachedBug::new(bug)?);
        Ok(())
    }

    /// Load (or fetch from memory) the bug with this exact id.
    pub fn resolve_bug(&mut self, id: &Hash) -> Result<&CachedBug> {
        self.ensure_bug_loaded(id)?;
        Ok(&self.bugs[id])
    }

    /// The single bug id starting with `prefix`.
    ///
    /// # Errors
    ///
    /// `not_found` for zero matches, `ambiguous_match` for several.
    pub fn bug_id_with_prefix(&self, prefix: &str) -> Result<Hash> {
        let matches: Vec<&Hash> = self
            .excerpts
            .keys()
            .filter(|id| id.has_prefix(prefix))
            .collect();
        single_match(matches, "bug", prefix)
    }

    /// Resolve a bug by id prefix.
    pub fn resolve_bug_prefix(&mut self, prefix: &str) -> Result<&CachedBug> {
        let id = self.bug_id_with_prefix(prefix)?;
        self.resolve_bug(&id)
    }

    /// Resolve the bug whose create operation carries this metadata
    /// key/value pair.
    ///
    /// # Errors
    ///
    /// Same multiplicity rules as prefix resolution.
    pub fn resolve_bug_create_metadata(&mut self, key: &str, value: &str) -> Result<&CachedBug> {
        let matches: Vec<&Hash> = self
            .excerpts
            .values()
            .filter(|e| e.create_metadata.get(key).map(String::as_str) == Some(value))
            .map(|e| &e.id)
            .collect();
        let id = single_match(matches, "bug", &format!("{key}={value}"))?;
        self.resolve_bug(&id)
    }

    /// Find the single operation of a bug carrying this metadata
    /// key/value pair and return its hash.
    pub fn resolve_op_with_metadata(
        &mut self,
        bug_id: &Hash,
        key: &str,
        value: &str,
    ) -> Result<Hash> {
        self.ensure_bug_loaded(bug_id)?;
        let bug = self.bugs[bug_id].bug();

        let mut matches = Vec::new();
        for op in bug.operations() {
            if op.metadata_value(key) == Some(value) {
                matches.push(op.hash()?);
            }
        }
        let matches: Vec<&Hash> = matches.iter().collect();
        single_match(matches, "operation", &format!("{key}={value}"))
    }

    // -----------------------------------------------------------------
    // Queries and listings
    // -----------------------------------------------------------------

    /// Run a query over the excerpts. See [`Query`].
    #[must_use]
    pub fn query_bugs(&self, query: &Query) -> Vec<Hash> {
        query.execute(&self.excerpts, &self.identity_excerpts)
    }

    /// Every known bug id, in no particular order.
    #[must_use]
    pub fn all_bug_ids(&self) -> Vec<Hash> {
        self.excerpts.keys().cloned().collect()
    }

    /// The sorted union of labels in use. The repository has no label
    /// schema; what exists is what is valid.
    #[must_use]
    pub fn valid_labels(&self) -> Vec<Label> {
        let mut labels: Vec<Label> = self
            .excerpts
            .values()
            .flat_map(|e| e.labels.iter().cloned())
            .collect();
        labels.sort_unstable();
        labels.dedup();
        labels
    }

    /// Excerpt lookup without touching raw history.
    #[must_use]
    pub fn bug_excerpt(&self, id: &Hash) -> Option<&BugExcerpt> {
        self.excerpts.get(id)
    }

    /// Identity excerpt lookup.
    #[must_use]
    pub fn identity_excerpt(&self, id: &Hash) -> Option<&IdentityExcerpt> {
        self.identity_excerpts.get(id)
    }

    /// Drop every aggregate loaded in memory, keeping the excerpts.
    pub fn clear_bugs(&mut self) {
        self.bugs.clear();
    }

    // -----------------------------------------------------------------
    // Bug creation and mutation
    // -----------------------------------------------------------------

    /// Create a bug authored by the selected user identity, committed
    /// immediately.
    pub fn new_bug(&mut self, title: &str, message: &str) -> Result<Hash> {
        self.new_bug_with_files(title, message, Vec::new())
    }

    /// Create a bug with media attachments.
    pub fn new_bug_with_files(
        &mut self,
        title: &str,
        message: &str,
        files: Vec<Hash>,
    ) -> Result<Hash> {
        let author = self.user_author()?;
        self.new_bug_raw(author, now(), title, message, files, BTreeMap::new())
    }

    /// Create a bug with an explicit author, time and initial metadata.
    pub fn new_bug_raw(
        &mut self,
        author: AuthorRef,
        unix_time: i64,
        title: &str,
        message: &str,
        files: Vec<Hash>,
        metadata: BTreeMap<String, String>,
    ) -> Result<Hash> {
        let mut op = Operation::new(
            author,
            unix_time,
            OpData::Create(CreateData {
                title: title.to_owned(),
                message: message.to_owned(),
                files,
            }),
        );
        for (key, value) in metadata {
            op.set_metadata(key, value)?;
        }

        let mut bug = Bug::new();
        bug.append(op)?;
        bug.commit(&mut self.store)?;

        let cached = CachedBug::new(bug)?;
        let id = cached.id().clone();
        self.excerpts
            .insert(id.clone(), BugExcerpt::new(cached.bug(), cached.snapshot())?);
        self.bugs.insert(id.clone(), cached);
        self.write()?;
        Ok(id)
    }

    /// Append one operation to a bug, commit it, and refresh the excerpt.
    fn mutate(&mut self, id: &Hash, op: Operation) -> Result<()> {
        self.ensure_bug_loaded(id)?;

        let excerpt = {
            let cached = self
                .bugs
                .get_mut(id)
                .ok_or_else(|| Error::Internal("bug vanished from the cache".into()))?;
            cached.bug.append(op)?;
            cached.bug.commit(&mut self.store)?;
            cached.snapshot = cached.bug.compile()?;
            BugExcerpt::new(&cached.bug, &cached.snapshot)?
        };

        self.excerpts.insert(id.clone(), excerpt);
        self.write()
    }

    /// Comment on a bug as the selected user identity.
    pub fn add_comment(&mut self, id: &Hash, message: &str) -> Result<()> {
        self.add_comment_with_files(id, message, Vec::new())
    }

    pub fn add_comment_with_files(
        &mut self,
        id: &Hash,
        message: &str,
        files: Vec<Hash>,
    ) -> Result<()> {
        let author = self.user_author()?;
        self.add_comment_raw(id, author, now(), message, files, BTreeMap::new())
    }

    pub fn add_comment_raw(
        &mut self,
        id: &Hash,
        author: AuthorRef,
        unix_time: i64,
        message: &str,
        files: Vec<Hash>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let op = build_op(
            author,
            unix_time,
            OpData::AddComment(AddCommentData {
                message: message.to_owned(),
                files,
            }),
            metadata,
        )?;
        self.mutate(id, op)
    }

    /// Amend an earlier create or add-comment operation.
    pub fn edit_comment(&mut self, id: &Hash, target: &Hash, message: &str) -> Result<()> {
        let author = self.user_author()?;
        self.edit_comment_raw(id, author, now(), target, message, Vec::new(), BTreeMap::new())
    }

    #[allow(clippy::too_many_arguments)]
    pub fn edit_comment_raw(
        &mut self,
        id: &Hash,
        author: AuthorRef,
        unix_time: i64,
        target: &Hash,
        message: &str,
        files: Vec<Hash>,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let op = build_op(
            author,
            unix_time,
            OpData::EditComment(EditCommentData {
                target: target.clone(),
                message: message.to_owned(),
                files,
            }),
            metadata,
        )?;
        self.mutate(id, op)
    }

    /// Replace a bug's title.
    pub fn set_title(&mut self, id: &Hash, title: &str) -> Result<()> {
        let author = self.user_author()?;
        self.set_title_raw(id, author, now(), title, BTreeMap::new())
    }

    pub fn set_title_raw(
        &mut self,
        id: &Hash,
        author: AuthorRef,
        unix_time: i64,
        title: &str,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let op = build_op(
            author,
            unix_time,
            OpData::SetTitle(SetTitleData {
                title: title.to_owned(),
            }),
            metadata,
        )?;
        self.mutate(id, op)
    }

    /// Reopen a bug.
    pub fn open_bug(&mut self, id: &Hash) -> Result<()> {
        let author = self.user_author()?;
        self.set_status_raw(id, author, now(), Status::Open, BTreeMap::new())
    }

    /// Close a bug.
    pub fn close_bug(&mut self, id: &Hash) -> Result<()> {
        let author = self.user_author()?;
        self.set_status_raw(id, author, now(), Status::Closed, BTreeMap::new())
    }

    pub fn set_status_raw(
        &mut self,
        id: &Hash,
        author: AuthorRef,
        unix_time: i64,
        status: Status,
        metadata: BTreeMap<String, String>,
    ) -> Result<()> {
        let op = build_op(
            author,
            unix_time,
            OpData::SetStatus(SetStatusData { status }),
            metadata,
        )?;
        self.mutate(id, op)
    }

    /// Add and remove labels, returning the per-label outcomes.
    pub fn change_labels(
        &mut self,
        id: &Hash,
        added: &[&str],
        removed: &[&str],
    ) -> Result<Vec<LabelChangeResult>> {
        let author = self.user_author()?;
        self.change_labels_raw(id, author, now(), added, removed, BTreeMap::new())
    }

    pub fn change_labels_raw(
        &mut self,
        id: &Hash,
        author: AuthorRef,
        unix_time: i64,
        added: &[&str],
        removed: &[&str],
        metadata: BTreeMap<String, String>,
    ) -> Result<Vec<LabelChangeResult>> {
        let added: Vec<Label> = added
            .iter()
            .map(|l| Label::new(*l))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;
        let removed: Vec<Label> = removed
            .iter()
            .map(|l| Label::new(*l))
            .collect::<std::result::Result<_, _>>()
            .map_err(|e| Error::InvalidInput(e.to_string()))?;

        // The outcome is computed against the pre-change labels with the
        // same pure diff the snapshot fold applies.
        self.ensure_bug_loaded(id)?;
        let results = label_change_results(&self.bugs[id].snapshot().labels, &added, &removed);

        // Store the sets in their normal form.
        let mut added = added;
        let mut removed = removed;
        added.sort_unstable();
        added.dedup();
        removed.sort_unstable();
        removed.dedup();

        let op = build_op(
            author,
            unix_time,
            OpData::LabelChange(LabelChangeData { added, removed }),
            metadata,
        )?;
        self.mutate(id, op)?;
        Ok(results)
    }

    // -----------------------------------------------------------------
    // Identities
    // -----------------------------------------------------------------

    /// Create and commit a fresh identity.
    pub fn new_identity(&mut self, name: &str, email: &str) -> Result<Hash> {
        let mut identity = Identity::new(name, email);
        identity.commit(&mut self.store)?;

        let excerpt = IdentityExcerpt::new(&identity)?;
        let id = excerpt.id.clone();
        self.identity_excerpts.insert(id.clone(), excerpt);
        self.identities.insert(id.clone(), identity);
        self.write()?;
        Ok(id)
    }

    fn ensure_identity_loaded(&mut self, id: &Hash) -> Result<()> {
        if self.identities.contains_key(id) {
            return Ok(());
        }
        let identity = Identity::read(&self.store, id)?;
        self.identities.insert(id.clone(), identity);
        Ok(())
    }

    /// Load (or fetch from memory) the identity with this exact id.
    pub fn resolve_identity(&mut self, id: &Hash) -> Result<&Identity> {
        self.ensure_identity_loaded(id)?;
        Ok(&self.identities[id])
    }

    /// Resolve an identity by id prefix, with the usual multiplicity
    /// rules.
    pub fn resolve_identity_prefix(&mut self, prefix: &str) -> Result<&Identity> {
        let matches: Vec<&Hash> = self
            .identity_excerpts
            .keys()
            .filter(|id| id.has_prefix(prefix))
            .collect();
        let id = single_match(matches, "identity", prefix)?;
        self.resolve_identity(&id)
    }

    /// Record an identity as the repository's selected user.
    pub fn set_user_identity(&mut self, id: &Hash) -> Result<()> {
        self.ensure_identity_loaded(id)?;
        let identity = &self.identities[id];
        identity::set_user_identity(&mut self.store, identity)
    }

    /// The selected user identity id.
    pub fn user_identity_id(&self) -> Result<Hash> {
        identity::user_identity_id(&self.store)
    }

    /// Whether a user identity is selected.
    pub fn is_user_identity_set(&self) -> Result<bool> {
        identity::is_user_identity_set(&self.store)
    }

    fn user_author(&mut self) -> Result<AuthorRef> {
        let id = identity::user_identity_id(&self.store)?;
        self.ensure_identity_loaded(&id)?;
        Ok(AuthorRef::Identity { id })
    }

    // -----------------------------------------------------------------
    // Synchronization
    // -----------------------------------------------------------------

    /// Pull remote refs into remote-tracking refs. No local bug changes.
    pub fn fetch(&mut self, remote: &str) -> Result<String> {
        sync::fetch(&mut self.store, remote)
    }

    /// Publish local refs to a remote. No local state change.
    pub fn push(&mut self, remote: &str) -> Result<String> {
        sync::push(&mut self.store, remote)
    }

    /// Merge every remote-tracking ref against its local counterpart.
    ///
    /// Returns a lazy per-ref stream; merging happens as the owning
    /// thread drains it, and excerpt updates are applied between items.
    /// The cache file is rewritten once, when the stream is exhausted.
    pub fn merge_all(&mut self, remote: &str) -> MergeAll<'_, S> {
        self.merge_all_cancellable(remote, CancelToken::new())
    }

    /// [`RepoCache::merge_all`] with a cancellation token, honored
    /// between refs.
    pub fn merge_all_cancellable(&mut self, remote: &str, cancel: CancelToken) -> MergeAll<'_, S> {
        let (refs, init_error) = match sync::pending_merge_refs(&self.store, remote) {
            Ok(refs) => (refs, None),
            Err(err) => (Vec::new(), Some(err)),
        };

        MergeAll {
            cache: self,
            remote: remote.to_owned(),
            refs: refs.into_iter(),
            cancel,
            init_error,
            finished: false,
        }
    }

    fn refresh_bug(&mut self, id: &Hash) -> Result<()> {
        let bug = Bug::read(&self.store, id)?;
        let cached = CachedBug::new(bug)?;
        self.excerpts
            .insert(id.clone(), BugExcerpt::new(cached.bug(), cached.snapshot())?);
        self.bugs.insert(id.clone(), cached);
        Ok(())
    }

    fn refresh_identity(&mut self, id: &Hash) -> Result<()> {
        let identity = Identity::read(&self.store, id)?;
        self.identity_excerpts
            .insert(id.clone(), IdentityExcerpt::new(&identity)?);
        self.identities.insert(id.clone(), identity);
        Ok(())
    }
}

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn build_op(
    author: AuthorRef,
    unix_time: i64,
    data: OpData,
    metadata: BTreeMap<String, String>,
) -> Result<Operation> {
    let mut op = Operation::new(author, unix_time, data);
    for (key, value) in metadata {
        op.set_metadata(key, value)?;
    }
    Ok(op)
}

fn single_match(matches: Vec<&Hash>, kind: &'static str, query: &str) -> Result<Hash> {
    match matches.as_slice() {
        [] => Err(Error::NotFound {
            kind,
            id: query.to_owned(),
        }),
        [id] => Ok((*id).clone()),
        several => Err(Error::AmbiguousMatch {
            query: query.to_owned(),
            matches: several.iter().map(|id| id.to_string()).collect(),
        }),
    }
}

// ---------------------------------------------------------------------------
// MergeAll stream
// ---------------------------------------------------------------------------

/// Lazy per-ref merge stream borrowing the cache.
///
/// Each `next()` reconciles one remote-tracking ref and applies the
/// matching excerpt update. Replicas must not depend on the across-ref
/// ordering.
pub struct MergeAll<'a, S: ObjectStore> {
    cache: &'a mut RepoCache<S>,
    remote: String,
    refs: std::vec::IntoIter<String>,
    cancel: CancelToken,
    init_error: Option<Error>,
    finished: bool,
}

impl<S: ObjectStore> Iterator for MergeAll<'_, S> {
    type Item = Result<MergeResult>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if let Some(err) = self.init_error.take() {
            self.finished = true;
            return Some(Err(err));
        }

        if self.cancel.is_cancelled() {
            self.finished = true;
            return self.flush();
        }

        let Some(tracking_ref) = self.refs.next() else {
            self.finished = true;
            return self.flush();
        };

        let result = match sync::merge_ref(&mut self.cache.store, &self.remote, &tracking_ref) {
            Ok(result) => result,
            Err(err) => return Some(Err(err)),
        };

        if matches!(result.status, MergeStatus::New | MergeStatus::Updated) {
            let refresh = if tracking_ref.contains("/bugs/") {
                self.cache.refresh_bug(&result.id)
            } else {
                self.cache.refresh_identity(&result.id)
            };
            if let Err(err) = refresh {
                return Some(Err(err));
            }
        }

        Some(Ok(result))
    }
}

impl<S: ObjectStore> MergeAll<'_, S> {
    /// Final write-through; a failure surfaces as a last stream element.
    fn flush(&mut self) -> Option<Result<MergeResult>> {
        match self.cache.write() {
            Ok(()) => None,
            Err(err) => Some(Err(err)),
        }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
