//! In-memory object store with attachable peer remotes.
//!
//! Content addresses are computed the same way for every object kind:
//! the object is rendered to a deterministic byte form and hashed, so two
//! stores holding the same history assign the same addresses.
//!
//! Remotes are other [`MemStore`]s behind an `Arc<Mutex<_>>`. Fetch copies
//! the remote's objects plus its refs under the requested prefix into
//! remote-tracking refs; push copies local refs and objects outward. This
//! is a faithful stand-in for network transfer in tests and tooling.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex};

use crate::error::{Error, Result};
use crate::hash::Hash;

use super::{ObjectStore, TreeEntry, remote_tracking_ref};

/// A shared handle to a [`MemStore`], usable as a remote.
pub type SharedMemStore = Arc<Mutex<MemStore>>;

#[derive(Debug, Clone)]
enum Object {
    Blob(Vec<u8>),
    Tree(Vec<TreeEntry>),
    Commit { tree: Hash, parents: Vec<Hash> },
}

/// In-memory [`ObjectStore`] implementation.
#[derive(Debug, Default)]
pub struct MemStore {
    objects: BTreeMap<Hash, Object>,
    refs: BTreeMap<String, Hash>,
    config: BTreeMap<String, Vec<String>>,
    clocks: BTreeMap<String, u64>,
    user_name: Option<String>,
    user_email: Option<String>,
    metadata_dir: PathBuf,
    remotes: BTreeMap<String, SharedMemStore>,
}

impl MemStore {
    /// Create an empty store with a fresh metadata directory under the
    /// system temp dir.
    #[must_use]
    pub fn new() -> Self {
        static COUNTER: AtomicU64 = AtomicU64::new(0);
        let id = COUNTER.fetch_add(1, Ordering::SeqCst);
        let dir = std::env::temp_dir().join(format!("cicada-mem-{}-{id}", std::process::id()));
        let _ = std::fs::create_dir_all(&dir);

        Self {
            metadata_dir: dir,
            ..Self::default()
        }
    }

    /// Create a store with a configured user name and email.
    #[must_use]
    pub fn with_user(name: &str, email: &str) -> Self {
        let mut store = Self::new();
        store.user_name = Some(name.to_owned());
        store.user_email = Some(email.to_owned());
        store
    }

    /// Wrap the store in a shared handle so peers can use it as a remote.
    #[must_use]
    pub fn shared(self) -> SharedMemStore {
        Arc::new(Mutex::new(self))
    }

    /// Register a peer store under a remote name.
    pub fn add_remote(&mut self, name: &str, peer: SharedMemStore) {
        self.remotes.insert(name.to_owned(), peer);
    }

    fn remote(&self, name: &str) -> Result<SharedMemStore> {
        self.remotes.get(name).cloned().ok_or_else(|| Error::NotFound {
            kind: "remote",
            id: name.to_owned(),
        })
    }

    fn object(&self, hash: &Hash) -> Result<&Object> {
        self.objects.get(hash).ok_or_else(|| Error::NotFound {
            kind: "object",
            id: hash.to_string(),
        })
    }

    fn put(&mut self, object: Object) -> Hash {
        let hash = Hash::of_bytes(&object_bytes(&object));
        self.objects.insert(hash.clone(), object);
        hash
    }
}

/// Deterministic byte form used for content addressing.
fn object_bytes(object: &Object) -> Vec<u8> {
    match object {
        Object::Blob(data) => {
            let mut bytes = b"blob\0".to_vec();
            bytes.extend_from_slice(data);
            bytes
        }
        Object::Tree(entries) => {
            let mut sorted: Vec<&TreeEntry> = entries.iter().collect();
            sorted.sort_by(|a, b| a.name.cmp(&b.name));

            let mut bytes = b"tree\0".to_vec();
            for entry in sorted {
                bytes.extend_from_slice(entry.name.as_bytes());
                bytes.push(b'\0');
                bytes.extend_from_slice(entry.hash.as_str().as_bytes());
                bytes.push(b'\n');
            }
            bytes
        }
        Object::Commit { tree, parents } => {
            let mut bytes = b"commit\0".to_vec();
            bytes.extend_from_slice(tree.as_str().as_bytes());
            bytes.push(b'\n');
            for parent in parents {
                bytes.extend_from_slice(parent.as_str().as_bytes());
                bytes.push(b'\n');
            }
            bytes
        }
    }
}

impl ObjectStore for MemStore {
    fn store_blob(&mut self, data: &[u8]) -> Result<Hash> {
        Ok(self.put(Object::Blob(data.to_vec())))
    }

    fn read_blob(&self, hash: &Hash) -> Result<Vec<u8>> {
        match self.object(hash)? {
            Object::Blob(data) => Ok(data.clone()),
            _ => Err(Error::CorruptStorage(format!("object {hash} is not a blob"))),
        }
    }

    fn has_blob(&self, hash: &Hash) -> bool {
        matches!(self.objects.get(hash), Some(Object::Blob(_)))
    }

    fn store_tree(&mut self, entries: &[TreeEntry]) -> Result<Hash> {
        Ok(self.put(Object::Tree(entries.to_vec())))
    }

    fn tree_entries(&self, hash: &Hash) -> Result<Vec<TreeEntry>> {
        let tree_hash = match self.object(hash)? {
            Object::Commit { tree, .. } => tree.clone(),
            _ => hash.clone(),
        };

        match self.object(&tree_hash)? {
            Object::Tree(entries) => Ok(entries.clone()),
            _ => Err(Error::CorruptStorage(format!(
                "object {tree_hash} is not a tree"
            ))),
        }
    }

    fn store_commit(&mut self, tree: &Hash, parents: &[Hash]) -> Result<Hash> {
        Ok(self.put(Object::Commit {
            tree: tree.clone(),
            parents: parents.to_vec(),
        }))
    }

    fn list_commits(&self, ref_name: &str) -> Result<Vec<Hash>> {
        let Some(head) = self.refs.get(ref_name) else {
            return Err(Error::NotFound {
                kind: "ref",
                id: ref_name.to_owned(),
            });
        };

        // Walk the first-parent chain from the head, then flip to
        // oldest-first order.
        let mut commits = Vec::new();
        let mut cursor = Some(head.clone());
        while let Some(hash) = cursor {
            let Object::Commit { parents, .. } = self.object(&hash)? else {
                return Err(Error::CorruptStorage(format!(
                    "ref {ref_name} points at non-commit {hash}"
                )));
            };
            cursor = parents.first().cloned();
            commits.push(hash);
        }

        commits.reverse();
        Ok(commits)
    }

    fn resolve_ref(&self, name: &str) -> Result<Option<Hash>> {
        Ok(self.refs.get(name).cloned())
    }

    fn update_ref(&mut self, name: &str, target: &Hash) -> Result<()> {
        if !matches!(self.objects.get(target), Some(Object::Commit { .. })) {
            return Err(Error::CorruptStorage(format!(
                "ref target {target} is not a stored commit"
            )));
        }
        self.refs.insert(name.to_owned(), target.clone());
        Ok(())
    }

    fn remove_ref(&mut self, name: &str) -> Result<()> {
        self.refs.remove(name);
        Ok(())
    }

    fn list_refs(&self, prefix: &str) -> Result<Vec<String>> {
        Ok(self
            .refs
            .keys()
            .filter(|name| name.starts_with(prefix))
            .cloned()
            .collect())
    }

    fn is_ancestor(&self, ancestor: &Hash, descendant: &Hash) -> Result<bool> {
        // BFS through all parents, not just the first: merge commits make
        // the history a DAG.
        let mut queue = vec![descendant.clone()];
        let mut seen = std::collections::HashSet::new();

        while let Some(hash) = queue.pop() {
            if &hash == ancestor {
                return Ok(true);
            }
            if !seen.insert(hash.clone()) {
                continue;
            }
            if let Object::Commit { parents, .. } = self.object(&hash)? {
                queue.extend(parents.iter().cloned());
            }
        }
        Ok(false)
    }

    fn fetch_refs(&mut self, remote: &str, prefix: &str) -> Result<String> {
        let peer = self.remote(remote)?;
        let peer = peer.lock().map_err(|_| {
            Error::Internal(format!("remote store '{remote}' mutex poisoned"))
        })?;

        // Object transfer is coarse: copy everything the peer has. The
        // address space is shared, so re-inserting is a no-op.
        for (hash, object) in &peer.objects {
            self.objects
                .entry(hash.clone())
                .or_insert_with(|| object.clone());
        }

        let mut fetched = 0usize;
        for (name, target) in &peer.refs {
            if name.starts_with(prefix) {
                self.refs
                    .insert(remote_tracking_ref(remote, name), target.clone());
                fetched += 1;
            }
        }

        Ok(format!("fetched {fetched} refs under {prefix} from {remote}\n"))
    }

    fn push_refs(&mut self, remote: &str, prefix: &str) -> Result<String> {
        let peer = self.remote(remote)?;
        let mut peer = peer.lock().map_err(|_| {
            Error::Internal(format!("remote store '{remote}' mutex poisoned"))
        })?;

        for (hash, object) in &self.objects {
            peer.objects
                .entry(hash.clone())
                .or_insert_with(|| object.clone());
        }

        let mut pushed = 0usize;
        for (name, target) in &self.refs {
            if name.starts_with(prefix) {
                peer.refs.insert(name.clone(), target.clone());
                pushed += 1;
            }
        }

        Ok(format!("pushed {pushed} refs under {prefix} to {remote}\n"))
    }

    fn read_config(&self, key: &str) -> Result<Vec<String>> {
        Ok(self.config.get(key).cloned().unwrap_or_default())
    }

    fn store_config(&mut self, key: &str, value: &str) -> Result<()> {
        self.config.insert(key.to_owned(), vec![value.to_owned()]);
        Ok(())
    }

    fn remove_config(&mut self, key: &str) -> Result<()> {
        self.config.remove(key);
        Ok(())
    }

    fn user_name(&self) -> Result<Option<String>> {
        Ok(self.user_name.clone())
    }

    fn user_email(&self) -> Result<Option<String>> {
        Ok(self.user_email.clone())
    }

    fn clock_value(&self, name: &str) -> Result<u64> {
        Ok(self.clocks.get(name).copied().unwrap_or(0))
    }

    fn clock_increment(&mut self, name: &str) -> Result<u64> {
        let value = self.clocks.entry(name.to_owned()).or_insert(0);
        *value += 1;
        Ok(*value)
    }

    fn metadata_dir(&self) -> &Path {
        &self.metadata_dir
    }
}

impl MemStore {
    /// Test hook: append an extra value to a config key, producing a
    /// multi-valued key.
    pub fn append_config_value(&mut self, key: &str, value: &str) {
        self.config
            .entry(key.to_owned())
            .or_default()
            .push(value.to_owned());
    }
}
