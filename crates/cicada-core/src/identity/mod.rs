//! Versioned identities.
//!
//! An identity is an append-only chain of versions, stored one version per
//! commit under its own ref namespace. The identity id is the hash of the
//! first commit. Operations reference identities by id through
//! [`AuthorRef`]; very old histories may instead carry the author inline,
//! which decodes as [`AuthorRef::Legacy`].

use std::collections::BTreeMap;
use std::fmt;

use rand::RngCore;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::store::{ObjectStore, TreeEntry};

/// Ref prefix for identity heads.
pub const IDENTITIES_REF_PREFIX: &str = "refs/cicada/identities/";

/// Name of the single blob entry in each identity commit tree.
pub const VERSION_ENTRY_NAME: &str = "version";

/// Config key holding the selected identity id.
pub const USER_IDENTITY_CONFIG_KEY: &str = "cicada.user-identity";

/// Logical clock stamping identity versions.
pub const IDENTITY_CLOCK_NAME: &str = "identity";

/// Number of random bytes seeding a new identity's first version.
pub const NONCE_LEN: usize = 20;

/// Full ref name for an identity id.
#[must_use]
pub fn identity_ref(id: &Hash) -> String {
    format!("{IDENTITIES_REF_PREFIX}{id}")
}

// ---------------------------------------------------------------------------
// Key
// ---------------------------------------------------------------------------

/// A signing key recorded on an identity version. Keys are recorded but not
/// verified by this crate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Key {
    /// The key fingerprint.
    pub fingerprint: String,
    /// The public key material, armored.
    pub pub_key: String,
}

// ---------------------------------------------------------------------------
// Version
// ---------------------------------------------------------------------------

/// One link in an identity chain.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Version {
    pub name: String,
    pub email: String,
    #[serde(default)]
    pub login: String,
    #[serde(default)]
    pub avatar_url: String,
    #[serde(default)]
    pub keys: Vec<Key>,
    /// Random bytes giving the first version (and therefore the identity
    /// id) entropy even for identical user details.
    #[serde(default, with = "hex_bytes")]
    pub nonce: Vec<u8>,
    pub unix_time: i64,
    /// Logical time of the version; non-decreasing along the chain.
    pub lamport_time: u64,

    #[serde(skip)]
    commit: Option<Hash>,
}

impl Version {
    /// The commit this version was loaded from or written to, if any.
    #[must_use]
    pub fn commit(&self) -> Option<&Hash> {
        self.commit.as_ref()
    }
}

mod hex_bytes {
    use serde::de::Error as _;
    use serde::{Deserialize, Deserializer, Serializer};

    pub fn serialize<S: Serializer>(bytes: &[u8], serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(&hex::encode(bytes))
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<u8>, D::Error> {
        let raw = String::deserialize(deserializer)?;
        hex::decode(&raw).map_err(D::Error::custom)
    }
}

// ---------------------------------------------------------------------------
// Identity
// ---------------------------------------------------------------------------

/// A versioned identity chain.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    id: Option<Hash>,
    versions: Vec<Version>,
}

impl Identity {
    /// Start a new identity from a name and email.
    #[must_use]
    pub fn new(name: &str, email: &str) -> Self {
        let mut nonce = vec![0u8; NONCE_LEN];
        rand::rng().fill_bytes(&mut nonce);

        Self {
            id: None,
            versions: vec![Version {
                name: name.to_owned(),
                email: email.to_owned(),
                login: String::new(),
                avatar_url: String::new(),
                keys: Vec::new(),
                nonce,
                unix_time: chrono::Utc::now().timestamp(),
                lamport_time: 0,
                commit: None,
            }],
        }
    }

    /// Build an identity from the store's configured user name and email.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` when the store has no user configured.
    pub fn from_store_user<S: ObjectStore>(store: &S) -> Result<Self> {
        let name = store.user_name()?.filter(|n| !n.is_empty()).ok_or_else(|| {
            Error::InvalidInput("no user name configured in the object store".into())
        })?;
        let email = store.user_email()?.filter(|e| !e.is_empty()).ok_or_else(|| {
            Error::InvalidInput("no user email configured in the object store".into())
        })?;

        Ok(Self::new(&name, &email))
    }

    /// Append a new version to the chain. It is written out on the next
    /// [`Identity::commit`].
    pub fn add_version(&mut self, version: Version) {
        self.versions.push(version);
    }

    /// Start the next version of the chain: the current details, ready to
    /// amend, not yet stamped or committed. Only the first version carries
    /// a nonce.
    #[must_use]
    pub fn next_version(&self) -> Version {
        let mut version = self.last_version().clone();
        version.commit = None;
        version.nonce = Vec::new();
        version.lamport_time = 0;
        version.unix_time = chrono::Utc::now().timestamp();
        version
    }

    /// The identity id: the hash of the first commit. `None` until the
    /// first commit happens.
    #[must_use]
    pub fn id(&self) -> Option<&Hash> {
        self.id.as_ref()
    }

    /// Short prefix of the id shown to humans.
    #[must_use]
    pub fn human_id(&self) -> Option<&str> {
        self.id.as_ref().map(Hash::human)
    }

    /// Whether any version still needs to be written to the store.
    #[must_use]
    pub fn needs_commit(&self) -> bool {
        self.versions.iter().any(|v| v.commit.is_none())
    }

    /// The most recent version. An identity always has at least one.
    #[must_use]
    pub fn last_version(&self) -> &Version {
        self.versions
            .last()
            .expect("an identity is constructed with one version and versions are never removed")
    }

    /// All versions, oldest first.
    #[must_use]
    pub fn versions(&self) -> &[Version] {
        &self.versions
    }

    pub fn name(&self) -> &str {
        &self.last_version().name
    }

    pub fn email(&self) -> &str {
        &self.last_version().email
    }

    pub fn login(&self) -> &str {
        &self.last_version().login
    }

    pub fn avatar_url(&self) -> &str {
        &self.last_version().avatar_url
    }

    /// Keys of the latest version.
    #[must_use]
    pub fn keys(&self) -> &[Key] {
        &self.last_version().keys
    }

    /// The keys valid at a given logical time: those of the latest version
    /// whose logical time is ≤ `lamport_time`.
    #[must_use]
    pub fn valid_keys_at(&self, lamport_time: u64) -> &[Key] {
        let mut result: &[Key] = &[];
        for version in &self.versions {
            if version.lamport_time > lamport_time {
                break;
            }
            result = &version.keys;
        }
        result
    }

    /// A non-empty display string built from the non-empty fields.
    #[must_use]
    pub fn display_name(&self) -> String {
        display_name_of(self.name(), self.login(), self.email())
    }

    /// Whether the query is a case-insensitive substring of the name or
    /// login.
    #[must_use]
    pub fn match_query(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name().to_lowercase().contains(&query)
            || self.login().to_lowercase().contains(&query)
    }

    /// Check the chain invariants: a usable display field on every version
    /// and non-decreasing logical times.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` on the first violated invariant.
    pub fn validate(&self) -> Result<()> {
        let mut last_time = 0u64;
        for version in &self.versions {
            if version.name.is_empty() && version.login.is_empty() {
                return Err(Error::InvalidInput(
                    "identity version has neither name nor login".into(),
                ));
            }
            if version.lamport_time < last_time {
                return Err(Error::InvalidInput(format!(
                    "non-chronological identity versions ({last_time} -> {})",
                    version.lamport_time
                )));
            }
            last_time = version.lamport_time;
        }

        if self.versions.first().is_some_and(|v| v.nonce.is_empty()) {
            return Err(Error::InvalidInput(
                "first identity version carries no nonce".into(),
            ));
        }

        Ok(())
    }

    /// Write every not-yet-committed version as its own commit and advance
    /// the identity ref.
    ///
    /// Versions with a zero logical time are stamped from the identity
    /// clock before serialization. The first commit's hash becomes the id.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` when there is nothing to commit.
    pub fn commit<S: ObjectStore>(&mut self, store: &mut S) -> Result<()> {
        if !self.needs_commit() {
            return Err(Error::InvalidInput(
                "every identity version is already committed".into(),
            ));
        }

        // Stamp before validating: the chain invariant covers the stamped
        // values, not the zero placeholders.
        for version in &mut self.versions {
            if version.commit.is_none() && version.lamport_time == 0 {
                version.lamport_time = store.clock_increment(IDENTITY_CLOCK_NAME)?;
            }
        }
        self.validate()?;

        let mut last_commit = self
            .versions
            .iter()
            .rev()
            .find_map(|v| v.commit.clone());

        for version in &mut self.versions {
            if version.commit.is_some() {
                continue;
            }

            let blob = store.store_blob(&serde_json::to_vec(&*version).map_err(|e| {
                Error::Internal(format!("identity version failed to serialize: {e}"))
            })?)?;
            let tree = store.store_tree(&[TreeEntry::new(VERSION_ENTRY_NAME, blob)])?;

            let parents: Vec<Hash> = last_commit.iter().cloned().collect();
            let commit = store.store_commit(&tree, &parents)?;

            version.commit = Some(commit.clone());
            if self.id.is_none() {
                self.id = Some(commit.clone());
            }
            last_commit = Some(commit);
        }

        let id = self
            .id
            .clone()
            .ok_or_else(|| Error::Internal("identity committed but has no id".into()))?;
        let head = last_commit
            .ok_or_else(|| Error::Internal("identity committed but has no head".into()))?;
        store.update_ref(&identity_ref(&id), &head)?;

        Ok(())
    }

    /// Commit only when a version is pending.
    pub fn commit_as_needed<S: ObjectStore>(&mut self, store: &mut S) -> Result<()> {
        if self.needs_commit() {
            self.commit(store)?;
        }
        Ok(())
    }

    /// Load an identity from its ref, oldest version first.
    ///
    /// # Errors
    ///
    /// Returns `not_found` when the ref does not exist and
    /// `corrupt_storage` when a commit tree does not hold exactly one
    /// `version` entry or its blob is not a valid version document.
    pub fn read<S: ObjectStore>(store: &S, id: &Hash) -> Result<Self> {
        let ref_name = identity_ref(id);
        let commits = store.list_commits(&ref_name).map_err(|err| match err {
            Error::NotFound { .. } => Error::NotFound {
                kind: "identity",
                id: id.to_string(),
            },
            other => other,
        })?;

        let mut versions = Vec::with_capacity(commits.len());
        for commit in commits {
            let entries = store.tree_entries(&commit)?;
            let [entry] = entries.as_slice() else {
                return Err(Error::CorruptStorage(format!(
                    "identity commit {commit} holds {} tree entries, expected 1",
                    entries.len()
                )));
            };
            if entry.name != VERSION_ENTRY_NAME {
                return Err(Error::CorruptStorage(format!(
                    "identity commit {commit} holds entry '{}', expected '{VERSION_ENTRY_NAME}'",
                    entry.name
                )));
            }

            let data = store.read_blob(&entry.hash)?;
            let mut version: Version = serde_json::from_slice(&data).map_err(|e| {
                Error::CorruptStorage(format!("bad identity version in commit {commit}: {e}"))
            })?;
            version.commit = Some(commit);
            versions.push(version);
        }

        if versions.is_empty() {
            return Err(Error::CorruptStorage(format!(
                "identity {id} has a ref but no versions"
            )));
        }

        let identity = Self {
            id: Some(id.clone()),
            versions,
        };
        identity.validate()?;
        Ok(identity)
    }
}

fn display_name_of(name: &str, login: &str, email: &str) -> String {
    match (name.is_empty(), login.is_empty()) {
        (false, true) => name.to_owned(),
        (true, false) => login.to_owned(),
        (false, false) => format!("{name} ({login})"),
        // Unreachable on a validated identity; fall back to the email so
        // the accessor stays total.
        (true, true) => email.to_owned(),
    }
}

// ---------------------------------------------------------------------------
// Identity streaming
// ---------------------------------------------------------------------------

/// One element of the all-identities stream.
#[derive(Debug)]
pub struct IdentityStreamItem {
    /// The identity id taken from the ref name.
    pub id: Hash,
    /// The loaded identity, or the error hit while loading it.
    pub outcome: Result<Identity>,
}

/// Stream every identity known to the store.
///
/// Each element carries its own outcome; one unreadable identity does not
/// stop the stream.
pub fn read_all_identities<S: ObjectStore>(
    store: &S,
) -> Result<impl Iterator<Item = IdentityStreamItem> + '_> {
    let refs = store.list_refs(IDENTITIES_REF_PREFIX)?;
    Ok(refs.into_iter().map(move |ref_name| {
        let raw_id = ref_name
            .strip_prefix(IDENTITIES_REF_PREFIX)
            .unwrap_or(&ref_name);
        match Hash::from_hex(raw_id) {
            Ok(id) => {
                let outcome = Identity::read(store, &id);
                IdentityStreamItem { id, outcome }
            }
            Err(err) => IdentityStreamItem {
                id: Hash::of_bytes(ref_name.as_bytes()),
                outcome: Err(Error::CorruptStorage(format!(
                    "malformed identity ref '{ref_name}': {err}"
                ))),
            },
        }
    }))
}

// ---------------------------------------------------------------------------
// User identity selection
// ---------------------------------------------------------------------------

/// Record `identity` as the store's selected user identity.
///
/// # Errors
///
/// Returns `internal` if the identity was never committed (it has no id to
/// record).
pub fn set_user_identity<S: ObjectStore>(store: &mut S, identity: &Identity) -> Result<()> {
    let id = identity
        .id()
        .ok_or_else(|| Error::Internal("cannot select an uncommitted identity".into()))?;
    store.store_config(USER_IDENTITY_CONFIG_KEY, id.as_str())
}

/// The selected user identity id.
///
/// # Errors
///
/// `not_found` when no identity is selected; `corrupt_storage` when the
/// config key holds more than one value.
pub fn user_identity_id<S: ObjectStore>(store: &S) -> Result<Hash> {
    let values = store.read_config(USER_IDENTITY_CONFIG_KEY)?;
    match values.as_slice() {
        [] => Err(Error::NotFound {
            kind: "user identity",
            id: USER_IDENTITY_CONFIG_KEY.to_owned(),
        }),
        [value] => Ok(Hash::from_hex(value)?),
        _ => Err(Error::CorruptStorage(format!(
            "{USER_IDENTITY_CONFIG_KEY} holds {} values, expected at most one",
            values.len()
        ))),
    }
}

/// Load the selected user identity.
pub fn user_identity<S: ObjectStore>(store: &S) -> Result<Identity> {
    let id = user_identity_id(store)?;
    Identity::read(store, &id)
}

/// Whether a user identity is selected.
pub fn is_user_identity_set<S: ObjectStore>(store: &S) -> Result<bool> {
    Ok(!store.read_config(USER_IDENTITY_CONFIG_KEY)?.is_empty())
}

// ---------------------------------------------------------------------------
// AuthorRef
// ---------------------------------------------------------------------------

/// How an operation references its author.
///
/// Normal histories reference identities by id. Histories predating
/// separate identity storage inline the author details instead; they are
/// preserved as written.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthorRef {
    /// Reference into the identity namespace.
    Identity { id: Hash },
    /// Inlined legacy author data.
    Legacy { name: String, email: String },
}

impl AuthorRef {
    /// The referenced identity id, if this is not a legacy author.
    #[must_use]
    pub fn id(&self) -> Option<&Hash> {
        match self {
            Self::Identity { id } => Some(id),
            Self::Legacy { .. } => None,
        }
    }

    /// Build a reference to a committed identity.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the identity has no id yet.
    pub fn to_identity(identity: &Identity) -> Result<Self> {
        let id = identity
            .id()
            .ok_or_else(|| Error::Internal("cannot reference an uncommitted identity".into()))?;
        Ok(Self::Identity { id: id.clone() })
    }
}

impl fmt::Display for AuthorRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Identity { id } => write!(f, "{}", id.human()),
            Self::Legacy { name, .. } => f.write_str(name),
        }
    }
}

impl Serialize for AuthorRef {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = BTreeMap::new();
        match self {
            Self::Identity { id } => {
                map.insert("id", id.as_str().to_owned());
            }
            Self::Legacy { name, email } => {
                map.insert("name", name.clone());
                map.insert("email", email.clone());
            }
        }
        map.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for AuthorRef {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let map = BTreeMap::<String, String>::deserialize(deserializer)?;
        if let Some(id) = map.get("id") {
            let id = Hash::from_hex(id).map_err(D::Error::custom)?;
            return Ok(Self::Identity { id });
        }

        let name = map.get("name").cloned().unwrap_or_default();
        let email = map.get("email").cloned().unwrap_or_default();
        if name.is_empty() && email.is_empty() {
            return Err(D::Error::custom(
                "author is neither an identity reference nor legacy author data",
            ));
        }
        Ok(Self::Legacy { name, email })
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::MemStore;

    fn committed(store: &mut MemStore, name: &str, email: &str) -> Identity {
        let mut identity = Identity::new(name, email);
        identity.commit(store).expect("commit should succeed");
        identity
    }

    // -------------------------------------------------------------------
    // Chain commits and loading
    // -------------------------------------------------------------------

    #[test]
    fn first_commit_hash_becomes_the_id() {
        let mut store = MemStore::new();
        let identity = committed(&mut store, "René Descartes", "rene@descartes.fr");

        let id = identity.id().expect("committed identity has an id");
        let head = store.resolve_ref(&identity_ref(id)).unwrap();
        assert_eq!(head.as_ref(), Some(id), "single-version chain: head == id");
    }

    #[test]
    fn two_identities_with_same_details_get_distinct_ids() {
        let mut store = MemStore::new();
        let a = committed(&mut store, "Jane", "jane@example.com");
        let b = committed(&mut store, "Jane", "jane@example.com");
        assert_ne!(a.id(), b.id(), "the nonce must separate them");
    }

    #[test]
    fn read_round_trips_the_chain() {
        let mut store = MemStore::new();
        let mut identity = committed(&mut store, "Jane", "jane@example.com");

        let mut next = identity.last_version().clone();
        next.login = "jane".into();
        next.lamport_time = 0;
        next.nonce = Vec::new();
        next.commit = None;
        identity.add_version(next);
        identity.commit(&mut store).unwrap();

        let id = identity.id().unwrap().clone();
        let loaded = Identity::read(&store, &id).unwrap();
        assert_eq!(loaded.versions().len(), 2);
        assert_eq!(loaded.login(), "jane");
        assert_eq!(loaded.name(), "Jane");
        assert_eq!(loaded.id(), Some(&id));
    }

    #[test]
    fn commit_with_nothing_pending_is_an_error() {
        let mut store = MemStore::new();
        let mut identity = committed(&mut store, "Jane", "jane@example.com");
        assert!(identity.commit(&mut store).is_err());
        identity.commit_as_needed(&mut store).expect("as-needed is a no-op");
    }

    #[test]
    fn read_missing_identity_is_not_found() {
        let store = MemStore::new();
        let id = Hash::of_bytes(b"nope");
        assert!(matches!(
            Identity::read(&store, &id),
            Err(Error::NotFound { kind: "identity", .. })
        ));
    }

    #[test]
    fn lamport_times_are_monotonic_across_versions() {
        let mut store = MemStore::new();
        let mut identity = Identity::new("Jane", "jane@example.com");
        let mut v2 = identity.last_version().clone();
        v2.nonce = Vec::new();
        v2.commit = None;
        identity.add_version(v2);
        identity.commit(&mut store).unwrap();

        let times: Vec<u64> = identity.versions().iter().map(|v| v.lamport_time).collect();
        assert!(times.windows(2).all(|w| w[0] <= w[1]), "times {times:?}");
        identity.validate().expect("chain is valid");
    }

    // -------------------------------------------------------------------
    // Accessors
    // -------------------------------------------------------------------

    #[test]
    fn display_name_variants() {
        let identity = Identity::new("Jane", "jane@example.com");
        assert_eq!(identity.display_name(), "Jane");

        let mut with_login = identity.clone();
        let mut v = with_login.last_version().clone();
        v.login = "jdoe".into();
        with_login.add_version(v);
        assert_eq!(with_login.display_name(), "Jane (jdoe)");

        let mut login_only = identity.clone();
        let mut v = login_only.last_version().clone();
        v.name = String::new();
        v.login = "jdoe".into();
        login_only.add_version(v);
        assert_eq!(login_only.display_name(), "jdoe");
    }

    #[test]
    fn match_query_is_case_insensitive_substring() {
        let identity = Identity::new("René Descartes", "rene@descartes.fr");
        assert!(identity.match_query("descartes"));
        assert!(identity.match_query("DESC"));
        assert!(!identity.match_query("spinoza"));
    }

    #[test]
    fn valid_keys_at_picks_latest_version_not_after() {
        let mut identity = Identity::new("Jane", "jane@example.com");
        {
            let v = &mut identity.versions[0];
            v.lamport_time = 1;
            v.keys = vec![Key {
                fingerprint: "old".into(),
                pub_key: "OLD".into(),
            }];
        }
        let mut v2 = identity.last_version().clone();
        v2.lamport_time = 5;
        v2.keys = vec![Key {
            fingerprint: "new".into(),
            pub_key: "NEW".into(),
        }];
        v2.nonce = Vec::new();
        identity.add_version(v2);

        assert!(identity.valid_keys_at(0).is_empty());
        assert_eq!(identity.valid_keys_at(1)[0].fingerprint, "old");
        assert_eq!(identity.valid_keys_at(4)[0].fingerprint, "old");
        assert_eq!(identity.valid_keys_at(5)[0].fingerprint, "new");
        assert_eq!(identity.keys()[0].fingerprint, "new");
    }

    #[test]
    fn validate_rejects_empty_display_fields() {
        let mut identity = Identity::new("", "jane@example.com");
        assert!(identity.validate().is_err());
        identity.versions[0].login = "jdoe".into();
        identity.validate().expect("login alone is enough");
    }

    #[test]
    fn validate_rejects_time_regression() {
        let mut identity = Identity::new("Jane", "jane@example.com");
        identity.versions[0].lamport_time = 5;
        let mut v2 = identity.last_version().clone();
        v2.lamport_time = 3;
        v2.nonce = Vec::new();
        identity.add_version(v2);
        assert!(identity.validate().is_err());
    }

    // -------------------------------------------------------------------
    // User identity selection
    // -------------------------------------------------------------------

    #[test]
    fn from_store_user_uses_the_configured_details() {
        let store = MemStore::with_user("Jane", "jane@example.com");
        let identity = Identity::from_store_user(&store).unwrap();
        assert_eq!(identity.name(), "Jane");
        assert_eq!(identity.email(), "jane@example.com");

        let bare = MemStore::new();
        assert!(Identity::from_store_user(&bare).is_err());
    }

    #[test]
    fn user_identity_selection_round_trip() {
        let mut store = MemStore::new();
        assert!(!is_user_identity_set(&store).unwrap());
        assert!(matches!(
            user_identity_id(&store),
            Err(Error::NotFound { .. })
        ));

        let identity = committed(&mut store, "Jane", "jane@example.com");
        set_user_identity(&mut store, &identity).unwrap();

        assert!(is_user_identity_set(&store).unwrap());
        assert_eq!(&user_identity_id(&store).unwrap(), identity.id().unwrap());
        assert_eq!(user_identity(&store).unwrap().name(), "Jane");
    }

    #[test]
    fn multiple_selected_identities_is_corrupt() {
        let mut store = MemStore::new();
        let identity = committed(&mut store, "Jane", "jane@example.com");
        set_user_identity(&mut store, &identity).unwrap();
        store.append_config_value(USER_IDENTITY_CONFIG_KEY, "another");

        assert!(matches!(
            user_identity_id(&store),
            Err(Error::CorruptStorage(_))
        ));
    }

    // -------------------------------------------------------------------
    // AuthorRef
    // -------------------------------------------------------------------

    #[test]
    fn author_ref_identity_json_shape() {
        let id = Hash::of_bytes(b"author");
        let author = AuthorRef::Identity { id: id.clone() };
        let json = serde_json::to_value(&author).unwrap();
        assert_eq!(json, serde_json::json!({"id": id.as_str()}));

        let back: AuthorRef = serde_json::from_value(json).unwrap();
        assert_eq!(back, author);
    }

    #[test]
    fn author_ref_legacy_json_shape() {
        let json = serde_json::json!({"name": "Old Author", "email": "old@example.com"});
        let author: AuthorRef = serde_json::from_value(json.clone()).unwrap();
        assert_eq!(
            author,
            AuthorRef::Legacy {
                name: "Old Author".into(),
                email: "old@example.com".into()
            }
        );
        assert_eq!(serde_json::to_value(&author).unwrap(), json);
    }

    #[test]
    fn author_ref_rejects_unknown_shape() {
        let err = serde_json::from_value::<AuthorRef>(serde_json::json!({}));
        assert!(err.is_err());
    }

    #[test]
    fn stream_reads_every_identity() {
        let mut store = MemStore::new();
        let a = committed(&mut store, "A", "a@example.com");
        let b = committed(&mut store, "B", "b@example.com");

        let mut ids: Vec<Hash> = read_all_identities(&store)
            .unwrap()
            .map(|item| {
                item.outcome.expect("identity should load");
                item.id
            })
            .collect();
        ids.sort();

        let mut expected = vec![a.id().unwrap().clone(), b.id().unwrap().clone()];
        expected.sort();
        assert_eq!(ids, expected);
    }
}
