//! Excerpts: compact denormalized summaries.
//!
//! An excerpt holds just enough of a bug or identity to filter, sort and
//! resolve without reading raw history. Excerpts are rebuilt from
//! snapshots and kept in the persisted cache file.

use std::collections::BTreeMap;

use crate::bug::{Bug, Snapshot};
use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identity::Identity;
use crate::op::data::{Label, Status};

/// A compact summary of one bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BugExcerpt {
    pub id: Hash,
    /// Author of the create operation; `None` for legacy inlined authors.
    pub author_id: Option<Hash>,
    /// Logical creation time.
    pub create_time: u64,
    /// Logical last-edit time.
    pub edit_time: u64,
    /// Wall-clock creation seconds (advisory).
    pub create_unix_time: i64,
    /// Wall-clock last-edit seconds (advisory).
    pub edit_unix_time: i64,
    pub status: Status,
    pub labels: Vec<Label>,
    pub title: String,
    pub comment_count: usize,
    /// Metadata of the create operation.
    pub create_metadata: BTreeMap<String, String>,
    /// Distinct identity ids that authored any operation, in order of
    /// first appearance. Legacy authors are not represented.
    pub actors: Vec<Hash>,
}

impl BugExcerpt {
    /// Denormalize a committed bug and its compiled snapshot.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the bug was never committed (it has no id).
    pub fn new(bug: &Bug, snapshot: &Snapshot) -> Result<Self> {
        let id = bug
            .id()
            .ok_or_else(|| Error::Internal("cannot excerpt an uncommitted bug".into()))?;

        let mut actors: Vec<Hash> = Vec::new();
        for op in bug.operations() {
            if let Some(author_id) = op.author.id() {
                if !actors.contains(author_id) {
                    actors.push(author_id.clone());
                }
            }
        }

        Ok(Self {
            id: id.clone(),
            author_id: snapshot.author.as_ref().and_then(|a| a.id().cloned()),
            create_time: bug.create_lamport_time(),
            edit_time: bug.edit_lamport_time(),
            create_unix_time: snapshot.created_unix,
            edit_unix_time: snapshot.last_edit_unix(),
            status: snapshot.status,
            labels: snapshot.labels.clone(),
            title: snapshot.title.clone(),
            comment_count: snapshot.comments.len(),
            create_metadata: snapshot.create_metadata.clone(),
            actors,
        })
    }

    /// Short prefix of the id shown to humans.
    #[must_use]
    pub fn human_id(&self) -> &str {
        self.id.human()
    }
}

/// A compact summary of one identity.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentityExcerpt {
    pub id: Hash,
    pub name: String,
    pub login: String,
}

impl IdentityExcerpt {
    /// Denormalize a committed identity.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the identity was never committed.
    pub fn new(identity: &Identity) -> Result<Self> {
        let id = identity
            .id()
            .ok_or_else(|| Error::Internal("cannot excerpt an uncommitted identity".into()))?;
        Ok(Self {
            id: id.clone(),
            name: identity.name().to_owned(),
            login: identity.login().to_owned(),
        })
    }

    /// Short prefix of the id shown to humans.
    #[must_use]
    pub fn human_id(&self) -> &str {
        self.id.human()
    }

    /// A non-empty display string built from the non-empty fields.
    #[must_use]
    pub fn display_name(&self) -> String {
        match (self.name.is_empty(), self.login.is_empty()) {
            (false, true) => self.name.clone(),
            (true, false) => self.login.clone(),
            _ => format!("{} ({})", self.name, self.login),
        }
    }

    /// Whether the query is a case-insensitive substring of the name or
    /// login.
    #[must_use]
    pub fn matches(&self, query: &str) -> bool {
        let query = query.to_lowercase();
        self.name.to_lowercase().contains(&query)
            || self.login.to_lowercase().contains(&query)
    }
}
