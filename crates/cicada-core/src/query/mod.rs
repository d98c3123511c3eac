//! Filtering and ordering over excerpts.
//!
//! A [`Query`] is a structured predicate plus an ordering spec. Execution
//! scans bug excerpts, keeps those matching every clause, sorts the
//! survivors and returns their ids. Author and actor clauses resolve
//! through the identity excerpts, so no raw history is read.
//!
//! Clause semantics follow the usual search-box conventions: clauses of
//! the same kind that name alternatives (`status`, `author`, `actor`) are
//! OR'd together, required-label and excluded-label clauses each apply
//! individually, and different kinds always AND.

pub mod parse;

pub use parse::QueryParseError;

use std::collections::BTreeMap;

use crate::cache::excerpt::{BugExcerpt, IdentityExcerpt};
use crate::hash::Hash;
use crate::op::data::{Label, Status};

/// Sort key for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderBy {
    Id,
    Creation,
    Edit,
}

/// Sort direction for query results.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OrderDirection {
    Ascending,
    Descending,
}

/// A compiled query.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Query {
    /// Match bugs whose status is any of these. Empty means any status.
    pub status: Vec<Status>,
    /// Match bugs whose create author matches any of these substrings.
    pub authors: Vec<String>,
    /// Match bugs where any operation author matches any of these
    /// substrings.
    pub actors: Vec<String>,
    /// Labels the bug must carry, each required.
    pub labels: Vec<Label>,
    /// Labels the bug must not carry, each excluded.
    pub no_labels: Vec<Label>,
    /// Case-insensitive substring of the title.
    pub title: Option<String>,
    pub order_by: OrderBy,
    pub order_direction: OrderDirection,
}

impl Query {
    /// A query with no filters, newest edits first.
    #[must_use]
    pub fn empty() -> Self {
        Self {
            status: Vec::new(),
            authors: Vec::new(),
            actors: Vec::new(),
            labels: Vec::new(),
            no_labels: Vec::new(),
            title: None,
            order_by: OrderBy::Edit,
            order_direction: OrderDirection::Descending,
        }
    }

    /// Whether one excerpt satisfies every clause.
    #[must_use]
    pub fn matches(
        &self,
        excerpt: &BugExcerpt,
        identities: &BTreeMap<Hash, IdentityExcerpt>,
    ) -> bool {
        if !self.status.is_empty() && !self.status.contains(&excerpt.status) {
            return false;
        }

        if !self.authors.is_empty() {
            let matched = excerpt.author_id.as_ref().is_some_and(|id| {
                identities
                    .get(id)
                    .is_some_and(|identity| self.authors.iter().any(|q| identity.matches(q)))
            });
            if !matched {
                return false;
            }
        }

        if !self.actors.is_empty() {
            let matched = excerpt.actors.iter().any(|id| {
                identities
                    .get(id)
                    .is_some_and(|identity| self.actors.iter().any(|q| identity.matches(q)))
            });
            if !matched {
                return false;
            }
        }

        for label in &self.labels {
            if !excerpt.labels.contains(label) {
                return false;
            }
        }

        for label in &self.no_labels {
            if excerpt.labels.contains(label) {
                return false;
            }
        }

        if let Some(title) = &self.title {
            if !excerpt
                .title
                .to_lowercase()
                .contains(&title.to_lowercase())
            {
                return false;
            }
        }

        true
    }

    /// Run the query: filter, sort, return the surviving ids.
    #[must_use]
    pub fn execute(
        &self,
        excerpts: &BTreeMap<Hash, BugExcerpt>,
        identities: &BTreeMap<Hash, IdentityExcerpt>,
    ) -> Vec<Hash> {
        let mut survivors: Vec<&BugExcerpt> = excerpts
            .values()
            .filter(|excerpt| self.matches(excerpt, identities))
            .collect();

        survivors.sort_by(|a, b| {
            let ordering = match self.order_by {
                OrderBy::Id => a.id.cmp(&b.id),
                OrderBy::Creation => a
                    .create_time
                    .cmp(&b.create_time)
                    .then_with(|| a.id.cmp(&b.id)),
                OrderBy::Edit => a.edit_time.cmp(&b.edit_time).then_with(|| a.id.cmp(&b.id)),
            };
            match self.order_direction {
                OrderDirection::Ascending => ordering,
                OrderDirection::Descending => ordering.reverse(),
            }
        });

        survivors.into_iter().map(|e| e.id.clone()).collect()
    }
}

impl Default for Query {
    /// The listing used when no query is supplied: open bugs, newest
    /// edits first.
    fn default() -> Self {
        Self {
            status: vec![Status::Open],
            ..Self::empty()
        }
    }
}

impl std::str::FromStr for Query {
    type Err = QueryParseError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        parse::parse(s)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn excerpt(seed: &[u8], title: &str, status: Status, labels: &[&str]) -> BugExcerpt {
        BugExcerpt {
            id: Hash::of_bytes(seed),
            author_id: Some(Hash::of_bytes(b"jane")),
            create_time: seed[0] as u64,
            edit_time: seed[0] as u64 * 10,
            create_unix_time: 0,
            edit_unix_time: 0,
            status,
            labels: labels.iter().map(|l| Label::new(*l).unwrap()).collect(),
            title: title.to_owned(),
            comment_count: 1,
            create_metadata: BTreeMap::new(),
            actors: vec![Hash::of_bytes(b"jane"), Hash::of_bytes(b"bob")],
        }
    }

    fn fixture() -> (BTreeMap<Hash, BugExcerpt>, BTreeMap<Hash, IdentityExcerpt>) {
        let mut excerpts = BTreeMap::new();
        for e in [
            excerpt(b"a", "login broken", Status::Open, &["bug", "auth"]),
            excerpt(b"b", "dark mode please", Status::Open, &["ui"]),
            excerpt(b"c", "crash on login", Status::Closed, &["bug"]),
        ] {
            excerpts.insert(e.id.clone(), e);
        }

        let mut identities = BTreeMap::new();
        for (seed, name, login) in [(b"jane".as_slice(), "Jane", "jdoe"), (b"bob".as_slice(), "Bob", "bob")] {
            let id = Hash::of_bytes(seed);
            identities.insert(
                id.clone(),
                IdentityExcerpt {
                    id,
                    name: name.to_owned(),
                    login: login.to_owned(),
                },
            );
        }

        (excerpts, identities)
    }

    #[test]
    fn default_listing_keeps_open_bugs_newest_edit_first() {
        let (excerpts, identities) = fixture();
        let ids = Query::default().execute(&excerpts, &identities);
        assert_eq!(ids, vec![Hash::of_bytes(b"b"), Hash::of_bytes(b"a")]);
    }

    #[test]
    fn status_clause_is_set_membership() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.status = vec![Status::Closed];
        assert_eq!(
            query.execute(&excerpts, &identities),
            vec![Hash::of_bytes(b"c")]
        );

        query.status = vec![Status::Open, Status::Closed];
        assert_eq!(query.execute(&excerpts, &identities).len(), 3);
    }

    #[test]
    fn labels_are_each_required() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.labels = vec![Label::new("bug").unwrap(), Label::new("auth").unwrap()];
        assert_eq!(
            query.execute(&excerpts, &identities),
            vec![Hash::of_bytes(b"a")]
        );
    }

    #[test]
    fn no_label_excludes() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.no_labels = vec![Label::new("bug").unwrap()];
        assert_eq!(
            query.execute(&excerpts, &identities),
            vec![Hash::of_bytes(b"b")]
        );
    }

    #[test]
    fn title_is_case_insensitive_substring() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.title = Some("LOGIN".into());
        query.order_by = OrderBy::Id;
        query.order_direction = OrderDirection::Ascending;

        let mut expected = vec![Hash::of_bytes(b"a"), Hash::of_bytes(b"c")];
        expected.sort();
        assert_eq!(query.execute(&excerpts, &identities), expected);
    }

    #[test]
    fn author_resolves_through_identities() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.authors = vec!["jdoe".into()];
        assert_eq!(query.execute(&excerpts, &identities).len(), 3);

        query.authors = vec!["nobody".into()];
        assert!(query.execute(&excerpts, &identities).is_empty());
    }

    #[test]
    fn actor_matches_any_operation_author() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.actors = vec!["bob".into()];
        assert_eq!(query.execute(&excerpts, &identities).len(), 3);
    }

    #[test]
    fn ordering_by_id_and_creation() {
        let (excerpts, identities) = fixture();
        let mut query = Query::empty();
        query.order_by = OrderBy::Id;
        query.order_direction = OrderDirection::Ascending;
        let by_id = query.execute(&excerpts, &identities);
        let mut sorted = by_id.clone();
        sorted.sort();
        assert_eq!(by_id, sorted);

        query.order_by = OrderBy::Creation;
        query.order_direction = OrderDirection::Descending;
        let by_creation = query.execute(&excerpts, &identities);
        assert_eq!(by_creation.len(), 3);
        let times: Vec<u64> = by_creation
            .iter()
            .map(|id| excerpts[id].create_time)
            .collect();
        assert!(times.windows(2).all(|w| w[0] >= w[1]));
    }
}
