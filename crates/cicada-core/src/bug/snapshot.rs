//! Snapshot compilation.
//!
//! A [`Snapshot`] is the present-time view of a bug: the result of folding
//! its ordered operation sequence through [`Snapshot::apply`]. The fold is
//! deterministic: identical operation sequences produce identical
//! snapshots, which is what lets replicas cross-check state after a merge.
//!
//! The snapshot holds no operation bodies, only their hashes; the operation
//! list lives once, in the bug aggregate.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identity::AuthorRef;
use crate::op::data::{Label, OpData, Status};
use crate::op::Operation;

// ---------------------------------------------------------------------------
// Comments and timeline
// ---------------------------------------------------------------------------

/// One comment in the discussion, holding its latest text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Comment {
    pub message: String,
    pub author: AuthorRef,
    pub files: Vec<Hash>,
    pub unix_time: i64,
}

impl Comment {
    /// Wall-clock time of the comment as a `DateTime`.
    #[must_use]
    pub fn time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.unix_time, 0).unwrap_or_default()
    }
}

/// A comment-bearing timeline item: the original text plus one revision
/// per later edit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommentItem {
    /// Hash of the operation that produced the item.
    pub hash: Hash,
    /// The original comment followed by its revisions, oldest first.
    /// Always non-empty.
    pub history: Vec<Comment>,
}

impl CommentItem {
    fn new(hash: Hash, comment: Comment) -> Self {
        Self {
            hash,
            history: vec![comment],
        }
    }

    /// The comment as originally written.
    #[must_use]
    pub fn original(&self) -> &Comment {
        &self.history[0]
    }

    /// The comment after every edit.
    #[must_use]
    pub fn current(&self) -> &Comment {
        self.history.last().expect("history is never empty")
    }

    /// Whether the comment was ever edited.
    #[must_use]
    pub fn edited(&self) -> bool {
        self.history.len() > 1
    }
}

/// One visible event in a bug's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TimelineItem {
    /// The opening of the bug, wrapping its first comment.
    Create(CommentItem),
    /// A later comment.
    Comment(CommentItem),
    /// A status flip.
    SetStatus {
        hash: Hash,
        author: AuthorRef,
        unix_time: i64,
        status: Status,
    },
    /// A title change.
    SetTitle {
        hash: Hash,
        author: AuthorRef,
        unix_time: i64,
        title: String,
    },
    /// A label change; the sets are the effective diff that was applied.
    LabelChange {
        hash: Hash,
        author: AuthorRef,
        unix_time: i64,
        added: Vec<Label>,
        removed: Vec<Label>,
    },
}

impl TimelineItem {
    /// Hash of the operation behind this item.
    #[must_use]
    pub fn hash(&self) -> &Hash {
        match self {
            Self::Create(item) | Self::Comment(item) => &item.hash,
            Self::SetStatus { hash, .. }
            | Self::SetTitle { hash, .. }
            | Self::LabelChange { hash, .. } => hash,
        }
    }
}

// ---------------------------------------------------------------------------
// Label change results
// ---------------------------------------------------------------------------

/// What happened to one label of a label-change operation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LabelChangeStatus {
    /// The label was newly applied.
    Added,
    /// The label was removed.
    Removed,
    /// The label was requested but already present.
    Duplicate,
    /// Removal was requested but the label was not present.
    Absent,
}

impl std::fmt::Display for LabelChangeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            Self::Added => "added",
            Self::Removed => "removed",
            Self::Duplicate => "duplicate",
            Self::Absent => "absent",
        })
    }
}

/// Per-label outcome of a label change.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LabelChangeResult {
    pub label: Label,
    pub status: LabelChangeStatus,
}

/// Compute the per-label outcomes of applying `added`/`removed` on top of
/// `current`. Duplicate entries within `added` (or `removed`) collapse to
/// a single result. Pure; does not mutate anything.
#[must_use]
pub fn label_change_results(
    current: &[Label],
    added: &[Label],
    removed: &[Label],
) -> Vec<LabelChangeResult> {
    let mut results = Vec::with_capacity(added.len() + removed.len());
    let mut seen: Vec<&Label> = Vec::new();

    for label in added {
        if seen.contains(&label) {
            continue;
        }
        seen.push(label);
        results.push(LabelChangeResult {
            label: label.clone(),
            status: if current.contains(label) {
                LabelChangeStatus::Duplicate
            } else {
                LabelChangeStatus::Added
            },
        });
    }

    for label in removed {
        if seen.contains(&label) {
            continue;
        }
        seen.push(label);
        results.push(LabelChangeResult {
            label: label.clone(),
            status: if current.contains(label) {
                LabelChangeStatus::Removed
            } else {
                LabelChangeStatus::Absent
            },
        });
    }

    results
}

// ---------------------------------------------------------------------------
// Snapshot
// ---------------------------------------------------------------------------

/// The compiled present-time view of a bug.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    /// The bug id, if the bug was ever committed.
    pub id: Option<Hash>,
    pub title: String,
    pub status: Status,
    /// Discussion comments with their latest text, oldest first.
    pub comments: Vec<Comment>,
    /// One item per visible event, oldest first.
    pub timeline: Vec<TimelineItem>,
    /// Sorted, deduplicated label set.
    pub labels: Vec<Label>,
    /// Author of the create operation.
    pub author: Option<AuthorRef>,
    /// Wall-clock seconds of the create operation.
    pub created_unix: i64,
    /// Metadata recorded on the create operation.
    pub create_metadata: BTreeMap<String, String>,
    /// Hashes of the source operations, in application order.
    pub operations: Vec<Hash>,

    last_edit_unix: i64,
}

impl Default for Snapshot {
    fn default() -> Self {
        Self {
            id: None,
            title: String::new(),
            status: Status::Open,
            comments: Vec::new(),
            timeline: Vec::new(),
            labels: Vec::new(),
            author: None,
            created_unix: 0,
            create_metadata: BTreeMap::new(),
            operations: Vec::new(),
            last_edit_unix: 0,
        }
    }
}

impl Snapshot {
    /// A fresh snapshot carrying the bug id, ready for the fold.
    pub(crate) fn for_bug(id: Option<Hash>) -> Self {
        Self {
            id,
            ..Self::default()
        }
    }

    /// Maximum wall-clock seconds across every applied operation.
    #[must_use]
    pub fn last_edit_unix(&self) -> i64 {
        self.last_edit_unix
    }

    /// [`Snapshot::last_edit_unix`] as a `DateTime`.
    #[must_use]
    pub fn last_edit_time(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.last_edit_unix, 0).unwrap_or_default()
    }

    /// [`Snapshot::created_unix`] as a `DateTime`.
    #[must_use]
    pub fn created_at(&self) -> DateTime<Utc> {
        DateTime::from_timestamp(self.created_unix, 0).unwrap_or_default()
    }

    /// Fold one operation into the snapshot.
    ///
    /// Every variant is total: an edit-comment whose target does not
    /// resolve leaves the snapshot unchanged.
    ///
    /// # Errors
    ///
    /// Returns `internal` only when the operation cannot be hashed, which
    /// means it held unserializable data.
    pub fn apply(&mut self, op: &Operation) -> Result<()> {
        let hash = op
            .hash()
            .map_err(|e| Error::Internal(format!("unhashable operation in history: {e}")))?;

        self.operations.push(hash.clone());
        self.last_edit_unix = self.last_edit_unix.max(op.unix_time);

        match &op.data {
            OpData::Create(d) => {
                let comment = Comment {
                    message: d.message.clone(),
                    author: op.author.clone(),
                    files: d.files.clone(),
                    unix_time: op.unix_time,
                };

                self.title = d.title.clone();
                self.comments = vec![comment.clone()];
                self.author = Some(op.author.clone());
                self.created_unix = op.unix_time;
                self.create_metadata = op.metadata.clone();
                self.timeline = vec![TimelineItem::Create(CommentItem::new(hash, comment))];
            }

            OpData::AddComment(d) => {
                let comment = Comment {
                    message: d.message.clone(),
                    author: op.author.clone(),
                    files: d.files.clone(),
                    unix_time: op.unix_time,
                };
                self.comments.push(comment.clone());
                self.timeline
                    .push(TimelineItem::Comment(CommentItem::new(hash, comment)));
            }

            OpData::EditComment(d) => {
                self.apply_edit(op, d);
            }

            OpData::SetTitle(d) => {
                self.title = d.title.clone();
                self.timeline.push(TimelineItem::SetTitle {
                    hash,
                    author: op.author.clone(),
                    unix_time: op.unix_time,
                    title: d.title.clone(),
                });
            }

            OpData::SetStatus(d) => {
                self.status = d.status;
                self.timeline.push(TimelineItem::SetStatus {
                    hash,
                    author: op.author.clone(),
                    unix_time: op.unix_time,
                    status: d.status,
                });
            }

            OpData::LabelChange(d) => {
                let results = label_change_results(&self.labels, &d.added, &d.removed);

                let mut added = Vec::new();
                let mut removed = Vec::new();
                for result in results {
                    match result.status {
                        LabelChangeStatus::Added => {
                            self.labels.push(result.label.clone());
                            added.push(result.label);
                        }
                        LabelChangeStatus::Removed => {
                            self.labels.retain(|l| l != &result.label);
                            removed.push(result.label);
                        }
                        LabelChangeStatus::Duplicate | LabelChangeStatus::Absent => {}
                    }
                }
                self.labels.sort_unstable();
                self.labels.dedup();

                self.timeline.push(TimelineItem::LabelChange {
                    hash,
                    author: op.author.clone(),
                    unix_time: op.unix_time,
                    added,
                    removed,
                });
            }
        }

        Ok(())
    }

    /// Locate the edit target and rewrite the comment it carries. A target
    /// that does not resolve to a comment-bearing item is a silent no-op.
    fn apply_edit(&mut self, op: &Operation, d: &crate::op::data::EditCommentData) {
        let mut comment_index = 0usize;
        let mut target = None;

        for (index, item) in self.timeline.iter().enumerate() {
            if item.hash() == &d.target {
                target = Some(index);
                break;
            }
            if matches!(item, TimelineItem::Create(_) | TimelineItem::Comment(_)) {
                comment_index += 1;
            }
        }

        let Some(index) = target else {
            return;
        };

        let revision = Comment {
            message: d.message.clone(),
            author: op.author.clone(),
            files: d.files.clone(),
            unix_time: op.unix_time,
        };

        match &mut self.timeline[index] {
            TimelineItem::Create(item) | TimelineItem::Comment(item) => {
                item.history.push(revision);
            }
            // The target hash resolved to a non-comment item; nothing to
            // edit.
            _ => return,
        }

        let comment = &mut self.comments[comment_index];
        comment.message = d.message.clone();
        comment.files = d.files.clone();
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::op::data::{
        AddCommentData, CreateData, EditCommentData, LabelChangeData, SetStatusData, SetTitleData,
    };

    fn author() -> AuthorRef {
        AuthorRef::Identity {
            id: Hash::of_bytes(b"rene"),
        }
    }

    fn create(title: &str, message: &str) -> Operation {
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

    fn comment(unix_time: i64, message: &str) -> Operation {
        Operation::new(
            author(),
            unix_time,
            OpData::AddComment(AddCommentData {
                message: message.into(),
                files: vec![],
            }),
        )
    }

    fn edit(target: Hash, message: &str) -> Operation {
        Operation::new(
            author(),
            300,
            OpData::EditComment(EditCommentData {
                target,
                message: message.into(),
                files: vec![],
            }),
        )
    }

    fn labels(added: &[&str], removed: &[&str]) -> Operation {
        Operation::new(
            author(),
            400,
            OpData::LabelChange(LabelChangeData {
                added: added.iter().map(|l| Label::new(*l).unwrap()).collect(),
                removed: removed.iter().map(|l| Label::new(*l).unwrap()).collect(),
            }),
        )
    }

    fn compile(ops: &[Operation]) -> Snapshot {
        let mut snapshot = Snapshot::default();
        for op in ops {
            snapshot.apply(op).expect("apply should not fail");
        }
        snapshot
    }

    // -------------------------------------------------------------------
    // Create
    // -------------------------------------------------------------------

    #[test]
    fn create_seeds_the_snapshot() {
        let snapshot = compile(&[create("login broken", "cannot sign in")]);

        assert_eq!(snapshot.title, "login broken");
        assert_eq!(snapshot.status, Status::Open);
        assert_eq!(snapshot.comments.len(), 1);
        assert_eq!(snapshot.comments[0].message, "cannot sign in");
        assert_eq!(snapshot.created_unix, 100);
        assert!(snapshot.author.is_some());

        assert_eq!(snapshot.timeline.len(), 1);
        let TimelineItem::Create(item) = &snapshot.timeline[0] else {
            panic!("first timeline item should be a create item");
        };
        assert!(!item.edited(), "no edits yet");
        assert_eq!(item.history.len(), 1);
    }

    // -------------------------------------------------------------------
    // Edits (mirrors the original editing scenario)
    // -------------------------------------------------------------------

    #[test]
    fn edits_rewrite_comments_and_grow_history() {
        let create_op = create("title", "create");
        let create_hash = create_op.hash().unwrap();
        let comment_op = comment(200, "comment");
        let comment_hash = comment_op.hash().unwrap();

        let mut snapshot = compile(&[create_op, comment_op]);
        snapshot.apply(&edit(create_hash, "create edited")).unwrap();

        assert_eq!(snapshot.timeline.len(), 2);
        let TimelineItem::Create(first) = &snapshot.timeline[0] else {
            panic!("expected create item");
        };
        let TimelineItem::Comment(second) = &snapshot.timeline[1] else {
            panic!("expected comment item");
        };
        assert_eq!(first.history.len(), 2);
        assert_eq!(second.history.len(), 1);
        assert_eq!(snapshot.comments[0].message, "create edited");
        assert_eq!(snapshot.comments[1].message, "comment");

        snapshot.apply(&edit(comment_hash, "comment edited")).unwrap();
        let TimelineItem::Comment(second) = &snapshot.timeline[1] else {
            panic!("expected comment item");
        };
        assert_eq!(second.history.len(), 2);
        assert_eq!(second.original().message, "comment");
        assert_eq!(second.current().message, "comment edited");
        assert_eq!(snapshot.comments[0].message, "create edited");
        assert_eq!(snapshot.comments[1].message, "comment edited");
    }

    #[test]
    fn edit_with_unknown_target_is_a_no_op() {
        let before = compile(&[create("t", "m"), comment(200, "c")]);

        let mut after = before.clone();
        after
            .apply(&edit(Hash::of_bytes(b"missing"), "never lands"))
            .unwrap();

        assert_eq!(after.comments, before.comments);
        assert_eq!(after.timeline, before.timeline);
        // The operation still counts toward the source list.
        assert_eq!(after.operations.len(), before.operations.len() + 1);
    }

    #[test]
    fn edit_targeting_a_status_item_is_a_no_op() {
        let status_op = Operation::new(
            author(),
            200,
            OpData::SetStatus(SetStatusData {
                status: Status::Closed,
            }),
        );
        let status_hash = status_op.hash().unwrap();

        let mut snapshot = compile(&[create("t", "m"), status_op]);
        let comments = snapshot.comments.clone();
        snapshot.apply(&edit(status_hash, "nope")).unwrap();
        assert_eq!(snapshot.comments, comments);
    }

    // -------------------------------------------------------------------
    // Title and status
    // -------------------------------------------------------------------

    #[test]
    fn set_title_overwrites_and_is_visible_in_the_timeline() {
        let retitle = Operation::new(
            author(),
            200,
            OpData::SetTitle(SetTitleData {
                title: "better title".into(),
            }),
        );
        let snapshot = compile(&[create("first", "m"), retitle]);

        assert_eq!(snapshot.title, "better title");
        assert!(matches!(
            snapshot.timeline[1],
            TimelineItem::SetTitle { ref title, .. } if title == "better title"
        ));
    }

    #[test]
    fn set_status_flips_and_records() {
        let close = Operation::new(
            author(),
            200,
            OpData::SetStatus(SetStatusData {
                status: Status::Closed,
            }),
        );
        let snapshot = compile(&[create("t", "m"), close]);
        assert_eq!(snapshot.status, Status::Closed);
        assert!(matches!(
            snapshot.timeline[1],
            TimelineItem::SetStatus {
                status: Status::Closed,
                ..
            }
        ));
    }

    // -------------------------------------------------------------------
    // Labels
    // -------------------------------------------------------------------

    #[test]
    fn label_changes_apply_the_effective_diff() {
        let snapshot = compile(&[
            create("t", "m"),
            labels(&["bug", "ui"], &[]),
            labels(&["bug"], &["ui"]),
        ]);
        assert_eq!(snapshot.labels, vec![Label::new("bug").unwrap()]);
    }

    #[test]
    fn label_results_track_duplicates_and_absences() {
        let current = [Label::new("bug").unwrap(), Label::new("ui").unwrap()];
        let results = label_change_results(
            &current,
            &[Label::new("bug").unwrap()],
            &[Label::new("ui").unwrap(), Label::new("ghost").unwrap()],
        );

        assert_eq!(results.len(), 3);
        assert_eq!(results[0].status, LabelChangeStatus::Duplicate);
        assert_eq!(results[1].status, LabelChangeStatus::Removed);
        assert_eq!(results[2].status, LabelChangeStatus::Absent);
    }

    #[test]
    fn duplicate_added_labels_collapse() {
        let bug = Label::new("bug").unwrap();
        let results = label_change_results(&[bug.clone()], &[bug.clone(), bug.clone()], &[]);
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].status, LabelChangeStatus::Duplicate);
    }

    #[test]
    fn labels_stay_sorted_and_deduplicated() {
        let snapshot = compile(&[create("t", "m"), labels(&["zeta", "alpha"], &[])]);
        assert_eq!(
            snapshot.labels,
            vec![Label::new("alpha").unwrap(), Label::new("zeta").unwrap()]
        );
    }

    // -------------------------------------------------------------------
    // Determinism and times
    // -------------------------------------------------------------------

    #[test]
    fn identical_sequences_compile_identically() {
        let ops = vec![
            create("t", "m"),
            comment(200, "c"),
            labels(&["bug"], &[]),
        ];
        assert_eq!(compile(&ops), compile(&ops));
    }

    #[test]
    fn last_edit_time_is_the_max_unix_time() {
        let snapshot = compile(&[create("t", "m"), comment(500, "later"), comment(250, "earlier")]);
        assert_eq!(snapshot.last_edit_unix(), 500);
        assert_eq!(snapshot.created_at().timestamp(), 100);
        assert_eq!(snapshot.last_edit_time().timestamp(), 500);
    }
}
