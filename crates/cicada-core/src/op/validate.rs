//! Operation validation.
//!
//! Two levels:
//!
//! 1. **Per-operation**: [`validate_op`] checks the variant payload rules
//!    in isolation (title shape, printable text, label set constraints).
//! 2. **Per-sequence**: [`validate_sequence`] walks an ordered operation
//!    list and enforces the history invariants: the first operation is a
//!    create, no later operation is a create, and operation hashes are
//!    unique.
//!
//! Both are total and pure; a failure names the first violated rule.

use std::collections::HashSet;

use super::data::{InvalidLabel, OpData};
use super::Operation;
use crate::error::Error;
use crate::hash::Hash;

/// A violated validation rule.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ValidationError {
    #[error("title is empty")]
    EmptyTitle,

    #[error("title must be a single line")]
    MultilineTitle,

    #[error("{field} contains non-printable characters")]
    UnsafeText {
        /// Which payload field failed ("title", "message").
        field: &'static str,
    },

    #[error(transparent)]
    BadLabel(#[from] InvalidLabel),

    #[error("label sets overlap: '{label}' is both added and removed")]
    OverlappingLabelSets { label: String },

    #[error("label change adds and removes nothing")]
    EmptyLabelChange,

    #[error("the first operation of a bug must be a create")]
    FirstOpNotCreate,

    #[error("operation {index} is a second create")]
    ExtraCreate { index: usize },

    #[error("duplicate operation hash {hash}")]
    DuplicateHash { hash: Hash },

    #[error("operation failed to serialize for hashing: {reason}")]
    Unhashable { reason: String },
}

impl From<ValidationError> for Error {
    fn from(err: ValidationError) -> Self {
        Self::InvalidInput(err.to_string())
    }
}

/// Whether text is fully printable: no control characters other than the
/// line and tab whitespace ordinary messages contain.
fn text_safe(s: &str) -> bool {
    s.chars().all(|c| !c.is_control() || c == '\n' || c == '\t')
}

/// Single-line, non-empty, printable. Titles hold no whitespace framing
/// tricks either.
fn validate_title(title: &str) -> Result<(), ValidationError> {
    if title.is_empty() {
        return Err(ValidationError::EmptyTitle);
    }
    if title.contains('\n') {
        return Err(ValidationError::MultilineTitle);
    }
    if !text_safe(title) || title.chars().any(|c| c == '\t') {
        return Err(ValidationError::UnsafeText { field: "title" });
    }
    Ok(())
}

fn validate_message(message: &str) -> Result<(), ValidationError> {
    if !text_safe(message) {
        return Err(ValidationError::UnsafeText { field: "message" });
    }
    Ok(())
}

/// Validate one operation in isolation.
///
/// # Errors
///
/// Returns the first violated rule for the operation's variant.
pub fn validate_op(op: &Operation) -> Result<(), ValidationError> {
    match &op.data {
        OpData::Create(d) => {
            validate_title(&d.title)?;
            validate_message(&d.message)?;
        }
        OpData::AddComment(d) => {
            validate_message(&d.message)?;
        }
        OpData::EditComment(d) => {
            validate_message(&d.message)?;
        }
        OpData::SetTitle(d) => {
            validate_title(&d.title)?;
        }
        OpData::SetStatus(_) => {}
        OpData::LabelChange(d) => {
            for label in d.added.iter().chain(&d.removed) {
                label.check()?;
            }

            let removed: HashSet<&str> = d.removed.iter().map(|l| l.as_str()).collect();
            if let Some(overlap) = d.added.iter().find(|l| removed.contains(l.as_str())) {
                return Err(ValidationError::OverlappingLabelSets {
                    label: overlap.as_str().to_owned(),
                });
            }

            if d.added.is_empty() && d.removed.is_empty() {
                return Err(ValidationError::EmptyLabelChange);
            }
        }
    }
    Ok(())
}

/// Validate an ordered operation sequence as a bug history.
///
/// Checks every operation individually, then the cross-operation
/// invariants. An empty sequence is valid (a bug that exists only in
/// memory).
///
/// # Errors
///
/// Returns the first violated rule, walking front to back.
pub fn validate_sequence<'a, I>(ops: I) -> Result<(), ValidationError>
where
    I: IntoIterator<Item = &'a Operation>,
{
    let mut seen = HashSet::new();

    for (index, op) in ops.into_iter().enumerate() {
        validate_op(op)?;

        let is_create = matches!(op.data, OpData::Create(_));
        if index == 0 && !is_create {
            return Err(ValidationError::FirstOpNotCreate);
        }
        if index > 0 && is_create {
            return Err(ValidationError::ExtraCreate { index });
        }

        let hash = op.hash().map_err(|e| ValidationError::Unhashable {
            reason: e.to_string(),
        })?;
        if !seen.insert(hash.clone()) {
            return Err(ValidationError::DuplicateHash { hash });
        }
    }

    Ok(())
}
