//! Typed payload data for each operation variant.
//!
//! The `type` discriminant lives in the serialized operation header, not in
//! the payload itself, so [`OpData`] deserializes through
//! [`OpData::deserialize_for`] with a known [`OpType`].

use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use super::types::OpType;
use crate::hash::Hash;

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

/// Bug lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Open,
    Closed,
}

impl Status {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Open => "open",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Status {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "open" => Ok(Self::Open),
            "closed" => Ok(Self::Closed),
            _ => Err(format!("unknown status '{s}': expected open or closed")),
        }
    }
}

// ---------------------------------------------------------------------------
// Label
// ---------------------------------------------------------------------------

/// A bug label. The repository has no label schema; any string passing
/// [`Label::check`] is a valid label.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Label(String);

/// Error returned for labels violating the shape rules.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid label '{raw}': {reason}")]
pub struct InvalidLabel {
    pub raw: String,
    pub reason: &'static str,
}

impl Label {
    /// Build a label, validating shape.
    ///
    /// # Errors
    ///
    /// Returns [`InvalidLabel`] for empty labels, labels with leading or
    /// trailing whitespace, and labels containing control characters.
    pub fn new(raw: impl Into<String>) -> Result<Self, InvalidLabel> {
        let label = Self(raw.into());
        label.check()?;
        Ok(label)
    }

    /// Validate the shape rules without consuming the label.
    ///
    /// Deserialized labels bypass construction, so sequence validation
    /// re-checks them here.
    pub fn check(&self) -> Result<(), InvalidLabel> {
        let fail = |reason| {
            Err(InvalidLabel {
                raw: self.0.clone(),
                reason,
            })
        };

        if self.0.is_empty() {
            return fail("empty");
        }
        if self.0.trim() != self.0 {
            return fail("leading or trailing whitespace");
        }
        if self.0.chars().any(char::is_control) {
            return fail("control character");
        }
        Ok(())
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Label {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

// ---------------------------------------------------------------------------
// Payload structs
// ---------------------------------------------------------------------------

/// Payload of `CREATE`: the initial title, the opening comment and its
/// attached media blobs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateData {
    pub title: String,
    pub message: String,
    #[serde(default)]
    pub files: Vec<Hash>,
}

/// Payload of `ADD_COMMENT`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AddCommentData {
    pub message: String,
    #[serde(default)]
    pub files: Vec<Hash>,
}

/// Payload of `EDIT_COMMENT`. `target` is the hash of the create or
/// add-comment operation being amended.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EditCommentData {
    pub target: Hash,
    pub message: String,
    #[serde(default)]
    pub files: Vec<Hash>,
}

/// Payload of `SET_TITLE`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetTitleData {
    pub title: String,
}

/// Payload of `SET_STATUS`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SetStatusData {
    pub status: Status,
}

/// Payload of `LABEL_CHANGE`. Sets are serialized as sorted arrays.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LabelChangeData {
    pub added: Vec<Label>,
    pub removed: Vec<Label>,
}

// ---------------------------------------------------------------------------
// OpData: the unified payload enum
// ---------------------------------------------------------------------------

/// Typed payload for an operation. The discriminant is external (the
/// serialized `type` header field), so this enum does not implement
/// `Deserialize` directly; use [`OpData::deserialize_for`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OpData {
    Create(CreateData),
    AddComment(AddCommentData),
    EditComment(EditCommentData),
    SetTitle(SetTitleData),
    SetStatus(SetStatusData),
    LabelChange(LabelChangeData),
}

/// Error produced when a payload does not match its operation type schema.
#[derive(Debug, thiserror::Error)]
#[error("malformed {op_type} payload: {source}")]
pub struct PayloadParseError {
    /// The operation type whose schema was expected.
    pub op_type: OpType,
    source: serde_json::Error,
}

impl OpData {
    /// The operation type this payload belongs to.
    #[must_use]
    pub const fn op_type(&self) -> OpType {
        match self {
            Self::Create(_) => OpType::Create,
            Self::AddComment(_) => OpType::AddComment,
            Self::EditComment(_) => OpType::EditComment,
            Self::SetTitle(_) => OpType::SetTitle,
            Self::SetStatus(_) => OpType::SetStatus,
            Self::LabelChange(_) => OpType::LabelChange,
        }
    }

    /// Media blobs attached by this operation, if any.
    #[must_use]
    pub fn files(&self) -> &[Hash] {
        match self {
            Self::Create(d) => &d.files,
            Self::AddComment(d) => &d.files,
            Self::EditComment(d) => &d.files,
            Self::SetTitle(_) | Self::SetStatus(_) | Self::LabelChange(_) => &[],
        }
    }

    /// Deserialize a JSON value into the payload variant matching the
    /// given operation type.
    ///
    /// # Errors
    ///
    /// Returns [`PayloadParseError`] if the value does not match the
    /// expected schema.
    pub fn deserialize_for(
        op_type: OpType,
        value: serde_json::Value,
    ) -> Result<Self, PayloadParseError> {
        let result = match op_type {
            OpType::Create => serde_json::from_value::<CreateData>(value).map(OpData::Create),
            OpType::AddComment => {
                serde_json::from_value::<AddCommentData>(value).map(OpData::AddComment)
            }
            OpType::EditComment => {
                serde_json::from_value::<EditCommentData>(value).map(OpData::EditComment)
            }
            OpType::SetTitle => serde_json::from_value::<SetTitleData>(value).map(OpData::SetTitle),
            OpType::SetStatus => {
                serde_json::from_value::<SetStatusData>(value).map(OpData::SetStatus)
            }
            OpType::LabelChange => {
                serde_json::from_value::<LabelChangeData>(value).map(OpData::LabelChange)
            }
        };

        result.map_err(|source| PayloadParseError { op_type, source })
    }

    /// Serialize the payload to a JSON value. Label sets come out sorted so
    /// the canonical form is stable.
    ///
    /// # Errors
    ///
    /// Returns an error if the inner struct fails to serialize (should not
    /// happen with well-formed data).
    pub fn to_json_value(&self) -> Result<serde_json::Value, serde_json::Error> {
        match self {
            Self::Create(d) => serde_json::to_value(d),
            Self::AddComment(d) => serde_json::to_value(d),
            Self::EditComment(d) => serde_json::to_value(d),
            Self::SetTitle(d) => serde_json::to_value(d),
            Self::SetStatus(d) => serde_json::to_value(d),
            Self::LabelChange(d) => {
                let mut sorted = d.clone();
                sorted.added.sort_unstable();
                sorted.removed.sort_unstable();
                serde_json::to_value(&sorted)
            }
        }
    }
}

impl Serialize for OpData {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        match self {
            Self::Create(d) => d.serialize(serializer),
            Self::AddComment(d) => d.serialize(serializer),
            Self::EditComment(d) => d.serialize(serializer),
            Self::SetTitle(d) => d.serialize(serializer),
            Self::SetStatus(d) => d.serialize(serializer),
            Self::LabelChange(d) => d.serialize(serializer),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn label_shape_rules() {
        assert!(Label::new("bug").is_ok());
        assert!(Label::new("needs info").is_ok());
        assert!(Label::new("").is_err());
        assert!(Label::new(" padded").is_err());
        assert!(Label::new("padded ").is_err());
        assert!(Label::new("tab\there").is_err());
    }

    #[test]
    fn status_round_trip() {
        for status in [Status::Open, Status::Closed] {
            let parsed: Status = status.as_str().parse().unwrap();
            assert_eq!(parsed, status);
        }
        assert_eq!(serde_json::to_string(&Status::Closed).unwrap(), "\"closed\"");
    }

    #[test]
    fn deserialize_for_each_type() {
        let target = Hash::of_bytes(b"target");
        let cases = [
            (OpType::Create, json!({"title": "t", "message": "m"})),
            (OpType::AddComment, json!({"message": "m"})),
            (
                OpType::EditComment,
                json!({"target": target, "message": "m"}),
            ),
            (OpType::SetTitle, json!({"title": "t"})),
            (OpType::SetStatus, json!({"status": "open"})),
            (OpType::LabelChange, json!({"added": ["a"], "removed": []})),
        ];

        for (op_type, value) in cases {
            let data = OpData::deserialize_for(op_type, value).expect("payload should parse");
            assert_eq!(data.op_type(), op_type);
        }
    }

    #[test]
    fn deserialize_for_rejects_wrong_schema() {
        let err = OpData::deserialize_for(OpType::Create, json!({"message": "m"})).unwrap_err();
        assert_eq!(err.op_type, OpType::Create);
    }

    #[test]
    fn label_sets_serialize_sorted() {
        let data = OpData::LabelChange(LabelChangeData {
            added: vec![Label::new("zeta").unwrap(), Label::new("alpha").unwrap()],
            removed: vec![],
        });
        let value = data.to_json_value().unwrap();
        assert_eq!(value, json!({"added": ["alpha", "zeta"], "removed": []}));
    }

    #[test]
    fn files_accessor() {
        let blob = Hash::of_bytes(b"media");
        let data = OpData::AddComment(AddCommentData {
            message: "m".into(),
            files: vec![blob.clone()],
        });
        assert_eq!(data.files(), &[blob]);

        let data = OpData::SetTitle(SetTitleData { title: "t".into() });
        assert!(data.files().is_empty());
    }
}
