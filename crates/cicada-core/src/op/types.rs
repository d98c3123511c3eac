//! Operation type enum covering the six operation variants.
//!
//! The string representation is the screaming-snake `type` discriminant
//! written into each serialized operation.

use std::fmt;
use std::str::FromStr;

/// The six operation types a bug history is built from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum OpType {
    /// Open a new bug. Always the first operation, never repeated.
    Create,
    /// Add a comment to the discussion.
    AddComment,
    /// Amend an earlier create or add-comment operation.
    EditComment,
    /// Replace the bug title.
    SetTitle,
    /// Open or close the bug.
    SetStatus,
    /// Add and/or remove labels.
    LabelChange,
}

/// Error returned when parsing an unknown operation type string.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error(
    "unknown operation type '{raw}': expected one of CREATE, ADD_COMMENT, \
     EDIT_COMMENT, SET_TITLE, SET_STATUS, LABEL_CHANGE"
)]
pub struct UnknownOpType {
    /// The unrecognised input string.
    pub raw: String,
}

impl OpType {
    /// All known operation types in catalog order.
    pub const ALL: [Self; 6] = [
        Self::Create,
        Self::AddComment,
        Self::EditComment,
        Self::SetTitle,
        Self::SetStatus,
        Self::LabelChange,
    ];

    /// Return the canonical wire representation.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Create => "CREATE",
            Self::AddComment => "ADD_COMMENT",
            Self::EditComment => "EDIT_COMMENT",
            Self::SetTitle => "SET_TITLE",
            Self::SetStatus => "SET_STATUS",
            Self::LabelChange => "LABEL_CHANGE",
        }
    }
}

impl fmt::Display for OpType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for OpType {
    type Err = UnknownOpType;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATE" => Ok(Self::Create),
            "ADD_COMMENT" => Ok(Self::AddComment),
            "EDIT_COMMENT" => Ok(Self::EditComment),
            "SET_TITLE" => Ok(Self::SetTitle),
            "SET_STATUS" => Ok(Self::SetStatus),
            "LABEL_CHANGE" => Ok(Self::LabelChange),
            _ => Err(UnknownOpType { raw: s.to_owned() }),
        }
    }
}

impl serde::Serialize for OpType {
    fn serialize<S: serde::Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.serialize_str(self.as_str())
    }
}

impl<'de> serde::Deserialize<'de> for OpType {
    fn deserialize<D: serde::Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        use serde::Deserialize as _;
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

#[cfg(test)]
mod tests {
    use super::{OpType, UnknownOpType};
    use std::collections::HashSet;

    #[test]
    fn round_trip_all_types() {
        for op_type in OpType::ALL {
            let parsed: OpType = op_type.as_str().parse().expect("canonical form parses");
            assert_eq!(parsed, op_type);
        }
    }

    #[test]
    fn wire_names_are_unique() {
        let names: HashSet<&str> = OpType::ALL.iter().map(|t| t.as_str()).collect();
        assert_eq!(names.len(), OpType::ALL.len());
    }

    #[test]
    fn unknown_type_is_rejected() {
        let err: UnknownOpType = "create".parse::<OpType>().unwrap_err();
        assert_eq!(err.raw, "create");
    }

    #[test]
    fn serde_uses_wire_names() {
        let json = serde_json::to_string(&OpType::LabelChange).unwrap();
        assert_eq!(json, "\"LABEL_CHANGE\"");
        let back: OpType = serde_json::from_str(&json).unwrap();
        assert_eq!(back, OpType::LabelChange);
    }
}
