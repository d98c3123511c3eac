//! The operation data model.
//!
//! A bug's history is an ordered sequence of operations. Each operation is
//! a common header (author, wall-clock time, logical time, metadata) plus a
//! typed payload, serialized as a single JSON object whose `type` field
//! carries the payload discriminant:
//!
//! ```json
//! {"type":"SET_TITLE","author":{"id":"…"},"unix_time":1700000000,
//!  "lamport_time":12,"metadata":{},"title":"new title"}
//! ```
//!
//! An operation's hash is the content address of its canonical JSON form
//! (sorted keys, compact). Metadata may still be extended while the
//! operation sits in a bug's staging region, so the hash is only stable
//! once the operation is committed.

pub mod canonical;
pub mod data;
pub mod types;
pub mod validate;

pub use data::{
    AddCommentData, CreateData, EditCommentData, InvalidLabel, Label, LabelChangeData, OpData,
    PayloadParseError, SetStatusData, SetTitleData, Status,
};
pub use types::{OpType, UnknownOpType};
pub use validate::ValidationError;

use std::collections::BTreeMap;

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};
use crate::hash::Hash;
use crate::identity::AuthorRef;

use canonical::to_canonical_string;

/// A single event in a bug's history.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Operation {
    /// Who authored the operation.
    pub author: AuthorRef,
    /// Wall-clock seconds at creation. Advisory; replicas do not trust it.
    pub unix_time: i64,
    /// Logical clock value recorded when the operation was appended to the
    /// store. Zero while the operation is staged.
    pub lamport_time: u64,
    /// Free-form key/value annotations. Frozen once committed.
    pub metadata: BTreeMap<String, String>,
    /// The typed payload.
    pub data: OpData,
}

impl Operation {
    /// Build a fresh operation with empty metadata.
    #[must_use]
    pub fn new(author: AuthorRef, unix_time: i64, data: OpData) -> Self {
        Self {
            author,
            unix_time,
            lamport_time: 0,
            metadata: BTreeMap::new(),
            data,
        }
    }

    /// The operation type.
    #[must_use]
    pub fn op_type(&self) -> OpType {
        self.data.op_type()
    }

    /// Attach a metadata key. Only new keys may be added; existing keys are
    /// immutable.
    ///
    /// # Errors
    ///
    /// Returns `invalid_input` if the key is already present.
    pub fn set_metadata(&mut self, key: impl Into<String>, value: impl Into<String>) -> Result<()> {
        let key = key.into();
        if self.metadata.contains_key(&key) {
            return Err(Error::InvalidInput(format!(
                "metadata key '{key}' is already set and cannot be changed"
            )));
        }
        self.metadata.insert(key, value.into());
        Ok(())
    }

    /// Read a metadata value.
    #[must_use]
    pub fn metadata_value(&self, key: &str) -> Option<&str> {
        self.metadata.get(key).map(String::as_str)
    }

    /// Serialize to the operation's JSON object form.
    ///
    /// # Errors
    ///
    /// Returns `internal` if the payload fails to serialize, which means a
    /// constructed operation held unserializable data.
    pub fn to_json_value(&self) -> Result<serde_json::Value> {
        let payload = self
            .data
            .to_json_value()
            .map_err(|e| Error::Internal(format!("operation payload failed to serialize: {e}")))?;

        let serde_json::Value::Object(mut object) = payload else {
            return Err(Error::Internal(
                "operation payload did not serialize to an object".into(),
            ));
        };

        object.insert("type".into(), self.op_type().as_str().into());
        object.insert(
            "author".into(),
            serde_json::to_value(&self.author)
                .map_err(|e| Error::Internal(format!("author failed to serialize: {e}")))?,
        );
        object.insert("unix_time".into(), self.unix_time.into());
        object.insert("lamport_time".into(), self.lamport_time.into());
        object.insert(
            "metadata".into(),
            serde_json::to_value(&self.metadata)
                .map_err(|e| Error::Internal(format!("metadata failed to serialize: {e}")))?,
        );

        Ok(serde_json::Value::Object(object))
    }

    /// The operation's content address: the hash of its canonical JSON
    /// form after metadata finalization.
    ///
    /// Stable once the operation is committed; before that, treat the
    /// value as provisional.
    ///
    /// # Errors
    ///
    /// Same as [`Operation::to_json_value`].
    pub fn hash(&self) -> Result<Hash> {
        let value = self.to_json_value()?;
        Ok(Hash::of_bytes(to_canonical_string(&value).as_bytes()))
    }

    /// Validate this operation in isolation. See [`validate`] for the
    /// per-variant rules.
    ///
    /// # Errors
    ///
    /// Returns the first violated rule.
    pub fn validate(&self) -> std::result::Result<(), ValidationError> {
        validate::validate_op(self)
    }
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        use serde::ser::Error as _;
        let value = self.to_json_value().map_err(S::Error::custom)?;
        value.serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let mut object = serde_json::Map::deserialize(deserializer)?;

        let op_type: OpType = match object.remove("type") {
            Some(serde_json::Value::String(raw)) => raw.parse().map_err(D::Error::custom)?,
            _ => return Err(D::Error::custom("operation is missing its 'type' field")),
        };

        let author: AuthorRef = object
            .remove("author")
            .map(serde_json::from_value)
            .transpose()
            .map_err(D::Error::custom)?
            .ok_or_else(|| D::Error::custom("operation is missing its 'author' field"))?;

        let unix_time = object
            .remove("unix_time")
            .and_then(|v| v.as_i64())
            .ok_or_else(|| D::Error::custom("operation is missing its 'unix_time' field"))?;

        let lamport_time = object
            .remove("lamport_time")
            .and_then(|v| v.as_u64())
            .unwrap_or(0);

        let metadata: BTreeMap<String, String> = object
            .remove("metadata")
            .map(serde_json::from_value)
            .transpose()
            .map_err(D::Error::custom)?
            .unwrap_or_default();

        let data = OpData::deserialize_for(op_type, serde_json::Value::Object(object))
            .map_err(D::Error::custom)?;

        Ok(Self {
            author,
            unix_time,
            lamport_time,
            metadata,
            data,
        })
    }
}
