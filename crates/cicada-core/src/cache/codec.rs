//! Binary codec for the persisted cache file.
//!
//! Layout:
//!
//! ```text
//! [magic: "CCCH"] [format_version: u32 LE]
//! [bug_count: varint]      [bug records...]
//! [identity_count: varint] [identity records...]
//! ```
//!
//! Integers are LEB128 varints (zigzag for signed values); strings are
//! varint-length-prefixed UTF-8. Records hold their fields in a fixed
//! order. The file is small and rewritten whole on every update, so the
//! format optimizes for simplicity over random access.

use std::collections::BTreeMap;

use super::excerpt::{BugExcerpt, IdentityExcerpt};
use crate::hash::Hash;
use crate::op::data::{Label, Status};

/// The four magic bytes at the start of every cache file.
pub const CACHE_MAGIC: [u8; 4] = *b"CCCH";

/// The current format version written to new cache files.
pub const CACHE_VERSION: u32 = 1;

/// Errors returned by cache decoding.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum CacheCodecError {
    /// The data ended before a record was complete.
    #[error("cache file is truncated")]
    UnexpectedEof,

    /// The file does not start with the cache magic.
    #[error("not a cache file (bad magic)")]
    BadMagic,

    /// The file was written by a different format version.
    #[error("unsupported cache format version {found}")]
    UnsupportedVersion { found: u32 },

    /// A record held an impossible value.
    #[error("corrupt cache data: {0}")]
    Corrupt(String),
}

impl From<CacheCodecError> for crate::Error {
    fn from(err: CacheCodecError) -> Self {
        Self::CorruptStorage(err.to_string())
    }
}

// ---------------------------------------------------------------------------
// Encoding
// ---------------------------------------------------------------------------

/// Encode the full excerpt maps into cache file bytes.
#[must_use]
pub fn encode(
    bugs: &BTreeMap<Hash, BugExcerpt>,
    identities: &BTreeMap<Hash, IdentityExcerpt>,
) -> Vec<u8> {
    let mut buf = Vec::with_capacity(64 + bugs.len() * 128 + identities.len() * 64);
    buf.extend_from_slice(&CACHE_MAGIC);
    buf.extend_from_slice(&CACHE_VERSION.to_le_bytes());

    put_varint(bugs.len() as u64, &mut buf);
    for excerpt in bugs.values() {
        put_str(excerpt.id.as_str(), &mut buf);
        match &excerpt.author_id {
            Some(id) => {
                buf.push(1);
                put_str(id.as_str(), &mut buf);
            }
            None => buf.push(0),
        }
        put_varint(excerpt.create_time, &mut buf);
        put_varint(excerpt.edit_time, &mut buf);
        put_varint(zigzag_encode(excerpt.create_unix_time), &mut buf);
        put_varint(zigzag_encode(excerpt.edit_unix_time), &mut buf);
        buf.push(match excerpt.status {
            Status::Open => 1,
            Status::Closed => 2,
        });
        put_varint(excerpt.labels.len() as u64, &mut buf);
        for label in &excerpt.labels {
            put_str(label.as_str(), &mut buf);
        }
        put_str(&excerpt.title, &mut buf);
        put_varint(excerpt.comment_count as u64, &mut buf);
        put_varint(excerpt.create_metadata.len() as u64, &mut buf);
        for (key, value) in &excerpt.create_metadata {
            put_str(key, &mut buf);
            put_str(value, &mut buf);
        }
        put_varint(excerpt.actors.len() as u64, &mut buf);
        for actor in &excerpt.actors {
            put_str(actor.as_str(), &mut buf);
        }
    }

    put_varint(identities.len() as u64, &mut buf);
    for excerpt in identities.values() {
        put_str(excerpt.id.as_str(), &mut buf);
        put_str(&excerpt.name, &mut buf);
        put_str(&excerpt.login, &mut buf);
    }

    buf
}

/// Decode cache file bytes back into the excerpt maps.
///
/// # Errors
///
/// [`CacheCodecError::BadMagic`] / [`CacheCodecError::UnsupportedVersion`]
/// when the header does not match, [`CacheCodecError::UnexpectedEof`] /
/// [`CacheCodecError::Corrupt`] for damaged records. Callers treat every
/// case as "rebuild from the refs".
pub fn decode(
    data: &[u8],
) -> Result<(BTreeMap<Hash, BugExcerpt>, BTreeMap<Hash, IdentityExcerpt>), CacheCodecError> {
    let mut reader = Reader { data, pos: 0 };

    if reader.take(4)? != CACHE_MAGIC {
        return Err(CacheCodecError::BadMagic);
    }
    let version = reader.u32_le()?;
    if version != CACHE_VERSION {
        return Err(CacheCodecError::UnsupportedVersion { found: version });
    }

    let bug_count = reader.varint()?;
    let mut bugs = BTreeMap::new();
    for _ in 0..bug_count {
        let id = reader.hash()?;
        let author_id = match reader.u8()? {
            0 => None,
            1 => Some(reader.hash()?),
            other => {
                return Err(CacheCodecError::Corrupt(format!(
                    "author flag must be 0 or 1, found {other}"
                )));
            }
        };
        let create_time = reader.varint()?;
        let edit_time = reader.varint()?;
        let create_unix_time = zigzag_decode(reader.varint()?);
        let edit_unix_time = zigzag_decode(reader.varint()?);
        let status = match reader.u8()? {
            1 => Status::Open,
            2 => Status::Closed,
            other => {
                return Err(CacheCodecError::Corrupt(format!(
                    "unknown status encoding {other}"
                )));
            }
        };

        let label_count = reader.varint()?;
        let mut labels = Vec::with_capacity(label_count as usize);
        for _ in 0..label_count {
            labels.push(Label::new(reader.str()?).map_err(|e| {
                CacheCodecError::Corrupt(format!("bad label in cache: {e}"))
            })?);
        }

        let title = reader.str()?;
        let comment_count = reader.varint()? as usize;

        let metadata_count = reader.varint()?;
        let mut create_metadata = BTreeMap::new();
        for _ in 0..metadata_count {
            let key = reader.str()?;
            let value = reader.str()?;
            create_metadata.insert(key, value);
        }

        let actor_count = reader.varint()?;
        let mut actors = Vec::with_capacity(actor_count as usize);
        for _ in 0..actor_count {
            actors.push(reader.hash()?);
        }

        bugs.insert(
            id.clone(),
            BugExcerpt {
                id,
                author_id,
                create_time,
                edit_time,
                create_unix_time,
                edit_unix_time,
                status,
                labels,
                title,
                comment_count,
                create_metadata,
                actors,
            },
        );
    }

    let identity_count = reader.varint()?;
    let mut identities = BTreeMap::new();
    for _ in 0..identity_count {
        let id = reader.hash()?;
        let name = reader.str()?;
        let login = reader.str()?;
        identities.insert(id.clone(), IdentityExcerpt { id, name, login });
    }

    if reader.pos != data.len() {
        return Err(CacheCodecError::Corrupt(format!(
            "{} trailing bytes after the last record",
            data.len() - reader.pos
        )));
    }

    Ok((bugs, identities))
}

// ---------------------------------------------------------------------------
// Primitives
// ---------------------------------------------------------------------------

/// Encode an unsigned value as LEB128.
fn put_varint(mut value: u64, buf: &mut Vec<u8>) {
    loop {
        let byte = (value & 0x7F) as u8;
        value >>= 7;
        if value == 0 {
            buf.push(byte);
            return;
        }
        buf.push(byte | 0x80);
    }
}

fn put_str(s: &str, buf: &mut Vec<u8>) {
    put_varint(s.len() as u64, buf);
    buf.extend_from_slice(s.as_bytes());
}

/// Zigzag-encode a signed value (maps negatives to odd positives).
const fn zigzag_encode(n: i64) -> u64 {
    ((n << 1) ^ (n >> 63)) as u64
}

/// Zigzag-decode a value produced by [`zigzag_encode`].
const fn zigzag_decode(n: u64) -> i64 {
    ((n >> 1) as i64) ^ -((n & 1) as i64)
}

struct Reader<'a> {
    data: &'a [u8],
    pos: usize,
}

impl<'a> Reader<'a> {
    fn take(&mut self, n: usize) -> Result<&'a [u8], CacheCodecError> {
        let end = self
            .pos
            .checked_add(n)
            .filter(|end| *end <= self.data.len())
            .ok_or(CacheCodecError::UnexpectedEof)?;
        let slice = &self.data[self.pos..end];
        self.pos = end;
        Ok(slice)
    }

    fn u8(&mut self) -> Result<u8, CacheCodecError> {
        Ok(self.take(1)?[0])
    }

    fn u32_le(&mut self) -> Result<u32, CacheCodecError> {
        let bytes = self.take(4)?;
        Ok(u32::from_le_bytes(bytes.try_into().expect("slice is 4 bytes")))
    }

    fn varint(&mut self) -> Result<u64, CacheCodecError> {
        let mut value: u64 = 0;
        let mut shift = 0u32;
        loop {
            let byte = self.u8()?;
            value |= u64::from(byte & 0x7F) << shift;
            if byte & 0x80 == 0 {
                return Ok(value);
            }
            shift += 7;
            if shift >= 64 {
                return Err(CacheCodecError::Corrupt(
                    "varint overflow: more than 9 continuation bytes".into(),
                ));
            }
        }
    }

    fn str(&mut self) -> Result<String, CacheCodecError> {
        let len = self.varint()?;
        let len = usize::try_from(len)
            .map_err(|_| CacheCodecError::Corrupt("string length overflows usize".into()))?;
        let bytes = self.take(len)?;
        String::from_utf8(bytes.to_vec())
            .map_err(|_| CacheCodecError::Corrupt("string is not valid UTF-8".into()))
    }

    fn hash(&mut self) -> Result<Hash, CacheCodecError> {
        let raw = self.str()?;
        Hash::from_hex(&raw).map_err(|e| CacheCodecError::Corrupt(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
