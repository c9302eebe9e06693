//! Document log: snippet texts, index-aligned with the vector store.
//!
//! The serialized form is a stream of length-prefixed records
//! (`u32` little-endian byte length, then the UTF-8 bytes), so snippet text
//! may contain any character sequence, blank lines included.

use crate::error::{Result, SageError};
use std::path::Path;
use tracing::warn;

const LENGTH_PREFIX: usize = 4;

/// Append one length-prefixed record to `out`.
pub(crate) fn encode_record(payload: &[u8], out: &mut Vec<u8>) -> Result<()> {
    let len = u32::try_from(payload.len()).map_err(|_| {
        SageError::Storage(format!("record of {} bytes is too large", payload.len()))
    })?;
    out.extend_from_slice(&len.to_le_bytes());
    out.extend_from_slice(payload);
    Ok(())
}

/// Records decoded from a byte stream.
#[derive(Debug)]
pub(crate) struct DecodedRecords<'a> {
    pub records: Vec<&'a [u8]>,
    /// Bytes of an incomplete final record, left behind by an interrupted append
    pub truncated_tail: usize,
}

pub(crate) fn decode_records(mut bytes: &[u8]) -> DecodedRecords<'_> {
    let mut records = Vec::new();

    while !bytes.is_empty() {
        if bytes.len() < LENGTH_PREFIX {
            break;
        }
        let mut prefix = [0u8; LENGTH_PREFIX];
        prefix.copy_from_slice(&bytes[..LENGTH_PREFIX]);
        let len = u32::from_le_bytes(prefix) as usize;

        let Some(end) = LENGTH_PREFIX.checked_add(len) else {
            break;
        };
        if bytes.len() < end {
            break;
        }

        records.push(&bytes[LENGTH_PREFIX..end]);
        bytes = &bytes[end..];
    }

    DecodedRecords {
        records,
        truncated_tail: bytes.len(),
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DocumentLog {
    entries: Vec<String>,
}

impl DocumentLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add one entry at the end and return its index.
    pub fn append(&mut self, text: impl Into<String>) -> usize {
        self.entries.push(text.into());
        self.entries.len() - 1
    }

    /// Snippet at `index`, or `None` when the index is out of range.
    pub fn get(&self, index: usize) -> Option<&str> {
        self.entries.get(index).map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(String::as_str)
    }

    /// Drop every entry from `len` onwards.
    pub fn truncate(&mut self, len: usize) {
        self.entries.truncate(len);
    }

    /// Encoded size of the first `count` entries.
    pub(crate) fn encoded_len(&self, count: usize) -> usize {
        self.entries
            .iter()
            .take(count)
            .map(|entry| entry.len() + LENGTH_PREFIX)
            .sum()
    }

    /// Encode a single entry as it is appended to a persisted log.
    pub fn encode_entry(text: &str) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(text.len() + LENGTH_PREFIX);
        encode_record(text.as_bytes(), &mut out)?;
        Ok(out)
    }

    /// Encode every entry as a length-prefixed record.
    pub fn serialize(&self) -> Result<Vec<u8>> {
        let mut out = Vec::with_capacity(self.encoded_len(self.entries.len()));
        for entry in &self.entries {
            encode_record(entry.as_bytes(), &mut out)?;
        }
        Ok(out)
    }

    /// Decode a record stream produced by [`DocumentLog::serialize`].
    ///
    /// An incomplete final record is dropped with a warning. A record that
    /// is not valid UTF-8 is [`SageError::CorruptStore`].
    pub fn deserialize(bytes: &[u8]) -> Result<Self> {
        Self::decode(bytes, Path::new("<document log>"))
    }

    /// Same as [`DocumentLog::deserialize`], naming `origin` in errors.
    pub(crate) fn decode(bytes: &[u8], origin: &Path) -> Result<Self> {
        let decoded = decode_records(bytes);
        if decoded.truncated_tail > 0 {
            warn!(
                "Dropping {} bytes of an incomplete document record from {}",
                decoded.truncated_tail,
                origin.display()
            );
        }

        let entries = decoded
            .records
            .into_iter()
            .enumerate()
            .map(|(i, record)| {
                String::from_utf8(record.to_vec()).map_err(|e| {
                    SageError::corrupt(origin, format!("document record {} is not UTF-8: {}", i, e))
                })
            })
            .collect::<Result<Vec<_>>>()?;

        Ok(Self { entries })
    }
}
