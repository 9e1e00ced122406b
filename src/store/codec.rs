//! On-disk format for stash files
//!
//! Each file holds one pretty-printed JSON document. Readers take the first
//! complete document and ignore whatever follows it.

use serde::Deserialize;
use serde_json::Value;
use std::fs;
use std::io::ErrorKind;
use std::path::Path;
use tracing::debug;

use crate::error::{Result, StashError};

/// Serializes a value as a single self-delimiting document
///
/// Nested structure is written in full; there is no depth or length elision.
pub fn encode(value: &Value) -> std::io::Result<String> {
    let mut text = serde_json::to_string_pretty(value)
        .map_err(|e| std::io::Error::new(ErrorKind::InvalidData, e))?;
    text.push('\n');
    Ok(text)
}

/// Parses the first complete document in `bytes`
///
/// Whatever follows the first value is never looked at, including bytes
/// glued to a bare number (`42;note` reads as `42`). Nesting depth is not
/// limited; deep documents grow the stack on demand. Input without any
/// document (empty or whitespace only) is an error.
pub fn decode_first(bytes: &[u8]) -> serde_json::Result<Value> {
    let mut de = serde_json::Deserializer::from_slice(bytes);
    de.disable_recursion_limit();
    // No `de.end()`: trailing content is deliberately left unread.
    Value::deserialize(serde_stacker::Deserializer::new(&mut de))
}

/// Reads the document stored at `path`
///
/// # Returns
/// * `Ok(Some(value))` if the file exists and starts with a well-formed document
/// * `Ok(None)` if the file is absent or cannot be read
/// * `Err(StashError::Deserialization)` if the file was read but is corrupt
pub fn read_document(path: &Path) -> Result<Option<Value>> {
    let bytes = match fs::read(path) {
        Ok(bytes) => bytes,
        Err(e) => {
            if e.kind() != ErrorKind::NotFound {
                debug!("Treating unreadable {} as absent: {}", path.display(), e);
            }
            return Ok(None);
        }
    };

    decode_first(&bytes)
        .map(Some)
        .map_err(|source| StashError::Deserialization {
            path: path.to_path_buf(),
            source,
        })
}
