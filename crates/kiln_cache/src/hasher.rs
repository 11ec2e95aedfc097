//! Source file hashing and classification.
//!
//! Turns the raw bytes of a file into its [`HashInfo`]: the content hash used
//! as the artifact key plus the classification flags the pipeline uses to
//! decide whether a file needs compiling at all.

use std::path::Path;

use kiln_common::ContentHash;
use serde::{Deserialize, Serialize};

use crate::classify;

/// Content identity and classification of a source file.
///
/// Serialized with camelCase field names; this is the `info` object of every
/// entry in a tracker snapshot.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HashInfo {
    /// SHA-1 of the raw bytes (binary) or of the UTF-8 text (text).
    pub hash: ContentHash,
    /// The text looks minified.
    pub is_minified: bool,
    /// The path is inside a vendored dependency tree or runtime archive.
    pub is_in_vendor_tree: bool,
    /// The text ends with an inline source-map comment.
    pub has_inline_source_map: bool,
    /// The content failed text-encoding detection.
    pub is_binary: bool,
}

/// The contents of a source file or a compiled artifact.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Payload {
    /// Decoded text.
    Text(String),
    /// Raw bytes.
    Binary(Vec<u8>),
}

impl Payload {
    /// Returns the text, if this is a text payload.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Payload::Text(s) => Some(s),
            Payload::Binary(_) => None,
        }
    }

    /// Returns the bytes, if this is a binary payload.
    pub fn as_binary(&self) -> Option<&[u8]> {
        match self {
            Payload::Text(_) => None,
            Payload::Binary(b) => Some(b),
        }
    }

    /// Returns `true` for [`Payload::Binary`].
    pub fn is_binary(&self) -> bool {
        matches!(self, Payload::Binary(_))
    }
}

/// The result of resolving a file through the change tracker.
///
/// `contents` is only present when the file was actually read during this
/// lookup, so a compiler invoked right after does not need a second read.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Resolved {
    /// Hash and classification of the file.
    pub info: HashInfo,
    /// Freshly read contents, if the file was read.
    pub contents: Option<Payload>,
}

impl Resolved {
    /// A lookup answered from a recorded entry, without reading the file.
    pub fn cached(info: HashInfo) -> Self {
        Self {
            info,
            contents: None,
        }
    }
}

/// Hashes and classifies the bytes read from `path`.
///
/// Text is hashed over its UTF-8 re-encoding, so a UTF-16 file hashes the
/// same as the UTF-8 spelling of the same text.
pub fn analyze(path: &Path, bytes: Vec<u8>) -> Resolved {
    let is_in_vendor_tree = classify::is_vendored(&path.to_string_lossy());

    match classify::detect_encoding(&bytes) {
        Some(encoding) => {
            let text = encoding.decode(&bytes);
            let info = HashInfo {
                hash: ContentHash::from_text(&text),
                is_minified: classify::is_minified(&text),
                is_in_vendor_tree,
                has_inline_source_map: classify::has_inline_source_map(&text),
                is_binary: false,
            };
            Resolved {
                info,
                contents: Some(Payload::Text(text)),
            }
        }
        None => {
            let info = HashInfo {
                hash: ContentHash::from_bytes(&bytes),
                is_minified: false,
                is_in_vendor_tree,
                has_inline_source_map: false,
                is_binary: true,
            };
            Resolved {
                info,
                contents: Some(Payload::Binary(bytes)),
            }
        }
    }
}
