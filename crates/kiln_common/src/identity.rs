//! Compiler identity used to namespace cached artifacts.

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::hash::ContentHash;

/// The name, version, and options of a compiler configuration.
///
/// Two identities that differ in any field map to different cache
/// directories, so artifacts produced by one compiler version or option set
/// are never served for another, even for identical source content.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompilerIdentity {
    /// Compiler name (e.g. "typescript").
    pub name: String,
    /// Compiler version string.
    pub version: String,
    /// Compiler options as an arbitrary JSON value.
    #[serde(default)]
    pub options: Value,
}

impl CompilerIdentity {
    /// Creates an identity with no options.
    pub fn new(name: impl Into<String>, version: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            version: version.into(),
            options: Value::Null,
        }
    }

    /// Replaces the options of this identity.
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    /// Returns the stable digest of `{name, version, options}`.
    ///
    /// The identity is rendered as JSON with object keys in sorted order, so
    /// the digest does not depend on the order options were inserted in.
    pub fn digest(&self) -> ContentHash {
        let canonical = serde_json::json!({
            "name": self.name,
            "version": self.version,
            "options": self.options,
        });
        ContentHash::from_text(&canonical.to_string())
    }
}
