//! Shared foundational types used across the kiln build cache.
//!
//! This crate provides the SHA-1 content hash used as the cache key, the
//! compiler identity digest that namespaces per-compiler cache directories,
//! and path sanitization for stable cache keys.

#![warn(missing_docs)]

pub mod hash;
pub mod identity;
pub mod sanitize;

pub use hash::{ContentHash, ParseHashError};
pub use identity::CompilerIdentity;
pub use sanitize::{sanitize_path, strip_root};
