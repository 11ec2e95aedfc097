//! Persistent build-artifact cache for source-to-source compilation.
//!
//! A [`ChangeTracker`] decides cheaply whether a file may have changed
//! (change-time and size as a fast path, SHA-1 of the content as ground
//! truth) and classifies its content. An [`ArtifactCache`] stores compiled
//! output keyed by that content hash inside a per-compiler directory, serves
//! it back, and recompiles through an injected callback when the file or any
//! of its declared dependencies changed.
//!
//! Every disk-touching operation has an async form built on `tokio::fs` and a
//! blocking `_sync` twin for call sites that cannot yield. Both share the same
//! core routines and differ only in the I/O call.

#![warn(missing_docs)]

pub mod artifact;
pub mod cache;
pub mod classify;
pub mod error;
pub mod hasher;
pub mod persist;
pub mod snapshot;
pub mod tracker;
pub mod workspace;

pub use artifact::{Artifact, ArtifactStore, CacheDir};
pub use cache::{ArtifactCache, BoxError, CompileOutput, Compiled, Lookup};
pub use error::CacheError;
pub use hasher::{HashInfo, Payload, Resolved};
pub use snapshot::{FileRecord, Snapshot};
pub use tracker::ChangeTracker;
pub use workspace::Workspace;
