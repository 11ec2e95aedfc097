//! Compression and serialization shared by the artifact store and snapshots.
//!
//! These are pure byte-level helpers; the sync and async I/O paths both call
//! them so the on-disk formats cannot drift apart.

use std::io::{Read, Write};

use flate2::read::GzDecoder;
use flate2::write::GzEncoder;
use flate2::Compression;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::CacheError;

/// Gzip-compresses `data` with the default compression level.
pub fn gzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    encoder.write_all(data)?;
    encoder.finish()
}

/// Decompresses a gzip stream.
pub fn gunzip(data: &[u8]) -> std::io::Result<Vec<u8>> {
    let mut decoder = GzDecoder::new(data);
    let mut out = Vec::new();
    decoder.read_to_end(&mut out)?;
    Ok(out)
}

/// Serializes `value` as JSON and gzips it.
pub fn to_gz_json<T: Serialize>(value: &T) -> Result<Vec<u8>, CacheError> {
    let json = serde_json::to_vec(value).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    gzip(&json).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}

/// Gunzips `data` and parses the result as JSON.
pub fn from_gz_json<T: DeserializeOwned>(data: &[u8]) -> Result<T, CacheError> {
    let json = gunzip(data).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })?;
    serde_json::from_slice(&json).map_err(|e| CacheError::Serialization {
        reason: e.to_string(),
    })
}
