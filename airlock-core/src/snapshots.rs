//! Content-addressed snapshot store.
//!
//! File bytes are captured the moment a file is added to (or updated on) a
//! request and stored under their sha256 hex digest. Upload jobs read from
//! here, never from the live workspace, so later workspace edits cannot
//! change what gets released.

use std::path::PathBuf;

use sha2::{Digest, Sha256};

use crate::error::{AirlockError, Result};

/// On-disk store backed by cacache, keyed by sha256 hex.
#[derive(Debug, Clone)]
pub struct SnapshotStore {
    root: PathBuf,
}

impl SnapshotStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &PathBuf {
        &self.root
    }

    /// Store bytes, returning their sha256 hex digest. Re-storing identical
    /// content is a no-op as far as callers are concerned.
    pub async fn put(&self, bytes: &[u8]) -> Result<String> {
        let hash = content_hash(bytes);
        cacache::write(&self.root, &hash, bytes).await?;
        Ok(hash)
    }

    /// Fetch bytes by content hash.
    pub async fn get(&self, content_hash: &str) -> Result<Vec<u8>> {
        cacache::read(&self.root, content_hash)
            .await
            .map_err(|err| match err {
                cacache::Error::EntryNotFound(_, _) => {
                    AirlockError::NotFound(format!("snapshot {content_hash}"))
                }
                other => AirlockError::Snapshot(other),
            })
    }

    pub async fn contains(&self, content_hash: &str) -> bool {
        matches!(
            cacache::metadata(&self.root, content_hash).await,
            Ok(Some(_))
        )
    }
}

/// sha256 hex digest of a byte slice; the identity used across the store,
/// the upload manifest, and the outbound content-hash header.
pub fn content_hash(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_encode(&hasher.finalize())
}

fn hex_encode(bytes: &[u8]) -> String {
    let mut out = String::with_capacity(bytes.len() * 2);
    for byte in bytes {
        use std::fmt::Write;
        let _ = write!(out, "{byte:02x}");
    }
    out
}
