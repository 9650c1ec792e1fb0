//! Read-only projection of workspace directories.
//!
//! Workspaces are directories of batch-job outputs mounted read-only under
//! a single root. Listings carry per-path metadata plus a status relative to
//! the caller's current request; content hashes are computed on demand and
//! cached by `(size, mtime)` so repeated listings stay cheap.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::time::SystemTime;

use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::fs;

use airlock_model::{PathStatus, RelPath, WorkspaceFileMeta};

use crate::error::{AirlockError, Result};
use crate::snapshots::content_hash;

/// Cache key for a hashed workspace file.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
struct HashKey {
    path: PathBuf,
    size: u64,
    mtime: Option<SystemTime>,
}

/// Read-only view over all workspaces under one root directory.
#[derive(Debug)]
pub struct WorkspaceView {
    root: PathBuf,
    hash_cache: DashMap<HashKey, String>,
}

/// What a listing needs to know about the caller's current request: the
/// snapshot hash per active relpath, plus relpaths already released by
/// earlier requests.
#[derive(Debug, Default, Clone)]
pub struct RequestContext {
    pub on_request: HashMap<String, String>,
    pub released: Vec<String>,
}

impl RequestContext {
    fn status_for(&self, relpath: &RelPath, workspace_hash: &str) -> PathStatus {
        if let Some(snapshot_hash) = self.on_request.get(relpath.as_str()) {
            if snapshot_hash == workspace_hash {
                return PathStatus::UnderReview;
            }
            return PathStatus::Updated;
        }
        if self.released.iter().any(|p| p == relpath.as_str()) {
            return PathStatus::Released;
        }
        PathStatus::None
    }
}

impl WorkspaceView {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            hash_cache: DashMap::new(),
        }
    }

    fn workspace_root(&self, workspace: &str) -> Result<PathBuf> {
        // Workspace names come from config/URLs; hold them to the same
        // traversal rules as relpaths.
        let name = RelPath::new(workspace)?;
        Ok(name.under(&self.root))
    }

    /// Ordered listing of one directory level inside a workspace.
    pub async fn list(
        &self,
        workspace: &str,
        path: Option<&RelPath>,
        context: &RequestContext,
    ) -> Result<Vec<WorkspaceFileMeta>> {
        let ws_root = self.workspace_root(workspace)?;
        let dir = match path {
            Some(p) => p.under(&ws_root),
            None => ws_root.clone(),
        };
        if !dir.starts_with(&ws_root) {
            return Err(AirlockError::PermissionDenied(
                "path escapes the workspace".to_string(),
            ));
        }

        let mut entries = Vec::new();
        let mut reader = fs::read_dir(&dir).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AirlockError::NotFound(format!("workspace path {}", dir.display()))
            } else {
                AirlockError::Io(err)
            }
        })?;

        while let Some(entry) = reader.next_entry().await? {
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            let relpath = match path {
                Some(p) => RelPath::new(format!("{}/{}", p.as_str(), name))?,
                None => RelPath::new(name)?,
            };
            let meta = entry.metadata().await?;
            let modified_at = meta.modified().ok().map(DateTime::<Utc>::from);

            if meta.is_dir() {
                entries.push(WorkspaceFileMeta {
                    relpath,
                    is_dir: true,
                    size: 0,
                    modified_at,
                    content_hash: None,
                    status: PathStatus::None,
                });
                continue;
            }

            let hash = self.hash_file(&entry.path(), &meta).await?;
            let status = context.status_for(&relpath, &hash);
            entries.push(WorkspaceFileMeta {
                relpath,
                is_dir: false,
                size: meta.len() as i64,
                modified_at,
                content_hash: Some(hash),
                status,
            });
        }

        // Directories first, then lexicographic by path.
        entries.sort_by(|a, b| {
            b.is_dir
                .cmp(&a.is_dir)
                .then_with(|| a.relpath.as_str().cmp(b.relpath.as_str()))
        });
        Ok(entries)
    }

    /// Current bytes of a workspace file.
    pub async fn read(&self, workspace: &str, relpath: &RelPath) -> Result<Vec<u8>> {
        let ws_root = self.workspace_root(workspace)?;
        let path = relpath.under(&ws_root);
        fs::read(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AirlockError::NotFound(format!("workspace file {relpath}"))
            } else {
                AirlockError::Io(err)
            }
        })
    }

    /// Current content hash of a workspace file.
    pub async fn hash_of(&self, workspace: &str, relpath: &RelPath) -> Result<String> {
        let ws_root = self.workspace_root(workspace)?;
        let path = relpath.under(&ws_root);
        let meta = fs::metadata(&path).await.map_err(|err| {
            if err.kind() == std::io::ErrorKind::NotFound {
                AirlockError::NotFound(format!("workspace file {relpath}"))
            } else {
                AirlockError::Io(err)
            }
        })?;
        self.hash_file(&path, &meta).await
    }

    async fn hash_file(&self, path: &Path, meta: &std::fs::Metadata) -> Result<String> {
        let key = HashKey {
            path: path.to_path_buf(),
            size: meta.len(),
            mtime: meta.modified().ok(),
        };
        if let Some(cached) = self.hash_cache.get(&key) {
            return Ok(cached.clone());
        }
        let bytes = fs::read(path).await?;
        let hash = content_hash(&bytes);
        self.hash_cache.insert(key, hash.clone());
        Ok(hash)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn seed(dir: &Path) {
        fs::create_dir_all(dir.join("ws1/output")).await.unwrap();
        fs::write(dir.join("ws1/output/a.csv"), b"id\n1\n").await.unwrap();
        fs::write(dir.join("ws1/notes.txt"), b"hello").await.unwrap();
    }

    #[tokio::test]
    async fn lists_directories_before_files() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path()).await;
        let view = WorkspaceView::new(tmp.path());
        let listing = view
            .list("ws1", None, &RequestContext::default())
            .await
            .unwrap();
        assert_eq!(listing.len(), 2);
        assert!(listing[0].is_dir);
        assert_eq!(listing[0].relpath.as_str(), "output");
        assert_eq!(listing[1].relpath.as_str(), "notes.txt");
        assert_eq!(listing[1].status, PathStatus::None);
    }

    #[tokio::test]
    async fn status_tracks_request_context() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path()).await;
        let view = WorkspaceView::new(tmp.path());
        let current_hash = view
            .hash_of("ws1", &RelPath::new("output/a.csv").unwrap())
            .await
            .unwrap();

        let mut context = RequestContext::default();
        context
            .on_request
            .insert("output/a.csv".to_string(), current_hash.clone());
        let listing = view
            .list("ws1", Some(&RelPath::new("output").unwrap()), &context)
            .await
            .unwrap();
        assert_eq!(listing[0].status, PathStatus::UnderReview);

        // Snapshot no longer matches the workspace bytes.
        context
            .on_request
            .insert("output/a.csv".to_string(), "stale".to_string());
        let listing = view
            .list("ws1", Some(&RelPath::new("output").unwrap()), &context)
            .await
            .unwrap();
        assert_eq!(listing[0].status, PathStatus::Updated);
    }

    #[tokio::test]
    async fn released_paths_show_as_released() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path()).await;
        let view = WorkspaceView::new(tmp.path());
        let context = RequestContext {
            on_request: HashMap::new(),
            released: vec!["output/a.csv".to_string()],
        };
        let listing = view
            .list("ws1", Some(&RelPath::new("output").unwrap()), &context)
            .await
            .unwrap();
        assert_eq!(listing[0].status, PathStatus::Released);
    }

    #[tokio::test]
    async fn read_missing_file_is_not_found() {
        let tmp = tempfile::tempdir().unwrap();
        seed(tmp.path()).await;
        let view = WorkspaceView::new(tmp.path());
        let err = view
            .read("ws1", &RelPath::new("nope.csv").unwrap())
            .await
            .unwrap_err();
        assert!(matches!(err, AirlockError::NotFound(_)));
    }
}
