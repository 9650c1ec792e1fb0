use std::fmt;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// A validated path relative to a workspace root.
///
/// Rejects absolute paths, parent traversal, and empty input so that a
/// `RelPath` can always be joined under a root directory without escaping it.
/// Stored and compared as a normalized `/`-separated string.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct RelPath(String);

impl RelPath {
    pub fn new(raw: impl Into<String>) -> Result<Self, ModelError> {
        let raw = raw.into();
        if raw.is_empty() {
            return Err(ModelError::InvalidRelPath("empty path".to_string()));
        }
        let path = Path::new(&raw);
        let mut parts = Vec::new();
        for component in path.components() {
            match component {
                Component::Normal(part) => match part.to_str() {
                    Some(s) => parts.push(s),
                    None => {
                        return Err(ModelError::InvalidRelPath(raw.clone()));
                    }
                },
                Component::CurDir => {}
                Component::ParentDir | Component::RootDir | Component::Prefix(_) => {
                    return Err(ModelError::InvalidRelPath(raw.clone()));
                }
            }
        }
        if parts.is_empty() {
            return Err(ModelError::InvalidRelPath(raw));
        }
        Ok(Self(parts.join("/")))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Final path segment, used as the upload filename.
    pub fn file_name(&self) -> &str {
        self.0.rsplit('/').next().unwrap_or(&self.0)
    }

    /// Join under `root` for filesystem access.
    pub fn under(&self, root: &Path) -> PathBuf {
        root.join(&self.0)
    }
}

impl fmt::Display for RelPath {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl TryFrom<String> for RelPath {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        Self::new(value)
    }
}

impl From<RelPath> for String {
    fn from(value: RelPath) -> Self {
        value.0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_nested_paths() {
        let p = RelPath::new("output/tables/a.csv").unwrap();
        assert_eq!(p.as_str(), "output/tables/a.csv");
        assert_eq!(p.file_name(), "a.csv");
    }

    #[test]
    fn normalizes_current_dir_segments() {
        let p = RelPath::new("./output/a.csv").unwrap();
        assert_eq!(p.as_str(), "output/a.csv");
    }

    #[test]
    fn rejects_escapes() {
        assert!(RelPath::new("../etc/passwd").is_err());
        assert!(RelPath::new("output/../../etc").is_err());
        assert!(RelPath::new("/etc/passwd").is_err());
        assert!(RelPath::new("").is_err());
        assert!(RelPath::new(".").is_err());
    }

    #[test]
    fn joins_under_root() {
        let p = RelPath::new("output/a.csv").unwrap();
        assert_eq!(
            p.under(Path::new("/workspaces/w1")),
            PathBuf::from("/workspaces/w1/output/a.csv")
        );
    }
}
