//! Principals and capability checks.
//!
//! Authentication happens upstream (the Jobs site issues logins); by the
//! time a request reaches the controller it carries an authenticated
//! [`Principal`] with a resolved role set. All checks here are pure
//! predicates over that data, so an operation's permission surface is
//! exactly the set of `require_*` calls it makes.

use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

use airlock_model::ReleaseRequest;

use crate::error::{AirlockError, Result};

/// An authenticated user plus their resolved capabilities.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Principal {
    pub username: String,
    /// Trained output checkers may vote, return, reject, and release.
    pub output_checker: bool,
    /// Workspaces this user may author requests in.
    pub workspaces: BTreeSet<String>,
    /// Workspaces this user may read but not author requests in.
    pub copilot_workspaces: BTreeSet<String>,
}

impl Principal {
    pub fn new(username: impl Into<String>) -> Self {
        Self {
            username: username.into(),
            output_checker: false,
            workspaces: BTreeSet::new(),
            copilot_workspaces: BTreeSet::new(),
        }
    }

    pub fn with_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.workspaces.insert(workspace.into());
        self
    }

    pub fn with_copilot_workspace(mut self, workspace: impl Into<String>) -> Self {
        self.copilot_workspaces.insert(workspace.into());
        self
    }

    pub fn as_output_checker(mut self) -> Self {
        self.output_checker = true;
        self
    }

    pub fn can_author_in(&self, workspace: &str) -> bool {
        self.workspaces.contains(workspace)
    }

    /// Read access: authors and copilots of the workspace.
    pub fn can_read_workspace(&self, workspace: &str) -> bool {
        self.workspaces.contains(workspace) || self.copilot_workspaces.contains(workspace)
    }

    pub fn is_author_of(&self, request: &ReleaseRequest) -> bool {
        self.username == request.author
    }

    /// An output checker who is not the request author; the only role that
    /// may vote on or disposition a submitted request.
    pub fn is_reviewer_for(&self, request: &ReleaseRequest) -> bool {
        self.output_checker && !self.is_author_of(request)
    }

    /// May see the request at all: its author, any output checker, or a
    /// copilot of the workspace.
    pub fn can_view(&self, request: &ReleaseRequest) -> bool {
        self.is_author_of(request)
            || self.output_checker
            || self.copilot_workspaces.contains(&request.workspace)
    }

    pub fn require_author_of(&self, request: &ReleaseRequest) -> Result<()> {
        if self.is_author_of(request) {
            Ok(())
        } else {
            Err(AirlockError::PermissionDenied(format!(
                "only the request author may perform this operation (author is {})",
                request.author
            )))
        }
    }

    pub fn require_reviewer_for(&self, request: &ReleaseRequest) -> Result<()> {
        if !self.output_checker {
            return Err(AirlockError::PermissionDenied(
                "operation requires the output-checker role".to_string(),
            ));
        }
        if self.is_author_of(request) {
            return Err(AirlockError::PermissionDenied(
                "authors cannot review their own requests".to_string(),
            ));
        }
        Ok(())
    }

    pub fn require_workspace_author(&self, workspace: &str) -> Result<()> {
        if self.can_author_in(workspace) {
            Ok(())
        } else {
            Err(AirlockError::PermissionDenied(format!(
                "no access to workspace {workspace}"
            )))
        }
    }

    pub fn require_view(&self, request: &ReleaseRequest) -> Result<()> {
        if self.can_view(request) {
            Ok(())
        } else {
            Err(AirlockError::PermissionDenied(
                "no access to this request".to_string(),
            ))
        }
    }
}
