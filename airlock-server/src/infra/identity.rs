//! Principal resolution.
//!
//! Authentication itself happens upstream: in production the Jobs site
//! fronts every call and forwards the identity in trusted headers together
//! with the shared backend token. For local development a JSON users file
//! stands in. Either way the output is an `airlock_core::Principal`.

use std::collections::{BTreeSet, HashMap};
use std::path::Path;

use axum::http::HeaderMap;
use serde::Deserialize;

use airlock_core::Principal;

use crate::infra::errors::AppError;

pub const USER_HEADER: &str = "x-airlock-user";
pub const CHECKER_HEADER: &str = "x-airlock-output-checker";
pub const WORKSPACES_HEADER: &str = "x-airlock-workspaces";
pub const COPILOT_HEADER: &str = "x-airlock-copilot-workspaces";

/// One entry in the dev users file.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct DevUser {
    #[serde(default)]
    pub output_checker: bool,
    #[serde(default)]
    pub workspaces: Vec<String>,
    #[serde(default)]
    pub copilot_workspaces: Vec<String>,
}

/// Resolves the authenticated principal for each request.
#[derive(Debug)]
pub enum IdentityResolver {
    /// Production: trust identity headers accompanied by the backend token.
    TrustedHeaders { token: String },
    /// Development: look the user up in the configured users file.
    DevUsers { users: HashMap<String, DevUser> },
}

impl IdentityResolver {
    pub fn trusted(token: impl Into<String>) -> Self {
        Self::TrustedHeaders {
            token: token.into(),
        }
    }

    pub fn from_dev_users_file(path: &Path) -> anyhow::Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let users: HashMap<String, DevUser> = serde_json::from_str(&raw)?;
        Ok(Self::DevUsers { users })
    }

    pub fn from_dev_users(users: HashMap<String, DevUser>) -> Self {
        Self::DevUsers { users }
    }

    pub fn resolve(&self, headers: &HeaderMap) -> Result<Principal, AppError> {
        let username = header_str(headers, USER_HEADER)?
            .ok_or_else(|| AppError::unauthorized("missing user identity"))?
            .to_string();

        match self {
            IdentityResolver::TrustedHeaders { token } => {
                let presented = header_str(headers, "authorization")?
                    .and_then(|v| v.strip_prefix("Bearer "))
                    .unwrap_or_default();
                if presented != token {
                    return Err(AppError::unauthorized("invalid backend token"));
                }

                let output_checker = header_str(headers, CHECKER_HEADER)?
                    .map(|v| v == "true" || v == "1")
                    .unwrap_or(false);
                Ok(Principal {
                    username,
                    output_checker,
                    workspaces: header_list(headers, WORKSPACES_HEADER)?,
                    copilot_workspaces: header_list(headers, COPILOT_HEADER)?,
                })
            }
            IdentityResolver::DevUsers { users } => {
                let user = users.get(&username).ok_or_else(|| {
                    AppError::unauthorized(format!("unknown user {username}"))
                })?;
                Ok(Principal {
                    username,
                    output_checker: user.output_checker,
                    workspaces: user.workspaces.iter().cloned().collect(),
                    copilot_workspaces: user.copilot_workspaces.iter().cloned().collect(),
                })
            }
        }
    }
}

fn header_str<'h>(headers: &'h HeaderMap, name: &str) -> Result<Option<&'h str>, AppError> {
    match headers.get(name) {
        None => Ok(None),
        Some(value) => value
            .to_str()
            .map(Some)
            .map_err(|_| AppError::bad_request(format!("malformed {name} header"))),
    }
}

fn header_list(headers: &HeaderMap, name: &str) -> Result<BTreeSet<String>, AppError> {
    Ok(header_str(headers, name)?
        .unwrap_or_default()
        .split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect())
}
