use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::ModelError;

/// Lifecycle status of a release request.
///
/// Transitions between statuses are governed by the state machine in
/// `airlock-core`; the terminal statuses are `Released`, `Rejected`, and
/// `Withdrawn`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    Pending,
    Submitted,
    PartiallyReviewed,
    Reviewed,
    Returned,
    Approved,
    Released,
    Rejected,
    Withdrawn,
}

impl RequestStatus {
    pub const ALL: &'static [RequestStatus] = &[
        RequestStatus::Pending,
        RequestStatus::Submitted,
        RequestStatus::PartiallyReviewed,
        RequestStatus::Reviewed,
        RequestStatus::Returned,
        RequestStatus::Approved,
        RequestStatus::Released,
        RequestStatus::Rejected,
        RequestStatus::Withdrawn,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            RequestStatus::Pending => "pending",
            RequestStatus::Submitted => "submitted",
            RequestStatus::PartiallyReviewed => "partially_reviewed",
            RequestStatus::Reviewed => "reviewed",
            RequestStatus::Returned => "returned",
            RequestStatus::Approved => "approved",
            RequestStatus::Released => "released",
            RequestStatus::Rejected => "rejected",
            RequestStatus::Withdrawn => "withdrawn",
        }
    }

    /// Who holds the turn while a request sits in this status.
    pub fn owner(&self) -> TurnOwner {
        match self {
            RequestStatus::Pending | RequestStatus::Returned => TurnOwner::Author,
            RequestStatus::Submitted
            | RequestStatus::PartiallyReviewed
            | RequestStatus::Reviewed => TurnOwner::Reviewer,
            RequestStatus::Approved
            | RequestStatus::Released
            | RequestStatus::Rejected
            | RequestStatus::Withdrawn => TurnOwner::System,
        }
    }

    /// Terminal statuses never transition again and release the author's
    /// one-active-request slot.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Released | RequestStatus::Rejected | RequestStatus::Withdrawn
        )
    }

    /// Statuses in which the author may edit files, groups, and comments.
    pub fn author_editable(&self) -> bool {
        matches!(self, RequestStatus::Pending | RequestStatus::Returned)
    }

    /// The blinded independent-review phase.
    pub fn under_independent_review(&self) -> bool {
        matches!(
            self,
            RequestStatus::Submitted | RequestStatus::PartiallyReviewed
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RequestStatus {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::ALL
            .iter()
            .copied()
            .find(|status| status.as_str() == s)
            .ok_or_else(|| ModelError::InvalidValue(format!("unknown request status: {s}")))
    }
}

/// Which side of the review table currently owns a request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TurnOwner {
    Author,
    Reviewer,
    System,
}

/// Whether a file is intended for release or only provides context.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileType {
    Output,
    Supporting,
}

impl FileType {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileType::Output => "output",
            FileType::Supporting => "supporting",
        }
    }
}

impl fmt::Display for FileType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FileType {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "output" => Ok(FileType::Output),
            "supporting" => Ok(FileType::Supporting),
            other => Err(ModelError::InvalidValue(format!(
                "unknown file type: {other}"
            ))),
        }
    }
}

/// A single reviewer's standing on one file in the current turn.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    RequestChanges,
    Undecided,
}

impl VoteChoice {
    pub fn as_str(&self) -> &'static str {
        match self {
            VoteChoice::Approve => "approve",
            VoteChoice::RequestChanges => "request_changes",
            VoteChoice::Undecided => "undecided",
        }
    }

    /// Only decided votes satisfy the submit-review gate.
    pub fn is_decided(&self) -> bool {
        !matches!(self, VoteChoice::Undecided)
    }
}

impl fmt::Display for VoteChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for VoteChoice {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "approve" => Ok(VoteChoice::Approve),
            "request_changes" => Ok(VoteChoice::RequestChanges),
            "undecided" => Ok(VoteChoice::Undecided),
            other => Err(ModelError::InvalidValue(format!(
                "unknown vote choice: {other}"
            ))),
        }
    }
}

/// Aggregated per-file outcome derived from submitted reviews.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileDecision {
    Approved,
    ChangesRequested,
    Conflicted,
    Incomplete,
}

impl FileDecision {
    pub fn as_str(&self) -> &'static str {
        match self {
            FileDecision::Approved => "approved",
            FileDecision::ChangesRequested => "changes_requested",
            FileDecision::Conflicted => "conflicted",
            FileDecision::Incomplete => "incomplete",
        }
    }
}

impl fmt::Display for FileDecision {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Comment visibility flag as stored; what a given principal actually sees
/// is computed, not stored.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Visibility {
    Private,
    Public,
}

impl Visibility {
    pub fn as_str(&self) -> &'static str {
        match self {
            Visibility::Private => "private",
            Visibility::Public => "public",
        }
    }
}

impl fmt::Display for Visibility {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Visibility {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "private" => Ok(Visibility::Private),
            "public" => Ok(Visibility::Public),
            other => Err(ModelError::InvalidValue(format!(
                "unknown visibility: {other}"
            ))),
        }
    }
}

/// Scheduler-visible upload job states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Queued,
    InFlight,
    Succeeded,
    Failed,
}

impl JobState {
    pub fn as_str(&self) -> &'static str {
        match self {
            JobState::Queued => "queued",
            JobState::InFlight => "in_flight",
            JobState::Succeeded => "succeeded",
            JobState::Failed => "failed",
        }
    }
}

impl fmt::Display for JobState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for JobState {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "queued" => Ok(JobState::Queued),
            "in_flight" => Ok(JobState::InFlight),
            "succeeded" => Ok(JobState::Succeeded),
            "failed" => Ok(JobState::Failed),
            other => Err(ModelError::InvalidValue(format!(
                "unknown job state: {other}"
            ))),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn status_round_trips_through_str() {
        for status in RequestStatus::ALL {
            assert_eq!(*status, status.as_str().parse().unwrap());
        }
    }

    #[test]
    fn ownership_split() {
        assert_eq!(RequestStatus::Pending.owner(), TurnOwner::Author);
        assert_eq!(RequestStatus::Returned.owner(), TurnOwner::Author);
        assert_eq!(RequestStatus::Submitted.owner(), TurnOwner::Reviewer);
        assert_eq!(RequestStatus::Reviewed.owner(), TurnOwner::Reviewer);
        assert_eq!(RequestStatus::Approved.owner(), TurnOwner::System);
        assert_eq!(RequestStatus::Withdrawn.owner(), TurnOwner::System);
    }

    #[test]
    fn terminal_statuses() {
        let terminal: Vec<_> = RequestStatus::ALL
            .iter()
            .filter(|s| s.is_terminal())
            .collect();
        assert_eq!(
            terminal,
            vec![
                &RequestStatus::Released,
                &RequestStatus::Rejected,
                &RequestStatus::Withdrawn
            ]
        );
    }
}
