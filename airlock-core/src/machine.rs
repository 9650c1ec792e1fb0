//! The request state machine.
//!
//! Legal transitions are data: a table of `(from, to, role, trigger)` rows
//! evaluated by a single function. Nothing else in the codebase changes a
//! request's status directly; the controller asks [`evaluate`] for a
//! [`Transition`] and applies it inside the operation's transaction.

use airlock_model::{RequestStatus, TurnOwner};

use crate::error::{AirlockError, Result};

/// Role an actor plays for a given transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ActorRole {
    /// The request author.
    Author,
    /// Any output checker other than the author.
    OutputChecker,
    /// Internal transitions driven by the engine itself.
    System,
}

/// What the caller is trying to do to the request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    Submit,
    Resubmit,
    WithdrawRequest,
    FirstReviewSubmitted,
    SecondReviewSubmitted,
    Return,
    Reject,
    ReleaseFiles,
    UploadsComplete,
}

impl Trigger {
    pub fn as_str(&self) -> &'static str {
        match self {
            Trigger::Submit => "submit",
            Trigger::Resubmit => "resubmit",
            Trigger::WithdrawRequest => "withdraw_request",
            Trigger::FirstReviewSubmitted => "first_review_submitted",
            Trigger::SecondReviewSubmitted => "second_review_submitted",
            Trigger::Return => "return",
            Trigger::Reject => "reject",
            Trigger::ReleaseFiles => "release_files",
            Trigger::UploadsComplete => "uploads_complete",
        }
    }
}

/// The authoritative transition table.
const TRANSITIONS: &[(RequestStatus, RequestStatus, ActorRole, Trigger)] = &[
    (
        RequestStatus::Pending,
        RequestStatus::Submitted,
        ActorRole::Author,
        Trigger::Submit,
    ),
    (
        RequestStatus::Pending,
        RequestStatus::Withdrawn,
        ActorRole::Author,
        Trigger::WithdrawRequest,
    ),
    (
        RequestStatus::Submitted,
        RequestStatus::PartiallyReviewed,
        ActorRole::System,
        Trigger::FirstReviewSubmitted,
    ),
    (
        RequestStatus::Submitted,
        RequestStatus::Returned,
        ActorRole::OutputChecker,
        Trigger::Return,
    ),
    (
        RequestStatus::PartiallyReviewed,
        RequestStatus::Reviewed,
        ActorRole::System,
        Trigger::SecondReviewSubmitted,
    ),
    (
        RequestStatus::PartiallyReviewed,
        RequestStatus::Returned,
        ActorRole::OutputChecker,
        Trigger::Return,
    ),
    (
        RequestStatus::Reviewed,
        RequestStatus::Approved,
        ActorRole::OutputChecker,
        Trigger::ReleaseFiles,
    ),
    (
        RequestStatus::Reviewed,
        RequestStatus::Rejected,
        ActorRole::OutputChecker,
        Trigger::Reject,
    ),
    (
        RequestStatus::Reviewed,
        RequestStatus::Returned,
        ActorRole::OutputChecker,
        Trigger::Return,
    ),
    (
        RequestStatus::Returned,
        RequestStatus::Submitted,
        ActorRole::Author,
        Trigger::Resubmit,
    ),
    (
        RequestStatus::Returned,
        RequestStatus::Withdrawn,
        ActorRole::Author,
        Trigger::WithdrawRequest,
    ),
    (
        RequestStatus::Approved,
        RequestStatus::Released,
        ActorRole::System,
        Trigger::UploadsComplete,
    ),
];

/// The outcome of a legal transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Transition {
    pub from: RequestStatus,
    pub to: RequestStatus,
    /// Whether this transition flips the turn between author and reviewers,
    /// and therefore increments `review_turn`.
    pub increments_turn: bool,
}

/// Resolve a trigger against the table.
///
/// Returns `InvalidTransition` when no row matches `(from, trigger)` and
/// `PermissionDenied` when a row matches but requires a different role.
pub fn evaluate(from: RequestStatus, trigger: Trigger, role: ActorRole) -> Result<Transition> {
    let row = TRANSITIONS
        .iter()
        .find(|(f, _, _, t)| *f == from && *t == trigger);

    let Some((_, to, required_role, _)) = row else {
        return Err(AirlockError::InvalidTransition(format!(
            "cannot {} a request in status {}",
            trigger.as_str(),
            from
        )));
    };

    if role != *required_role {
        return Err(AirlockError::PermissionDenied(format!(
            "{} requires the {} role",
            trigger.as_str(),
            match required_role {
                ActorRole::Author => "author",
                ActorRole::OutputChecker => "output-checker",
                ActorRole::System => "system",
            }
        )));
    }

    Ok(Transition {
        from,
        to: *to,
        increments_turn: flips_ownership(from, *to),
    })
}

/// Ownership flips only between the author and reviewer sides; transitions
/// into system-owned (terminal and APPROVED/RELEASED) statuses never bump
/// the turn.
fn flips_ownership(from: RequestStatus, to: RequestStatus) -> bool {
    matches!(
        (from.owner(), to.owner()),
        (TurnOwner::Author, TurnOwner::Reviewer) | (TurnOwner::Reviewer, TurnOwner::Author)
    )
}
