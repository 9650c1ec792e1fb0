//! The review engine: vote aggregation, decisions, blinding, and gates.
//!
//! Everything in this module is a pure function over entity slices loaded by
//! the controller. The store never interprets votes; the controller never
//! counts them inline. Decision and visibility semantics live here and only
//! here.

use std::collections::{BTreeSet, HashMap};

use airlock_model::{
    Comment, FileDecision, FileId, ReleaseRequest, RequestFile, RequestStatus, ReviewSubmission,
    TurnOwner, Visibility, Vote, VoteChoice,
};

use crate::error::{AirlockError, Result};
use crate::identity::Principal;

/// Derive the decision for one file from the decided votes cast on it.
///
/// `votes` must already be restricted to the decided turn and to reviewers
/// whose review was submitted; undecided votes are ignored.
pub fn decide(votes: &[&Vote]) -> FileDecision {
    let mut approvers = BTreeSet::new();
    let mut changers = BTreeSet::new();
    for vote in votes {
        match vote.choice {
            VoteChoice::Approve => {
                approvers.insert(vote.reviewer.as_str());
            }
            VoteChoice::RequestChanges => {
                changers.insert(vote.reviewer.as_str());
            }
            VoteChoice::Undecided => {}
        }
    }

    if !approvers.is_empty() && !changers.is_empty() {
        FileDecision::Conflicted
    } else if approvers.len() >= 2 {
        FileDecision::Approved
    } else if changers.len() >= 2 {
        FileDecision::ChangesRequested
    } else {
        FileDecision::Incomplete
    }
}

/// The turn whose submitted reviews decide file outcomes, if any reviews
/// have been submitted at all.
pub fn decided_turn(submissions: &[ReviewSubmission]) -> Option<i64> {
    submissions.iter().map(|s| s.review_turn).max()
}

/// Whether per-file decisions are visible in the request's current status.
pub fn decisions_visible(status: RequestStatus) -> bool {
    !matches!(
        status,
        RequestStatus::Pending | RequestStatus::Submitted | RequestStatus::PartiallyReviewed
    )
}

/// Compute decisions for every active file of the request.
pub fn file_decisions(
    files: &[RequestFile],
    votes: &[Vote],
    submissions: &[ReviewSubmission],
) -> HashMap<FileId, FileDecision> {
    let Some(turn) = decided_turn(submissions) else {
        return files
            .iter()
            .filter(|f| !f.is_withdrawn())
            .map(|f| (f.id, FileDecision::Incomplete))
            .collect();
    };
    let submitted: BTreeSet<&str> = submissions
        .iter()
        .filter(|s| s.review_turn == turn)
        .map(|s| s.reviewer.as_str())
        .collect();

    files
        .iter()
        .filter(|f| !f.is_withdrawn())
        .map(|file| {
            let counted: Vec<&Vote> = votes
                .iter()
                .filter(|v| {
                    v.file_id == file.id
                        && v.review_turn == turn
                        && submitted.contains(v.reviewer.as_str())
                })
                .collect();
            (file.id, decide(&counted))
        })
        .collect()
}

/// Submit-review gate for one reviewer at the current turn.
///
/// The reviewer must hold a decided vote on every active output file, and
/// must have commented (this turn) on every group where they requested
/// changes.
pub fn check_submit_review(
    reviewer: &str,
    turn: i64,
    files: &[RequestFile],
    votes: &[Vote],
    comments: &[Comment],
) -> Result<()> {
    let own_votes: HashMap<FileId, &Vote> = votes
        .iter()
        .filter(|v| v.reviewer == reviewer && v.review_turn == turn)
        .map(|v| (v.file_id, v))
        .collect();

    let mut groups_needing_comment = BTreeSet::new();
    for file in files.iter().filter(|f| f.is_active_output()) {
        match own_votes.get(&file.id) {
            Some(vote) if vote.choice.is_decided() => {
                if vote.choice == VoteChoice::RequestChanges {
                    groups_needing_comment.insert(file.group_id);
                }
            }
            _ => {
                return Err(AirlockError::Precondition(format!(
                    "no vote on output file {} yet",
                    file.relpath
                )));
            }
        }
    }

    for group_id in groups_needing_comment {
        let commented = comments
            .iter()
            .any(|c| c.group_id == group_id && c.author == reviewer && c.review_turn == turn);
        if !commented {
            return Err(AirlockError::Precondition(
                "requested changes need an explanatory comment on the file group".to_string(),
            ));
        }
    }

    Ok(())
}

/// Return gate when leaving REVIEWED: every group holding a file the
/// reviewers flagged must carry a public comment from this turn so the
/// author learns what to change. Early returns (from SUBMITTED or
/// PARTIALLY_REVIEWED) skip this check.
pub fn check_return(
    turn: i64,
    files: &[RequestFile],
    decisions: &HashMap<FileId, FileDecision>,
    comments: &[Comment],
) -> Result<()> {
    let mut flagged_groups = BTreeSet::new();
    for file in files.iter().filter(|f| !f.is_withdrawn()) {
        if matches!(
            decisions.get(&file.id),
            Some(FileDecision::ChangesRequested) | Some(FileDecision::Conflicted)
        ) {
            flagged_groups.insert(file.group_id);
        }
    }

    for group_id in flagged_groups {
        let has_public = comments.iter().any(|c| {
            c.group_id == group_id && c.review_turn == turn && c.visibility == Visibility::Public
        });
        if !has_public {
            return Err(AirlockError::Precondition(
                "groups with requested changes need a public comment before returning".to_string(),
            ));
        }
    }

    Ok(())
}

/// Release gate: every active output file must be approved.
pub fn check_release(
    files: &[RequestFile],
    decisions: &HashMap<FileId, FileDecision>,
) -> Result<()> {
    for file in files.iter().filter(|f| f.is_active_output()) {
        match decisions.get(&file.id) {
            Some(FileDecision::Approved) => {}
            other => {
                return Err(AirlockError::Precondition(format!(
                    "output file {} is {} rather than approved",
                    file.relpath,
                    other.copied().unwrap_or(FileDecision::Incomplete)
                )));
            }
        }
    }
    Ok(())
}

/// Submission gate: a request needs at least one output file, and every
/// group holding output files must have context and controls filled in.
pub fn check_submit(
    files: &[RequestFile],
    groups: &[airlock_model::FileGroup],
) -> Result<()> {
    let outputs: Vec<&RequestFile> = files.iter().filter(|f| f.is_active_output()).collect();
    if outputs.is_empty() {
        return Err(AirlockError::Precondition(
            "a request needs at least one output file before submission".to_string(),
        ));
    }

    let groups_by_id: HashMap<_, _> = groups.iter().map(|g| (g.id, g)).collect();
    for file in outputs {
        match groups_by_id.get(&file.group_id) {
            Some(group) if group.is_complete() => {}
            Some(group) => {
                return Err(AirlockError::Precondition(format!(
                    "file group {} needs context and controls before submission",
                    group.name
                )));
            }
            None => {
                return Err(AirlockError::Invariant(format!(
                    "file {} references a missing group",
                    file.relpath
                )));
            }
        }
    }
    Ok(())
}

/// Whether `viewer` may see an individual vote.
///
/// Authors and copilots never see raw votes (they see decisions once those
/// are final). During independent review a reviewer sees only their own
/// current-turn votes; from REVIEWED onward the turn's votes open up to all
/// reviewers.
pub fn vote_visible(vote: &Vote, viewer: &Principal, request: &ReleaseRequest) -> bool {
    if !viewer.is_reviewer_for(request) {
        return false;
    }
    if request.status.under_independent_review() && vote.review_turn == request.review_turn {
        return vote.reviewer == viewer.username;
    }
    true
}

/// Whether `viewer` may see a comment.
///
/// Reviewers are blinded to each other's current-turn comments during
/// independent review. The author (and workspace copilots) see public
/// comments, plus private ones from earlier turns once the request is back
/// in their hands.
pub fn comment_visible(comment: &Comment, viewer: &Principal, request: &ReleaseRequest) -> bool {
    if viewer.is_reviewer_for(request) {
        if request.status.under_independent_review()
            && comment.review_turn == request.review_turn
        {
            return comment.author == viewer.username;
        }
        return true;
    }

    // Author and copilot view.
    match comment.visibility {
        Visibility::Public => true,
        Visibility::Private => {
            request.status.owner() == TurnOwner::Author
                && comment.review_turn < request.review_turn
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use airlock_model::{FileGroup, FileType, GroupId, RelPath, RequestId};
    use chrono::Utc;

    fn file(group_id: GroupId, relpath: &str, filetype: FileType) -> RequestFile {
        RequestFile {
            id: FileId::new(),
            request_id: RequestId::new(),
            group_id,
            relpath: RelPath::new(relpath).unwrap(),
            filetype,
            content_hash: "abc123".to_string(),
            size: 10,
            added_at: Utc::now(),
            added_by: "alice".to_string(),
            added_in_turn: 1,
            withdrawn_at: None,
            withdrawn_in_turn: None,
            uploaded_at: None,
        }
    }

    fn vote(file_id: FileId, reviewer: &str, turn: i64, choice: VoteChoice) -> Vote {
        Vote {
            file_id,
            reviewer: reviewer.to_string(),
            review_turn: turn,
            choice,
            created_at: Utc::now(),
        }
    }

    fn submission(reviewer: &str, turn: i64) -> ReviewSubmission {
        ReviewSubmission {
            request_id: RequestId::new(),
            reviewer: reviewer.to_string(),
            review_turn: turn,
            submitted_at: Utc::now(),
        }
    }

    fn comment(group_id: GroupId, author: &str, turn: i64, visibility: Visibility) -> Comment {
        Comment {
            id: airlock_model::CommentId::new(),
            request_id: RequestId::new(),
            group_id,
            author: author.to_string(),
            body: "please round".to_string(),
            visibility,
            review_turn: turn,
            created_at: Utc::now(),
        }
    }

    #[test]
    fn two_approvals_decide_approved() {
        let f = FileId::new();
        let a = vote(f, "bob", 2, VoteChoice::Approve);
        let b = vote(f, "carol", 2, VoteChoice::Approve);
        assert_eq!(decide(&[&a, &b]), FileDecision::Approved);
    }

    #[test]
    fn mixed_votes_conflict() {
        let f = FileId::new();
        let a = vote(f, "bob", 2, VoteChoice::Approve);
        let b = vote(f, "carol", 2, VoteChoice::RequestChanges);
        assert_eq!(decide(&[&a, &b]), FileDecision::Conflicted);
    }

    #[test]
    fn two_change_requests_decide_changes_requested() {
        let f = FileId::new();
        let a = vote(f, "bob", 2, VoteChoice::RequestChanges);
        let b = vote(f, "carol", 2, VoteChoice::RequestChanges);
        assert_eq!(decide(&[&a, &b]), FileDecision::ChangesRequested);
    }

    #[test]
    fn single_vote_is_incomplete() {
        let f = FileId::new();
        let a = vote(f, "bob", 2, VoteChoice::Approve);
        assert_eq!(decide(&[&a]), FileDecision::Incomplete);
        assert_eq!(decide(&[]), FileDecision::Incomplete);
    }

    #[test]
    fn undecided_votes_do_not_count() {
        let f = FileId::new();
        let a = vote(f, "bob", 2, VoteChoice::Approve);
        let b = vote(f, "carol", 2, VoteChoice::Undecided);
        assert_eq!(decide(&[&a, &b]), FileDecision::Incomplete);
    }

    #[test]
    fn decisions_only_count_submitted_reviewers() {
        let group = GroupId::new();
        let f = file(group, "output/a.csv", FileType::Output);
        let votes = vec![
            vote(f.id, "bob", 2, VoteChoice::Approve),
            vote(f.id, "carol", 2, VoteChoice::Approve),
        ];
        // Only bob submitted; carol's vote stays private.
        let subs = vec![submission("bob", 2)];
        let decisions = file_decisions(&[f.clone()], &votes, &subs);
        assert_eq!(decisions[&f.id], FileDecision::Incomplete);

        let subs = vec![submission("bob", 2), submission("carol", 2)];
        let decisions = file_decisions(&[f.clone()], &votes, &subs);
        assert_eq!(decisions[&f.id], FileDecision::Approved);
    }

    #[test]
    fn stale_turn_votes_are_ignored() {
        let group = GroupId::new();
        let f = file(group, "output/a.csv", FileType::Output);
        let votes = vec![
            vote(f.id, "bob", 2, VoteChoice::Approve),
            vote(f.id, "carol", 4, VoteChoice::Approve),
            vote(f.id, "dave", 4, VoteChoice::Approve),
        ];
        let subs = vec![
            submission("bob", 2),
            submission("carol", 4),
            submission("dave", 4),
        ];
        let decisions = file_decisions(&[f.clone()], &votes, &subs);
        // Turn 4 is the decided turn; bob's old vote no longer applies.
        assert_eq!(decisions[&f.id], FileDecision::Approved);
    }

    #[test]
    fn submit_review_needs_votes_on_every_output() {
        let group = GroupId::new();
        let out = file(group, "output/a.csv", FileType::Output);
        let supp = file(group, "output/a.html", FileType::Supporting);
        let err = check_submit_review("bob", 2, &[out.clone(), supp.clone()], &[], &[]).unwrap_err();
        assert!(matches!(err, AirlockError::Precondition(_)));

        // Supporting files do not need votes.
        let votes = vec![vote(out.id, "bob", 2, VoteChoice::Approve)];
        check_submit_review("bob", 2, &[out, supp], &votes, &[]).unwrap();
    }

    #[test]
    fn submit_review_rejects_undecided_votes() {
        let group = GroupId::new();
        let out = file(group, "output/a.csv", FileType::Output);
        let votes = vec![vote(out.id, "bob", 2, VoteChoice::Undecided)];
        assert!(check_submit_review("bob", 2, &[out], &votes, &[]).is_err());
    }

    #[test]
    fn request_changes_needs_a_comment_on_the_group() {
        let group = GroupId::new();
        let out = file(group, "output/a.csv", FileType::Output);
        let votes = vec![vote(out.id, "bob", 2, VoteChoice::RequestChanges)];
        assert!(check_submit_review("bob", 2, &[out.clone()], &votes, &[]).is_err());

        let comments = vec![comment(group, "bob", 2, Visibility::Private)];
        check_submit_review("bob", 2, &[out], &votes, &comments).unwrap();
    }

    #[test]
    fn withdrawn_outputs_do_not_block_submit_review() {
        let group = GroupId::new();
        let mut out = file(group, "output/a.csv", FileType::Output);
        out.withdrawn_at = Some(Utc::now());
        out.withdrawn_in_turn = Some(2);
        check_submit_review("bob", 2, &[out], &[], &[]).unwrap();
    }

    #[test]
    fn return_gate_requires_public_comment_on_flagged_groups() {
        let group = GroupId::new();
        let out = file(group, "output/a.csv", FileType::Output);
        let mut decisions = HashMap::new();
        decisions.insert(out.id, FileDecision::ChangesRequested);

        let private_only = vec![comment(group, "bob", 2, Visibility::Private)];
        assert!(check_return(2, &[out.clone()], &decisions, &private_only).is_err());

        let public = vec![comment(group, "carol", 2, Visibility::Public)];
        check_return(2, &[out.clone()], &decisions, &public).unwrap();

        // Approved groups need nothing.
        decisions.insert(out.id, FileDecision::Approved);
        check_return(2, &[out], &decisions, &[]).unwrap();
    }

    #[test]
    fn release_gate_needs_all_outputs_approved() {
        let group = GroupId::new();
        let a = file(group, "output/a.csv", FileType::Output);
        let b = file(group, "output/b.csv", FileType::Output);
        let mut decisions = HashMap::new();
        decisions.insert(a.id, FileDecision::Approved);
        decisions.insert(b.id, FileDecision::Conflicted);
        assert!(check_release(&[a.clone(), b.clone()], &decisions).is_err());

        decisions.insert(b.id, FileDecision::Approved);
        check_release(&[a, b], &decisions).unwrap();
    }

    #[test]
    fn submit_gate_needs_an_output_and_complete_groups() {
        let group = FileGroup {
            id: GroupId::new(),
            request_id: RequestId::new(),
            name: "g1".to_string(),
            context: String::new(),
            controls: String::new(),
            created_at: Utc::now(),
        };
        let supp = file(group.id, "notes.txt", FileType::Supporting);
        // Supporting-only requests cannot be submitted.
        assert!(check_submit(&[supp.clone()], &[group.clone()]).is_err());

        let out = file(group.id, "output/a.csv", FileType::Output);
        // Incomplete group blocks submission.
        assert!(check_submit(&[out.clone(), supp.clone()], &[group.clone()]).is_err());

        let complete = FileGroup {
            context: "counts".to_string(),
            controls: "rounded to 5".to_string(),
            ..group
        };
        check_submit(&[out, supp], &[complete]).unwrap();
    }

    #[test]
    fn supporting_only_groups_do_not_need_completion() {
        let done = FileGroup {
            id: GroupId::new(),
            request_id: RequestId::new(),
            name: "g1".to_string(),
            context: "counts".to_string(),
            controls: "rounded".to_string(),
            created_at: Utc::now(),
        };
        let bare = FileGroup {
            id: GroupId::new(),
            request_id: RequestId::new(),
            name: "g2".to_string(),
            context: String::new(),
            controls: String::new(),
            created_at: Utc::now(),
        };
        let out = file(done.id, "output/a.csv", FileType::Output);
        let supp = file(bare.id, "notes.txt", FileType::Supporting);
        check_submit(&[out, supp], &[done, bare]).unwrap();
    }

    mod blinding {
        use super::*;

        fn request_in(status: RequestStatus, turn: i64) -> ReleaseRequest {
            let mut r = ReleaseRequest::new("ws1", "alice");
            r.status = status;
            r.review_turn = turn;
            r
        }

        #[test]
        fn reviewers_see_only_their_own_current_turn_votes() {
            let r = request_in(RequestStatus::Submitted, 2);
            let bob = Principal::new("bob").as_output_checker();
            let own = vote(FileId::new(), "bob", 2, VoteChoice::Approve);
            let other = vote(FileId::new(), "carol", 2, VoteChoice::Approve);
            assert!(vote_visible(&own, &bob, &r));
            assert!(!vote_visible(&other, &bob, &r));
        }

        #[test]
        fn all_votes_open_up_once_reviewed() {
            let r = request_in(RequestStatus::Reviewed, 2);
            let bob = Principal::new("bob").as_output_checker();
            let other = vote(FileId::new(), "carol", 2, VoteChoice::Approve);
            assert!(vote_visible(&other, &bob, &r));
        }

        #[test]
        fn authors_never_see_votes() {
            let r = request_in(RequestStatus::Reviewed, 2);
            let alice = Principal::new("alice").as_output_checker();
            let v = vote(FileId::new(), "carol", 2, VoteChoice::Approve);
            assert!(!vote_visible(&v, &alice, &r));
        }

        #[test]
        fn author_sees_private_comments_only_after_return() {
            let group = GroupId::new();
            let alice = Principal::new("alice");
            let private = comment(group, "carol", 2, Visibility::Private);

            let reviewing = request_in(RequestStatus::Reviewed, 2);
            assert!(!comment_visible(&private, &alice, &reviewing));

            let returned = request_in(RequestStatus::Returned, 3);
            assert!(comment_visible(&private, &alice, &returned));
        }

        #[test]
        fn author_sees_public_comments_immediately() {
            let group = GroupId::new();
            let alice = Principal::new("alice");
            let public = comment(group, "carol", 2, Visibility::Public);
            let reviewing = request_in(RequestStatus::Reviewed, 2);
            assert!(comment_visible(&public, &alice, &reviewing));
        }

        #[test]
        fn reviewer_comments_blind_during_independent_review() {
            let group = GroupId::new();
            let r = request_in(RequestStatus::PartiallyReviewed, 2);
            let bob = Principal::new("bob").as_output_checker();
            let own = comment(group, "bob", 2, Visibility::Private);
            let other = comment(group, "carol", 2, Visibility::Private);
            let earlier = comment(group, "carol", 1, Visibility::Public);
            assert!(comment_visible(&own, &bob, &r));
            assert!(!comment_visible(&other, &bob, &r));
            assert!(comment_visible(&earlier, &bob, &r));
        }
    }
}
