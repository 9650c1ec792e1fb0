//! Upload scheduler scenarios: retries, permanent failures, re-release,
//! and crash recovery.

mod common;

use airlock_core::controller::AddFileSpec;
use airlock_core::store;
use airlock_core::upload::{UploadFailure, UploadOutcome};
use airlock_model::{EventKind, FileType, JobState, RequestStatus, VoteChoice};
use chrono::Utc;

use common::{Harness, rel};

/// Drive a two-output request all the way to APPROVED.
async fn approved_request(h: &Harness) -> airlock_model::RequestId {
    h.write_workspace_file("ws1", "output/a.csv", b"id,count\n1,5\n")
        .await;
    h.write_workspace_file("ws1", "output/b.csv", b"id,count\n2,10\n")
        .await;

    let alice = h.author("alice", "ws1");
    let bob = h.checker("bob");
    let carol = h.checker("carol");

    let request = h.controller.create_request(&alice, "ws1").await.unwrap();
    h.controller
        .add_files(
            &alice,
            request.id,
            vec![
                AddFileSpec {
                    relpath: rel("output/a.csv"),
                    filetype: FileType::Output,
                    group: "g1".to_string(),
                },
                AddFileSpec {
                    relpath: rel("output/b.csv"),
                    filetype: FileType::Output,
                    group: "g1".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    h.controller
        .edit_group(
            &alice,
            request.id,
            "g1",
            Some("counts".to_string()),
            Some("rounded to 5".to_string()),
        )
        .await
        .unwrap();
    h.controller.submit(&alice, request.id).await.unwrap();

    for reviewer in [&bob, &carol] {
        for path in ["output/a.csv", "output/b.csv"] {
            h.controller
                .vote(reviewer, request.id, &rel(path), VoteChoice::Approve)
                .await
                .unwrap();
        }
        h.controller.submit_review(reviewer, request.id).await.unwrap();
    }

    let status = h
        .controller
        .release_files(&carol, request.id)
        .await
        .unwrap();
    assert_eq!(status, RequestStatus::Approved);
    request.id
}

async fn request_status(h: &Harness, id: airlock_model::RequestId) -> RequestStatus {
    let mut conn = h.store.pool().acquire().await.unwrap();
    store::requests::get(&mut *conn, id).await.unwrap().status
}

#[tokio::test]
async fn s5_transient_failure_then_success() {
    let h = Harness::new().await;
    // First attempt on one of the files bounces off a 503.
    h.jobs
        .script_upload(Err(UploadFailure::Transient("upstream returned 503".into())));

    let id = approved_request(&h).await;
    h.drain_uploads().await;
    h.drain_events().await;

    assert_eq!(request_status(&h, id).await, RequestStatus::Released);

    let mut conn = h.store.pool().acquire().await.unwrap();
    let jobs = store::uploads::list_for_request(&mut *conn, id).await.unwrap();
    assert_eq!(jobs.len(), 2);
    assert!(jobs.iter().all(|j| j.state == JobState::Succeeded));
    // One of the two jobs needed a second attempt.
    assert!(jobs.iter().any(|j| j.attempts == 1));

    // Exactly one released event despite two completing jobs.
    assert_eq!(h.sink.count_of(EventKind::Released), 1);
}

#[tokio::test]
async fn already_uploaded_counts_as_success() {
    let h = Harness::new().await;
    h.jobs.script_upload(Ok(UploadOutcome::AlreadyUploaded));

    let id = approved_request(&h).await;
    h.drain_uploads().await;

    assert_eq!(request_status(&h, id).await, RequestStatus::Released);
}

#[tokio::test]
async fn s6_permanent_failure_keeps_request_approved() {
    let h = Harness::new().await;
    h.jobs
        .script_upload(Err(UploadFailure::Permanent("upstream returned 400".into())));

    let id = approved_request(&h).await;
    h.drain_uploads().await;
    h.drain_events().await;

    // One file failed permanently; the request cannot move on.
    assert_eq!(request_status(&h, id).await, RequestStatus::Approved);
    let mut conn = h.store.pool().acquire().await.unwrap();
    let jobs = store::uploads::list_for_request(&mut *conn, id).await.unwrap();
    let failed: Vec<_> = jobs.iter().filter(|j| j.state == JobState::Failed).collect();
    assert_eq!(failed.len(), 1);
    // Permanent failures burn exactly one attempt.
    assert_eq!(failed[0].attempts, 0);
    assert_eq!(h.sink.count_of(EventKind::UploadFailed), 1);
    drop(conn);

    // Re-release revives the failed job; this time the upstream accepts.
    let carol = h.checker("carol");
    let revived = h.controller.re_release(&carol, id).await.unwrap();
    assert_eq!(revived, 1);
    h.drain_uploads().await;
    h.drain_events().await;

    assert_eq!(request_status(&h, id).await, RequestStatus::Released);
    assert_eq!(h.sink.count_of(EventKind::Released), 1);
}

#[tokio::test]
async fn transient_failures_exhaust_attempts() {
    let h = Harness::new().await;
    // More transient failures than max_attempts (5) for both files.
    for _ in 0..12 {
        h.jobs
            .script_upload(Err(UploadFailure::Transient("upstream returned 502".into())));
    }

    let id = approved_request(&h).await;
    h.drain_uploads().await;
    h.drain_events().await;

    assert_eq!(request_status(&h, id).await, RequestStatus::Approved);
    let mut conn = h.store.pool().acquire().await.unwrap();
    let jobs = store::uploads::list_for_request(&mut *conn, id).await.unwrap();
    assert!(jobs.iter().all(|j| j.state == JobState::Failed));
    assert_eq!(h.sink.count_of(EventKind::UploadFailed), 2);
    assert_eq!(h.sink.count_of(EventKind::Released), 0);
}

#[tokio::test]
async fn in_flight_jobs_recover_on_startup() {
    let h = Harness::new().await;
    let id = approved_request(&h).await;

    // Simulate a crash: claim a job so it sits in_flight, then recover.
    let mut conn = h.store.pool().acquire().await.unwrap();
    let claimed = store::uploads::claim_next_due(&mut *conn, Utc::now())
        .await
        .unwrap()
        .expect("a due job to claim");
    assert_eq!(claimed.state, JobState::InFlight);
    drop(conn);

    let revived = h.scheduler.recover().await.unwrap();
    assert_eq!(revived, 1);

    h.drain_uploads().await;
    assert_eq!(request_status(&h, id).await, RequestStatus::Released);
}

#[tokio::test]
async fn expired_job_deadline_fails_without_attempting() {
    let h = Harness::new().await;
    let id = approved_request(&h).await;

    // Force both jobs past their deadline.
    let mut conn = h.store.pool().acquire().await.unwrap();
    sqlx::query("UPDATE upload_jobs SET deadline_at = ?1 WHERE request_id = ?2")
        .bind(Utc::now() - chrono::Duration::hours(2))
        .bind(id.to_string())
        .execute(&mut *conn)
        .await
        .unwrap();
    drop(conn);

    h.drain_uploads().await;

    assert_eq!(request_status(&h, id).await, RequestStatus::Approved);
    let mut conn = h.store.pool().acquire().await.unwrap();
    let jobs = store::uploads::list_for_request(&mut *conn, id).await.unwrap();
    assert!(jobs.iter().all(|j| j.state == JobState::Failed));
    // Nothing reached the upstream.
    assert!(h.jobs.uploaded_files().is_empty());
}

#[tokio::test]
async fn supporting_files_are_never_scheduled() {
    let h = Harness::new().await;
    h.write_workspace_file("ws1", "output/a.csv", b"id\n1\n").await;
    h.write_workspace_file("ws1", "notes.txt", b"context notes").await;

    let alice = h.author("alice", "ws1");
    let bob = h.checker("bob");
    let carol = h.checker("carol");

    let request = h.controller.create_request(&alice, "ws1").await.unwrap();
    h.controller
        .add_files(
            &alice,
            request.id,
            vec![
                AddFileSpec {
                    relpath: rel("output/a.csv"),
                    filetype: FileType::Output,
                    group: "g1".to_string(),
                },
                AddFileSpec {
                    relpath: rel("notes.txt"),
                    filetype: FileType::Supporting,
                    group: "g1".to_string(),
                },
            ],
        )
        .await
        .unwrap();
    h.controller
        .edit_group(
            &alice,
            request.id,
            "g1",
            Some("counts".to_string()),
            Some("rounded".to_string()),
        )
        .await
        .unwrap();
    h.controller.submit(&alice, request.id).await.unwrap();
    for reviewer in [&bob, &carol] {
        h.controller
            .vote(reviewer, request.id, &rel("output/a.csv"), VoteChoice::Approve)
            .await
            .unwrap();
        h.controller.submit_review(reviewer, request.id).await.unwrap();
    }
    h.controller.release_files(&carol, request.id).await.unwrap();

    let mut conn = h.store.pool().acquire().await.unwrap();
    let jobs = store::uploads::list_for_request(&mut *conn, request.id)
        .await
        .unwrap();
    assert_eq!(jobs.len(), 1);
    assert_eq!(jobs[0].relpath.as_str(), "output/a.csv");
    drop(conn);

    h.drain_uploads().await;
    assert_eq!(request_status(&h, request.id).await, RequestStatus::Released);
}

#[tokio::test]
async fn release_is_created_upstream_exactly_once() {
    // Two files upload concurrently but the request gets a single release
    // handle, created against its own workspace.
    let h = Harness::new().await;
    let id = approved_request(&h).await;
    h.drain_uploads().await;

    assert_eq!(h.jobs.release_calls(), 1);
    let mut conn = h.store.pool().acquire().await.unwrap();
    let request = store::requests::get(&mut *conn, id).await.unwrap();
    assert!(
        request
            .jobs_release_url
            .as_deref()
            .unwrap()
            .contains("/releases/ws1/")
    );
}
