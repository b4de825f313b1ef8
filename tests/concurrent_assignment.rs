//! Concurrency tests for the SQLite store.
//!
//! Mutating operations take a lock scope as their first statement, so
//! concurrent reassignments of the same pull request serialize instead of
//! racing their read-then-write sequences.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::{Duration, Instant};

use review_assign::db;
use review_assign::db::pool::DEFAULT_BUSY_TIMEOUT;
use review_assign::error::ReviewError;
use review_assign::models::PullRequest;
use review_assign::services::assignment::{
    AssignmentEngine, CreatePullRequestInput, NewTeamMember, ReassignInput,
};
use review_assign::services::Selector;
use review_assign::store::{LockScope, ReviewStore, SqliteStore, StoreTx};
use tempfile::{tempdir, TempDir};
use tokio_util::sync::CancellationToken;

async fn setup(team_size: usize) -> (Arc<AssignmentEngine>, Arc<SqliteStore>, TempDir) {
    let dir = tempdir().unwrap();
    let url = format!("sqlite:{}", dir.path().join("review.db").display());
    let pool = db::initialize_with(&url, 8, DEFAULT_BUSY_TIMEOUT).await.unwrap();

    let store = Arc::new(SqliteStore::new(pool));
    let engine = AssignmentEngine::new(store.clone(), Selector::default());

    let members: Vec<NewTeamMember> = (0..team_size)
        .map(|i| NewTeamMember {
            user_id: format!("u{}", i),
            username: format!("user{}", i),
            is_active: true,
        })
        .collect();
    engine
        .create_team(&CancellationToken::new(), "backend", &members)
        .await
        .unwrap();

    (Arc::new(engine), store, dir)
}

async fn read_pr(store: &SqliteStore, id: &str) -> Option<PullRequest> {
    let mut tx = store.begin().await.unwrap();
    let pr = tx.get_pull_request(id).await.unwrap();
    tx.rollback().await.unwrap();
    pr
}

fn pr_input(id: &str, author: &str) -> CreatePullRequestInput {
    CreatePullRequestInput {
        id: id.into(),
        name: "blocked".into(),
        author_id: author.into(),
    }
}

/// Test: two reassignments of the same reviewer
///
/// Exactly one wins; the other sees the reviewer already gone.
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reassign_same_reviewer() {
    let (engine, store, _dir) = setup(6).await;
    let cancel = CancellationToken::new();

    let pr = engine
        .create_pull_request(
            &cancel,
            &CreatePullRequestInput {
                id: "pr1".into(),
                name: "race".into(),
                author_id: "u0".into(),
            },
        )
        .await
        .unwrap();
    let target = pr.assigned_reviewers[0].clone();

    let mut handles = Vec::new();
    for _ in 0..2 {
        let engine = engine.clone();
        let input = ReassignInput {
            pull_request_id: "pr1".into(),
            old_reviewer_id: target.clone(),
        };
        handles.push(tokio::spawn(async move {
            engine
                .reassign_reviewer(&CancellationToken::new(), &input)
                .await
        }));
    }

    let mut wins = 0;
    let mut not_assigned = 0;
    for handle in handles {
        match handle.await.unwrap() {
            Ok(_) => wins += 1,
            Err(ReviewError::ReviewerNotAssigned) => not_assigned += 1,
            Err(e) => panic!("unexpected error: {}", e),
        }
    }
    assert_eq!(wins, 1);
    assert_eq!(not_assigned, 1);

    let pr = read_pr(&store, "pr1").await.unwrap();
    assert_eq!(pr.assigned_reviewers.len(), 2);
    assert!(!pr.has_reviewer(&target));
    assert!(!pr.has_reviewer("u0"));
}

/// Test: parallel reassignments of both reviewers never duplicate
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_reassign_both_reviewers() {
    let (engine, store, _dir) = setup(4).await;
    let cancel = CancellationToken::new();

    let pr = engine
        .create_pull_request(
            &cancel,
            &CreatePullRequestInput {
                id: "pr1".into(),
                name: "race".into(),
                author_id: "u0".into(),
            },
        )
        .await
        .unwrap();

    // u0 authors; three teammates, two assigned. Whichever reassignment
    // runs second sees the first one's result, so both find a candidate.
    let mut handles = Vec::new();
    for old in pr.assigned_reviewers.clone() {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let input = ReassignInput {
                pull_request_id: "pr1".into(),
                old_reviewer_id: old,
            };
            engine
                .reassign_reviewer(&CancellationToken::new(), &input)
                .await
        }));
    }

    for handle in handles {
        let result = handle.await.unwrap().unwrap();
        assert_eq!(result.pull_request.assigned_reviewers.len(), 2);
    }

    let pr = read_pr(&store, "pr1").await.unwrap();
    let unique: HashSet<&String> = pr.assigned_reviewers.iter().collect();
    assert_eq!(unique.len(), 2);
    assert!(!pr.has_reviewer("u0"));
}

/// Test: many pull requests created in parallel all commit
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_parallel_creations() {
    let (engine, _store, _dir) = setup(5).await;

    let mut handles = Vec::new();
    for i in 0..20 {
        let engine = engine.clone();
        handles.push(tokio::spawn(async move {
            let input = CreatePullRequestInput {
                id: format!("pr-{}", i),
                name: format!("change {}", i),
                author_id: format!("u{}", i % 5),
            };
            engine
                .create_pull_request(&CancellationToken::new(), &input)
                .await
        }));
    }

    for handle in handles {
        let pr = handle.await.unwrap().unwrap();
        assert_eq!(pr.assigned_reviewers.len(), 2);
        assert!(!pr.has_reviewer(&pr.author_id));
    }
}

/// Test: a held lock scope blocks writers until released
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_lock_scope_serializes_writers() {
    let (engine, store, _dir) = setup(3).await;

    let mut held = store.begin().await.unwrap();
    held.lock(LockScope::Team("backend")).await.unwrap();

    let pending = {
        let engine = engine.clone();
        tokio::spawn(async move {
            engine
                .set_user_active(&CancellationToken::new(), "u1", false)
                .await
        })
    };

    tokio::time::sleep(std::time::Duration::from_millis(200)).await;
    assert!(!pending.is_finished());

    held.commit().await.unwrap();

    let user = pending.await.unwrap().unwrap();
    assert!(!user.is_active);
}

/// Test: the operation deadline holds while waiting on the write lock
///
/// Scenario:
/// 1. Another transaction holds the write lock
/// 2. A create with a 200ms deadline fails with DeadlineExceeded long
///    before the 30s busy timeout
/// 3. Once the lock is released nothing of the create is visible and the
///    same id can be created
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_deadline_bounds_wait_on_write_lock() {
    let (engine, store, _dir) = setup(3).await;
    let hasty = AssignmentEngine::new(store.clone(), Selector::default())
        .with_deadline(Duration::from_millis(200));

    let mut held = store.begin().await.unwrap();
    held.lock(LockScope::Team("backend")).await.unwrap();

    let started = Instant::now();
    let err = hasty
        .create_pull_request(&CancellationToken::new(), &pr_input("pr1", "u0"))
        .await
        .unwrap_err();
    assert!(matches!(err, ReviewError::DeadlineExceeded));
    assert!(started.elapsed() < Duration::from_secs(5));

    held.commit().await.unwrap();

    assert!(read_pr(&store, "pr1").await.is_none());
    let pr = engine
        .create_pull_request(&CancellationToken::new(), &pr_input("pr1", "u0"))
        .await
        .unwrap();
    assert_eq!(pr.assigned_reviewers.len(), 2);
}

/// Test: cancelling an operation blocked inside its transaction
///
/// Scenario:
/// 1. Another transaction holds the write lock
/// 2. A deactivation starts, blocks, and its token is cancelled
/// 3. It returns Cancelled promptly and leaves every member active
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancel_mid_transaction_leaves_no_trace() {
    let (engine, store, _dir) = setup(3).await;
    engine
        .create_pull_request(&CancellationToken::new(), &pr_input("pr1", "u0"))
        .await
        .unwrap();

    let mut held = store.begin().await.unwrap();
    held.lock(LockScope::PullRequest("other")).await.unwrap();

    let cancel = CancellationToken::new();
    let pending = {
        let engine = engine.clone();
        let cancel = cancel.clone();
        tokio::spawn(async move {
            engine
                .deactivate_team_members(&cancel, "backend", &["u1".to_string()])
                .await
        })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!pending.is_finished());

    let started = Instant::now();
    cancel.cancel();
    let err = pending.await.unwrap().unwrap_err();
    assert!(matches!(err, ReviewError::Cancelled));
    assert!(started.elapsed() < Duration::from_secs(5));

    held.commit().await.unwrap();

    let team = engine
        .get_team(&CancellationToken::new(), "backend")
        .await
        .unwrap();
    assert!(team.members.iter().all(|m| m.is_active));
    let pr = read_pr(&store, "pr1").await.unwrap();
    assert!(pr.has_reviewer("u1"));
}
