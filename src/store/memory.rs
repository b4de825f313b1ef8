//! In-memory implementation of `ReviewStore`.
//!
//! All state lives behind a single `tokio::sync::Mutex`. A transaction owns
//! the guard from `begin` until it finishes and works on a copy of the
//! state; the copy replaces the shared state only on commit. Transactions
//! are therefore fully serialized and [`StoreTx::lock`] is a no-op.
//!
//! Used as the fake store in engine tests. All state is lost on drop.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{Mutex, OwnedMutexGuard};

use super::{LockScope, ReviewStore, StoreError, StoreTx};
use crate::models::{PullRequest, PullRequestShort, PullRequestStatus, TeamMember, User};

#[derive(Debug, Clone)]
struct StoredPullRequest {
    name: String,
    author_id: String,
    status: PullRequestStatus,
    created_at: i64,
    merged_at: Option<i64>,
}

#[derive(Debug, Clone, Default)]
struct MemoryState {
    teams: BTreeSet<String>,
    users: BTreeMap<String, User>,
    pull_requests: BTreeMap<String, StoredPullRequest>,
    /// (pull request id, reviewer id) pairs.
    reviewers: BTreeSet<(String, String)>,
}

/// In-memory store.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ReviewStore for MemoryStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let guard = self.state.clone().lock_owned().await;
        let working = guard.clone();
        Ok(Box::new(MemoryTx { guard, working }))
    }
}

struct MemoryTx {
    guard: OwnedMutexGuard<MemoryState>,
    working: MemoryState,
}

impl MemoryTx {
    fn reviewers_of_pr(&self, pr_id: &str) -> Vec<String> {
        self.working
            .reviewers
            .iter()
            .filter(|(pr, _)| pr == pr_id)
            .map(|(_, reviewer)| reviewer.clone())
            .collect()
    }

    fn prs_reviewed_by<'a>(&'a self, user_id: &'a str) -> impl Iterator<Item = &'a String> + 'a {
        self.working
            .reviewers
            .iter()
            .filter(move |(_, reviewer)| reviewer == user_id)
            .map(|(pr, _)| pr)
    }
}

#[async_trait]
impl StoreTx for MemoryTx {
    async fn lock(&mut self, _scope: LockScope<'_>) -> Result<(), StoreError> {
        Ok(())
    }

    async fn team_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        Ok(self.working.teams.contains(name))
    }

    async fn insert_team(&mut self, name: &str) -> Result<(), StoreError> {
        if !self.working.teams.insert(name.to_string()) {
            return Err(StoreError::UniqueViolation("teams.name".into()));
        }
        Ok(())
    }

    async fn team_members(&mut self, name: &str) -> Result<Vec<TeamMember>, StoreError> {
        let mut members: Vec<TeamMember> = self
            .working
            .users
            .values()
            .filter(|u| u.is_member_of(name))
            .map(|u| TeamMember {
                user_id: u.id.clone(),
                username: u.username.clone(),
                is_active: u.is_active,
            })
            .collect();
        members.sort_by(|a, b| {
            a.username
                .cmp(&b.username)
                .then_with(|| a.user_id.cmp(&b.user_id))
        });
        Ok(members)
    }

    async fn upsert_user(&mut self, user: &User) -> Result<(), StoreError> {
        if !user.team_name.is_empty() && !self.working.teams.contains(&user.team_name) {
            return Err(StoreError::Database(format!(
                "foreign key violation: team {} does not exist",
                user.team_name
            )));
        }
        self.working.users.insert(user.id.clone(), user.clone());
        Ok(())
    }

    async fn get_user(&mut self, id: &str) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get(id).cloned())
    }

    async fn set_user_active(
        &mut self,
        id: &str,
        active: bool,
    ) -> Result<Option<User>, StoreError> {
        Ok(self.working.users.get_mut(id).map(|user| {
            user.is_active = active;
            user.clone()
        }))
    }

    async fn active_member_ids(&mut self, team_name: &str) -> Result<Vec<String>, StoreError> {
        Ok(self
            .working
            .users
            .values()
            .filter(|u| u.is_active && u.is_member_of(team_name))
            .map(|u| u.id.clone())
            .collect())
    }

    async fn insert_pull_request(
        &mut self,
        id: &str,
        name: &str,
        author_id: &str,
        created_at: i64,
    ) -> Result<(), StoreError> {
        if self.working.pull_requests.contains_key(id) {
            return Err(StoreError::UniqueViolation("pull_requests.id".into()));
        }
        self.working.pull_requests.insert(
            id.to_string(),
            StoredPullRequest {
                name: name.to_string(),
                author_id: author_id.to_string(),
                status: PullRequestStatus::Open,
                created_at,
                merged_at: None,
            },
        );
        Ok(())
    }

    async fn get_pull_request(&mut self, id: &str) -> Result<Option<PullRequest>, StoreError> {
        let Some(stored) = self.working.pull_requests.get(id) else {
            return Ok(None);
        };
        Ok(Some(PullRequest {
            id: id.to_string(),
            name: stored.name.clone(),
            author_id: stored.author_id.clone(),
            status: stored.status,
            assigned_reviewers: self.reviewers_of_pr(id),
            created_at: stored.created_at,
            merged_at: stored.merged_at,
        }))
    }

    async fn mark_merged(&mut self, id: &str, merged_at: i64) -> Result<u64, StoreError> {
        let Some(stored) = self.working.pull_requests.get_mut(id) else {
            return Ok(0);
        };
        stored.status = PullRequestStatus::Merged;
        stored.merged_at.get_or_insert(merged_at);
        Ok(1)
    }

    async fn list_reviewers(&mut self, pr_id: &str) -> Result<Vec<String>, StoreError> {
        Ok(self.reviewers_of_pr(pr_id))
    }

    async fn add_reviewer(&mut self, pr_id: &str, reviewer_id: &str) -> Result<(), StoreError> {
        if !self.working.pull_requests.contains_key(pr_id)
            || !self.working.users.contains_key(reviewer_id)
        {
            return Err(StoreError::Database(
                "foreign key violation: unknown pull request or reviewer".into(),
            ));
        }
        let pair = (pr_id.to_string(), reviewer_id.to_string());
        if !self.working.reviewers.insert(pair) {
            return Err(StoreError::UniqueViolation(
                "pull_request_reviewers.pull_request_id, pull_request_reviewers.reviewer_id"
                    .into(),
            ));
        }
        Ok(())
    }

    async fn remove_reviewer(&mut self, pr_id: &str, reviewer_id: &str) -> Result<(), StoreError> {
        self.working
            .reviewers
            .remove(&(pr_id.to_string(), reviewer_id.to_string()));
        Ok(())
    }

    async fn open_reviews_of(&mut self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let prs = &self.working.pull_requests;
        let mut ids: Vec<String> = self
            .prs_reviewed_by(user_id)
            .filter(|pr_id| {
                prs.get(*pr_id)
                    .is_some_and(|pr| pr.status == PullRequestStatus::Open)
            })
            .cloned()
            .collect();
        ids.sort();
        Ok(ids)
    }

    async fn reviews_of(&mut self, user_id: &str) -> Result<Vec<PullRequestShort>, StoreError> {
        let prs = &self.working.pull_requests;
        let mut reviews: Vec<PullRequestShort> = self
            .prs_reviewed_by(user_id)
            .filter_map(|pr_id| {
                prs.get(pr_id).map(|pr| PullRequestShort {
                    id: pr_id.clone(),
                    name: pr.name.clone(),
                    author_id: pr.author_id.clone(),
                    status: pr.status.to_string(),
                    created_at: pr.created_at,
                })
            })
            .collect();
        reviews.sort_by(|a, b| b.created_at.cmp(&a.created_at).then_with(|| a.id.cmp(&b.id)));
        Ok(reviews)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let MemoryTx { mut guard, working } = *self;
        *guard = working;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        Ok(())
    }
}
