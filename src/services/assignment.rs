//! Reviewer assignment engine.
//!
//! Every public operation runs as one store transaction:
//! begin → lock → checks → writes → commit. Domain errors, storage errors,
//! cancellation and deadline expiry all roll the transaction back before
//! the error is returned, so callers never observe partial state.
//!
//! Identifiers are trimmed on the way in, so `"backend "` and `"backend"`
//! name the same team.

use std::collections::HashSet;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::error::ReviewError;
use crate::models::{PullRequest, PullRequestShort, ReassignmentChange, Team, User};
use crate::services::selector::{Selector, DEFAULT_REVIEWER_LIMIT};
use crate::store::{LockScope, ReviewStore, StoreError, StoreTx};

/// Member entry of a new team.
#[derive(Debug, Clone)]
pub struct NewTeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

/// Input for creating a pull request.
#[derive(Debug, Clone)]
pub struct CreatePullRequestInput {
    pub id: String,
    pub name: String,
    pub author_id: String,
}

/// Input for replacing one reviewer.
#[derive(Debug, Clone)]
pub struct ReassignInput {
    pub pull_request_id: String,
    pub old_reviewer_id: String,
}

/// Outcome of a single-reviewer reassignment.
#[derive(Debug, Clone)]
pub struct ReassignResult {
    pub pull_request: PullRequest,
    /// The reviewer who took over.
    pub replaced_by: String,
}

/// Outcome of a bulk deactivation.
#[derive(Debug, Clone)]
pub struct BulkDeactivateResult {
    /// Roster after the deactivation.
    pub team: Team,
    pub deactivated_users: Vec<String>,
    /// One record per reviewer slot touched, in processing order.
    pub reassignments: Vec<ReassignmentChange>,
}

/// Orchestrates reviewer selection over a [`ReviewStore`].
#[derive(Clone)]
pub struct AssignmentEngine {
    store: Arc<dyn ReviewStore>,
    selector: Selector,
    deadline: Option<Duration>,
}

/// Transaction handed back by [`AssignmentEngine::guarded`] together with
/// the outcome of the work done inside it.
type Staged<T> = (Box<dyn StoreTx>, Result<T, ReviewError>);

/// Get the current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

fn unique_violation_as(err: StoreError, domain: ReviewError) -> ReviewError {
    match err {
        StoreError::UniqueViolation(_) => domain,
        other => other.into(),
    }
}

/// Trim, drop blanks and deduplicate ids, keeping first occurrences.
fn normalize_ids(ids: &[String]) -> Vec<String> {
    let mut seen = HashSet::new();
    ids.iter()
        .map(|id| id.trim())
        .filter(|id| !id.is_empty())
        .filter(|id| seen.insert(*id))
        .map(str::to_string)
        .collect()
}

impl AssignmentEngine {
    pub fn new(store: Arc<dyn ReviewStore>, selector: Selector) -> Self {
        Self {
            store,
            selector,
            deadline: None,
        }
    }

    /// Roll back any operation that runs longer than `deadline`.
    pub fn with_deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }

    // ── Transaction plumbing ─────────────────────────────────────────────

    /// Race `work` against cancellation and the deadline.
    ///
    /// `work` begins its own transaction, so waiting for the store counts
    /// against the deadline too. When cancellation or the deadline wins,
    /// `work` is dropped together with its transaction, which rolls back on
    /// drop without waiting for the statement in flight.
    async fn guarded<T>(
        &self,
        cancel: &CancellationToken,
        work: impl Future<Output = Result<Staged<T>, ReviewError>>,
    ) -> Result<Staged<T>, ReviewError> {
        let deadline = self.deadline;
        let expired = async move {
            match deadline {
                Some(limit) => tokio::time::sleep(limit).await,
                None => std::future::pending::<()>().await,
            }
        };

        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                log::warn!("[assign] Operation cancelled, rolling back");
                Err(ReviewError::Cancelled)
            }
            _ = expired => {
                log::warn!(
                    "[assign] Operation exceeded its {:?} deadline, rolling back",
                    deadline.unwrap_or_default()
                );
                Err(ReviewError::DeadlineExceeded)
            }
            staged = work => staged,
        }
    }

    /// Commit on success, roll back on any error.
    async fn settle<T>(&self, (tx, outcome): Staged<T>) -> Result<T, ReviewError> {
        match outcome {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(err) => {
                if !err.is_domain() {
                    log::warn!("[assign] Rolling back: {}", err);
                }
                if let Err(rollback_err) = tx.rollback().await {
                    log::error!("[assign] Rollback failed after {}: {}", err, rollback_err);
                }
                Err(err)
            }
        }
    }

    // ── Teams and users ──────────────────────────────────────────────────

    /// Create a team and upsert its members.
    pub async fn create_team(
        &self,
        cancel: &CancellationToken,
        team_name: &str,
        members: &[NewTeamMember],
    ) -> Result<Team, ReviewError> {
        let team_name = team_name.trim();
        if team_name.is_empty() {
            return Err(ReviewError::invalid_input_field(
                "team name must not be empty",
                "team_name",
            ));
        }

        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = create_team_in(tx.as_mut(), team_name, members).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        let team = self.settle(staged).await?;

        log::info!(
            "[assign] Created team {} with {} members",
            team.name,
            team.members.len()
        );
        Ok(team)
    }

    pub async fn get_team(
        &self,
        cancel: &CancellationToken,
        team_name: &str,
    ) -> Result<Team, ReviewError> {
        let team_name = team_name.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = load_team(tx.as_mut(), team_name).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        self.settle(staged).await
    }

    /// Flip a user's activity flag. Does not touch review assignments.
    pub async fn set_user_active(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
        active: bool,
    ) -> Result<User, ReviewError> {
        let user_id = user_id.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = set_active_in(tx.as_mut(), user_id, active).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        self.settle(staged).await
    }

    /// Pull requests the user reviews, newest first.
    pub async fn get_user_reviews(
        &self,
        cancel: &CancellationToken,
        user_id: &str,
    ) -> Result<Vec<PullRequestShort>, ReviewError> {
        let user_id = user_id.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = reviews_in(tx.as_mut(), user_id).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        self.settle(staged).await
    }

    // ── Pull requests ────────────────────────────────────────────────────

    /// Create an OPEN pull request and assign up to two reviewers from the
    /// author's team.
    pub async fn create_pull_request(
        &self,
        cancel: &CancellationToken,
        input: &CreatePullRequestInput,
    ) -> Result<PullRequest, ReviewError> {
        let pr_id = input.id.trim();
        let author_id = input.author_id.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = self
                    .create_pull_request_in(tx.as_mut(), pr_id, &input.name, author_id)
                    .await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        let pr = self.settle(staged).await?;

        log::info!(
            "[assign] Created pull request {} with reviewers {:?}",
            pr.id,
            pr.assigned_reviewers
        );
        Ok(pr)
    }

    async fn create_pull_request_in(
        &self,
        tx: &mut dyn StoreTx,
        pr_id: &str,
        name: &str,
        author_id: &str,
    ) -> Result<PullRequest, ReviewError> {
        tx.lock(LockScope::PullRequest(pr_id)).await?;

        let author = tx
            .get_user(author_id)
            .await?
            .ok_or(ReviewError::UserNotFound)?;

        tx.insert_pull_request(pr_id, name, &author.id, now())
            .await
            .map_err(|e| unique_violation_as(e, ReviewError::PullRequestExists))?;

        let reviewers = self
            .selector
            .pick_initial_reviewers(tx, &author.team_name, &author.id, DEFAULT_REVIEWER_LIMIT)
            .await?;

        for reviewer in &reviewers {
            tx.add_reviewer(pr_id, reviewer).await?;
        }

        tx.get_pull_request(pr_id)
            .await?
            .ok_or(ReviewError::PullRequestNotFound)
    }

    /// Mark a pull request merged. Idempotent: the first merge timestamp is
    /// kept. Reviewer assignments stay as historical record.
    pub async fn merge_pull_request(
        &self,
        cancel: &CancellationToken,
        pr_id: &str,
    ) -> Result<PullRequest, ReviewError> {
        let pr_id = pr_id.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = merge_in(tx.as_mut(), pr_id).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        self.settle(staged).await
    }

    /// Replace one assigned reviewer with another active teammate of theirs.
    pub async fn reassign_reviewer(
        &self,
        cancel: &CancellationToken,
        input: &ReassignInput,
    ) -> Result<ReassignResult, ReviewError> {
        let pr_id = input.pull_request_id.trim();
        let old_id = input.old_reviewer_id.trim();
        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = self.reassign_reviewer_in(tx.as_mut(), pr_id, old_id).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        let result = self.settle(staged).await?;

        log::info!(
            "[assign] Reassigned {} on pull request {} to {}",
            old_id,
            pr_id,
            result.replaced_by
        );
        Ok(result)
    }

    async fn reassign_reviewer_in(
        &self,
        tx: &mut dyn StoreTx,
        pr_id: &str,
        old_id: &str,
    ) -> Result<ReassignResult, ReviewError> {
        tx.lock(LockScope::PullRequest(pr_id)).await?;

        let pr = tx
            .get_pull_request(pr_id)
            .await?
            .ok_or(ReviewError::PullRequestNotFound)?;
        if !pr.is_open() {
            return Err(ReviewError::PullRequestMerged);
        }
        if !pr.has_reviewer(old_id) {
            return Err(ReviewError::ReviewerNotAssigned);
        }

        let old_reviewer = tx.get_user(old_id).await?.ok_or(ReviewError::UserNotFound)?;

        let replacement = self
            .selector
            .pick_replacement_candidate(
                tx,
                &old_reviewer.team_name,
                &pr.assigned_reviewers,
                &[old_id, pr.author_id.as_str()],
            )
            .await?
            .ok_or(ReviewError::NoCandidate)?;

        tx.remove_reviewer(pr_id, old_id).await?;
        tx.add_reviewer(pr_id, &replacement).await?;

        let pull_request = tx
            .get_pull_request(pr_id)
            .await?
            .ok_or(ReviewError::PullRequestNotFound)?;

        Ok(ReassignResult {
            pull_request,
            replaced_by: replacement,
        })
    }

    // ── Bulk deactivation ────────────────────────────────────────────────

    /// Deactivate team members and move their open reviews to remaining
    /// active teammates. All-or-nothing.
    pub async fn deactivate_team_members(
        &self,
        cancel: &CancellationToken,
        team_name: &str,
        user_ids: &[String],
    ) -> Result<BulkDeactivateResult, ReviewError> {
        let team_name = team_name.trim();
        if team_name.is_empty() {
            return Err(ReviewError::invalid_input_field(
                "team name must not be empty",
                "team_name",
            ));
        }
        let users = normalize_ids(user_ids);
        if users.is_empty() {
            return Err(ReviewError::invalid_input_field(
                "at least one user id is required",
                "user_ids",
            ));
        }

        let staged = self
            .guarded(cancel, async {
                let mut tx = self.store.begin().await?;
                let outcome = self.deactivate_in(tx.as_mut(), team_name, &users).await;
                Ok::<_, ReviewError>((tx, outcome))
            })
            .await?;
        let (team, reassignments) = self.settle(staged).await?;

        let dropped = reassignments
            .iter()
            .filter(|c| c.new_reviewer_id.is_none())
            .count();
        log::info!(
            "[assign] Deactivated {} users in team {}: {} review slots moved, {} dropped",
            users.len(),
            team_name,
            reassignments.len() - dropped,
            dropped
        );
        if dropped > 0 {
            log::warn!(
                "[assign] Team {} has no replacement reviewers left for {} slots ({} active members)",
                team_name,
                dropped,
                team.active_member_ids().len()
            );
        }

        Ok(BulkDeactivateResult {
            team,
            deactivated_users: users,
            reassignments,
        })
    }

    async fn deactivate_in(
        &self,
        tx: &mut dyn StoreTx,
        team_name: &str,
        users: &[String],
    ) -> Result<(Team, Vec<ReassignmentChange>), ReviewError> {
        tx.lock(LockScope::Team(team_name)).await?;

        if !tx.team_exists(team_name).await? {
            return Err(ReviewError::TeamNotFound);
        }

        for id in users {
            match tx.get_user(id).await? {
                Some(user) if user.is_member_of(team_name) => {}
                _ => return Err(ReviewError::UserNotFound),
            }
        }

        for id in users {
            tx.set_user_active(id, false).await?;
        }

        let mut changes = Vec::new();
        for id in users {
            for pr_id in tx.open_reviews_of(id).await? {
                tx.lock(LockScope::PullRequest(&pr_id)).await?;

                let pr = tx
                    .get_pull_request(&pr_id)
                    .await?
                    .ok_or(ReviewError::PullRequestNotFound)?;
                let candidate = self
                    .selector
                    .pick_replacement_candidate(
                        tx,
                        team_name,
                        &pr.assigned_reviewers,
                        &[id.as_str(), pr.author_id.as_str()],
                    )
                    .await?;

                tx.remove_reviewer(&pr_id, id).await?;
                if let Some(new_id) = &candidate {
                    tx.add_reviewer(&pr_id, new_id).await?;
                }

                changes.push(ReassignmentChange {
                    pull_request_id: pr_id,
                    old_reviewer_id: id.clone(),
                    new_reviewer_id: candidate,
                });
            }
        }

        let team = load_team(tx, team_name).await?;
        Ok((team, changes))
    }
}

async fn create_team_in(
    tx: &mut dyn StoreTx,
    team_name: &str,
    members: &[NewTeamMember],
) -> Result<Team, ReviewError> {
    tx.lock(LockScope::Team(team_name)).await?;

    tx.insert_team(team_name)
        .await
        .map_err(|e| unique_violation_as(e, ReviewError::TeamExists))?;

    for member in members {
        let user_id = member.user_id.trim();
        if user_id.is_empty() {
            continue;
        }
        tx.upsert_user(&User {
            id: user_id.to_string(),
            username: member.username.clone(),
            team_name: team_name.to_string(),
            is_active: member.is_active,
        })
        .await?;
    }

    load_team(tx, team_name).await
}

async fn load_team(tx: &mut dyn StoreTx, team_name: &str) -> Result<Team, ReviewError> {
    if !tx.team_exists(team_name).await? {
        return Err(ReviewError::TeamNotFound);
    }
    Ok(Team {
        name: team_name.to_string(),
        members: tx.team_members(team_name).await?,
    })
}

async fn set_active_in(
    tx: &mut dyn StoreTx,
    user_id: &str,
    active: bool,
) -> Result<User, ReviewError> {
    tx.set_user_active(user_id, active)
        .await?
        .ok_or(ReviewError::UserNotFound)
}

async fn reviews_in(
    tx: &mut dyn StoreTx,
    user_id: &str,
) -> Result<Vec<PullRequestShort>, ReviewError> {
    if tx.get_user(user_id).await?.is_none() {
        return Err(ReviewError::UserNotFound);
    }
    Ok(tx.reviews_of(user_id).await?)
}

async fn merge_in(tx: &mut dyn StoreTx, pr_id: &str) -> Result<PullRequest, ReviewError> {
    tx.lock(LockScope::PullRequest(pr_id)).await?;
    if tx.mark_merged(pr_id, now()).await? == 0 {
        return Err(ReviewError::PullRequestNotFound);
    }
    tx.get_pull_request(pr_id)
        .await?
        .ok_or(ReviewError::PullRequestNotFound)
}
