//! Store abstraction for the assignment engine.
//!
//! This module defines the `ReviewStore` and `StoreTx` traits that abstract
//! the transactional storage the engine runs against. Implementations can
//! provide different backends (SQLite, in-memory).
//!
//! The engine never talks to a connection directly: it opens a transaction,
//! takes a [`LockScope`] before reading anything it intends to change, and
//! either commits or rolls back.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use async_trait::async_trait;
use thiserror::Error;

use crate::models::{PullRequest, PullRequestShort, TeamMember, User};

/// Storage-level errors.
#[derive(Debug, Error)]
pub enum StoreError {
    /// A primary key or unique constraint was violated. Carries the
    /// constraint description reported by the backend.
    #[error("unique constraint violated: {0}")]
    UniqueViolation(String),

    #[error("database error: {0}")]
    Database(String),

    /// The transaction was already finished or is otherwise unusable.
    #[error("transaction error: {0}")]
    Transaction(String),
}

impl From<sqlx::Error> for StoreError {
    fn from(err: sqlx::Error) -> Self {
        match err.as_database_error() {
            Some(db_err) if db_err.is_unique_violation() => {
                Self::UniqueViolation(db_err.message().to_string())
            }
            _ => Self::Database(err.to_string()),
        }
    }
}

/// Serialization key taken at the start of a mutating transaction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LockScope<'a> {
    PullRequest(&'a str),
    Team(&'a str),
}

impl LockScope<'_> {
    /// Key stored in the lock table.
    pub fn key(&self) -> String {
        match self {
            Self::PullRequest(id) => format!("pull_request:{id}"),
            Self::Team(name) => format!("team:{name}"),
        }
    }
}

/// Entry point of a store: hands out transactions.
#[async_trait]
pub trait ReviewStore: Send + Sync {
    /// Begin a new transaction.
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError>;
}

/// Operations the engine performs inside a single transaction.
///
/// Dropping a transaction without calling [`StoreTx::commit`] discards its
/// writes.
#[async_trait]
pub trait StoreTx: Send {
    /// Acquire the serialization point for `scope`. Held until the
    /// transaction finishes.
    async fn lock(&mut self, scope: LockScope<'_>) -> Result<(), StoreError>;

    // ── Teams and users ──────────────────────────────────────────────────

    async fn team_exists(&mut self, name: &str) -> Result<bool, StoreError>;

    /// Insert a team. Fails with [`StoreError::UniqueViolation`] on a
    /// duplicate name.
    async fn insert_team(&mut self, name: &str) -> Result<(), StoreError>;

    /// Members of a team ordered by username.
    async fn team_members(&mut self, name: &str) -> Result<Vec<TeamMember>, StoreError>;

    /// Insert a user or overwrite username, team and activity of an
    /// existing one.
    async fn upsert_user(&mut self, user: &User) -> Result<(), StoreError>;

    async fn get_user(&mut self, id: &str) -> Result<Option<User>, StoreError>;

    /// Set the activity flag. Returns the updated user, or `None` if absent.
    async fn set_user_active(&mut self, id: &str, active: bool)
        -> Result<Option<User>, StoreError>;

    /// Ids of active members of a team, in store order.
    async fn active_member_ids(&mut self, team_name: &str) -> Result<Vec<String>, StoreError>;

    // ── Pull requests ────────────────────────────────────────────────────

    /// Insert an OPEN pull request. Fails with
    /// [`StoreError::UniqueViolation`] if the id is taken.
    async fn insert_pull_request(
        &mut self,
        id: &str,
        name: &str,
        author_id: &str,
        created_at: i64,
    ) -> Result<(), StoreError>;

    /// Load a pull request with its reviewer set.
    async fn get_pull_request(&mut self, id: &str) -> Result<Option<PullRequest>, StoreError>;

    /// Mark a pull request merged, keeping an existing merge timestamp.
    /// Returns the number of rows matched.
    async fn mark_merged(&mut self, id: &str, merged_at: i64) -> Result<u64, StoreError>;

    /// Reviewer ids of a pull request, sorted.
    async fn list_reviewers(&mut self, pr_id: &str) -> Result<Vec<String>, StoreError>;

    async fn add_reviewer(&mut self, pr_id: &str, reviewer_id: &str) -> Result<(), StoreError>;

    async fn remove_reviewer(&mut self, pr_id: &str, reviewer_id: &str)
        -> Result<(), StoreError>;

    /// Ids of OPEN pull requests the user reviews, sorted.
    async fn open_reviews_of(&mut self, user_id: &str) -> Result<Vec<String>, StoreError>;

    /// All pull requests the user reviews, newest first.
    async fn reviews_of(&mut self, user_id: &str) -> Result<Vec<PullRequestShort>, StoreError>;

    // ── Lifecycle ────────────────────────────────────────────────────────

    async fn commit(self: Box<Self>) -> Result<(), StoreError>;

    async fn rollback(self: Box<Self>) -> Result<(), StoreError>;
}
