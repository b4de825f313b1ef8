//! SQLite implementation of `ReviewStore`.
//!
//! Transactions are plain sqlx transactions. [`StoreTx::lock`] writes a row
//! in `review_locks` and deletes it again; because it is the first statement
//! of every mutating transaction, SQLite grants the write lock before any
//! read snapshot is taken, and concurrent writers wait on the busy timeout
//! instead of racing. The write lock lasts until commit or rollback, so the
//! row itself never needs to outlive the call and the table stays empty.
//!
//! Dropping an unfinished transaction rolls it back.

use async_trait::async_trait;
use sqlx::{FromRow, Sqlite, Transaction};

use super::{LockScope, ReviewStore, StoreError, StoreTx};
use crate::db::pool::DbPool;
use crate::models::{PullRequest, PullRequestShort, PullRequestStatus, TeamMember, User};

/// SQLite-backed store.
#[derive(Clone)]
pub struct SqliteStore {
    pool: DbPool,
}

impl SqliteStore {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ReviewStore for SqliteStore {
    async fn begin(&self) -> Result<Box<dyn StoreTx>, StoreError> {
        let tx = self.pool.begin().await?;
        Ok(Box::new(SqliteTx { tx }))
    }
}

struct SqliteTx {
    tx: Transaction<'static, Sqlite>,
}

#[derive(FromRow)]
struct PullRequestRow {
    id: String,
    name: String,
    author_id: String,
    status: String,
    created_at: i64,
    merged_at: Option<i64>,
}

/// Get the current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

#[async_trait]
impl StoreTx for SqliteTx {
    async fn lock(&mut self, scope: LockScope<'_>) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO review_locks (scope, acquired_at)
            VALUES (?, ?)
            ON CONFLICT(scope) DO UPDATE SET acquired_at = excluded.acquired_at
            "#,
        )
        .bind(scope.key())
        .bind(now())
        .execute(&mut *self.tx)
        .await?;

        sqlx::query("DELETE FROM review_locks WHERE scope = ?")
            .bind(scope.key())
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn team_exists(&mut self, name: &str) -> Result<bool, StoreError> {
        let exists: bool = sqlx::query_scalar("SELECT EXISTS(SELECT 1 FROM teams WHERE name = ?)")
            .bind(name)
            .fetch_one(&mut *self.tx)
            .await?;

        Ok(exists)
    }

    async fn insert_team(&mut self, name: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO teams (name) VALUES (?)")
            .bind(name)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn team_members(&mut self, name: &str) -> Result<Vec<TeamMember>, StoreError> {
        let members = sqlx::query_as::<_, TeamMember>(
            r#"
            SELECT id AS user_id, username, is_active
            FROM users
            WHERE team_name = ?
            ORDER BY username, id
            "#,
        )
        .bind(name)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(members)
    }

    async fn upsert_user(&mut self, user: &User) -> Result<(), StoreError> {
        let team_name = (!user.team_name.is_empty()).then_some(user.team_name.as_str());

        sqlx::query(
            r#"
            INSERT INTO users (id, username, team_name, is_active)
            VALUES (?, ?, ?, ?)
            ON CONFLICT(id) DO UPDATE
            SET username = excluded.username,
                team_name = excluded.team_name,
                is_active = excluded.is_active
            "#,
        )
        .bind(&user.id)
        .bind(&user.username)
        .bind(team_name)
        .bind(user.is_active)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_user(&mut self, id: &str) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            SELECT id, username, COALESCE(team_name, '') AS team_name, is_active
            FROM users
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn set_user_active(
        &mut self,
        id: &str,
        active: bool,
    ) -> Result<Option<User>, StoreError> {
        let user = sqlx::query_as::<_, User>(
            r#"
            UPDATE users
            SET is_active = ?
            WHERE id = ?
            RETURNING id, username, COALESCE(team_name, '') AS team_name, is_active
            "#,
        )
        .bind(active)
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        Ok(user)
    }

    async fn active_member_ids(&mut self, team_name: &str) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> =
            sqlx::query_scalar("SELECT id FROM users WHERE team_name = ? AND is_active = 1")
                .bind(team_name)
                .fetch_all(&mut *self.tx)
                .await?;

        Ok(ids)
    }

    async fn insert_pull_request(
        &mut self,
        id: &str,
        name: &str,
        author_id: &str,
        created_at: i64,
    ) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO pull_requests (id, name, author_id, status, created_at)
            VALUES (?, ?, ?, 'OPEN', ?)
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(author_id)
        .bind(created_at)
        .execute(&mut *self.tx)
        .await?;

        Ok(())
    }

    async fn get_pull_request(&mut self, id: &str) -> Result<Option<PullRequest>, StoreError> {
        let row = sqlx::query_as::<_, PullRequestRow>(
            r#"
            SELECT id, name, author_id, status, created_at, merged_at
            FROM pull_requests
            WHERE id = ?
            "#,
        )
        .bind(id)
        .fetch_optional(&mut *self.tx)
        .await?;

        let Some(row) = row else {
            return Ok(None);
        };

        let assigned_reviewers = self.list_reviewers(&row.id).await?;

        Ok(Some(PullRequest {
            status: PullRequestStatus::from(row.status.as_str()),
            id: row.id,
            name: row.name,
            author_id: row.author_id,
            assigned_reviewers,
            created_at: row.created_at,
            merged_at: row.merged_at,
        }))
    }

    async fn mark_merged(&mut self, id: &str, merged_at: i64) -> Result<u64, StoreError> {
        let result = sqlx::query(
            r#"
            UPDATE pull_requests
            SET status = 'MERGED',
                merged_at = COALESCE(merged_at, ?)
            WHERE id = ?
            "#,
        )
        .bind(merged_at)
        .bind(id)
        .execute(&mut *self.tx)
        .await?;

        Ok(result.rows_affected())
    }

    async fn list_reviewers(&mut self, pr_id: &str) -> Result<Vec<String>, StoreError> {
        let reviewers: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT reviewer_id
            FROM pull_request_reviewers
            WHERE pull_request_id = ?
            ORDER BY reviewer_id
            "#,
        )
        .bind(pr_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(reviewers)
    }

    async fn add_reviewer(&mut self, pr_id: &str, reviewer_id: &str) -> Result<(), StoreError> {
        sqlx::query("INSERT INTO pull_request_reviewers (pull_request_id, reviewer_id) VALUES (?, ?)")
            .bind(pr_id)
            .bind(reviewer_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn remove_reviewer(&mut self, pr_id: &str, reviewer_id: &str) -> Result<(), StoreError> {
        sqlx::query("DELETE FROM pull_request_reviewers WHERE pull_request_id = ? AND reviewer_id = ?")
            .bind(pr_id)
            .bind(reviewer_id)
            .execute(&mut *self.tx)
            .await?;

        Ok(())
    }

    async fn open_reviews_of(&mut self, user_id: &str) -> Result<Vec<String>, StoreError> {
        let ids: Vec<String> = sqlx::query_scalar(
            r#"
            SELECT pr.id
            FROM pull_requests pr
            JOIN pull_request_reviewers r ON r.pull_request_id = pr.id
            WHERE r.reviewer_id = ? AND pr.status = 'OPEN'
            ORDER BY pr.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(ids)
    }

    async fn reviews_of(&mut self, user_id: &str) -> Result<Vec<PullRequestShort>, StoreError> {
        let prs = sqlx::query_as::<_, PullRequestShort>(
            r#"
            SELECT pr.id, pr.name, pr.author_id, pr.status, pr.created_at
            FROM pull_requests pr
            JOIN pull_request_reviewers r ON r.pull_request_id = pr.id
            WHERE r.reviewer_id = ?
            ORDER BY pr.created_at DESC, pr.id
            "#,
        )
        .bind(user_id)
        .fetch_all(&mut *self.tx)
        .await?;

        Ok(prs)
    }

    async fn commit(self: Box<Self>) -> Result<(), StoreError> {
        let SqliteTx { tx } = *self;
        tx.commit().await?;
        Ok(())
    }

    async fn rollback(self: Box<Self>) -> Result<(), StoreError> {
        let SqliteTx { tx } = *self;
        tx.rollback().await?;
        Ok(())
    }
}
