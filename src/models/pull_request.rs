//! Pull request model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// Lifecycle status of a pull request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum PullRequestStatus {
    Open,
    Merged,
}

impl PullRequestStatus {
    /// Storage representation.
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Open => "OPEN",
            Self::Merged => "MERGED",
        }
    }
}

impl From<&str> for PullRequestStatus {
    fn from(s: &str) -> Self {
        match s.to_uppercase().as_str() {
            "MERGED" => Self::Merged,
            _ => Self::Open,
        }
    }
}

impl std::fmt::Display for PullRequestStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A pull request with its assigned reviewers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PullRequest {
    /// Unique pull request id.
    pub id: String,

    pub name: String,

    /// Id of the authoring user.
    pub author_id: String,

    pub status: PullRequestStatus,

    /// Assigned reviewer ids, sorted.
    pub assigned_reviewers: Vec<String>,

    /// Creation timestamp (Unix).
    pub created_at: i64,

    /// Merge timestamp (Unix), present iff merged.
    pub merged_at: Option<i64>,
}

impl PullRequest {
    /// Check if the pull request is still open.
    pub fn is_open(&self) -> bool {
        self.status == PullRequestStatus::Open
    }

    /// Check if a user is among the assigned reviewers.
    pub fn has_reviewer(&self, user_id: &str) -> bool {
        self.assigned_reviewers.iter().any(|r| r == user_id)
    }
}

/// Listing projection of a pull request (no reviewer set).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct PullRequestShort {
    pub id: String,
    pub name: String,
    pub author_id: String,
    /// Current status: `OPEN` or `MERGED`.
    pub status: String,
    pub created_at: i64,
}

impl PullRequestShort {
    /// Parse the status string into an enum.
    pub fn status_enum(&self) -> PullRequestStatus {
        PullRequestStatus::from(self.status.as_str())
    }
}

/// Audit record of one reviewer slot changed by a deactivation cascade.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReassignmentChange {
    pub pull_request_id: String,
    pub old_reviewer_id: String,
    /// Replacement reviewer, or `None` when the slot was dropped.
    pub new_reviewer_id: Option<String>,
}
