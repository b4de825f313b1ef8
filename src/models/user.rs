//! User model.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user who can author and review pull requests.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct User {
    /// Unique user id.
    pub id: String,

    pub username: String,

    /// Owning team; empty when the user is unassigned.
    pub team_name: String,

    /// Only active users are eligible to review.
    pub is_active: bool,
}

impl User {
    /// Whether the user belongs to the given team.
    pub fn is_member_of(&self, team_name: &str) -> bool {
        !self.team_name.is_empty() && self.team_name == team_name
    }
}
