//! Team and roster models.

use serde::{Deserialize, Serialize};
use sqlx::FromRow;

/// A user as seen from inside a team roster.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, FromRow)]
pub struct TeamMember {
    pub user_id: String,
    pub username: String,
    pub is_active: bool,
}

/// A team and its members, ordered by username.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Unique team name.
    pub name: String,
    pub members: Vec<TeamMember>,
}

impl Team {
    /// Ids of members whose activity flag is set.
    pub fn active_member_ids(&self) -> Vec<&str> {
        self.members
            .iter()
            .filter(|m| m.is_active)
            .map(|m| m.user_id.as_str())
            .collect()
    }
}
