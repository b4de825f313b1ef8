//! Data models for the application.
//!
//! These models represent the core entities stored in the database and
//! passed between the store, the assignment engine and the HTTP boundary.
//!
//! Row-shaped models derive FromRow for SQLx database queries.

pub mod pull_request;
pub mod team;
pub mod user;

// Re-exports for convenient access
pub use pull_request::{PullRequest, PullRequestShort, PullRequestStatus, ReassignmentChange};
pub use team::{Team, TeamMember};
pub use user::User;
