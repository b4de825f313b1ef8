//! Domain error types for the assignment engine.
//!
//! Every operation of the engine returns a [`ReviewError`]. The variants are
//! the stable error taxonomy the HTTP boundary maps onto status codes, plus
//! an opaque storage kind for failures the engine cannot classify.

use thiserror::Error;

use crate::store::StoreError;

/// Errors surfaced by the assignment engine.
#[derive(Debug, Error)]
pub enum ReviewError {
    /// A team with this name already exists.
    #[error("team already exists")]
    TeamExists,

    /// Referenced team is absent.
    #[error("team not found")]
    TeamNotFound,

    /// Referenced user is absent, or is not a member of the expected team.
    #[error("user not found")]
    UserNotFound,

    #[error("pull request not found")]
    PullRequestNotFound,

    #[error("pull request already exists")]
    PullRequestExists,

    /// Reviewer changes are not allowed once a pull request is merged.
    #[error("pull request already merged")]
    PullRequestMerged,

    #[error("reviewer not assigned to pull request")]
    ReviewerNotAssigned,

    /// No active teammate is left to take over the review.
    #[error("no replacement candidate")]
    NoCandidate,

    /// Malformed request.
    #[error("invalid input: {message}")]
    InvalidInput {
        message: String,
        /// Offending request field, when known.
        field: Option<String>,
    },

    /// The caller cancelled the operation before it committed.
    #[error("operation cancelled")]
    Cancelled,

    /// The operation ran past its deadline and was rolled back.
    #[error("operation deadline exceeded")]
    DeadlineExceeded,

    /// Unclassified storage failure (connectivity, timeout, corruption).
    #[error("storage error: {message}")]
    Storage { message: String },
}

/// Stable, transport-independent classification of a [`ReviewError`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    TeamExists,
    NotFound,
    PrExists,
    PrMerged,
    NotAssigned,
    NoCandidate,
    InvalidInput,
    Cancelled,
    Timeout,
    Internal,
}

impl ErrorKind {
    /// Wire code used in error responses.
    pub fn code(self) -> &'static str {
        match self {
            Self::TeamExists => "TEAM_EXISTS",
            Self::NotFound => "NOT_FOUND",
            Self::PrExists => "PR_EXISTS",
            Self::PrMerged => "PR_MERGED",
            Self::NotAssigned => "NOT_ASSIGNED",
            Self::NoCandidate => "NO_CANDIDATE",
            Self::InvalidInput => "INVALID_INPUT",
            Self::Cancelled => "CANCELLED",
            Self::Timeout => "TIMEOUT",
            Self::Internal => "INTERNAL_ERROR",
        }
    }
}

impl ReviewError {
    /// Create an invalid input error.
    pub fn invalid_input(message: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: None,
        }
    }

    /// Create an invalid input error with field name.
    pub fn invalid_input_field(message: impl Into<String>, field: impl Into<String>) -> Self {
        Self::InvalidInput {
            message: message.into(),
            field: Some(field.into()),
        }
    }

    /// Create a storage error.
    pub fn storage(message: impl Into<String>) -> Self {
        Self::Storage {
            message: message.into(),
        }
    }

    /// Request field an invalid input error points at.
    pub fn field(&self) -> Option<&str> {
        match self {
            Self::InvalidInput { field, .. } => field.as_deref(),
            _ => None,
        }
    }

    /// Classify this error for the transport layer.
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::TeamExists => ErrorKind::TeamExists,
            Self::TeamNotFound | Self::UserNotFound | Self::PullRequestNotFound => {
                ErrorKind::NotFound
            }
            Self::PullRequestExists => ErrorKind::PrExists,
            Self::PullRequestMerged => ErrorKind::PrMerged,
            Self::ReviewerNotAssigned => ErrorKind::NotAssigned,
            Self::NoCandidate => ErrorKind::NoCandidate,
            Self::InvalidInput { .. } => ErrorKind::InvalidInput,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::DeadlineExceeded => ErrorKind::Timeout,
            Self::Storage { .. } => ErrorKind::Internal,
        }
    }

    /// Whether this error belongs to the domain taxonomy (as opposed to an
    /// opaque infrastructure failure).
    pub fn is_domain(&self) -> bool {
        !matches!(
            self,
            Self::Storage { .. } | Self::Cancelled | Self::DeadlineExceeded
        )
    }
}

// Unique violations are translated by the engine where the colliding key is
// known; anything reaching this conversion is unclassified.
impl From<StoreError> for ReviewError {
    fn from(err: StoreError) -> Self {
        Self::storage(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_field() {
        let err = ReviewError::invalid_input_field("must not be empty", "user_ids");
        assert_eq!(err.field(), Some("user_ids"));
        assert_eq!(ReviewError::invalid_input("bad json").field(), None);
        assert_eq!(ReviewError::TeamNotFound.field(), None);
    }

    #[test]
    fn test_kind_mapping() {
        assert_eq!(ReviewError::TeamExists.kind().code(), "TEAM_EXISTS");
        assert_eq!(ReviewError::TeamNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ReviewError::UserNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ReviewError::PullRequestNotFound.kind(), ErrorKind::NotFound);
        assert_eq!(ReviewError::PullRequestExists.kind().code(), "PR_EXISTS");
        assert_eq!(ReviewError::PullRequestMerged.kind().code(), "PR_MERGED");
        assert_eq!(ReviewError::ReviewerNotAssigned.kind().code(), "NOT_ASSIGNED");
        assert_eq!(ReviewError::NoCandidate.kind().code(), "NO_CANDIDATE");
        assert_eq!(ReviewError::storage("x").kind().code(), "INTERNAL_ERROR");
    }

    #[test]
    fn test_store_error_is_opaque() {
        let err: ReviewError = StoreError::UniqueViolation("teams.name".into()).into();
        assert!(!err.is_domain());
        assert_eq!(err.kind(), ErrorKind::Internal);
    }

    #[test]
    fn test_display_impl() {
        assert_eq!(
            ReviewError::invalid_input("user_ids is empty").to_string(),
            "invalid input: user_ids is empty"
        );
        assert_eq!(ReviewError::NoCandidate.to_string(), "no replacement candidate");
    }
}
