//! REST API routes for the assignment engine.
//!
//! Handlers translate JSON requests into engine calls and engine results
//! back into the wire shapes. All errors leave through [`ApiErr`].

use axum::extract::rejection::{JsonRejection, QueryRejection};
use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use chrono::{DateTime, SecondsFormat};
use serde::{Deserialize, Serialize};

use crate::error::{ErrorKind, ReviewError};
use crate::models::{
    PullRequest, PullRequestShort, PullRequestStatus, ReassignmentChange, Team, TeamMember, User,
};
use crate::services::assignment::{CreatePullRequestInput, NewTeamMember, ReassignInput};
use crate::services::http_server::AppState;

// ── Error handling ───────────────────────────────────────────────────────────

#[derive(Serialize)]
struct ErrorBody {
    error: ErrorDetail,
}

#[derive(Serialize)]
struct ErrorDetail {
    code: &'static str,
    message: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    field: Option<String>,
}

/// Wrapper to make ReviewError usable as an axum error response.
pub struct ApiErr(pub ReviewError);

impl IntoResponse for ApiErr {
    fn into_response(self) -> Response {
        let kind = self.0.kind();
        let status = match kind {
            ErrorKind::TeamExists | ErrorKind::InvalidInput => StatusCode::BAD_REQUEST,
            ErrorKind::NotFound => StatusCode::NOT_FOUND,
            ErrorKind::PrExists
            | ErrorKind::PrMerged
            | ErrorKind::NotAssigned
            | ErrorKind::NoCandidate => StatusCode::CONFLICT,
            ErrorKind::Cancelled => StatusCode::SERVICE_UNAVAILABLE,
            ErrorKind::Timeout => StatusCode::GATEWAY_TIMEOUT,
            ErrorKind::Internal => StatusCode::INTERNAL_SERVER_ERROR,
        };

        let message = if kind == ErrorKind::Internal {
            log::error!("[http] Internal error: {}", self.0);
            "internal error".to_string()
        } else {
            self.0.to_string()
        };

        (
            status,
            Json(ErrorBody {
                error: ErrorDetail {
                    code: kind.code(),
                    field: self.0.field().map(str::to_string),
                    message,
                },
            }),
        )
            .into_response()
    }
}

impl From<ReviewError> for ApiErr {
    fn from(err: ReviewError) -> Self {
        Self(err)
    }
}

impl From<JsonRejection> for ApiErr {
    fn from(rejection: JsonRejection) -> Self {
        Self(ReviewError::invalid_input(rejection.body_text()))
    }
}

impl From<QueryRejection> for ApiErr {
    fn from(rejection: QueryRejection) -> Self {
        Self(ReviewError::invalid_input(rejection.body_text()))
    }
}

/// Reject blank identifiers before they reach the engine.
fn require(value: &str, field: &str) -> Result<(), ApiErr> {
    if value.trim().is_empty() {
        return Err(ReviewError::invalid_input_field(format!("{} is required", field), field).into());
    }
    Ok(())
}

fn rfc3339(timestamp: i64) -> Option<String> {
    DateTime::from_timestamp(timestamp, 0).map(|dt| dt.to_rfc3339_opts(SecondsFormat::Secs, true))
}

// ── Request types ────────────────────────────────────────────────────────────

#[derive(Deserialize)]
struct TeamMemberRequest {
    user_id: String,
    username: String,
    #[serde(default = "default_active")]
    is_active: bool,
}

fn default_active() -> bool {
    true
}

#[derive(Deserialize)]
struct AddTeamRequest {
    team_name: String,
    #[serde(default)]
    members: Vec<TeamMemberRequest>,
}

#[derive(Deserialize)]
struct TeamQuery {
    team_name: String,
}

#[derive(Deserialize)]
struct DeactivateMembersRequest {
    team_name: String,
    user_ids: Vec<String>,
}

#[derive(Deserialize)]
struct SetIsActiveRequest {
    user_id: String,
    is_active: bool,
}

#[derive(Deserialize)]
struct UserQuery {
    user_id: String,
}

#[derive(Deserialize)]
struct CreatePullRequestRequest {
    pull_request_id: String,
    pull_request_name: String,
    author_id: String,
}

#[derive(Deserialize)]
struct MergePullRequestRequest {
    pull_request_id: String,
}

#[derive(Deserialize)]
struct ReassignRequest {
    pull_request_id: String,
    old_user_id: String,
}

// ── Response types ───────────────────────────────────────────────────────────

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamResponse {
    pub team_name: String,
    pub members: Vec<TeamMember>,
}

impl From<Team> for TeamResponse {
    fn from(team: Team) -> Self {
        Self {
            team_name: team.name,
            members: team.members,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserResponse {
    pub user_id: String,
    pub username: String,
    pub team_name: String,
    pub is_active: bool,
}

impl From<User> for UserResponse {
    fn from(user: User) -> Self {
        Self {
            user_id: user.id,
            username: user.username,
            team_name: user.team_name,
            is_active: user.is_active,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullRequestResponse {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PullRequestStatus,
    pub assigned_reviewers: Vec<String>,
    #[serde(rename = "createdAt")]
    pub created_at: Option<String>,
    #[serde(rename = "mergedAt")]
    pub merged_at: Option<String>,
}

impl From<PullRequest> for PullRequestResponse {
    fn from(pr: PullRequest) -> Self {
        Self {
            pull_request_id: pr.id,
            pull_request_name: pr.name,
            author_id: pr.author_id,
            status: pr.status,
            assigned_reviewers: pr.assigned_reviewers,
            created_at: rfc3339(pr.created_at),
            merged_at: pr.merged_at.and_then(rfc3339),
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullRequestShortResponse {
    pub pull_request_id: String,
    pub pull_request_name: String,
    pub author_id: String,
    pub status: PullRequestStatus,
}

impl From<PullRequestShort> for PullRequestShortResponse {
    fn from(pr: PullRequestShort) -> Self {
        let status = pr.status_enum();
        Self {
            pull_request_id: pr.id,
            pull_request_name: pr.name,
            author_id: pr.author_id,
            status,
        }
    }
}

#[derive(Debug, Serialize, Deserialize)]
pub struct TeamEnvelope {
    pub team: TeamResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserEnvelope {
    pub user: UserResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct PullRequestEnvelope {
    pub pr: PullRequestResponse,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct ReassignResponse {
    pub pr: PullRequestResponse,
    pub replaced_by: String,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct UserReviewsResponse {
    pub user_id: String,
    pub pull_requests: Vec<PullRequestShortResponse>,
}

#[derive(Debug, Serialize, Deserialize)]
pub struct DeactivateMembersResponse {
    pub team: TeamResponse,
    pub deactivated_user_ids: Vec<String>,
    pub reassignments: Vec<ReassignmentChange>,
}

// ── Route builder ────────────────────────────────────────────────────────────

/// Build the team, user and pull request routes.
pub fn api_routes() -> Router<AppState> {
    Router::new()
        .route("/team/add", post(add_team))
        .route("/team/get", get(get_team))
        .route("/team/deactivateMembers", post(deactivate_members))
        .route("/users/setIsActive", post(set_is_active))
        .route("/users/getReview", get(get_user_reviews))
        .route("/pullRequest/create", post(create_pull_request))
        .route("/pullRequest/merge", post(merge_pull_request))
        .route("/pullRequest/reassign", post(reassign_reviewer))
}

// ── Handlers ─────────────────────────────────────────────────────────────────

/// POST /team/add: create a team with its members.
async fn add_team(
    State(state): State<AppState>,
    payload: Result<Json<AddTeamRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<TeamEnvelope>), ApiErr> {
    let Json(req) = payload?;

    let members: Vec<NewTeamMember> = req
        .members
        .into_iter()
        .map(|m| NewTeamMember {
            user_id: m.user_id,
            username: m.username,
            is_active: m.is_active,
        })
        .collect();

    let team = state
        .engine
        .create_team(&state.abort, &req.team_name, &members)
        .await?;

    Ok((
        StatusCode::CREATED,
        Json(TeamEnvelope { team: team.into() }),
    ))
}

/// GET /team/get?team_name=X: team roster.
async fn get_team(
    State(state): State<AppState>,
    query: Result<Query<TeamQuery>, QueryRejection>,
) -> Result<Json<TeamResponse>, ApiErr> {
    let Query(params) = query?;
    require(&params.team_name, "team_name")?;

    let team = state.engine.get_team(&state.abort, &params.team_name).await?;
    Ok(Json(team.into()))
}

/// POST /team/deactivateMembers: deactivate users and move their reviews.
async fn deactivate_members(
    State(state): State<AppState>,
    payload: Result<Json<DeactivateMembersRequest>, JsonRejection>,
) -> Result<Json<DeactivateMembersResponse>, ApiErr> {
    let Json(req) = payload?;

    let result = state
        .engine
        .deactivate_team_members(&state.abort, &req.team_name, &req.user_ids)
        .await?;

    Ok(Json(DeactivateMembersResponse {
        team: result.team.into(),
        deactivated_user_ids: result.deactivated_users,
        reassignments: result.reassignments,
    }))
}

/// POST /users/setIsActive: flip a user's activity flag.
async fn set_is_active(
    State(state): State<AppState>,
    payload: Result<Json<SetIsActiveRequest>, JsonRejection>,
) -> Result<Json<UserEnvelope>, ApiErr> {
    let Json(req) = payload?;
    require(&req.user_id, "user_id")?;

    let user = state
        .engine
        .set_user_active(&state.abort, &req.user_id, req.is_active)
        .await?;
    Ok(Json(UserEnvelope { user: user.into() }))
}

/// GET /users/getReview?user_id=X: pull requests the user reviews.
async fn get_user_reviews(
    State(state): State<AppState>,
    query: Result<Query<UserQuery>, QueryRejection>,
) -> Result<Json<UserReviewsResponse>, ApiErr> {
    let Query(params) = query?;
    require(&params.user_id, "user_id")?;

    let reviews = state
        .engine
        .get_user_reviews(&state.abort, &params.user_id)
        .await?;

    Ok(Json(UserReviewsResponse {
        user_id: params.user_id,
        pull_requests: reviews.into_iter().map(Into::into).collect(),
    }))
}

/// POST /pullRequest/create: open a pull request and assign reviewers.
async fn create_pull_request(
    State(state): State<AppState>,
    payload: Result<Json<CreatePullRequestRequest>, JsonRejection>,
) -> Result<(StatusCode, Json<PullRequestEnvelope>), ApiErr> {
    let Json(req) = payload?;
    require(&req.pull_request_id, "pull_request_id")?;
    require(&req.pull_request_name, "pull_request_name")?;
    require(&req.author_id, "author_id")?;

    let input = CreatePullRequestInput {
        id: req.pull_request_id,
        name: req.pull_request_name,
        author_id: req.author_id,
    };
    let pr = state.engine.create_pull_request(&state.abort, &input).await?;

    Ok((
        StatusCode::CREATED,
        Json(PullRequestEnvelope { pr: pr.into() }),
    ))
}

/// POST /pullRequest/merge: mark a pull request merged (idempotent).
async fn merge_pull_request(
    State(state): State<AppState>,
    payload: Result<Json<MergePullRequestRequest>, JsonRejection>,
) -> Result<Json<PullRequestEnvelope>, ApiErr> {
    let Json(req) = payload?;
    require(&req.pull_request_id, "pull_request_id")?;

    let pr = state
        .engine
        .merge_pull_request(&state.abort, &req.pull_request_id)
        .await?;
    Ok(Json(PullRequestEnvelope { pr: pr.into() }))
}

/// POST /pullRequest/reassign: replace one reviewer.
async fn reassign_reviewer(
    State(state): State<AppState>,
    payload: Result<Json<ReassignRequest>, JsonRejection>,
) -> Result<Json<ReassignResponse>, ApiErr> {
    let Json(req) = payload?;
    require(&req.pull_request_id, "pull_request_id")?;
    require(&req.old_user_id, "old_user_id")?;

    let input = ReassignInput {
        pull_request_id: req.pull_request_id,
        old_reviewer_id: req.old_user_id,
    };
    let result = state.engine.reassign_reviewer(&state.abort, &input).await?;

    Ok(Json(ReassignResponse {
        pr: result.pull_request.into(),
        replaced_by: result.replaced_by,
    }))
}
