use axum::{
    extract::{Query, State},
    http::StatusCode,
    routing::{delete, get, post},
    Json,
};
use serde::Deserialize;
use utoipa::IntoParams;

use crate::{
    auth::Session,
    errors::ServerResult,
    schemas::{OnboardingSchema, ProfileSchema, ValidatedJson},
    serialized::{ErrorBody, OnboardingResult, Streak, ToSerialized, User},
    Router, ServerContext,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct StreakQuery {
    /// Defaults to the user's target language
    language: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/user/profile",
    tag = "user",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User)
    )
)]
pub(crate) async fn profile(session: Session, State(context): State<ServerContext>) -> ServerResult<Json<User>> {
    let user = context.lingo.profiles.profile(&session).await?;

    Ok(Json(user.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/user/profile",
    tag = "user",
    request_body = ProfileSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User)
    )
)]
pub(crate) async fn update_profile(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProfileSchema>,
) -> ServerResult<Json<User>> {
    let user = context
        .lingo
        .profiles
        .update_profile(&session, body.into())
        .await?;

    Ok(Json(user.to_serialized()))
}

/// Stores the onboarding answers and creates the dashboard for the target language
#[utoipa::path(
    post,
    path = "/api/user/onboarding",
    tag = "user",
    request_body = OnboardingSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = OnboardingResult)
    )
)]
pub(crate) async fn complete_onboarding(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<OnboardingSchema>,
) -> ServerResult<Json<OnboardingResult>> {
    let (user, dashboard) = context
        .lingo
        .profiles
        .complete_onboarding(&session, body.into())
        .await?;

    Ok(Json(OnboardingResult {
        user: user.to_serialized(),
        dashboard: dashboard.to_serialized(),
    }))
}

#[utoipa::path(
    delete,
    path = "/api/user",
    tag = "user",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The account and everything it owns was deleted")
    )
)]
pub(crate) async fn delete_account(
    session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<StatusCode> {
    context.lingo.profiles.delete_account(&session).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    get,
    path = "/api/user/streak",
    tag = "user",
    params(StreakQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Streak),
        (status = 400, body = ErrorBody, description = "No language given and no target language set")
    )
)]
pub(crate) async fn streak(
    session: Session,
    State(context): State<ServerContext>,
    Query(query): Query<StreakQuery>,
) -> ServerResult<Json<Streak>> {
    let streak = context
        .lingo
        .profiles
        .streak(&session, query.language.as_deref())
        .await?;

    Ok(Json(streak.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", delete(delete_account))
        .route("/profile", get(profile).put(update_profile))
        .route("/onboarding", post(complete_onboarding))
        .route("/streak", get(streak))
}
