use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json,
};

use crate::{
    auth::Session,
    errors::ServerResult,
    schemas::{DashboardSettingsSchema, NewDashboardSchema, ValidatedJson},
    serialized::{ErrorBody, LanguageDashboard, ToSerialized},
    Router, ServerContext,
};

#[utoipa::path(
    get,
    path = "/api/language-dashboards",
    tag = "language-dashboards",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<LanguageDashboard>)
    )
)]
pub(crate) async fn list_dashboards(
    session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<Vec<LanguageDashboard>>> {
    let dashboards = context.lingo.dashboards.list(&session).await?;

    Ok(Json(dashboards.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/language-dashboards",
    tag = "language-dashboards",
    request_body = NewDashboardSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = LanguageDashboard),
        (status = 409, body = ErrorBody, description = "A dashboard for this language already exists")
    )
)]
pub(crate) async fn create_dashboard(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewDashboardSchema>,
) -> ServerResult<(StatusCode, Json<LanguageDashboard>)> {
    let (language, settings) = body.into_parts();
    let dashboard = context
        .lingo
        .dashboards
        .create(&session, &language, settings)
        .await?;

    Ok((StatusCode::CREATED, Json(dashboard.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/language-dashboards/{language}",
    tag = "language-dashboards",
    params(
        ("language" = String, Path, description = "The language of the dashboard")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = LanguageDashboard),
        (status = 404, body = ErrorBody)
    )
)]
pub(crate) async fn dashboard(
    session: Session,
    State(context): State<ServerContext>,
    Path(language): Path<String>,
) -> ServerResult<Json<LanguageDashboard>> {
    let dashboard = context.lingo.dashboards.get(&session, &language).await?;

    Ok(Json(dashboard.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/language-dashboards/{language}",
    tag = "language-dashboards",
    request_body = DashboardSettingsSchema,
    params(
        ("language" = String, Path, description = "The language of the dashboard")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = LanguageDashboard)
    )
)]
pub(crate) async fn update_dashboard(
    session: Session,
    State(context): State<ServerContext>,
    Path(language): Path<String>,
    ValidatedJson(body): ValidatedJson<DashboardSettingsSchema>,
) -> ServerResult<Json<LanguageDashboard>> {
    let dashboard = context
        .lingo
        .dashboards
        .update(&session, &language, body.into())
        .await?;

    Ok(Json(dashboard.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/language-dashboards/{language}",
    tag = "language-dashboards",
    params(
        ("language" = String, Path, description = "The language of the dashboard")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The dashboard and its conversations were deleted"),
        (status = 409, body = ErrorBody, description = "This is the only dashboard of the user")
    )
)]
pub(crate) async fn delete_dashboard(
    session: Session,
    State(context): State<ServerContext>,
    Path(language): Path<String>,
) -> ServerResult<StatusCode> {
    context.lingo.dashboards.delete(&session, &language).await?;

    Ok(StatusCode::NO_CONTENT)
}

#[utoipa::path(
    post,
    path = "/api/language-dashboards/{language}/primary",
    tag = "language-dashboards",
    params(
        ("language" = String, Path, description = "The language of the dashboard")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = LanguageDashboard)
    )
)]
pub(crate) async fn set_primary(
    session: Session,
    State(context): State<ServerContext>,
    Path(language): Path<String>,
) -> ServerResult<Json<LanguageDashboard>> {
    let dashboard = context
        .lingo
        .dashboards
        .set_primary(&session, &language)
        .await?;

    Ok(Json(dashboard.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_dashboards).post(create_dashboard))
        .route(
            "/:language",
            get(dashboard).put(update_dashboard).delete(delete_dashboard),
        )
        .route("/:language/primary", post(set_primary))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_util::*;

    #[tokio::test]
    async fn duplicate_dashboard_conflicts() {
        let app = TestApp::new().await;
        let token = app.user("ana@example.com").await;
        let body = json!({ "language": "Spanish" });

        let (status, created) = app
            .request(Method::POST, "/api/language-dashboards", Some(&token), Some(body.clone()))
            .await;
        assert_eq!(status, StatusCode::CREATED);
        assert_eq!(created["isPrimary"], true);

        let (status, error) = app
            .request(Method::POST, "/api/language-dashboards", Some(&token), Some(body))
            .await;
        assert_eq!(status, StatusCode::CONFLICT);
        assert!(error["error"].is_string());

        let (_, dashboards) = app
            .request(Method::GET, "/api/language-dashboards", Some(&token), None)
            .await;
        assert_eq!(dashboards.as_array().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn only_dashboard_is_kept() {
        let app = TestApp::new().await;
        let token = app.user("ana@example.com").await;
        app.dashboard(&token, "Spanish").await;

        let (status, _) = app
            .request(Method::DELETE, "/api/language-dashboards/Spanish", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::CONFLICT);

        app.dashboard(&token, "French").await;
        let conversation = app.conversation(&token, "French", "Bonjour").await;

        let (status, _) = app
            .request(Method::DELETE, "/api/language-dashboards/French", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NO_CONTENT);

        let (status, _) = app
            .request(
                Method::GET,
                &format!("/api/conversations/{conversation}"),
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn primary_can_be_moved() {
        let app = TestApp::new().await;
        let token = app.user("ana@example.com").await;
        app.dashboard(&token, "Spanish").await;
        app.dashboard(&token, "French").await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/language-dashboards/French/primary",
                Some(&token),
                None,
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["isPrimary"], true);

        let (_, spanish) = app
            .request(Method::GET, "/api/language-dashboards/Spanish", Some(&token), None)
            .await;
        assert_eq!(spanish["isPrimary"], false);
    }

    #[tokio::test]
    async fn speech_speed_is_validated() {
        let app = TestApp::new().await;
        let token = app.user("ana@example.com").await;
        app.dashboard(&token, "Spanish").await;

        let (status, _) = app
            .request(
                Method::PUT,
                "/api/language-dashboards/Spanish",
                Some(&token),
                Some(json!({ "speechSpeed": 10.0 })),
            )
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);

        let (status, body) = app
            .request(
                Method::PUT,
                "/api/language-dashboards/Spanish",
                Some(&token),
                Some(json!({ "speechSpeed": 0.8 })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["speechSpeed"], 0.8);
    }
}
