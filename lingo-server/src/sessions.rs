use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json,
};

use crate::{
    auth::Session,
    errors::ServerResult,
    schemas::{ChatSessionSchema, ValidatedJson},
    serialized::{ChatSession, ErrorBody, ToSerialized},
    Router, ServerContext,
};

/// Stores a snapshot of a chat history
#[utoipa::path(
    post,
    path = "/api/sessions",
    tag = "sessions",
    request_body = ChatSessionSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = ChatSession)
    )
)]
pub(crate) async fn save_session(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ChatSessionSchema>,
) -> ServerResult<(StatusCode, Json<ChatSession>)> {
    let chat_session = context
        .lingo
        .profiles
        .save_chat_session(&session, body.language, body.chat_history)
        .await?;

    Ok((StatusCode::CREATED, Json(chat_session.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/sessions/latest",
    tag = "sessions",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = ChatSession),
        (status = 404, body = ErrorBody, description = "No chat history was saved yet")
    )
)]
pub(crate) async fn latest_session(
    session: Session,
    State(context): State<ServerContext>,
) -> ServerResult<Json<ChatSession>> {
    let chat_session = context.lingo.profiles.latest_chat_session(&session).await?;

    Ok(Json(chat_session.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", post(save_session))
        .route("/latest", get(latest_session))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_util::*;

    #[tokio::test]
    async fn latest_session_is_returned() {
        let app = TestApp::new().await;
        let token = app.user("ana@example.com").await;

        let (status, _) = app
            .request(Method::GET, "/api/sessions/latest", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::NOT_FOUND);

        for text in ["Hola", "Adiós"] {
            let (status, _) = app
                .request(
                    Method::POST,
                    "/api/sessions",
                    Some(&token),
                    Some(json!({ "chatHistory": [{ "sender": "User", "text": text }] })),
                )
                .await;
            assert_eq!(status, StatusCode::CREATED);
        }

        let (status, body) = app
            .request(Method::GET, "/api/sessions/latest", Some(&token), None)
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["chatHistory"][0]["text"], "Adiós");
    }
}
