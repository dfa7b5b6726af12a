use std::ops::Deref;

use axum::{
    async_trait,
    extract::{FromRef, FromRequestParts, State},
    http::{header, request::Parts},
    routing::{get, post},
    Json,
};
use lingo_core::{Credentials, Identity, NewPlainUser};

use crate::{
    errors::{ServerError, ServerResult},
    schemas::{ExchangeSchema, LoginSchema, RegisterSchema, ValidatedJson},
    serialized::{ErrorBody, LoginResult, ToSerialized, User},
    Router, ServerContext,
};

/// The verified identity of a request that requires authentication
pub struct Session(Identity);

/// The identity of a request where authentication is optional.
/// A request without an Authorization header is anonymous, but a header
/// that doesn't verify is still refused.
pub struct MaybeSession(pub Option<Identity>);

impl Deref for Session {
    type Target = Identity;

    fn deref(&self) -> &Self::Target {
        &self.0
    }
}

impl MaybeSession {
    pub fn identity(&self) -> Option<&Identity> {
        self.0.as_ref()
    }
}

/// Returns the bearer token of the request, if there is an Authorization header
fn bearer_token(parts: &Parts) -> ServerResult<Option<&str>> {
    let Some(value) = parts.headers.get(header::AUTHORIZATION) else {
        return Ok(None);
    };

    let value = value
        .to_str()
        .map_err(|_| ServerError::InvalidToken("Authorization header is not valid text".into()))?;

    match value.split_once(' ') {
        Some(("Bearer", token)) if !token.trim().is_empty() => Ok(Some(token.trim())),
        _ => Err(ServerError::InvalidToken(
            "Authorization must be Bearer".to_string(),
        )),
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for Session
where
    S: Send + Sync,
    ServerContext: FromRef<S>,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);
        let token = bearer_token(parts)?.ok_or(ServerError::MissingToken)?;

        let identity = context.lingo.auth.authenticate(token).await?;

        Ok(Self(identity))
    }
}

#[async_trait]
impl<S> FromRequestParts<S> for MaybeSession
where
    S: Send + Sync,
    ServerContext: FromRef<S>,
{
    type Rejection = ServerError;

    async fn from_request_parts(parts: &mut Parts, state: &S) -> Result<Self, Self::Rejection> {
        let context = ServerContext::from_ref(state);

        let identity = match bearer_token(parts)? {
            Some(token) => Some(context.lingo.auth.authenticate(token).await?),
            None => None,
        };

        Ok(Self(identity))
    }
}

#[utoipa::path(
    post,
    path = "/api/auth/register",
    tag = "auth",
    request_body = RegisterSchema,
    responses(
        (status = 200, body = LoginResult),
        (status = 409, body = ErrorBody, description = "Email is already taken")
    )
)]
pub(crate) async fn register(
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<RegisterSchema>,
) -> ServerResult<Json<LoginResult>> {
    let signed_in = context
        .lingo
        .auth
        .register(NewPlainUser {
            email: body.email,
            password: body.password,
            name: body.name,
        })
        .await?;

    Ok(Json(signed_in.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/auth/login",
    tag = "auth",
    request_body = LoginSchema,
    responses(
        (status = 200, body = LoginResult),
        (status = 401, body = ErrorBody, description = "Email or password is incorrect")
    )
)]
pub(crate) async fn login(
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<LoginSchema>,
) -> ServerResult<Json<LoginResult>> {
    let signed_in = context
        .lingo
        .auth
        .login(Credentials {
            email: body.email,
            password: body.password,
        })
        .await?;

    Ok(Json(signed_in.to_serialized()))
}

/// Trades an identity provider token for a lingo token, creating the account on first sign-in
#[utoipa::path(
    post,
    path = "/api/auth/exchange",
    tag = "auth",
    request_body = ExchangeSchema,
    responses(
        (status = 200, body = LoginResult),
        (status = 403, body = ErrorBody, description = "Token could not be verified"),
        (status = 409, body = ErrorBody, description = "The email belongs to an account that can't be linked")
    )
)]
pub(crate) async fn exchange(
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ExchangeSchema>,
) -> ServerResult<Json<LoginResult>> {
    let signed_in = context.lingo.auth.exchange(&body.token).await?;

    Ok(Json(signed_in.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/auth/user",
    tag = "auth",
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = User),
        (status = 401, body = ErrorBody, description = "Missing authorization")
    )
)]
pub(crate) async fn user(session: Session, State(context): State<ServerContext>) -> ServerResult<Json<User>> {
    let user = context.lingo.profiles.profile(&session).await?;

    Ok(Json(user.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/register", post(register))
        .route("/login", post(login))
        .route("/exchange", post(exchange))
        .route("/user", get(user))
}

#[cfg(test)]
mod test {
    use axum::http::{Method, StatusCode};
    use serde_json::json;

    use crate::test_util::*;

    #[tokio::test]
    async fn register_then_fetch_user() {
        let app = TestApp::new().await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "ana@example.com", "password": "correct horse", "name": "Ana" })),
            )
            .await;
        assert_eq!(status, StatusCode::OK);

        let token = body["token"].as_str().unwrap().to_string();
        let (status, body) = app
            .request(Method::GET, "/api/auth/user", Some(&token), None)
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["email"], "ana@example.com");
        assert_eq!(body["onboardingComplete"], false);
    }

    #[tokio::test]
    async fn missing_token_is_unauthorized() {
        let app = TestApp::new().await;

        let (status, body) = app.request(Method::GET, "/api/auth/user", None, None).await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["error"], "Missing authorization");
    }

    #[tokio::test]
    async fn invalid_token_is_forbidden() {
        let app = TestApp::new().await;

        let (status, body) = app
            .request(Method::GET, "/api/auth/user", Some("garbage"), None)
            .await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(body["details"].is_string());
    }

    #[tokio::test]
    async fn wrong_password_is_unauthorized() {
        let app = TestApp::new().await;
        app.user("ana@example.com").await;

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/login",
                None,
                Some(json!({ "email": "ana@example.com", "password": "wrong password" })),
            )
            .await;

        assert_eq!(status, StatusCode::UNAUTHORIZED);
    }

    #[tokio::test]
    async fn duplicate_email_conflicts() {
        let app = TestApp::new().await;
        app.user("ana@example.com").await;

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "ana@example.com", "password": "another password", "name": "Ana" })),
            )
            .await;

        assert_eq!(status, StatusCode::CONFLICT);
    }

    #[tokio::test]
    async fn invalid_body_is_a_bad_request() {
        let app = TestApp::new().await;

        let (status, _) = app
            .request(
                Method::POST,
                "/api/auth/register",
                None,
                Some(json!({ "email": "not-an-email", "password": "short", "name": "" })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_REQUEST);
    }
}
