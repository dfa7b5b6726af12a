use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::get,
    Json,
};
use lingo_core::PrimaryKey;

use crate::{
    auth::{MaybeSession, Session},
    errors::ServerResult,
    schemas::{PersonaSchema, ValidatedJson},
    serialized::{ErrorBody, Persona, ToSerialized},
    Router, ServerContext,
};

/// Lists anonymous personas, along with the user's own when authenticated
#[utoipa::path(
    get,
    path = "/api/personas",
    tag = "personas",
    responses(
        (status = 200, body = Vec<Persona>)
    )
)]
pub(crate) async fn list_personas(
    session: MaybeSession,
    State(context): State<ServerContext>,
) -> ServerResult<Json<Vec<Persona>>> {
    let personas = context.lingo.personas.list(session.identity()).await?;

    Ok(Json(personas.to_serialized()))
}

/// Creates a persona, owned by the user when authenticated and anonymous otherwise
#[utoipa::path(
    post,
    path = "/api/personas",
    tag = "personas",
    request_body = PersonaSchema,
    responses(
        (status = 201, body = Persona),
        (status = 400, body = ErrorBody, description = "The persona has no name")
    )
)]
pub(crate) async fn create_persona(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<PersonaSchema>,
) -> ServerResult<(StatusCode, Json<Persona>)> {
    let persona = context
        .lingo
        .personas
        .create(session.identity(), body.into())
        .await?;

    Ok((StatusCode::CREATED, Json(persona.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/personas/{id}",
    tag = "personas",
    params(
        ("id" = i64, Path, description = "The id of the persona")
    ),
    responses(
        (status = 200, body = Persona),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub(crate) async fn persona(
    session: MaybeSession,
    State(context): State<ServerContext>,
    Path(persona_id): Path<PrimaryKey>,
) -> ServerResult<Json<Persona>> {
    let persona = context
        .lingo
        .personas
        .get(session.identity(), persona_id)
        .await?;

    Ok(Json(persona.to_serialized()))
}

#[utoipa::path(
    put,
    path = "/api/personas/{id}",
    tag = "personas",
    request_body = PersonaSchema,
    params(
        ("id" = i64, Path, description = "The id of the persona")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Persona),
        (status = 403, body = ErrorBody, description = "The persona is anonymous or belongs to somebody else")
    )
)]
pub(crate) async fn update_persona(
    session: Session,
    State(context): State<ServerContext>,
    Path(persona_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<PersonaSchema>,
) -> ServerResult<Json<Persona>> {
    let persona = context
        .lingo
        .personas
        .update(&session, persona_id, body.into())
        .await?;

    Ok(Json(persona.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/personas/{id}",
    tag = "personas",
    params(
        ("id" = i64, Path, description = "The id of the persona")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The persona was deleted, conversations using it remain")
    )
)]
pub(crate) async fn delete_persona(
    session: Session,
    State(context): State<ServerContext>,
    Path(persona_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    context.lingo.personas.delete(&session, persona_id).await?;

    Ok(StatusCode::NO_CONTENT)
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_personas).post(create_persona))
        .route(
            "/:id",
            get(persona).put(update_persona).delete(delete_persona),
        )
}
