use axum::{
    extract::{Path, Query, State},
    http::StatusCode,
    routing::{get, post, put},
    Json,
};
use lingo_core::PrimaryKey;
use serde::Deserialize;
use serde_json::json;
use utoipa::IntoParams;

use crate::{
    auth::Session,
    errors::ServerResult,
    schemas::{
        ConversationPersonaSchema, MessageFeedbackSchema, NewConversationSchema, NewMessageSchema,
        SynopsisSchema, TitleSchema, ValidatedJson,
    },
    serialized::{Conversation, ConversationDetail, ErrorBody, Message, ToSerialized},
    Router, ServerContext,
};

#[derive(Debug, Deserialize, IntoParams)]
pub struct ConversationsQuery {
    /// Only list conversations in this language
    language: Option<String>,
}

#[utoipa::path(
    get,
    path = "/api/conversations",
    tag = "conversations",
    params(ConversationsQuery),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Conversation>)
    )
)]
pub(crate) async fn list_conversations(
    session: Session,
    State(context): State<ServerContext>,
    Query(query): Query<ConversationsQuery>,
) -> ServerResult<Json<Vec<Conversation>>> {
    let conversations = context
        .lingo
        .conversations
        .list(&session, query.language.as_deref())
        .await?;

    Ok(Json(conversations.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/conversations",
    tag = "conversations",
    request_body = NewConversationSchema,
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Conversation),
        (status = 404, body = ErrorBody, description = "There is no dashboard for the language")
    )
)]
pub(crate) async fn create_conversation(
    session: Session,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<NewConversationSchema>,
) -> ServerResult<(StatusCode, Json<Conversation>)> {
    let conversation = context
        .lingo
        .conversations
        .create(&session, body.into())
        .await?;

    Ok((StatusCode::CREATED, Json(conversation.to_serialized())))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = ConversationDetail),
        (status = 403, body = ErrorBody),
        (status = 404, body = ErrorBody)
    )
)]
pub(crate) async fn conversation(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
) -> ServerResult<Json<ConversationDetail>> {
    let conversation = context
        .lingo
        .conversations
        .get(&session, conversation_id)
        .await?;

    Ok(Json(conversation.to_serialized()))
}

#[utoipa::path(
    delete,
    path = "/api/conversations/{id}",
    tag = "conversations",
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 204, description = "The conversation and its messages were deleted")
    )
)]
pub(crate) async fn delete_conversation(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
) -> ServerResult<StatusCode> {
    context
        .lingo
        .conversations
        .delete(&session, conversation_id)
        .await?;
    context.lingo.cache.remove(conversation_id);

    Ok(StatusCode::NO_CONTENT)
}

/// Renames the conversation. A missing title leaves it as it is.
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/title",
    tag = "conversations",
    request_body = TitleSchema,
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Conversation)
    )
)]
pub(crate) async fn update_title(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<TitleSchema>,
) -> ServerResult<Json<Conversation>> {
    let conversation = context
        .lingo
        .conversations
        .update_title(&session, conversation_id, body.title)
        .await?;

    Ok(Json(conversation.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{id}/synopsis",
    tag = "conversations",
    request_body = SynopsisSchema,
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Conversation)
    )
)]
pub(crate) async fn update_synopsis(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<SynopsisSchema>,
) -> ServerResult<Json<Conversation>> {
    let conversation = context
        .lingo
        .conversations
        .update_synopsis(&session, conversation_id, body.synopsis)
        .await?;

    Ok(Json(conversation.to_serialized()))
}

#[utoipa::path(
    post,
    path = "/api/conversations/{id}/persona",
    tag = "conversations",
    request_body = ConversationPersonaSchema,
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Conversation)
    )
)]
pub(crate) async fn update_persona(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<ConversationPersonaSchema>,
) -> ServerResult<Json<Conversation>> {
    let conversation = context
        .lingo
        .conversations
        .update_persona(&session, conversation_id, body.persona_id)
        .await?;

    Ok(Json(conversation.to_serialized()))
}

/// Asks the AI backend to summarize the conversation and stores it as the synopsis
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/summary",
    tag = "conversations",
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Conversation),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn summarize(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
) -> ServerResult<Json<Conversation>> {
    let lingo = &context.lingo;
    let detail = lingo.conversations.get(&session, conversation_id).await?;

    let messages: Vec<_> = detail
        .messages
        .iter()
        .map(|m| json!({ "sender": m.sender, "text": m.text }))
        .collect();

    let synopsis = lingo
        .ai
        .summarize(&json!({
            "language": detail.conversation.language,
            "title": detail.conversation.title,
            "messages": messages,
        }))
        .await?;

    let conversation = lingo
        .conversations
        .update_synopsis(&session, conversation_id, Some(synopsis))
        .await?;

    Ok(Json(conversation.to_serialized()))
}

#[utoipa::path(
    get,
    path = "/api/conversations/{id}/messages",
    tag = "conversations",
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Vec<Message>)
    )
)]
pub(crate) async fn messages(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
) -> ServerResult<Json<Vec<Message>>> {
    let messages = context
        .lingo
        .conversations
        .messages(&session, conversation_id)
        .await?;

    Ok(Json(messages.to_serialized()))
}

/// Appends a message. The order is assigned when it is left out.
#[utoipa::path(
    post,
    path = "/api/conversations/{id}/messages",
    tag = "conversations",
    request_body = NewMessageSchema,
    params(
        ("id" = i64, Path, description = "The id of the conversation")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 201, body = Message),
        (status = 409, body = ErrorBody, description = "The given order is not after the last message")
    )
)]
pub(crate) async fn add_message(
    session: Session,
    State(context): State<ServerContext>,
    Path(conversation_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<NewMessageSchema>,
) -> ServerResult<(StatusCode, Json<Message>)> {
    let message = context
        .lingo
        .conversations
        .add_message(&session, conversation_id, body.into())
        .await?;

    Ok((StatusCode::CREATED, Json(message.to_serialized())))
}

#[utoipa::path(
    put,
    path = "/api/messages/{id}/feedback",
    tag = "conversations",
    request_body = MessageFeedbackSchema,
    params(
        ("id" = i64, Path, description = "The id of the message")
    ),
    security(
        ("BearerAuth" = [])
    ),
    responses(
        (status = 200, body = Message)
    )
)]
pub(crate) async fn attach_feedback(
    session: Session,
    State(context): State<ServerContext>,
    Path(message_id): Path<PrimaryKey>,
    ValidatedJson(body): ValidatedJson<MessageFeedbackSchema>,
) -> ServerResult<Json<Message>> {
    let message = context
        .lingo
        .conversations
        .attach_feedback(&session, message_id, body.detailed_feedback)
        .await?;

    Ok(Json(message.to_serialized()))
}

pub fn router() -> Router {
    Router::new()
        .route("/", get(list_conversations).post(create_conversation))
        .route("/:id", get(conversation).delete(delete_conversation))
        .route("/:id/title", post(update_title))
        .route("/:id/synopsis", post(update_synopsis))
        .route("/:id/persona", post(update_persona))
        .route("/:id/summary", post(summarize))
        .route("/:id/messages", get(messages).post(add_message))
}

pub fn message_router() -> Router {
    Router::new().route("/:id/feedback", put(attach_feedback))
}
