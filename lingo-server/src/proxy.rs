//! Routes that hand work to the AI backend, filling in the learner's
//! preferences and relaying whatever the backend answers.

use std::{collections::HashMap, path::Path};

use axum::{
    extract::{DefaultBodyLimit, Multipart, State},
    routing::post,
    Json,
};
use lingo_core::{
    save_upload, AiEndpoint, AudioUpload, ConversationWithMessages, Identity, MessageDraft,
    PrimaryKey, Sender,
};
use log::info;
use serde::Serialize;
use serde_json::{json, Map, Value};
use url::Url;
use utoipa::ToSchema;

use crate::{
    auth::MaybeSession,
    errors::{ServerError, ServerResult},
    schemas::{ProxySchema, ValidatedJson},
    serialized::{ErrorBody, Message, ToSerialized},
    Router, ServerContext,
};

/// Largest request body the AI routes accept, recordings included
const MAX_UPLOAD_BYTES: usize = 25 * 1024 * 1024;

/// What came out of analyzing a recording
#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct AnalysisResult {
    transcription: String,
    response: String,
    /// Public url of the stored recording
    audio_path: String,
    /// Present when the analysis was part of a conversation
    user_message: Option<Message>,
    ai_message: Option<Message>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct SpeechResult {
    /// Public url of the synthesized audio
    tts_url: String,
}

/// A multipart form carrying a recording
struct AudioForm {
    audio: Option<AudioUpload>,
    fields: HashMap<String, String>,
}

impl AudioForm {
    async fn read(mut multipart: Multipart) -> ServerResult<Self> {
        let mut audio = None;
        let mut fields = HashMap::new();

        while let Some(field) = multipart
            .next_field()
            .await
            .map_err(|e| ServerError::Validation(e.body_text()))?
        {
            let name = field.name().unwrap_or_default().to_string();

            if name == "audio" || field.file_name().is_some() {
                let file_name = field.file_name().unwrap_or("recording.webm").to_string();
                let content_type = field.content_type().map(str::to_string);
                let bytes = field
                    .bytes()
                    .await
                    .map_err(|e| ServerError::Validation(e.body_text()))?;

                audio = Some(AudioUpload {
                    file_name,
                    content_type,
                    bytes: bytes.to_vec(),
                });
            } else {
                let value = field
                    .text()
                    .await
                    .map_err(|e| ServerError::Validation(e.body_text()))?;

                fields.insert(name, value);
            }
        }

        Ok(Self { audio, fields })
    }

    fn field(&self, name: &str) -> Option<&str> {
        self.fields.get(name).map(String::as_str)
    }

    fn conversation_id(&self) -> ServerResult<Option<PrimaryKey>> {
        self.field("conversationId")
            .or_else(|| self.field("conversation_id"))
            .map(|id| {
                id.parse()
                    .map_err(|_| ServerError::Validation("conversationId must be a number".into()))
            })
            .transpose()
    }
}

/// Fills in the learner's preferences for everything the body leaves out
async fn with_preferences(
    context: &ServerContext,
    identity: Option<&Identity>,
    mut body: Map<String, Value>,
) -> ServerResult<Map<String, Value>> {
    let Some(identity) = identity else {
        return Ok(body);
    };

    let language = body
        .get("language")
        .or_else(|| body.get("target_language"))
        .and_then(Value::as_str)
        .map(str::to_string);

    let preferences = context
        .lingo
        .profiles
        .preferences_for(identity, language.as_deref())
        .await?;

    if let Ok(Value::Object(preferences)) = serde_json::to_value(preferences) {
        for (key, value) in preferences {
            if !value.is_null() {
                body.entry(key).or_insert(value);
            }
        }
    }

    Ok(body)
}

/// Looks up the conversation a request refers to, making sure it belongs to the requester
async fn owned_conversation(
    context: &ServerContext,
    identity: Option<&Identity>,
    conversation_id: Option<PrimaryKey>,
) -> ServerResult<Option<ConversationWithMessages>> {
    let Some(conversation_id) = conversation_id else {
        return Ok(None);
    };

    let identity = identity.ok_or(ServerError::MissingToken)?;
    let conversation = context
        .lingo
        .conversations
        .get(identity, conversation_id)
        .await?;

    Ok(Some(conversation))
}

fn conversation_id_of(body: &Map<String, Value>) -> ServerResult<Option<PrimaryKey>> {
    let value = body
        .get("conversationId")
        .or_else(|| body.get("conversation_id"));

    match value {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => Ok(n.as_i64()),
        Some(Value::String(s)) => s
            .parse()
            .map(Some)
            .map_err(|_| ServerError::Validation("conversationId must be a number".into())),
        Some(_) => Err(ServerError::Validation(
            "conversationId must be a number".into(),
        )),
    }
}

/// Picks the first string field out of a backend response
fn text_of(response: &Value, keys: &[&str]) -> ServerResult<String> {
    keys.iter()
        .find_map(|key| response.get(*key).and_then(Value::as_str))
        .map(str::to_string)
        .ok_or_else(|| {
            ServerError::UpstreamUnavailable(format!(
                "AI backend response has none of {}",
                keys.join(", ")
            ))
        })
}

/// Builds the public url of a file in the uploads directory
fn upload_url(public_url: &Url, path: &str) -> ServerResult<String> {
    if path.starts_with("http://") || path.starts_with("https://") {
        return Ok(path.to_string());
    }

    let file_name = Path::new(path)
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| {
            ServerError::UpstreamUnavailable("Synthesized speech has no file name".to_string())
        })?;

    public_url
        .join(&format!("uploads/{file_name}"))
        .map(|url| url.to_string())
        .map_err(|e| ServerError::Unknown(e.to_string()))
}

async fn forward(
    context: &ServerContext,
    session: &MaybeSession,
    endpoint: AiEndpoint,
    body: Map<String, Value>,
) -> ServerResult<Json<Value>> {
    let body = with_preferences(context, session.identity(), body).await?;
    let response = context.lingo.ai.call(endpoint, &Value::Object(body)).await?;

    Ok(Json(response))
}

/// Transcribes a recording, answers it, and records both sides in the conversation if one is given
#[utoipa::path(
    post,
    path = "/api/analyze",
    tag = "ai",
    request_body(content = Object, content_type = "multipart/form-data", description = "An `audio` file along with optional `conversationId`, `language` and `chatHistory` fields"),
    responses(
        (status = 200, body = AnalysisResult),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn analyze(
    session: MaybeSession,
    State(context): State<ServerContext>,
    multipart: Multipart,
) -> ServerResult<Json<AnalysisResult>> {
    let lingo = &context.lingo;
    let form = AudioForm::read(multipart).await?;
    let audio = form
        .audio
        .clone()
        .ok_or_else(|| ServerError::Validation("audio is required".to_string()))?;

    let conversation = owned_conversation(&context, session.identity(), form.conversation_id()?).await?;
    let conversation_id = conversation.as_ref().map(|c| c.conversation.id);

    let saved = save_upload(&lingo.config().uploads_dir, &audio.file_name, &audio.bytes).await?;
    let audio_path = upload_url(&lingo.config().public_url, &saved.to_string_lossy())?;

    let language = form
        .field("language")
        .map(str::to_string)
        .or_else(|| conversation.as_ref().map(|c| c.conversation.language.clone()));

    let transcribed = lingo.ai.transcribe(audio, language.as_deref()).await?;
    let transcription = text_of(&transcribed, &["transcription", "text"])?;

    let chat_history = match form.field("chatHistory").or_else(|| form.field("chat_history")) {
        Some(history) => serde_json::from_str(history)
            .map_err(|_| ServerError::Validation("chatHistory must be JSON".to_string()))?,
        None => conversation_id
            .and_then(|id| lingo.cache.get(id))
            .and_then(|cached| cached.last_chat_history)
            .or_else(|| {
                conversation.as_ref().map(|c| {
                    c.messages
                        .iter()
                        .map(|m| json!({ "sender": m.sender, "text": m.text }))
                        .collect()
                })
            })
            .unwrap_or_else(|| json!([])),
    };

    let mut body = Map::new();
    body.insert("user_input".into(), json!(transcription));
    body.insert("chat_history".into(), chat_history.clone());

    if let Some(language) = &language {
        body.insert("language".into(), json!(language));
    }

    if let Some(conversation) = &conversation {
        body.insert("topics".into(), json!(conversation.conversation.topics));
        body.insert("formality".into(), json!(conversation.conversation.formality));
    }

    let body = with_preferences(&context, session.identity(), body).await?;
    let answered = lingo.ai.call(AiEndpoint::AiResponse, &Value::Object(body)).await?;
    let response = text_of(&answered, &["response", "ai_response", "text"])?;

    let (user_message, ai_message) = match (&conversation, session.identity()) {
        (Some(conversation), Some(identity)) => {
            let id = conversation.conversation.id;

            let mut recorded = lingo
                .conversations
                .add_messages(
                    identity,
                    id,
                    vec![
                        MessageDraft {
                            sender: Sender::User,
                            text: transcription.clone(),
                            audio_path: Some(audio_path.clone()),
                            detailed_feedback: None,
                            message_order: None,
                        },
                        MessageDraft {
                            sender: Sender::Ai,
                            text: response.clone(),
                            audio_path: None,
                            detailed_feedback: None,
                            message_order: None,
                        },
                    ],
                )
                .await?
                .into_iter();

            let user_message = recorded.next();
            let ai_message = recorded.next();

            let mut history = chat_history.as_array().cloned().unwrap_or_default();
            history.push(json!({ "sender": Sender::User, "text": transcription }));
            history.push(json!({ "sender": Sender::Ai, "text": response }));

            lingo.cache.set_audio(id, saved.clone());
            lingo.cache.set_chat_history(id, Value::Array(history));

            info!("Recorded analyzed exchange in conversation {}", id);

            (user_message, ai_message)
        }
        _ => (None, None),
    };

    Ok(Json(AnalysisResult {
        transcription,
        response,
        audio_path,
        user_message: user_message.map(|m| m.to_serialized()),
        ai_message: ai_message.map(|m| m.to_serialized()),
    }))
}

#[utoipa::path(
    post,
    path = "/api/transcribe",
    tag = "ai",
    request_body(content = Object, content_type = "multipart/form-data", description = "An `audio` file along with optional `conversationId` and `language` fields"),
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn transcribe(
    session: MaybeSession,
    State(context): State<ServerContext>,
    multipart: Multipart,
) -> ServerResult<Json<Value>> {
    let lingo = &context.lingo;
    let form = AudioForm::read(multipart).await?;
    let audio = form
        .audio
        .clone()
        .ok_or_else(|| ServerError::Validation("audio is required".to_string()))?;

    let conversation = owned_conversation(&context, session.identity(), form.conversation_id()?).await?;
    let saved = save_upload(&lingo.config().uploads_dir, &audio.file_name, &audio.bytes).await?;

    if let Some(conversation) = &conversation {
        lingo.cache.set_audio(conversation.conversation.id, saved);
    }

    let language = form
        .field("language")
        .map(str::to_string)
        .or_else(|| conversation.map(|c| c.conversation.language));

    let response = lingo.ai.transcribe(audio, language.as_deref()).await?;

    Ok(Json(response))
}

/// Synthesizes speech, answering with a url to the audio
#[utoipa::path(
    post,
    path = "/api/tts",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, body = SpeechResult),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn tts(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<SpeechResult>> {
    let mut body = with_preferences(&context, session.identity(), body.0).await?;

    if !body.get("text").is_some_and(Value::is_string) {
        return Err(ServerError::Validation("text is required".to_string()));
    }

    if let Some(speed) = body.get("speech_speed").cloned() {
        body.entry("speed").or_insert(speed);
    }

    let speech = context
        .lingo
        .ai
        .generate_speech(&Value::Object(body))
        .await?;

    Ok(Json(SpeechResult {
        tts_url: upload_url(&context.lingo.config().public_url, &speech.output_path)?,
    }))
}

/// Generates feedback, falling back to the conversation's latest recording and history
#[utoipa::path(
    post,
    path = "/api/feedback",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn feedback(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    let mut body = body.0;
    let conversation = owned_conversation(&context, session.identity(), conversation_id_of(&body)?).await?;

    if let Some(cached) = conversation.and_then(|c| context.lingo.cache.get(c.conversation.id)) {
        if let Some(history) = cached.last_chat_history {
            body.entry("chat_history").or_insert(history);
        }

        if let Some(path) = cached.last_audio_path {
            body.entry("audio_path")
                .or_insert_with(|| json!(path.to_string_lossy()));
        }
    }

    forward(&context, &session, AiEndpoint::Feedback, body).await
}

#[utoipa::path(
    post,
    path = "/api/suggestions",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn suggestions(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    forward(&context, &session, AiEndpoint::Suggestions, body.0).await
}

#[utoipa::path(
    post,
    path = "/api/translation",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn translation(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    forward(&context, &session, AiEndpoint::Translate, body.0).await
}

#[utoipa::path(
    post,
    path = "/api/translation/quick",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn quick_translation(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    forward(&context, &session, AiEndpoint::QuickTranslation, body.0).await
}

#[utoipa::path(
    post,
    path = "/api/explain-suggestion",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn explain_suggestion(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    forward(&context, &session, AiEndpoint::ExplainSuggestion, body.0).await
}

#[utoipa::path(
    post,
    path = "/api/initial-message",
    tag = "ai",
    request_body = ProxySchema,
    responses(
        (status = 200, description = "The response of the AI backend"),
        (status = 502, body = ErrorBody, description = "The AI backend is unavailable")
    )
)]
pub(crate) async fn initial_message(
    session: MaybeSession,
    State(context): State<ServerContext>,
    ValidatedJson(body): ValidatedJson<ProxySchema>,
) -> ServerResult<Json<Value>> {
    forward(&context, &session, AiEndpoint::InitialMessage, body.0).await
}

pub fn router() -> Router {
    Router::new()
        .route("/analyze", post(analyze))
        .route("/transcribe", post(transcribe))
        .route("/tts", post(tts))
        .route("/feedback", post(feedback))
        .route("/suggestions", post(suggestions))
        .route("/translation", post(translation))
        .route("/translation/quick", post(quick_translation))
        .route("/explain-suggestion", post(explain_suggestion))
        .route("/initial-message", post(initial_message))
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
}

#[cfg(test)]
mod test {
    use axum::{
        body::Body,
        http::{header, Method, Request, StatusCode},
    };
    use serde_json::json;
    use wiremock::{
        matchers::{body_partial_json, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use crate::test_util::*;

    use super::*;

    const BOUNDARY: &str = "lingo-test-boundary";

    fn multipart_request(uri: &str, token: &str, fields: &[(&str, &str)]) -> Request<Body> {
        multipart_request_with_audio(uri, token, fields, b"RIFF")
    }

    fn multipart_request_with_audio(
        uri: &str,
        token: &str,
        fields: &[(&str, &str)],
        audio: &[u8],
    ) -> Request<Body> {
        let mut body = Vec::new();

        for (name, value) in fields {
            body.extend_from_slice(
                format!(
                    "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"{name}\"\r\n\r\n{value}\r\n"
                )
                .as_bytes(),
            );
        }

        body.extend_from_slice(
            format!(
                "--{BOUNDARY}\r\nContent-Disposition: form-data; name=\"audio\"; filename=\"clip.webm\"\r\nContent-Type: audio/webm\r\n\r\n"
            )
            .as_bytes(),
        );
        body.extend_from_slice(audio);
        body.extend_from_slice(format!("\r\n--{BOUNDARY}--\r\n").as_bytes());

        Request::builder()
            .method(Method::POST)
            .uri(uri)
            .header(header::AUTHORIZATION, format!("Bearer {token}"))
            .header(
                header::CONTENT_TYPE,
                format!("multipart/form-data; boundary={BOUNDARY}"),
            )
            .body(Body::from(body))
            .unwrap()
    }

    #[test]
    fn upload_urls_point_at_uploads() {
        let public = Url::parse("http://localhost:3001").unwrap();

        assert_eq!(
            upload_url(&public, "/srv/ai/uploads/speech-1.mp3").unwrap(),
            "http://localhost:3001/uploads/speech-1.mp3"
        );
        assert_eq!(
            upload_url(&public, "speech-2.mp3").unwrap(),
            "http://localhost:3001/uploads/speech-2.mp3"
        );
        assert_eq!(
            upload_url(&public, "https://cdn.example.com/speech.mp3").unwrap(),
            "https://cdn.example.com/speech.mp3"
        );
    }

    #[test]
    fn conversation_ids_are_numbers() {
        let body = |value: Value| json!({ "conversationId": value }).as_object().cloned().unwrap();

        assert_eq!(conversation_id_of(&body(json!(4))).unwrap(), Some(4));
        assert_eq!(conversation_id_of(&body(json!("7"))).unwrap(), Some(7));
        assert_eq!(conversation_id_of(&body(Value::Null)).unwrap(), None);
        assert!(conversation_id_of(&body(json!("seven"))).is_err());
    }

    #[tokio::test]
    async fn suggestions_carry_preferences() {
        let ai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/suggestions"))
            .and(body_partial_json(json!({
                "language": "Spanish",
                "proficiency_level": "beginner",
                "chat_history": []
            })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "suggestions": ["Hola"] })))
            .expect(1)
            .mount(&ai)
            .await;

        let app = TestApp::with_ai(&ai).await;
        let token = app.user("ana@example.com").await;
        app.request(
            Method::POST,
            "/api/user/onboarding",
            Some(&token),
            Some(json!({ "targetLanguage": "Spanish", "proficiencyLevel": "beginner" })),
        )
        .await;

        let (status, body) = app
            .request(
                Method::POST,
                "/api/suggestions",
                Some(&token),
                Some(json!({ "chat_history": [] })),
            )
            .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["suggestions"][0], "Hola");
    }

    #[tokio::test]
    async fn upstream_errors_are_relayed() {
        let ai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/translate"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&ai)
            .await;

        let app = TestApp::with_ai(&ai).await;

        let (status, body) = app
            .request(Method::POST, "/api/translation", None, Some(json!({ "text": "Hola" })))
            .await;

        assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(body["details"], "overloaded");
    }

    #[tokio::test]
    async fn unreachable_backend_is_bad_gateway() {
        // Nothing listens on the discard port
        let app = TestApp::with_ai_url("http://127.0.0.1:9").await;

        let (status, _) = app
            .request(
                Method::POST,
                "/api/translation/quick",
                None,
                Some(json!({ "text": "Hola" })),
            )
            .await;

        assert_eq!(status, StatusCode::BAD_GATEWAY);
    }

    #[tokio::test]
    async fn tts_answers_with_a_url() {
        let ai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/generate_tts"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(json!({ "output_path": "uploads/speech-1.mp3" })),
            )
            .mount(&ai)
            .await;

        let app = TestApp::with_ai(&ai).await;

        let (status, body) = app
            .request(Method::POST, "/api/tts", None, Some(json!({ "text": "Hola" })))
            .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["ttsUrl"], "http://localhost:3001/uploads/speech-1.mp3");

        let (status, _) = app
            .request(Method::POST, "/api/tts", None, Some(json!({})))
            .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn analysis_is_recorded_in_the_conversation() {
        let ai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "transcription": "Hola" })))
            .mount(&ai)
            .await;
        Mock::given(method("POST"))
            .and(path("/ai_response"))
            .and(body_partial_json(json!({ "user_input": "Hola", "language": "Spanish" })))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "response": "¡Hola! ¿Qué tal?" })))
            .expect(1)
            .mount(&ai)
            .await;

        let app = TestApp::with_ai(&ai).await;
        let token = app.user("ana@example.com").await;
        app.dashboard(&token, "Spanish").await;
        let id = app.conversation(&token, "Spanish", "Ordering").await;

        let request = multipart_request(
            "/api/analyze",
            &token,
            &[("conversationId", &id.to_string())],
        );
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transcription"], "Hola");
        assert_eq!(body["response"], "¡Hola! ¿Qué tal?");
        assert_eq!(body["userMessage"]["messageOrder"], 1);
        assert_eq!(body["aiMessage"]["sender"], "AI");
        assert_eq!(body["aiMessage"]["messageOrder"], 2);

        // Recordings are referred to by their public url, never by their location on disk
        let audio_path = body["audioPath"].as_str().unwrap();
        assert!(audio_path.starts_with("http://localhost:3001/uploads/"));
        assert!(audio_path.ends_with(".webm"));
        assert_eq!(body["userMessage"]["audioPath"], audio_path);

        let cached = app.lingo.cache.get(id).unwrap();
        assert!(cached.last_audio_path.is_some());
        assert_eq!(cached.last_chat_history.unwrap().as_array().unwrap().len(), 2);

        let (_, conversation) = app
            .request(Method::GET, &format!("/api/conversations/{id}"), Some(&token), None)
            .await;
        assert_eq!(conversation["messageCount"], 2);
    }

    #[tokio::test]
    async fn analysis_of_foreign_conversation_is_forbidden() {
        let ai = MockServer::start().await;
        let app = TestApp::with_ai(&ai).await;
        let ana = app.user("ana@example.com").await;
        let ben = app.user("ben@example.com").await;
        app.dashboard(&ana, "Spanish").await;
        let id = app.conversation(&ana, "Spanish", "Ordering").await;

        let request = multipart_request("/api/analyze", &ben, &[("conversationId", &id.to_string())]);
        let (status, _) = app.send(request).await;

        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(app.lingo.cache.get(id).is_none());
    }

    #[tokio::test]
    async fn long_recordings_are_accepted() {
        let ai = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "transcription": "Hola" })))
            .expect(1)
            .mount(&ai)
            .await;

        let app = TestApp::with_ai(&ai).await;
        let token = app.user("ana@example.com").await;

        // Larger than axum's default limit of 2 MB
        let recording = vec![0u8; 5 * 1024 * 1024];
        let request = multipart_request_with_audio("/api/transcribe", &token, &[], &recording);
        let (status, body) = app.send(request).await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["transcription"], "Hola");
    }
}
