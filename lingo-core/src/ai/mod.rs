use std::time::Duration;

use log::{error, info};
use reqwest::{
    multipart::{Form, Part},
    Client, RequestBuilder, StatusCode,
};
use serde::Deserialize;
use serde_json::Value;
use thiserror::Error;
use url::Url;

use crate::LingoContext;

mod uploads;
pub use uploads::*;

#[derive(Debug, Error)]
pub enum AiError {
    /// The AI backend could not be reached or didn't answer in time
    #[error("AI backend is unavailable: {0}")]
    Unavailable(String),
    /// The AI backend answered with an error status
    #[error("AI backend responded with {status}")]
    Upstream { status: u16, body: String },
    /// The AI backend answered with something that isn't the expected JSON
    #[error("Could not decode AI backend response: {0}")]
    Decode(String),
    #[error(transparent)]
    Io(#[from] std::io::Error),
}

/// An endpoint of the AI backend
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiEndpoint {
    Transcribe,
    AiResponse,
    Feedback,
    Suggestions,
    Translate,
    QuickTranslation,
    GenerateTts,
    InitialMessage,
    ExplainSuggestion,
    ConversationSummary,
}

/// Audio sent along for transcription
#[derive(Debug, Clone)]
pub struct AudioUpload {
    pub file_name: String,
    pub content_type: Option<String>,
    pub bytes: Vec<u8>,
}

/// The result of synthesizing speech
#[derive(Debug, Clone, Deserialize)]
pub struct GeneratedSpeech {
    /// Where the backend wrote the audio file
    pub output_path: String,
}

/// Talks to the external AI backend
pub struct AiClient {
    base_url: Url,
    http: Client,
}

impl AiEndpoint {
    pub fn path(&self) -> &'static str {
        match self {
            AiEndpoint::Transcribe => "transcribe",
            AiEndpoint::AiResponse => "ai_response",
            AiEndpoint::Feedback => "feedback",
            AiEndpoint::Suggestions => "suggestions",
            AiEndpoint::Translate => "translate",
            AiEndpoint::QuickTranslation => "quick_translation",
            AiEndpoint::GenerateTts => "generate_tts",
            AiEndpoint::InitialMessage => "initial_message",
            AiEndpoint::ExplainSuggestion => "explain_suggestion",
            AiEndpoint::ConversationSummary => "conversation_summary",
        }
    }

    /// How long the backend gets to answer
    pub fn timeout(&self) -> Duration {
        let seconds = match self {
            AiEndpoint::Feedback => 120,
            AiEndpoint::Transcribe
            | AiEndpoint::AiResponse
            | AiEndpoint::ConversationSummary => 60,
            AiEndpoint::Suggestions
            | AiEndpoint::GenerateTts
            | AiEndpoint::InitialMessage
            | AiEndpoint::ExplainSuggestion => 30,
            AiEndpoint::Translate | AiEndpoint::QuickTranslation => 15,
        };

        Duration::from_secs(seconds)
    }
}

impl AiClient {
    pub fn new(context: &LingoContext) -> Self {
        Self::with_base_url(context.config.ai_backend_url.clone())
    }

    pub fn with_base_url(base_url: Url) -> Self {
        Self {
            base_url,
            http: Client::new(),
        }
    }

    /// Posts a JSON body to the given endpoint and returns the JSON it answers with
    pub async fn call(&self, endpoint: AiEndpoint, body: &Value) -> Result<Value, AiError> {
        let request = self.request(endpoint).json(body);

        self.send(endpoint, request).await
    }

    /// Sends audio to be transcribed
    pub async fn transcribe(&self, audio: AudioUpload, language: Option<&str>) -> Result<Value, AiError> {
        let mut part = Part::bytes(audio.bytes).file_name(audio.file_name);

        if let Some(content_type) = &audio.content_type {
            part = part
                .mime_str(content_type)
                .map_err(|e| AiError::Decode(e.to_string()))?;
        }

        let mut form = Form::new().part("audio", part);

        if let Some(language) = language {
            form = form.text("language", language.to_string());
        }

        let request = self.request(AiEndpoint::Transcribe).multipart(form);

        self.send(AiEndpoint::Transcribe, request).await
    }

    /// Synthesizes speech for the given text
    pub async fn generate_speech(&self, body: &Value) -> Result<GeneratedSpeech, AiError> {
        let response = self.call(AiEndpoint::GenerateTts, body).await?;

        serde_json::from_value(response).map_err(|e| AiError::Decode(e.to_string()))
    }

    /// Summarizes a conversation into a short synopsis
    pub async fn summarize(&self, body: &Value) -> Result<String, AiError> {
        let response = self.call(AiEndpoint::ConversationSummary, body).await?;

        response
            .get("summary")
            .or_else(|| response.get("synopsis"))
            .and_then(Value::as_str)
            .map(str::to_string)
            .ok_or_else(|| AiError::Decode("Response has no summary".to_string()))
    }

    fn request(&self, endpoint: AiEndpoint) -> RequestBuilder {
        let url = format!(
            "{}/{}",
            self.base_url.as_str().trim_end_matches('/'),
            endpoint.path()
        );

        self.http.post(url).timeout(endpoint.timeout())
    }

    async fn send(&self, endpoint: AiEndpoint, request: RequestBuilder) -> Result<Value, AiError> {
        let response = request.send().await.map_err(|e| {
            error!("AI backend /{} failed: {}", endpoint.path(), e);
            AiError::Unavailable(e.to_string())
        })?;

        let status = response.status();

        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            error!(
                "AI backend /{} responded with {}: {}",
                endpoint.path(),
                status,
                body
            );

            return Err(AiError::Upstream {
                status: status.as_u16(),
                body,
            });
        }

        info!("AI backend /{} responded with {}", endpoint.path(), status);

        match status {
            StatusCode::NO_CONTENT => Ok(Value::Null),
            _ => response
                .json()
                .await
                .map_err(|e| AiError::Decode(e.to_string())),
        }
    }
}

#[cfg(test)]
mod test {
    use serde_json::json;
    use wiremock::{
        matchers::{body_json, header_regex, method, path},
        Mock, MockServer, ResponseTemplate,
    };

    use super::*;

    async fn client_for(server: &MockServer) -> AiClient {
        AiClient::with_base_url(Url::parse(&server.uri()).unwrap())
    }

    #[test]
    fn timeouts_follow_endpoint_cost() {
        assert_eq!(AiEndpoint::Feedback.timeout(), Duration::from_secs(120));
        assert_eq!(AiEndpoint::Transcribe.timeout(), Duration::from_secs(60));
        assert_eq!(AiEndpoint::Suggestions.timeout(), Duration::from_secs(30));
        assert_eq!(AiEndpoint::QuickTranslation.timeout(), Duration::from_secs(15));
    }

    #[tokio::test]
    async fn json_body_is_forwarded() {
        let server = MockServer::start().await;
        let body = json!({ "text": "Hola", "target_language": "en" });

        Mock::given(method("POST"))
            .and(path("/translate"))
            .and(body_json(&body))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "translation": "Hello" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let response = client.call(AiEndpoint::Translate, &body).await.unwrap();

        assert_eq!(response["translation"], "Hello");
    }

    #[tokio::test]
    async fn error_status_is_surfaced() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/suggestions"))
            .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.call(AiEndpoint::Suggestions, &json!({})).await;

        match result {
            Err(AiError::Upstream { status, body }) => {
                assert_eq!(status, 503);
                assert_eq!(body, "overloaded");
            }
            other => panic!("expected upstream error, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn unreachable_backend_is_unavailable() {
        // Nothing listens on the discard port
        let client = AiClient::with_base_url(Url::parse("http://127.0.0.1:9").unwrap());

        let result = client.call(AiEndpoint::Feedback, &json!({})).await;

        assert!(matches!(result, Err(AiError::Unavailable(_))));
    }

    #[tokio::test]
    async fn audio_is_sent_as_multipart() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/transcribe"))
            .and(header_regex("content-type", "^multipart/form-data"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({ "transcription": "Hola" })))
            .expect(1)
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let audio = AudioUpload {
            file_name: "recording.webm".to_string(),
            content_type: Some("audio/webm".to_string()),
            bytes: vec![1, 2, 3],
        };

        let response = client.transcribe(audio, Some("es")).await.unwrap();

        assert_eq!(response["transcription"], "Hola");
    }

    #[tokio::test]
    async fn summary_is_extracted() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/conversation_summary"))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(json!({ "summary": "Ordering coffee" })),
            )
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let summary = client.summarize(&json!({ "messages": [] })).await.unwrap();

        assert_eq!(summary, "Ordering coffee");
    }

    #[tokio::test]
    async fn non_json_answer_is_a_decode_error() {
        let server = MockServer::start().await;

        Mock::given(method("POST"))
            .and(path("/generate_tts"))
            .respond_with(ResponseTemplate::new(200).set_body_string("not json"))
            .mount(&server)
            .await;

        let client = client_for(&server).await;
        let result = client.generate_speech(&json!({ "text": "Hola" })).await;

        assert!(matches!(result, Err(AiError::Decode(_))));
    }
}
