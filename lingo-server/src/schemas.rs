use axum::{
    async_trait,
    extract::{FromRequest, Request},
    Json,
};
use serde::{de::DeserializeOwned, Deserialize};
use serde_json::{Map, Value};
use utoipa::ToSchema;
use validator::{Validate, ValidationErrors};

use lingo_core::{
    ConversationDraft, DashboardSettings, MessageDraft, Onboarding, PersonaFields, PrimaryKey,
    ProfileChanges, Sender,
};

use crate::errors::ServerError;

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct LoginSchema {
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(max = 128))]
    pub password: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase", deny_unknown_fields)]
pub struct RegisterSchema {
    #[validate(email, length(max = 254))]
    pub email: String,
    #[validate(length(min = 8, max = 128))]
    pub password: String,
    #[validate(length(min = 1, max = 128))]
    pub name: String,
}

/// A token issued by the identity provider
#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExchangeSchema {
    #[validate(length(min = 1))]
    pub token: String,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProfileSchema {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(length(min = 1, max = 64))]
    pub target_language: Option<String>,
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OnboardingSchema {
    #[validate(length(min = 1, max = 64))]
    pub target_language: String,
    pub proficiency_level: Option<String>,
    #[serde(default)]
    pub talk_topics: Vec<String>,
    #[serde(default)]
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewDashboardSchema {
    #[validate(length(min = 1, max = 64))]
    pub language: String,
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    #[validate(range(min = 0.25, max = 4.0))]
    pub speech_speed: Option<f64>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct DashboardSettingsSchema {
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    #[validate(range(min = 0.25, max = 4.0))]
    pub speech_speed: Option<f64>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewConversationSchema {
    #[validate(length(min = 1, max = 64))]
    pub language: String,
    #[validate(length(max = 200))]
    pub title: Option<String>,
    #[serde(default)]
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub synopsis: Option<String>,
    pub persona_id: Option<PrimaryKey>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
pub struct TitleSchema {
    #[validate(length(max = 200))]
    pub title: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
pub struct SynopsisSchema {
    pub synopsis: Option<String>,
}

/// A missing or null persona id removes the persona
#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConversationPersonaSchema {
    pub persona_id: Option<PrimaryKey>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct NewMessageSchema {
    #[schema(value_type = String, example = "User")]
    pub sender: Sender,
    #[validate(length(min = 1))]
    pub text: String,
    pub audio_path: Option<String>,
    #[schema(value_type = Option<Object>)]
    pub detailed_feedback: Option<Value>,
    #[validate(range(min = 1))]
    pub message_order: Option<i64>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageFeedbackSchema {
    #[schema(value_type = Object)]
    pub detailed_feedback: Value,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PersonaSchema {
    #[validate(length(min = 1, max = 128))]
    pub name: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub topics: Option<Vec<String>>,
    pub formality: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, ToSchema, Validate, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ChatSessionSchema {
    pub language: Option<String>,
    #[schema(value_type = Vec<Object>)]
    pub chat_history: Value,
}

/// A free-form body relayed to the AI backend
#[derive(Debug, ToSchema, Deserialize)]
#[serde(transparent)]
pub struct ProxySchema(#[schema(value_type = Object)] pub Map<String, Value>);

impl Validate for ProxySchema {
    fn validate(&self) -> Result<(), ValidationErrors> {
        Ok(())
    }
}

pub struct ValidatedJson<T>(pub T);

#[async_trait]
impl<S, T> FromRequest<S> for ValidatedJson<T>
where
    S: Send + Sync,
    T: DeserializeOwned + Validate,
{
    type Rejection = ServerError;

    async fn from_request(req: Request, state: &S) -> Result<Self, Self::Rejection> {
        let extracted_json: Json<T> = Json::from_request(req, state)
            .await
            .map_err(|e| ServerError::Validation(e.body_text()))?;

        extracted_json
            .0
            .validate()
            .map_err(|e| ServerError::Validation(e.to_string()))?;

        Ok(Self(extracted_json.0))
    }
}

impl From<ProfileSchema> for ProfileChanges {
    fn from(value: ProfileSchema) -> Self {
        Self {
            name: value.name,
            target_language: value.target_language,
            proficiency_level: value.proficiency_level,
            talk_topics: value.talk_topics,
            learning_goals: value.learning_goals,
            practice_preference: value.practice_preference,
        }
    }
}

impl From<OnboardingSchema> for Onboarding {
    fn from(value: OnboardingSchema) -> Self {
        Self {
            target_language: value.target_language,
            proficiency_level: value.proficiency_level,
            talk_topics: value.talk_topics,
            learning_goals: value.learning_goals,
            practice_preference: value.practice_preference,
        }
    }
}

impl NewDashboardSchema {
    pub fn into_parts(self) -> (String, DashboardSettings) {
        let settings = DashboardSettings {
            proficiency_level: self.proficiency_level,
            talk_topics: self.talk_topics,
            learning_goals: self.learning_goals,
            practice_preference: self.practice_preference,
            feedback_language: self.feedback_language,
            speech_speed: self.speech_speed,
        };

        (self.language, settings)
    }
}

impl From<DashboardSettingsSchema> for DashboardSettings {
    fn from(value: DashboardSettingsSchema) -> Self {
        Self {
            proficiency_level: value.proficiency_level,
            talk_topics: value.talk_topics,
            learning_goals: value.learning_goals,
            practice_preference: value.practice_preference,
            feedback_language: value.feedback_language,
            speech_speed: value.speech_speed,
        }
    }
}

impl From<NewConversationSchema> for ConversationDraft {
    fn from(value: NewConversationSchema) -> Self {
        Self {
            language: value.language,
            title: value.title,
            topics: value.topics,
            formality: value.formality,
            synopsis: value.synopsis,
            persona_id: value.persona_id,
        }
    }
}

impl From<NewMessageSchema> for MessageDraft {
    fn from(value: NewMessageSchema) -> Self {
        Self {
            sender: value.sender,
            text: value.text,
            audio_path: value.audio_path,
            detailed_feedback: value.detailed_feedback,
            message_order: value.message_order,
        }
    }
}

impl From<PersonaSchema> for PersonaFields {
    fn from(value: PersonaSchema) -> Self {
        Self {
            name: value.name,
            description: value.description,
            topics: value.topics,
            formality: value.formality,
            language: value.language,
        }
    }
}
