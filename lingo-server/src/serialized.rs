//! All schemas that are exposed from endpoints are defined here
//! along with the From<T> impls

use chrono::{DateTime, NaiveDate, Utc};
use lingo_core::{
    ChatSessionData, ConversationData, ConversationWithMessages, LanguageDashboardData,
    MessageData, PersonaData, PrimaryKey, SignedIn, Streak as CoreStreak, UserData,
};
use serde::Serialize;
use serde_json::Value;
use utoipa::ToSchema;

/// The body of every error response
#[derive(Debug, Serialize, ToSchema)]
pub struct ErrorBody {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<String>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct User {
    id: PrimaryKey,
    email: String,
    name: String,
    #[schema(example = "user")]
    role: String,
    onboarding_complete: bool,
    target_language: Option<String>,
    proficiency_level: Option<String>,
    talk_topics: Vec<String>,
    learning_goals: Vec<String>,
    practice_preference: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct LoginResult {
    token: String,
    user: User,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct LanguageDashboard {
    id: PrimaryKey,
    language: String,
    proficiency_level: Option<String>,
    talk_topics: Vec<String>,
    learning_goals: Vec<String>,
    practice_preference: Option<String>,
    feedback_language: Option<String>,
    speech_speed: f64,
    is_primary: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
pub struct OnboardingResult {
    pub user: User,
    pub dashboard: LanguageDashboard,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Persona {
    id: PrimaryKey,
    /// Anonymous personas have no owner
    user_id: Option<PrimaryKey>,
    name: String,
    description: Option<String>,
    topics: Vec<String>,
    formality: Option<String>,
    language: Option<String>,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Conversation {
    id: PrimaryKey,
    user_id: PrimaryKey,
    language_dashboard_id: PrimaryKey,
    language: String,
    owner_name: String,
    persona_id: Option<PrimaryKey>,
    title: String,
    topics: Vec<String>,
    formality: Option<String>,
    synopsis: Option<String>,
    message_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

/// A conversation along with its messages in order
#[derive(Debug, Serialize, ToSchema)]
pub struct ConversationDetail {
    #[serde(flatten)]
    conversation: Conversation,
    messages: Vec<Message>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    id: PrimaryKey,
    conversation_id: PrimaryKey,
    #[schema(example = "AI")]
    sender: String,
    text: String,
    audio_path: Option<String>,
    #[schema(value_type = Option<Object>)]
    detailed_feedback: Option<Value>,
    message_order: i64,
    created_at: DateTime<Utc>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct Streak {
    streak: u32,
    last_active: Option<NaiveDate>,
    /// Every active day, most recent first
    days: Vec<NaiveDate>,
}

#[derive(Debug, Serialize, ToSchema)]
#[serde(rename_all = "camelCase")]
pub struct ChatSession {
    id: PrimaryKey,
    language: Option<String>,
    #[schema(value_type = Vec<Object>)]
    chat_history: Value,
    created_at: DateTime<Utc>,
}

/// Helper trait to convert any type into a serialized version
pub trait ToSerialized<T>
where
    T: Serialize,
{
    fn to_serialized(&self) -> T;
}

impl<I, O> ToSerialized<Vec<O>> for Vec<I>
where
    I: ToSerialized<O>,
    O: Serialize,
{
    fn to_serialized(&self) -> Vec<O> {
        self.iter().map(|x| x.to_serialized()).collect()
    }
}

impl ToSerialized<User> for UserData {
    fn to_serialized(&self) -> User {
        User {
            id: self.id,
            email: self.email.clone(),
            name: self.name.clone(),
            role: self.role.as_str().to_string(),
            onboarding_complete: self.onboarding_complete,
            target_language: self.target_language.clone(),
            proficiency_level: self.proficiency_level.clone(),
            talk_topics: self.talk_topics.clone(),
            learning_goals: self.learning_goals.clone(),
            practice_preference: self.practice_preference.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<LoginResult> for SignedIn {
    fn to_serialized(&self) -> LoginResult {
        LoginResult {
            token: self.token.clone(),
            user: self.user.to_serialized(),
        }
    }
}

impl ToSerialized<LanguageDashboard> for LanguageDashboardData {
    fn to_serialized(&self) -> LanguageDashboard {
        LanguageDashboard {
            id: self.id,
            language: self.language.clone(),
            proficiency_level: self.proficiency_level.clone(),
            talk_topics: self.talk_topics.clone(),
            learning_goals: self.learning_goals.clone(),
            practice_preference: self.practice_preference.clone(),
            feedback_language: self.feedback_language.clone(),
            speech_speed: self.speech_speed,
            is_primary: self.is_primary,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl ToSerialized<Persona> for PersonaData {
    fn to_serialized(&self) -> Persona {
        Persona {
            id: self.id,
            user_id: self.user_id,
            name: self.name.clone(),
            description: self.description.clone(),
            topics: self.topics.clone(),
            formality: self.formality.clone(),
            language: self.language.clone(),
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Conversation> for ConversationData {
    fn to_serialized(&self) -> Conversation {
        Conversation {
            id: self.id,
            user_id: self.user_id,
            language_dashboard_id: self.language_dashboard_id,
            language: self.language.clone(),
            owner_name: self.owner_name.clone(),
            persona_id: self.persona_id,
            title: self.title.clone(),
            topics: self.topics.clone(),
            formality: self.formality.clone(),
            synopsis: self.synopsis.clone(),
            message_count: self.message_count,
            created_at: self.created_at,
            updated_at: self.updated_at,
        }
    }
}

impl ToSerialized<ConversationDetail> for ConversationWithMessages {
    fn to_serialized(&self) -> ConversationDetail {
        ConversationDetail {
            conversation: self.conversation.to_serialized(),
            messages: self.messages.to_serialized(),
        }
    }
}

impl ToSerialized<Message> for MessageData {
    fn to_serialized(&self) -> Message {
        Message {
            id: self.id,
            conversation_id: self.conversation_id,
            sender: self.sender.to_string(),
            text: self.text.clone(),
            audio_path: self.audio_path.clone(),
            detailed_feedback: self.detailed_feedback.clone(),
            message_order: self.message_order,
            created_at: self.created_at,
        }
    }
}

impl ToSerialized<Streak> for CoreStreak {
    fn to_serialized(&self) -> Streak {
        Streak {
            streak: self.streak,
            last_active: self.last_active,
            days: self.days.clone(),
        }
    }
}

impl ToSerialized<ChatSession> for ChatSessionData {
    fn to_serialized(&self) -> ChatSession {
        ChatSession {
            id: self.id,
            language: self.language.clone(),
            chat_history: self.chat_history.clone(),
            created_at: self.created_at,
        }
    }
}
