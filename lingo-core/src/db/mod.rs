use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde_json::Value;
use thiserror::Error;

mod data;
pub use data::*;

mod migrations;

mod sqlite;
pub use sqlite::*;

pub type Result<T> = std::result::Result<T, DatabaseError>;
pub type SharedDatabase = Arc<dyn Database>;

#[derive(Debug, Error)]
pub enum DatabaseError {
    /// An unknown or internal error happened with the database
    #[error(transparent)]
    Internal(Box<dyn std::error::Error + Send + Sync>),
    /// A resource already exists
    #[error("{resource} with {field} of value {value} already exists")]
    Conflict {
        /// The resource in question
        resource: &'static str,
        /// The field that is conflicting
        field: &'static str,
        /// The conflicting value
        value: String,
    },
    /// A resource in the database doesn't exist
    #[error("{resource}:{identifier} doesn't exist")]
    NotFound {
        resource: &'static str,
        identifier: &'static str,
    },
}

/// Helper trait to reduce boilerplate
pub trait IntoDatabaseError {
    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError;
    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str)
        -> DatabaseError;
    fn any(self) -> DatabaseError;
}

/// Helper trait to reduce boilerplate
pub trait DatabaseResult {
    /// Turns the Result into a conflict error if it's Ok()
    fn conflict_or_ok(self, resource: &'static str, field: &'static str, value: &str)
        -> Result<()>;
}

impl<T> DatabaseResult for Result<T> {
    fn conflict_or_ok(
        self,
        resource: &'static str,
        field: &'static str,
        value: &str,
    ) -> Result<()> {
        match self {
            Ok(_) => Err(DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            }),
            Err(e) => match e {
                DatabaseError::NotFound {
                    resource: _,
                    identifier: _,
                } => Ok(()),
                e => Err(e),
            },
        }
    }
}

/// Represents a type that can store and fetch lingo data
#[async_trait]
pub trait Database: Send + Sync {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData>;
    async fn user_by_email(&self, email: &str) -> Result<UserData>;
    async fn user_by_google_id(&self, google_id: &str) -> Result<UserData>;
    async fn create_user(&self, new_user: NewUser) -> Result<UserData>;
    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData>;
    /// Deletes a user and everything they own
    async fn delete_user(&self, user_id: PrimaryKey) -> Result<()>;

    async fn dashboard_by_id(&self, dashboard_id: PrimaryKey) -> Result<LanguageDashboardData>;
    async fn dashboard_by_language(
        &self,
        user_id: PrimaryKey,
        language: &str,
    ) -> Result<LanguageDashboardData>;
    async fn list_dashboards(&self, user_id: PrimaryKey) -> Result<Vec<LanguageDashboardData>>;
    /// Creates a dashboard, marking it primary if it is the user's first
    async fn create_dashboard(&self, new_dashboard: NewDashboard)
        -> Result<LanguageDashboardData>;
    async fn update_dashboard(
        &self,
        updated_dashboard: UpdatedDashboard,
    ) -> Result<LanguageDashboardData>;
    async fn set_primary_dashboard(&self, dashboard_id: PrimaryKey)
        -> Result<LanguageDashboardData>;
    /// Deletes a dashboard along with its conversations and their messages.
    /// If the dashboard was primary, the oldest remaining one becomes primary.
    /// Fails with a conflict if it is the user's only dashboard.
    async fn delete_dashboard(&self, dashboard_id: PrimaryKey) -> Result<()>;

    async fn persona_by_id(&self, persona_id: PrimaryKey) -> Result<PersonaData>;
    /// Lists the personas owned by the user, along with anonymous ones
    async fn list_personas(&self, user_id: Option<PrimaryKey>) -> Result<Vec<PersonaData>>;
    async fn create_persona(&self, new_persona: NewPersona) -> Result<PersonaData>;
    async fn update_persona(&self, updated_persona: UpdatedPersona) -> Result<PersonaData>;
    async fn delete_persona(&self, persona_id: PrimaryKey) -> Result<()>;

    async fn conversation_by_id(&self, conversation_id: PrimaryKey) -> Result<ConversationData>;
    /// Returns [None] if the conversation doesn't exist
    async fn conversation_with_messages(
        &self,
        conversation_id: PrimaryKey,
    ) -> Result<Option<ConversationWithMessages>>;
    async fn list_conversations(
        &self,
        user_id: PrimaryKey,
        language: Option<&str>,
    ) -> Result<Vec<ConversationData>>;
    async fn create_conversation(
        &self,
        new_conversation: NewConversation,
    ) -> Result<ConversationData>;
    async fn update_conversation(
        &self,
        updated_conversation: UpdatedConversation,
    ) -> Result<ConversationData>;
    async fn delete_conversation(&self, conversation_id: PrimaryKey) -> Result<()>;

    async fn message_by_id(&self, message_id: PrimaryKey) -> Result<MessageData>;
    async fn list_messages(&self, conversation_id: PrimaryKey) -> Result<Vec<MessageData>>;
    /// Appends a message and bumps the conversation's counter in one transaction
    async fn add_message(&self, new_message: NewMessage) -> Result<MessageData>;
    /// Appends messages in order, all or none of them
    async fn add_messages(&self, new_messages: Vec<NewMessage>) -> Result<Vec<MessageData>>;
    async fn set_message_feedback(
        &self,
        message_id: PrimaryKey,
        feedback: Value,
    ) -> Result<MessageData>;
    /// Timestamps of every message the user sent in conversations of the given language
    async fn message_timestamps(
        &self,
        user_id: PrimaryKey,
        language: &str,
    ) -> Result<Vec<DateTime<Utc>>>;

    async fn create_chat_session(&self, new_session: NewChatSession) -> Result<ChatSessionData>;
    async fn latest_chat_session(&self, user_id: PrimaryKey) -> Result<ChatSessionData>;
}

#[derive(Debug, Default)]
pub struct NewUser {
    pub email: String,
    pub name: String,
    pub google_id: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
}

#[derive(Debug, Default)]
pub struct UpdatedUser {
    pub id: PrimaryKey,
    pub name: Option<String>,
    pub google_id: Option<String>,
    pub onboarding_complete: Option<bool>,
    pub target_language: Option<String>,
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
}

#[derive(Debug, Default)]
pub struct NewDashboard {
    pub user_id: PrimaryKey,
    pub language: String,
    pub proficiency_level: Option<String>,
    pub talk_topics: Vec<String>,
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    pub speech_speed: Option<f64>,
}

#[derive(Debug, Default)]
pub struct UpdatedDashboard {
    pub id: PrimaryKey,
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    pub speech_speed: Option<f64>,
}

#[derive(Debug, Default)]
pub struct NewPersona {
    /// The owner of the new persona, if any
    pub user_id: Option<PrimaryKey>,
    pub name: String,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Default)]
pub struct UpdatedPersona {
    pub id: PrimaryKey,
    pub name: Option<String>,
    pub description: Option<String>,
    pub topics: Option<Vec<String>>,
    pub formality: Option<String>,
    pub language: Option<String>,
}

#[derive(Debug, Default)]
pub struct NewConversation {
    /// The owner of the new conversation
    pub user_id: PrimaryKey,
    /// Resolved to the owner's dashboard for this language
    pub language: String,
    pub title: String,
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub synopsis: Option<String>,
    pub persona_id: Option<PrimaryKey>,
}

#[derive(Debug, Default)]
pub struct UpdatedConversation {
    pub id: PrimaryKey,
    pub title: Option<String>,
    pub synopsis: Option<String>,
    /// `Some(None)` clears the persona
    pub persona_id: Option<Option<PrimaryKey>>,
}

#[derive(Debug, Clone)]
pub struct NewMessage {
    pub conversation_id: PrimaryKey,
    pub sender: Sender,
    pub text: String,
    pub audio_path: Option<String>,
    pub detailed_feedback: Option<Value>,
    /// Must be greater than every existing order in the conversation.
    /// Assigned as `max + 1` when omitted.
    pub message_order: Option<i64>,
}

#[derive(Debug)]
pub struct NewChatSession {
    pub user_id: PrimaryKey,
    pub language: Option<String>,
    pub chat_history: Value,
}
