use std::{fmt::Display, str::FromStr};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// The type used for primary keys in the database.
pub type PrimaryKey = i64;

/// What a user is allowed to do
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    #[default]
    User,
    Admin,
}

/// Who wrote a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Sender {
    User,
    #[serde(rename = "AI")]
    Ai,
}

/// A lingo account
#[derive(Debug, Clone)]
pub struct UserData {
    pub id: PrimaryKey,
    pub email: String,
    pub name: String,
    /// Subject of the identity provider account this user signed in with
    pub google_id: Option<String>,
    pub password_hash: Option<String>,
    pub role: Role,
    pub onboarding_complete: bool,
    pub target_language: Option<String>,
    pub proficiency_level: Option<String>,
    pub talk_topics: Vec<String>,
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A user's practice profile for a single language.
/// Note: `user_id` and `language` are unique together.
#[derive(Debug, Clone)]
pub struct LanguageDashboardData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub language: String,
    pub proficiency_level: Option<String>,
    pub talk_topics: Vec<String>,
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
    /// The language feedback is written in
    pub feedback_language: Option<String>,
    /// Playback rate of synthesized speech, 1.0 being normal
    pub speech_speed: f64,
    /// Exactly one dashboard per user is primary
    pub is_primary: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A reusable conversational character
#[derive(Debug, Clone)]
pub struct PersonaData {
    pub id: PrimaryKey,
    /// Anonymous personas have no owner
    pub user_id: Option<PrimaryKey>,
    pub name: String,
    pub description: Option<String>,
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub language: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A practice conversation
#[derive(Debug, Clone)]
pub struct ConversationData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub language_dashboard_id: PrimaryKey,
    /// The language of the dashboard this conversation belongs to
    pub language: String,
    /// Display name of the owner
    pub owner_name: String,
    pub persona_id: Option<PrimaryKey>,
    pub title: String,
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub synopsis: Option<String>,
    pub message_count: i64,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

/// A single line in a conversation
#[derive(Debug, Clone)]
pub struct MessageData {
    pub id: PrimaryKey,
    pub conversation_id: PrimaryKey,
    pub sender: Sender,
    pub text: String,
    pub audio_path: Option<String>,
    /// Feedback generated for this message, attached after the fact
    pub detailed_feedback: Option<Value>,
    /// Unique and strictly increasing within a conversation
    pub message_order: i64,
    pub created_at: DateTime<Utc>,
}

/// A conversation along with all of its messages in order
#[derive(Debug, Clone)]
pub struct ConversationWithMessages {
    pub conversation: ConversationData,
    pub messages: Vec<MessageData>,
}

/// A snapshot of a chat history, kept for clients that predate conversations
#[derive(Debug, Clone)]
pub struct ChatSessionData {
    pub id: PrimaryKey,
    pub user_id: PrimaryKey,
    pub language: Option<String>,
    pub chat_history: Value,
    pub created_at: DateTime<Utc>,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::User => "user",
            Role::Admin => "admin",
        }
    }
}

impl FromStr for Role {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "user" => Ok(Role::User),
            "admin" => Ok(Role::Admin),
            other => Err(format!("Unknown role {other}")),
        }
    }
}

impl Sender {
    pub fn as_str(&self) -> &'static str {
        match self {
            Sender::User => "User",
            Sender::Ai => "AI",
        }
    }
}

impl FromStr for Sender {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "User" => Ok(Sender::User),
            "AI" => Ok(Sender::Ai),
            other => Err(format!("Unknown sender {other}")),
        }
    }
}

impl Display for Sender {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}
