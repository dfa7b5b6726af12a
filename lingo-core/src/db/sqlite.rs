use std::str::FromStr;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use log::info;
use serde_json::Value;
use sqlx::{
    query, query_as, query_scalar,
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    types::Json,
    Error as SqlxError, FromRow, SqliteConnection, SqlitePool,
};

use crate::{
    ChatSessionData, ConversationData, ConversationWithMessages, Database, DatabaseError,
    DatabaseResult, IntoDatabaseError, LanguageDashboardData, MessageData, NewChatSession,
    NewConversation, NewDashboard, NewMessage, NewPersona, NewUser, PersonaData, PrimaryKey,
    Result, UpdatedConversation, UpdatedDashboard, UpdatedPersona, UpdatedUser, UserData,
};

use super::migrations::run_migrations;

const CONVERSATION_SELECT: &str = "
    SELECT
        conversations.*,
        language_dashboards.language,
        users.name AS owner_name
    FROM conversations
        INNER JOIN language_dashboards ON conversations.language_dashboard_id = language_dashboards.id
        INNER JOIN users ON conversations.user_id = users.id";

/// A SQLite database implementation for lingo
pub struct SqliteDatabase {
    pool: SqlitePool,
}

impl SqliteDatabase {
    pub async fn new(url: &str) -> Result<Self> {
        let options = SqliteConnectOptions::from_str(url)
            .map_err(|e| e.any())?
            .create_if_missing(true)
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await
            .map_err(|e| e.any())?;

        info!("Connected to database at {}", url);
        Self::with_pool(pool).await
    }

    /// Creates a private in-memory database that lives as long as the returned value
    pub async fn in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")
            .map_err(|e| e.any())?
            .foreign_keys(true);

        // Every connection to :memory: is its own database, so there can only be one
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .min_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await
            .map_err(|e| e.any())?;

        Self::with_pool(pool).await
    }

    async fn with_pool(pool: SqlitePool) -> Result<Self> {
        run_migrations(&pool).await.map_err(|e| e.any())?;
        Ok(Self { pool })
    }
}

#[async_trait]
impl Database for SqliteDatabase {
    async fn user_by_id(&self, user_id: PrimaryKey) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE id = ?")
            .bind(user_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "id"))?
            .try_into()
    }

    async fn user_by_email(&self, email: &str) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE email = ?")
            .bind(email)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "email"))?
            .try_into()
    }

    async fn user_by_google_id(&self, google_id: &str) -> Result<UserData> {
        query_as::<_, UserRow>("SELECT * FROM users WHERE google_id = ?")
            .bind(google_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("user", "google_id"))?
            .try_into()
    }

    async fn create_user(&self, new_user: NewUser) -> Result<UserData> {
        self.user_by_email(&new_user.email)
            .await
            .conflict_or_ok("user", "email", &new_user.email)?;

        let now = Utc::now();
        let id: PrimaryKey = query_scalar(
            "INSERT INTO users (email, name, google_id, password_hash, role, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(&new_user.email)
        .bind(&new_user.name)
        .bind(&new_user.google_id)
        .bind(&new_user.password_hash)
        .bind(new_user.role.as_str())
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.conflict_or("user", "email", &new_user.email))?;

        self.user_by_id(id).await
    }

    async fn update_user(&self, updated_user: UpdatedUser) -> Result<UserData> {
        let user = self.user_by_id(updated_user.id).await?;

        query(
            "UPDATE users SET
                name = ?,
                google_id = ?,
                onboarding_complete = ?,
                target_language = ?,
                proficiency_level = ?,
                talk_topics = ?,
                learning_goals = ?,
                practice_preference = ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(updated_user.name.unwrap_or(user.name))
        .bind(updated_user.google_id.or(user.google_id))
        .bind(
            updated_user
                .onboarding_complete
                .unwrap_or(user.onboarding_complete),
        )
        .bind(updated_user.target_language.or(user.target_language))
        .bind(updated_user.proficiency_level.or(user.proficiency_level))
        .bind(Json(updated_user.talk_topics.unwrap_or(user.talk_topics)))
        .bind(Json(
            updated_user.learning_goals.unwrap_or(user.learning_goals),
        ))
        .bind(
            updated_user
                .practice_preference
                .or(user.practice_preference),
        )
        .bind(Utc::now())
        .bind(updated_user.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.user_by_id(updated_user.id).await
    }

    async fn delete_user(&self, user_id: PrimaryKey) -> Result<()> {
        // Ensure user exists
        let _ = self.user_by_id(user_id).await?;

        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        // Owned personas would otherwise become anonymous
        query("DELETE FROM personas WHERE user_id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        // Dashboards, conversations, messages and chat sessions cascade
        query("DELETE FROM users WHERE id = ?")
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }

    async fn dashboard_by_id(&self, dashboard_id: PrimaryKey) -> Result<LanguageDashboardData> {
        query_as::<_, DashboardRow>("SELECT * FROM language_dashboards WHERE id = ?")
            .bind(dashboard_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("language dashboard", "id"))
    }

    async fn dashboard_by_language(
        &self,
        user_id: PrimaryKey,
        language: &str,
    ) -> Result<LanguageDashboardData> {
        query_as::<_, DashboardRow>(
            "SELECT * FROM language_dashboards WHERE user_id = ? AND language = ?",
        )
        .bind(user_id)
        .bind(language)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("language dashboard", "language"))
    }

    async fn list_dashboards(&self, user_id: PrimaryKey) -> Result<Vec<LanguageDashboardData>> {
        let rows = query_as::<_, DashboardRow>(
            "SELECT * FROM language_dashboards
            WHERE user_id = ?
            ORDER BY is_primary DESC, created_at ASC, id ASC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_dashboard(
        &self,
        new_dashboard: NewDashboard,
    ) -> Result<LanguageDashboardData> {
        let _ = self.user_by_id(new_dashboard.user_id).await?;

        self.dashboard_by_language(new_dashboard.user_id, &new_dashboard.language)
            .await
            .conflict_or_ok("language dashboard", "language", &new_dashboard.language)?;

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        let existing: i64 =
            query_scalar("SELECT COUNT(*) FROM language_dashboards WHERE user_id = ?")
                .bind(new_dashboard.user_id)
                .fetch_one(&mut *tx)
                .await
                .map_err(|e| e.any())?;

        let id: PrimaryKey = query_scalar(
            "INSERT INTO language_dashboards (
                user_id, language, proficiency_level, talk_topics, learning_goals,
                practice_preference, feedback_language, speech_speed, is_primary,
                created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(new_dashboard.user_id)
        .bind(&new_dashboard.language)
        .bind(&new_dashboard.proficiency_level)
        .bind(Json(&new_dashboard.talk_topics))
        .bind(Json(&new_dashboard.learning_goals))
        .bind(&new_dashboard.practice_preference)
        .bind(&new_dashboard.feedback_language)
        .bind(new_dashboard.speech_speed.unwrap_or(1.0))
        .bind(existing == 0)
        .bind(now)
        .bind(now)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| e.conflict_or("language dashboard", "language", &new_dashboard.language))?;

        tx.commit().await.map_err(|e| e.any())?;

        self.dashboard_by_id(id).await
    }

    async fn update_dashboard(
        &self,
        updated_dashboard: UpdatedDashboard,
    ) -> Result<LanguageDashboardData> {
        let dashboard = self.dashboard_by_id(updated_dashboard.id).await?;

        query(
            "UPDATE language_dashboards SET
                proficiency_level = ?,
                talk_topics = ?,
                learning_goals = ?,
                practice_preference = ?,
                feedback_language = ?,
                speech_speed = ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(
            updated_dashboard
                .proficiency_level
                .or(dashboard.proficiency_level),
        )
        .bind(Json(
            updated_dashboard
                .talk_topics
                .unwrap_or(dashboard.talk_topics),
        ))
        .bind(Json(
            updated_dashboard
                .learning_goals
                .unwrap_or(dashboard.learning_goals),
        ))
        .bind(
            updated_dashboard
                .practice_preference
                .or(dashboard.practice_preference),
        )
        .bind(
            updated_dashboard
                .feedback_language
                .or(dashboard.feedback_language),
        )
        .bind(
            updated_dashboard
                .speech_speed
                .unwrap_or(dashboard.speech_speed),
        )
        .bind(Utc::now())
        .bind(updated_dashboard.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.dashboard_by_id(updated_dashboard.id).await
    }

    async fn set_primary_dashboard(
        &self,
        dashboard_id: PrimaryKey,
    ) -> Result<LanguageDashboardData> {
        let dashboard = self.dashboard_by_id(dashboard_id).await?;

        // One statement, so there is never a moment with zero or two primaries
        query(
            "UPDATE language_dashboards SET
                is_primary = (id = ?),
                updated_at = ?
            WHERE user_id = ?",
        )
        .bind(dashboard_id)
        .bind(Utc::now())
        .bind(dashboard.user_id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.dashboard_by_id(dashboard_id).await
    }

    async fn delete_dashboard(&self, dashboard_id: PrimaryKey) -> Result<()> {
        let dashboard = self.dashboard_by_id(dashboard_id).await?;
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        // The count and the delete happen in one statement under the write lock.
        // Conversations and their messages cascade.
        let deleted = query(
            "DELETE FROM language_dashboards
            WHERE id = ?
            AND (SELECT COUNT(*) FROM language_dashboards WHERE user_id = ?) > 1",
        )
        .bind(dashboard_id)
        .bind(dashboard.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?
        .rows_affected();

        if deleted == 0 {
            return Err(DatabaseError::Conflict {
                resource: "language_dashboard",
                field: "user_id",
                value: dashboard.user_id.to_string(),
            });
        }

        // Promote the oldest remaining dashboard if the primary one is gone
        query(
            "UPDATE language_dashboards SET is_primary = 1, updated_at = ?
            WHERE id = (
                SELECT id FROM language_dashboards
                WHERE user_id = ?
                ORDER BY created_at ASC, id ASC
                LIMIT 1
            )
            AND NOT EXISTS (
                SELECT 1 FROM language_dashboards WHERE user_id = ? AND is_primary = 1
            )",
        )
        .bind(Utc::now())
        .bind(dashboard.user_id)
        .bind(dashboard.user_id)
        .execute(&mut *tx)
        .await
        .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }

    async fn persona_by_id(&self, persona_id: PrimaryKey) -> Result<PersonaData> {
        query_as::<_, PersonaRow>("SELECT * FROM personas WHERE id = ?")
            .bind(persona_id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("persona", "id"))
    }

    async fn list_personas(&self, user_id: Option<PrimaryKey>) -> Result<Vec<PersonaData>> {
        let rows = query_as::<_, PersonaRow>(
            "SELECT * FROM personas
            WHERE user_id IS NULL OR user_id = ?
            ORDER BY created_at DESC, id DESC",
        )
        .bind(user_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_persona(&self, new_persona: NewPersona) -> Result<PersonaData> {
        let now = Utc::now();
        let id: PrimaryKey = query_scalar(
            "INSERT INTO personas (user_id, name, description, topics, formality, language, created_at, updated_at)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            RETURNING id",
        )
        .bind(new_persona.user_id)
        .bind(&new_persona.name)
        .bind(&new_persona.description)
        .bind(Json(&new_persona.topics))
        .bind(&new_persona.formality)
        .bind(&new_persona.language)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.persona_by_id(id).await
    }

    async fn update_persona(&self, updated_persona: UpdatedPersona) -> Result<PersonaData> {
        let persona = self.persona_by_id(updated_persona.id).await?;

        query(
            "UPDATE personas SET
                name = ?,
                description = ?,
                topics = ?,
                formality = ?,
                language = ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(updated_persona.name.unwrap_or(persona.name))
        .bind(updated_persona.description.or(persona.description))
        .bind(Json(updated_persona.topics.unwrap_or(persona.topics)))
        .bind(updated_persona.formality.or(persona.formality))
        .bind(updated_persona.language.or(persona.language))
        .bind(Utc::now())
        .bind(updated_persona.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.persona_by_id(updated_persona.id).await
    }

    async fn delete_persona(&self, persona_id: PrimaryKey) -> Result<()> {
        // Ensure persona exists
        let _ = self.persona_by_id(persona_id).await?;

        // Referencing conversations keep living with their persona cleared
        query("DELETE FROM personas WHERE id = ?")
            .bind(persona_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())
            .map(|_| ())
    }

    async fn conversation_by_id(&self, conversation_id: PrimaryKey) -> Result<ConversationData> {
        query_as::<_, ConversationRow>(&format!(
            "{CONVERSATION_SELECT} WHERE conversations.id = ?"
        ))
        .bind(conversation_id)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("conversation", "id"))
    }

    async fn conversation_with_messages(
        &self,
        conversation_id: PrimaryKey,
    ) -> Result<Option<ConversationWithMessages>> {
        let conversation = match self.conversation_by_id(conversation_id).await {
            Ok(conversation) => conversation,
            Err(DatabaseError::NotFound { .. }) => return Ok(None),
            Err(e) => return Err(e),
        };

        let messages = self.list_messages(conversation_id).await?;

        Ok(Some(ConversationWithMessages {
            conversation,
            messages,
        }))
    }

    async fn list_conversations(
        &self,
        user_id: PrimaryKey,
        language: Option<&str>,
    ) -> Result<Vec<ConversationData>> {
        let rows = query_as::<_, ConversationRow>(&format!(
            "{CONVERSATION_SELECT}
            WHERE conversations.user_id = ?
                AND (? IS NULL OR language_dashboards.language = ?)
            ORDER BY conversations.updated_at DESC, conversations.id DESC"
        ))
        .bind(user_id)
        .bind(language)
        .bind(language)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    async fn create_conversation(
        &self,
        new_conversation: NewConversation,
    ) -> Result<ConversationData> {
        let dashboard = self
            .dashboard_by_language(new_conversation.user_id, &new_conversation.language)
            .await?;

        if let Some(persona_id) = new_conversation.persona_id {
            let _ = self.persona_by_id(persona_id).await?;
        }

        let now = Utc::now();
        let id: PrimaryKey = query_scalar(
            "INSERT INTO conversations (
                user_id, language_dashboard_id, persona_id, title, topics, formality,
                synopsis, message_count, created_at, updated_at
            )
            VALUES (?, ?, ?, ?, ?, ?, ?, 0, ?, ?)
            RETURNING id",
        )
        .bind(new_conversation.user_id)
        .bind(dashboard.id)
        .bind(new_conversation.persona_id)
        .bind(&new_conversation.title)
        .bind(Json(&new_conversation.topics))
        .bind(&new_conversation.formality)
        .bind(&new_conversation.synopsis)
        .bind(now)
        .bind(now)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.conversation_by_id(id).await
    }

    async fn update_conversation(
        &self,
        updated_conversation: UpdatedConversation,
    ) -> Result<ConversationData> {
        let conversation = self.conversation_by_id(updated_conversation.id).await?;

        if let Some(Some(persona_id)) = updated_conversation.persona_id {
            let _ = self.persona_by_id(persona_id).await?;
        }

        query(
            "UPDATE conversations SET
                title = ?,
                synopsis = ?,
                persona_id = ?,
                updated_at = ?
            WHERE id = ?",
        )
        .bind(updated_conversation.title.unwrap_or(conversation.title))
        .bind(updated_conversation.synopsis.or(conversation.synopsis))
        .bind(
            updated_conversation
                .persona_id
                .unwrap_or(conversation.persona_id),
        )
        .bind(Utc::now())
        .bind(updated_conversation.id)
        .execute(&self.pool)
        .await
        .map_err(|e| e.any())?;

        self.conversation_by_id(updated_conversation.id).await
    }

    async fn delete_conversation(&self, conversation_id: PrimaryKey) -> Result<()> {
        // Ensure conversation exists
        let _ = self.conversation_by_id(conversation_id).await?;

        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;

        query("DELETE FROM messages WHERE conversation_id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        query("DELETE FROM conversations WHERE id = ?")
            .bind(conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;

        tx.commit().await.map_err(|e| e.any())
    }

    async fn message_by_id(&self, message_id: PrimaryKey) -> Result<MessageData> {
        query_as::<_, MessageRow>("SELECT * FROM messages WHERE id = ?")
            .bind(message_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|e| e.not_found_or("message", "id"))?
            .try_into()
    }

    async fn list_messages(&self, conversation_id: PrimaryKey) -> Result<Vec<MessageData>> {
        query_as::<_, MessageRow>(
            "SELECT * FROM messages
            WHERE conversation_id = ?
            ORDER BY message_order ASC, id ASC",
        )
        .bind(conversation_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())?
        .into_iter()
        .map(TryInto::try_into)
        .collect()
    }

    async fn add_message(&self, new_message: NewMessage) -> Result<MessageData> {
        let mut messages = self.add_messages(vec![new_message]).await?;

        messages
            .pop()
            .ok_or(DatabaseError::NotFound {
                resource: "message",
                identifier: "id",
            })
    }

    async fn add_messages(&self, new_messages: Vec<NewMessage>) -> Result<Vec<MessageData>> {
        // Ensure every conversation exists
        for new_message in &new_messages {
            let _ = self.conversation_by_id(new_message.conversation_id).await?;
        }

        let now = Utc::now();
        let mut tx = self.pool.begin().await.map_err(|e| e.any())?;
        let mut message_ids = Vec::with_capacity(new_messages.len());

        for new_message in &new_messages {
            message_ids.push(insert_message(&mut *tx, new_message, now).await?);

            query(
                "UPDATE conversations SET
                    message_count = message_count + 1,
                    updated_at = ?
                WHERE id = ?",
            )
            .bind(now)
            .bind(new_message.conversation_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| e.any())?;
        }

        tx.commit().await.map_err(|e| e.any())?;

        let mut messages = Vec::with_capacity(message_ids.len());

        for message_id in message_ids {
            messages.push(self.message_by_id(message_id).await?);
        }

        Ok(messages)
    }

    async fn set_message_feedback(
        &self,
        message_id: PrimaryKey,
        feedback: Value,
    ) -> Result<MessageData> {
        // Ensure message exists
        let _ = self.message_by_id(message_id).await?;

        query("UPDATE messages SET detailed_feedback = ? WHERE id = ?")
            .bind(Json(feedback))
            .bind(message_id)
            .execute(&self.pool)
            .await
            .map_err(|e| e.any())?;

        self.message_by_id(message_id).await
    }

    async fn message_timestamps(
        &self,
        user_id: PrimaryKey,
        language: &str,
    ) -> Result<Vec<DateTime<Utc>>> {
        query_scalar(
            "SELECT messages.created_at
            FROM messages
                INNER JOIN conversations ON messages.conversation_id = conversations.id
                INNER JOIN language_dashboards ON conversations.language_dashboard_id = language_dashboards.id
            WHERE conversations.user_id = ?
                AND language_dashboards.language = ?
                AND messages.sender = 'User'",
        )
        .bind(user_id)
        .bind(language)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| e.any())
    }

    async fn create_chat_session(&self, new_session: NewChatSession) -> Result<ChatSessionData> {
        let _ = self.user_by_id(new_session.user_id).await?;

        let id: PrimaryKey = query_scalar(
            "INSERT INTO chat_sessions (user_id, language, chat_history, created_at)
            VALUES (?, ?, ?, ?)
            RETURNING id",
        )
        .bind(new_session.user_id)
        .bind(&new_session.language)
        .bind(Json(&new_session.chat_history))
        .bind(Utc::now())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| e.any())?;

        query_as::<_, ChatSessionRow>("SELECT * FROM chat_sessions WHERE id = ?")
            .bind(id)
            .fetch_one(&self.pool)
            .await
            .map(Into::into)
            .map_err(|e| e.not_found_or("chat session", "id"))
    }

    async fn latest_chat_session(&self, user_id: PrimaryKey) -> Result<ChatSessionData> {
        query_as::<_, ChatSessionRow>(
            "SELECT * FROM chat_sessions
            WHERE user_id = ?
            ORDER BY created_at DESC, id DESC
            LIMIT 1",
        )
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map(Into::into)
        .map_err(|e| e.not_found_or("chat session", "user_id"))
    }
}

impl IntoDatabaseError for SqlxError {
    fn any(self) -> DatabaseError {
        DatabaseError::Internal(Box::new(self))
    }

    fn not_found_or(self, resource: &'static str, identifier: &'static str) -> DatabaseError {
        match self {
            SqlxError::RowNotFound => DatabaseError::NotFound {
                resource,
                identifier,
            },
            e => Self::any(e),
        }
    }

    fn conflict_or(self, resource: &'static str, field: &'static str, value: &str) -> DatabaseError {
        match &self {
            SqlxError::Database(e) if e.is_unique_violation() => DatabaseError::Conflict {
                resource,
                field,
                value: value.to_string(),
            },
            _ => Self::any(self),
        }
    }
}

#[derive(FromRow)]
struct UserRow {
    id: PrimaryKey,
    email: String,
    name: String,
    google_id: Option<String>,
    password_hash: Option<String>,
    role: String,
    onboarding_complete: bool,
    target_language: Option<String>,
    proficiency_level: Option<String>,
    talk_topics: Json<Vec<String>>,
    learning_goals: Json<Vec<String>>,
    practice_preference: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct DashboardRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    language: String,
    proficiency_level: Option<String>,
    talk_topics: Json<Vec<String>>,
    learning_goals: Json<Vec<String>>,
    practice_preference: Option<String>,
    feedback_language: Option<String>,
    speech_speed: f64,
    is_primary: bool,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct PersonaRow {
    id: PrimaryKey,
    user_id: Option<PrimaryKey>,
    name: String,
    description: Option<String>,
    topics: Json<Vec<String>>,
    formality: Option<String>,
    language: Option<String>,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ConversationRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    language_dashboard_id: PrimaryKey,
    language: String,
    owner_name: String,
    persona_id: Option<PrimaryKey>,
    title: String,
    topics: Json<Vec<String>>,
    formality: Option<String>,
    synopsis: Option<String>,
    message_count: i64,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct MessageRow {
    id: PrimaryKey,
    conversation_id: PrimaryKey,
    sender: String,
    text: String,
    audio_path: Option<String>,
    detailed_feedback: Option<Json<Value>>,
    message_order: i64,
    created_at: DateTime<Utc>,
}

#[derive(FromRow)]
struct ChatSessionRow {
    id: PrimaryKey,
    user_id: PrimaryKey,
    language: Option<String>,
    chat_history: Json<Value>,
    created_at: DateTime<Utc>,
}

impl TryFrom<UserRow> for UserData {
    type Error = DatabaseError;

    fn try_from(row: UserRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            email: row.email,
            name: row.name,
            google_id: row.google_id,
            password_hash: row.password_hash,
            role: row
                .role
                .parse()
                .map_err(|e: String| DatabaseError::Internal(e.into()))?,
            onboarding_complete: row.onboarding_complete,
            target_language: row.target_language,
            proficiency_level: row.proficiency_level,
            talk_topics: row.talk_topics.0,
            learning_goals: row.learning_goals.0,
            practice_preference: row.practice_preference,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

impl From<DashboardRow> for LanguageDashboardData {
    fn from(row: DashboardRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            language: row.language,
            proficiency_level: row.proficiency_level,
            talk_topics: row.talk_topics.0,
            learning_goals: row.learning_goals.0,
            practice_preference: row.practice_preference,
            feedback_language: row.feedback_language,
            speech_speed: row.speech_speed,
            is_primary: row.is_primary,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<PersonaRow> for PersonaData {
    fn from(row: PersonaRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            name: row.name,
            description: row.description,
            topics: row.topics.0,
            formality: row.formality,
            language: row.language,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl From<ConversationRow> for ConversationData {
    fn from(row: ConversationRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            language_dashboard_id: row.language_dashboard_id,
            language: row.language,
            owner_name: row.owner_name,
            persona_id: row.persona_id,
            title: row.title,
            topics: row.topics.0,
            formality: row.formality,
            synopsis: row.synopsis,
            message_count: row.message_count,
            created_at: row.created_at,
            updated_at: row.updated_at,
        }
    }
}

impl TryFrom<MessageRow> for MessageData {
    type Error = DatabaseError;

    fn try_from(row: MessageRow) -> Result<Self> {
        Ok(Self {
            id: row.id,
            conversation_id: row.conversation_id,
            sender: row
                .sender
                .parse()
                .map_err(|e: String| DatabaseError::Internal(e.into()))?,
            text: row.text,
            audio_path: row.audio_path,
            detailed_feedback: row.detailed_feedback.map(|f| f.0),
            message_order: row.message_order,
            created_at: row.created_at,
        })
    }
}

impl From<ChatSessionRow> for ChatSessionData {
    fn from(row: ChatSessionRow) -> Self {
        Self {
            id: row.id,
            user_id: row.user_id,
            language: row.language,
            chat_history: row.chat_history.0,
            created_at: row.created_at,
        }
    }
}

/// Inserts a message, validating or assigning its order
async fn insert_message(
    conn: &mut SqliteConnection,
    new_message: &NewMessage,
    now: DateTime<Utc>,
) -> Result<PrimaryKey> {
    let detailed_feedback = new_message.detailed_feedback.clone().map(Json);

    match new_message.message_order {
        Some(order) => {
            let current: Option<i64> =
                query_scalar("SELECT MAX(message_order) FROM messages WHERE conversation_id = ?")
                    .bind(new_message.conversation_id)
                    .fetch_one(&mut *conn)
                    .await
                    .map_err(|e| e.any())?;

            if current.is_some_and(|current| order <= current) {
                return Err(DatabaseError::Conflict {
                    resource: "message",
                    field: "message_order",
                    value: order.to_string(),
                });
            }

            query_scalar(
                "INSERT INTO messages (
                    conversation_id, sender, text, audio_path, detailed_feedback,
                    message_order, created_at
                )
                VALUES (?, ?, ?, ?, ?, ?, ?)
                RETURNING id",
            )
            .bind(new_message.conversation_id)
            .bind(new_message.sender.as_str())
            .bind(&new_message.text)
            .bind(&new_message.audio_path)
            .bind(detailed_feedback)
            .bind(order)
            .bind(now)
            .fetch_one(&mut *conn)
            .await
            .map_err(|e| e.conflict_or("message", "message_order", &order.to_string()))
        }
        // The next order is computed by the insert itself
        None => query_scalar(
            "INSERT INTO messages (
                conversation_id, sender, text, audio_path, detailed_feedback,
                message_order, created_at
            )
            SELECT ?, ?, ?, ?, ?, COALESCE(MAX(message_order), 0) + 1, ?
            FROM messages WHERE conversation_id = ?
            RETURNING id",
        )
        .bind(new_message.conversation_id)
        .bind(new_message.sender.as_str())
        .bind(&new_message.text)
        .bind(&new_message.audio_path)
        .bind(detailed_feedback)
        .bind(now)
        .bind(new_message.conversation_id)
        .fetch_one(&mut *conn)
        .await
        .map_err(|e| e.conflict_or("message", "message_order", "next")),
    }
}

#[cfg(test)]
mod test {
    use chrono::Duration;
    use serde_json::json;

    use crate::{Role, Sender};

    use super::*;

    async fn db_with_user(email: &str) -> (SqliteDatabase, UserData) {
        let db = SqliteDatabase::in_memory().await.expect("database opens");
        let user = create_user(&db, email).await;

        (db, user)
    }

    async fn create_user(db: &SqliteDatabase, email: &str) -> UserData {
        db.create_user(NewUser {
            email: email.to_string(),
            name: email.split('@').next().unwrap_or_default().to_string(),
            ..Default::default()
        })
        .await
        .expect("user is created")
    }

    async fn create_dashboard(db: &SqliteDatabase, user_id: PrimaryKey, language: &str) {
        db.create_dashboard(NewDashboard {
            user_id,
            language: language.to_string(),
            ..Default::default()
        })
        .await
        .expect("dashboard is created");
    }

    async fn create_conversation(
        db: &SqliteDatabase,
        user_id: PrimaryKey,
        language: &str,
    ) -> ConversationData {
        db.create_conversation(NewConversation {
            user_id,
            language: language.to_string(),
            title: "At the bakery".to_string(),
            topics: vec!["food".to_string()],
            ..Default::default()
        })
        .await
        .expect("conversation is created")
    }

    fn message(conversation_id: PrimaryKey, text: &str, order: Option<i64>) -> NewMessage {
        NewMessage {
            conversation_id,
            sender: Sender::User,
            text: text.to_string(),
            audio_path: None,
            detailed_feedback: None,
            message_order: order,
        }
    }

    #[tokio::test]
    async fn user_email_is_unique() {
        let (db, user) = db_with_user("ana@example.com").await;

        assert_eq!(user.role, Role::User);
        assert!(user.talk_topics.is_empty());

        let result = db
            .create_user(NewUser {
                email: "ana@example.com".to_string(),
                name: "Other Ana".to_string(),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));
    }

    #[tokio::test]
    async fn partial_user_update_keeps_other_fields() {
        let (db, user) = db_with_user("ana@example.com").await;

        db.update_user(UpdatedUser {
            id: user.id,
            target_language: Some("fr".to_string()),
            talk_topics: Some(vec!["travel".to_string()]),
            ..Default::default()
        })
        .await
        .unwrap();

        let updated = db
            .update_user(UpdatedUser {
                id: user.id,
                proficiency_level: Some("beginner".to_string()),
                ..Default::default()
            })
            .await
            .unwrap();

        assert_eq!(updated.name, "ana");
        assert_eq!(updated.target_language.as_deref(), Some("fr"));
        assert_eq!(updated.proficiency_level.as_deref(), Some("beginner"));
        assert_eq!(updated.talk_topics, vec!["travel".to_string()]);
    }

    #[tokio::test]
    async fn first_dashboard_is_primary() {
        let (db, user) = db_with_user("ana@example.com").await;

        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let french = db.dashboard_by_language(user.id, "fr").await.unwrap();
        let spanish = db.dashboard_by_language(user.id, "es").await.unwrap();

        assert!(french.is_primary);
        assert!(!spanish.is_primary);
        assert_eq!(french.speech_speed, 1.0);
    }

    #[tokio::test]
    async fn duplicate_dashboard_conflicts() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;

        let result = db
            .create_dashboard(NewDashboard {
                user_id: user.id,
                language: "fr".to_string(),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));
        assert_eq!(db.list_dashboards(user.id).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn set_primary_moves_the_flag() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let spanish = db.dashboard_by_language(user.id, "es").await.unwrap();
        db.set_primary_dashboard(spanish.id).await.unwrap();

        let primaries: Vec<_> = db
            .list_dashboards(user.id)
            .await
            .unwrap()
            .into_iter()
            .filter(|d| d.is_primary)
            .map(|d| d.language)
            .collect();

        assert_eq!(primaries, vec!["es".to_string()]);
    }

    #[tokio::test]
    async fn deleting_primary_dashboard_promotes_another() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let french = db.dashboard_by_language(user.id, "fr").await.unwrap();
        db.delete_dashboard(french.id).await.unwrap();

        let spanish = db.dashboard_by_language(user.id, "es").await.unwrap();
        assert!(spanish.is_primary);
    }

    #[tokio::test]
    async fn deleting_dashboard_cascades() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let conversation = create_conversation(&db, user.id, "es").await;
        db.add_message(message(conversation.id, "Hola", None))
            .await
            .unwrap();

        let spanish = db.dashboard_by_language(user.id, "es").await.unwrap();
        db.delete_dashboard(spanish.id).await.unwrap();

        assert!(db
            .conversation_with_messages(conversation.id)
            .await
            .unwrap()
            .is_none());
        assert!(db.list_messages(conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn conversation_requires_dashboard() {
        let (db, user) = db_with_user("ana@example.com").await;

        let result = db
            .create_conversation(NewConversation {
                user_id: user.id,
                language: "de".to_string(),
                title: "Guten Tag".to_string(),
                ..Default::default()
            })
            .await;

        assert!(matches!(result, Err(DatabaseError::NotFound { .. })));
    }

    #[tokio::test]
    async fn conversation_joins_language_and_owner() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;

        let conversation = create_conversation(&db, user.id, "fr").await;

        assert_eq!(conversation.language, "fr");
        assert_eq!(conversation.owner_name, "ana");
        assert_eq!(conversation.message_count, 0);
        assert_eq!(conversation.topics, vec!["food".to_string()]);
    }

    #[tokio::test]
    async fn message_order_is_max_plus_one() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        let first = db
            .add_message(message(conversation.id, "Bonjour", None))
            .await
            .unwrap();
        let explicit = db
            .add_message(message(conversation.id, "Ça va ?", Some(5)))
            .await
            .unwrap();
        let next = db
            .add_message(message(conversation.id, "Oui", None))
            .await
            .unwrap();

        assert_eq!(first.message_order, 1);
        assert_eq!(explicit.message_order, 5);
        assert_eq!(next.message_order, 6);

        let orders: Vec<_> = db
            .list_messages(conversation.id)
            .await
            .unwrap()
            .into_iter()
            .map(|m| m.message_order)
            .collect();

        assert_eq!(orders, vec![1, 5, 6]);

        let conversation = db.conversation_by_id(conversation.id).await.unwrap();
        assert_eq!(conversation.message_count, 3);
    }

    #[tokio::test]
    async fn stale_message_order_conflicts() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        db.add_message(message(conversation.id, "Bonjour", None))
            .await
            .unwrap();
        db.add_message(message(conversation.id, "Salut", None))
            .await
            .unwrap();

        let result = db
            .add_message(message(conversation.id, "Encore", Some(2)))
            .await;

        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));

        // Nothing was written, including the counter
        let conversation = db.conversation_by_id(conversation.id).await.unwrap();
        assert_eq!(conversation.message_count, 2);
    }

    #[tokio::test]
    async fn message_feedback_is_attached() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        let message = db
            .add_message(message(conversation.id, "Je suis allé", None))
            .await
            .unwrap();
        assert!(message.detailed_feedback.is_none());

        let feedback = json!({ "corrections": [], "score": 9 });
        let message = db
            .set_message_feedback(message.id, feedback.clone())
            .await
            .unwrap();

        assert_eq!(message.detailed_feedback, Some(feedback));
        assert_eq!(message.text, "Je suis allé");
    }

    #[tokio::test]
    async fn deleting_conversation_removes_messages() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        db.add_message(message(conversation.id, "Bonjour", None))
            .await
            .unwrap();
        db.delete_conversation(conversation.id).await.unwrap();

        assert!(db
            .conversation_with_messages(conversation.id)
            .await
            .unwrap()
            .is_none());
        assert!(db.list_messages(conversation.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_persona_keeps_conversation() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;

        let persona = db
            .create_persona(NewPersona {
                user_id: Some(user.id),
                name: "Marie".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        let conversation = db
            .create_conversation(NewConversation {
                user_id: user.id,
                language: "fr".to_string(),
                title: "Chez Marie".to_string(),
                persona_id: Some(persona.id),
                ..Default::default()
            })
            .await
            .unwrap();

        db.delete_persona(persona.id).await.unwrap();

        let conversation = db.conversation_by_id(conversation.id).await.unwrap();
        assert_eq!(conversation.persona_id, None);
    }

    #[tokio::test]
    async fn personas_list_own_and_anonymous() {
        let (db, ana) = db_with_user("ana@example.com").await;
        let ben = create_user(&db, "ben@example.com").await;

        for (user_id, name) in [(Some(ana.id), "Ana's"), (Some(ben.id), "Ben's"), (None, "Shared")] {
            db.create_persona(NewPersona {
                user_id,
                name: name.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        }

        let mut names: Vec<_> = db
            .list_personas(Some(ana.id))
            .await
            .unwrap()
            .into_iter()
            .map(|p| p.name)
            .collect();
        names.sort();

        assert_eq!(names, vec!["Ana's".to_string(), "Shared".to_string()]);
    }

    #[tokio::test]
    async fn timestamps_only_include_user_messages_in_language() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let french = create_conversation(&db, user.id, "fr").await;
        let spanish = create_conversation(&db, user.id, "es").await;

        db.add_message(message(french.id, "Bonjour", None))
            .await
            .unwrap();
        db.add_message(NewMessage {
            sender: Sender::Ai,
            ..message(french.id, "Bonjour !", None)
        })
        .await
        .unwrap();
        db.add_message(message(spanish.id, "Hola", None))
            .await
            .unwrap();

        let timestamps = db.message_timestamps(user.id, "fr").await.unwrap();

        assert_eq!(timestamps.len(), 1);
        assert!(Utc::now() - timestamps[0] < Duration::minutes(1));
    }

    #[tokio::test]
    async fn deleting_user_cascades() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        db.delete_user(user.id).await.unwrap();

        assert!(matches!(
            db.conversation_by_id(conversation.id).await,
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(db.list_dashboards(user.id).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn deleting_user_removes_their_personas() {
        let (db, ana) = db_with_user("ana@example.com").await;
        let ben = create_user(&db, "ben@example.com").await;

        let private = db
            .create_persona(NewPersona {
                user_id: Some(ana.id),
                name: "Ana private".to_string(),
                ..Default::default()
            })
            .await
            .unwrap();

        db.delete_user(ana.id).await.unwrap();

        assert!(matches!(
            db.persona_by_id(private.id).await,
            Err(DatabaseError::NotFound { .. })
        ));
        assert!(db.list_personas(Some(ben.id)).await.unwrap().is_empty());
        assert!(db.list_personas(None).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn sole_dashboard_is_not_deleted() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        let french = db.dashboard_by_language(user.id, "fr").await.unwrap();
        let result = db.delete_dashboard(french.id).await;

        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));

        let french = db.dashboard_by_language(user.id, "fr").await.unwrap();
        assert!(french.is_primary);
        assert!(db.conversation_by_id(conversation.id).await.is_ok());
    }

    #[tokio::test]
    async fn concurrent_deletes_keep_one_dashboard() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        create_dashboard(&db, user.id, "es").await;

        let french = db.dashboard_by_language(user.id, "fr").await.unwrap();
        let spanish = db.dashboard_by_language(user.id, "es").await.unwrap();

        let (first, second) = tokio::join!(
            db.delete_dashboard(french.id),
            db.delete_dashboard(spanish.id)
        );
        assert!(first.is_ok() != second.is_ok());

        let remaining = db.list_dashboards(user.id).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert!(remaining[0].is_primary);
    }

    #[tokio::test]
    async fn messages_are_added_in_one_transaction() {
        let (db, user) = db_with_user("ana@example.com").await;
        create_dashboard(&db, user.id, "fr").await;
        let conversation = create_conversation(&db, user.id, "fr").await;

        let result = db
            .add_messages(vec![
                message(conversation.id, "Bonjour", None),
                message(conversation.id, "Encore", Some(1)),
            ])
            .await;
        assert!(matches!(result, Err(DatabaseError::Conflict { .. })));
        assert!(db.list_messages(conversation.id).await.unwrap().is_empty());

        let added = db
            .add_messages(vec![
                message(conversation.id, "Bonjour", None),
                NewMessage {
                    sender: Sender::Ai,
                    ..message(conversation.id, "Bonjour !", None)
                },
            ])
            .await
            .unwrap();

        assert_eq!(added.len(), 2);
        assert_eq!(added[1].message_order, 2);

        let conversation = db.conversation_by_id(conversation.id).await.unwrap();
        assert_eq!(conversation.message_count, 2);
    }

    #[tokio::test]
    async fn latest_chat_session_is_returned() {
        let (db, user) = db_with_user("ana@example.com").await;

        for turn in 1..=2 {
            db.create_chat_session(NewChatSession {
                user_id: user.id,
                language: Some("fr".to_string()),
                chat_history: json!([{ "turn": turn }]),
            })
            .await
            .unwrap();
        }

        let latest = db.latest_chat_session(user.id).await.unwrap();
        assert_eq!(latest.chat_history, json!([{ "turn": 2 }]));
    }
}
