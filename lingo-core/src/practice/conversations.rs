use log::info;
use serde_json::Value;

use crate::{
    util::non_blank, ConversationData, ConversationWithMessages, DatabaseError, Identity,
    LingoContext, MessageData, NewConversation, NewMessage, PrimaryKey, Sender,
    UpdatedConversation,
};

use super::{ensure_owner, personas::ensure_visible, required, PracticeError, PracticeResult};

const DEFAULT_TITLE: &str = "New Conversation";

/// Manages conversations and their messages
pub struct ConversationManager {
    context: LingoContext,
}

/// What a new conversation starts out with
#[derive(Debug, Default, Clone)]
pub struct ConversationDraft {
    /// Must match one of the owner's dashboards
    pub language: String,
    pub title: Option<String>,
    pub topics: Vec<String>,
    pub formality: Option<String>,
    pub synopsis: Option<String>,
    pub persona_id: Option<PrimaryKey>,
}

/// A message about to be appended to a conversation
#[derive(Debug, Clone)]
pub struct MessageDraft {
    pub sender: Sender,
    pub text: String,
    pub audio_path: Option<String>,
    pub detailed_feedback: Option<Value>,
    /// Must be greater than every existing order, assigned when missing
    pub message_order: Option<i64>,
}

impl MessageDraft {
    fn into_new_message(self, conversation_id: PrimaryKey) -> PracticeResult<NewMessage> {
        if self.text.trim().is_empty() {
            return Err(PracticeError::Validation("text is required".to_string()));
        }

        Ok(NewMessage {
            conversation_id,
            sender: self.sender,
            text: self.text,
            audio_path: self.audio_path,
            detailed_feedback: self.detailed_feedback,
            message_order: self.message_order,
        })
    }
}

impl ConversationManager {
    pub fn new(context: &LingoContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Starts a conversation in one of the identity's languages
    pub async fn create(
        &self,
        identity: &Identity,
        draft: ConversationDraft,
    ) -> PracticeResult<ConversationData> {
        let language = required(&draft.language, "language")?;

        if let Some(persona_id) = draft.persona_id {
            self.ensure_persona_usable(identity, persona_id).await?;
        }

        let conversation = self
            .context
            .database
            .create_conversation(NewConversation {
                user_id: identity.user_id,
                language,
                title: non_blank(draft.title).unwrap_or_else(|| DEFAULT_TITLE.to_string()),
                topics: draft.topics,
                formality: draft.formality,
                synopsis: draft.synopsis,
                persona_id: draft.persona_id,
            })
            .await?;

        info!(
            "User {} started conversation {} in {}",
            identity.user_id, conversation.id, conversation.language
        );

        Ok(conversation)
    }

    /// Returns a conversation with all of its messages in order
    pub async fn get(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
    ) -> PracticeResult<ConversationWithMessages> {
        let conversation = self
            .context
            .database
            .conversation_with_messages(conversation_id)
            .await?
            .ok_or(DatabaseError::NotFound {
                resource: "conversation",
                identifier: "id",
            })?;

        ensure_owner(identity, conversation.conversation.user_id, "conversation")?;

        Ok(conversation)
    }

    /// Lists the identity's conversations, most recently active first
    pub async fn list(
        &self,
        identity: &Identity,
        language: Option<&str>,
    ) -> PracticeResult<Vec<ConversationData>> {
        Ok(self
            .context
            .database
            .list_conversations(identity.user_id, language)
            .await?)
    }

    /// Renames a conversation. A missing or blank title leaves it untouched.
    pub async fn update_title(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
        title: Option<String>,
    ) -> PracticeResult<ConversationData> {
        let conversation = self.owned(identity, conversation_id).await?;

        let Some(title) = non_blank(title) else {
            return Ok(conversation);
        };

        self.update(UpdatedConversation {
            id: conversation_id,
            title: Some(title),
            ..Default::default()
        })
        .await
    }

    /// Replaces the synopsis. A missing synopsis leaves it untouched.
    pub async fn update_synopsis(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
        synopsis: Option<String>,
    ) -> PracticeResult<ConversationData> {
        let conversation = self.owned(identity, conversation_id).await?;

        let Some(synopsis) = synopsis else {
            return Ok(conversation);
        };

        self.update(UpdatedConversation {
            id: conversation_id,
            synopsis: Some(synopsis),
            ..Default::default()
        })
        .await
    }

    /// Switches the persona, or removes it when `persona_id` is [None]
    pub async fn update_persona(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
        persona_id: Option<PrimaryKey>,
    ) -> PracticeResult<ConversationData> {
        self.owned(identity, conversation_id).await?;

        if let Some(persona_id) = persona_id {
            self.ensure_persona_usable(identity, persona_id).await?;
        }

        self.update(UpdatedConversation {
            id: conversation_id,
            persona_id: Some(persona_id),
            ..Default::default()
        })
        .await
    }

    /// Deletes a conversation along with its messages
    pub async fn delete(&self, identity: &Identity, conversation_id: PrimaryKey) -> PracticeResult<()> {
        self.owned(identity, conversation_id).await?;
        self.context
            .database
            .delete_conversation(conversation_id)
            .await?;

        info!(
            "User {} deleted conversation {}",
            identity.user_id, conversation_id
        );

        Ok(())
    }

    pub async fn add_message(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
        draft: MessageDraft,
    ) -> PracticeResult<MessageData> {
        self.owned(identity, conversation_id).await?;

        Ok(self
            .context
            .database
            .add_message(draft.into_new_message(conversation_id)?)
            .await?)
    }

    /// Appends several messages in order. Either all of them are stored or none.
    pub async fn add_messages(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
        drafts: Vec<MessageDraft>,
    ) -> PracticeResult<Vec<MessageData>> {
        self.owned(identity, conversation_id).await?;

        let new_messages = drafts
            .into_iter()
            .map(|draft| draft.into_new_message(conversation_id))
            .collect::<PracticeResult<Vec<_>>>()?;

        Ok(self.context.database.add_messages(new_messages).await?)
    }

    pub async fn messages(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
    ) -> PracticeResult<Vec<MessageData>> {
        self.owned(identity, conversation_id).await?;

        Ok(self.context.database.list_messages(conversation_id).await?)
    }

    /// Attaches generated feedback to a message, the only change a message allows
    pub async fn attach_feedback(
        &self,
        identity: &Identity,
        message_id: PrimaryKey,
        feedback: Value,
    ) -> PracticeResult<MessageData> {
        let message = self.context.database.message_by_id(message_id).await?;
        self.owned(identity, message.conversation_id).await?;

        Ok(self
            .context
            .database
            .set_message_feedback(message_id, feedback)
            .await?)
    }

    async fn owned(
        &self,
        identity: &Identity,
        conversation_id: PrimaryKey,
    ) -> PracticeResult<ConversationData> {
        let conversation = self
            .context
            .database
            .conversation_by_id(conversation_id)
            .await?;

        ensure_owner(identity, conversation.user_id, "conversation")?;

        Ok(conversation)
    }

    async fn update(&self, updated: UpdatedConversation) -> PracticeResult<ConversationData> {
        Ok(self.context.database.update_conversation(updated).await?)
    }

    async fn ensure_persona_usable(
        &self,
        identity: &Identity,
        persona_id: PrimaryKey,
    ) -> PracticeResult<()> {
        let persona = self.context.database.persona_by_id(persona_id).await?;
        ensure_visible(Some(identity), &persona)
    }
}
