use chrono::Utc;
use log::info;
use serde::Serialize;
use serde_json::Value;

use crate::{
    compute_streak, ChatSessionData, DatabaseError, Identity, LanguageDashboardData,
    LingoContext, NewChatSession, NewDashboard, Streak, UpdatedUser, UserData,
};

use super::{required, PracticeError, PracticeResult};

/// Manages the account and learning profile of users
pub struct ProfileManager {
    context: LingoContext,
}

/// Changes to a profile. Missing fields are left as they are.
#[derive(Debug, Default, Clone)]
pub struct ProfileChanges {
    pub name: Option<String>,
    pub target_language: Option<String>,
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
}

/// What a user tells us when they sign up
#[derive(Debug, Default, Clone)]
pub struct Onboarding {
    pub target_language: String,
    pub proficiency_level: Option<String>,
    pub talk_topics: Vec<String>,
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
}

/// The learning preferences that apply to a language, taken from its
/// dashboard and falling back to the profile
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Preferences {
    pub language: Option<String>,
    pub proficiency_level: Option<String>,
    pub talk_topics: Vec<String>,
    pub learning_goals: Vec<String>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    pub speech_speed: f64,
}

impl ProfileManager {
    pub fn new(context: &LingoContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    pub async fn profile(&self, identity: &Identity) -> PracticeResult<UserData> {
        Ok(self.context.database.user_by_id(identity.user_id).await?)
    }

    pub async fn update_profile(
        &self,
        identity: &Identity,
        changes: ProfileChanges,
    ) -> PracticeResult<UserData> {
        let name = changes
            .name
            .map(|name| required(&name, "name"))
            .transpose()?;

        Ok(self
            .context
            .database
            .update_user(UpdatedUser {
                id: identity.user_id,
                name,
                target_language: changes.target_language,
                proficiency_level: changes.proficiency_level,
                talk_topics: changes.talk_topics,
                learning_goals: changes.learning_goals,
                practice_preference: changes.practice_preference,
                ..Default::default()
            })
            .await?)
    }

    /// Stores the answers of onboarding and makes sure a dashboard exists
    /// for the chosen language
    pub async fn complete_onboarding(
        &self,
        identity: &Identity,
        onboarding: Onboarding,
    ) -> PracticeResult<(UserData, LanguageDashboardData)> {
        let language = required(&onboarding.target_language, "target_language")?;
        let database = &self.context.database;

        let user = database
            .update_user(UpdatedUser {
                id: identity.user_id,
                onboarding_complete: Some(true),
                target_language: Some(language.clone()),
                proficiency_level: onboarding.proficiency_level.clone(),
                talk_topics: Some(onboarding.talk_topics.clone()),
                learning_goals: Some(onboarding.learning_goals.clone()),
                practice_preference: onboarding.practice_preference.clone(),
                ..Default::default()
            })
            .await?;

        let dashboard = match database
            .dashboard_by_language(identity.user_id, &language)
            .await
        {
            Ok(dashboard) => dashboard,
            Err(DatabaseError::NotFound { .. }) => {
                database
                    .create_dashboard(NewDashboard {
                        user_id: identity.user_id,
                        language,
                        proficiency_level: onboarding.proficiency_level,
                        talk_topics: onboarding.talk_topics,
                        learning_goals: onboarding.learning_goals,
                        practice_preference: onboarding.practice_preference,
                        ..Default::default()
                    })
                    .await?
            }
            Err(e) => return Err(e.into()),
        };

        info!("User {} completed onboarding", identity.user_id);

        Ok((user, dashboard))
    }

    /// Deletes the account and everything that belongs to it
    pub async fn delete_account(&self, identity: &Identity) -> PracticeResult<()> {
        self.context.database.delete_user(identity.user_id).await?;
        info!("User {} deleted their account", identity.user_id);

        Ok(())
    }

    /// Computes the practice streak for a language, defaulting to the target language
    pub async fn streak(&self, identity: &Identity, language: Option<&str>) -> PracticeResult<Streak> {
        let language = match language {
            Some(language) => language.to_string(),
            None => self
                .profile(identity)
                .await?
                .target_language
                .ok_or_else(|| PracticeError::Validation("language is required".to_string()))?,
        };

        let timestamps = self
            .context
            .database
            .message_timestamps(identity.user_id, &language)
            .await?;

        Ok(compute_streak(
            &timestamps,
            Utc::now(),
            self.context.config.streak_timezone,
        ))
    }

    /// Stores a snapshot of a chat history
    pub async fn save_chat_session(
        &self,
        identity: &Identity,
        language: Option<String>,
        chat_history: Value,
    ) -> PracticeResult<ChatSessionData> {
        if !chat_history.is_array() {
            return Err(PracticeError::Validation(
                "chat_history must be a list of messages".to_string(),
            ));
        }

        Ok(self
            .context
            .database
            .create_chat_session(NewChatSession {
                user_id: identity.user_id,
                language,
                chat_history,
            })
            .await?)
    }

    pub async fn latest_chat_session(&self, identity: &Identity) -> PracticeResult<ChatSessionData> {
        Ok(self
            .context
            .database
            .latest_chat_session(identity.user_id)
            .await?)
    }

    /// Resolves the preferences for a language, defaulting to the target language
    pub async fn preferences_for(
        &self,
        identity: &Identity,
        language: Option<&str>,
    ) -> PracticeResult<Preferences> {
        let user = self.profile(identity).await?;
        let language = language
            .map(str::to_string)
            .or_else(|| user.target_language.clone());

        let dashboard = match &language {
            Some(language) => match self
                .context
                .database
                .dashboard_by_language(identity.user_id, language)
                .await
            {
                Ok(dashboard) => Some(dashboard),
                Err(DatabaseError::NotFound { .. }) => None,
                Err(e) => return Err(e.into()),
            },
            None => None,
        };

        Ok(Preferences::resolve(language, &user, dashboard.as_ref()))
    }
}

impl Preferences {
    fn resolve(
        language: Option<String>,
        user: &UserData,
        dashboard: Option<&LanguageDashboardData>,
    ) -> Self {
        let Some(dashboard) = dashboard else {
            return Self {
                language,
                proficiency_level: user.proficiency_level.clone(),
                talk_topics: user.talk_topics.clone(),
                learning_goals: user.learning_goals.clone(),
                practice_preference: user.practice_preference.clone(),
                feedback_language: None,
                speech_speed: 1.0,
            };
        };

        let or_profile = |values: &Vec<String>, fallback: &Vec<String>| {
            if values.is_empty() {
                fallback.clone()
            } else {
                values.clone()
            }
        };

        Self {
            language,
            proficiency_level: dashboard
                .proficiency_level
                .clone()
                .or_else(|| user.proficiency_level.clone()),
            talk_topics: or_profile(&dashboard.talk_topics, &user.talk_topics),
            learning_goals: or_profile(&dashboard.learning_goals, &user.learning_goals),
            practice_preference: dashboard
                .practice_preference
                .clone()
                .or_else(|| user.practice_preference.clone()),
            feedback_language: dashboard.feedback_language.clone(),
            speech_speed: dashboard.speech_speed,
        }
    }
}
