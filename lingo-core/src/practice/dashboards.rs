use log::info;

use crate::{DatabaseError, Identity, LanguageDashboardData, LingoContext, NewDashboard, UpdatedDashboard};

use super::{required, PracticeError, PracticeResult};

/// Manages the per-language dashboards of users.
/// Dashboards are always looked up through the identity, so a user can never
/// reach another user's dashboard.
pub struct DashboardManager {
    context: LingoContext,
}

/// Settings of a dashboard. Missing fields are left as they are on update.
#[derive(Debug, Default, Clone)]
pub struct DashboardSettings {
    pub proficiency_level: Option<String>,
    pub talk_topics: Option<Vec<String>>,
    pub learning_goals: Option<Vec<String>>,
    pub practice_preference: Option<String>,
    pub feedback_language: Option<String>,
    pub speech_speed: Option<f64>,
}

impl DashboardManager {
    pub fn new(context: &LingoContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a dashboard for a language, the first one becoming primary
    pub async fn create(
        &self,
        identity: &Identity,
        language: &str,
        settings: DashboardSettings,
    ) -> PracticeResult<LanguageDashboardData> {
        let language = required(language, "language")?;

        let dashboard = self
            .context
            .database
            .create_dashboard(NewDashboard {
                user_id: identity.user_id,
                language,
                proficiency_level: settings.proficiency_level,
                talk_topics: settings.talk_topics.unwrap_or_default(),
                learning_goals: settings.learning_goals.unwrap_or_default(),
                practice_preference: settings.practice_preference,
                feedback_language: settings.feedback_language,
                speech_speed: settings.speech_speed,
            })
            .await?;

        info!(
            "User {} started learning {}",
            identity.user_id, dashboard.language
        );

        Ok(dashboard)
    }

    pub async fn list(&self, identity: &Identity) -> PracticeResult<Vec<LanguageDashboardData>> {
        Ok(self
            .context
            .database
            .list_dashboards(identity.user_id)
            .await?)
    }

    pub async fn get(&self, identity: &Identity, language: &str) -> PracticeResult<LanguageDashboardData> {
        Ok(self
            .context
            .database
            .dashboard_by_language(identity.user_id, language)
            .await?)
    }

    pub async fn update(
        &self,
        identity: &Identity,
        language: &str,
        settings: DashboardSettings,
    ) -> PracticeResult<LanguageDashboardData> {
        let dashboard = self.get(identity, language).await?;

        Ok(self
            .context
            .database
            .update_dashboard(UpdatedDashboard {
                id: dashboard.id,
                proficiency_level: settings.proficiency_level,
                talk_topics: settings.talk_topics,
                learning_goals: settings.learning_goals,
                practice_preference: settings.practice_preference,
                feedback_language: settings.feedback_language,
                speech_speed: settings.speech_speed,
            })
            .await?)
    }

    pub async fn set_primary(
        &self,
        identity: &Identity,
        language: &str,
    ) -> PracticeResult<LanguageDashboardData> {
        let dashboard = self.get(identity, language).await?;

        Ok(self
            .context
            .database
            .set_primary_dashboard(dashboard.id)
            .await?)
    }

    /// Deletes a dashboard along with its conversations.
    /// A user must always keep at least one dashboard.
    pub async fn delete(&self, identity: &Identity, language: &str) -> PracticeResult<()> {
        let dashboard = self.get(identity, language).await?;

        match self.context.database.delete_dashboard(dashboard.id).await {
            Ok(()) => {}
            Err(DatabaseError::Conflict { .. }) => {
                return Err(PracticeError::Conflict(
                    "Cannot delete your only language dashboard".to_string(),
                ))
            }
            Err(e) => return Err(e.into()),
        }

        info!(
            "User {} stopped learning {}",
            identity.user_id, dashboard.language
        );

        Ok(())
    }
}

#[cfg(test)]
mod test {
    use crate::practice::test_util::*;

    use super::*;

    #[tokio::test]
    async fn duplicate_dashboard_conflicts() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        manager.create(&ana, "Spanish", Default::default()).await.unwrap();
        let result = manager.create(&ana, "Spanish", Default::default()).await;

        assert!(matches!(
            result,
            Err(PracticeError::Db(DatabaseError::Conflict { .. }))
        ));
        assert_eq!(manager.list(&ana).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn sole_dashboard_cannot_be_deleted() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        let spanish = manager.create(&ana, "Spanish", Default::default()).await.unwrap();
        assert!(spanish.is_primary);

        let result = manager.delete(&ana, "Spanish").await;

        assert!(matches!(result, Err(PracticeError::Conflict(_))));
        assert_eq!(manager.list(&ana).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn second_dashboard_can_be_deleted() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        manager.create(&ana, "Spanish", Default::default()).await.unwrap();
        let french = manager.create(&ana, "French", Default::default()).await.unwrap();
        assert!(!french.is_primary);

        manager.delete(&ana, "French").await.unwrap();

        let remaining = manager.list(&ana).await.unwrap();
        assert_eq!(remaining.len(), 1);
        assert_eq!(remaining[0].language, "Spanish");
        assert!(remaining[0].is_primary);
    }

    #[tokio::test]
    async fn dashboards_of_others_are_not_found() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;
        let ben = identity(&context, "ben@example.com").await;

        manager.create(&ana, "Spanish", Default::default()).await.unwrap();

        let result = manager.get(&ben, "Spanish").await;

        assert!(matches!(
            result,
            Err(PracticeError::Db(DatabaseError::NotFound { .. }))
        ));
    }

    #[tokio::test]
    async fn update_keeps_missing_settings() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        manager
            .create(
                &ana,
                "Spanish",
                DashboardSettings {
                    proficiency_level: Some("beginner".to_string()),
                    talk_topics: Some(vec!["food".to_string()]),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let updated = manager
            .update(
                &ana,
                "Spanish",
                DashboardSettings {
                    speech_speed: Some(0.8),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.speech_speed, 0.8);
        assert_eq!(updated.proficiency_level.as_deref(), Some("beginner"));
        assert_eq!(updated.talk_topics, vec!["food".to_string()]);
    }

    #[tokio::test]
    async fn blank_language_is_rejected() {
        let context = context().await;
        let manager = DashboardManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        let result = manager.create(&ana, "  ", Default::default()).await;

        assert!(matches!(result, Err(PracticeError::Validation(_))));
    }
}
