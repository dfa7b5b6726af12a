use crate::{Identity, LingoContext, NewPersona, PersonaData, PrimaryKey, UpdatedPersona};

use super::{ensure_owner, required, PracticeError, PracticeResult};

pub struct PersonaManager {
    context: LingoContext,
}

/// Fields of a persona. On update, missing fields are left as they are.
#[derive(Debug, Default, Clone)]
pub struct PersonaFields {
    pub name: Option<String>,
    pub description: Option<String>,
    pub topics: Option<Vec<String>>,
    pub formality: Option<String>,
    pub language: Option<String>,
}

impl PersonaManager {
    pub fn new(context: &LingoContext) -> Self {
        Self {
            context: context.clone(),
        }
    }

    /// Creates a persona. Without an identity the persona is anonymous,
    /// visible to everyone and owned by nobody.
    pub async fn create(
        &self,
        identity: Option<&Identity>,
        fields: PersonaFields,
    ) -> PracticeResult<PersonaData> {
        let name = required(fields.name.as_deref().unwrap_or_default(), "name")?;

        Ok(self
            .context
            .database
            .create_persona(NewPersona {
                user_id: identity.map(|i| i.user_id),
                name,
                description: fields.description,
                topics: fields.topics.unwrap_or_default(),
                formality: fields.formality,
                language: fields.language,
            })
            .await?)
    }

    /// Lists the personas of the identity along with anonymous ones
    pub async fn list(&self, identity: Option<&Identity>) -> PracticeResult<Vec<PersonaData>> {
        Ok(self
            .context
            .database
            .list_personas(identity.map(|i| i.user_id))
            .await?)
    }

    pub async fn get(
        &self,
        identity: Option<&Identity>,
        persona_id: PrimaryKey,
    ) -> PracticeResult<PersonaData> {
        let persona = self.context.database.persona_by_id(persona_id).await?;
        ensure_visible(identity, &persona)?;

        Ok(persona)
    }

    pub async fn update(
        &self,
        identity: &Identity,
        persona_id: PrimaryKey,
        fields: PersonaFields,
    ) -> PracticeResult<PersonaData> {
        self.owned(identity, persona_id).await?;

        let name = fields
            .name
            .map(|name| required(&name, "name"))
            .transpose()?;

        Ok(self
            .context
            .database
            .update_persona(UpdatedPersona {
                id: persona_id,
                name,
                description: fields.description,
                topics: fields.topics,
                formality: fields.formality,
                language: fields.language,
            })
            .await?)
    }

    /// Deletes a persona. Conversations using it keep existing without it.
    pub async fn delete(&self, identity: &Identity, persona_id: PrimaryKey) -> PracticeResult<()> {
        self.owned(identity, persona_id).await?;

        Ok(self.context.database.delete_persona(persona_id).await?)
    }

    /// Anonymous personas belong to nobody and can't be changed
    async fn owned(&self, identity: &Identity, persona_id: PrimaryKey) -> PracticeResult<PersonaData> {
        let persona = self.context.database.persona_by_id(persona_id).await?;

        match persona.user_id {
            Some(owner) => ensure_owner(identity, owner, "persona")?,
            None => return Err(PracticeError::Forbidden("persona")),
        }

        Ok(persona)
    }
}

/// Personas are visible to their owner, anonymous ones to everyone
pub(crate) fn ensure_visible(identity: Option<&Identity>, persona: &PersonaData) -> PracticeResult<()> {
    match (persona.user_id, identity) {
        (None, _) => Ok(()),
        (Some(owner), Some(identity)) => ensure_owner(identity, owner, "persona"),
        (Some(_), None) => Err(PracticeError::Forbidden("persona")),
    }
}

#[cfg(test)]
mod test {
    use crate::practice::test_util::*;

    use super::*;

    fn named(name: &str) -> PersonaFields {
        PersonaFields {
            name: Some(name.to_string()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn anonymous_personas_are_visible_but_immutable() {
        let context = context().await;
        let manager = PersonaManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        let barista = manager.create(None, named("Barista")).await.unwrap();
        assert_eq!(barista.user_id, None);

        assert!(manager.get(Some(&ana), barista.id).await.is_ok());
        assert!(manager.get(None, barista.id).await.is_ok());

        let result = manager.update(&ana, barista.id, named("Chef")).await;
        assert!(matches!(result, Err(PracticeError::Forbidden(_))));

        let result = manager.delete(&ana, barista.id).await;
        assert!(matches!(result, Err(PracticeError::Forbidden(_))));
    }

    #[tokio::test]
    async fn personas_of_others_are_forbidden() {
        let context = context().await;
        let manager = PersonaManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;
        let ben = identity(&context, "ben@example.com").await;

        let tutor = manager.create(Some(&ana), named("Tutor")).await.unwrap();

        assert!(matches!(
            manager.get(Some(&ben), tutor.id).await,
            Err(PracticeError::Forbidden(_))
        ));
        assert!(matches!(
            manager.update(&ben, tutor.id, named("Stolen")).await,
            Err(PracticeError::Forbidden(_))
        ));
        assert_eq!(manager.get(Some(&ana), tutor.id).await.unwrap().name, "Tutor");

        // Ben only sees anonymous personas
        assert!(manager.list(Some(&ben)).await.unwrap().is_empty());
        assert_eq!(manager.list(Some(&ana)).await.unwrap().len(), 1);
    }

    #[tokio::test]
    async fn owner_can_update_and_delete() {
        let context = context().await;
        let manager = PersonaManager::new(&context);
        let ana = identity(&context, "ana@example.com").await;

        let tutor = manager.create(Some(&ana), named("Tutor")).await.unwrap();

        let updated = manager
            .update(
                &ana,
                tutor.id,
                PersonaFields {
                    formality: Some("formal".to_string()),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        assert_eq!(updated.name, "Tutor");
        assert_eq!(updated.formality.as_deref(), Some("formal"));

        manager.delete(&ana, tutor.id).await.unwrap();
        assert!(manager.list(Some(&ana)).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn persona_needs_a_name() {
        let context = context().await;
        let manager = PersonaManager::new(&context);

        let result = manager.create(None, PersonaFields::default()).await;

        assert!(matches!(result, Err(PracticeError::Validation(_))));
    }
}
