mod ai;
mod auth;
mod cache;
mod config;
mod db;
mod practice;
mod streak;
mod util;

use std::sync::Arc;

pub use ai::*;
pub use auth::*;
pub use cache::*;
pub use config::*;
pub use db::*;
pub use practice::*;
pub use streak::*;

/// The lingo system, facilitating authentication, practice, and talking to the AI backend.
pub struct Lingo {
    context: LingoContext,

    pub auth: Auth,
    pub ai: AiClient,
    pub cache: ConversationCache,
    pub conversations: ConversationManager,
    pub dashboards: DashboardManager,
    pub personas: PersonaManager,
    pub profiles: ProfileManager,
}

/// A type passed to various components of lingo, to access the database and configuration.
#[derive(Clone)]
pub struct LingoContext {
    pub database: SharedDatabase,
    pub config: Arc<Config>,
}

impl Lingo {
    pub fn new<Db>(config: Config, database: Db) -> Self
    where
        Db: Database + 'static,
    {
        let context = LingoContext {
            database: Arc::new(database),
            config: Arc::new(config),
        };

        Self {
            auth: Auth::new(&context),
            ai: AiClient::new(&context),
            cache: Default::default(),
            conversations: ConversationManager::new(&context),
            dashboards: DashboardManager::new(&context),
            personas: PersonaManager::new(&context),
            profiles: ProfileManager::new(&context),
            context,
        }
    }

    /// Connects to the configured SQLite database and creates the instance
    pub async fn connect(config: Config) -> Result<Self> {
        let database = SqliteDatabase::new(&config.database_url).await?;

        Ok(Self::new(config, database))
    }

    pub fn config(&self) -> &Config {
        &self.context.config
    }

    pub fn database(&self) -> &SharedDatabase {
        &self.context.database
    }
}
