use colored::Colorize;
use lingo_core::{Config, ConfigError, DatabaseError, Lingo};
use log::{error, info};
use thiserror::Error;
use tokio::runtime;

mod logging;

#[derive(Debug, Error)]
enum StartupError {
    #[error("Invalid configuration: {0}")]
    Config(#[from] ConfigError),

    #[error("Could not initialize database: {0}")]
    Database(#[from] DatabaseError),

    #[error("Fatal error: {0}")]
    Fatal(String),
}

impl StartupError {
    fn hint(&self) -> String {
        match self {
            StartupError::Config(_) => "Check the environment variables lingo is started with, then try again.".to_string(),
            StartupError::Database(_) => "This is a database error. Make sure DATABASE_URL points to a writable SQLite file, then try again.".to_string(),
            StartupError::Fatal(_) => "This error is fatal, and should not happen.".to_string(),
        }
    }
}

fn run() -> Result<(), StartupError> {
    let config = Config::from_env()?;

    info!("Building async runtime...");
    let main_runtime = runtime::Builder::new_multi_thread()
        .enable_all()
        .thread_name("lingo-async")
        .build()
        .map_err(|e| StartupError::Fatal(e.to_string()))?;

    main_runtime.block_on(async move {
        info!("Connecting to database...");
        let lingo = Lingo::connect(config).await?;

        info!("Initialized successfully.");
        lingo_server::run_server(lingo)
            .await
            .map_err(|e| StartupError::Fatal(e.to_string()))
    })
}

fn main() {
    logging::init_logger();

    if let Err(error) = run() {
        error!("{} Read the error below to troubleshoot the issue.", "lingo failed to start!".bold().red());
        error!("{}", error);
        error!(
            "{}",
            format!("Hint: {}", error.hint()).dimmed().italic()
        );
    }
}
