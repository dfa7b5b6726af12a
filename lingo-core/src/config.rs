use std::{env, path::PathBuf, time::Duration};

use chrono_tz::Tz;
use log::warn;
use thiserror::Error;
use url::Url;

const GOOGLE_ISSUER: &str = "https://accounts.google.com";
const GOOGLE_JWKS_URL: &str = "https://www.googleapis.com/oauth2/v3/certs";
const FIREBASE_JWKS_URL: &str =
    "https://www.googleapis.com/service_accounts/v1/jwk/securetoken@system.gserviceaccount.com";

/// Secret used when `JWT_SECRET` is missing. Only good for local development.
const DEVELOPMENT_SECRET: &str = "lingo-development-secret";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("{0} must be a number")]
    NotANumber(&'static str),
    #[error("{0} is not a valid url: {1}")]
    InvalidUrl(&'static str, String),
    #[error("Unknown timezone {0}")]
    UnknownTimezone(String),
}

/// The configuration of a lingo instance
#[derive(Debug, Clone)]
pub struct Config {
    /// The port the HTTP server listens on
    pub port: u16,
    /// Where the database lives, for example `sqlite://lingo.db`
    pub database_url: String,
    /// Shared secret for locally issued tokens
    pub jwt_secret: String,
    /// How long a locally issued token is valid
    pub jwt_expiry_in_days: i64,
    /// The external identity provider, if sign-in through one is enabled
    pub identity_provider: Option<IdentityProviderConfig>,
    /// Base url of the AI backend
    pub ai_backend_url: Url,
    /// Public base url of this server, used to build links to generated audio
    pub public_url: Url,
    /// Directory uploaded and generated audio is written to
    pub uploads_dir: PathBuf,
    /// The timezone calendar days are counted in
    pub streak_timezone: Tz,
}

/// Where and how to verify tokens from an external identity provider
#[derive(Debug, Clone)]
pub struct IdentityProviderConfig {
    /// Where the provider publishes its signing keys
    pub jwks_url: Url,
    /// Accepted `iss` claims
    pub issuers: Vec<String>,
    /// Expected `aud` claim
    pub audience: String,
}

impl Config {
    pub const DEFAULT_PORT: u16 = 3001;

    /// Builds the config from environment variables, falling back to defaults
    pub fn from_env() -> Result<Self, ConfigError> {
        let defaults = Self::default();

        let port = match env::var("PORT") {
            Ok(port) => port.parse().map_err(|_| ConfigError::NotANumber("PORT"))?,
            Err(_) => defaults.port,
        };

        let jwt_secret = env::var("JWT_SECRET").unwrap_or_else(|_| {
            warn!("JWT_SECRET is not set, falling back to an insecure development secret");
            defaults.jwt_secret.clone()
        });

        let jwt_expiry_in_days = match env::var("JWT_EXPIRY_DAYS") {
            Ok(days) => days
                .parse()
                .map_err(|_| ConfigError::NotANumber("JWT_EXPIRY_DAYS"))?,
            Err(_) => defaults.jwt_expiry_in_days,
        };

        let ai_backend_url = match env::var("PYTHON_API_URL").or_else(|_| env::var("AI_BACKEND_URL")) {
            Ok(url) => parse_url("PYTHON_API_URL", &url)?,
            Err(_) => defaults.ai_backend_url,
        };

        let public_url = match env::var("BACKEND_URL") {
            Ok(url) => parse_url("BACKEND_URL", &url)?,
            Err(_) => parse_url("BACKEND_URL", &format!("http://localhost:{port}"))?,
        };

        let streak_timezone = match env::var("STREAK_TIMEZONE") {
            Ok(name) => name.parse().map_err(|_| ConfigError::UnknownTimezone(name))?,
            Err(_) => defaults.streak_timezone,
        };

        Ok(Self {
            port,
            database_url: env::var("DATABASE_URL").unwrap_or(defaults.database_url),
            jwt_secret,
            jwt_expiry_in_days,
            identity_provider: identity_provider_from_env()?,
            ai_backend_url,
            public_url,
            uploads_dir: env::var("UPLOADS_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.uploads_dir),
            streak_timezone,
        })
    }

    /// How long a locally issued token is valid
    pub fn jwt_expiry(&self) -> Duration {
        Duration::from_secs(self.jwt_expiry_in_days.max(0) as u64 * 24 * 60 * 60)
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: Self::DEFAULT_PORT,
            database_url: "sqlite://lingo.db".to_string(),
            jwt_secret: DEVELOPMENT_SECRET.to_string(),
            jwt_expiry_in_days: 7,
            identity_provider: None,
            ai_backend_url: Url::parse("http://localhost:5000").expect("default url is valid"),
            public_url: Url::parse("http://localhost:3001").expect("default url is valid"),
            uploads_dir: PathBuf::from("uploads"),
            streak_timezone: chrono_tz::America::New_York,
        }
    }
}

/// An explicit provider wins over Firebase, which wins over plain Google sign-in
fn identity_provider_from_env() -> Result<Option<IdentityProviderConfig>, ConfigError> {
    if let Ok(jwks_url) = env::var("AUTH_PROVIDER_JWKS_URL") {
        return Ok(Some(IdentityProviderConfig {
            jwks_url: parse_url("AUTH_PROVIDER_JWKS_URL", &jwks_url)?,
            issuers: env::var("AUTH_PROVIDER_ISSUER")
                .map(|issuer| vec![issuer])
                .unwrap_or_default(),
            audience: env::var("AUTH_PROVIDER_AUDIENCE").unwrap_or_else(|_| "authenticated".to_string()),
        }));
    }

    if let Ok(project_id) = env::var("FIREBASE_PROJECT_ID") {
        return Ok(Some(IdentityProviderConfig {
            jwks_url: parse_url("FIREBASE_JWKS_URL", FIREBASE_JWKS_URL)?,
            issuers: vec![format!("https://securetoken.google.com/{project_id}")],
            audience: project_id,
        }));
    }

    if let Ok(client_id) = env::var("GOOGLE_CLIENT_ID") {
        return Ok(Some(IdentityProviderConfig {
            jwks_url: parse_url("GOOGLE_JWKS_URL", GOOGLE_JWKS_URL)?,
            issuers: vec![GOOGLE_ISSUER.to_string(), "accounts.google.com".to_string()],
            audience: client_id,
        }));
    }

    Ok(None)
}

fn parse_url(name: &'static str, value: &str) -> Result<Url, ConfigError> {
    Url::parse(value).map_err(|e| ConfigError::InvalidUrl(name, e.to_string()))
}

#[cfg(test)]
mod test {
    use super::*;

    #[test]
    fn defaults() {
        let config = Config::default();

        assert_eq!(config.port, 3001);
        assert_eq!(config.streak_timezone, chrono_tz::America::New_York);
        assert_eq!(config.jwt_expiry(), Duration::from_secs(7 * 24 * 60 * 60));
        assert!(config.identity_provider.is_none());
    }

    #[test]
    fn invalid_url_is_reported() {
        let result = parse_url("BACKEND_URL", "not a url");

        assert!(matches!(result, Err(ConfigError::InvalidUrl("BACKEND_URL", _))));
    }
}
