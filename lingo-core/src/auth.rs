use argon2::{
    password_hash::{Encoding, SaltString},
    Argon2, PasswordHash, PasswordHasher, PasswordVerifier,
};
use chrono::Utc;
use jsonwebtoken::{
    decode, decode_header, encode, jwk::JwkSet, Algorithm, DecodingKey, EncodingKey, Header,
    Validation,
};
use log::{info, warn};
use parking_lot::RwLock;
use rand::rngs::OsRng;
use serde::{Deserialize, Serialize};
use std::{
    sync::Arc,
    time::{Duration, Instant},
};
use thiserror::Error;

use crate::{
    Config, DatabaseError, IdentityProviderConfig, LingoContext, NewUser, PrimaryKey,
    SharedDatabase, UpdatedUser, UserData,
};

const PROVIDER_KEYS_TIMEOUT: Duration = Duration::from_secs(10);
/// Unknown key ids don't trigger a refetch more often than this
const PROVIDER_KEYS_MIN_REFRESH: Duration = Duration::from_secs(60);

/// Verifies tokens and manages accounts
pub struct Auth {
    db: SharedDatabase,
    config: Arc<Config>,
    argon: Argon2<'static>,
    http: reqwest::Client,
    /// Signing keys of the identity provider, fetched on demand
    provider_keys: RwLock<Option<ProviderKeys>>,
}

struct ProviderKeys {
    set: JwkSet,
    fetched_at: Instant,
}

#[derive(Debug, Error)]
pub enum AuthError {
    /// No token was supplied
    #[error("Missing authorization")]
    MissingToken,
    /// The token is malformed, expired, or its signature doesn't verify
    #[error("Invalid token: {0}")]
    InvalidToken(String),
    /// The token is valid but no account belongs to it
    #[error("No account is linked to this identity")]
    UnknownIdentity,
    /// Email or password is incorrect
    #[error("Invalid credentials")]
    InvalidCredentials,
    #[error("Identity provider is unavailable: {0}")]
    ProviderUnavailable(String),
    /// The identity can't be linked to the account that owns its email
    #[error("{0}")]
    Conflict(String),
    /// Something else went wrong with the database
    #[error(transparent)]
    Db(DatabaseError),
    #[error("HashError: {0}")]
    HashError(String),
}

/// The verified identity of whoever made a request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub user_id: PrimaryKey,
    pub email: String,
    pub name: String,
}

/// A freshly issued token along with the user it belongs to
#[derive(Debug)]
pub struct SignedIn {
    pub token: String,
    pub user: UserData,
}

#[derive(Debug)]
pub struct Credentials {
    pub email: String,
    pub password: String,
}

#[derive(Debug)]
pub struct NewPlainUser {
    pub email: String,
    pub password: String,
    pub name: String,
}

/// Claims of tokens issued by this server
#[derive(Debug, Serialize, Deserialize)]
struct LocalClaims {
    sub: String,
    email: String,
    name: String,
    iat: i64,
    exp: i64,
}

/// The subset of identity provider claims lingo cares about
#[derive(Debug, Deserialize)]
struct ProviderClaims {
    sub: String,
    email: Option<String>,
    #[serde(default)]
    email_verified: bool,
    name: Option<String>,
}

impl Auth {
    pub fn new(context: &LingoContext) -> Self {
        Self {
            db: context.database.clone(),
            config: context.config.clone(),
            argon: Argon2::default(),
            http: reqwest::Client::new(),
            provider_keys: Default::default(),
        }
    }

    /// Signs a token for the given user with the shared secret
    pub fn issue_token(&self, user: &UserData) -> Result<String, AuthError> {
        let now = Utc::now().timestamp();
        let claims = LocalClaims {
            sub: user.id.to_string(),
            email: user.email.clone(),
            name: user.name.clone(),
            iat: now,
            exp: now + self.config.jwt_expiry().as_secs() as i64,
        };

        encode(
            &Header::new(Algorithm::HS256),
            &claims,
            &EncodingKey::from_secret(self.config.jwt_secret.as_bytes()),
        )
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Verifies a bearer token and returns the identity behind it.
    ///
    /// Tokens without a key id are our own and verified with the shared secret.
    /// Tokens with a key id come from the identity provider and are verified
    /// against its published keys.
    pub async fn authenticate(&self, token: &str) -> Result<Identity, AuthError> {
        let header = decode_header(token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        let user = match (&header.kid, header.alg) {
            (None, Algorithm::HS256) => {
                let claims = self.verify_local_token(token)?;
                let user_id: PrimaryKey = claims
                    .sub
                    .parse()
                    .map_err(|_| AuthError::InvalidToken("Subject is not a user id".to_string()))?;

                self.db.user_by_id(user_id).await
            }
            (Some(_), _) => {
                let claims = self.verify_provider_token(token, &header).await?;
                self.db.user_by_google_id(&claims.sub).await
            }
            (None, alg) => {
                return Err(AuthError::InvalidToken(format!(
                    "Unsupported algorithm {alg:?}"
                )))
            }
        }
        .map_err(|e| match e {
            DatabaseError::NotFound { .. } => AuthError::UnknownIdentity,
            e => AuthError::Db(e),
        })?;

        Ok(Identity::from(&user))
    }

    /// Trades an identity provider token for a local one, creating the
    /// account on first sign-in
    pub async fn exchange(&self, provider_token: &str) -> Result<SignedIn, AuthError> {
        let header =
            decode_header(provider_token).map_err(|e| AuthError::InvalidToken(e.to_string()))?;

        if header.kid.is_none() {
            return Err(AuthError::InvalidToken(
                "Not an identity provider token".to_string(),
            ));
        }

        let claims = self.verify_provider_token(provider_token, &header).await?;
        let user = self.upsert_provider_user(claims).await?;
        let token = self.issue_token(&user)?;

        Ok(SignedIn { token, user })
    }

    /// Creates an account with a password, returning a token for it
    pub async fn register(&self, new_user: NewPlainUser) -> Result<SignedIn, AuthError> {
        let salt = SaltString::generate(&mut OsRng);
        let hashed_password = self
            .argon
            .hash_password(new_user.password.as_bytes(), &salt)
            .map_err(|e| AuthError::HashError(e.to_string()))?
            .to_string();

        let user = self
            .db
            .create_user(NewUser {
                email: new_user.email,
                name: new_user.name,
                password_hash: Some(hashed_password),
                ..Default::default()
            })
            .await
            .map_err(AuthError::Db)?;

        let token = self.issue_token(&user)?;

        Ok(SignedIn { token, user })
    }

    /// Logs in with email and password, returning a new token
    pub async fn login(&self, credentials: Credentials) -> Result<SignedIn, AuthError> {
        let user = self
            .db
            .user_by_email(&credentials.email)
            .await
            .map_err(|e| match e {
                DatabaseError::NotFound { .. } => AuthError::InvalidCredentials,
                err => AuthError::Db(err),
            })?;

        // Accounts created through the identity provider have no password
        let stored_password = user
            .password_hash
            .as_deref()
            .ok_or(AuthError::InvalidCredentials)?;

        let stored_password = PasswordHash::parse(stored_password, Encoding::default())
            .map_err(|e| AuthError::HashError(e.to_string()))?;

        self.argon
            .verify_password(credentials.password.as_bytes(), &stored_password)
            .map_err(|_| AuthError::InvalidCredentials)?;

        let token = self.issue_token(&user)?;

        Ok(SignedIn { token, user })
    }

    fn verify_local_token(&self, token: &str) -> Result<LocalClaims, AuthError> {
        decode::<LocalClaims>(
            token,
            &DecodingKey::from_secret(self.config.jwt_secret.as_bytes()),
            &Validation::new(Algorithm::HS256),
        )
        .map(|data| data.claims)
        .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    async fn verify_provider_token(
        &self,
        token: &str,
        header: &Header,
    ) -> Result<ProviderClaims, AuthError> {
        let provider = self.config.identity_provider.as_ref().ok_or_else(|| {
            AuthError::InvalidToken("No identity provider is configured".to_string())
        })?;

        if header.alg != Algorithm::RS256 {
            return Err(AuthError::InvalidToken(format!(
                "Unsupported algorithm {:?}",
                header.alg
            )));
        }

        let kid = header.kid.as_deref().unwrap_or_default();
        let key = self.provider_key(provider, kid).await?;

        let mut validation = Validation::new(Algorithm::RS256);
        validation.set_audience(&[&provider.audience]);

        if !provider.issuers.is_empty() {
            validation.set_issuer(&provider.issuers);
        }

        decode::<ProviderClaims>(token, &key, &validation)
            .map(|data| data.claims)
            .map_err(|e| AuthError::InvalidToken(e.to_string()))
    }

    /// Finds the signing key, refreshing the key set if it is unknown and
    /// wasn't fetched recently
    async fn provider_key(
        &self,
        provider: &IdentityProviderConfig,
        kid: &str,
    ) -> Result<DecodingKey, AuthError> {
        if let Some(key) = self.cached_provider_key(kid)? {
            return Ok(key);
        }

        let recently_fetched = self
            .provider_keys
            .read()
            .as_ref()
            .is_some_and(|keys| keys.fetched_at.elapsed() < PROVIDER_KEYS_MIN_REFRESH);

        if recently_fetched {
            return Err(AuthError::InvalidToken(format!("Unknown signing key {kid}")));
        }

        self.refresh_provider_keys(provider).await?;

        self.cached_provider_key(kid)?
            .ok_or_else(|| AuthError::InvalidToken(format!("Unknown signing key {kid}")))
    }

    fn cached_provider_key(&self, kid: &str) -> Result<Option<DecodingKey>, AuthError> {
        let keys = self.provider_keys.read();

        keys.as_ref()
            .and_then(|keys| keys.set.find(kid))
            .map(|jwk| DecodingKey::from_jwk(jwk).map_err(|e| AuthError::InvalidToken(e.to_string())))
            .transpose()
    }

    async fn refresh_provider_keys(&self, provider: &IdentityProviderConfig) -> Result<(), AuthError> {
        let keys = self
            .http
            .get(provider.jwks_url.clone())
            .timeout(PROVIDER_KEYS_TIMEOUT)
            .send()
            .await
            .and_then(|r| r.error_for_status())
            .map_err(|e| {
                warn!("Could not fetch identity provider keys: {}", e);
                AuthError::ProviderUnavailable(e.to_string())
            })?
            .json::<JwkSet>()
            .await
            .map_err(|e| AuthError::ProviderUnavailable(e.to_string()))?;

        info!("Refreshed {} identity provider key(s)", keys.keys.len());
        *self.provider_keys.write() = Some(ProviderKeys {
            set: keys,
            fetched_at: Instant::now(),
        });

        Ok(())
    }

    async fn upsert_provider_user(&self, claims: ProviderClaims) -> Result<UserData, AuthError> {
        match self.db.user_by_google_id(&claims.sub).await {
            Ok(user) => return Ok(user),
            Err(DatabaseError::NotFound { .. }) => {}
            Err(e) => return Err(AuthError::Db(e)),
        }

        let email = claims
            .email
            .ok_or_else(|| AuthError::InvalidToken("Token has no email claim".to_string()))?;

        match self.db.user_by_email(&email).await {
            Ok(user) if !claims.email_verified => {
                warn!("Refused to link user {} to an unverified email", user.id);

                Err(AuthError::Conflict(
                    "An account with this email exists, but the email is not verified".to_string(),
                ))
            }
            Ok(user) if user.google_id.is_some() => {
                warn!("Refused to relink user {} to another identity", user.id);

                Err(AuthError::Conflict(
                    "An account with this email is linked to another identity".to_string(),
                ))
            }
            // Link the existing account to this identity
            Ok(user) => self
                .db
                .update_user(UpdatedUser {
                    id: user.id,
                    google_id: Some(claims.sub),
                    ..Default::default()
                })
                .await
                .map_err(AuthError::Db),
            Err(DatabaseError::NotFound { .. }) => {
                info!("Creating account for {} on first sign-in", email);

                let name = claims
                    .name
                    .unwrap_or_else(|| email.split('@').next().unwrap_or_default().to_string());

                self.db
                    .create_user(NewUser {
                        email,
                        name,
                        google_id: Some(claims.sub),
                        ..Default::default()
                    })
                    .await
                    .map_err(AuthError::Db)
            }
            Err(e) => Err(AuthError::Db(e)),
        }
    }
}

impl From<&UserData> for Identity {
    fn from(user: &UserData) -> Self {
        Self {
            user_id: user.id,
            email: user.email.clone(),
            name: user.name.clone(),
        }
    }
}
