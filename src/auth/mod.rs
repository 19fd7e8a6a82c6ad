//! Authentication: password hashing, scoped tokens and current-user lookup.
//!
//! Tokens are HMAC-signed JWTs whose `scope` claim decides what they can be
//! used for:
//! - `access_token`: bearer credential for `/api/users` and `/api/contacts`
//! - `refresh_token`: exchanged for a new token pair; one live token per user
//! - `email_token`: embedded in the confirmation link
//! - `reset_token`: embedded in the password reset link

mod jwt;
mod password;

pub use jwt::{Algorithm, Claims, TokenError};
pub use password::{hash_password, verify_password};

use crate::cache::SharedCache;
use crate::config::AuthConfig;
use crate::db::{Database, User};
use crate::error::ApiError;
use crate::metrics;
use chrono::Utc;
use tracing::{debug, warn};

/// Purpose encoded in a token's `scope` claim.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Scope {
    Access,
    Refresh,
    Email,
    Reset,
}

impl Scope {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Access => "access_token",
            Self::Refresh => "refresh_token",
            Self::Email => "email_token",
            Self::Reset => "reset_token",
        }
    }
}

/// Access and refresh token issued together on login and refresh.
#[derive(Debug, Clone)]
pub struct TokenPair {
    pub access_token: String,
    pub refresh_token: String,
}

/// Issues and validates tokens and resolves bearer tokens to users.
pub struct AuthService {
    algorithm: Algorithm,
    secret: Vec<u8>,
    access_ttl: i64,
    refresh_ttl: i64,
    email_ttl: i64,
    reset_ttl: i64,
    bcrypt_cost: u32,
    store: Database,
    cache: SharedCache,
}

impl AuthService {
    /// Build from validated configuration.
    pub fn new(config: &AuthConfig, store: Database, cache: SharedCache) -> Result<Self, TokenError> {
        let algorithm = Algorithm::parse(&config.algorithm)
            .ok_or_else(|| TokenError::AlgorithmMismatch(config.algorithm.clone()))?;
        Ok(Self {
            algorithm,
            secret: config.secret_key.as_bytes().to_vec(),
            access_ttl: ttl(config.access_token_ttl_secs),
            refresh_ttl: ttl(config.refresh_token_ttl_secs),
            email_ttl: ttl(config.email_token_ttl_secs),
            reset_ttl: ttl(config.reset_token_ttl_secs),
            bcrypt_cost: config.bcrypt_cost,
            store,
            cache,
        })
    }

    pub fn store(&self) -> &Database {
        &self.store
    }

    /// Seconds a password reset link stays valid.
    pub fn reset_ttl_secs(&self) -> i64 {
        self.reset_ttl
    }

    /// Hash a password on the blocking pool.
    pub async fn hash_password(&self, password: &str) -> Result<String, ApiError> {
        let password = password.to_owned();
        let cost = self.bcrypt_cost;
        tokio::task::spawn_blocking(move || hash_password(&password, cost))
            .await
            .map_err(ApiError::internal)?
            .map_err(ApiError::internal)
    }

    /// Check a password on the blocking pool.
    pub async fn verify_password(&self, password: &str, hash: &str) -> bool {
        let password = password.to_owned();
        let hash = hash.to_owned();
        tokio::task::spawn_blocking(move || verify_password(&password, &hash))
            .await
            .unwrap_or(false)
    }

    fn issue(&self, scope: Scope, email: &str, ttl: i64) -> Result<String, ApiError> {
        let now = Utc::now().timestamp();
        let claims = Claims {
            sub: Some(email.to_string()),
            iat: now,
            exp: now + ttl,
            scope: scope.as_str().to_string(),
            jti: uuid::Uuid::new_v4().to_string(),
        };
        jwt::encode(&claims, self.algorithm, &self.secret).map_err(ApiError::internal)
    }

    pub fn create_access_token(&self, email: &str) -> Result<String, ApiError> {
        self.issue(Scope::Access, email, self.access_ttl)
    }

    pub fn create_refresh_token(&self, email: &str) -> Result<String, ApiError> {
        self.issue(Scope::Refresh, email, self.refresh_ttl)
    }

    pub fn create_email_token(&self, email: &str) -> Result<String, ApiError> {
        self.issue(Scope::Email, email, self.email_ttl)
    }

    pub fn create_reset_token(&self, email: &str) -> Result<String, ApiError> {
        self.issue(Scope::Reset, email, self.reset_ttl)
    }

    pub fn create_token_pair(&self, email: &str) -> Result<TokenPair, ApiError> {
        Ok(TokenPair {
            access_token: self.create_access_token(email)?,
            refresh_token: self.create_refresh_token(email)?,
        })
    }

    fn decode(&self, token: &str) -> Result<Claims, TokenError> {
        jwt::decode(token, self.algorithm, &self.secret).inspect_err(|e| {
            metrics::record_auth_failure(e.reason());
            debug!(error = %e, "Token rejected");
        })
    }

    /// Subject of a refresh token.
    pub fn decode_refresh_token(&self, token: &str) -> Result<String, ApiError> {
        let claims = self.decode(token).map_err(|_| ApiError::CredentialsRejected)?;
        if claims.scope != Scope::Refresh.as_str() {
            metrics::record_auth_failure("scope");
            return Err(ApiError::unauthorized("Invalid scope for token"));
        }
        claims.sub.ok_or(ApiError::CredentialsRejected)
    }

    /// Subject of an e-mail confirmation or password reset token.
    pub fn email_from_token(&self, token: &str, scope: Scope) -> Result<String, ApiError> {
        let invalid = || ApiError::unprocessable("Invalid token for email verification");
        let claims = self.decode(token).map_err(|_| invalid())?;
        if claims.scope != scope.as_str() {
            metrics::record_auth_failure("scope");
            return Err(ApiError::unauthorized("Invalid scope for token"));
        }
        claims.sub.ok_or_else(invalid)
    }

    /// Resolve an access token to its user, consulting the cache first.
    pub async fn current_user(&self, token: &str) -> Result<User, ApiError> {
        let claims = self.decode(token).map_err(|_| ApiError::CredentialsRejected)?;
        if claims.scope != Scope::Access.as_str() {
            metrics::record_auth_failure("scope");
            return Err(ApiError::CredentialsRejected);
        }
        let Some(email) = claims.sub else {
            metrics::record_auth_failure("subject");
            return Err(ApiError::CredentialsRejected);
        };

        match self.cache.get(&email).await {
            Ok(Some(user)) => {
                metrics::record_cache("hit");
                return Ok(user);
            }
            Ok(None) => metrics::record_cache("miss"),
            Err(e) => {
                metrics::record_cache("error");
                warn!(error = %e, "User cache lookup failed");
            }
        }

        let Some(user) = self.store.user_by_email(&email).await? else {
            metrics::record_auth_failure("unknown_user");
            return Err(ApiError::CredentialsRejected);
        };
        if let Err(e) = self.cache.put(&user).await {
            warn!(error = %e, "User cache store failed");
        }
        Ok(user)
    }

    /// Drop a user's cached record after it changed.
    pub async fn forget_user(&self, email: &str) {
        if let Err(e) = self.cache.evict(email).await {
            warn!(error = %e, email = %email, "User cache eviction failed");
        }
    }
}

fn ttl(secs: u64) -> i64 {
    i64::try_from(secs).unwrap_or(i64::MAX / 2)
}
