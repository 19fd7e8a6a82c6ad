//! Configuration validation.
//!
//! Validates configuration at startup to catch common errors early.

use super::{CacheBackend, Config, DatabaseBackend};
use ipnet::IpNet;
use std::net::IpAddr;
use thiserror::Error;

/// Minimum accepted length of the token signing secret.
const MIN_SECRET_LEN: usize = 16;

/// Validation errors for configuration.
#[derive(Debug, Error)]
pub enum ValidationError {
    #[error("auth.secret_key must be at least 16 bytes, got {0}")]
    WeakSecret(usize),
    #[error("auth.algorithm must be one of HS256, HS384, HS512, got '{0}'")]
    UnknownAlgorithm(String),
    #[error("auth.{0} must be greater than zero")]
    ZeroTtl(&'static str),
    #[error("auth.bcrypt_cost must be between 4 and 31, got {0}")]
    BcryptCost(u32),
    #[error("database.url is required for the postgres backend")]
    MissingDatabaseUrl,
    #[error("cache.host is required for the redis backend")]
    MissingCacheHost,
    #[error("mail.{0} is required when mail is enabled")]
    MissingMailField(&'static str),
    #[error("media.{0} is required when media is enabled")]
    MissingMediaField(&'static str),
    #[error("security.banned_ips entry is not an IP or CIDR: '{0}'")]
    InvalidBannedIp(String),
    #[error("security.rate_limits.exempt_ips entry is not an IP: '{0}'")]
    InvalidExemptIp(String),
    #[error("security.cors_origins entry is not a valid origin: '{0}'")]
    InvalidOrigin(String),
    #[error("server.public_url must start with http:// or https://, got '{0}'")]
    InvalidPublicUrl(String),
}

/// Validate a configuration, returning all errors found.
pub fn validate(config: &Config) -> Result<(), Vec<ValidationError>> {
    let mut errors = Vec::new();

    // Token signing
    let auth = &config.auth;
    if auth.secret_key.len() < MIN_SECRET_LEN {
        errors.push(ValidationError::WeakSecret(auth.secret_key.len()));
    }
    if crate::auth::Algorithm::parse(&auth.algorithm).is_none() {
        errors.push(ValidationError::UnknownAlgorithm(auth.algorithm.clone()));
    }
    for (name, ttl) in [
        ("access_token_ttl_secs", auth.access_token_ttl_secs),
        ("refresh_token_ttl_secs", auth.refresh_token_ttl_secs),
        ("email_token_ttl_secs", auth.email_token_ttl_secs),
        ("reset_token_ttl_secs", auth.reset_token_ttl_secs),
    ] {
        if ttl == 0 {
            errors.push(ValidationError::ZeroTtl(name));
        }
    }
    if !(4..=31).contains(&auth.bcrypt_cost) {
        errors.push(ValidationError::BcryptCost(auth.bcrypt_cost));
    }

    // Backends
    if config.database.backend == DatabaseBackend::Postgres && config.database.url.is_empty() {
        errors.push(ValidationError::MissingDatabaseUrl);
    }
    if config.cache.backend == CacheBackend::Redis && config.cache.host.is_empty() {
        errors.push(ValidationError::MissingCacheHost);
    }

    // Mail
    if config.mail.enabled {
        if config.mail.server.is_empty() {
            errors.push(ValidationError::MissingMailField("server"));
        }
        if config.mail.from.is_empty() {
            errors.push(ValidationError::MissingMailField("from"));
        }
    }

    // Media
    if config.media.enabled {
        for (name, value) in [
            ("cloud_name", &config.media.cloud_name),
            ("api_key", &config.media.api_key),
            ("api_secret", &config.media.api_secret),
        ] {
            if value.is_empty() {
                errors.push(ValidationError::MissingMediaField(name));
            }
        }
    }

    // Security
    for entry in &config.security.banned_ips {
        if entry.parse::<IpNet>().is_err() && entry.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::InvalidBannedIp(entry.clone()));
        }
    }
    for entry in &config.security.rate_limits.exempt_ips {
        if entry.parse::<IpAddr>().is_err() {
            errors.push(ValidationError::InvalidExemptIp(entry.clone()));
        }
    }
    for origin in &config.security.cors_origins {
        if origin.parse::<http::HeaderValue>().is_err()
            || !(origin.starts_with("http://") || origin.starts_with("https://"))
        {
            errors.push(ValidationError::InvalidOrigin(origin.clone()));
        }
    }

    if let Some(ref url) = config.server.public_url
        && !(url.starts_with("http://") || url.starts_with("https://"))
    {
        errors.push(ValidationError::InvalidPublicUrl(url.clone()));
    }

    if errors.is_empty() {
        Ok(())
    } else {
        Err(errors)
    }
}
