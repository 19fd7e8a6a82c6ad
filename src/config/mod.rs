//! Configuration loading and management.
//!
//! This module is split into logical submodules:
//! - [`types`]: Core config struct definitions (Config, ServerConfig, backends)
//! - [`env`]: `${VAR}` environment substitution applied before parsing
//! - [`security`]: Bans, CORS and rate limiting (SecurityConfig, RateLimitConfig)
//! - [`validation`]: Startup checks that collect every problem at once

mod env;
mod security;
mod types;
mod validation;

pub use env::substitute;
pub use security::{RateLimitConfig, RouteLimit, SecurityConfig};
pub use types::{
    AuthConfig, CacheBackend, CacheConfig, Config, ConfigError, DatabaseBackend, DatabaseConfig,
    MailConfig, MailTls, MediaConfig, ServerConfig, SignatureAlgorithm,
};
pub use validation::{ValidationError, validate};
