//! Security configuration for bans, CORS and rate limiting.

use serde::Deserialize;

/// Security configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct SecurityConfig {
    /// IP addresses or CIDR networks refused with 403 before routing.
    #[serde(default = "default_banned_ips")]
    pub banned_ips: Vec<String>,
    /// Origins allowed by CORS.
    #[serde(default = "default_cors_origins")]
    pub cors_origins: Vec<String>,
    /// Rate limiting configuration.
    #[serde(default)]
    pub rate_limits: RateLimitConfig,
}

impl Default for SecurityConfig {
    fn default() -> Self {
        Self {
            banned_ips: default_banned_ips(),
            cors_origins: default_cors_origins(),
            rate_limits: RateLimitConfig::default(),
        }
    }
}

fn default_banned_ips() -> Vec<String> {
    vec!["192.168.1.1".to_string(), "192.168.1.2".to_string()]
}

fn default_cors_origins() -> Vec<String> {
    vec!["http://localhost:3000".to_string()]
}

/// A request budget: `times` requests per `seconds`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
pub struct RouteLimit {
    pub times: u32,
    pub seconds: u64,
}

impl RouteLimit {
    pub const fn new(times: u32, seconds: u64) -> Self {
        Self { times, seconds }
    }
}

/// Rate limiting configuration, one budget per route class, per client IP.
#[derive(Debug, Clone, Deserialize)]
pub struct RateLimitConfig {
    /// Disable to turn every check into a pass (default: true).
    #[serde(default = "default_enabled")]
    pub enabled: bool,
    /// Create, update, patch and delete of contacts (default: 10/60s).
    #[serde(default = "default_contacts_write")]
    pub contacts_write: RouteLimit,
    /// Listing and birthday queries (default: 10/60s).
    #[serde(default = "default_contacts_read")]
    pub contacts_read: RouteLimit,
    /// Fetching a single contact (default: 40/60s).
    #[serde(default = "default_contact_read")]
    pub contact_read: RouteLimit,
    /// Profile reads and avatar uploads (default: 10/60s).
    #[serde(default = "default_users_read")]
    pub users_read: RouteLimit,
    /// E-mail and password changes (default: 2/60s).
    #[serde(default = "default_users_sensitive")]
    pub users_sensitive: RouteLimit,
    /// Password reset e-mail requests (default: 10/300s).
    #[serde(default = "default_password_reset")]
    pub password_reset: RouteLimit,
    /// IP addresses exempt from all rate limiting.
    #[serde(default)]
    pub exempt_ips: Vec<String>,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: default_enabled(),
            contacts_write: default_contacts_write(),
            contacts_read: default_contacts_read(),
            contact_read: default_contact_read(),
            users_read: default_users_read(),
            users_sensitive: default_users_sensitive(),
            password_reset: default_password_reset(),
            exempt_ips: Vec::new(),
        }
    }
}

fn default_enabled() -> bool {
    true
}

fn default_contacts_write() -> RouteLimit {
    RouteLimit::new(10, 60)
}

fn default_contacts_read() -> RouteLimit {
    RouteLimit::new(10, 60)
}

fn default_contact_read() -> RouteLimit {
    RouteLimit::new(40, 60)
}

fn default_users_read() -> RouteLimit {
    RouteLimit::new(10, 60)
}

fn default_users_sensitive() -> RouteLimit {
    RouteLimit::new(2, 60)
}

fn default_password_reset() -> RouteLimit {
    RouteLimit::new(10, 300)
}
