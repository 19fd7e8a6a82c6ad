//! Rate limiting for API routes.
//!
//! Every route belongs to a [`RouteClass`] with its own request budget. Each
//! `(route class, client IP)` pair gets an independent `governor` token
//! bucket holding `times` tokens that refill evenly over `seconds`.

use crate::config::{RateLimitConfig, RouteLimit};
use dashmap::DashMap;
use governor::{Quota, RateLimiter as GovRateLimiter};
use std::collections::HashSet;
use std::net::IpAddr;
use std::num::NonZeroU32;
use std::time::{Duration, Instant};
use tracing::debug;

/// Type alias for governor's direct rate limiter.
type DirectRateLimiter = governor::DefaultDirectRateLimiter;

/// Group of endpoints sharing one request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RouteClass {
    ContactsWrite,
    ContactsRead,
    ContactRead,
    UsersRead,
    UsersSensitive,
    PasswordReset,
}

impl RouteClass {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::ContactsWrite => "contacts_write",
            Self::ContactsRead => "contacts_read",
            Self::ContactRead => "contact_read",
            Self::UsersRead => "users_read",
            Self::UsersSensitive => "users_sensitive",
            Self::PasswordReset => "password_reset",
        }
    }

    fn limit(self, config: &RateLimitConfig) -> RouteLimit {
        match self {
            Self::ContactsWrite => config.contacts_write,
            Self::ContactsRead => config.contacts_read,
            Self::ContactRead => config.contact_read,
            Self::UsersRead => config.users_read,
            Self::UsersSensitive => config.users_sensitive,
            Self::PasswordReset => config.password_reset,
        }
    }
}

/// Token bucket allowing `times` requests at once, refilled over `seconds`.
fn quota(limit: RouteLimit) -> Quota {
    let burst = NonZeroU32::new(limit.times).unwrap_or(NonZeroU32::MIN);
    let period = (Duration::from_secs(limit.seconds) / burst.get()).max(Duration::from_millis(1));
    Quota::with_period(period)
        .unwrap_or_else(|| Quota::per_second(burst))
        .allow_burst(burst)
}

struct Bucket {
    limiter: DirectRateLimiter,
    last_seen: Instant,
}

/// Thread-safe rate limit manager using governor.
pub struct RateLimitManager {
    buckets: DashMap<(RouteClass, IpAddr), Bucket>,
    exempt: HashSet<IpAddr>,
    config: RateLimitConfig,
}

impl RateLimitManager {
    /// Create a new rate limit manager with the given configuration.
    /// Unparseable exempt entries are ignored; config validation reports them.
    pub fn new(config: RateLimitConfig) -> Self {
        let exempt = config
            .exempt_ips
            .iter()
            .filter_map(|ip| ip.parse::<IpAddr>().ok())
            .map(|ip| ip.to_canonical())
            .collect();
        Self {
            buckets: DashMap::new(),
            exempt,
            config,
        }
    }

    /// Check whether `ip` may make another request in `class`.
    ///
    /// Returns `true` if allowed, `false` if rate limited.
    pub fn check(&self, class: RouteClass, ip: IpAddr) -> bool {
        let ip = ip.to_canonical();
        if !self.config.enabled || self.exempt.contains(&ip) {
            return true;
        }

        let mut bucket = self.buckets.entry((class, ip)).or_insert_with(|| Bucket {
            limiter: GovRateLimiter::direct(quota(class.limit(&self.config))),
            last_seen: Instant::now(),
        });
        bucket.last_seen = Instant::now();

        let allowed = bucket.limiter.check().is_ok();
        if !allowed {
            debug!(ip = %ip, route = class.as_str(), "rate limit exceeded");
        }
        allowed
    }

    /// Drop buckets idle for longer than `idle`. A bucket idle for a full
    /// window is back at capacity, so dropping it loses nothing.
    pub fn prune_idle(&self, idle: Duration) -> usize {
        let before = self.buckets.len();
        self.buckets
            .retain(|_, bucket| bucket.last_seen.elapsed() < idle);
        let removed = before - self.buckets.len();
        if removed > 0 {
            debug!(removed, "pruned idle rate limit buckets");
        }
        removed
    }

    /// Longest configured window; buckets idle for this long are full.
    pub fn longest_window(&self) -> Duration {
        [
            RouteClass::ContactsWrite,
            RouteClass::ContactsRead,
            RouteClass::ContactRead,
            RouteClass::UsersRead,
            RouteClass::UsersSensitive,
            RouteClass::PasswordReset,
        ]
        .into_iter()
        .map(|class| Duration::from_secs(class.limit(&self.config).seconds))
        .max()
        .unwrap_or(Duration::from_secs(60))
    }

    /// Number of live buckets.
    pub fn bucket_count(&self) -> usize {
        self.buckets.len()
    }
}

impl Default for RateLimitManager {
    fn default() -> Self {
        Self::new(RateLimitConfig::default())
    }
}
