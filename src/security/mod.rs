//! Request admission: IP bans and per-route rate limits.
//!
//! - **IP bans**: static list of addresses/networks refused before routing
//! - **Rate limiting**: governor token buckets per `(route class, client IP)`

pub mod ip_ban;
pub mod rate_limit;

pub use ip_ban::IpBanList;
pub use rate_limit::{RateLimitManager, RouteClass};
