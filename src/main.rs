//! contacts-api - multi-user contacts REST service
//!
//! Users sign up, confirm their e-mail and manage a private address book
//! over a JSON API backed by PostgreSQL, with Redis caching user lookups.

mod auth;
mod cache;
mod config;
mod db;
mod error;
mod http;
mod mail;
mod media;
mod metrics;
mod security;
mod telemetry;

use crate::auth::AuthService;
use crate::cache::{MemoryCache, RedisCache, SharedCache};
use crate::config::{CacheBackend, Config, DatabaseBackend};
use crate::db::{Database, MemoryStore, PgStore};
use crate::http::AppState;
use crate::mail::{LogMailer, SharedMailer, SmtpMailer};
use crate::media::{CloudinaryStore, DisabledAvatarStore, SharedAvatarStore};
use crate::security::{IpBanList, RateLimitManager};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use tracing_subscriber::EnvFilter;

/// How often idle rate limit buckets and expired cache entries are dropped.
const PRUNE_INTERVAL: Duration = Duration::from_secs(300);

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Initialize tracing
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    // Load configuration
    let config_path = std::env::args()
        .nth(1)
        .unwrap_or_else(|| "config.toml".to_string());

    let config = Config::load(&config_path).map_err(|e| {
        error!(path = %config_path, error = %e, "Failed to load config");
        e
    })?;

    if let Err(errors) = config::validate(&config) {
        for e in &errors {
            error!(error = %e, "Invalid configuration");
        }
        return Err(anyhow::anyhow!(
            "{} configuration error(s) in {}",
            errors.len(),
            config_path
        ));
    }

    info!(
        listen = %config.server.listen,
        database = ?config.database.backend,
        cache = ?config.cache.backend,
        "Starting contacts-api"
    );

    // Storage
    let store: Database = match config.database.backend {
        DatabaseBackend::Postgres => {
            Arc::new(PgStore::connect(&config.database.url, config.database.max_connections).await?)
        }
        DatabaseBackend::Memory => {
            warn!("Using in-memory storage; data is lost on exit");
            Arc::new(MemoryStore::new())
        }
    };

    // User cache
    let mut memory_cache = None;
    let cache: SharedCache = match config.cache.backend {
        CacheBackend::Redis => Arc::new(
            RedisCache::connect(config.cache.connection_info(), config.cache.user_ttl_secs).await?,
        ),
        CacheBackend::Memory => {
            let cache = Arc::new(MemoryCache::new(config.cache.user_ttl_secs));
            memory_cache = Some(Arc::clone(&cache));
            cache
        }
    };

    let auth = AuthService::new(&config.auth, Arc::clone(&store), cache)?;

    let mailer: SharedMailer = if config.mail.enabled {
        info!(server = %config.mail.server, port = config.mail.port, "SMTP delivery enabled");
        Arc::new(SmtpMailer::new(&config.mail)?)
    } else {
        info!("Mail delivery disabled; messages will be logged");
        Arc::new(LogMailer)
    };

    let avatars: SharedAvatarStore = if config.media.enabled {
        info!(cloud = %config.media.cloud_name, "Cloudinary avatar uploads enabled");
        Arc::new(CloudinaryStore::new(&config.media)?)
    } else {
        info!("Avatar uploads disabled");
        Arc::new(DisabledAvatarStore)
    };

    let limiter = Arc::new(RateLimitManager::new(config.security.rate_limits.clone()));
    let bans = Arc::new(IpBanList::from_entries(&config.security.banned_ips));
    if bans.is_empty() {
        info!("No banned addresses configured");
    } else {
        info!(banned = bans.len(), "IP ban list loaded");
    }

    // Prometheus metrics are optional.
    // Convention: metrics_port = 0 disables the HTTP endpoint (used by tests).
    metrics::init();
    let metrics_port = config.server.metrics_port.unwrap_or(9090);
    if metrics_port == 0 {
        info!("Metrics endpoint disabled");
    } else {
        tokio::spawn(http::run_metrics_server(metrics_port));
        info!(port = metrics_port, "Prometheus HTTP server started");
    }

    // Rate limiter and memory cache pruning
    {
        let limiter = Arc::clone(&limiter);
        tokio::spawn(async move {
            let mut interval = tokio::time::interval(PRUNE_INTERVAL);
            loop {
                interval.tick().await;
                limiter.prune_idle(limiter.longest_window());
                debug!(buckets = limiter.bucket_count(), "Rate limit buckets live");
                if let Some(cache) = &memory_cache {
                    let removed = cache.prune_expired();
                    if removed > 0 {
                        info!(removed, remaining = cache.entry_count(), "Expired users pruned from cache");
                    }
                }
            }
        });
    }

    let state = AppState {
        store,
        auth: Arc::new(auth),
        mailer,
        avatars,
        limiter,
        bans,
        public_url: config.server.public_url.clone(),
    };
    let app = http::router(state, &config.security.cors_origins);

    let listener = tokio::net::TcpListener::bind(config.server.listen).await?;
    http::serve(listener, app, shutdown_signal()).await?;

    info!("Shutdown complete");
    Ok(())
}

async fn shutdown_signal() {
    if let Err(e) = tokio::signal::ctrl_c().await {
        error!(error = %e, "Failed to listen for shutdown signal");
        std::future::pending::<()>().await;
    }
    info!("Shutdown signal received");
}
