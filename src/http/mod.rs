//! REST API server.
//!
//! All API routes live under `/api`. Requests pass, outermost first, through
//! the IP ban check, request tracing, CORS and metrics before reaching a
//! handler. Route-class rate limits are applied inside handlers once the
//! client address is known.

mod auth;
mod contacts;
mod extract;
mod schemas;
mod users;

#[cfg(test)]
mod tests;

use crate::auth::AuthService;
use crate::db::Database;
use crate::error::ApiError;
use crate::mail::SharedMailer;
use crate::media::SharedAvatarStore;
use crate::metrics;
use crate::security::{IpBanList, RateLimitManager, RouteClass};
use crate::telemetry::RequestTimer;
use axum::extract::{ConnectInfo, MatchedPath, Request, State};
use axum::http::{HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use schemas::MessageResponse;
use std::future::Future;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use tokio::net::TcpListener;
use tower_http::cors::{AllowHeaders, AllowMethods, AllowOrigin, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{error, info, warn};

/// Shared API state.
#[derive(Clone)]
pub struct AppState {
    pub store: Database,
    pub auth: Arc<AuthService>,
    pub mailer: SharedMailer,
    pub avatars: SharedAvatarStore,
    pub limiter: Arc<RateLimitManager>,
    pub bans: Arc<IpBanList>,
    /// Base for links in e-mail; the request `Host` is used when unset.
    pub public_url: Option<String>,
}

impl AppState {
    /// Consume one request from `ip`'s budget for `class`.
    pub fn admit(&self, class: RouteClass, ip: IpAddr) -> Result<(), ApiError> {
        if self.limiter.check(class, ip) {
            Ok(())
        } else {
            metrics::record_rate_limited(class.as_str());
            Err(ApiError::TooManyRequests)
        }
    }
}

/// Build the application router.
pub fn router(state: AppState, cors_origins: &[String]) -> Router {
    Router::new()
        .route("/", get(read_root))
        .route("/api/healthchecker", get(healthchecker))
        .merge(auth::routes())
        .merge(users::routes())
        .merge(contacts::routes())
        .layer(middleware::from_fn(track_metrics))
        .layer(cors_layer(cors_origins))
        .layer(TraceLayer::new_for_http())
        .layer(middleware::from_fn_with_state(state.clone(), ban_ips))
        .with_state(state)
}

fn cors_layer(origins: &[String]) -> CorsLayer {
    let origins: Vec<HeaderValue> = origins
        .iter()
        .filter_map(|origin| match origin.parse::<HeaderValue>() {
            Ok(value) => Some(value),
            Err(e) => {
                warn!(origin = %origin, error = %e, "Ignoring invalid CORS origin");
                None
            }
        })
        .collect();
    CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods(AllowMethods::mirror_request())
        .allow_headers(AllowHeaders::mirror_request())
        .allow_credentials(true)
}

/// Refuse banned addresses before routing.
async fn ban_ips(
    State(state): State<AppState>,
    ConnectInfo(addr): ConnectInfo<SocketAddr>,
    request: Request,
    next: Next,
) -> Response {
    if state.bans.is_banned(addr.ip()) {
        metrics::record_banned();
        info!(ip = %addr.ip(), path = %request.uri().path(), "Refused banned address");
        return ApiError::Forbidden("You are banned".into()).into_response();
    }
    next.run(request).await
}

async fn track_metrics(request: Request, next: Next) -> Response {
    let route = request
        .extensions()
        .get::<MatchedPath>()
        .map(|p| p.as_str().to_owned())
        .unwrap_or_else(|| "unmatched".to_owned());
    let timer = RequestTimer::new(request.method().as_str(), route);
    let response = next.run(request).await;
    timer.finish(response.status().as_u16());
    response
}

async fn read_root() -> Json<MessageResponse> {
    Json(MessageResponse::new("REST APP v1.2"))
}

async fn healthchecker(State(state): State<AppState>) -> Response {
    match state.store.ping().await {
        Ok(()) => Json(MessageResponse::new("Welcome to FastAPI!")).into_response(),
        Err(e) => {
            error!(error = %e, "Health check failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(serde_json::json!({ "detail": "Error connecting to the database" })),
            )
                .into_response()
        }
    }
}

/// Serve the API until `shutdown` resolves.
pub async fn serve(
    listener: TcpListener,
    app: Router,
    shutdown: impl Future<Output = ()> + Send + 'static,
) -> std::io::Result<()> {
    info!(addr = ?listener.local_addr().ok(), "API server listening");
    axum::serve(
        listener,
        app.into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(shutdown)
    .await
}

async fn metrics_handler() -> String {
    metrics::gather_metrics()
}

/// Run the HTTP server for Prometheus metrics.
///
/// Binds to `0.0.0.0:port` and serves the `/metrics` endpoint.
/// This is a long-running task that should be spawned in the background.
pub async fn run_metrics_server(port: u16) {
    let app = Router::new().route("/metrics", get(metrics_handler));

    let addr = SocketAddr::from(([0, 0, 0, 0], port));
    info!("Prometheus HTTP server listening on {}", addr);

    let listener = match TcpListener::bind(&addr).await {
        Ok(listener) => listener,
        Err(e) => {
            error!("Failed to bind metrics server on {}: {}", addr, e);
            return;
        }
    };

    if let Err(e) = axum::serve(listener, app).await {
        error!("Metrics server error: {}", e);
    }
}
