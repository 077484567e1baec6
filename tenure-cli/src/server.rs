use std::sync::Arc;

use axum::{
    extract::{Path, Request, State},
    http::{HeaderMap, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use tower_http::cors::CorsLayer;

use tenure_core::cancel::CancellationToken;
use tenure_core::{ClientId, Lease, Lock, LockError, ResourceId};

use crate::handlers::*;

pub type SharedLock = Arc<dyn Lock>;

#[derive(Clone)]
pub struct AppState {
    pub lock: SharedLock,
    pub limits: AcquireLimits,
}

pub async fn run(
    host: &str,
    port: u16,
    lock: SharedLock,
    limits: AcquireLimits,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    let api_key = std::env::var("TENURE_API_KEY").ok().filter(|k| !k.is_empty());
    if api_key.is_some() {
        tracing::info!("API key authentication enabled");
    } else {
        tracing::warn!("No TENURE_API_KEY set, server is open (dev mode)");
    }

    tracing::info!(
        max_attempts = limits.max_attempts,
        max_total_wait_ms = limits.max_total_wait.as_millis() as u64,
        "Retry limits for waiting acquisitions"
    );

    let app = router(AppState { lock, limits }, api_key);
    let addr = format!("{}:{}", host, port);
    tracing::info!("Tenure lock server starting on http://{}", addr);

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown_signal(cancel))
        .await?;
    Ok(())
}

pub fn router(state: AppState, api_key: Option<String>) -> Router {
    Router::new()
        // Health is always open (no auth)
        .route("/health", get(health))
        .route("/locks", post(acquire_lock).delete(release_lock))
        .route("/locks/{resource_id}", get(lock_status))
        .layer(middleware::from_fn_with_state(
            api_key.map(Arc::<str>::from),
            auth_middleware,
        ))
        .layer(CorsLayer::permissive())
        .with_state(state)
}

/// Waits for Ctrl-C, then cancels acquisitions still waiting between retries.
async fn shutdown_signal(cancel: CancellationToken) {
    if let Err(e) = tokio::signal::ctrl_c().await {
        tracing::error!("Failed to listen for shutdown signal: {}", e);
        return;
    }
    tracing::info!("Shutting down, cancelling pending acquisitions");
    cancel.cancel();
}

// ─── Auth Middleware ────────────────────────────────────────────────────────

async fn auth_middleware(
    State(expected_key): State<Option<Arc<str>>>,
    headers: HeaderMap,
    request: Request,
    next: Next,
) -> Result<Response, StatusCode> {
    // If no API key is configured, allow all requests (dev mode)
    let Some(expected_key) = expected_key else {
        return Ok(next.run(request).await);
    };

    if request.uri().path() == "/health" {
        return Ok(next.run(request).await);
    }

    let token = headers
        .get("authorization")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.strip_prefix("Bearer "))
        .unwrap_or("");

    if token == &*expected_key {
        Ok(next.run(request).await)
    } else {
        tracing::warn!("Unauthorized request to {}", request.uri().path());
        Err(StatusCode::UNAUTHORIZED)
    }
}

// ─── Handlers ───────────────────────────────────────────────────────────────

/// Store calls block, so they run off the async executor.
async fn blocking<T, F>(f: F) -> Result<T, Response>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, LockError> + Send + 'static,
{
    match tokio::task::spawn_blocking(f).await {
        Ok(Ok(value)) => Ok(value),
        Ok(Err(err)) => {
            let (status, body) = error_response(&err);
            if status.is_server_error() {
                tracing::error!(error = %err, "Lock operation failed");
            } else {
                tracing::info!(error = %err, "Lock denied");
            }
            Err((status, Json(body)).into_response())
        }
        Err(join_err) => {
            tracing::error!(error = %join_err, "Lock task panicked");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ApiResponse::<()>::err("internal error")),
            )
                .into_response())
        }
    }
}

async fn health() -> Json<ApiResponse<HealthResponse>> {
    Json(ApiResponse::ok(HealthResponse {
        status: "ok".to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
    }))
}

async fn acquire_lock(State(state): State<AppState>, Json(req): Json<AcquireLockRequest>) -> Response {
    if let Err(e) = req.validate(&state.limits) {
        return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err(e))).into_response();
    }
    let mut backoff = match req.backoff() {
        Ok(backoff) => backoff,
        Err(e) => return (StatusCode::BAD_REQUEST, Json(ApiResponse::<()>::err(e))).into_response(),
    };

    let resource_id = ResourceId::new(req.resource_id);
    let client_id = req.client_id.map(ClientId::new).unwrap_or_else(ClientId::generate);

    let lock = state.lock;
    let result = blocking(move || lock.acquire_with_backoff(&resource_id, &client_id, &mut backoff)).await;
    match result {
        Ok(lease) => {
            tracing::info!(
                resource_id = %lease.resource_id(),
                client_id = %lease.client_id(),
                sequence = lease.sequence(),
                "Lock acquired"
            );
            (StatusCode::CREATED, Json(ApiResponse::ok(lease))).into_response()
        }
        Err(response) => response,
    }
}

async fn release_lock(State(state): State<AppState>, Json(lease): Json<Lease>) -> Response {
    let lock = state.lock;
    let resource_id = lease.resource_id().clone();
    match blocking(move || lock.release(&lease)).await {
        Ok(outcome) => {
            let body = ReleaseResponse::from(outcome);
            tracing::info!(resource_id = %resource_id, outcome = body.outcome, "Lock release handled");
            Json(ApiResponse::ok(body)).into_response()
        }
        Err(response) => response,
    }
}

async fn lock_status(State(state): State<AppState>, Path(resource_id): Path<String>) -> Response {
    let lock = state.lock;
    let resource_id = ResourceId::new(resource_id);
    let lookup = resource_id.clone();
    match blocking(move || lock.inspect(&lookup)).await {
        Ok(Some(row)) => Json(ApiResponse::ok(LockInfo::from_row(&row, chrono::Utc::now()))).into_response(),
        Ok(None) => (
            StatusCode::NOT_FOUND,
            Json(ApiResponse::<()>::err(format!("No lock held on '{}'", resource_id))),
        )
            .into_response(),
        Err(response) => response,
    }
}
