use std::time::Duration;

use axum::Json;
use axum::Router;
use axum::extract::State;
use axum::http::Method;
use axum::http::StatusCode;
use axum::http::header::{ACCEPT, CONTENT_TYPE};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use serde::Serialize;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;
use tracing::{debug, info};

use crate::state::AppState;
use crate::store::bounded;

mod claims;
mod coupons;

pub fn router(state: AppState) -> Router {
    // Browser front-ends call from their own origin
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods([Method::GET, Method::POST, Method::OPTIONS])
        .allow_headers([ACCEPT, CONTENT_TYPE])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/health", get(health_live))
        .route("/health/ready", get(health_ready))
        .merge(claims::router())
        .merge(coupons::router())
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .with_state(state)
}

async fn health_live(State(state): State<AppState>) -> Json<HealthResponse> {
    let uptime = state.start_time.elapsed().as_secs();
    Json(HealthResponse {
        status: "live",
        uptime_seconds: uptime,
    })
}

async fn health_ready(State(state): State<AppState>) -> Result<Json<ReadyResponse>, HttpError> {
    let unavailable = |err: crate::store::StoreError| {
        debug!(error = %err, "Readiness check failed");
        HttpError::new(
            StatusCode::SERVICE_UNAVAILABLE,
            "Storage unavailable".to_string(),
        )
    };

    bounded(state.storage_timeout, state.storage.ping())
        .await
        .map_err(unavailable)?;
    let coupons = bounded(state.storage_timeout, state.storage.coupons.count())
        .await
        .map_err(unavailable)?;
    let rotation_cursor = bounded(state.storage_timeout, state.storage.coupons.cursor())
        .await
        .map_err(unavailable)?;

    Ok(Json(ReadyResponse {
        status: "ready",
        storage: state.storage.backend_name(),
        coupons,
        rotation_cursor,
        cooldown_period_seconds: state.claims.cooldown_period_seconds(),
    }))
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct HealthResponse {
    status: &'static str,
    uptime_seconds: u64,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct ReadyResponse {
    status: &'static str,
    storage: &'static str,
    coupons: u64,
    /// Stored value, may exceed `coupons` until the next claim normalizes it.
    rotation_cursor: u64,
    cooldown_period_seconds: u64,
}

/// Failure envelope shared by every endpoint: `{success:false, message}`.
#[derive(Debug)]
pub struct HttpError {
    status: StatusCode,
    message: String,
}

impl HttpError {
    pub fn new(status: StatusCode, message: String) -> Self {
        assert!(
            !status.is_success(),
            "Error status cannot be a success code"
        );
        assert!(!message.is_empty(), "Error message cannot be empty");
        Self { status, message }
    }

    pub fn bad_request(message: impl Into<String>) -> Self {
        Self::new(StatusCode::BAD_REQUEST, message.into())
    }

    pub fn internal() -> Self {
        Self::new(
            StatusCode::INTERNAL_SERVER_ERROR,
            crate::claims::FAILURE_MESSAGE.to_string(),
        )
    }
}

impl IntoResponse for HttpError {
    fn into_response(self) -> Response {
        info!(status = %self.status, "HTTP error: {}", self.message);
        let body = Json(ErrorBody {
            success: false,
            message: self.message,
        });
        (self.status, body).into_response()
    }
}

#[derive(Debug, Serialize)]
struct ErrorBody {
    success: bool,
    message: String,
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::sync::Arc;
    use std::time::Duration;

    use axum::Router;
    use axum::body::{Body, to_bytes};
    use axum::http::{Request, Response};
    use chrono::Utc;
    use serde_json::Value;
    use tower::ServiceExt;

    use crate::claims::ClaimOrchestrator;
    use crate::clock::ManualClock;
    use crate::config::{CacheConfig, ClaimsConfig};
    use crate::state::{ApiCache, AppState};
    use crate::store::Storage;

    pub struct TestApp {
        pub router: Router,
        pub storage: Storage,
        pub clock: ManualClock,
    }

    pub async fn app(codes: &[&str], cooldown_period_seconds: u64) -> TestApp {
        let storage = Storage::memory();
        let codes: Vec<String> = codes.iter().map(|c| c.to_string()).collect();
        storage.coupons.seed(&codes, Utc::now()).await.unwrap();

        let clock = ManualClock::new();
        let timeout = Duration::from_secs(2);
        let claims = ClaimsConfig {
            cooldown_period_seconds,
            ..ClaimsConfig::default()
        };
        let orchestrator = ClaimOrchestrator::new(
            storage.clone(),
            Arc::new(ApiCache::new(&CacheConfig::default())),
            Arc::new(clock.clone()),
            &claims,
            timeout,
        );
        let state = AppState::new(
            storage.clone(),
            Arc::new(orchestrator),
            Arc::new(clock.clone()),
            timeout,
            false,
        );

        TestApp {
            router: super::router(state),
            storage,
            clock,
        }
    }

    impl TestApp {
        pub async fn send(&self, request: Request<Body>) -> Response<Body> {
            self.router.clone().oneshot(request).await.unwrap()
        }
    }

    pub async fn json_body(response: Response<Body>) -> Value {
        let bytes = to_bytes(response.into_body(), 64 * 1024).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }
}
