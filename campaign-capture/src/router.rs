use std::future::ready;
use std::sync::Arc;
use std::time::Duration;

use axum::error_handling::HandleErrorLayer;
use axum::extract::{DefaultBodyLimit, State as AxumState};
use axum::http::{header, HeaderName, Method, StatusCode};
use axum::{
    routing::{delete, get, post},
    BoxError, Json, Router,
};
use metrics_exporter_prometheus::PrometheusHandle;
use tower::timeout::{error::Elapsed, TimeoutLayer};
use tower::ServiceBuilder;
use tower_http::cors::{Any, CorsLayer};
use tower_http::trace::TraceLayer;

use crate::api::ErrorResponse;
use crate::limiters::RateLimiter;
use crate::prometheus::track_metrics;
use crate::resolver::CampaignIdPolicy;
use crate::stores::Store;
use crate::time::TimeSource;
use crate::{campaign_endpoint, track_endpoint};

#[derive(Clone)]
pub struct State {
    pub store: Arc<dyn Store + Send + Sync>,
    pub limiter: Arc<dyn RateLimiter + Send + Sync>,
    pub timesource: Arc<dyn TimeSource + Send + Sync>,
    pub campaign_id_policy: CampaignIdPolicy,
}

async fn index() -> &'static str {
    "campaign-capture"
}

async fn readiness(AxumState(state): AxumState<State>) -> StatusCode {
    match state.store.ping().await {
        Ok(()) => StatusCode::OK,
        Err(err) => {
            tracing::warn!("readiness: store ping failed: {}", err);
            StatusCode::SERVICE_UNAVAILABLE
        }
    }
}

/// Requests cut off by the timeout get the same JSON error shape as every
/// other server-side failure.
async fn handle_middleware_error(err: BoxError) -> (StatusCode, Json<ErrorResponse>) {
    let error = if err.is::<Elapsed>() {
        tracing::warn!("request timed out");
        "Request timed out"
    } else {
        tracing::error!("unhandled middleware error: {}", err);
        "Internal server error"
    };

    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Json(ErrorResponse {
            error: error.to_owned(),
            details: None,
        }),
    )
}

pub fn router<
    TZ: TimeSource + Send + Sync + 'static,
    S: Store + Send + Sync + 'static,
    L: RateLimiter + Send + Sync + 'static,
>(
    timesource: TZ,
    store: S,
    limiter: L,
    campaign_id_policy: CampaignIdPolicy,
    request_timeout: Duration,
    max_body_bytes: usize,
    metrics: Option<PrometheusHandle>,
) -> Router {
    let state = State {
        store: Arc::new(store),
        limiter: Arc::new(limiter),
        timesource: Arc::new(timesource),
        campaign_id_policy,
    };

    // The tracking snippet runs on arbitrary customer sites, so any origin is
    // allowed. No credentials are ever accepted.
    let cors = CorsLayer::new()
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([
            header::AUTHORIZATION,
            HeaderName::from_static("x-client-info"),
            HeaderName::from_static("apikey"),
            header::CONTENT_TYPE,
        ])
        .allow_origin(Any);

    let router = Router::new()
        .route("/", get(index))
        .route("/_readiness", get(readiness))
        .route("/_liveness", get(index))
        .route(
            "/track-event",
            post(track_endpoint::event).options(track_endpoint::options),
        )
        .route(
            "/campaigns",
            post(campaign_endpoint::create).get(campaign_endpoint::list),
        )
        .route("/campaigns/:id", delete(campaign_endpoint::delete))
        .route("/campaigns/:id/stats", get(campaign_endpoint::stats))
        .route("/events/recent", get(campaign_endpoint::recent_events))
        .layer(DefaultBodyLimit::max(max_body_bytes))
        .layer(
            ServiceBuilder::new()
                .layer(HandleErrorLayer::new(handle_middleware_error))
                .layer(TimeoutLayer::new(request_timeout)),
        )
        .layer(TraceLayer::new_for_http())
        .layer(cors)
        .layer(axum::middleware::from_fn(track_metrics))
        .with_state(state);

    // Don't install metrics unless asked to
    // Installing a global recorder when capture is used as a library (during tests etc)
    // does not work well.
    match metrics {
        Some(recorder_handle) => {
            router.route("/metrics", get(move || ready(recorder_handle.render())))
        }
        None => router,
    }
}
