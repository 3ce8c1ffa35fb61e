use axum::extract::State;
use axum::http::{HeaderMap, StatusCode};
use axum::{debug_handler, Json};
use bytes::Bytes;
use serde_json::Value;
use tracing::{info, instrument, warn, Span};

use crate::api::{TrackError, TrackResponse};
use crate::event::{NewTrackingEvent, RequestContext};
use crate::extractors::{user_agent, ClientId};
use crate::limiters::RateLimitDecision;
use crate::prometheus::{report_dropped_events, report_internal_error_metrics, report_stored_event};
use crate::resolver::resolve_campaign;
use crate::router;
use crate::validation::{validate_event, Violation};

/// Where in the ingestion pipeline a request was rejected.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stage {
    RateLimiting,
    Parsing,
    Validating,
    Resolving,
    Writing,
}

impl Stage {
    fn as_str(&self) -> &'static str {
        match self {
            Stage::RateLimiting => "rate_limiting",
            Stage::Parsing => "parsing",
            Stage::Validating => "validating",
            Stage::Resolving => "resolving",
            Stage::Writing => "writing",
        }
    }
}

fn reject(stage: Stage, client_id: &str, err: TrackError) -> TrackError {
    report_dropped_events(err.to_metric_tag(), 1);
    if matches!(err, TrackError::StorageFailure(_)) {
        report_internal_error_metrics(err.to_metric_tag(), stage.as_str());
        warn!(client_id, stage = stage.as_str(), "event: rejected: {}", err);
    } else {
        info!(client_id, stage = stage.as_str(), "event: rejected: {}", err);
    }
    err
}

/// Ingest one tracking event: rate limit, parse, validate, sanitize, resolve the
/// campaign, then store. Any failing stage ends the request.
#[instrument(skip_all, fields(client_id = %client_id.0, event_type, campaign_id))]
#[debug_handler]
pub async fn event(
    State(state): State<router::State>,
    client_id: ClientId,
    headers: HeaderMap,
    body: Bytes,
) -> Result<Json<TrackResponse>, TrackError> {
    let ClientId(client_id) = client_id;

    if let RateLimitDecision::Limited { retry_after } = state.limiter.check(&client_id).await {
        let err = TrackError::RateLimited {
            retry_after_secs: RateLimitDecision::retry_after_secs(retry_after),
        };
        return Err(reject(Stage::RateLimiting, &client_id, err));
    }

    let payload: Value = serde_json::from_slice(&body).map_err(|err| {
        let err = TrackError::InvalidInput(vec![Violation::invalid_json(&err)]);
        reject(Stage::Parsing, &client_id, err)
    })?;

    let event = validate_event(&payload)
        .map_err(|violations| {
            reject(
                Stage::Validating,
                &client_id,
                TrackError::InvalidInput(violations),
            )
        })?
        .sanitize();
    Span::current().record("event_type", event.event_type.as_str());

    let triple = event.utm_triple();
    let campaign_id = resolve_campaign(
        state.store.as_ref(),
        state.campaign_id_policy,
        event.campaign_id,
        triple.as_ref(),
    )
    .await
    .map_err(|err| reject(Stage::Resolving, &client_id, err))?;
    Span::current().record("campaign_id", campaign_id.to_string());

    let context = RequestContext {
        user_agent: user_agent(&headers),
        now: state.timesource.current_time(),
        client_id,
    };
    let event_type = event.event_type;
    let event_id = state
        .store
        .insert_event(NewTrackingEvent::new(event, campaign_id, &context))
        .await
        .map_err(|err| reject(Stage::Writing, &context.client_id, err.into()))?;

    report_stored_event(event_type.as_str());
    Ok(Json(TrackResponse {
        success: true,
        event_id,
    }))
}

/// Preflight acknowledgement for clients that send OPTIONS without CORS headers.
pub async fn options() -> StatusCode {
    StatusCode::OK
}
