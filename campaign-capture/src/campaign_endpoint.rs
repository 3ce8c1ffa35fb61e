use axum::extract::{Path, Query, State};
use axum::http::StatusCode;
use axum::Json;
use bytes::Bytes;
use chrono::Duration;
use serde::Deserialize;
use serde_json::Value;
use tracing::{info, instrument};
use uuid::Uuid;

use crate::api::TrackError;
use crate::campaign::{validate_new_campaign, CampaignResponse};
use crate::event::TrackingEvent;
use crate::router;
use crate::stats::{summarize, CampaignStats};
use crate::validation::{Violation, ViolationCode};

pub const DEFAULT_STATS_DAYS: i64 = 7;
pub const MAX_STATS_DAYS: i64 = 365;
pub const DEFAULT_RECENT_EVENTS: i64 = 20;
pub const MAX_RECENT_EVENTS: i64 = 100;

/// Query parameters are taken as strings so malformed values surface as
/// violations in the usual error body rather than as extractor rejections.
#[derive(Debug, Default, Deserialize)]
pub struct CampaignQuery {
    pub owner_id: Option<String>,
    pub days: Option<String>,
    pub limit: Option<String>,
}

fn invalid(field: &str, code: ViolationCode, message: impl Into<String>) -> TrackError {
    TrackError::InvalidInput(vec![Violation::new(field, code, message)])
}

fn parse_uuid(field: &str, value: Option<&str>) -> Result<Uuid, TrackError> {
    let value = value
        .map(str::trim)
        .filter(|v| !v.is_empty())
        .ok_or_else(|| invalid(field, ViolationCode::Required, "is required"))?;

    match Uuid::parse_str(value) {
        Ok(uuid) if value.len() == 36 => Ok(uuid),
        _ => Err(invalid(
            field,
            ViolationCode::InvalidUuid,
            "must be a hyphenated UUID",
        )),
    }
}

fn parse_bounded(
    field: &str,
    value: Option<&str>,
    default: i64,
    max: i64,
) -> Result<i64, TrackError> {
    let Some(value) = value.map(str::trim).filter(|v| !v.is_empty()) else {
        return Ok(default);
    };

    match value.parse::<i64>() {
        Ok(n) if (1..=max).contains(&n) => Ok(n),
        _ => Err(invalid(
            field,
            ViolationCode::OutOfRange,
            format!("must be an integer between 1 and {max}"),
        )),
    }
}

#[instrument(skip_all)]
pub async fn create(
    State(state): State<router::State>,
    body: Bytes,
) -> Result<(StatusCode, Json<CampaignResponse>), TrackError> {
    let payload: Value = serde_json::from_slice(&body)
        .map_err(|err| TrackError::InvalidInput(vec![Violation::invalid_json(&err)]))?;
    let campaign = validate_new_campaign(&payload).map_err(TrackError::InvalidInput)?;

    let campaign = state.store.create_campaign(campaign).await?;
    info!(campaign_id = %campaign.id, "campaign created");

    Ok((StatusCode::CREATED, Json(campaign.into())))
}

#[instrument(skip_all)]
pub async fn list(
    State(state): State<router::State>,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<Vec<CampaignResponse>>, TrackError> {
    let owner_id = parse_uuid("owner_id", query.owner_id.as_deref())?;

    let campaigns = state.store.list_campaigns(owner_id).await?;
    Ok(Json(campaigns.into_iter().map(Into::into).collect()))
}

#[instrument(skip(state, query))]
pub async fn delete(
    State(state): State<router::State>,
    Path(campaign_id): Path<String>,
    Query(query): Query<CampaignQuery>,
) -> Result<StatusCode, TrackError> {
    let campaign_id = parse_uuid("id", Some(&campaign_id))?;
    let owner_id = parse_uuid("owner_id", query.owner_id.as_deref())?;

    if state.store.delete_campaign(owner_id, campaign_id).await? {
        info!("campaign deleted");
        Ok(StatusCode::NO_CONTENT)
    } else {
        Err(TrackError::CampaignNotFound)
    }
}

#[instrument(skip(state, query))]
pub async fn stats(
    State(state): State<router::State>,
    Path(campaign_id): Path<String>,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<CampaignStats>, TrackError> {
    let campaign_id = parse_uuid("id", Some(&campaign_id))?;
    let owner_id = parse_uuid("owner_id", query.owner_id.as_deref())?;
    let days = parse_bounded("days", query.days.as_deref(), DEFAULT_STATS_DAYS, MAX_STATS_DAYS)?;

    // Someone else's campaign is indistinguishable from a missing one.
    match state.store.get_campaign(campaign_id).await? {
        Some(campaign) if campaign.owner_id == owner_id => {}
        _ => return Err(TrackError::CampaignNotFound),
    }

    let since = state.timesource.current_time() - Duration::days(days);
    let events = state.store.list_events(campaign_id, since).await?;

    Ok(Json(summarize(campaign_id, since, &events)))
}

#[instrument(skip_all)]
pub async fn recent_events(
    State(state): State<router::State>,
    Query(query): Query<CampaignQuery>,
) -> Result<Json<Vec<TrackingEvent>>, TrackError> {
    let owner_id = parse_uuid("owner_id", query.owner_id.as_deref())?;
    let limit = parse_bounded(
        "limit",
        query.limit.as_deref(),
        DEFAULT_RECENT_EVENTS,
        MAX_RECENT_EVENTS,
    )?;

    Ok(Json(state.store.recent_events(owner_id, limit).await?))
}
