use axum::http::{header, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

use crate::stores::StoreError;
use crate::validation::Violation;

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct TrackResponse {
    pub success: bool,
    pub event_id: Uuid,
}

#[derive(Debug, PartialEq, Eq, Deserialize, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub details: Option<Vec<Violation>>,
}

#[derive(Error, Debug)]
pub enum TrackError {
    #[error("Invalid input")]
    InvalidInput(Vec<Violation>),
    #[error("Rate limit exceeded. Please try again later.")]
    RateLimited { retry_after_secs: u64 },
    #[error("Campaign not found")]
    CampaignNotFound,
    #[error("{0}")]
    StorageFailure(&'static str),
}

impl TrackError {
    pub fn to_metric_tag(&self) -> &'static str {
        match self {
            TrackError::InvalidInput(_) => "invalid_input",
            TrackError::RateLimited { .. } => "rate_limited",
            TrackError::CampaignNotFound => "campaign_not_found",
            TrackError::StorageFailure(_) => "storage_failure",
        }
    }
}

impl From<StoreError> for TrackError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::MissingCampaign => TrackError::CampaignNotFound,
            err => {
                // Details stay in the logs, callers only see a fixed message.
                tracing::error!("store operation failed: {:?}", err);
                TrackError::StorageFailure("Storage operation failed")
            }
        }
    }
}

impl IntoResponse for TrackError {
    fn into_response(self) -> Response {
        let error = self.to_string();
        match self {
            TrackError::InvalidInput(violations) => (
                StatusCode::BAD_REQUEST,
                Json(ErrorResponse {
                    error,
                    details: Some(violations),
                }),
            )
                .into_response(),

            TrackError::RateLimited { retry_after_secs } => {
                let mut response = (
                    StatusCode::TOO_MANY_REQUESTS,
                    Json(ErrorResponse {
                        error,
                        details: None,
                    }),
                )
                    .into_response();
                response
                    .headers_mut()
                    .insert(header::RETRY_AFTER, HeaderValue::from(retry_after_secs));
                response
            }

            TrackError::CampaignNotFound => (
                StatusCode::NOT_FOUND,
                Json(ErrorResponse {
                    error,
                    details: None,
                }),
            )
                .into_response(),

            TrackError::StorageFailure(_) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorResponse {
                    error,
                    details: None,
                }),
            )
                .into_response(),
        }
    }
}

#[cfg(test)]
mod tests {
    use http_body_util::BodyExt;

    use super::*;
    use crate::validation::ViolationCode;

    async fn body_json(response: Response) -> serde_json::Value {
        let body = response.into_body().collect().await.unwrap().to_bytes();
        serde_json::from_slice(&body).unwrap()
    }

    #[tokio::test]
    async fn rate_limited_sets_retry_after() {
        let response = TrackError::RateLimited {
            retry_after_secs: 42,
        }
        .into_response();

        assert_eq!(response.status(), StatusCode::TOO_MANY_REQUESTS);
        assert_eq!(response.headers()[header::RETRY_AFTER], "42");
        assert_eq!(
            body_json(response).await,
            serde_json::json!({"error": "Rate limit exceeded. Please try again later."})
        );
    }

    #[tokio::test]
    async fn invalid_input_lists_details() {
        let response = TrackError::InvalidInput(vec![Violation::new(
            "event_type",
            ViolationCode::Required,
            "is required",
        )])
        .into_response();

        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            serde_json::json!({
                "error": "Invalid input",
                "details": [{"field": "event_type", "code": "required", "message": "is required"}],
            })
        );
    }

    #[test]
    fn store_errors_hide_details() {
        let err: TrackError = StoreError::ConnectionError {
            error: sqlx::Error::PoolTimedOut,
        }
        .into();
        assert_eq!(err.to_string(), "Storage operation failed");

        let err: TrackError = StoreError::MissingCampaign.into();
        assert!(matches!(err, TrackError::CampaignNotFound));
    }
}
