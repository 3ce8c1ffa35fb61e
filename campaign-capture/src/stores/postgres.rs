use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::postgres::{PgPool, PgPoolOptions};
use tracing::instrument;
use uuid::Uuid;

use crate::campaign::{Campaign, NewCampaign};
use crate::event::{NewTrackingEvent, TrackingEvent, UtmTriple};
use crate::stores::{Store, StoreError, StoreResult};

const FOREIGN_KEY_VIOLATION: &str = "23503";

const EVENT_COLUMNS: &str = r#"
    e.id, e.campaign_id, e.event_type, e.referrer, e.utm_source, e.utm_medium,
    e.utm_campaign, e.visitor_id, e.session_id, e.page_path, e.element_selector,
    e.element_text, e.screen_recording_url, e.user_agent, e.device_type, e.browser,
    e.ip_address, e.created_at
"#;

/// Campaigns and tracking events in PostgreSQL. See `migrations/` for the schema.
#[derive(Clone)]
pub struct PgStore {
    pool: PgPool,
}

fn query_error(command: &str, error: sqlx::Error) -> StoreError {
    if let sqlx::Error::Database(db_error) = &error {
        if db_error.code().as_deref() == Some(FOREIGN_KEY_VIOLATION) {
            return StoreError::MissingCampaign;
        }
    }
    StoreError::QueryError {
        command: command.to_owned(),
        error,
    }
}

impl PgStore {
    pub async fn new(
        url: &str,
        max_connections: u32,
        acquire_timeout: Duration,
    ) -> StoreResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .acquire_timeout(acquire_timeout)
            .connect(url)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;

        Ok(Self { pool })
    }

    pub fn new_from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub async fn run_migrations(&self) -> StoreResult<()> {
        sqlx::migrate!("../migrations").run(&self.pool).await?;
        Ok(())
    }
}

#[async_trait]
impl Store for PgStore {
    #[instrument(skip(self))]
    async fn campaign_exists(&self, campaign_id: Uuid) -> StoreResult<bool> {
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM campaigns WHERE id = $1)")
            .bind(campaign_id)
            .fetch_one(&self.pool)
            .await
            .map_err(|error| query_error("SELECT", error))
    }

    #[instrument(skip(self))]
    async fn find_campaigns_by_utm(
        &self,
        triple: &UtmTriple,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        sqlx::query_scalar(
            r#"
SELECT id FROM campaigns
WHERE utm_source = $1 AND utm_medium = $2 AND utm_campaign = $3
LIMIT $4
            "#,
        )
        .bind(&triple.source)
        .bind(&triple.medium)
        .bind(&triple.campaign)
        .bind(limit)
        .fetch_all(&self.pool)
        .await
        .map_err(|error| query_error("SELECT", error))
    }

    #[instrument(skip_all, fields(campaign_id = %event.campaign_id))]
    async fn insert_event(&self, event: NewTrackingEvent) -> StoreResult<Uuid> {
        sqlx::query_scalar(
            r#"
INSERT INTO tracking_events (
    id, campaign_id, event_type, referrer, utm_source, utm_medium, utm_campaign,
    visitor_id, session_id, page_path, element_selector, element_text,
    screen_recording_url, user_agent, device_type, browser, ip_address, created_at
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17, $18)
RETURNING id
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(event.campaign_id)
        .bind(event.event_type)
        .bind(event.referrer)
        .bind(event.utm_source)
        .bind(event.utm_medium)
        .bind(event.utm_campaign)
        .bind(event.visitor_id)
        .bind(event.session_id)
        .bind(event.page_path)
        .bind(event.element_selector)
        .bind(event.element_text)
        .bind(event.screen_recording_url)
        .bind(event.user_agent)
        .bind(event.device_type)
        .bind(event.browser)
        .bind(event.ip_address)
        .bind(event.created_at)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| query_error("INSERT", error))
    }

    #[instrument(skip_all)]
    async fn create_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign> {
        sqlx::query_as(
            r#"
INSERT INTO campaigns (
    id, owner_id, name, url, utm_source, utm_medium, utm_campaign,
    utm_term, utm_content, utm_id, custom_param
)
VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
RETURNING *
            "#,
        )
        .bind(Uuid::now_v7())
        .bind(campaign.owner_id)
        .bind(campaign.name)
        .bind(campaign.url)
        .bind(campaign.utm_source)
        .bind(campaign.utm_medium)
        .bind(campaign.utm_campaign)
        .bind(campaign.utm_term)
        .bind(campaign.utm_content)
        .bind(campaign.utm_id)
        .bind(campaign.custom_param)
        .fetch_one(&self.pool)
        .await
        .map_err(|error| query_error("INSERT", error))
    }

    #[instrument(skip(self))]
    async fn list_campaigns(&self, owner_id: Uuid) -> StoreResult<Vec<Campaign>> {
        sqlx::query_as("SELECT * FROM campaigns WHERE owner_id = $1 ORDER BY created_at DESC")
            .bind(owner_id)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("SELECT", error))
    }

    #[instrument(skip(self))]
    async fn get_campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>> {
        sqlx::query_as("SELECT * FROM campaigns WHERE id = $1")
            .bind(campaign_id)
            .fetch_optional(&self.pool)
            .await
            .map_err(|error| query_error("SELECT", error))
    }

    #[instrument(skip(self))]
    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> StoreResult<bool> {
        // tracking_events rows go with it through ON DELETE CASCADE.
        let result = sqlx::query("DELETE FROM campaigns WHERE id = $1 AND owner_id = $2")
            .bind(campaign_id)
            .bind(owner_id)
            .execute(&self.pool)
            .await
            .map_err(|error| query_error("DELETE", error))?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn list_events(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<TrackingEvent>> {
        let query = format!(
            r#"
SELECT {EVENT_COLUMNS}
FROM tracking_events e
WHERE e.campaign_id = $1 AND e.created_at >= $2
ORDER BY e.created_at DESC
            "#
        );

        sqlx::query_as(&query)
            .bind(campaign_id)
            .bind(since)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("SELECT", error))
    }

    #[instrument(skip(self))]
    async fn recent_events(&self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<TrackingEvent>> {
        let query = format!(
            r#"
SELECT {EVENT_COLUMNS}
FROM tracking_events e
JOIN campaigns c ON c.id = e.campaign_id
WHERE c.owner_id = $1
ORDER BY e.created_at DESC
LIMIT $2
            "#
        );

        sqlx::query_as(&query)
            .bind(owner_id)
            .bind(limit)
            .fetch_all(&self.pool)
            .await
            .map_err(|error| query_error("SELECT", error))
    }

    async fn ping(&self) -> StoreResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map_err(|error| StoreError::ConnectionError { error })?;
        Ok(())
    }
}
