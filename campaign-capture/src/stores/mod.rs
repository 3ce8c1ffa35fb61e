use async_trait::async_trait;
use chrono::{DateTime, Utc};
use thiserror::Error;
use uuid::Uuid;

use crate::campaign::{Campaign, NewCampaign};
use crate::event::{NewTrackingEvent, TrackingEvent, UtmTriple};

pub mod memory;
pub mod postgres;

/// Errors can originate from sqlx and are wrapped to provide additional context.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("connection failed with: {error}")]
    ConnectionError { error: sqlx::Error },
    #[error("{command} query failed with: {error}")]
    QueryError {
        command: String,
        error: sqlx::Error,
    },
    #[error("referenced campaign does not exist")]
    MissingCampaign,
    #[error("migrations failed with: {0}")]
    MigrationError(#[from] sqlx::migrate::MigrateError),
}

pub type StoreResult<T> = Result<T, StoreError>;

#[async_trait]
pub trait Store {
    async fn campaign_exists(&self, campaign_id: Uuid) -> StoreResult<bool>;

    /// Ids of campaigns whose stored triple matches exactly, at most `limit` of them.
    async fn find_campaigns_by_utm(&self, triple: &UtmTriple, limit: i64)
        -> StoreResult<Vec<Uuid>>;

    /// Single-row append. Fails with `MissingCampaign` if the campaign is gone.
    async fn insert_event(&self, event: NewTrackingEvent) -> StoreResult<Uuid>;

    async fn create_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign>;

    /// Newest first.
    async fn list_campaigns(&self, owner_id: Uuid) -> StoreResult<Vec<Campaign>>;

    async fn get_campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>>;

    /// Deletes the campaign and its events. `false` if no campaign of that owner matched.
    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> StoreResult<bool>;

    /// A campaign's events created at or after `since`, newest first.
    async fn list_events(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<TrackingEvent>>;

    /// Most recent events across all of an owner's campaigns.
    async fn recent_events(&self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<TrackingEvent>>;

    async fn ping(&self) -> StoreResult<()>;
}
