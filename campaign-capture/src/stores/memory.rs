use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::instrument;
use uuid::Uuid;

use crate::campaign::{Campaign, NewCampaign};
use crate::event::{NewTrackingEvent, TrackingEvent, UtmTriple};
use crate::stores::{Store, StoreError, StoreResult};

#[derive(Default)]
struct Tables {
    campaigns: Vec<Campaign>,
    events: Vec<TrackingEvent>,
}

/// Process-local store for local runs and tests. Mirrors the Postgres schema's
/// foreign key: events can only reference existing campaigns, and deleting a
/// campaign deletes its events.
#[derive(Clone, Default)]
pub struct MemoryStore {
    tables: Arc<RwLock<Tables>>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Every stored event, in insertion order.
    pub async fn events(&self) -> Vec<TrackingEvent> {
        self.tables.read().await.events.clone()
    }
}

fn newest_first<T>(rows: &mut [T], created_at: impl Fn(&T) -> DateTime<Utc>) {
    // Stable sort: rows created in the same instant keep reverse insertion order.
    rows.reverse();
    rows.sort_by_key(|row| std::cmp::Reverse(created_at(row)));
}

#[async_trait]
impl Store for MemoryStore {
    async fn campaign_exists(&self, campaign_id: Uuid) -> StoreResult<bool> {
        let tables = self.tables.read().await;
        Ok(tables.campaigns.iter().any(|c| c.id == campaign_id))
    }

    async fn find_campaigns_by_utm(
        &self,
        triple: &UtmTriple,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        let tables = self.tables.read().await;
        Ok(tables
            .campaigns
            .iter()
            .filter(|c| c.utm_triple() == *triple)
            .take(usize::try_from(limit).unwrap_or(0))
            .map(|c| c.id)
            .collect())
    }

    #[instrument(skip_all)]
    async fn insert_event(&self, event: NewTrackingEvent) -> StoreResult<Uuid> {
        let mut tables = self.tables.write().await;
        if !tables.campaigns.iter().any(|c| c.id == event.campaign_id) {
            return Err(StoreError::MissingCampaign);
        }

        let id = Uuid::now_v7();
        tables.events.push(event.into_stored(id));
        Ok(id)
    }

    async fn create_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign> {
        let campaign = campaign.into_stored(Uuid::now_v7(), Utc::now());
        self.tables.write().await.campaigns.push(campaign.clone());
        Ok(campaign)
    }

    async fn list_campaigns(&self, owner_id: Uuid) -> StoreResult<Vec<Campaign>> {
        let tables = self.tables.read().await;
        let mut campaigns: Vec<Campaign> = tables
            .campaigns
            .iter()
            .filter(|c| c.owner_id == owner_id)
            .cloned()
            .collect();
        newest_first(&mut campaigns, |c| c.created_at);
        Ok(campaigns)
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>> {
        let tables = self.tables.read().await;
        Ok(tables
            .campaigns
            .iter()
            .find(|c| c.id == campaign_id)
            .cloned())
    }

    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> StoreResult<bool> {
        let mut tables = self.tables.write().await;
        let before = tables.campaigns.len();
        tables
            .campaigns
            .retain(|c| !(c.id == campaign_id && c.owner_id == owner_id));
        if tables.campaigns.len() == before {
            return Ok(false);
        }

        tables.events.retain(|e| e.campaign_id != campaign_id);
        Ok(true)
    }

    async fn list_events(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<TrackingEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<TrackingEvent> = tables
            .events
            .iter()
            .filter(|e| e.campaign_id == campaign_id && e.created_at >= since)
            .cloned()
            .collect();
        newest_first(&mut events, |e| e.created_at);
        Ok(events)
    }

    async fn recent_events(&self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<TrackingEvent>> {
        let tables = self.tables.read().await;
        let mut events: Vec<TrackingEvent> = tables
            .events
            .iter()
            .filter(|e| {
                tables
                    .campaigns
                    .iter()
                    .any(|c| c.id == e.campaign_id && c.owner_id == owner_id)
            })
            .cloned()
            .collect();
        newest_first(&mut events, |e| e.created_at);
        events.truncate(usize::try_from(limit).unwrap_or(0));
        Ok(events)
    }

    async fn ping(&self) -> StoreResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use chrono::Duration;

    use super::*;
    use crate::event::{EventType, RequestContext, ValidatedEvent};

    fn new_campaign(owner_id: Uuid, source: &str, campaign: &str) -> NewCampaign {
        NewCampaign {
            owner_id,
            name: format!("{source} - {campaign}"),
            url: "https://example.org/".to_string(),
            utm_source: source.to_string(),
            utm_medium: "cpc".to_string(),
            utm_campaign: campaign.to_string(),
            utm_term: None,
            utm_content: None,
            utm_id: None,
            custom_param: None,
        }
    }

    fn new_event(campaign_id: Uuid, now: DateTime<Utc>) -> NewTrackingEvent {
        let context = RequestContext {
            client_id: "127.0.0.1".to_string(),
            user_agent: "test".to_string(),
            now,
        };
        NewTrackingEvent::new(ValidatedEvent::new(EventType::Click), campaign_id, &context)
    }

    #[tokio::test]
    async fn insert_requires_existing_campaign() {
        let store = MemoryStore::new();
        let err = store
            .insert_event(new_event(Uuid::new_v4(), Utc::now()))
            .await
            .unwrap_err();
        assert!(matches!(err, StoreError::MissingCampaign));
    }

    #[tokio::test]
    async fn finds_campaigns_by_exact_triple() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let spring = store
            .create_campaign(new_campaign(owner, "google", "spring"))
            .await
            .unwrap();
        store
            .create_campaign(new_campaign(owner, "google", "summer"))
            .await
            .unwrap();

        let found = store
            .find_campaigns_by_utm(&spring.utm_triple(), 2)
            .await
            .unwrap();
        assert_eq!(found, vec![spring.id]);

        let mut other_case = spring.utm_triple();
        other_case.source = "Google".to_string();
        assert!(store
            .find_campaigns_by_utm(&other_case, 2)
            .await
            .unwrap()
            .is_empty());
    }

    #[tokio::test]
    async fn delete_is_owner_scoped_and_cascades() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let campaign = store
            .create_campaign(new_campaign(owner, "google", "spring"))
            .await
            .unwrap();
        store
            .insert_event(new_event(campaign.id, Utc::now()))
            .await
            .unwrap();

        assert!(!store
            .delete_campaign(Uuid::new_v4(), campaign.id)
            .await
            .unwrap());
        assert_eq!(store.events().await.len(), 1);

        assert!(store.delete_campaign(owner, campaign.id).await.unwrap());
        assert!(store.events().await.is_empty());
        assert!(!store.campaign_exists(campaign.id).await.unwrap());
    }

    #[tokio::test]
    async fn event_queries_filter_and_order() {
        let store = MemoryStore::new();
        let owner = Uuid::new_v4();
        let mine = store
            .create_campaign(new_campaign(owner, "google", "spring"))
            .await
            .unwrap();
        let theirs = store
            .create_campaign(new_campaign(Uuid::new_v4(), "google", "summer"))
            .await
            .unwrap();

        let now = Utc::now();
        let old = store
            .insert_event(new_event(mine.id, now - Duration::days(10)))
            .await
            .unwrap();
        let recent = store.insert_event(new_event(mine.id, now)).await.unwrap();
        store.insert_event(new_event(theirs.id, now)).await.unwrap();

        let since = store
            .list_events(mine.id, now - Duration::days(7))
            .await
            .unwrap();
        assert_eq!(since.iter().map(|e| e.id).collect::<Vec<_>>(), vec![recent]);

        let feed = store.recent_events(owner, 20).await.unwrap();
        assert_eq!(
            feed.iter().map(|e| e.id).collect::<Vec<_>>(),
            vec![recent, old]
        );

        assert_eq!(store.recent_events(owner, 1).await.unwrap().len(), 1);
    }
}
