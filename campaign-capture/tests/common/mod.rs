#![allow(dead_code)]

use std::num::NonZeroU32;
use std::time::Duration;

use axum::body::Body;
use axum::http::{header, Method, Request, Response};
use axum::Router;
use async_trait::async_trait;
use chrono::{DateTime, TimeZone, Utc};
use http_body_util::BodyExt;
use serde_json::Value;
use uuid::Uuid;

use campaign_capture::campaign::{Campaign, NewCampaign};
use campaign_capture::event::{NewTrackingEvent, TrackingEvent, UtmTriple};
use campaign_capture::limiters::FixedWindowLimiter;
use campaign_capture::resolver::CampaignIdPolicy;
use campaign_capture::router::router;
use campaign_capture::stores::memory::MemoryStore;
use campaign_capture::stores::{Store, StoreError, StoreResult};
use campaign_capture::time::TimeSource;

pub const IPHONE_SAFARI: &str = "Mozilla/5.0 (iPhone; CPU iPhone OS 17_0 like Mac OS X) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.0 Mobile/15E148 Safari/604.1";

#[derive(Clone)]
pub struct FixedTime {
    pub time: DateTime<Utc>,
}

impl TimeSource for FixedTime {
    fn current_time(&self) -> DateTime<Utc> {
        self.time
    }
}

pub fn fixed_now() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2024, 6, 1, 12, 0, 0).unwrap()
}

pub struct TestApp {
    pub router: Router,
    pub store: MemoryStore,
}

impl TestApp {
    pub fn new(max_requests: u32, policy: CampaignIdPolicy) -> Self {
        let store = MemoryStore::new();
        Self::with_store(
            store.clone(),
            store,
            max_requests,
            policy,
            Duration::from_secs(10),
        )
    }

    /// Serve from `serving` while seeding and inspecting through `store`.
    pub fn with_store<S: Store + Send + Sync + 'static>(
        serving: S,
        store: MemoryStore,
        max_requests: u32,
        policy: CampaignIdPolicy,
        request_timeout: Duration,
    ) -> Self {
        let limiter = FixedWindowLimiter::new(
            NonZeroU32::new(max_requests).unwrap(),
            Duration::from_secs(60),
        );
        let router = router(
            FixedTime { time: fixed_now() },
            serving,
            limiter,
            policy,
            request_timeout,
            65536,
            None,
        );

        TestApp { router, store }
    }

    pub async fn create_campaign(&self, owner_id: Uuid, source: &str, campaign: &str) -> Campaign {
        self.store
            .create_campaign(NewCampaign {
                owner_id,
                name: format!("{source} - {campaign}"),
                url: "https://shop.example.org/landing".to_string(),
                utm_source: source.to_string(),
                utm_medium: "cpc".to_string(),
                utm_campaign: campaign.to_string(),
                utm_term: None,
                utm_content: None,
                utm_id: None,
                custom_param: None,
            })
            .await
            .unwrap()
    }

    pub async fn send(&self, request: Request<Body>) -> Response<Body> {
        use tower::ServiceExt;

        self.router.clone().oneshot(request).await.unwrap()
    }
}

/// Store operation that a `FailingStore` breaks.
#[derive(Clone, Copy, PartialEq, Eq)]
pub enum FailOn {
    Lookup,
    Insert,
    /// The insert never completes.
    StallInsert,
}

/// Delegates to a `MemoryStore` except for one operation, which fails the way
/// an unreachable database would.
#[derive(Clone)]
pub struct FailingStore {
    pub inner: MemoryStore,
    pub fail_on: FailOn,
}

impl FailingStore {
    fn query_error(&self, command: &str) -> StoreError {
        StoreError::QueryError {
            command: command.to_owned(),
            error: sqlx::Error::PoolTimedOut,
        }
    }
}

#[async_trait]
impl Store for FailingStore {
    async fn campaign_exists(&self, campaign_id: Uuid) -> StoreResult<bool> {
        if self.fail_on == FailOn::Lookup {
            return Err(self.query_error("SELECT"));
        }
        self.inner.campaign_exists(campaign_id).await
    }

    async fn find_campaigns_by_utm(
        &self,
        triple: &UtmTriple,
        limit: i64,
    ) -> StoreResult<Vec<Uuid>> {
        if self.fail_on == FailOn::Lookup {
            return Err(self.query_error("SELECT"));
        }
        self.inner.find_campaigns_by_utm(triple, limit).await
    }

    async fn insert_event(&self, event: NewTrackingEvent) -> StoreResult<Uuid> {
        match self.fail_on {
            FailOn::Insert => return Err(self.query_error("INSERT")),
            FailOn::StallInsert => std::future::pending::<()>().await,
            FailOn::Lookup => {}
        }
        self.inner.insert_event(event).await
    }

    async fn create_campaign(&self, campaign: NewCampaign) -> StoreResult<Campaign> {
        self.inner.create_campaign(campaign).await
    }

    async fn list_campaigns(&self, owner_id: Uuid) -> StoreResult<Vec<Campaign>> {
        self.inner.list_campaigns(owner_id).await
    }

    async fn get_campaign(&self, campaign_id: Uuid) -> StoreResult<Option<Campaign>> {
        self.inner.get_campaign(campaign_id).await
    }

    async fn delete_campaign(&self, owner_id: Uuid, campaign_id: Uuid) -> StoreResult<bool> {
        self.inner.delete_campaign(owner_id, campaign_id).await
    }

    async fn list_events(
        &self,
        campaign_id: Uuid,
        since: DateTime<Utc>,
    ) -> StoreResult<Vec<TrackingEvent>> {
        self.inner.list_events(campaign_id, since).await
    }

    async fn recent_events(&self, owner_id: Uuid, limit: i64) -> StoreResult<Vec<TrackingEvent>> {
        self.inner.recent_events(owner_id, limit).await
    }

    async fn ping(&self) -> StoreResult<()> {
        self.inner.ping().await
    }
}

pub fn track_request(body: &Value, client_ip: &str) -> Request<Body> {
    Request::builder()
        .method(Method::POST)
        .uri("/track-event")
        .header(header::CONTENT_TYPE, "application/json")
        .header(header::USER_AGENT, IPHONE_SAFARI)
        .header("x-forwarded-for", client_ip)
        .body(Body::from(body.to_string()))
        .unwrap()
}

pub fn json_request(method: Method, uri: &str, body: Option<&Value>) -> Request<Body> {
    let builder = Request::builder()
        .method(method)
        .uri(uri)
        .header(header::CONTENT_TYPE, "application/json");
    match body {
        Some(body) => builder.body(Body::from(body.to_string())).unwrap(),
        None => builder.body(Body::empty()).unwrap(),
    }
}

pub async fn body_bytes(response: Response<Body>) -> Vec<u8> {
    response
        .into_body()
        .collect()
        .await
        .unwrap()
        .to_bytes()
        .to_vec()
}

pub async fn body_json(response: Response<Body>) -> Value {
    serde_json::from_slice(&body_bytes(response).await).unwrap()
}
