//! Per-campaign analytics computed from raw tracking events.

use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use url::Url;
use uuid::Uuid;

use crate::event::{EventType, TrackingEvent};

const TOP_LIST_LEN: usize = 10;
const RECORDINGS_LEN: usize = 5;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Count {
    pub name: String,
    pub count: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct PageClicks {
    pub page: String,
    pub clicks: u64,
    pub conversions: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct Recording {
    pub visitor_id: String,
    pub screen_recording_url: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct CampaignStats {
    pub campaign_id: Uuid,
    pub since: DateTime<Utc>,
    pub clicks: u64,
    pub pageviews: u64,
    pub conversions: u64,
    pub total_events: u64,
    pub unique_visitors: u64,
    /// Percent of sessions with exactly one pageview, rounded.
    pub bounce_rate: u64,
    /// Conversions per hundred clicks, one decimal.
    pub conversion_rate: f64,
    pub organic_events: u64,
    pub paid_events: u64,
    pub traffic_sources: Vec<Count>,
    pub devices: Vec<Count>,
    pub browsers: Vec<Count>,
    pub top_pages: Vec<Count>,
    pub clicks_by_page: Vec<PageClicks>,
    pub keywords: Vec<Count>,
    pub recordings: Vec<Recording>,
}

#[derive(Default)]
struct Counter(HashMap<String, u64>);

impl Counter {
    fn add(&mut self, name: &str) {
        *self.0.entry(name.to_owned()).or_default() += 1;
    }

    /// Highest count first, ties broken by name so output is deterministic.
    fn into_sorted(self, limit: usize) -> Vec<Count> {
        let mut counts: Vec<Count> = self
            .0
            .into_iter()
            .map(|(name, count)| Count { name, count })
            .collect();
        counts.sort_by(|a, b| b.count.cmp(&a.count).then_with(|| a.name.cmp(&b.name)));
        counts.truncate(limit);
        counts
    }
}

fn is_paid(referrer: &str) -> bool {
    referrer.contains("utm_") || referrer.contains("ads") || referrer.contains("campaign")
}

fn is_organic(referrer: &str) -> bool {
    !referrer.contains("utm_")
        && (referrer.is_empty() || referrer.contains("google") || referrer.contains("bing"))
}

fn traffic_source(referrer: &str) -> &'static str {
    ["google", "facebook", "twitter"]
        .into_iter()
        .find(|source| referrer.contains(source))
        .unwrap_or("direct")
}

fn search_keyword(referrer: &str) -> Option<String> {
    let url = Url::parse(referrer).ok()?;
    let param = |key: &str| {
        url.query_pairs()
            .find(|(k, v)| k == key && !v.is_empty())
            .map(|(_, v)| v.into_owned())
    };
    param("q").or_else(|| param("s"))
}

fn percent(part: u64, whole: u64) -> f64 {
    if whole == 0 {
        0.0
    } else {
        part as f64 / whole as f64 * 100.0
    }
}

/// Aggregate one campaign's events. `events` are expected newest first, which
/// is the order the store returns them in.
pub fn summarize(
    campaign_id: Uuid,
    since: DateTime<Utc>,
    events: &[TrackingEvent],
) -> CampaignStats {
    let mut clicks = 0;
    let mut pageviews = 0;
    let mut conversions = 0;
    let mut organic_events = 0;
    let mut paid_events = 0;

    let mut visitors = HashSet::new();
    let mut session_pageviews: HashMap<&str, u64> = HashMap::new();
    let mut traffic_sources = Counter::default();
    let mut devices = Counter::default();
    let mut browsers = Counter::default();
    let mut top_pages = Counter::default();
    let mut keywords = Counter::default();
    let mut page_clicks: HashMap<&str, (u64, u64)> = HashMap::new();

    for event in events {
        match event.event_type {
            EventType::Click => clicks += 1,
            EventType::Pageview => {
                pageviews += 1;
                *session_pageviews.entry(&event.session_id).or_default() += 1;
            }
            EventType::Conversion => conversions += 1,
        }

        if let Some(visitor_id) = event.visitor_id.as_deref().filter(|v| !v.is_empty()) {
            visitors.insert(visitor_id);
        }

        let referrer = event.referrer.as_deref().unwrap_or_default();
        if is_organic(referrer) {
            organic_events += 1;
        }
        if is_paid(referrer) {
            paid_events += 1;
        }
        traffic_sources.add(traffic_source(referrer));
        if let Some(keyword) = search_keyword(referrer) {
            keywords.add(&keyword);
        }

        devices.add(event.device_type.as_str());
        browsers.add(event.browser.as_str());
        top_pages.add(event.page_path.as_deref().unwrap_or("/"));

        if let Some(page) = event.page_path.as_deref() {
            let entry = page_clicks.entry(page).or_default();
            match event.event_type {
                EventType::Click => entry.0 += 1,
                EventType::Conversion => entry.1 += 1,
                EventType::Pageview => {}
            }
        }
    }

    let sessions = session_pageviews.len() as u64;
    let bounced = session_pageviews.values().filter(|&&n| n == 1).count() as u64;

    let mut clicks_by_page: Vec<PageClicks> = page_clicks
        .into_iter()
        .map(|(page, (clicks, conversions))| PageClicks {
            page: page.to_owned(),
            clicks,
            conversions,
        })
        .collect();
    clicks_by_page.sort_by(|a, b| b.clicks.cmp(&a.clicks).then_with(|| a.page.cmp(&b.page)));
    clicks_by_page.truncate(TOP_LIST_LEN);

    let recordings = events
        .iter()
        .filter_map(|event| {
            let url = event.screen_recording_url.as_ref()?;
            Some(Recording {
                visitor_id: event
                    .visitor_id
                    .clone()
                    .unwrap_or_else(|| "unknown".to_owned()),
                screen_recording_url: url.clone(),
                created_at: event.created_at,
            })
        })
        .take(RECORDINGS_LEN)
        .collect();

    CampaignStats {
        campaign_id,
        since,
        clicks,
        pageviews,
        conversions,
        total_events: events.len() as u64,
        unique_visitors: visitors.len() as u64,
        bounce_rate: percent(bounced, sessions).round() as u64,
        conversion_rate: (percent(conversions, clicks) * 10.0).round() / 10.0,
        organic_events,
        paid_events,
        traffic_sources: traffic_sources.into_sorted(usize::MAX),
        devices: devices.into_sorted(usize::MAX),
        browsers: browsers.into_sorted(usize::MAX),
        top_pages: top_pages.into_sorted(TOP_LIST_LEN),
        clicks_by_page,
        keywords: keywords.into_sorted(TOP_LIST_LEN),
        recordings,
    }
}
