use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::sanitize::{sanitize_element_text, sanitize_page_path};

/// Recorded when the request carries no user-agent header.
pub const UNKNOWN_USER_AGENT: &str = "Unknown";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "tracking_event_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum EventType {
    Click,
    Pageview,
    Conversion,
}

impl EventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            EventType::Click => "click",
            EventType::Pageview => "pageview",
            EventType::Conversion => "conversion",
        }
    }
}

impl FromStr for EventType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "click" => Ok(EventType::Click),
            "pageview" => Ok(EventType::Pageview),
            "conversion" => Ok(EventType::Conversion),
            other => Err(format!("unknown event type: {other}")),
        }
    }
}

impl fmt::Display for EventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "device_type", rename_all = "lowercase")]
#[serde(rename_all = "lowercase")]
pub enum DeviceType {
    Mobile,
    Tablet,
    Desktop,
}

impl DeviceType {
    /// Substring match on the raw header, checked in order: Mobile, Tablet.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Mobile") {
            DeviceType::Mobile
        } else if user_agent.contains("Tablet") {
            DeviceType::Tablet
        } else {
            DeviceType::Desktop
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceType::Mobile => "mobile",
            DeviceType::Tablet => "tablet",
            DeviceType::Desktop => "desktop",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Deserialize, Serialize, sqlx::Type)]
#[sqlx(type_name = "browser_name")]
pub enum Browser {
    Chrome,
    Firefox,
    Safari,
    Other,
}

impl Browser {
    /// Chrome user agents also advertise Safari, so Chrome must be checked first.
    pub fn from_user_agent(user_agent: &str) -> Self {
        if user_agent.contains("Chrome") {
            Browser::Chrome
        } else if user_agent.contains("Firefox") {
            Browser::Firefox
        } else if user_agent.contains("Safari") {
            Browser::Safari
        } else {
            Browser::Other
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Browser::Chrome => "Chrome",
            Browser::Firefox => "Firefox",
            Browser::Safari => "Safari",
            Browser::Other => "Other",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UtmTriple {
    pub source: String,
    pub medium: String,
    pub campaign: String,
}

/// An event payload that passed validation. String fields are trimmed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedEvent {
    pub campaign_id: Option<Uuid>,
    pub event_type: EventType,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub visitor_id: Option<String>,
    pub page_path: Option<String>,
    pub element_selector: Option<String>,
    pub element_text: Option<String>,
    pub screen_recording_url: Option<String>,
}

impl ValidatedEvent {
    pub fn new(event_type: EventType) -> Self {
        ValidatedEvent {
            campaign_id: None,
            event_type,
            referrer: None,
            utm_source: None,
            utm_medium: None,
            utm_campaign: None,
            visitor_id: None,
            page_path: None,
            element_selector: None,
            element_text: None,
            screen_recording_url: None,
        }
    }

    /// The triple used for campaign lookup, only when all three parts are non-empty.
    pub fn utm_triple(&self) -> Option<UtmTriple> {
        let non_empty = |value: &Option<String>| value.clone().filter(|v| !v.is_empty());

        Some(UtmTriple {
            source: non_empty(&self.utm_source)?,
            medium: non_empty(&self.utm_medium)?,
            campaign: non_empty(&self.utm_campaign)?,
        })
    }

    /// Strip query strings, fragments and contact details before anything is stored.
    pub fn sanitize(mut self) -> Self {
        self.page_path = sanitize_page_path(self.page_path.as_deref());
        self.element_text = sanitize_element_text(self.element_text.as_deref());
        self
    }
}

/// Per-request values the handler derives from the transport, not the payload.
#[derive(Debug, Clone)]
pub struct RequestContext {
    pub client_id: String,
    pub user_agent: String,
    pub now: DateTime<Utc>,
}

/// Visitor and session share one identifier when the snippet supplies a visitor id;
/// anonymous calls get a fresh session id. The visitor id itself is stored unchanged.
pub fn derive_session_id(visitor_id: Option<&str>) -> String {
    match visitor_id {
        Some(visitor_id) if !visitor_id.is_empty() => visitor_id.to_owned(),
        _ => Uuid::new_v4().to_string(),
    }
}

/// A resolved and sanitized event, ready for the writer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTrackingEvent {
    pub campaign_id: Uuid,
    pub event_type: EventType,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub visitor_id: Option<String>,
    pub session_id: String,
    pub page_path: Option<String>,
    pub element_selector: Option<String>,
    pub element_text: Option<String>,
    pub screen_recording_url: Option<String>,
    pub user_agent: String,
    pub device_type: DeviceType,
    pub browser: Browser,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}

impl NewTrackingEvent {
    pub fn new(event: ValidatedEvent, campaign_id: Uuid, context: &RequestContext) -> Self {
        let session_id = derive_session_id(event.visitor_id.as_deref());

        NewTrackingEvent {
            campaign_id,
            event_type: event.event_type,
            referrer: event.referrer,
            utm_source: event.utm_source,
            utm_medium: event.utm_medium,
            utm_campaign: event.utm_campaign,
            visitor_id: event.visitor_id,
            session_id,
            page_path: event.page_path,
            element_selector: event.element_selector,
            element_text: event.element_text,
            screen_recording_url: event.screen_recording_url,
            user_agent: context.user_agent.clone(),
            device_type: DeviceType::from_user_agent(&context.user_agent),
            browser: Browser::from_user_agent(&context.user_agent),
            ip_address: context.client_id.clone(),
            created_at: context.now,
        }
    }

    pub fn into_stored(self, id: Uuid) -> TrackingEvent {
        TrackingEvent {
            id,
            campaign_id: self.campaign_id,
            event_type: self.event_type,
            referrer: self.referrer,
            utm_source: self.utm_source,
            utm_medium: self.utm_medium,
            utm_campaign: self.utm_campaign,
            visitor_id: self.visitor_id,
            session_id: self.session_id,
            page_path: self.page_path,
            element_selector: self.element_selector,
            element_text: self.element_text,
            screen_recording_url: self.screen_recording_url,
            user_agent: self.user_agent,
            device_type: self.device_type,
            browser: self.browser,
            ip_address: self.ip_address,
            created_at: self.created_at,
        }
    }
}

/// A persisted tracking event row.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct TrackingEvent {
    pub id: Uuid,
    pub campaign_id: Uuid,
    pub event_type: EventType,
    pub referrer: Option<String>,
    pub utm_source: Option<String>,
    pub utm_medium: Option<String>,
    pub utm_campaign: Option<String>,
    pub visitor_id: Option<String>,
    pub session_id: String,
    pub page_path: Option<String>,
    pub element_selector: Option<String>,
    pub element_text: Option<String>,
    pub screen_recording_url: Option<String>,
    pub user_agent: String,
    pub device_type: DeviceType,
    pub browser: Browser,
    pub ip_address: String,
    pub created_at: DateTime<Utc>,
}
