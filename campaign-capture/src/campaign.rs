use chrono::{DateTime, Utc};
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use url::Url;
use uuid::Uuid;

use crate::event::UtmTriple;
use crate::validation::{FieldReader, Violation, ViolationCode};

pub const MAX_NAME_CHARS: usize = 100;
pub const MAX_URL_CHARS: usize = 2048;
pub const MAX_UTM_CHARS: usize = 255;
pub const MAX_CUSTOM_PARAM_CHARS: usize = 500;

static UTM_VALUE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]+$").expect("utm value pattern is valid"));

/// A stored campaign: a named UTM triple plus the landing page it tags.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize, sqlx::FromRow)]
pub struct Campaign {
    pub id: Uuid,
    pub owner_id: Uuid,
    pub name: String,
    pub url: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub utm_id: Option<String>,
    pub custom_param: Option<String>,
    pub created_at: DateTime<Utc>,
}

impl Campaign {
    pub fn utm_triple(&self) -> UtmTriple {
        UtmTriple {
            source: self.utm_source.clone(),
            medium: self.utm_medium.clone(),
            campaign: self.utm_campaign.clone(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewCampaign {
    pub owner_id: Uuid,
    pub name: String,
    pub url: String,
    pub utm_source: String,
    pub utm_medium: String,
    pub utm_campaign: String,
    pub utm_term: Option<String>,
    pub utm_content: Option<String>,
    pub utm_id: Option<String>,
    pub custom_param: Option<String>,
}

impl NewCampaign {
    pub fn into_stored(self, id: Uuid, created_at: DateTime<Utc>) -> Campaign {
        Campaign {
            id,
            owner_id: self.owner_id,
            name: self.name,
            url: self.url,
            utm_source: self.utm_source,
            utm_medium: self.utm_medium,
            utm_campaign: self.utm_campaign,
            utm_term: self.utm_term,
            utm_content: self.utm_content,
            utm_id: self.utm_id,
            custom_param: self.custom_param,
            created_at,
        }
    }
}

/// Campaign as returned by the API, with its ready-to-share link.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize, Serialize)]
pub struct CampaignResponse {
    #[serde(flatten)]
    pub campaign: Campaign,
    pub tracking_url: Option<String>,
}

impl From<Campaign> for CampaignResponse {
    fn from(campaign: Campaign) -> Self {
        let tracking_url = build_tracking_url(&campaign);
        CampaignResponse {
            campaign,
            tracking_url,
        }
    }
}

fn utm_value(reader: &mut FieldReader, field: &str) -> Option<String> {
    let value = reader.required_string(field, MAX_UTM_CHARS)?;
    if !UTM_VALUE.is_match(&value) {
        reader.push(Violation::new(
            field,
            ViolationCode::InvalidFormat,
            "may only contain letters, numbers, hyphens and underscores",
        ));
        return None;
    }
    Some(value)
}

fn landing_url(reader: &mut FieldReader) -> Option<String> {
    const FIELD: &str = "url";

    let value = reader.required_string(FIELD, MAX_URL_CHARS)?;
    match Url::parse(&value) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => Some(value),
        _ => {
            reader.push(Violation::new(
                FIELD,
                ViolationCode::InvalidFormat,
                "must be an absolute http(s) URL",
            ));
            None
        }
    }
}

/// Check a campaign creation payload. Blank optional fields count as absent and
/// a blank name defaults to `"<source> - <campaign>"`.
pub fn validate_new_campaign(payload: &Value) -> Result<NewCampaign, Vec<Violation>> {
    let mut reader = FieldReader::new(payload)?;

    let owner_id = reader.required_uuid("owner_id");
    let name = reader.optional_string("name", MAX_NAME_CHARS);
    let url = landing_url(&mut reader);
    let utm_source = utm_value(&mut reader, "utm_source");
    let utm_medium = utm_value(&mut reader, "utm_medium");
    let utm_campaign = utm_value(&mut reader, "utm_campaign");

    let not_blank = |value: Option<String>| value.filter(|v| !v.is_empty());
    let utm_term = not_blank(reader.optional_string("utm_term", MAX_UTM_CHARS));
    let utm_content = not_blank(reader.optional_string("utm_content", MAX_UTM_CHARS));
    let utm_id = not_blank(reader.optional_string("utm_id", MAX_UTM_CHARS));
    let custom_param = not_blank(reader.optional_string("custom_param", MAX_CUSTOM_PARAM_CHARS));

    reader.finish(|| {
        let utm_source = utm_source?;
        let utm_campaign = utm_campaign?;
        let name = not_blank(name).unwrap_or_else(|| format!("{utm_source} - {utm_campaign}"));

        Some(NewCampaign {
            owner_id: owner_id?,
            name,
            url: url?,
            utm_source,
            utm_medium: utm_medium?,
            utm_campaign,
            utm_term,
            utm_content,
            utm_id,
            custom_param,
        })
    })
}

/// Append the campaign's UTM parameters to its landing page URL, after any
/// query pairs the URL already carries. `None` if the stored URL does not parse.
pub fn build_tracking_url(campaign: &Campaign) -> Option<String> {
    let mut url = Url::parse(&campaign.url).ok()?;

    {
        let mut query = url.query_pairs_mut();
        query
            .append_pair("utm_source", &campaign.utm_source)
            .append_pair("utm_medium", &campaign.utm_medium)
            .append_pair("utm_campaign", &campaign.utm_campaign);

        let optional = [
            ("utm_term", &campaign.utm_term),
            ("utm_content", &campaign.utm_content),
            ("utm_id", &campaign.utm_id),
            ("custom_param", &campaign.custom_param),
        ];
        for (key, value) in optional {
            if let Some(value) = value {
                query.append_pair(key, value);
            }
        }
    }

    Some(url.into())
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    fn campaign(url: &str) -> Campaign {
        NewCampaign {
            owner_id: Uuid::new_v4(),
            name: "spring".to_string(),
            url: url.to_string(),
            utm_source: "google".to_string(),
            utm_medium: "cpc".to_string(),
            utm_campaign: "spring_sale".to_string(),
            utm_term: None,
            utm_content: None,
            utm_id: None,
            custom_param: None,
        }
        .into_stored(Uuid::new_v4(), Utc::now())
    }

    #[test]
    fn validates_and_defaults_the_name() {
        let owner_id = Uuid::new_v4();
        let campaign = validate_new_campaign(&json!({
            "owner_id": owner_id.to_string(),
            "url": "https://shop.example.org/landing",
            "utm_source": "newsletter",
            "utm_medium": "email",
            "utm_campaign": "black-friday",
            "utm_term": "  ",
        }))
        .unwrap();

        assert_eq!(campaign.owner_id, owner_id);
        assert_eq!(campaign.name, "newsletter - black-friday");
        assert_eq!(campaign.utm_term, None);
    }

    #[test]
    fn reports_every_violation() {
        let err = validate_new_campaign(&json!({
            "url": "ftp://files.example.org",
            "utm_source": "news letter",
            "utm_medium": "",
            "utm_campaign": "spring",
            "name": "n".repeat(MAX_NAME_CHARS + 1),
        }))
        .unwrap_err();

        let codes: Vec<_> = err.iter().map(|v| (v.field.as_str(), v.code)).collect();
        assert_eq!(
            codes,
            vec![
                ("owner_id", ViolationCode::Required),
                ("name", ViolationCode::TooLong),
                ("url", ViolationCode::InvalidFormat),
                ("utm_source", ViolationCode::InvalidFormat),
                ("utm_medium", ViolationCode::TooShort),
            ]
        );
    }

    #[test]
    fn tracking_url_appends_parameters_in_order() {
        let mut campaign = campaign("https://shop.example.org/landing?ref=home");
        campaign.utm_content = Some("banner".to_string());
        campaign.custom_param = Some("a b".to_string());

        assert_eq!(
            build_tracking_url(&campaign).as_deref(),
            Some(
                "https://shop.example.org/landing?ref=home&utm_source=google&utm_medium=cpc\
                 &utm_campaign=spring_sale&utm_content=banner&custom_param=a+b"
            )
        );
    }

    #[test]
    fn response_carries_tracking_url() {
        let response = CampaignResponse::from(campaign("https://example.org/"));
        let json = serde_json::to_value(&response).unwrap();

        assert_eq!(json["utm_source"], "google");
        assert_eq!(
            json["tracking_url"],
            "https://example.org/?utm_source=google&utm_medium=cpc&utm_campaign=spring_sale"
        );
    }
}
