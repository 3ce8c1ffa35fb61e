use std::str::FromStr;

use uuid::Uuid;

use crate::api::TrackError;
use crate::event::UtmTriple;
use crate::stores::Store;

/// How far a client-supplied `campaign_id` is trusted.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum CampaignIdPolicy {
    /// Use the id as given; the storage foreign key still rejects unknown ids.
    Trust,
    /// Check that the campaign exists before accepting the id.
    #[default]
    Verify,
}

impl FromStr for CampaignIdPolicy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_lowercase().as_str() {
            "trust" => Ok(CampaignIdPolicy::Trust),
            "verify" => Ok(CampaignIdPolicy::Verify),
            _ => Err(format!("Unknown campaign id policy: {s}")),
        }
    }
}

/// Map an event onto exactly one campaign, either by its explicit id or by its
/// UTM triple. A supplied id never falls back to the triple, and a triple that
/// matches several campaigns is not guessed at.
pub async fn resolve_campaign(
    store: &(dyn Store + Send + Sync),
    policy: CampaignIdPolicy,
    campaign_id: Option<Uuid>,
    triple: Option<&UtmTriple>,
) -> Result<Uuid, TrackError> {
    if let Some(campaign_id) = campaign_id {
        return match policy {
            CampaignIdPolicy::Trust => Ok(campaign_id),
            CampaignIdPolicy::Verify => {
                if store.campaign_exists(campaign_id).await? {
                    Ok(campaign_id)
                } else {
                    Err(TrackError::CampaignNotFound)
                }
            }
        };
    }

    let Some(triple) = triple else {
        return Err(TrackError::CampaignNotFound);
    };

    match store.find_campaigns_by_utm(triple, 2).await?.as_slice() {
        [campaign_id] => Ok(*campaign_id),
        [] => Err(TrackError::CampaignNotFound),
        _ => {
            tracing::warn!(
                utm_source = %triple.source,
                utm_medium = %triple.medium,
                utm_campaign = %triple.campaign,
                "utm triple matches several campaigns"
            );
            Err(TrackError::CampaignNotFound)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::campaign::{Campaign, NewCampaign};
    use crate::stores::memory::MemoryStore;

    async fn create(store: &MemoryStore, source: &str, campaign: &str) -> Campaign {
        store
            .create_campaign(NewCampaign {
                owner_id: Uuid::new_v4(),
                name: "test".to_string(),
                url: "https://example.org/".to_string(),
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

    #[tokio::test]
    async fn resolves_unique_triple() {
        let store = MemoryStore::new();
        let campaign = create(&store, "google", "test").await;

        let resolved = resolve_campaign(
            &store,
            CampaignIdPolicy::Verify,
            None,
            Some(&campaign.utm_triple()),
        )
        .await
        .unwrap();
        assert_eq!(resolved, campaign.id);
    }

    #[tokio::test]
    async fn unknown_or_ambiguous_triple_is_not_found() {
        let store = MemoryStore::new();
        let triple = UtmTriple {
            source: "google".to_string(),
            medium: "cpc".to_string(),
            campaign: "test".to_string(),
        };

        let err = resolve_campaign(&store, CampaignIdPolicy::Verify, None, Some(&triple))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::CampaignNotFound));

        create(&store, "google", "test").await;
        create(&store, "google", "test").await;
        let err = resolve_campaign(&store, CampaignIdPolicy::Verify, None, Some(&triple))
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::CampaignNotFound));
    }

    #[tokio::test]
    async fn nothing_to_resolve_is_not_found() {
        let store = MemoryStore::new();
        let err = resolve_campaign(&store, CampaignIdPolicy::Trust, None, None)
            .await
            .unwrap_err();
        assert!(matches!(err, TrackError::CampaignNotFound));
    }

    #[tokio::test]
    async fn campaign_id_follows_policy() {
        let store = MemoryStore::new();
        let campaign = create(&store, "google", "test").await;
        let unknown = Uuid::new_v4();

        assert_eq!(
            resolve_campaign(&store, CampaignIdPolicy::Verify, Some(campaign.id), None)
                .await
                .unwrap(),
            campaign.id
        );
        assert!(matches!(
            resolve_campaign(&store, CampaignIdPolicy::Verify, Some(unknown), None).await,
            Err(TrackError::CampaignNotFound)
        ));
        assert_eq!(
            resolve_campaign(&store, CampaignIdPolicy::Trust, Some(unknown), None)
                .await
                .unwrap(),
            unknown
        );
    }

    #[tokio::test]
    async fn explicit_id_does_not_fall_back_to_triple() {
        let store = MemoryStore::new();
        let campaign = create(&store, "google", "test").await;

        let err = resolve_campaign(
            &store,
            CampaignIdPolicy::Verify,
            Some(Uuid::new_v4()),
            Some(&campaign.utm_triple()),
        )
        .await
        .unwrap_err();
        assert!(matches!(err, TrackError::CampaignNotFound));
    }

    #[test]
    fn parses_policy() {
        assert_eq!("trust".parse::<CampaignIdPolicy>(), Ok(CampaignIdPolicy::Trust));
        assert_eq!(
            " VERIFY ".parse::<CampaignIdPolicy>(),
            Ok(CampaignIdPolicy::Verify)
        );
        assert!("maybe".parse::<CampaignIdPolicy>().is_err());
    }
}
