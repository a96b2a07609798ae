//! Upstream directory access.
//!
//! The [`Directory`] trait abstracts group-member enumeration and the Places
//! catalogue so the scope builder and the health probe can run against a mock
//! in tests. The only production implementation is [`GraphDirectory`], which
//! talks to Microsoft Graph with app credentials.

pub mod credentials;
pub mod forward;

pub use credentials::AppCredentials;
pub use forward::{Forwarder, UpstreamBody, UpstreamResponse};

use std::sync::Arc;

use reqwest::Client;
use serde::Deserialize;
use tracing::debug;

use crate::config::GraphConfig;
use crate::{Error, Result};

/// Members per enumeration page.
const MEMBER_PAGE_SIZE: usize = 100;

/// One raw group member as reported by the directory.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct MemberRecord {
    /// Directory object id
    pub id: String,
    /// Mail address, if the object has one
    #[serde(default)]
    pub mail: Option<String>,
    /// Display name, if set
    #[serde(default, rename = "displayName")]
    pub display_name: Option<String>,
}

/// One page of group members.
#[derive(Debug, Clone)]
pub struct MemberPage {
    /// Members on this page
    pub members: Vec<MemberRecord>,
    /// Opaque continuation link; `None` signals end of stream
    pub next_link: Option<String>,
}

/// One entry from the Places catalogue, used only to enrich existing
/// resources.
#[derive(Debug, Clone)]
pub struct PlaceRecord {
    /// Directory object id
    pub id: String,
    /// Mail address of the place mailbox
    pub mail: Option<String>,
    /// Display name
    pub display_name: Option<String>,
    /// Seat capacity
    pub capacity: Option<u32>,
    /// Building or floor hint
    pub location: Option<String>,
}

/// Upstream directory operations needed by the core.
#[async_trait::async_trait]
pub trait Directory: Send + Sync + 'static {
    /// Fetch one page of group members. Pass the previous page's `next_link`
    /// to continue; `None` starts the enumeration.
    async fn member_page(&self, group_id: &str, next_link: Option<&str>) -> Result<MemberPage>;

    /// Fetch the Places catalogue (rooms and workspaces).
    async fn places(&self) -> Result<Vec<PlaceRecord>>;

    /// Cheap reachability check for the health endpoint.
    async fn probe(&self) -> Result<()>;
}

// ── Graph implementation ──────────────────────────────────────────────────

#[derive(Debug, Deserialize)]
struct GraphPage<T> {
    #[serde(default)]
    value: Vec<T>,
    #[serde(default, rename = "@odata.nextLink")]
    next_link: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GraphPlace {
    id: String,
    #[serde(default)]
    email_address: Option<String>,
    #[serde(default)]
    display_name: Option<String>,
    #[serde(default)]
    capacity: Option<u32>,
    #[serde(default)]
    building: Option<String>,
    #[serde(default)]
    floor_label: Option<String>,
}

impl From<GraphPlace> for PlaceRecord {
    fn from(p: GraphPlace) -> Self {
        Self {
            id: p.id,
            mail: p.email_address.map(|m| m.trim().to_lowercase()),
            display_name: p.display_name,
            capacity: p.capacity,
            location: p.building.or(p.floor_label),
        }
    }
}

/// Microsoft Graph directory client.
pub struct GraphDirectory {
    http: Client,
    base_url: String,
    credentials: Arc<AppCredentials>,
}

impl GraphDirectory {
    /// Create a Graph client over a shared credential provider.
    pub fn new(config: &GraphConfig, credentials: Arc<AppCredentials>) -> Result<Self> {
        let http = Client::builder()
            .timeout(config.request_timeout)
            .pool_max_idle_per_host(10)
            .tcp_nodelay(true)
            .build()
            .map_err(|e| Error::Config(format!("HTTP client: {e}")))?;

        Ok(Self {
            http,
            base_url: config.base_url.trim_end_matches('/').to_string(),
            credentials,
        })
    }

    async fn get_json<T: serde::de::DeserializeOwned>(&self, url: &str) -> Result<T> {
        let bearer = self.credentials.bearer().await?;
        let response = self
            .http
            .get(url)
            .bearer_auth(bearer)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::UpstreamTimeout(url.to_string())
                } else {
                    Error::UpstreamUnavailable(e.to_string())
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            return Err(Error::UpstreamUnavailable(format!(
                "upstream returned {status} for {url}"
            )));
        }

        response
            .json()
            .await
            .map_err(|e| Error::UpstreamUnavailable(format!("decode: {e}")))
    }

    async fn place_list(&self, graph_type: &str) -> Result<Vec<PlaceRecord>> {
        let mut url = format!("{}/v1.0/places/{graph_type}", self.base_url);
        let mut places = Vec::new();
        loop {
            let page: GraphPage<GraphPlace> = self.get_json(&url).await?;
            places.extend(page.value.into_iter().map(PlaceRecord::from));
            match page.next_link {
                Some(next) => url = next,
                None => break,
            }
        }
        Ok(places)
    }
}

#[async_trait::async_trait]
impl Directory for GraphDirectory {
    async fn member_page(&self, group_id: &str, next_link: Option<&str>) -> Result<MemberPage> {
        let url = match next_link {
            Some(link) => link.to_string(),
            None => format!(
                "{}/v1.0/groups/{group_id}/members?$top={MEMBER_PAGE_SIZE}",
                self.base_url
            ),
        };

        let page: GraphPage<MemberRecord> = self.get_json(&url).await?;
        debug!(
            group_id = %group_id,
            members = page.value.len(),
            more = page.next_link.is_some(),
            "Fetched member page"
        );

        Ok(MemberPage {
            members: page.value,
            next_link: page.next_link,
        })
    }

    async fn places(&self) -> Result<Vec<PlaceRecord>> {
        let mut places = self.place_list("microsoft.graph.room").await?;
        places.extend(self.place_list("microsoft.graph.workspace").await?);
        Ok(places)
    }

    async fn probe(&self) -> Result<()> {
        // A credential acquisition exercises the tenant endpoint; it is the
        // cheapest call that proves the upstream trust chain works.
        self.credentials.bearer().await.map(|_| ())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn member_record_deserializes_graph_shape() {
        let json = r#"{"id":"r1","mail":"room-a@x.example","displayName":"Room A"}"#;
        let m: MemberRecord = serde_json::from_str(json).unwrap();
        assert_eq!(m.id, "r1");
        assert_eq!(m.mail.as_deref(), Some("room-a@x.example"));
        assert_eq!(m.display_name.as_deref(), Some("Room A"));
    }

    #[test]
    fn member_record_tolerates_missing_fields() {
        let m: MemberRecord = serde_json::from_str(r#"{"id":"u1"}"#).unwrap();
        assert!(m.mail.is_none());
        assert!(m.display_name.is_none());
    }

    #[test]
    fn graph_page_reads_odata_next_link() {
        let json = r#"{"value":[{"id":"a"}],"@odata.nextLink":"https://graph/next"}"#;
        let page: GraphPage<MemberRecord> = serde_json::from_str(json).unwrap();
        assert_eq!(page.value.len(), 1);
        assert_eq!(page.next_link.as_deref(), Some("https://graph/next"));
    }

    #[test]
    fn place_conversion_normalizes_mail_and_prefers_building() {
        let place = GraphPlace {
            id: "p1".to_string(),
            email_address: Some("  Room-A@X.Example ".to_string()),
            display_name: Some("Room A".to_string()),
            capacity: Some(12),
            building: Some("B2".to_string()),
            floor_label: Some("3".to_string()),
        };
        let record = PlaceRecord::from(place);
        assert_eq!(record.mail.as_deref(), Some("room-a@x.example"));
        assert_eq!(record.location.as_deref(), Some("B2"));
        assert_eq!(record.capacity, Some(12));
    }
}
