//! HTTP source for the remote table API.
//!
//! `GET {api_url}/{base_id}/{table_name}?pageSize=..&offset=..&filterByFormula=..`
//! with bearer authentication. The response body is
//! `{"records": [{"id", "createdTime", "fields"}], "offset"}`.

use super::{Page, PageRequest, RemoteSource, SourceError};
use async_trait::async_trait;
use filing_sync_types::RemoteRecord;
use reqwest::Url;
use serde::Deserialize;
use std::time::Duration;
use tracing::debug;

/// Default API root.
pub const DEFAULT_API_URL: &str = "https://api.airtable.com/v0";

/// Connection settings for [`AirtableSource`].
#[derive(Debug, Clone)]
pub struct AirtableConfig {
    /// API root URL.
    pub api_url: String,
    /// Base identifier.
    pub base_id: String,
    /// Table name or identifier.
    pub table_name: String,
    /// Personal access token.
    pub api_key: String,
    /// Per-request timeout.
    pub timeout: Duration,
}

impl AirtableConfig {
    /// Settings against the public API root with a 30 second timeout.
    pub fn new(
        base_id: impl Into<String>,
        table_name: impl Into<String>,
        api_key: impl Into<String>,
    ) -> Self {
        Self {
            api_url: DEFAULT_API_URL.to_string(),
            base_id: base_id.into(),
            table_name: table_name.into(),
            api_key: api_key.into(),
            timeout: Duration::from_secs(30),
        }
    }
}

/// Response body of the list endpoint.
#[derive(Debug, Deserialize)]
struct ListResponse {
    #[serde(default)]
    records: Vec<RemoteRecord>,
    #[serde(default)]
    offset: Option<String>,
}

/// Remote table reached over HTTP.
#[derive(Debug, Clone)]
pub struct AirtableSource {
    http: reqwest::Client,
    endpoint: Url,
    api_key: String,
}

impl AirtableSource {
    /// Build a source. Fails if the endpoint URL cannot be formed.
    pub fn new(config: AirtableConfig) -> Result<Self, SourceError> {
        let mut endpoint = Url::parse(&config.api_url)
            .map_err(|e| SourceError::InvalidEndpoint(format!("{}: {e}", config.api_url)))?;
        endpoint
            .path_segments_mut()
            .map_err(|_| SourceError::InvalidEndpoint(config.api_url.clone()))?
            .pop_if_empty()
            .push(&config.base_id)
            .push(&config.table_name);

        let http = reqwest::Client::builder()
            .timeout(config.timeout)
            .build()
            .map_err(|e| SourceError::Http(e.to_string()))?;

        Ok(Self {
            http,
            endpoint,
            api_key: config.api_key,
        })
    }

    /// The list endpoint this source calls.
    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }
}

#[async_trait]
impl RemoteSource for AirtableSource {
    async fn list_page(&self, request: &PageRequest) -> Result<Page, SourceError> {
        let mut query: Vec<(&str, String)> = vec![("pageSize", request.page_size.to_string())];
        if let Some(offset) = &request.offset {
            query.push(("offset", offset.clone()));
        }
        if let Some(filter) = &request.filter {
            query.push(("filterByFormula", filter.clone()));
        }

        let response = self
            .http
            .get(self.endpoint.clone())
            .bearer_auth(&self.api_key)
            .query(&query)
            .send()
            .await?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(SourceError::from_status(status.as_u16(), body));
        }

        // Body reads can still time out; keep that transient.
        let body: ListResponse = response.json().await.map_err(SourceError::from)?;

        debug!(
            records = body.records.len(),
            has_more = body.offset.is_some(),
            "Listed remote page"
        );

        Ok(Page {
            records: body.records,
            offset: body.offset,
        })
    }
}
