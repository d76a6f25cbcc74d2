/// Plex Discover watchlist provider
///
/// API Flow:
/// 1. Watchlist: /library/sections/watchlist/all, paged through
///    X-Plex-Container-Start / X-Plex-Container-Size headers
/// 2. Mutations: PUT /actions/addToWatchlist and /actions/removeFromWatchlist
///    with the item's ratingKey as query parameter
use std::time::Duration;

use reqwest::{Client as HttpClient, RequestBuilder, StatusCode};
use serde::Deserialize;

use crate::{
    error::{AppError, AppResult},
    models::TargetItemRef,
    services::providers::WatchlistProvider,
};

const PROVIDER_VERSION: &str = "7.2.0";
const PAGE_SIZE: usize = 300;
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

#[derive(Debug, Deserialize)]
struct WatchlistResponse {
    #[serde(rename = "MediaContainer")]
    media_container: MediaContainer,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct MediaContainer {
    #[serde(default)]
    total_size: Option<usize>,
    #[serde(default, rename = "Metadata")]
    metadata: Vec<PlexMetadata>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlexMetadata {
    #[serde(default)]
    rating_key: Option<String>,
    #[serde(default)]
    title: Option<String>,
}

#[derive(Clone)]
pub struct PlexClient {
    http_client: HttpClient,
    token: String,
    api_url: String,
}

impl PlexClient {
    pub fn new(token: String, api_url: String) -> AppResult<Self> {
        let http_client = HttpClient::builder().timeout(REQUEST_TIMEOUT).build()?;
        Ok(Self {
            http_client,
            token,
            api_url: api_url.trim_end_matches('/').to_string(),
        })
    }

    fn with_headers(&self, request: RequestBuilder) -> RequestBuilder {
        request
            .header("Accept", "application/json")
            .header("X-Plex-Provider-Version", PROVIDER_VERSION)
            .header("X-Plex-Token", &self.token)
    }

    async fn fetch_page(&self, start: usize) -> AppResult<MediaContainer> {
        let url = format!("{}/library/sections/watchlist/all", self.api_url);

        let response = self
            .with_headers(self.http_client.get(&url))
            .header("X-Plex-Container-Start", start.to_string())
            .header("X-Plex-Container-Size", PAGE_SIZE.to_string())
            .send()
            .await
            .map_err(|e| AppError::TargetUnavailable(format!("Plex request failed: {}", e)))?;

        let status = response.status();
        if status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            return Err(AppError::TargetUnavailable(format!(
                "Plex rejected the token with status {}",
                status
            )));
        }
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(AppError::TargetUnavailable(format!(
                "Plex API returned status {}: {}",
                status, body
            )));
        }

        let page: WatchlistResponse = response.json().await.map_err(|e| {
            AppError::TargetUnavailable(format!("Failed to parse Plex watchlist: {}", e))
        })?;

        Ok(page.media_container)
    }

    async fn put_action(&self, action: &str, target: &TargetItemRef) -> AppResult<()> {
        let url = format!("{}/actions/{}", self.api_url, action);

        let response = self
            .with_headers(self.http_client.put(&url))
            .query(&[("ratingKey", target.as_str())])
            .send()
            .await
            .map_err(|e| AppError::Mutation {
                retryable: e.is_timeout() || e.is_connect() || e.is_request(),
                message: format!("{} request failed: {}", action, e),
            })?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let body = response.text().await.unwrap_or_default();
        let message = format!("{} returned status {}: {}", action, status, body);
        if status == StatusCode::TOO_MANY_REQUESTS || status.is_server_error() {
            Err(AppError::retryable_mutation(message))
        } else {
            Err(AppError::permanent_mutation(message))
        }
    }
}

#[async_trait::async_trait]
impl WatchlistProvider for PlexClient {
    async fn list_watchlist(&self) -> AppResult<Vec<TargetItemRef>> {
        let mut keys = Vec::new();
        let mut start = 0;

        loop {
            let page = self.fetch_page(start).await?;
            let page_len = page.metadata.len();

            for metadata in page.metadata {
                match metadata.rating_key {
                    Some(key) => keys.push(TargetItemRef::new(key)),
                    None => tracing::debug!(
                        title = metadata.title.as_deref().unwrap_or(""),
                        "Watchlist item without ratingKey"
                    ),
                }
            }

            start += page_len;
            tracing::debug!(fetched = start, total = ?page.total_size, "Fetched watchlist page");

            // The server may cap pages below PAGE_SIZE, so a short page only
            // ends the listing when no totalSize was reported
            let done = match page.total_size {
                Some(total) => start >= total,
                None => page_len < PAGE_SIZE,
            };
            if page_len == 0 || done {
                break;
            }
        }

        tracing::info!(items = keys.len(), provider = "plex", "Watchlist fetched");

        Ok(keys)
    }

    async fn add_to_watchlist(&self, target: &TargetItemRef) -> AppResult<()> {
        self.put_action("addToWatchlist", target).await
    }

    async fn remove_from_watchlist(&self, target: &TargetItemRef) -> AppResult<()> {
        self.put_action("removeFromWatchlist", target).await
    }

    fn name(&self) -> &'static str {
        "plex"
    }
}
