//! Production implementation of TransitFeed against the MBTA v3 JSON:API.

use crate::error::FeedError;
use crate::feed::TransitFeed;
use crate::types::{JsonApiDocument, RawRecord, RouteId};
use async_trait::async_trait;
use std::time::Duration;
use tracing::debug;

/// Default API root.
pub const MBTA_API_BASE: &str = "https://api-v3.mbta.com";

/// HTTP feed for one route.
///
/// Vehicles come from `GET {base}/vehicles?filter[route]={route}&include=trip`,
/// stops from `GET {base}/stops?filter[route]={route}`. Both answer with a
/// JSON:API document whose `data` array is handed over unparsed.
pub struct HttpFeed {
    client: reqwest::Client,
    base_url: String,
    route: RouteId,
    timeout: Duration,
}

impl HttpFeed {
    /// Creates a feed for `route` rooted at `base_url`.
    pub fn new(base_url: impl Into<String>, route: RouteId, timeout: Duration) -> Result<Self, FeedError> {
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FeedError::from_reqwest(e, timeout))?;

        Ok(Self {
            client,
            base_url: base_url.into().trim_end_matches('/').to_string(),
            route,
            timeout,
        })
    }

    /// Returns the route this feed polls vehicles for.
    pub fn route(&self) -> &RouteId {
        &self.route
    }

    /// URL of the vehicles endpoint (without query).
    pub fn vehicles_url(&self) -> String {
        format!("{}/vehicles", self.base_url)
    }

    /// URL of the stops endpoint (without query).
    pub fn stops_url(&self) -> String {
        format!("{}/stops", self.base_url)
    }

    async fn get_document(&self, url: &str, query: &[(&str, &str)]) -> Result<Vec<RawRecord>, FeedError> {
        let response = self
            .client
            .get(url)
            .query(query)
            .send()
            .await
            .map_err(|e| FeedError::from_reqwest(e, self.timeout))?;

        if !response.status().is_success() {
            return Err(FeedError::Http {
                status: response.status().as_u16(),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| FeedError::from_reqwest(e, self.timeout))?;
        let document: JsonApiDocument = serde_json::from_slice(&bytes)?;

        debug!("GET {} -> {} records", url, document.data.len());
        Ok(document.data)
    }
}

#[async_trait]
impl TransitFeed for HttpFeed {
    async fn fetch_vehicle_snapshot(&self) -> Result<Vec<RawRecord>, FeedError> {
        let url = self.vehicles_url();
        self.get_document(
            &url,
            &[("filter[route]", self.route.as_str()), ("include", "trip")],
        )
        .await
    }

    async fn fetch_route_stops(&self, route: &RouteId) -> Result<Vec<RawRecord>, FeedError> {
        let url = self.stops_url();
        self.get_document(&url, &[("filter[route]", route.as_str())]).await
    }
}
