//! Origin fetching

use crate::{Error, Result};
use async_trait::async_trait;
use bytes::Bytes;
use reqwest::{header::CACHE_CONTROL, Client};
use std::time::Duration;
use url::Url;

/// Fetches a resource from its origin
#[async_trait]
pub trait Fetch: Send + Sync {
    async fn get(&self, url: &Url) -> Result<Bytes>;
}

/// reqwest-backed fetcher that always revalidates with the origin
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Self {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .unwrap_or_else(|_| Client::new());
        Self { client }
    }

    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl Fetch for HttpFetcher {
    async fn get(&self, url: &Url) -> Result<Bytes> {
        let fetch_error = |e: reqwest::Error| Error::Fetch {
            url: url.to_string(),
            reason: e.to_string(),
        };

        let response = self
            .client
            .get(url.clone())
            .header(CACHE_CONTROL, "no-cache")
            .send()
            .await
            .map_err(fetch_error)?
            .error_for_status()
            .map_err(fetch_error)?;

        response.bytes().await.map_err(fetch_error)
    }
}
