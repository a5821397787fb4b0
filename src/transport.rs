//! Per-attempt HTTP transport.

use std::time::Duration;

use async_trait::async_trait;
use rand::seq::SliceRandom;
use reqwest::header::{HeaderMap, HeaderValue, ACCEPT, ACCEPT_LANGUAGE};
use reqwest::{Client, Proxy};
use tracing::debug;

use crate::proxy::ProxyRecord;
use crate::{ReconError, Result};

const USER_AGENTS: &[&str] = &[
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:121.0) Gecko/20100101 Firefox/121.0",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10.15; rv:121.0) Gecko/20100101 Firefox/121.0",
];

/// A fetched page.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FetchedPage {
    /// HTTP status code.
    pub status: u16,
    /// Final URL after redirects.
    pub url: String,
    /// Response body.
    pub body: String,
}

impl FetchedPage {
    pub fn is_success(&self) -> bool {
        (200..300).contains(&self.status)
    }
}

/// Fetches a URL over whatever identity the implementation is bound to.
#[async_trait]
pub trait PageFetcher: Send + Sync {
    /// Fetches the page at `url`. Non-2xx responses are returned, not raised.
    async fn fetch(&self, url: &str) -> Result<FetchedPage>;
}

/// Picks a user agent from the rotation list.
pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// A reqwest-backed fetcher bound to at most one proxy.
///
/// Built fresh for every probe attempt so that each task owns its own
/// connection state; dropping it closes the underlying connections.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    /// Builds a client that routes through `proxy` (if any) with a random
    /// user agent and the given request timeout.
    pub fn bind(proxy: Option<&ProxyRecord>, timeout: Duration) -> Result<Self> {
        let mut headers = HeaderMap::new();
        headers.insert(
            ACCEPT,
            HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            ),
        );
        headers.insert(ACCEPT_LANGUAGE, HeaderValue::from_static("en-US,en;q=0.5"));
        headers.insert("DNT", HeaderValue::from_static("1"));

        let mut builder = Client::builder()
            .user_agent(random_user_agent())
            .default_headers(headers)
            .timeout(timeout);

        if let Some(record) = proxy {
            debug!("Using proxy: {}", record.address());
            let proxy = Proxy::all(record.endpoint.url())
                .map_err(|e| ReconError::Config(format!("Failed to create proxy: {}", e)))?;
            builder = builder.proxy(proxy);
        }

        let client = builder
            .build()
            .map_err(|e| ReconError::Transport(format!("Failed to create HTTP client: {}", e)))?;
        Ok(Self { client })
    }

    /// Creates an `HttpFetcher` with a custom reqwest client.
    pub fn with_client(client: Client) -> Self {
        Self { client }
    }
}

#[async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, url: &str) -> Result<FetchedPage> {
        let response = self.client.get(url).send().await.map_err(|e| {
            if e.is_timeout() {
                ReconError::Timeout(format!("request to {} timed out", url))
            } else {
                ReconError::Http(e)
            }
        })?;
        let status = response.status().as_u16();
        let final_url = response.url().to_string();
        let body = response.text().await?;
        Ok(FetchedPage {
            status,
            url: final_url,
            body,
        })
    }
}

/// Opens fetchers bound to a proxy.
pub trait Connector: Send + Sync {
    fn connect(&self, proxy: Option<&ProxyRecord>, timeout: Duration)
        -> Result<Box<dyn PageFetcher>>;
}

/// Connects through [`HttpFetcher::bind`].
#[derive(Debug, Clone, Copy, Default)]
pub struct HttpConnector;

impl Connector for HttpConnector {
    fn connect(
        &self,
        proxy: Option<&ProxyRecord>,
        timeout: Duration,
    ) -> Result<Box<dyn PageFetcher>> {
        Ok(Box::new(HttpFetcher::bind(proxy, timeout)?))
    }
}
