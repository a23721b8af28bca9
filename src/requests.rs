use std::time::Duration;

use rand::seq::IndexedRandom;
use reqwest::{Client, ClientBuilder, StatusCode, header};
use thiserror::Error;

use crate::ratelimit::RateLimiter;

pub const USER_AGENTS: [&str; 3] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/118.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/117.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/15.1 Safari/605.1.15",
];

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

#[derive(Error, Debug)]
pub enum FetchError {
    #[error("request rejected by anti-bot protection (HTTP {0})")]
    Blocked(u16),

    #[error("unexpected HTTP status {0}")]
    Status(u16),

    #[error("network error: {0}")]
    Network(String),

    #[error("browser fetch failed: {0}")]
    Browser(String),
}

impl From<reqwest::Error> for FetchError {
    fn from(err: reqwest::Error) -> Self {
        FetchError::Network(err.to_string())
    }
}

/// Something that can hand back the HTML of a listing page.
#[allow(async_fn_in_trait)]
pub trait ListingSource {
    async fn fetch_page(&self, url: &str, user_agent: &str) -> Result<String, FetchError>;
}

pub struct RequestClient {
    client: Client,
    rate_limiter: RateLimiter,
}

impl RequestClient {
    pub fn new(timeout: Duration) -> anyhow::Result<Self> {
        let mut headers = header::HeaderMap::new();
        headers.insert(
            header::ACCEPT,
            header::HeaderValue::from_static(
                "text/html,application/xhtml+xml,application/xml;q=0.9,image/avif,image/webp,image/apng,*/*;q=0.8",
            ),
        );
        headers.insert(
            header::ACCEPT_LANGUAGE,
            header::HeaderValue::from_static("pl-PL,pl;q=0.9,en-US;q=0.8,en;q=0.7"),
        );
        headers.insert(
            header::REFERER,
            header::HeaderValue::from_static("https://www.google.com/"),
        );
        headers.insert(
            header::UPGRADE_INSECURE_REQUESTS,
            header::HeaderValue::from_static("1"),
        );

        let client = ClientBuilder::new()
            .default_headers(headers)
            .cookie_store(true)
            .timeout(timeout)
            .build()?;
        let rate_limiter = RateLimiter::new();
        Ok(Self {
            client,
            rate_limiter,
        })
    }
}

impl ListingSource for RequestClient {
    async fn fetch_page(&self, url: &str, user_agent: &str) -> Result<String, FetchError> {
        // Wait (non-blocking) until the self-imposed pacing lets us through.
        self.rate_limiter.wait_until_ready().await;

        let response = self
            .client
            .get(url)
            .header(header::USER_AGENT, user_agent)
            .send()
            .await?;

        match response.status() {
            StatusCode::OK => Ok(response.text().await?),
            StatusCode::FORBIDDEN | StatusCode::TOO_MANY_REQUESTS => {
                Err(FetchError::Blocked(response.status().as_u16()))
            }
            status => Err(FetchError::Status(status.as_u16())),
        }
    }
}
