mod browser;
mod http;
mod webdriver;

pub use browser::{BrowserFetcher, Chromium, Render};
pub use http::{random_user_agent, HttpFetcher};
pub use webdriver::WebDriver;

use crate::{
    config::{CompanyConfig, FetchMethod, SEARCH_KEYS},
    error::FetchError,
};

use rand::Rng;
use reqwest::Url;
use std::time::Duration;
use tracing::{debug, warn};

const SEARCH_SUFFIX: &str = "new grad";

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Page {
    pub html: String,
    pub method: FetchMethod,
    /// Browser wait ran out before the job containers showed up.
    pub degraded: bool,
}

#[async_trait::async_trait]
pub trait PageFetcher: Send + Sync {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Page, FetchError>;
}

/// Careers URL with the company's search parameters appended.
pub fn page_url(company: &CompanyConfig) -> Result<Url, FetchError> {
    let mut url = Url::parse(&company.careers_url)
        .map_err(|e| FetchError::Fatal(format!("{}: {}", company.careers_url, e)))?;

    if !company.search_params.is_empty() {
        let mut pairs = url.query_pairs_mut();
        for (key, value) in &company.search_params {
            if SEARCH_KEYS.contains(&key.as_str())
                && !value.to_lowercase().contains(SEARCH_SUFFIX)
            {
                pairs.append_pair(key, &format!("{} {}", value, SEARCH_SUFFIX));
            } else {
                pairs.append_pair(key, value);
            }
        }
    }
    Ok(url)
}

/// Randomized request spacing, as inclusive (min, max) ranges.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Pacing {
    pub request_delay: (Duration, Duration),
    pub company_delay: (Duration, Duration),
}

impl Default for Pacing {
    fn default() -> Self {
        Pacing {
            request_delay: (Duration::from_secs(1), Duration::from_secs(3)),
            company_delay: (Duration::from_secs(2), Duration::from_secs(5)),
        }
    }
}

impl Pacing {
    pub fn none() -> Self {
        Pacing {
            request_delay: (Duration::ZERO, Duration::ZERO),
            company_delay: (Duration::ZERO, Duration::ZERO),
        }
    }
}

fn jitter((min, max): (Duration, Duration)) -> Duration {
    if max <= min {
        min
    } else {
        rand::thread_rng().gen_range(min..=max)
    }
}

pub(crate) async fn pause(range: (Duration, Duration)) {
    let delay = jitter(range);
    if !delay.is_zero() {
        debug!("Sleeping {:?}", delay);
        tokio::time::sleep(delay).await;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts, the first one included.
    pub max_attempts: u32,
    /// Wait after the n-th failed attempt is `backoff * n`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        RetryPolicy {
            max_attempts: 3,
            backoff: Duration::from_secs(2),
        }
    }
}

/// Wraps a fetcher with request pacing and retries of transient failures.
pub struct Retrying<F> {
    inner: F,
    policy: RetryPolicy,
    request_delay: (Duration, Duration),
}

impl<F: PageFetcher> Retrying<F> {
    pub fn new(inner: F, policy: RetryPolicy, pacing: &Pacing) -> Self {
        Retrying {
            inner,
            policy,
            request_delay: pacing.request_delay,
        }
    }
}

#[async_trait::async_trait]
impl<F: PageFetcher> PageFetcher for Retrying<F> {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Page, FetchError> {
        let mut attempt = 1;
        loop {
            pause(self.request_delay).await;
            match self.inner.fetch(company).await {
                Ok(page) => return Ok(page),
                Err(e) if e.is_transient() && attempt < self.policy.max_attempts => {
                    let wait = self.policy.backoff * attempt;
                    warn!(
                        "Attempt {}/{} failed for {}: {}; retrying in {:?}",
                        attempt, self.policy.max_attempts, company.name, e, wait
                    );
                    tokio::time::sleep(wait).await;
                    attempt += 1;
                }
                Err(e) => return Err(e),
            }
        }
    }
}

/// Picks the static or browser path per company. Static failures fall back
/// to the browser when one is available.
pub struct FetchRouter<S, B> {
    static_fetcher: S,
    browser: Option<B>,
}

impl<S: PageFetcher, B: PageFetcher> FetchRouter<S, B> {
    pub fn new(static_fetcher: S, browser: Option<B>) -> Self {
        FetchRouter {
            static_fetcher,
            browser,
        }
    }
}

#[async_trait::async_trait]
impl<S: PageFetcher, B: PageFetcher> PageFetcher for FetchRouter<S, B> {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Page, FetchError> {
        match (company.method, &self.browser) {
            (FetchMethod::Browser, Some(browser)) => browser.fetch(company).await,
            (FetchMethod::Browser, None) => Err(FetchError::Fatal(
                "page needs a browser but none is configured".to_string(),
            )),
            (FetchMethod::Static, browser) => match self.static_fetcher.fetch(company).await {
                Ok(page) => Ok(page),
                Err(e) => match browser {
                    Some(browser) => {
                        warn!(
                            "Static fetch failed for {}, trying browser: {}",
                            company.name, e
                        );
                        browser.fetch(company).await
                    }
                    None => Err(e),
                },
            },
        }
    }
}
