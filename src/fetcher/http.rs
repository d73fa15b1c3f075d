use super::{page_url, Page, PageFetcher};
use crate::{
    config::{CompanyConfig, FetchMethod},
    error::FetchError,
};

use rand::seq::SliceRandom;
use reqwest::{
    header::{ACCEPT, ACCEPT_LANGUAGE, USER_AGENT},
    Client, StatusCode, Url,
};
use std::time::Duration;
use tracing::debug;

const USER_AGENTS: [&str; 6] = [
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0.0.0 Safari/537.36",
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/123.0.0.0 Safari/537.36",
    "Mozilla/5.0 (Macintosh; Intel Mac OS X 14_4_1) AppleWebKit/605.1.15 (KHTML, like Gecko) Version/17.4.1 Safari/605.1.15",
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64; rv:125.0) Gecko/20100101 Firefox/125.0",
    "Mozilla/5.0 (X11; Ubuntu; Linux x86_64; rv:124.0) Gecko/20100101 Firefox/124.0",
];

const ACCEPT_HTML: &str = "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8";

pub fn random_user_agent() -> &'static str {
    USER_AGENTS
        .choose(&mut rand::thread_rng())
        .copied()
        .unwrap_or(USER_AGENTS[0])
}

/// Fetches server-rendered pages with a plain GET.
pub struct HttpFetcher {
    client: Client,
}

impl HttpFetcher {
    pub fn new(timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("Failed to build HTTP client: {}", e)))?;
        Ok(HttpFetcher { client })
    }

    pub fn with_client(client: Client) -> Self {
        HttpFetcher { client }
    }

    /// GETs `url` as a browser would and returns the non-empty body.
    pub async fn get(&self, url: Url) -> Result<String, FetchError> {
        debug!("Visit {}", url);
        let response = self
            .client
            .get(url)
            .header(USER_AGENT, random_user_agent())
            .header(ACCEPT, ACCEPT_HTML)
            .header(ACCEPT_LANGUAGE, "en-US,en;q=0.5")
            .send()
            .await
            .map_err(classify)?;

        check_status(response.status())?;

        let html = response.text().await.map_err(classify)?;
        if html.trim().is_empty() {
            return Err(FetchError::Transient("empty response body".to_string()));
        }
        Ok(html)
    }
}

pub(super) fn classify(e: reqwest::Error) -> FetchError {
    if e.is_builder() || e.is_redirect() {
        FetchError::Fatal(e.to_string())
    } else {
        FetchError::Transient(e.to_string())
    }
}

fn check_status(status: StatusCode) -> Result<(), FetchError> {
    if status.is_success() {
        Ok(())
    } else if status.is_server_error()
        || status == StatusCode::TOO_MANY_REQUESTS
        || status == StatusCode::REQUEST_TIMEOUT
    {
        Err(FetchError::Transient(format!("HTTP {}", status)))
    } else {
        Err(FetchError::Fatal(format!("HTTP {}", status)))
    }
}

#[async_trait::async_trait]
impl PageFetcher for HttpFetcher {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Page, FetchError> {
        let html = self.get(page_url(company)?).await?;
        Ok(Page {
            html,
            method: FetchMethod::Static,
            degraded: false,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::company;
    use mockito::Matcher;
    use pretty_assertions::assert_eq;

    fn fetcher() -> HttpFetcher {
        let client = Client::builder()
            .no_proxy()
            .timeout(Duration::from_secs(5))
            .build()
            .unwrap();
        HttpFetcher::with_client(client)
    }

    fn pooled_user_agent() -> Matcher {
        Matcher::AnyOf(
            USER_AGENTS
                .iter()
                .map(|ua| Matcher::Exact(ua.to_string()))
                .collect(),
        )
    }

    #[tokio::test]
    async fn get_sends_search_query_and_pooled_user_agent() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/careers")
            .match_query(Matcher::UrlEncoded(
                "q".to_string(),
                "software new grad".to_string(),
            ))
            .match_header("user-agent", pooled_user_agent())
            .match_header("accept", ACCEPT_HTML)
            .with_status(200)
            .with_header("content-type", "text/html")
            .with_body("<html><body>jobs</body></html>")
            .create_async()
            .await;

        let mut c = company("Acme");
        c.careers_url = format!("{}/careers", server.url());
        c.search_params.insert("q".to_string(), "software".to_string());

        let page = fetcher().fetch(&c).await.unwrap();
        assert_eq!(page.html, "<html><body>jobs</body></html>");
        assert_eq!(page.method, FetchMethod::Static);
        assert!(!page.degraded);
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn statuses_map_to_error_kinds() {
        let mut server = mockito::Server::new_async().await;
        let _busy = server
            .mock("GET", "/busy")
            .with_status(503)
            .with_body("busy")
            .create_async()
            .await;
        let _throttled = server
            .mock("GET", "/throttled")
            .with_status(429)
            .create_async()
            .await;
        let _gone = server
            .mock("GET", "/gone")
            .with_status(404)
            .with_body("gone")
            .create_async()
            .await;
        let _blank = server
            .mock("GET", "/blank")
            .with_status(200)
            .with_body("   ")
            .create_async()
            .await;

        let f = fetcher();
        let at = |path: &str| {
            let mut c = company("Acme");
            c.careers_url = format!("{}{}", server.url(), path);
            c
        };

        assert_eq!(
            f.fetch(&at("/busy")).await,
            Err(FetchError::Transient(
                "HTTP 503 Service Unavailable".to_string()
            ))
        );
        assert!(f.fetch(&at("/throttled")).await.unwrap_err().is_transient());
        assert_eq!(
            f.fetch(&at("/gone")).await,
            Err(FetchError::Fatal("HTTP 404 Not Found".to_string()))
        );
        assert_eq!(
            f.fetch(&at("/blank")).await,
            Err(FetchError::Transient("empty response body".to_string()))
        );
    }

    #[tokio::test]
    async fn refused_connection_is_transient() {
        let mut c = company("Acme");
        c.careers_url = "http://127.0.0.1:1/careers".to_string();
        assert!(fetcher().fetch(&c).await.unwrap_err().is_transient());
    }

    #[test]
    fn status_classification() {
        assert_eq!(check_status(StatusCode::OK), Ok(()));
        assert!(check_status(StatusCode::BAD_GATEWAY).unwrap_err().is_transient());
        assert!(check_status(StatusCode::TOO_MANY_REQUESTS)
            .unwrap_err()
            .is_transient());
        assert!(!check_status(StatusCode::FORBIDDEN).unwrap_err().is_transient());
    }

    #[test]
    fn user_agent_comes_from_pool() {
        for _ in 0..20 {
            assert!(USER_AGENTS.contains(&random_user_agent()));
        }
    }
}
