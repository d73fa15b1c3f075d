use super::{http::random_user_agent, page_url, Page, PageFetcher};
use crate::{
    config::{CompanyConfig, FetchMethod, Interaction},
    error::FetchError,
};

use scraper::{Html, Selector};
use std::{path::PathBuf, process::Stdio, time::Duration};
use tokio::{
    process::Command,
    time::{timeout, Instant},
};
use tracing::{debug, info, warn};

/// Produces the DOM of a page after scripts ran for `budget`.
#[async_trait::async_trait]
pub trait Render: Send + Sync {
    async fn render(
        &self,
        url: &str,
        interaction: &Interaction,
        budget: Duration,
    ) -> Result<String, FetchError>;

    /// Whether `render` runs the interaction; others render the page as it
    /// loads.
    fn supports_interaction(&self) -> bool {
        false
    }
}

#[async_trait::async_trait]
impl Render for Box<dyn Render> {
    async fn render(
        &self,
        url: &str,
        interaction: &Interaction,
        budget: Duration,
    ) -> Result<String, FetchError> {
        (**self).render(url, interaction, budget).await
    }

    fn supports_interaction(&self) -> bool {
        (**self).supports_interaction()
    }
}

/// Flags for a headless Chrome that looks like a desktop browser.
pub(crate) fn headless_args() -> Vec<String> {
    vec![
        "--headless=new".to_string(),
        "--disable-gpu".to_string(),
        "--no-sandbox".to_string(),
        "--disable-dev-shm-usage".to_string(),
        "--disable-extensions".to_string(),
        "--window-size=1920,1080".to_string(),
        "--disable-blink-features=AutomationControlled".to_string(),
        format!("--user-agent={}", random_user_agent()),
    ]
}

/// Headless Chromium driven through `--dump-dom`.
pub struct Chromium {
    binary: PathBuf,
    /// Extra time allowed on top of the virtual-time budget for process
    /// start-up and teardown.
    slack: Duration,
}

impl Chromium {
    pub fn new<P: Into<PathBuf>>(binary: P) -> Self {
        Chromium {
            binary: binary.into(),
            slack: Duration::from_secs(15),
        }
    }

    fn args(url: &str, budget: Duration) -> Vec<String> {
        let mut args = headless_args();
        args.extend([
            format!("--virtual-time-budget={}", budget.as_millis()),
            "--dump-dom".to_string(),
            url.to_string(),
        ]);
        args
    }
}

#[async_trait::async_trait]
impl Render for Chromium {
    async fn render(
        &self,
        url: &str,
        _interaction: &Interaction,
        budget: Duration,
    ) -> Result<String, FetchError> {
        let child = Command::new(&self.binary)
            .args(Self::args(url, budget))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| {
                FetchError::Fatal(format!("Cannot start {}: {}", self.binary.display(), e))
            })?;

        let limit = budget + self.slack;
        match timeout(limit, child.wait_with_output()).await {
            Ok(Ok(output)) if output.status.success() => {
                Ok(String::from_utf8_lossy(&output.stdout).into_owned())
            }
            Ok(Ok(output)) => Err(FetchError::Transient(format!(
                "browser exited with {}: {}",
                output.status,
                String::from_utf8_lossy(&output.stderr).trim()
            ))),
            Ok(Err(e)) => Err(FetchError::Transient(e.to_string())),
            Err(_) => Err(FetchError::Transient(format!(
                "browser render exceeded {:?}",
                limit
            ))),
        }
    }
}

/// Renders a page until the job containers appear or the company's wait
/// bound runs out. On timeout the last rendered DOM is returned as a
/// degraded page, so whatever did load can still be extracted.
pub struct BrowserFetcher<R = Chromium> {
    renderer: R,
    initial_budget: Duration,
    poll_interval: Duration,
}

impl<R: Render> BrowserFetcher<R> {
    pub fn new(renderer: R) -> Self {
        BrowserFetcher {
            renderer,
            initial_budget: Duration::from_secs(3),
            poll_interval: Duration::from_millis(500),
        }
    }

    pub fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn with_initial_budget(mut self, initial_budget: Duration) -> Self {
        self.initial_budget = initial_budget;
        self
    }
}

fn compile(selector: &str) -> Result<Selector, FetchError> {
    Selector::parse(selector)
        .map_err(|_| FetchError::Fatal(format!("invalid job_container selector `{}`", selector)))
}

fn has_match(html: &str, selector: &str) -> bool {
    match compile(selector) {
        Ok(selector) => Html::parse_document(html).select(&selector).next().is_some(),
        Err(_) => false,
    }
}

#[async_trait::async_trait]
impl<R: Render> PageFetcher for BrowserFetcher<R> {
    async fn fetch(&self, company: &CompanyConfig) -> Result<Page, FetchError> {
        let url = page_url(company)?.to_string();
        let container = company.selectors.job_container.as_str();
        compile(container)?;

        if !company.interaction.is_empty() && !self.renderer.supports_interaction() {
            warn!(
                "{}: this browser cannot run selenium_config, rendering the page as loaded",
                company.name
            );
        }

        let deadline = Instant::now() + company.wait;
        let mut budget = self.initial_budget;
        let mut last_html: Option<String> = None;
        let mut last_error: Option<FetchError> = None;

        loop {
            let remaining = deadline.saturating_duration_since(Instant::now());
            let budget_now = budget.min(remaining);
            debug!("Render {} with budget {:?}", url, budget_now);
            let rendered = timeout(
                remaining,
                self.renderer.render(&url, &company.interaction, budget_now),
            )
            .await;
            match rendered {
                Ok(Ok(html)) => {
                    if has_match(&html, container) {
                        info!("Job containers rendered for {}", company.name);
                        return Ok(Page {
                            html,
                            method: FetchMethod::Browser,
                            degraded: false,
                        });
                    }
                    last_html = Some(html);
                }
                Ok(Err(e @ FetchError::Fatal(_))) => return Err(e),
                Ok(Err(e)) => {
                    debug!("Render of {} failed: {}", url, e);
                    last_error = Some(e);
                }
                Err(_) => {
                    debug!("Render of {} cut off after {:?}", url, company.wait);
                    last_error = Some(FetchError::Transient(format!(
                        "browser render exceeded {:?}",
                        company.wait
                    )));
                    break;
                }
            }

            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                break;
            }
            tokio::time::sleep(self.poll_interval.min(remaining)).await;
            budget *= 2;
        }

        match last_html {
            Some(html) if !html.trim().is_empty() => {
                warn!(
                    "Timed out after {:?} waiting for `{}` on {}; using partial page",
                    company.wait, company.selectors.job_container, company.name
                );
                Ok(Page {
                    html,
                    method: FetchMethod::Browser,
                    degraded: true,
                })
            }
            _ => Err(last_error.unwrap_or_else(|| {
                FetchError::Transient("browser rendered an empty page".to_string())
            })),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::tests::company;
    use pretty_assertions::assert_eq;
    use std::sync::Mutex;

    /// Returns the scripted DOMs in order, repeating the last one.
    struct ScriptedRender {
        doms: Mutex<Vec<Result<String, FetchError>>>,
        budgets: Mutex<Vec<Duration>>,
    }

    impl ScriptedRender {
        fn new(doms: Vec<Result<&str, FetchError>>) -> Self {
            let mut doms: Vec<_> = doms.into_iter().map(|d| d.map(String::from)).collect();
            doms.reverse();
            ScriptedRender {
                doms: Mutex::new(doms),
                budgets: Mutex::new(vec![]),
            }
        }
    }

    #[async_trait::async_trait]
    impl Render for ScriptedRender {
        async fn render(
            &self,
            _url: &str,
            _interaction: &Interaction,
            budget: Duration,
        ) -> Result<String, FetchError> {
            self.budgets.lock().unwrap().push(budget);
            let mut doms = self.doms.lock().unwrap();
            if doms.len() > 1 {
                doms.pop().unwrap()
            } else {
                doms.last().cloned().unwrap()
            }
        }
    }

    /// Spends `budget` (or `hang` when set) before returning a page that
    /// never shows job containers.
    struct SlowRender {
        hang: Option<Duration>,
    }

    #[async_trait::async_trait]
    impl Render for SlowRender {
        async fn render(
            &self,
            _url: &str,
            _interaction: &Interaction,
            budget: Duration,
        ) -> Result<String, FetchError> {
            tokio::time::sleep(self.hang.unwrap_or(budget)).await;
            Ok(LOADING.to_string())
        }
    }

    const LOADING: &str = "<html><body><div id='app'>Loading...</div></body></html>";
    const LOADED: &str = "<html><body><div class='job'><h3>Engineer</h3></div></body></html>";

    fn fetcher(doms: Vec<Result<&str, FetchError>>) -> BrowserFetcher<ScriptedRender> {
        BrowserFetcher::new(ScriptedRender::new(doms)).with_poll_interval(Duration::from_millis(1))
    }

    #[tokio::test]
    async fn waits_until_containers_appear() {
        let f = fetcher(vec![Ok(LOADING), Ok(LOADING), Ok(LOADED)]);
        let mut c = company("Acme");
        c.wait = Duration::from_secs(60);

        let page = f.fetch(&c).await.unwrap();
        assert_eq!(page.html, LOADED);
        assert_eq!(page.method, FetchMethod::Browser);
        assert!(!page.degraded);

        let budgets = f.renderer.budgets.lock().unwrap().clone();
        assert_eq!(
            budgets,
            vec![
                Duration::from_secs(3),
                Duration::from_secs(6),
                Duration::from_secs(12)
            ]
        );
    }

    #[tokio::test]
    async fn budget_never_exceeds_remaining_wait() {
        let f = fetcher(vec![Ok(LOADING), Ok(LOADING), Ok(LOADED)]);
        let mut c = company("Acme");
        c.wait = Duration::from_secs(10);

        f.fetch(&c).await.unwrap();
        let budgets = f.renderer.budgets.lock().unwrap().clone();
        assert_eq!(budgets[..2], [Duration::from_secs(3), Duration::from_secs(6)]);
        assert!(budgets[2] <= Duration::from_secs(10));
        assert!(budgets[2] > Duration::from_secs(9));
    }

    #[tokio::test]
    async fn slow_renders_stay_within_wait() {
        let f = BrowserFetcher::new(SlowRender { hang: None })
            .with_initial_budget(Duration::from_millis(60))
            .with_poll_interval(Duration::from_millis(1));
        let mut c = company("Acme");
        c.wait = Duration::from_millis(100);

        let start = Instant::now();
        let page = f.fetch(&c).await.unwrap();
        assert!(start.elapsed() < Duration::from_millis(150));
        assert_eq!(page.html, LOADING);
        assert!(page.degraded);
    }

    #[tokio::test]
    async fn hung_render_is_cut_off_at_the_wait_bound() {
        let f = BrowserFetcher::new(SlowRender {
            hang: Some(Duration::from_secs(30)),
        });
        let mut c = company("Acme");
        c.wait = Duration::from_millis(50);

        let start = Instant::now();
        let res = f.fetch(&c).await;
        assert!(start.elapsed() < Duration::from_secs(1));
        assert!(matches!(res, Err(FetchError::Transient(m)) if m.starts_with("browser render exceeded")));
    }

    #[tokio::test]
    async fn timeout_returns_partial_page() {
        let f = fetcher(vec![Ok(LOADING)]);
        let mut c = company("Acme");
        c.wait = Duration::ZERO;

        let page = f.fetch(&c).await.unwrap();
        assert_eq!(page.html, LOADING);
        assert!(page.degraded);
    }

    #[tokio::test]
    async fn fatal_render_error_stops_waiting() {
        let f = fetcher(vec![Err(FetchError::Fatal("no such binary".to_string()))]);
        let mut c = company("Acme");
        c.wait = Duration::from_secs(10);

        assert!(matches!(f.fetch(&c).await, Err(FetchError::Fatal(_))));
        assert_eq!(f.renderer.budgets.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn nothing_rendered_is_transient() {
        let f = fetcher(vec![Err(FetchError::Transient("crashed".to_string()))]);
        let mut c = company("Acme");
        c.wait = Duration::ZERO;

        assert_eq!(
            f.fetch(&c).await,
            Err(FetchError::Transient("crashed".to_string()))
        );
    }

    #[tokio::test]
    async fn missing_binary_is_fatal() {
        let chromium = Chromium::new("/nonexistent/chromium-for-tests");
        assert!(!chromium.supports_interaction());
        let res = chromium
            .render(
                "https://example.com",
                &Interaction::default(),
                Duration::from_millis(10),
            )
            .await;
        assert!(matches!(res, Err(FetchError::Fatal(_))));
    }
}
