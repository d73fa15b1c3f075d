use super::{
    browser::{headless_args, Render},
    http::classify,
};
use crate::{
    config::{InfiniteScroll, Interaction, LoadMore, SearchStep, StepAction},
    error::FetchError,
};

use reqwest::{Client, Method, RequestBuilder};
use serde_json::{json, Value};
use std::time::Duration;
use tokio::time::{sleep, Instant};
use tracing::{debug, info, warn};

/// W3C key of element references in command payloads.
const ELEMENT_KEY: &str = "element-6066-11e4-a52e-4f735466cecf";
const ENTER: char = '\u{E007}';
const ELEMENT_POLL: Duration = Duration::from_millis(250);

const PAGE_HEIGHT: &str = "return document.body.scrollHeight";
const SCROLL_TO_BOTTOM: &str = "window.scrollTo(0, document.body.scrollHeight);";
const SCROLL_INTO_VIEW: &str = "arguments[0].scrollIntoView();";

/// Tried in order when a page is searched without scripted steps.
const SEARCH_INPUTS: [&str; 7] = [
    "input[type='search']",
    "input[name*='search']",
    "input[placeholder*='search']",
    "input[id*='search']",
    ".search-input",
    "#search",
    ".job-search-input",
];

#[derive(Debug, thiserror::Error)]
enum CommandError {
    #[error("webdriver {error}: {message}")]
    Driver { error: String, message: String },

    #[error(transparent)]
    Fetch(#[from] FetchError),
}

impl CommandError {
    fn no_such_element(selector: &str) -> Self {
        CommandError::Driver {
            error: "no such element".to_string(),
            message: format!("nothing matches `{}`", selector),
        }
    }
}

impl From<CommandError> for FetchError {
    fn from(e: CommandError) -> Self {
        match e {
            CommandError::Fetch(e) => e,
            e => FetchError::Transient(e.to_string()),
        }
    }
}

fn element_ref(id: &str) -> Value {
    let mut map = serde_json::Map::new();
    map.insert(ELEMENT_KEY.to_string(), Value::from(id));
    Value::Object(map)
}

/// Sends a command and unwraps the `value` of its reply.
async fn send(request: RequestBuilder) -> Result<Value, CommandError> {
    let response = request.send().await.map_err(classify)?;
    let status = response.status();
    let mut body: Value = response.json().await.map_err(classify)?;
    let value = body.get_mut("value").map(Value::take).unwrap_or_default();
    if status.is_success() {
        Ok(value)
    } else {
        let field = |name: &str| value.get(name).and_then(Value::as_str).map(String::from);
        Err(CommandError::Driver {
            error: field("error").unwrap_or_else(|| format!("HTTP {}", status)),
            message: field("message").unwrap_or_default(),
        })
    }
}

/// Renders pages through a WebDriver server (chromedriver, Selenium Grid),
/// running the company's search steps and dynamic loading before the DOM is
/// read.
pub struct WebDriver {
    client: Client,
    endpoint: String,
    /// How long scripted steps wait for their element; load-more buttons get
    /// half of it.
    element_wait: Duration,
    /// Pause before a load-more click; search results get three times this.
    settle: Duration,
}

impl WebDriver {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self, FetchError> {
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| FetchError::Fatal(format!("Failed to build WebDriver client: {}", e)))?;
        Ok(Self::with_client(client, endpoint))
    }

    pub fn with_client(client: Client, endpoint: &str) -> Self {
        WebDriver {
            client,
            endpoint: endpoint.trim_end_matches('/').to_string(),
            element_wait: Duration::from_secs(10),
            settle: Duration::from_secs(1),
        }
    }

    pub fn with_element_wait(mut self, element_wait: Duration) -> Self {
        self.element_wait = element_wait;
        self
    }

    pub fn with_settle(mut self, settle: Duration) -> Self {
        self.settle = settle;
        self
    }

    async fn start(&self) -> Result<Session, CommandError> {
        let capabilities = json!({
            "capabilities": {
                "alwaysMatch": {
                    "browserName": "chrome",
                    "goog:chromeOptions": { "args": headless_args() },
                }
            }
        });
        let value = send(
            self.client
                .post(format!("{}/session", self.endpoint))
                .json(&capabilities),
        )
        .await?;
        let id = value
            .get("sessionId")
            .and_then(Value::as_str)
            .ok_or_else(|| FetchError::Fatal("WebDriver returned no session id".to_string()))?;
        debug!("Started WebDriver session {}", id);

        Ok(Session {
            client: self.client.clone(),
            base: format!("{}/session/{}", self.endpoint, id),
            element_wait: self.element_wait,
            settle: self.settle,
            closed: false,
        })
    }
}

#[async_trait::async_trait]
impl Render for WebDriver {
    async fn render(
        &self,
        url: &str,
        interaction: &Interaction,
        budget: Duration,
    ) -> Result<String, FetchError> {
        let session = self.start().await?;
        let html = session.load(url, interaction, budget).await;
        session.close().await;
        Ok(html?)
    }

    fn supports_interaction(&self) -> bool {
        true
    }
}

/// One browser session. Deleted on `close`, or in the background when the
/// render is dropped half-way.
struct Session {
    client: Client,
    base: String,
    element_wait: Duration,
    settle: Duration,
    closed: bool,
}

impl Session {
    async fn call(&self, method: Method, path: &str, body: Value) -> Result<Value, CommandError> {
        let request = self.client.request(method, format!("{}/{}", self.base, path));
        send(request.json(&body)).await
    }

    async fn load(
        &self,
        url: &str,
        interaction: &Interaction,
        budget: Duration,
    ) -> Result<String, CommandError> {
        self.call(Method::POST, "url", json!({ "url": url })).await?;
        self.interact(interaction).await;
        sleep(budget).await;

        let request = self.client.get(format!("{}/source", self.base));
        match send(request).await? {
            Value::String(html) => Ok(html),
            other => Err(FetchError::Transient(format!("page source was {}", other)).into()),
        }
    }

    /// Step and loading failures only cost the rest of that stage; the page
    /// is read either way.
    async fn interact(&self, interaction: &Interaction) {
        if !interaction.steps.is_empty() {
            for (i, step) in interaction.steps.iter().enumerate() {
                if let Err(e) = self.step(step).await {
                    warn!(
                        "Search step {} ({:?}) failed, skipping the rest: {}",
                        i + 1,
                        step.action,
                        e
                    );
                    break;
                }
            }
        } else if let Some(term) = &interaction.search_term {
            if let Err(e) = self.search(term).await {
                warn!("Search for `{}` failed: {}", term, e);
            }
        }

        if let Some(scroll) = interaction.infinite_scroll {
            match self.scroll(scroll).await {
                Ok(scrolls) => debug!("Scrolled {} times", scrolls),
                Err(e) => warn!("Infinite scroll failed: {}", e),
            }
        }
        if let Some(load_more) = &interaction.load_more {
            match self.load_more(load_more).await {
                Ok(clicks) => debug!("Clicked `{}` {} times", load_more.button, clicks),
                Err(e) => warn!("Load more failed: {}", e),
            }
        }
    }

    async fn step(&self, step: &SearchStep) -> Result<(), CommandError> {
        match &step.action {
            StepAction::Click { selector } => {
                let element = self.require(selector).await?;
                self.click(&element).await?;
            }
            StepAction::Type { selector, text } => {
                let element = self.require(selector).await?;
                self.clear(&element).await?;
                self.send_keys(&element, text).await?;
            }
            StepAction::Select { selector, option } => {
                let element = self.require(selector).await?;
                self.click(&element).await?;
                if let Some(option) = option {
                    let option = self.require(option).await?;
                    self.click(&option).await?;
                }
            }
            StepAction::Wait => {}
            StepAction::Scroll => {
                self.execute(SCROLL_TO_BOTTOM, vec![]).await?;
            }
        }
        sleep(step.wait).await;
        Ok(())
    }

    async fn search(&self, term: &str) -> Result<(), CommandError> {
        for selector in SEARCH_INPUTS {
            if let Some(input) = self.find(selector).await? {
                debug!("Searching `{}` in {}", term, selector);
                self.clear(&input).await?;
                self.send_keys(&input, &format!("{}{}", term, ENTER)).await?;
                sleep(self.settle * 3).await;
                return Ok(());
            }
        }
        warn!("No search box found for `{}`", term);
        Ok(())
    }

    async fn scroll(&self, scroll: InfiniteScroll) -> Result<u32, CommandError> {
        let mut last = self.execute(PAGE_HEIGHT, vec![]).await?;
        for i in 1..=scroll.max_scrolls {
            self.execute(SCROLL_TO_BOTTOM, vec![]).await?;
            sleep(scroll.pause).await;
            let height = self.execute(PAGE_HEIGHT, vec![]).await?;
            if height == last {
                info!("No more content after {} scrolls", i);
                return Ok(i);
            }
            last = height;
        }
        Ok(scroll.max_scrolls)
    }

    async fn load_more(&self, load_more: &LoadMore) -> Result<u32, CommandError> {
        for clicks in 0..load_more.max_clicks {
            let Some(button) = self
                .wait_for(&load_more.button, self.element_wait / 2)
                .await?
            else {
                info!(
                    "No more `{}` button after {} clicks",
                    load_more.button, clicks
                );
                return Ok(clicks);
            };
            self.execute(SCROLL_INTO_VIEW, vec![element_ref(&button)])
                .await?;
            sleep(self.settle).await;
            self.click(&button).await?;
            sleep(load_more.pause).await;
        }
        Ok(load_more.max_clicks)
    }

    async fn execute(&self, script: &str, args: Vec<Value>) -> Result<Value, CommandError> {
        self.call(
            Method::POST,
            "execute/sync",
            json!({ "script": script, "args": args }),
        )
        .await
    }

    /// `None` when nothing matches right now.
    async fn find(&self, selector: &str) -> Result<Option<String>, CommandError> {
        let found = self
            .call(
                Method::POST,
                "element",
                json!({ "using": "css selector", "value": selector }),
            )
            .await;
        match found {
            Ok(value) => value
                .get(ELEMENT_KEY)
                .and_then(Value::as_str)
                .map(|id| Some(id.to_string()))
                .ok_or_else(|| CommandError::Driver {
                    error: "invalid reply".to_string(),
                    message: format!("no element reference in {}", value),
                }),
            Err(CommandError::Driver { error, .. }) if error == "no such element" => Ok(None),
            Err(e) => Err(e),
        }
    }

    async fn wait_for(
        &self,
        selector: &str,
        limit: Duration,
    ) -> Result<Option<String>, CommandError> {
        let deadline = Instant::now() + limit;
        loop {
            if let Some(element) = self.find(selector).await? {
                return Ok(Some(element));
            }
            if Instant::now() >= deadline {
                return Ok(None);
            }
            sleep(ELEMENT_POLL).await;
        }
    }

    async fn require(&self, selector: &str) -> Result<String, CommandError> {
        self.wait_for(selector, self.element_wait)
            .await?
            .ok_or_else(|| CommandError::no_such_element(selector))
    }

    async fn click(&self, element: &str) -> Result<(), CommandError> {
        let path = format!("element/{}/click", element);
        self.call(Method::POST, &path, json!({})).await?;
        Ok(())
    }

    async fn clear(&self, element: &str) -> Result<(), CommandError> {
        let path = format!("element/{}/clear", element);
        self.call(Method::POST, &path, json!({})).await?;
        Ok(())
    }

    async fn send_keys(&self, element: &str, text: &str) -> Result<(), CommandError> {
        let path = format!("element/{}/value", element);
        self.call(Method::POST, &path, json!({ "text": text }))
            .await?;
        Ok(())
    }

    async fn close(mut self) {
        self.closed = true;
        if let Err(e) = send(self.client.delete(&self.base)).await {
            warn!("Failed to close WebDriver session {}: {}", self.base, e);
        }
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if self.closed {
            return;
        }
        if let Ok(handle) = tokio::runtime::Handle::try_current() {
            let request = self.client.delete(&self.base);
            handle.spawn(async move {
                let _ = request.send().await;
            });
        }
    }
}
