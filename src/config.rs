use crate::error::ConfigError;

use reqwest::Url;
use scraper::Selector;
use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, path::Path, time::Duration};
use tracing::{info, warn};

const DEFAULT_WAIT_SECS: u64 = 20;
const DEFAULT_STEP_WAIT_SECS: f64 = 2.0;
const DEFAULT_SEARCH_TERM: &str = "new grad software engineer";

/// Query keys treated as free-text job searches.
pub const SEARCH_KEYS: [&str; 4] = ["q", "query", "search", "keywords"];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FetchMethod {
    /// Plain HTTP GET of the page.
    #[default]
    #[serde(alias = "requests")]
    Static,
    /// Headless browser render, for pages that build listings in script.
    #[serde(alias = "selenium")]
    Browser,
}

impl std::fmt::Display for FetchMethod {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            FetchMethod::Static => f.write_str("static"),
            FetchMethod::Browser => f.write_str("browser"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SelectorSet {
    pub job_container: String,
    pub title: String,
    pub location: Option<String>,
    pub url: Option<String>,
    pub department: Option<String>,
    pub job_type: Option<String>,
    pub posted_date: Option<String>,
}

impl SelectorSet {
    /// Optional selectors with their field names, skipping unset ones.
    pub fn optional(&self) -> impl Iterator<Item = (&'static str, &str)> {
        [
            ("location", &self.location),
            ("url", &self.url),
            ("department", &self.department),
            ("job_type", &self.job_type),
            ("posted_date", &self.posted_date),
        ]
        .into_iter()
        .filter_map(|(field, s)| s.as_deref().map(|s| (field, s)))
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    Click { selector: String },
    Type { selector: String, text: String },
    /// Opens the control, then clicks `option` when one is given.
    Select {
        selector: String,
        option: Option<String>,
    },
    Wait,
    Scroll,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SearchStep {
    pub action: StepAction,
    /// Pause after the action.
    pub wait: Duration,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct InfiniteScroll {
    pub max_scrolls: u32,
    pub pause: Duration,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LoadMore {
    pub button: String,
    pub max_clicks: u32,
    pub pause: Duration,
}

/// Browser work done between page load and reading the DOM.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Interaction {
    pub steps: Vec<SearchStep>,
    /// Typed into the page's own search box when there are no steps.
    pub search_term: Option<String>,
    pub infinite_scroll: Option<InfiniteScroll>,
    pub load_more: Option<LoadMore>,
}

impl Interaction {
    pub fn is_empty(&self) -> bool {
        self == &Interaction::default()
    }

    /// Sum of the configured pauses at their maximum repeat counts.
    pub fn pauses(&self) -> Duration {
        let steps: Duration = self.steps.iter().map(|s| s.wait).sum();
        let scroll = self
            .infinite_scroll
            .map(|s| s.pause * s.max_scrolls)
            .unwrap_or_default();
        let load_more = self
            .load_more
            .as_ref()
            .map(|l| l.pause * l.max_clicks)
            .unwrap_or_default();
        steps + scroll + load_more
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyConfig {
    pub name: String,
    pub enabled: bool,
    pub careers_url: String,
    pub search_params: BTreeMap<String, String>,
    pub selectors: SelectorSet,
    pub method: FetchMethod,
    /// Upper bound on the browser wait, interaction included.
    pub wait: Duration,
    pub interaction: Interaction,
}

/// Config record as written in the file, before validation.
#[derive(Debug, Default, Deserialize)]
struct RawCompany {
    #[serde(default = "enabled_by_default")]
    enabled: bool,
    careers_url: Option<String>,
    #[serde(default)]
    search_params: BTreeMap<String, String>,
    #[serde(default)]
    selectors: RawSelectors,
    #[serde(default, alias = "scraping_method")]
    method: FetchMethod,
    wait_secs: Option<u64>,
    #[serde(default, alias = "selenium_config")]
    interaction: RawInteraction,
}

fn enabled_by_default() -> bool {
    true
}

#[derive(Debug, Default, Deserialize)]
struct RawSelectors {
    job_container: Option<String>,
    title: Option<String>,
    location: Option<String>,
    url: Option<String>,
    department: Option<String>,
    job_type: Option<String>,
    posted_date: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct RawInteraction {
    #[serde(default)]
    search_steps: Vec<RawStep>,
    #[serde(default)]
    dynamic_loading: RawDynamicLoading,
}

#[derive(Debug, Deserialize)]
struct RawStep {
    action: String,
    selector: Option<String>,
    #[serde(default)]
    value: String,
    option_selector: Option<String>,
    wait: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct RawDynamicLoading {
    #[serde(default)]
    infinite_scroll: bool,
    max_scrolls: Option<u32>,
    scroll_pause: Option<f64>,
    #[serde(default)]
    load_more_button: bool,
    button_selector: Option<String>,
    max_clicks: Option<u32>,
    click_pause: Option<f64>,
}

/// Companies that passed validation, plus the ones that did not.
#[derive(Debug, Default)]
pub struct LoadedConfig {
    pub companies: Vec<CompanyConfig>,
    pub rejected: Vec<(String, ConfigError)>,
}

impl LoadedConfig {
    pub fn enabled(&self) -> impl Iterator<Item = &CompanyConfig> {
        self.companies.iter().filter(|c| c.enabled)
    }

    pub fn get(&self, name: &str) -> Option<&CompanyConfig> {
        self.companies
            .iter()
            .find(|c| c.name.eq_ignore_ascii_case(name))
    }
}

pub async fn load_config<P: AsRef<Path>>(path: P) -> Result<LoadedConfig, ConfigError> {
    let path = path.as_ref();
    let raw = tokio::fs::read_to_string(path).await?;
    let loaded = parse_config(&raw)?;
    info!(
        "Loaded {} companies from {} ({} rejected)",
        loaded.companies.len(),
        path.display(),
        loaded.rejected.len()
    );
    Ok(loaded)
}

/// Parses the JSON company map. A bad record only excludes that company; the
/// whole load fails when the document itself is unreadable or nothing
/// survives validation.
pub fn parse_config(raw: &str) -> Result<LoadedConfig, ConfigError> {
    let document: serde_json::Map<String, serde_json::Value> = serde_json::from_str(raw)?;

    let mut loaded = LoadedConfig::default();
    for (name, value) in document {
        let validated = serde_json::from_value::<RawCompany>(value)
            .map_err(|e| ConfigError::Malformed {
                company: name.clone(),
                reason: e.to_string(),
            })
            .and_then(|raw| validate(&name, raw));

        match validated {
            Ok(company) => loaded.companies.push(company),
            Err(e) => {
                warn!("Excluding company: {}", e);
                loaded.rejected.push((name, e));
            }
        }
    }

    if loaded.companies.is_empty() {
        return Err(ConfigError::NoCompanies);
    }
    Ok(loaded)
}

fn validate(name: &str, raw: RawCompany) -> Result<CompanyConfig, ConfigError> {
    let missing = |field| ConfigError::MissingField {
        company: name.to_string(),
        field,
    };
    let required = |value: Option<String>, field| {
        value
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| missing(field))
    };

    let careers_url = required(raw.careers_url, "careers_url")?;
    match Url::parse(&careers_url) {
        Ok(url) if matches!(url.scheme(), "http" | "https") => {}
        _ => {
            return Err(ConfigError::InvalidUrl {
                company: name.to_string(),
                url: careers_url,
            })
        }
    }

    let s = raw.selectors;
    let non_empty = |v: Option<String>| v.map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
    let selectors = SelectorSet {
        job_container: required(s.job_container, "selectors.job_container")?,
        title: required(s.title, "selectors.title")?,
        location: non_empty(s.location),
        url: non_empty(s.url),
        department: non_empty(s.department),
        job_type: non_empty(s.job_type),
        posted_date: non_empty(s.posted_date),
    };

    let all = [
        ("job_container", selectors.job_container.as_str()),
        ("title", selectors.title.as_str()),
    ]
    .into_iter()
    .chain(selectors.optional());
    for (field, selector) in all {
        if Selector::parse(selector).is_err() {
            return Err(ConfigError::InvalidSelector {
                company: name.to_string(),
                field,
                selector: selector.to_string(),
            });
        }
    }

    let interaction = validate_interaction(name, raw.interaction, raw.method, &raw.search_params)?;
    let wait = match raw.wait_secs {
        Some(secs) => Duration::from_secs(secs),
        None => Duration::from_secs(DEFAULT_WAIT_SECS) + interaction.pauses(),
    };

    Ok(CompanyConfig {
        name: name.to_string(),
        enabled: raw.enabled,
        careers_url,
        search_params: raw.search_params,
        selectors,
        method: raw.method,
        wait,
        interaction,
    })
}

fn validate_interaction(
    name: &str,
    raw: RawInteraction,
    method: FetchMethod,
    search_params: &BTreeMap<String, String>,
) -> Result<Interaction, ConfigError> {
    let malformed = |reason: String| ConfigError::Malformed {
        company: name.to_string(),
        reason,
    };
    let seconds = |field: &str, secs: Option<f64>, default: f64| {
        Duration::try_from_secs_f64(secs.unwrap_or(default))
            .map_err(|_| malformed(format!("`{}` must be a non-negative number of seconds", field)))
    };
    let selector = |field: &'static str, s: Option<String>| -> Result<String, ConfigError> {
        let s = s
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .ok_or_else(|| ConfigError::MissingField {
                company: name.to_string(),
                field,
            })?;
        if Selector::parse(&s).is_err() {
            return Err(ConfigError::InvalidSelector {
                company: name.to_string(),
                field,
                selector: s,
            });
        }
        Ok(s)
    };

    let mut steps = vec![];
    for step in raw.search_steps {
        let wait = seconds("search_steps.wait", step.wait, DEFAULT_STEP_WAIT_SECS)?;
        let action = match step.action.as_str() {
            "click" => StepAction::Click {
                selector: selector("search_steps.selector", step.selector)?,
            },
            "type" => StepAction::Type {
                selector: selector("search_steps.selector", step.selector)?,
                text: step.value,
            },
            "select" => StepAction::Select {
                selector: selector("search_steps.selector", step.selector)?,
                option: step
                    .option_selector
                    .map(|s| selector("search_steps.option_selector", Some(s)))
                    .transpose()?,
            },
            "wait" => StepAction::Wait,
            "scroll" => StepAction::Scroll,
            other => return Err(malformed(format!("unknown search step action `{}`", other))),
        };
        steps.push(SearchStep { action, wait });
    }

    let dynamic = raw.dynamic_loading;
    let infinite_scroll = if dynamic.infinite_scroll {
        Some(InfiniteScroll {
            max_scrolls: dynamic.max_scrolls.unwrap_or(5),
            pause: seconds("dynamic_loading.scroll_pause", dynamic.scroll_pause, 2.0)?,
        })
    } else {
        None
    };
    let load_more = if dynamic.load_more_button {
        Some(LoadMore {
            button: selector(
                "dynamic_loading.button_selector",
                Some(dynamic.button_selector.unwrap_or_else(|| ".load-more".to_string())),
            )?,
            max_clicks: dynamic.max_clicks.unwrap_or(10),
            pause: seconds("dynamic_loading.click_pause", dynamic.click_pause, 2.0)?,
        })
    } else {
        None
    };

    let scripted = !steps.is_empty() || infinite_scroll.is_some() || load_more.is_some();
    if scripted && method == FetchMethod::Static {
        warn!(
            "{}: selenium_config only runs if the page falls back to a browser",
            name
        );
    }

    let search_term = if steps.is_empty() && method == FetchMethod::Browser && !search_params.is_empty() {
        Some(
            SEARCH_KEYS
                .iter()
                .find_map(|key| search_params.get(*key))
                .cloned()
                .unwrap_or_else(|| DEFAULT_SEARCH_TERM.to_string()),
        )
    } else {
        None
    };

    Ok(Interaction {
        steps,
        search_term,
        infinite_scroll,
        load_more,
    })
}
