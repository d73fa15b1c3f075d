use crate::{
    config::CompanyConfig,
    error::ExtractError,
    posting::{JobPosting, UNKNOWN_LOCATION},
    utils::{self, collapse_whitespace},
};

use chrono::{DateTime, Utc};
use lazy_static::lazy_static;
use reqwest::Url;
use scraper::{ElementRef, Html, Selector};

const E: &str = "Invalid selector";
lazy_static! {
    static ref LINK: Selector = Selector::parse("a[href]").expect(E);
}

fn compile(field: &'static str, selector: &str) -> Result<Selector, ExtractError> {
    Selector::parse(selector).map_err(|_| ExtractError::Selector {
        field,
        selector: selector.to_string(),
    })
}

fn compile_optional(
    field: &'static str,
    selector: Option<&String>,
) -> Result<Option<Selector>, ExtractError> {
    selector.map(|s| compile(field, s)).transpose()
}

/// Compiled selector set of one company.
#[derive(Debug)]
pub struct Extractor {
    company: String,
    base: Url,
    container: Selector,
    title: Selector,
    location: Option<Selector>,
    url: Option<Selector>,
    department: Option<Selector>,
    job_type: Option<Selector>,
    posted_date: Option<Selector>,
}

impl Extractor {
    pub fn new(company: &CompanyConfig) -> Result<Self, ExtractError> {
        let s = &company.selectors;
        let base = Url::parse(&company.careers_url)
            .map_err(|_| ExtractError::BaseUrl(company.careers_url.clone()))?;

        Ok(Extractor {
            company: company.name.clone(),
            base,
            container: compile("job_container", &s.job_container)?,
            title: compile("title", &s.title)?,
            location: compile_optional("location", s.location.as_ref())?,
            url: compile_optional("url", s.url.as_ref())?,
            department: compile_optional("department", s.department.as_ref())?,
            job_type: compile_optional("job_type", s.job_type.as_ref())?,
            posted_date: compile_optional("posted_date", s.posted_date.as_ref())?,
        })
    }

    /// Pulls one posting out of every job container. Containers without a
    /// title are skipped; an empty result is not an error.
    pub fn extract(&self, html: &str) -> Vec<JobPosting> {
        let doc = Html::parse_document(html);
        let scraped_at = utils::get_now();

        doc.select(&self.container)
            .filter_map(|container| self.extract_one(container, scraped_at))
            .collect()
    }

    fn extract_one(&self, container: ElementRef, scraped_at: DateTime<Utc>) -> Option<JobPosting> {
        let title_el = container.select(&self.title).next()?;
        let title = text_of(title_el)?;

        let field = |selector: &Option<Selector>| {
            selector
                .as_ref()
                .and_then(|s| container.select(s).next())
                .and_then(text_of)
        };

        let href = match &self.url {
            Some(selector) => container.select(selector).next().and_then(href_of),
            None => href_of(title_el).or_else(|| href_of(container)),
        };

        Some(JobPosting {
            company: self.company.clone(),
            title,
            location: field(&self.location).unwrap_or_else(|| UNKNOWN_LOCATION.to_string()),
            url: href.and_then(|h| self.resolve(h)),
            department: field(&self.department),
            job_type: field(&self.job_type),
            posted_date: field(&self.posted_date),
            scraped_at,
            relevant: false,
        })
    }

    fn resolve(&self, href: &str) -> Option<String> {
        let href = href.trim();
        if href.is_empty() || href.starts_with('#') || href.starts_with("javascript:") {
            return None;
        }
        self.base.join(href).ok().map(String::from)
    }
}

fn text_of(el: ElementRef) -> Option<String> {
    let text = collapse_whitespace(&el.text().collect::<String>());
    if text.is_empty() {
        None
    } else {
        Some(text)
    }
}

/// `href` of the element itself, or of the first link inside it.
fn href_of(el: ElementRef) -> Option<&str> {
    el.value()
        .attr("href")
        .or_else(|| el.select(&LINK).next().and_then(|a| a.value().attr("href")))
}

/// One-shot extraction for a company's page.
pub fn extract(html: &str, company: &CompanyConfig) -> Result<Vec<JobPosting>, ExtractError> {
    Ok(Extractor::new(company)?.extract(html))
}
