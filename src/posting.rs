use crate::{config::FetchMethod, utils::collapse_whitespace};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

pub const UNKNOWN_LOCATION: &str = "Unknown";

fn unknown_location() -> String {
    UNKNOWN_LOCATION.to_string()
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobPosting {
    pub company: String,
    pub title: String,
    #[serde(default = "unknown_location")]
    pub location: String,
    #[serde(default)]
    pub url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub department: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub job_type: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub posted_date: Option<String>,
    pub scraped_at: DateTime<Utc>,
    /// Set by the classifier; extraction leaves it `false`.
    #[serde(default)]
    pub relevant: bool,
}

impl JobPosting {
    /// Key deciding whether two postings are the same job across runs.
    ///
    /// Case and whitespace differences in company, title or url do not change
    /// the key.
    pub fn identity_key(&self) -> String {
        let url = self.url.as_deref().unwrap_or_default();
        [self.company.as_str(), self.title.as_str(), url]
            .iter()
            .map(|part| collapse_whitespace(part).to_lowercase())
            .collect::<Vec<_>>()
            .join("|")
    }
}

impl fmt::Display for JobPosting {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        writeln!(f, "Title           : {}", self.title)?;
        writeln!(f, "Company         : {}", self.company)?;
        writeln!(f, "Location        : {}", self.location)?;
        if let Some(d) = self.department.as_ref() {
            writeln!(f, "Department      : {}", d)?;
        }
        if let Some(d) = self.posted_date.as_ref() {
            writeln!(f, "Posted          : {}", d)?;
        }
        writeln!(
            f,
            "URL             : {}",
            self.url.as_deref().unwrap_or("None")
        )
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CompanyStatus {
    Success,
    /// Fetched fine but no job container matched.
    Empty,
    Error,
}

impl fmt::Display for CompanyStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            CompanyStatus::Success => "success",
            CompanyStatus::Empty => "empty",
            CompanyStatus::Error => "error",
        };
        f.write_str(s)
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyStats {
    pub company: String,
    pub status: CompanyStatus,
    /// Candidates found on the page, before classification.
    pub extracted: usize,
    /// Relevant postings kept.
    pub jobs_found: usize,
    #[serde(default)]
    pub error: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub method: Option<FetchMethod>,
    #[serde(default)]
    pub degraded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ScrapeResult {
    pub scraped_at: DateTime<Utc>,
    pub postings: Vec<JobPosting>,
    pub companies: Vec<CompanyStats>,
}

impl ScrapeResult {
    pub fn successful_companies(&self) -> usize {
        self.companies
            .iter()
            .filter(|c| c.status != CompanyStatus::Error)
            .count()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    pub(crate) fn posting(company: &str, title: &str, url: Option<&str>) -> JobPosting {
        JobPosting {
            company: company.to_string(),
            title: title.to_string(),
            location: UNKNOWN_LOCATION.to_string(),
            url: url.map(ToString::to_string),
            department: None,
            job_type: None,
            posted_date: None,
            scraped_at: crate::utils::get_now(),
            relevant: true,
        }
    }

    #[test]
    fn identity_key_ignores_case_and_whitespace() {
        let a = posting("Acme", "Software Engineer,  New Grad", Some("https://acme.io/j/1"));
        let b = posting(
            "ACME ",
            " software engineer,\nnew grad",
            Some("https://ACME.io/j/1"),
        );
        assert_eq!(a.identity_key(), b.identity_key());
    }

    #[test]
    fn identity_key_distinguishes_urls() {
        let a = posting("Acme", "Software Engineer", Some("https://acme.io/j/1"));
        let b = posting("Acme", "Software Engineer", Some("https://acme.io/j/2"));
        let c = posting("Acme", "Software Engineer", None);
        assert_ne!(a.identity_key(), b.identity_key());
        assert_ne!(a.identity_key(), c.identity_key());
    }

    #[test]
    fn missing_location_deserializes_to_unknown() {
        let p: JobPosting = serde_json::from_str(
            r#"{"company":"Acme","title":"Developer","scraped_at":"2024-01-02T03:04:05Z"}"#,
        )
        .unwrap();
        assert_eq!(p.location, "Unknown");
        assert_eq!(p.url, None);
        assert!(!p.relevant);
    }
}
