use itertools::Itertools;
use serde::{Deserialize, Serialize};
use std::{
    collections::HashSet,
    panic::{catch_unwind, AssertUnwindSafe},
    time::Instant,
};
use tracing::{error, info, warn};

pub mod classifier;
pub mod config;
pub mod error;
pub mod extractor;
pub mod fetcher;
pub mod finder;
pub mod posting;
pub mod report;
pub mod snapshot;

mod data;
mod utils;

pub use classifier::Classifier;
pub use config::{load_config, CompanyConfig, LoadedConfig};
pub use data::Table;
pub use error::{ConfigError, ExtractError, FetchError, ScraperError};
pub use posting::{CompanyStats, CompanyStatus, JobPosting, ScrapeResult};
pub use snapshot::{Snapshot, SnapshotStore};

use fetcher::{Pacing, PageFetcher};

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CompanyFailure {
    pub company: String,
    pub error: String,
}

/// Everything one run produced. The caller decides what to persist.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RunOutcome {
    pub result: ScrapeResult,
    pub new_jobs: Vec<JobPosting>,
    pub removed_jobs: Vec<JobPosting>,
    /// Companies rejected at config load, then the ones that failed to scrape.
    pub errors: Vec<CompanyFailure>,
}

impl RunOutcome {
    /// Whether the result is good enough to become the next baseline.
    pub fn should_replace_snapshot(&self) -> bool {
        self.result.successful_companies() > 0
    }

    /// The baseline to store after this run: its relevant postings, plus the
    /// previous postings of every company that errored or was rejected, so a
    /// company that is down for one run does not come back as all new.
    pub fn next_snapshot(&self, previous: Option<&Snapshot>) -> Snapshot {
        let failed = failed_companies(&self.errors);
        let carried = previous
            .into_iter()
            .flat_map(|s| s.postings.iter())
            .filter(|p| failed.contains(p.company.as_str()));
        Snapshot {
            taken_at: self.result.scraped_at,
            postings: self
                .result
                .postings
                .iter()
                .chain(carried)
                .cloned()
                .unique_by(JobPosting::identity_key)
                .collect(),
        }
    }
}

fn failed_companies(errors: &[CompanyFailure]) -> HashSet<&str> {
    errors.iter().map(|e| e.company.as_str()).collect()
}

/// Outcome for a single company. `postings` holds every candidate, tagged
/// with the classifier's verdict.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompanyScrape {
    pub stats: CompanyStats,
    pub postings: Vec<JobPosting>,
}

impl CompanyScrape {
    pub fn relevant(&self) -> impl Iterator<Item = &JobPosting> {
        self.postings.iter().filter(|p| p.relevant)
    }
}

pub struct Pipeline<F> {
    fetcher: F,
    classifier: Classifier,
    pacing: Pacing,
}

impl<F: PageFetcher> Pipeline<F> {
    pub fn new(fetcher: F, classifier: Classifier, pacing: Pacing) -> Self {
        Pipeline {
            fetcher,
            classifier,
            pacing,
        }
    }

    pub async fn scrape_company(&self, company: &CompanyConfig) -> CompanyScrape {
        let start = Instant::now();
        info!("Scraping {}", company.name);

        let mut stats = CompanyStats {
            company: company.name.clone(),
            status: CompanyStatus::Error,
            extracted: 0,
            jobs_found: 0,
            error: None,
            duration_ms: 0,
            method: None,
            degraded: false,
        };

        let postings = match self.fetcher.fetch(company).await {
            Err(e) => {
                warn!("Failed to fetch {}: {}", company.name, e);
                stats.error = Some(e.to_string());
                vec![]
            }
            Ok(page) => {
                stats.method = Some(page.method);
                stats.degraded = page.degraded;
                match guarded(|| extractor::extract(&page.html, company)) {
                    Err(e) => {
                        warn!("Failed to extract {}: {}", company.name, e);
                        stats.error = Some(e.to_string());
                        vec![]
                    }
                    Ok(mut postings) => {
                        for p in &mut postings {
                            p.relevant = self.classifier.is_relevant(&p.title);
                        }
                        stats.extracted = postings.len();
                        stats.jobs_found = postings.iter().filter(|p| p.relevant).count();
                        if postings.is_empty() {
                            warn!(
                                "No postings matched `{}` on {}",
                                company.selectors.job_container, company.name
                            );
                            stats.status = CompanyStatus::Empty;
                        } else {
                            info!(
                                "{}: {} relevant of {} postings",
                                company.name, stats.jobs_found, stats.extracted
                            );
                            stats.status = CompanyStatus::Success;
                        }
                        postings
                    }
                }
            }
        };

        stats.duration_ms = start.elapsed().as_millis() as u64;
        CompanyScrape { stats, postings }
    }

    /// Scrapes every enabled company in config order and diffs the relevant
    /// postings against `previous`.
    pub async fn run(&self, config: &LoadedConfig, previous: Option<&Snapshot>) -> RunOutcome {
        let scraped_at = utils::get_now();
        let mut errors: Vec<CompanyFailure> = config
            .rejected
            .iter()
            .map(|(company, e)| CompanyFailure {
                company: company.clone(),
                error: e.to_string(),
            })
            .collect();

        for company in config.companies.iter().filter(|c| !c.enabled) {
            info!("Skipping disabled company {}", company.name);
        }

        let mut postings = vec![];
        let mut companies = vec![];
        for (i, company) in config.enabled().enumerate() {
            if i > 0 {
                fetcher::pause(self.pacing.company_delay).await;
            }
            let scrape = self.scrape_company(company).await;
            if let Some(e) = &scrape.stats.error {
                errors.push(CompanyFailure {
                    company: company.name.clone(),
                    error: e.clone(),
                });
            }
            postings.extend(scrape.postings.into_iter().filter(|p| p.relevant));
            companies.push(scrape.stats);
        }

        let result = ScrapeResult {
            scraped_at,
            postings: postings
                .into_iter()
                .unique_by(JobPosting::identity_key)
                .collect(),
            companies,
        };
        let new_jobs = snapshot::diff(&result.postings, previous);
        let failed = failed_companies(&errors);
        let removed_jobs: Vec<JobPosting> = snapshot::removed(&result.postings, previous)
            .into_iter()
            .filter(|p| !failed.contains(p.company.as_str()))
            .collect();

        info!(
            "Run done: {} relevant postings, {} new, {} removed, {} errors",
            result.postings.len(),
            new_jobs.len(),
            removed_jobs.len(),
            errors.len()
        );

        RunOutcome {
            result,
            new_jobs,
            removed_jobs,
            errors,
        }
    }
}

/// Runs a parsing step, turning a panic into an `ExtractError`.
fn guarded<T, F>(f: F) -> Result<T, ExtractError>
where
    F: FnOnce() -> Result<T, ExtractError>,
{
    match catch_unwind(AssertUnwindSafe(f)) {
        Ok(res) => res,
        Err(payload) => {
            let msg = if let Some(s) = payload.downcast_ref::<&str>() {
                s.to_string()
            } else if let Some(s) = payload.downcast_ref::<String>() {
                s.clone()
            } else {
                "unknown panic".to_string()
            };
            error!("Parser panicked: {}", msg);
            Err(ExtractError::Panicked(msg))
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        config::parse_config,
        fetcher::tests::{page, ScriptedFetcher},
        posting::tests::posting,
    };
    use pretty_assertions::assert_eq;

    const CONFIG: &str = r#"{
        "Acme": {
            "careers_url": "https://acme.example.com/careers",
            "selectors": {"job_container": "div.job", "title": "h3", "location": ".location", "url": "a"}
        },
        "Hooli": {
            "selectors": {"job_container": "div.job", "title": "h3"}
        },
        "Globex": {
            "enabled": false,
            "careers_url": "https://globex.example.com/jobs",
            "selectors": {"job_container": "li", "title": "h2"}
        },
        "Initech": {
            "careers_url": "https://initech.example.com/jobs",
            "selectors": {"job_container": "div.job", "title": "h3"}
        }
    }"#;

    const ACME: &str = r#"<html><body>
        <div class="job"><h3>Software Engineer - New Grad</h3><span class="location">NYC</span><a href="/j/1">Apply</a></div>
        <div class="job"><h3>Senior Software Engineer</h3><a href="/j/2">Apply</a></div>
        <div class="job"><h3>Backend Developer - Junior</h3><a href="/j/3">Apply</a></div>
        <div class="job"><h3>Software Engineer - New Grad</h3><span class="location">NYC</span><a href="/j/1">Apply</a></div>
    </body></html>"#;

    fn pipeline(fetcher: ScriptedFetcher) -> Pipeline<ScriptedFetcher> {
        Pipeline::new(fetcher, Classifier::default(), Pacing::none())
    }

    #[tokio::test]
    async fn run_collects_relevant_postings_and_errors() {
        let config = parse_config(CONFIG).unwrap();
        let fetcher = ScriptedFetcher::new(vec![
            Ok(page(ACME)),
            Err(FetchError::Fatal("HTTP 404".to_string())),
        ]);
        let p = pipeline(fetcher);

        let outcome = p.run(&config, None).await;
        assert_eq!(p.fetcher.calls(), 2);

        let titles: Vec<_> = outcome
            .result
            .postings
            .iter()
            .map(|j| (j.title.as_str(), j.url.as_deref()))
            .collect();
        assert_eq!(
            titles,
            vec![
                (
                    "Software Engineer - New Grad",
                    Some("https://acme.example.com/j/1")
                ),
                (
                    "Backend Developer - Junior",
                    Some("https://acme.example.com/j/3")
                ),
            ]
        );
        assert_eq!(outcome.new_jobs, outcome.result.postings);
        assert!(outcome.removed_jobs.is_empty());

        let statuses: Vec<_> = outcome
            .result
            .companies
            .iter()
            .map(|c| (c.company.as_str(), c.status, c.extracted, c.jobs_found))
            .collect();
        assert_eq!(
            statuses,
            vec![
                ("Acme", CompanyStatus::Success, 4, 3),
                ("Initech", CompanyStatus::Error, 0, 0),
            ]
        );

        let failed: Vec<_> = outcome.errors.iter().map(|e| e.company.as_str()).collect();
        assert_eq!(failed, vec!["Hooli", "Initech"]);
        assert!(outcome.should_replace_snapshot());
    }

    #[tokio::test]
    async fn run_reports_only_unseen_postings() {
        let config = parse_config(CONFIG).unwrap();
        let p = pipeline(ScriptedFetcher::new(vec![
            Ok(page(ACME)),
            Ok(page("<html><body><p>No openings</p></body></html>")),
        ]));

        let mut seen = posting(
            "Acme",
            "Software Engineer - New Grad",
            Some("https://acme.example.com/j/1"),
        );
        seen.location = "NYC".to_string();
        let previous = Snapshot {
            taken_at: utils::get_now(),
            postings: vec![seen, posting("Acme", "Associate Engineer", None)],
        };

        let outcome = p.run(&config, Some(&previous)).await;
        let new: Vec<_> = outcome.new_jobs.iter().map(|j| j.title.as_str()).collect();
        assert_eq!(new, vec!["Backend Developer - Junior"]);
        let removed: Vec<_> = outcome
            .removed_jobs
            .iter()
            .map(|j| j.title.as_str())
            .collect();
        assert_eq!(removed, vec!["Associate Engineer"]);
        assert_eq!(outcome.result.companies[1].status, CompanyStatus::Empty);
    }

    #[tokio::test]
    async fn failed_company_keeps_its_postings_in_the_baseline() {
        let config = parse_config(CONFIG).unwrap();
        let p = pipeline(ScriptedFetcher::new(vec![
            Ok(page(ACME)),
            Err(FetchError::Transient("timed out".to_string())),
        ]));

        let previous = Snapshot {
            taken_at: utils::get_now(),
            postings: vec![
                posting("Initech", "Associate Engineer", None),
                posting("Hooli", "Junior Developer", None),
                posting("Acme", "Graduate Engineer", Some("https://acme.example.com/j/0")),
            ],
        };

        let outcome = p.run(&config, Some(&previous)).await;
        let removed: Vec<_> = outcome
            .removed_jobs
            .iter()
            .map(|j| (j.company.as_str(), j.title.as_str()))
            .collect();
        assert_eq!(removed, vec![("Acme", "Graduate Engineer")]);

        let next = outcome.next_snapshot(Some(&previous));
        assert_eq!(next.taken_at, outcome.result.scraped_at);
        let stored: Vec<_> = next
            .postings
            .iter()
            .map(|j| (j.company.as_str(), j.title.as_str()))
            .collect();
        assert_eq!(
            stored,
            vec![
                ("Acme", "Software Engineer - New Grad"),
                ("Acme", "Backend Developer - Junior"),
                ("Initech", "Associate Engineer"),
                ("Hooli", "Junior Developer"),
            ]
        );

        let recovered = pipeline(ScriptedFetcher::new(vec![
            Ok(page(ACME)),
            Ok(page(
                r#"<html><body><div class="job"><h3>Associate Engineer</h3></div></body></html>"#,
            )),
        ]));
        let again = recovered.run(&config, Some(&next)).await;
        assert!(again.new_jobs.is_empty());
        assert!(again.removed_jobs.is_empty());
    }

    #[tokio::test]
    async fn all_failures_keep_previous_baseline() {
        let config = parse_config(CONFIG).unwrap();
        let p = pipeline(ScriptedFetcher::new(vec![Err(FetchError::Transient(
            "timed out".to_string(),
        ))]));

        let outcome = p.run(&config, None).await;
        assert!(outcome.result.postings.is_empty());
        assert!(!outcome.should_replace_snapshot());
    }

    #[tokio::test]
    async fn scrape_company_tags_every_candidate() {
        let config = parse_config(CONFIG).unwrap();
        let p = pipeline(ScriptedFetcher::new(vec![Ok(page(ACME))]));

        let scrape = p.scrape_company(config.get("acme").unwrap()).await;
        assert_eq!(scrape.postings.len(), 4);
        assert_eq!(scrape.relevant().count(), 3);
        assert_eq!(scrape.stats.method, Some(config::FetchMethod::Static));
        assert!(!scrape.postings[1].relevant);
    }

    #[test]
    fn panics_become_extract_errors() {
        let res: Result<(), _> = guarded(|| panic!("bad markup"));
        assert!(matches!(res, Err(ExtractError::Panicked(m)) if m == "bad markup"));
        assert_eq!(guarded(|| Ok(1)).unwrap(), 1);
    }
}
