use crate::{
    error::ScraperError,
    posting::{CompanyStatus, JobPosting, ScrapeResult},
    RunOutcome,
};

use std::{fmt, path::PathBuf};
use tokio::fs;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Delivery {
    Sent,
    /// Nothing worth sending.
    Skipped,
}

/// Receives the new postings of a run.
#[async_trait::async_trait]
pub trait Notifier: Send + Sync {
    async fn notify(&self, new_jobs: &[JobPosting]) -> Result<Delivery, ScraperError>;
}

/// Turns a run result into an artifact on disk.
#[async_trait::async_trait]
pub trait ReportRenderer: Send + Sync {
    async fn render(&self, result: &ScrapeResult) -> Result<PathBuf, ScraperError>;
}

/// Writes `job_results_<timestamp>.json` into `dir`.
pub struct JsonReport {
    dir: PathBuf,
}

impl JsonReport {
    pub fn new<P: Into<PathBuf>>(dir: P) -> Self {
        JsonReport { dir: dir.into() }
    }
}

#[async_trait::async_trait]
impl ReportRenderer for JsonReport {
    async fn render(&self, result: &ScrapeResult) -> Result<PathBuf, ScraperError> {
        fs::create_dir_all(&self.dir).await?;
        let path = self.dir.join(format!(
            "job_results_{}.json",
            result.scraped_at.format("%Y%m%d_%H%M%S")
        ));
        fs::write(&path, serde_json::to_vec_pretty(result)?).await?;
        info!("Saved {} postings to {}", result.postings.len(), path.display());
        Ok(path)
    }
}

/// Logs each new posting instead of sending it anywhere.
pub struct LogNotifier;

#[async_trait::async_trait]
impl Notifier for LogNotifier {
    async fn notify(&self, new_jobs: &[JobPosting]) -> Result<Delivery, ScraperError> {
        if new_jobs.is_empty() {
            info!("No new jobs, nothing to notify");
            return Ok(Delivery::Skipped);
        }
        for (i, job) in new_jobs.iter().enumerate() {
            info!(
                "[{}/{}] New: {} at {} ({})",
                i + 1,
                new_jobs.len(),
                job.title,
                job.company,
                job.url.as_deref().unwrap_or("no link")
            );
        }
        Ok(Delivery::Sent)
    }
}

impl fmt::Display for RunOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let result = &self.result;
        let ok = result.successful_companies();
        writeln!(f, "Scraped at      : {}", result.scraped_at.to_rfc3339())?;
        writeln!(
            f,
            "Companies       : {} ({} ok, {} failed)",
            result.companies.len(),
            ok,
            result.companies.len() - ok
        )?;
        writeln!(f, "Relevant jobs   : {}", result.postings.len())?;
        writeln!(f, "New jobs        : {}", self.new_jobs.len())?;
        writeln!(f, "Removed jobs    : {}", self.removed_jobs.len())?;

        writeln!(f)?;
        for c in &result.companies {
            let method = c.method.map(|m| m.to_string()).unwrap_or_else(|| "-".to_string());
            match c.status {
                CompanyStatus::Success => writeln!(
                    f,
                    "  [success] {}: {} of {} relevant ({}, {} ms{})",
                    c.company,
                    c.jobs_found,
                    c.extracted,
                    method,
                    c.duration_ms,
                    if c.degraded { ", partial page" } else { "" }
                )?,
                CompanyStatus::Empty => writeln!(
                    f,
                    "  [empty  ] {}: no postings found ({}, {} ms)",
                    c.company, method, c.duration_ms
                )?,
                CompanyStatus::Error => writeln!(
                    f,
                    "  [error  ] {}: {}",
                    c.company,
                    c.error.as_deref().unwrap_or("unknown error")
                )?,
            }
        }

        let rejected: Vec<_> = self
            .errors
            .iter()
            .filter(|e| !result.companies.iter().any(|c| c.company == e.company))
            .collect();
        if !rejected.is_empty() {
            writeln!(f, "\nRejected config:")?;
            for e in rejected {
                writeln!(f, "  {}", e.error)?;
            }
        }

        if !self.new_jobs.is_empty() {
            writeln!(f, "\nNew jobs:")?;
            for job in &self.new_jobs {
                writeln!(f, "\n{}", job)?;
            }
        }
        Ok(())
    }
}
