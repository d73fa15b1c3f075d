use clap::{Parser, ValueEnum};
use newgrad_scraper::{
    classifier::load_classifier,
    error::ScraperError,
    fetcher::{
        BrowserFetcher, Chromium, FetchRouter, HttpFetcher, Pacing, Render, Retrying,
        RetryPolicy, WebDriver,
    },
    load_config,
    report::{JsonReport, LogNotifier, Notifier, ReportRenderer},
    snapshot::{JsonSnapshotStore, SqliteSnapshotStore},
    Pipeline, Snapshot, SnapshotStore,
};
use std::{path::PathBuf, time::Duration};
use tracing::{info, warn};
use tracing_error::ErrorLayer;
use tracing_subscriber::prelude::*;

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum Store {
    Json,
    Sqlite,
}

/// Watches career pages for new-grad software roles.
#[derive(Parser, Debug)]
#[command(name = "newgrad-scraper")]
struct Args {
    /// Company config (JSON object keyed by company name)
    #[arg(long, env = "SCRAPER_CONFIG", default_value = "companies_config.json")]
    config: PathBuf,

    /// Snapshot of the previous run; with `--store sqlite` the extension
    /// becomes `.db`
    #[arg(long, env = "SCRAPER_SNAPSHOT", default_value = "latest_results.json")]
    snapshot: PathBuf,

    #[arg(long, value_enum, default_value = "json")]
    store: Store,

    /// Where `job_results_<timestamp>.json` is written
    #[arg(long, env = "SCRAPER_OUTPUT_DIR", default_value = ".")]
    output_dir: PathBuf,

    /// Chromium/Chrome binary for pages that need a browser
    #[arg(long, env = "SCRAPER_BROWSER")]
    browser: Option<PathBuf>,

    /// WebDriver server (e.g. http://localhost:9515) for pages that need a
    /// browser; runs `selenium_config` steps, unlike `--browser`
    #[arg(long, env = "SCRAPER_WEBDRIVER")]
    webdriver: Option<String>,

    /// Replacement marker lists for the relevance classifier (JSON)
    #[arg(long, env = "SCRAPER_CLASSIFIER")]
    classifier: Option<PathBuf>,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,

    /// Scrape only this company and print what was found
    #[arg(long)]
    test_company: Option<String>,

    /// Skip the random delays between requests and companies
    #[arg(long)]
    no_delay: bool,

    /// Do not send notifications for new jobs
    #[arg(long)]
    no_notify: bool,
}

async fn open_store(args: &Args) -> Result<Box<dyn SnapshotStore>, ScraperError> {
    let store: Box<dyn SnapshotStore> = match args.store {
        Store::Json => Box::new(JsonSnapshotStore::new(&args.snapshot)),
        Store::Sqlite => {
            let path = args.snapshot.with_extension("db");
            let name: String = path
                .file_stem()
                .unwrap_or_default()
                .to_string_lossy()
                .chars()
                .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
                .collect();
            Box::new(SqliteSnapshotStore::open(&path, &name).await?)
        }
    };
    Ok(store)
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL").unwrap_or_else(|_| {
                "info,html5ever=error,selectors=error,hyper=warn,reqwest=info,sqlx=warn".into()
            }),
        )
        .with(ErrorLayer::default())
        .init();

    let args = Args::parse();

    let config = load_config(&args.config).await?;
    let classifier = load_classifier(args.classifier.as_deref()).await?;
    let pacing = if args.no_delay {
        Pacing::none()
    } else {
        Pacing::default()
    };

    let timeout = Duration::from_secs(args.timeout);
    let http = HttpFetcher::new(timeout)?;
    let renderer: Option<Box<dyn Render>> = match (&args.webdriver, &args.browser) {
        (Some(endpoint), browser) => {
            if browser.is_some() {
                warn!("Both --webdriver and --browser given; using the WebDriver server");
            }
            Some(Box::new(WebDriver::new(endpoint, timeout)?))
        }
        (None, Some(path)) => Some(Box::new(Chromium::new(path))),
        (None, None) => None,
    };
    let browser = renderer.map(BrowserFetcher::new);
    let fetcher = Retrying::new(
        FetchRouter::new(http, browser),
        RetryPolicy::default(),
        &pacing,
    );
    let pipeline = Pipeline::new(fetcher, classifier, pacing);

    if let Some(name) = &args.test_company {
        let Some(company) = config.get(name) else {
            return Err(format!("Unknown company `{}`", name).into());
        };
        let scrape = pipeline.scrape_company(company).await;
        for job in &scrape.postings {
            println!(
                "[{}] {}",
                if job.relevant { "relevant" } else { "skipped " },
                job.title
            );
        }
        println!(
            "\n{}: {} ({} relevant of {})",
            scrape.stats.company, scrape.stats.status, scrape.stats.jobs_found, scrape.stats.extracted
        );
        if let Some(e) = &scrape.stats.error {
            println!("Error: {}", e);
        }
        return Ok(());
    }

    let store = open_store(&args).await?;
    let previous: Option<Snapshot> = match store.load().await {
        Ok(previous) => previous,
        Err(e) => {
            warn!("Cannot read previous snapshot, treating as first run: {}", e);
            None
        }
    };

    let outcome = pipeline.run(&config, previous.as_ref()).await;

    if let Err(e) = JsonReport::new(&args.output_dir).render(&outcome.result).await {
        warn!("Failed to write run output: {}", e);
    }

    if outcome.should_replace_snapshot() {
        store.replace(&outcome.next_snapshot(previous.as_ref())).await?;
    } else {
        warn!("Every company failed; keeping the previous snapshot");
    }

    if !args.no_notify {
        match LogNotifier.notify(&outcome.new_jobs).await {
            Ok(delivery) => info!("Notification: {:?}", delivery),
            Err(e) => warn!("Failed to notify: {}", e),
        }
    }

    println!("{}", outcome);
    Ok(())
}
