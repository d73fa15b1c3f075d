use clap::Parser;
use newgrad_scraper::{
    config::{FetchMethod, Interaction},
    fetcher::{HttpFetcher, Render, WebDriver},
    finder,
};
use reqwest::Url;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::prelude::*;

/// Analyzes a careers page and prints a suggested company entry.
#[derive(Parser, Debug)]
#[command(name = "find-selectors")]
struct Args {
    /// Careers page to analyze
    url: Url,

    /// Company name for the suggested entry
    #[arg(long, default_value = "NewCompany")]
    name: String,

    /// WebDriver server used when the plain page shows no job containers
    #[arg(long, env = "SCRAPER_WEBDRIVER")]
    webdriver: Option<String>,

    /// Seconds scripts may run before the rendered page is read
    #[arg(long, default_value = "8")]
    render_secs: u64,

    /// HTTP timeout in seconds
    #[arg(long, default_value = "30")]
    timeout: u64,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer())
        .with(
            tracing_subscriber::EnvFilter::try_from_env("LOG_LEVEL")
                .unwrap_or_else(|_| "info,html5ever=error,selectors=error,hyper=warn".into()),
        )
        .init();

    let args = Args::parse();
    let timeout = Duration::from_secs(args.timeout);

    let mut method = FetchMethod::Static;
    let mut analysis = match HttpFetcher::new(timeout)?.get(args.url.clone()).await {
        Ok(html) => Some(finder::analyze(&html)),
        Err(e) => {
            warn!("Plain fetch failed: {}", e);
            None
        }
    };

    let needs_browser = analysis
        .as_ref()
        .map_or(true, |a| a.best_container().is_none());
    if needs_browser {
        match &args.webdriver {
            Some(endpoint) => {
                info!("No job containers in the plain page; rendering {}", args.url);
                let html = WebDriver::new(endpoint, timeout)?
                    .render(
                        args.url.as_str(),
                        &Interaction::default(),
                        Duration::from_secs(args.render_secs),
                    )
                    .await?;
                analysis = Some(finder::analyze(&html));
                method = FetchMethod::Browser;
            }
            None => warn!("No job containers found; pass --webdriver to try a rendered page"),
        }
    }

    let Some(analysis) = analysis else {
        return Err(format!("Could not load {}", args.url).into());
    };
    println!("{}", analysis);
    println!(
        "{}",
        serde_json::to_string_pretty(&analysis.suggest_config(
            &args.name,
            args.url.as_str(),
            method
        ))?
    );
    Ok(())
}
