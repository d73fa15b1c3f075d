use clap::Parser;
use newgrad_scraper::classifier::{load_classifier, Classifier, Decision, Verdict};
use std::{
    io::{self, BufRead},
    path::PathBuf,
};

/// Prints the relevance verdict for each title, or for each line of stdin
/// when no title is given.
#[derive(Parser, Debug)]
#[command(name = "classify")]
struct Args {
    /// Job titles to classify
    titles: Vec<String>,

    /// Replacement marker lists (JSON), same format as the scraper's
    /// `--classifier`
    #[arg(long, env = "SCRAPER_CLASSIFIER")]
    classifier: Option<PathBuf>,
}

fn print(classifier: &Classifier, title: &str) {
    let Decision {
        verdict,
        rule,
        marker,
    } = classifier.explain(title);
    let tag = match verdict {
        Verdict::Include => "relevant",
        Verdict::Exclude => "skipped ",
    };
    match (rule, marker) {
        (Some(rule), Some(marker)) => println!("[{}] {} ({}: {})", tag, title, rule, marker),
        _ => println!("[{}] {} (no marker)", tag, title),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    let classifier = load_classifier(args.classifier.as_deref()).await?;

    if args.titles.is_empty() {
        for line in io::stdin().lock().lines() {
            let line = line?;
            if !line.trim().is_empty() {
                print(&classifier, line.trim());
            }
        }
    } else {
        for title in &args.titles {
            print(&classifier, title);
        }
    }
    Ok(())
}
