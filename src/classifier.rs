//! Title-based relevance filter for entry-level technical roles.
//!
//! Decisions come from an ordered table of policies. The first policy whose
//! markers occur in the title decides; explicit disqualifiers sit above every
//! inclusion signal, so "Senior Engineer, New Grad friendly" is excluded.

use crate::error::ScraperError;

use itertools::Itertools;
use lazy_static::lazy_static;
use serde::{Deserialize, Serialize};
use std::{fmt, path::Path};
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Verdict {
    Include,
    Exclude,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Rule {
    Seniority,
    Internship,
    EntryLevel,
    TechnicalRole,
}

impl fmt::Display for Rule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Rule::Seniority => "seniority marker",
            Rule::Internship => "internship marker",
            Rule::EntryLevel => "entry-level marker",
            Rule::TechnicalRole => "technical role",
        };
        f.write_str(s)
    }
}

/// How a policy's markers are looked up in a normalized title.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Matching {
    /// Whole words only: "intern" does not hit "internal".
    Phrase,
    /// Start of a word: "engineer" also hits "engineering".
    Stem,
}

#[derive(Debug, Clone)]
struct Policy {
    rule: Rule,
    verdict: Verdict,
    markers: Vec<String>,
}

impl Policy {
    fn new(rule: Rule, verdict: Verdict, matching: Matching, markers: &[String]) -> Self {
        let markers = markers
            .iter()
            .map(|m| normalize(m))
            .filter(|m| !m.trim().is_empty())
            .map(|m| match matching {
                Matching::Phrase => m,
                // Drop the trailing pad so the marker may continue into a longer word.
                Matching::Stem => m.trim_end().to_string(),
            })
            .collect();
        Policy {
            rule,
            verdict,
            markers,
        }
    }

    fn find<'a>(&'a self, normalized: &str) -> Option<&'a str> {
        self.markers
            .iter()
            .find(|m| normalized.contains(m.as_str()))
            .map(|m| m.trim())
    }
}

/// Outcome of a classification, with the policy that produced it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Decision {
    pub verdict: Verdict,
    /// `None` when no policy matched and the default exclusion applied.
    pub rule: Option<Rule>,
    pub marker: Option<String>,
}

impl Decision {
    pub fn is_relevant(&self) -> bool {
        self.verdict == Verdict::Include
    }
}

/// Marker lists, one per policy. Loadable from JSON to tune the filter
/// without recompiling.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClassifierConfig {
    pub seniority: Vec<String>,
    pub internship: Vec<String>,
    pub entry_level: Vec<String>,
    pub roles: Vec<String>,
}

fn strings(items: &[&str]) -> Vec<String> {
    items.iter().map(ToString::to_string).collect()
}

impl Default for ClassifierConfig {
    fn default() -> Self {
        ClassifierConfig {
            seniority: strings(&[
                "senior",
                "sr",
                "staff",
                "principal",
                "lead",
                "manager",
                "director",
                "vp",
                "vice president",
                "head of",
                "ii",
                "iii",
                "iv",
                "mid level",
                "experienced",
            ]),
            internship: strings(&["intern", "interns", "internship", "co op"]),
            entry_level: strings(&[
                "new grad",
                "new graduate",
                "university hire",
                "university graduate",
                "entry level",
                "junior",
                "jr",
                "recent graduate",
                "recent grad",
                "campus",
                "early career",
                "graduate program",
            ]),
            roles: strings(&["engineer", "developer", "scientist", "analyst", "programmer"]),
        }
    }
}

#[derive(Debug, Clone)]
pub struct Classifier {
    policies: Vec<Policy>,
}

impl Default for Classifier {
    fn default() -> Self {
        Classifier::new(&ClassifierConfig::default())
    }
}

impl Classifier {
    pub fn new(config: &ClassifierConfig) -> Self {
        use Matching::*;
        use Verdict::*;

        let policies = vec![
            Policy::new(Rule::Seniority, Exclude, Phrase, &config.seniority),
            Policy::new(Rule::Internship, Exclude, Phrase, &config.internship),
            Policy::new(Rule::EntryLevel, Include, Phrase, &config.entry_level),
            Policy::new(Rule::TechnicalRole, Include, Stem, &config.roles),
        ];
        Classifier { policies }
    }

    pub fn explain(&self, title: &str) -> Decision {
        let normalized = normalize(title);
        self.policies
            .iter()
            .find_map(|p| {
                p.find(&normalized).map(|marker| Decision {
                    verdict: p.verdict,
                    rule: Some(p.rule),
                    marker: Some(marker.to_string()),
                })
            })
            .unwrap_or(Decision {
                verdict: Verdict::Exclude,
                rule: None,
                marker: None,
            })
    }

    pub fn is_relevant(&self, title: &str) -> bool {
        self.explain(title).is_relevant()
    }
}

lazy_static! {
    static ref DEFAULT_CLASSIFIER: Classifier = Classifier::default();
}

/// Classifies with the built-in marker lists.
pub fn is_relevant(title: &str) -> bool {
    DEFAULT_CLASSIFIER.is_relevant(title)
}

/// Builds the classifier from a marker file, or the built-in lists without one.
/// Lists missing from the file keep their defaults.
pub async fn load_classifier(path: Option<&Path>) -> Result<Classifier, ScraperError> {
    match path {
        Some(path) => {
            let raw = tokio::fs::read_to_string(path).await?;
            let config: ClassifierConfig = serde_json::from_str(&raw)?;
            info!("Using classifier markers from {}", path.display());
            Ok(Classifier::new(&config))
        }
        None => Ok(Classifier::default()),
    }
}

/// Lowercases, turns punctuation into spaces, collapses whitespace and pads
/// both ends with a single space so markers can be matched on word edges.
fn normalize(text: &str) -> String {
    let cleaned: String = text
        .chars()
        .map(|c| if c.is_alphanumeric() { c } else { ' ' })
        .flat_map(char::to_lowercase)
        .collect();
    format!(" {} ", cleaned.split_whitespace().join(" "))
}
