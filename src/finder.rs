//! Guesses the selectors of an unknown careers page, to bootstrap a company
//! entry in the config.

use crate::{config::FetchMethod, utils::collapse_whitespace};

use itertools::Itertools;
use lazy_regex::regex;
use lazy_static::lazy_static;
use scraper::{ElementRef, Html, Node, Selector};
use serde_json::{json, Value};
use std::fmt;

const E: &str = "Invalid selector";

const CONTAINER_PATTERNS: [&str; 32] = [
    ".job",
    ".job-item",
    ".job-card",
    ".job-posting",
    ".job-result",
    ".job-listing",
    ".position",
    ".opening",
    ".career-item",
    ".listing",
    ".vacancy",
    ".search-result",
    ".result-item",
    ".posting",
    ".opportunity",
    "[data-job-id]",
    "[data-testid*=\"job\"]",
    "[data-automation-id*=\"job\"]",
    "[data-position-id]",
    "[data-listing-id]",
    ".row",
    ".item",
    ".card",
    ".entry",
    ".record",
    "tr",
    "li",
    ".tile",
    ".box",
    ".react-job-item",
    ".vue-job-card",
    ".angular-position",
];

const TITLE_PATTERNS: [&str; 10] = [
    "a",
    "h1",
    "h2",
    "h3",
    "h4",
    ".title",
    ".job-title",
    ".position-title",
    "[data-testid*=\"title\"]",
    "[data-automation-id*=\"title\"]",
];

const LOCATION_PATTERNS: [&str; 5] = [
    ".location",
    ".job-location",
    ".position-location",
    "[data-testid*=\"location\"]",
    "[class*=\"location\"]",
];

const JOB_KEYWORDS: [&str; 19] = [
    "engineer",
    "developer",
    "analyst",
    "manager",
    "coordinator",
    "specialist",
    "associate",
    "director",
    "lead",
    "senior",
    "junior",
    "intern",
    "new grad",
    "entry level",
    "remote",
    "full-time",
    "part-time",
    "contract",
    "temporary",
];

const LOCATION_WORDS: [&str; 5] = ["location", "city", "state", "country", "remote"];
const DATE_WORDS: [&str; 4] = ["posted", "updated", "days ago", "weeks ago"];

/// Containers sampled for confidence, and for field candidates.
const CONFIDENCE_SAMPLE: usize = 5;
const FIELD_SAMPLE: usize = 3;

lazy_static! {
    static ref CONTAINERS: Vec<(&'static str, Selector)> = compile_all(&CONTAINER_PATTERNS);
    static ref TITLES: Vec<(&'static str, Selector)> = compile_all(&TITLE_PATTERNS);
    static ref LOCATIONS: Vec<(&'static str, Selector)> = compile_all(&LOCATION_PATTERNS);
    static ref LINK: Selector = Selector::parse("a").expect(E);
    static ref INPUT: Selector = Selector::parse("input").expect(E);
}

fn compile_all(patterns: &[&'static str]) -> Vec<(&'static str, Selector)> {
    patterns
        .iter()
        .map(|p| (*p, Selector::parse(p).expect(E)))
        .collect()
}

#[derive(Debug, Clone, PartialEq)]
pub struct ContainerCandidate {
    pub selector: String,
    pub count: usize,
    /// 0 to 1; how much the sampled elements read like job postings.
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FieldCandidate {
    pub selector: String,
    /// Sampled containers where the selector found fitting text.
    pub hits: usize,
    pub example: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PageAnalysis {
    /// Best first.
    pub containers: Vec<ContainerCandidate>,
    /// Fields inside the best container.
    pub titles: Vec<FieldCandidate>,
    pub locations: Vec<FieldCandidate>,
    pub search_inputs: Vec<String>,
}

impl PageAnalysis {
    pub fn best_container(&self) -> Option<&str> {
        self.containers.first().map(|c| c.selector.as_str())
    }

    /// A company entry for the config file, with guesses filled in and
    /// common defaults elsewhere.
    pub fn suggest_config(&self, name: &str, careers_url: &str, method: FetchMethod) -> Value {
        let pick = |candidates: &[FieldCandidate], default: &str| {
            candidates
                .first()
                .map(|c| c.selector.clone())
                .unwrap_or_else(|| default.to_string())
        };
        let mut company = json!({
            "enabled": true,
            "method": method,
            "careers_url": careers_url,
            "search_params": { "q": "software engineer new grad" },
            "selectors": {
                "job_container": self.best_container().unwrap_or(".job-item"),
                "title": pick(&self.titles, ".job-title"),
                "location": pick(&self.locations, ".job-location"),
                "url": "a",
            },
        });
        if method == FetchMethod::Browser {
            company["selenium_config"] = json!({
                "dynamic_loading": {
                    "infinite_scroll": true,
                    "max_scrolls": 3,
                    "scroll_pause": 2,
                }
            });
        }
        json!({ name: company })
    }
}

impl fmt::Display for PageAnalysis {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.containers.is_empty() {
            writeln!(f, "No job containers found")?;
        }
        for c in &self.containers {
            writeln!(
                f,
                "Container       : {} ({} elements, confidence {:.2})",
                c.selector, c.count, c.confidence
            )?;
        }
        for (label, candidates) in [("Title", &self.titles), ("Location", &self.locations)] {
            for c in candidates {
                writeln!(
                    f,
                    "{:<16}: {} ({} of {}) '{}'",
                    label, c.selector, c.hits, FIELD_SAMPLE, c.example
                )?;
            }
        }
        for s in &self.search_inputs {
            writeln!(f, "Search input    : {}", s)?;
        }
        Ok(())
    }
}

pub fn analyze(html: &str) -> PageAnalysis {
    let doc = Html::parse_document(html);
    let containers = find_containers(&doc);

    let (titles, locations) = match containers.first() {
        Some(best) => {
            let sample: Vec<ElementRef> = CONTAINERS
                .iter()
                .find(|(p, _)| *p == best.selector)
                .map(|(_, s)| doc.select(s).take(FIELD_SAMPLE).collect())
                .unwrap_or_default();
            (
                group(sample.iter().flat_map(|c| title_candidates(*c))),
                group(sample.iter().flat_map(|c| location_candidates(*c))),
            )
        }
        None => (vec![], vec![]),
    };

    PageAnalysis {
        containers,
        titles,
        locations,
        search_inputs: search_inputs(&doc),
    }
}

fn find_containers(doc: &Html) -> Vec<ContainerCandidate> {
    let mut found: Vec<ContainerCandidate> = CONTAINERS
        .iter()
        .filter_map(|(pattern, selector)| {
            let elements: Vec<ElementRef> = doc.select(selector).collect();
            if !(2..=100).contains(&elements.len()) {
                return None;
            }
            let score = confidence(&elements, pattern);
            (score > 0.3).then(|| ContainerCandidate {
                selector: pattern.to_string(),
                count: elements.len(),
                confidence: score,
            })
        })
        .collect();
    found.sort_by(|a, b| b.confidence.total_cmp(&a.confidence));
    found
}

fn confidence(elements: &[ElementRef], pattern: &str) -> f64 {
    let sample = &elements[..elements.len().min(CONFIDENCE_SAMPLE)];
    if sample.is_empty() {
        return 0.0;
    }
    let total: f64 = sample
        .iter()
        .map(|element| {
            let text = element.text().collect::<String>().to_lowercase();
            let mut score = 0.1 * JOB_KEYWORDS.iter().filter(|k| text.contains(*k)).count() as f64;
            if element.select(&LINK).next().is_some() {
                score += 0.3;
            }
            if LOCATION_WORDS.iter().any(|w| text.contains(w)) {
                score += 0.2;
            }
            if looks_dated(&text) {
                score += 0.2;
            }
            if pattern.to_lowercase().contains("job") {
                score += 0.3;
            }
            score
        })
        .sum();
    (total / sample.len() as f64).min(1.0)
}

fn looks_dated(text: &str) -> bool {
    regex!(r"\d{1,2}/\d{1,2}/\d{4}").is_match(text)
        || regex!(r"\d{1,2}-\d{1,2}-\d{4}").is_match(text)
        || DATE_WORDS.iter().any(|w| text.contains(w))
}

fn looks_like_location(text: &str) -> bool {
    if !(2..=100).contains(&text.len()) {
        return false;
    }
    regex!(r"\b[A-Z][a-z]+,\s*[A-Z]{2}\b").is_match(text)
        || regex!(r"\b[A-Z][a-z]+,\s*[A-Z][a-z]+\b").is_match(text)
        || regex!(r"\b(San Francisco|New York|Seattle|Austin|Boston|Chicago|Los Angeles|Washington|Denver|Atlanta)\b")
            .is_match(text)
        || regex!(r"\b(USA|US|United States|Canada|UK|Remote)\b").is_match(text)
}

fn text_of(element: ElementRef) -> String {
    collapse_whitespace(&element.text().collect::<String>())
}

fn title_candidates(container: ElementRef) -> Vec<(String, String)> {
    TITLES
        .iter()
        .flat_map(|(pattern, selector)| {
            container
                .select(selector)
                .map(text_of)
                .filter(|t| (6..150).contains(&t.chars().count()))
                .map(|t| (pattern.to_string(), t))
        })
        .collect()
}

fn location_candidates(container: ElementRef) -> Vec<(String, String)> {
    let by_selector = LOCATIONS.iter().flat_map(|(pattern, selector)| {
        container
            .select(selector)
            .map(text_of)
            .filter(|t| looks_like_location(t))
            .map(|t| (pattern.to_string(), t))
    });

    let by_text = container.descendants().filter_map(|node| {
        let Node::Text(text) = node.value() else {
            return None;
        };
        let text = collapse_whitespace(text);
        if !looks_like_location(&text) {
            return None;
        }
        let parent = node.parent().and_then(ElementRef::wrap)?;
        let classes = parent.value().classes().join(".");
        let selector = if classes.is_empty() {
            parent.value().name().to_string()
        } else {
            format!("{}.{}", parent.value().name(), classes)
        };
        Some((selector, text))
    });

    by_selector.chain(by_text).collect()
}

/// Folds `(selector, text)` hits into one candidate per selector, most hits
/// first, ties in order of appearance.
fn group(hits: impl Iterator<Item = (String, String)>) -> Vec<FieldCandidate> {
    let mut grouped: Vec<FieldCandidate> = vec![];
    for (selector, text) in hits {
        match grouped.iter_mut().find(|c| c.selector == selector) {
            Some(c) => c.hits += 1,
            None => grouped.push(FieldCandidate {
                selector,
                hits: 1,
                example: text,
            }),
        }
    }
    grouped.sort_by(|a, b| b.hits.cmp(&a.hits));
    grouped
}

fn search_inputs(doc: &Html) -> Vec<String> {
    doc.select(&INPUT)
        .filter_map(|input| {
            let attr = |name: &str| input.value().attr(name).unwrap_or_default();
            let mentions_search = ["placeholder", "name", "id"]
                .into_iter()
                .any(|a| attr(a).to_lowercase().contains("search"));
            if attr("type") != "search" && !mentions_search {
                return None;
            }
            Some(if !attr("id").is_empty() {
                format!("#{}", attr("id"))
            } else if !attr("name").is_empty() {
                format!("input[name='{}']", attr("name"))
            } else {
                let kind = attr("type");
                format!("input[type='{}']", if kind.is_empty() { "text" } else { kind })
            })
        })
        .unique()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    const LISTING: &str = include_str!("../tests/htmls/listing.html");

    fn selectors(candidates: &[FieldCandidate]) -> Vec<(&str, usize)> {
        candidates
            .iter()
            .map(|c| (c.selector.as_str(), c.hits))
            .collect()
    }

    #[test]
    fn listing_page_containers_are_ranked() {
        let analysis = analyze(LISTING);
        let found: Vec<_> = analysis
            .containers
            .iter()
            .map(|c| (c.selector.as_str(), c.count))
            .collect();
        assert_eq!(found, vec![(".posting", 6), ("li", 6)]);
        assert!((analysis.containers[0].confidence - 0.52).abs() < 1e-9);
        assert_eq!(analysis.best_container(), Some(".posting"));
    }

    #[test]
    fn fields_are_found_inside_best_container() {
        let analysis = analyze(LISTING);
        assert_eq!(selectors(&analysis.titles), vec![("a", 3), ("h2", 3)]);
        assert_eq!(
            analysis.titles[0].example,
            "Software Engineer, New Grad (2025)"
        );
        assert_eq!(
            selectors(&analysis.locations)[..2],
            [("[class*=\"location\"]", 3), ("span.posting-location", 3)]
        );
        assert_eq!(analysis.locations[0].example, "New York, NY");
        assert!(analysis.search_inputs.is_empty());
    }

    #[test]
    fn job_named_selectors_score_higher() {
        let html = r#"<html><body>
            <div class="job-card"><span>Data Analyst</span></div>
            <div class="job-card"><span>Support Analyst</span></div>
            <div class="card"><span>Data Analyst</span></div>
            <div class="card"><span>Support Analyst</span></div>
        </body></html>"#;
        let analysis = analyze(html);
        let found: Vec<_> = analysis
            .containers
            .iter()
            .map(|c| c.selector.as_str())
            .collect();
        // .card alone scores 0.1 and is dropped
        assert_eq!(found, vec![".job-card"]);
        assert!((analysis.containers[0].confidence - 0.4).abs() < 1e-9);
    }

    #[test]
    fn search_inputs_get_suggested_selectors() {
        let html = r#"<html><body><form>
            <input type="search" id="q">
            <input name="jobSearch" placeholder="Find roles">
            <input type="text" placeholder="Search jobs">
            <input type="text" name="email">
        </form></body></html>"#;
        assert_eq!(
            analyze(html).search_inputs,
            vec!["#q", "input[name='jobSearch']", "input[type='text']"]
        );
    }

    #[test]
    fn suggested_config_loads() {
        let analysis = analyze(LISTING);
        let suggestion = analysis.suggest_config(
            "Globex",
            "https://globex.example.com/careers",
            FetchMethod::Browser,
        );
        assert_eq!(suggestion["Globex"]["selectors"]["job_container"], ".posting");
        assert_eq!(suggestion["Globex"]["selectors"]["title"], "a");

        let loaded = crate::config::parse_config(&suggestion.to_string()).unwrap();
        let globex = loaded.get("Globex").unwrap();
        assert_eq!(globex.method, FetchMethod::Browser);
        assert_eq!(
            globex.interaction.infinite_scroll.map(|s| s.max_scrolls),
            Some(3)
        );
        assert_eq!(globex.interaction.search_term.as_deref(), Some("software engineer new grad"));
    }

    #[test]
    fn empty_page_has_no_guesses() {
        let analysis = analyze("<html><body><p>Nothing here</p></body></html>");
        assert_eq!(analysis.best_container(), None);
        assert!(analysis.titles.is_empty());
        assert_eq!(analysis.to_string(), "No job containers found\n");
    }
}
