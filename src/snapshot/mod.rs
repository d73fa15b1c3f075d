mod json;
mod sqlite;

pub use json::JsonSnapshotStore;
pub use sqlite::{PostingTable, RunTable, SqliteSnapshotStore};

use crate::{error::ScraperError, posting::JobPosting};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashSet;

/// Relevant postings of the last successful run: the baseline for the next
/// diff. Stored as a whole; see `RunOutcome::next_snapshot` for what goes in.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Snapshot {
    pub taken_at: DateTime<Utc>,
    pub postings: Vec<JobPosting>,
}

impl Snapshot {
    pub fn keys(&self) -> HashSet<String> {
        self.postings.iter().map(JobPosting::identity_key).collect()
    }
}

#[async_trait::async_trait]
pub trait SnapshotStore: Send + Sync {
    /// `None` when no run has been recorded yet.
    async fn load(&self) -> Result<Option<Snapshot>, ScraperError>;
    async fn replace(&self, snapshot: &Snapshot) -> Result<(), ScraperError>;
}

/// Postings of `current` whose identity key is not in `previous`, in
/// `current` order and at most once per key. Without a previous snapshot
/// every posting is new.
pub fn diff(current: &[JobPosting], previous: Option<&Snapshot>) -> Vec<JobPosting> {
    let mut seen = previous.map(Snapshot::keys).unwrap_or_default();
    current
        .iter()
        .filter(|p| seen.insert(p.identity_key()))
        .cloned()
        .collect()
}

/// Postings of `previous` that are gone from `current`.
pub fn removed(current: &[JobPosting], previous: Option<&Snapshot>) -> Vec<JobPosting> {
    let Some(previous) = previous else {
        return vec![];
    };
    let mut seen: HashSet<String> = current.iter().map(JobPosting::identity_key).collect();
    previous
        .postings
        .iter()
        .filter(|p| seen.insert(p.identity_key()))
        .cloned()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::posting::tests::posting;
    use pretty_assertions::assert_eq;

    fn snapshot(postings: Vec<JobPosting>) -> Snapshot {
        Snapshot {
            taken_at: crate::utils::get_now(),
            postings,
        }
    }

    fn titles(postings: &[JobPosting]) -> Vec<&str> {
        postings.iter().map(|p| p.title.as_str()).collect()
    }

    #[test]
    fn first_run_everything_is_new() {
        let current = vec![
            posting("Acme", "Engineer A", Some("https://a/1")),
            posting("Acme", "Engineer B", Some("https://a/2")),
        ];
        assert_eq!(diff(&current, None), current);
        assert!(removed(&current, None).is_empty());
    }

    #[test]
    fn diff_is_idempotent() {
        let current = vec![
            posting("Acme", "Engineer A", Some("https://a/1")),
            posting("Initech", "Developer", None),
        ];
        let previous = snapshot(current.clone());
        assert!(diff(&current, Some(&previous)).is_empty());
        assert!(diff(&current, Some(&previous)).is_empty());
    }

    #[test]
    fn only_unseen_postings_in_current_order() {
        let previous = snapshot(vec![
            posting("Acme", "Engineer B", Some("https://a/2")),
            posting("Acme", "Old Role", Some("https://a/0")),
        ]);
        let current = vec![
            posting("Initech", "Developer", None),
            posting("acme", " engineer  b", Some("https://a/2")),
            posting("Acme", "Engineer C", Some("https://a/3")),
            posting("Initech", "Developer", None),
        ];

        let new = diff(&current, Some(&previous));
        assert_eq!(titles(&new), vec!["Developer", "Engineer C"]);

        let gone = removed(&current, Some(&previous));
        assert_eq!(titles(&gone), vec!["Old Role"]);
    }

    #[test]
    fn diff_does_not_touch_previous() {
        let previous = snapshot(vec![posting("Acme", "Engineer A", None)]);
        let before = previous.clone();
        let _ = diff(&[posting("Acme", "Engineer Z", None)], Some(&previous));
        assert_eq!(previous, before);
    }
}
