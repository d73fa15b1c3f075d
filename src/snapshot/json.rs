use super::{Snapshot, SnapshotStore};
use crate::error::ScraperError;

use std::{
    io::ErrorKind,
    path::{Path, PathBuf},
};
use tokio::fs;
use tracing::debug;

/// Snapshot kept as a single pretty-printed JSON document. Writes go to a
/// sibling temp file first and are renamed into place.
pub struct JsonSnapshotStore {
    path: PathBuf,
}

impl JsonSnapshotStore {
    pub fn new<P: Into<PathBuf>>(path: P) -> Self {
        JsonSnapshotStore { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn temp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().unwrap_or_default().to_os_string();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for JsonSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, ScraperError> {
        let raw = match fs::read_to_string(&self.path).await {
            Ok(raw) => raw,
            Err(e) if e.kind() == ErrorKind::NotFound => {
                debug!("No snapshot at {}", self.path.display());
                return Ok(None);
            }
            Err(e) => return Err(e.into()),
        };
        Ok(Some(serde_json::from_str(&raw)?))
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), ScraperError> {
        if let Some(dir) = self.path.parent().filter(|d| !d.as_os_str().is_empty()) {
            fs::create_dir_all(dir).await?;
        }
        let tmp = self.temp_path();
        fs::write(&tmp, serde_json::to_vec_pretty(snapshot)?).await?;
        fs::rename(&tmp, &self.path).await?;
        debug!(
            "Stored {} postings in {}",
            snapshot.postings.len(),
            self.path.display()
        );
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{posting::tests::posting, utils::get_now};
    use pretty_assertions::assert_eq;

    #[tokio::test]
    async fn missing_file_means_first_run() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonSnapshotStore::new(dir.path().join("latest_results.json"));
        assert_eq!(s.load().await.unwrap(), None);
    }

    #[tokio::test]
    async fn replace_then_load() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonSnapshotStore::new(dir.path().join("latest_results.json"));
        let first = Snapshot {
            taken_at: get_now(),
            postings: vec![
                posting("Acme", "Software Engineer I", Some("https://a/1")),
                posting("Acme", "Junior Developer", None),
            ],
        };
        s.replace(&first).await.unwrap();
        assert_eq!(s.load().await.unwrap(), Some(first));

        let second = Snapshot {
            taken_at: get_now(),
            postings: vec![],
        };
        s.replace(&second).await.unwrap();
        assert_eq!(s.load().await.unwrap(), Some(second));
        assert!(!s.temp_path().exists());
    }

    #[tokio::test]
    async fn corrupt_file_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let s = JsonSnapshotStore::new(dir.path().join("latest_results.json"));
        fs::write(s.path(), "{ not json").await.unwrap();
        assert!(matches!(s.load().await, Err(ScraperError::Json(_))));
    }
}
