use super::{Snapshot, SnapshotStore};
use crate::{data::Table, error::ScraperError, posting::JobPosting, utils};

use chrono::{DateTime, Utc};
use futures::TryStreamExt;
use sqlx::{sqlite::SqliteConnectOptions, Row, Sqlite, SqlitePool, Transaction};
use std::path::Path;
use tracing::{debug, warn};

const LATEST: &str = "latest";

pub struct PostingTable {
    name: String,
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl Table for PostingTable {
    type Record<'a> = (i64, &'a JobPosting);

    fn get_name(&self) -> &str {
        self.name.as_str()
    }

    fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create(&self) -> Result<(), sqlx::Error> {
        if !utils::is_table_exists(self.get_pool(), &self.name).await? {
            let query = format!(
                r#"
                        CREATE TABLE {} (
                            id TEXT PRIMARY KEY,
                            position INTEGER,
                            company TEXT,
                            title TEXT,
                            location TEXT,
                            url TEXT,
                            department TEXT,
                            job_type TEXT,
                            posted_date TEXT,
                            scraped_at DATETIME,
                            relevant BOOLEAN
                        )
                    "#,
                &self.name
            );
            sqlx::query(query.as_str()).execute(self.get_pool()).await?;
        }
        Ok(())
    }

    async fn insert<'a>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        (position, posting): Self::Record<'a>,
    ) -> Result<(), sqlx::Error> {
        let query = format!(
            r#"INSERT OR IGNORE INTO {} (
                id,
                position,
                company,
                title,
                location,
                url,
                department,
                job_type,
                posted_date,
                scraped_at,
                relevant) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)"#,
            self.name
        );
        sqlx::query(&query)
            .bind(posting.identity_key())
            .bind(position)
            .bind(&posting.company)
            .bind(&posting.title)
            .bind(&posting.location)
            .bind(&posting.url)
            .bind(&posting.department)
            .bind(&posting.job_type)
            .bind(&posting.posted_date)
            .bind(posting.scraped_at)
            .bind(posting.relevant)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }
}

/// One row per stored snapshot generation; only `latest` is kept.
pub struct RunTable {
    name: String,
    pool: SqlitePool,
}

#[async_trait::async_trait]
impl Table for RunTable {
    type Record<'a> = DateTime<Utc>;

    fn get_name(&self) -> &str {
        self.name.as_str()
    }

    fn get_pool(&self) -> &SqlitePool {
        &self.pool
    }

    async fn create(&self) -> Result<(), sqlx::Error> {
        if !utils::is_table_exists(self.get_pool(), &self.name).await? {
            let query = format!(
                "CREATE TABLE {} (
                    id TEXT PRIMARY KEY,
                    taken_at DATETIME
                 )",
                &self.name
            );
            sqlx::query(query.as_str()).execute(self.get_pool()).await?;
        }
        Ok(())
    }

    async fn insert<'a>(
        &self,
        tx: &mut Transaction<'_, Sqlite>,
        taken_at: Self::Record<'a>,
    ) -> Result<(), sqlx::Error> {
        let query = format!(
            "INSERT OR REPLACE INTO {} (id, taken_at) VALUES (?, ?)",
            &self.name
        );
        sqlx::query(&query)
            .bind(LATEST)
            .bind(taken_at)
            .execute(&mut *tx)
            .await?;
        Ok(())
    }
}

/// Keeps the snapshot in tables `<name>_snapshot` and `<name>_runs`.
pub struct SqliteSnapshotStore {
    pub name: String,
    pub postings: PostingTable,
    pub runs: RunTable,
    pool: SqlitePool,
}

impl SqliteSnapshotStore {
    pub async fn open<P: AsRef<Path>>(
        path: P,
        name: &str,
    ) -> Result<SqliteSnapshotStore, ScraperError> {
        let opt = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true);
        let pool = SqlitePool::connect_with(opt).await?;
        let store = SqliteSnapshotStore {
            name: name.to_string(),
            postings: PostingTable {
                name: format!("{}_snapshot", name),
                pool: pool.clone(),
            },
            runs: RunTable {
                name: format!("{}_runs", name),
                pool: pool.clone(),
            },
            pool,
        };

        debug!("Use tables {} and {}", store.postings.name, store.runs.name);
        store.postings.create().await?;
        store.runs.create().await?;
        Ok(store)
    }
}

#[async_trait::async_trait]
impl SnapshotStore for SqliteSnapshotStore {
    async fn load(&self) -> Result<Option<Snapshot>, ScraperError> {
        let query = format!("SELECT taken_at FROM {} WHERE id = ?", self.runs.get_name());
        let taken_at: DateTime<Utc> = match sqlx::query(&query)
            .bind(LATEST)
            .fetch_optional(&self.pool)
            .await?
        {
            Some(row) => row.try_get("taken_at")?,
            None => return Ok(None),
        };

        let query = format!(
            "SELECT * FROM {} ORDER BY position",
            self.postings.get_name()
        );
        let mut postings = vec![];
        let mut rows = sqlx::query(&query).fetch(&self.pool);
        while let Some(row) = rows.try_next().await? {
            postings.push(JobPosting {
                company: row.try_get("company")?,
                title: row.try_get("title")?,
                location: row.try_get("location")?,
                url: row.try_get("url")?,
                department: row.try_get("department")?,
                job_type: row.try_get("job_type")?,
                posted_date: row.try_get("posted_date")?,
                scraped_at: row.try_get("scraped_at")?,
                relevant: row.try_get("relevant")?,
            });
        }

        Ok(Some(Snapshot { taken_at, postings }))
    }

    async fn replace(&self, snapshot: &Snapshot) -> Result<(), ScraperError> {
        let mut tx = self.pool.begin().await?;
        self.postings.clear(&mut tx).await?;
        for (position, posting) in snapshot.postings.iter().enumerate() {
            self.postings
                .insert(&mut tx, (position as i64, posting))
                .await?;
        }
        self.runs.insert(&mut tx, snapshot.taken_at).await?;
        tx.commit().await?;

        let stored = self.postings.count().await? as usize;
        if stored < snapshot.postings.len() {
            warn!(
                "{} postings share an identity key; {} stored in {}",
                snapshot.postings.len() - stored,
                stored,
                self.postings.get_name()
            );
        } else {
            debug!("Stored {} postings in {}", stored, self.postings.get_name());
        }
        Ok(())
    }
}
