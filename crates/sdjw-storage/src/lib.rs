//! Persisted-state stores (file snapshot + Postgres) and the shared HTTP
//! fetch helper.

use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;

use anyhow::Context;
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use reqwest::StatusCode;
use sdjw_core::{
    JobKey, JobState, NotificationLogEntry, PersistedJob, PortalType, ReconciliationResult,
    RunSource, RunStatus, ScrapeRun,
};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use sqlx::{PgPool, Row};
use thiserror::Error;
use tokio::fs;
use tokio::io::AsyncWriteExt;
use tracing::debug;
use uuid::Uuid;

pub const CRATE_NAME: &str = "sdjw-storage";

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("i/o error at {path}: {source}")]
    Io {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("malformed document {path}: {source}")]
    Json {
        path: PathBuf,
        source: serde_json::Error,
    },
    #[error(transparent)]
    Database(#[from] sqlx::Error),
    #[error(transparent)]
    Migrate(#[from] sqlx::migrate::MigrateError),
    #[error("unexpected value in store: {0}")]
    Decode(String),
}

/// Published results document consumed by the dashboard's file fallback.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LatestResults {
    pub scraped_at: DateTime<Utc>,
    pub total_jobs: u32,
    pub new_jobs: u32,
    pub jobs: Vec<PersistedJob>,
}

/// Durable backend for jobs, the run ledger, and the notification log.
///
/// The reconciliation engine is the only writer of job and run rows; the
/// dashboard reads through the same trait.
#[async_trait]
pub trait JobStore: Send + Sync {
    async fn load_state(&self) -> Result<JobState, StoreError>;

    /// Persist the updated snapshot all-or-nothing. A failure here must
    /// leave the previously committed state fully intact.
    async fn commit(&self, result: &ReconciliationResult) -> Result<(), StoreError>;

    async fn start_run(&self, run: &ScrapeRun) -> Result<(), StoreError>;
    async fn complete_run(&self, run: &ScrapeRun) -> Result<(), StoreError>;

    async fn mark_notified(&self, keys: &[JobKey]) -> Result<(), StoreError>;
    async fn log_notification(&self, entry: &NotificationLogEntry) -> Result<(), StoreError>;

    async fn active_jobs(&self) -> Result<Vec<PersistedJob>, StoreError>;
    async fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>, StoreError>;

    /// File-mode extra: publish the flat results document. Database-backed
    /// stores already expose the same data through their tables.
    async fn publish_latest(&self, _doc: &LatestResults) -> Result<(), StoreError> {
        Ok(())
    }
}

/// Local/offline store: a handful of JSON documents in a data directory,
/// replaced atomically via temp-file rename.
#[derive(Debug, Clone)]
pub struct FileStore {
    data_dir: PathBuf,
}

impl FileStore {
    pub fn new(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
        }
    }

    pub fn data_dir(&self) -> &Path {
        &self.data_dir
    }

    fn state_path(&self) -> PathBuf {
        self.data_dir.join("state.json")
    }

    fn runs_path(&self) -> PathBuf {
        self.data_dir.join("runs.json")
    }

    fn notifications_path(&self) -> PathBuf {
        self.data_dir.join("notifications.json")
    }

    pub fn latest_results_path(&self) -> PathBuf {
        self.data_dir.join("latest_results.json")
    }

    async fn read_json<T: DeserializeOwned>(&self, path: &Path) -> Result<Option<T>, StoreError> {
        match fs::read_to_string(path).await {
            Ok(text) => serde_json::from_str(&text)
                .map(Some)
                .map_err(|source| StoreError::Json {
                    path: path.to_path_buf(),
                    source,
                }),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(source) => Err(StoreError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Write bytes to a sibling temp file, then rename over the target so a
    /// reader never observes a half-written document.
    async fn write_json<T: Serialize>(&self, path: &Path, value: &T) -> Result<(), StoreError> {
        let io_err = |source| StoreError::Io {
            path: path.to_path_buf(),
            source,
        };

        fs::create_dir_all(&self.data_dir).await.map_err(io_err)?;
        let bytes = serde_json::to_vec_pretty(value).map_err(|source| StoreError::Json {
            path: path.to_path_buf(),
            source,
        })?;

        let temp_path = self
            .data_dir
            .join(format!(".{}.tmp", Uuid::new_v4()));
        let mut file = fs::File::create(&temp_path).await.map_err(io_err)?;
        file.write_all(&bytes).await.map_err(io_err)?;
        file.flush().await.map_err(io_err)?;
        drop(file);

        match fs::rename(&temp_path, path).await {
            Ok(()) => Ok(()),
            Err(source) => {
                let _ = fs::remove_file(&temp_path).await;
                Err(io_err(source))
            }
        }
    }
}

#[async_trait]
impl JobStore for FileStore {
    async fn load_state(&self) -> Result<JobState, StoreError> {
        Ok(self
            .read_json::<JobState>(&self.state_path())
            .await?
            .unwrap_or_default())
    }

    async fn commit(&self, result: &ReconciliationResult) -> Result<(), StoreError> {
        self.write_json(&self.state_path(), &result.state).await
    }

    async fn start_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        let mut runs = self
            .read_json::<Vec<ScrapeRun>>(&self.runs_path())
            .await?
            .unwrap_or_default();
        runs.push(run.clone());
        self.write_json(&self.runs_path(), &runs).await
    }

    async fn complete_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        let mut runs = self
            .read_json::<Vec<ScrapeRun>>(&self.runs_path())
            .await?
            .unwrap_or_default();
        match runs.iter_mut().find(|r| r.id == run.id) {
            Some(slot) => *slot = run.clone(),
            None => runs.push(run.clone()),
        }
        self.write_json(&self.runs_path(), &runs).await
    }

    async fn mark_notified(&self, keys: &[JobKey]) -> Result<(), StoreError> {
        let mut state = self.load_state().await?;
        for key in keys {
            if let Some(job) = state.get_mut(key) {
                job.notified = true;
            }
        }
        self.write_json(&self.state_path(), &state).await
    }

    async fn log_notification(&self, entry: &NotificationLogEntry) -> Result<(), StoreError> {
        let mut entries = self
            .read_json::<Vec<NotificationLogEntry>>(&self.notifications_path())
            .await?
            .unwrap_or_default();
        entries.push(entry.clone());
        self.write_json(&self.notifications_path(), &entries).await
    }

    async fn active_jobs(&self) -> Result<Vec<PersistedJob>, StoreError> {
        let state = self.load_state().await?;
        let mut jobs: Vec<_> = state.into_values().filter(|j| j.is_active).collect();
        jobs.sort_by(|a, b| b.first_seen_at.cmp(&a.first_seen_at));
        Ok(jobs)
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>, StoreError> {
        let mut runs = self
            .read_json::<Vec<ScrapeRun>>(&self.runs_path())
            .await?
            .unwrap_or_default();
        runs.sort_by(|a, b| b.started_at.cmp(&a.started_at));
        runs.truncate(limit);
        Ok(runs)
    }

    async fn publish_latest(&self, doc: &LatestResults) -> Result<(), StoreError> {
        self.write_json(&self.latest_results_path(), doc).await
    }
}

/// Postgres-backed store. Jobs are keyed by the derived `job_key` so the
/// database's uniqueness matches the core's normalized (district, title)
/// identity exactly.
#[derive(Debug, Clone)]
pub struct PgStore {
    pool: PgPool,
}

impl PgStore {
    pub async fn connect(database_url: &str) -> Result<Self, StoreError> {
        let pool = PgPool::connect(database_url).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    pub async fn migrate(&self) -> Result<(), StoreError> {
        sqlx::migrate!("./migrations").run(&self.pool).await?;
        Ok(())
    }

    fn job_from_row(row: &sqlx::postgres::PgRow) -> Result<PersistedJob, StoreError> {
        let portal: String = row.try_get("portal_type")?;
        Ok(PersistedJob {
            id: row.try_get("id")?,
            district: row.try_get("district")?,
            title: row.try_get("title")?,
            url: row.try_get("url")?,
            portal_type: PortalType::from_str(&portal)
                .map_err(|e| StoreError::Decode(e.to_string()))?,
            first_seen_at: row.try_get("first_seen_at")?,
            last_seen_at: row.try_get("last_seen_at")?,
            is_active: row.try_get("is_active")?,
            notified: row.try_get("notified")?,
        })
    }

    fn run_from_row(row: &sqlx::postgres::PgRow) -> Result<ScrapeRun, StoreError> {
        let status: String = row.try_get("status")?;
        let source: String = row.try_get("source")?;
        let total: i32 = row.try_get("total_jobs_found")?;
        let new: i32 = row.try_get("new_jobs_found")?;
        Ok(ScrapeRun {
            id: row.try_get("id")?,
            started_at: row.try_get("started_at")?,
            completed_at: row.try_get("completed_at")?,
            status: RunStatus::from_str(&status).map_err(|e| StoreError::Decode(e.to_string()))?,
            total_jobs_found: total.max(0) as u32,
            new_jobs_found: new.max(0) as u32,
            error_message: row.try_get("error_message")?,
            source: RunSource::from_str(&source).map_err(|e| StoreError::Decode(e.to_string()))?,
        })
    }
}

#[async_trait]
impl JobStore for PgStore {
    async fn load_state(&self) -> Result<JobState, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, district, title, url, portal_type,
                   first_seen_at, last_seen_at, is_active, notified
              FROM jobs
            "#,
        )
        .fetch_all(&self.pool)
        .await?;

        let mut state = JobState::new();
        for row in &rows {
            let job = Self::job_from_row(row)?;
            state.insert(job.key(), job);
        }
        Ok(state)
    }

    async fn commit(&self, result: &ReconciliationResult) -> Result<(), StoreError> {
        let mut tx = self.pool.begin().await?;
        for (key, job) in &result.state {
            sqlx::query(
                r#"
                INSERT INTO jobs (id, job_key, district, title, url, portal_type,
                                  first_seen_at, last_seen_at, is_active, notified)
                VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
                ON CONFLICT (job_key) DO UPDATE
                   SET title = EXCLUDED.title,
                       url = EXCLUDED.url,
                       portal_type = EXCLUDED.portal_type,
                       last_seen_at = EXCLUDED.last_seen_at,
                       is_active = EXCLUDED.is_active
                "#,
            )
            .bind(job.id)
            .bind(key.as_str())
            .bind(&job.district)
            .bind(&job.title)
            .bind(&job.url)
            .bind(job.portal_type.to_string())
            .bind(job.first_seen_at)
            .bind(job.last_seen_at)
            .bind(job.is_active)
            .bind(job.notified)
            .execute(&mut *tx)
            .await?;
        }
        tx.commit().await?;
        debug!(rows = result.state.len(), "committed reconciled state");
        Ok(())
    }

    async fn start_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO scrape_runs (id, started_at, status, source)
            VALUES ($1, $2, $3, $4)
            "#,
        )
        .bind(run.id)
        .bind(run.started_at)
        .bind(run.status.as_str())
        .bind(run.source.as_str())
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn complete_run(&self, run: &ScrapeRun) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            UPDATE scrape_runs
               SET completed_at = $2,
                   status = $3,
                   total_jobs_found = $4,
                   new_jobs_found = $5,
                   error_message = $6
             WHERE id = $1
            "#,
        )
        .bind(run.id)
        .bind(run.completed_at)
        .bind(run.status.as_str())
        .bind(run.total_jobs_found as i32)
        .bind(run.new_jobs_found as i32)
        .bind(&run.error_message)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn mark_notified(&self, keys: &[JobKey]) -> Result<(), StoreError> {
        if keys.is_empty() {
            return Ok(());
        }
        let keys: Vec<String> = keys.iter().map(|k| k.as_str().to_string()).collect();
        sqlx::query("UPDATE jobs SET notified = TRUE WHERE job_key = ANY($1)")
            .bind(&keys)
            .execute(&self.pool)
            .await?;
        Ok(())
    }

    async fn log_notification(&self, entry: &NotificationLogEntry) -> Result<(), StoreError> {
        sqlx::query(
            r#"
            INSERT INTO notifications (scrape_run_id, notification_type, jobs_count,
                                       success, error_message, sent_at)
            VALUES ($1, $2, $3, $4, $5, $6)
            "#,
        )
        .bind(entry.run_id)
        .bind(entry.channel.as_str())
        .bind(entry.jobs_count as i32)
        .bind(entry.success)
        .bind(&entry.error_message)
        .bind(entry.sent_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn active_jobs(&self) -> Result<Vec<PersistedJob>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, district, title, url, portal_type,
                   first_seen_at, last_seen_at, is_active, notified
              FROM jobs
             WHERE is_active = TRUE
             ORDER BY first_seen_at DESC
            "#,
        )
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::job_from_row).collect()
    }

    async fn recent_runs(&self, limit: usize) -> Result<Vec<ScrapeRun>, StoreError> {
        let rows = sqlx::query(
            r#"
            SELECT id, started_at, completed_at, status, total_jobs_found,
                   new_jobs_found, error_message, source
              FROM scrape_runs
             ORDER BY started_at DESC
             LIMIT $1
            "#,
        )
        .bind(limit as i64)
        .fetch_all(&self.pool)
        .await?;
        rows.iter().map(Self::run_from_row).collect()
    }
}

#[derive(Debug, Clone)]
pub struct HttpClientConfig {
    pub timeout: Duration,
    pub user_agent: String,
}

impl Default for HttpClientConfig {
    fn default() -> Self {
        Self {
            timeout: Duration::from_secs(30),
            user_agent: "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36"
                .to_string(),
        }
    }
}

#[derive(Debug, Error)]
pub enum FetchError {
    #[error("request failed: {0}")]
    Request(#[from] reqwest::Error),
    #[error("http status {status} for {url}")]
    HttpStatus { status: u16, url: String },
}

/// Thin sequential fetch helper. The portals are scraped one page at a
/// time with no retries, pagination, or rate limiting.
#[derive(Debug, Clone)]
pub struct HttpClient {
    client: reqwest::Client,
}

impl HttpClient {
    pub fn new(config: HttpClientConfig) -> anyhow::Result<Self> {
        let client = reqwest::Client::builder()
            .gzip(true)
            .brotli(true)
            .timeout(config.timeout)
            .user_agent(config.user_agent)
            .build()
            .context("building reqwest client")?;
        Ok(Self { client })
    }

    pub async fn fetch_text(&self, url: &str) -> Result<String, FetchError> {
        let resp = self.client.get(url).send().await?;
        let status = resp.status();
        let final_url = resp.url().to_string();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: final_url,
            });
        }
        Ok(resp.text().await?)
    }

    pub async fn post_bytes(
        &self,
        url: &str,
        headers: &[(&str, &str)],
        body: Vec<u8>,
    ) -> Result<StatusCode, FetchError> {
        let mut req = self.client.post(url).body(body);
        for (name, value) in headers {
            req = req.header(*name, *value);
        }
        let resp = req.send().await?;
        let status = resp.status();
        if !status.is_success() {
            return Err(FetchError::HttpStatus {
                status: status.as_u16(),
                url: url.to_string(),
            });
        }
        Ok(status)
    }
}
