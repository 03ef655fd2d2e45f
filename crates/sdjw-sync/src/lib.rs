//! Run orchestration: scrape, filter, reconcile, persist, notify, ledger.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::{Context, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sdjw_adapters::{scrape_district, DistrictConfig, DistrictRegistry, ScrapeError};
use sdjw_core::{
    filter, notification_candidates, reconcile, should_notify, CompletedBatch, JobRecord,
    NotificationLogEntry, RunSource, RunStatus, ScrapeRun,
};
use sdjw_notify::NotificationSender;
use sdjw_storage::{HttpClient, JobStore, LatestResults};
use serde::Serialize;
use tracing::{error, info, info_span, warn};
use uuid::Uuid;

pub const CRATE_NAME: &str = "sdjw-sync";

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub database_url: Option<String>,
    pub data_dir: PathBuf,
    pub districts_path: PathBuf,
    pub user_agent: String,
    pub http_timeout_secs: u64,
    pub filter_enabled: bool,
}

impl WatchConfig {
    pub fn from_env() -> Self {
        Self {
            database_url: std::env::var("DATABASE_URL").ok(),
            data_dir: std::env::var("SDJW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data")),
            districts_path: std::env::var("SDJW_DISTRICTS")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("districts.yaml")),
            user_agent: std::env::var("SDJW_USER_AGENT").unwrap_or_else(|_| {
                "Mozilla/5.0 (Macintosh; Intel Mac OS X 10_15_7) AppleWebKit/537.36".to_string()
            }),
            http_timeout_secs: std::env::var("SDJW_HTTP_TIMEOUT_SECS")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(30),
            filter_enabled: std::env::var("SDJW_FILTER_DISABLED")
                .map(|v| !matches!(v.as_str(), "1" | "true" | "TRUE" | "True"))
                .unwrap_or(true),
        }
    }
}

/// Produces the raw batch for one run. The portal-backed implementation is
/// the real thing; tests script their own.
#[async_trait]
pub trait BatchSource: Send + Sync {
    async fn collect(&self) -> Result<Vec<JobRecord>, ScrapeError>;
}

pub struct PortalBatchSource {
    http: HttpClient,
    districts: Vec<DistrictConfig>,
}

impl PortalBatchSource {
    pub fn new(http: HttpClient, registry: DistrictRegistry) -> Self {
        Self {
            http,
            districts: registry.districts,
        }
    }
}

#[async_trait]
impl BatchSource for PortalBatchSource {
    /// One district after another, in registry order. Any portal error
    /// aborts the whole collection so a transient outage can never read as
    /// "zero jobs found".
    async fn collect(&self) -> Result<Vec<JobRecord>, ScrapeError> {
        let mut all = Vec::new();
        for district in &self.districts {
            info!(district = %district.name, "scraping");
            let jobs = scrape_district(&self.http, district).await?;
            info!(district = %district.name, found = jobs.len(), "district done");
            all.extend(jobs);
        }
        Ok(all)
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct RunSummary {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub finished_at: DateTime<Utc>,
    pub status: RunStatus,
    pub total_jobs: u32,
    pub new_jobs: u32,
    pub notified: bool,
    pub error: Option<String>,
}

impl RunSummary {
    fn from_run(run: &ScrapeRun, notified: bool) -> Self {
        Self {
            run_id: run.id,
            started_at: run.started_at,
            finished_at: run.completed_at.unwrap_or(run.started_at),
            status: run.status,
            total_jobs: run.total_jobs_found,
            new_jobs: run.new_jobs_found,
            notified,
            error: run.error_message.clone(),
        }
    }
}

pub struct ScrapeRunner {
    source: Box<dyn BatchSource>,
    store: Arc<dyn JobStore>,
    notifier: Arc<dyn NotificationSender>,
    filter_enabled: bool,
}

impl ScrapeRunner {
    pub fn new(
        source: Box<dyn BatchSource>,
        store: Arc<dyn JobStore>,
        notifier: Arc<dyn NotificationSender>,
        filter_enabled: bool,
    ) -> Self {
        Self {
            source,
            store,
            notifier,
            filter_enabled,
        }
    }

    /// One full scrape-reconcile-notify cycle.
    ///
    /// Scrape and persistence failures terminate the run as Failed with the
    /// prior state untouched. A notification failure does not: the run stays
    /// Success, the error is recorded, and the unsent jobs keep
    /// `notified = false` so the next cycle retries them.
    pub async fn run_once(&self, run_source: RunSource) -> Result<RunSummary> {
        let run = ScrapeRun::start(run_source, Utc::now());
        let span = info_span!("scrape_run", run_id = %run.id, source = run_source.as_str());
        let _guard = span.enter();

        self.store
            .start_run(&run)
            .await
            .context("recording run start")?;

        let records = match self.source.collect().await {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "scrape failed; aborting run");
                return self.fail_run(run, err.to_string()).await;
            }
        };

        let records = if self.filter_enabled {
            filter::apply(records)
        } else {
            records
        };
        let total = records.len() as u32;
        let batch = CompletedBatch::new(records);

        let previous = match self.store.load_state().await {
            Ok(state) => state,
            Err(err) => {
                error!(error = %err, "loading previous state failed");
                return self.fail_run(run, err.to_string()).await;
            }
        };

        let result = reconcile(&previous, &batch, Utc::now());
        let new = result.new_jobs.len() as u32;
        info!(
            total,
            new,
            still_active = result.still_active.len(),
            deactivated = result.deactivated.len(),
            "reconciled batch"
        );

        if let Err(err) = self.store.commit(&result).await {
            error!(error = %err, "committing reconciled state failed");
            return self.fail_run(run, err.to_string()).await;
        }

        // Derived convenience document for the dashboard's file fallback;
        // losing it does not lose any state.
        let latest = LatestResults {
            scraped_at: Utc::now(),
            total_jobs: total,
            new_jobs: new,
            jobs: result.state.values().filter(|j| j.is_active).cloned().collect(),
        };
        if let Err(err) = self.store.publish_latest(&latest).await {
            warn!(error = %err, "publishing latest results failed");
        }

        let mut run = run.succeed(total, new, Utc::now());
        let notified = match self.dispatch_notifications(&run, &result).await {
            Ok(notified) => notified,
            Err(message) => {
                run = run.with_notification_error(message);
                false
            }
        };

        self.store
            .complete_run(&run)
            .await
            .context("recording run completion")?;
        info!(status = run.status.as_str(), notified, "run complete");
        Ok(RunSummary::from_run(&run, notified))
    }

    /// Returns Ok(true) when at least one channel delivered and the jobs
    /// were marked, Ok(false) when the gate stayed closed, Err(text) when
    /// dispatch was attempted and nothing got through.
    async fn dispatch_notifications(
        &self,
        run: &ScrapeRun,
        result: &sdjw_core::ReconciliationResult,
    ) -> std::result::Result<bool, String> {
        let candidates = notification_candidates(&result.state);
        if !should_notify(&candidates) {
            return Ok(false);
        }
        if !self.notifier.is_configured() {
            warn!(
                candidates = candidates.len(),
                "new jobs found but no notification channel configured"
            );
            return Ok(false);
        }

        info!(candidates = candidates.len(), "dispatching notifications");
        let outcomes = self.notifier.dispatch(&candidates).await;
        let now = Utc::now();
        for outcome in &outcomes {
            let entry = NotificationLogEntry {
                run_id: run.id,
                channel: outcome.channel,
                jobs_count: candidates.len() as u32,
                success: outcome.success,
                error_message: outcome.error.clone(),
                sent_at: now,
            };
            if let Err(err) = self.store.log_notification(&entry).await {
                warn!(error = %err, "recording notification attempt failed");
            }
        }

        if outcomes.iter().any(|o| o.success) {
            let keys: Vec<_> = candidates.iter().map(|j| j.key()).collect();
            if let Err(err) = self.store.mark_notified(&keys).await {
                // The dispatch went out but the flag write failed; the
                // same jobs will be re-sent next cycle.
                warn!(error = %err, "marking jobs notified failed");
                return Err(format!("marking jobs notified failed: {err}"));
            }
            Ok(true)
        } else {
            let detail = outcomes
                .iter()
                .filter_map(|o| o.error.as_deref())
                .collect::<Vec<_>>()
                .join("; ");
            Err(format!("notification dispatch failed: {detail}"))
        }
    }

    async fn fail_run(&self, run: ScrapeRun, message: String) -> Result<RunSummary> {
        let failed = run.fail(message, Utc::now());
        self.store
            .complete_run(&failed)
            .await
            .context("recording run failure")?;
        Ok(RunSummary::from_run(&failed, false))
    }
}

/// Collect a one-off batch for the manual `scrape` command, outside the
/// reconciliation lifecycle.
pub async fn collect_once(
    http: &HttpClient,
    districts: &[DistrictConfig],
    quiet: bool,
) -> std::result::Result<Vec<JobRecord>, ScrapeError> {
    let mut all = Vec::new();
    for district in districts {
        if !quiet {
            println!("Scraping {}...", district.name);
        }
        let jobs = scrape_district(http, district).await?;
        if !quiet {
            println!("  Found {} job(s)", jobs.len());
        }
        all.extend(jobs);
    }
    Ok(all)
}
