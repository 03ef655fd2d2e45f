//! Core domain model and reconciliation logic for School District Job Watch.

use std::collections::BTreeMap;
use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

pub const CRATE_NAME: &str = "sdjw-core";

pub mod filter;

/// Career portal families the adapters know how to parse.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PortalType {
    AppliTrack,
    PowerSchool,
    #[serde(rename = "PAEducator")]
    PaEducator,
    SchoolSpring,
    #[serde(rename = "District Website")]
    DistrictSite,
}

impl fmt::Display for PortalType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PortalType::AppliTrack => "AppliTrack",
            PortalType::PowerSchool => "PowerSchool",
            PortalType::PaEducator => "PAEducator",
            PortalType::SchoolSpring => "SchoolSpring",
            PortalType::DistrictSite => "District Website",
        };
        f.write_str(name)
    }
}

impl std::str::FromStr for PortalType {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "AppliTrack" => Ok(PortalType::AppliTrack),
            "PowerSchool" => Ok(PortalType::PowerSchool),
            "PAEducator" => Ok(PortalType::PaEducator),
            "SchoolSpring" => Ok(PortalType::SchoolSpring),
            "District Website" => Ok(PortalType::DistrictSite),
            _ => Err(RecordError::UnknownVariant("portal type", s.to_string())),
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum RecordError {
    #[error("job record is missing required field `{0}`")]
    MissingField(&'static str),
    #[error("unknown {0} `{1}`")]
    UnknownVariant(&'static str, String),
}

/// One raw posting as produced by a portal scraper. Ephemeral; identity is
/// the (district, title) pair only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobRecord {
    pub district: String,
    pub title: String,
    pub url: String,
    pub portal_type: PortalType,
}

impl JobRecord {
    /// Validating constructor for the scraper/core boundary. Blank district,
    /// title, or url rejects the record before it can reach the filter or
    /// the reconciliation engine.
    pub fn new(
        district: impl Into<String>,
        title: impl Into<String>,
        url: impl Into<String>,
        portal_type: PortalType,
    ) -> Result<Self, RecordError> {
        let district = district.into();
        let title = title.into();
        let url = url.into();
        if district.trim().is_empty() {
            return Err(RecordError::MissingField("district"));
        }
        if title.trim().is_empty() {
            return Err(RecordError::MissingField("title"));
        }
        if url.trim().is_empty() {
            return Err(RecordError::MissingField("url"));
        }
        Ok(Self {
            district,
            title,
            url,
            portal_type,
        })
    }

    pub fn key(&self) -> JobKey {
        JobKey::of(self)
    }
}

/// Stable dedup/reconciliation key derived from (district, title).
///
/// URL and portal type never participate, so a reposted URL for the same
/// title does not create a new logical job.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct JobKey(String);

impl JobKey {
    pub fn derive(district: &str, title: &str) -> Self {
        Self(format!("{}|{}", normalize(district), normalize(title)))
    }

    pub fn of(record: &JobRecord) -> Self {
        Self::derive(&record.district, &record.title)
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for JobKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Trim, case-fold, collapse internal whitespace runs to single spaces.
fn normalize(input: &str) -> String {
    input
        .trim()
        .to_lowercase()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

/// Durable job row. Created on first observation and never deleted;
/// deactivation is the only "deletion" signal.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PersistedJob {
    pub id: Uuid,
    pub district: String,
    pub title: String,
    pub url: String,
    pub portal_type: PortalType,
    pub first_seen_at: DateTime<Utc>,
    pub last_seen_at: DateTime<Utc>,
    pub is_active: bool,
    pub notified: bool,
}

impl PersistedJob {
    pub fn first_observed(record: &JobRecord, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            district: record.district.clone(),
            title: record.title.clone(),
            url: record.url.clone(),
            portal_type: record.portal_type,
            first_seen_at: now,
            last_seen_at: now,
            is_active: true,
            notified: false,
        }
    }

    pub fn key(&self) -> JobKey {
        JobKey::derive(&self.district, &self.title)
    }
}

/// Provenance tag on a run ledger entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunSource {
    Manual,
    Scheduled,
}

impl RunSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunSource::Manual => "manual",
            RunSource::Scheduled => "scheduled",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Running,
    Success,
    Failed,
}

impl RunStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            RunStatus::Running => "running",
            RunStatus::Success => "success",
            RunStatus::Failed => "failed",
        }
    }
}

impl std::str::FromStr for RunStatus {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "running" => Ok(RunStatus::Running),
            "success" => Ok(RunStatus::Success),
            "failed" => Ok(RunStatus::Failed),
            _ => Err(RecordError::UnknownVariant("run status", s.to_string())),
        }
    }
}

impl std::str::FromStr for RunSource {
    type Err = RecordError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "manual" => Ok(RunSource::Manual),
            "scheduled" => Ok(RunSource::Scheduled),
            _ => Err(RecordError::UnknownVariant("run source", s.to_string())),
        }
    }
}

/// One scrape execution in the run ledger. Starts `Running`, reaches exactly
/// one terminal status, immutable thereafter. A crash between start and
/// completion leaves the row `Running` forever; it is a diagnostic record,
/// not a lock, and nothing reads `Running` rows to make decisions.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ScrapeRun {
    pub id: Uuid,
    pub started_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
    pub status: RunStatus,
    pub total_jobs_found: u32,
    pub new_jobs_found: u32,
    pub error_message: Option<String>,
    pub source: RunSource,
}

impl ScrapeRun {
    pub fn start(source: RunSource, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            started_at: now,
            completed_at: None,
            status: RunStatus::Running,
            total_jobs_found: 0,
            new_jobs_found: 0,
            error_message: None,
            source,
        }
    }

    pub fn succeed(mut self, total: u32, new: u32, now: DateTime<Utc>) -> Self {
        self.status = RunStatus::Success;
        self.total_jobs_found = total;
        self.new_jobs_found = new;
        self.completed_at = Some(now);
        self
    }

    pub fn fail(mut self, error: impl Into<String>, now: DateTime<Utc>) -> Self {
        self.status = RunStatus::Failed;
        self.error_message = Some(error.into());
        self.completed_at = Some(now);
        self
    }

    /// Attach notification error text without touching the terminal status.
    pub fn with_notification_error(mut self, error: impl Into<String>) -> Self {
        self.error_message = Some(error.into());
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationChannel {
    Email,
    Push,
}

impl NotificationChannel {
    pub fn as_str(&self) -> &'static str {
        match self {
            NotificationChannel::Email => "email",
            NotificationChannel::Push => "push",
        }
    }
}

/// Append-only record of one notification dispatch attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NotificationLogEntry {
    pub run_id: Uuid,
    pub channel: NotificationChannel,
    pub jobs_count: u32,
    pub success: bool,
    pub error_message: Option<String>,
    pub sent_at: DateTime<Utc>,
}

/// Snapshot of all known jobs keyed by JobKey.
pub type JobState = BTreeMap<JobKey, PersistedJob>;

/// A scrape batch that ran to completion. Constructing one is the caller's
/// assertion that every portal adapter finished, which is what makes an
/// empty batch safe to deactivate against — a failed scrape must abort the
/// run before it gets here.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CompletedBatch {
    records: Vec<JobRecord>,
}

impl CompletedBatch {
    pub fn new(records: Vec<JobRecord>) -> Self {
        Self { records }
    }

    pub fn records(&self) -> &[JobRecord] {
        &self.records
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReconciliationResult {
    pub new_jobs: Vec<PersistedJob>,
    pub still_active: Vec<JobKey>,
    pub deactivated: Vec<JobKey>,
    pub state: JobState,
}

/// Compare the previous snapshot against a completed batch.
///
/// Invariants: `first_seen_at` is set exactly once per key and never
/// mutated; `is_active` is a pure function of presence in the batch; no row
/// is ever removed. Colliding keys within the batch collapse last-wins in
/// batch order (colliding records share a district by construction, so the
/// order districts were scraped in cannot change the winner).
pub fn reconcile(
    previous: &JobState,
    batch: &CompletedBatch,
    now: DateTime<Utc>,
) -> ReconciliationResult {
    let mut current: BTreeMap<JobKey, &JobRecord> = BTreeMap::new();
    for record in batch.records() {
        current.insert(record.key(), record);
    }

    let mut state = previous.clone();
    let mut new_jobs = Vec::new();
    let mut still_active = Vec::new();

    for (key, record) in &current {
        match state.get_mut(key) {
            Some(job) => {
                job.last_seen_at = now;
                job.is_active = true;
                job.title = record.title.clone();
                job.url = record.url.clone();
                job.portal_type = record.portal_type;
                still_active.push(key.clone());
            }
            None => {
                let job = PersistedJob::first_observed(*record, now);
                new_jobs.push(job.clone());
                state.insert(key.clone(), job);
            }
        }
    }

    let mut deactivated = Vec::new();
    for (key, job) in state.iter_mut() {
        if job.is_active && !current.contains_key(key) {
            job.is_active = false;
            deactivated.push(key.clone());
        }
    }

    ReconciliationResult {
        new_jobs,
        still_active,
        deactivated,
        state,
    }
}

/// Jobs eligible for the notification gate: active and not yet notified.
///
/// A failed dispatch leaves `notified` false, so the same jobs come back as
/// candidates on the next cycle instead of being silently dropped.
pub fn notification_candidates(state: &JobState) -> Vec<PersistedJob> {
    state
        .values()
        .filter(|job| job.is_active && !job.notified)
        .cloned()
        .collect()
}

/// Gate decision: a notification fires iff there is at least one candidate.
pub fn should_notify(candidates: &[PersistedJob]) -> bool {
    !candidates.is_empty()
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 8, 7, hour, 0, 0).single().unwrap()
    }

    fn record(district: &str, title: &str, url: &str) -> JobRecord {
        JobRecord::new(district, title, url, PortalType::PowerSchool).unwrap()
    }

    #[test]
    fn key_ignores_url_and_portal() {
        let a = record("Mt. Lebanon", "Social Studies Teacher - High School", "u1");
        let mut b = a.clone();
        b.url = "u2".into();
        b.portal_type = PortalType::AppliTrack;
        assert_eq!(a.key(), b.key());
    }

    #[test]
    fn key_normalizes_case_and_whitespace() {
        assert_eq!(
            JobKey::derive("  Mt. Lebanon ", "Social   Studies\tTeacher"),
            JobKey::derive("mt. lebanon", "social studies teacher"),
        );
    }

    #[test]
    fn blank_fields_are_rejected_at_the_boundary() {
        let err = JobRecord::new("  ", "Teacher", "u", PortalType::DistrictSite).unwrap_err();
        assert_eq!(err, RecordError::MissingField("district"));
        let err = JobRecord::new("D", " ", "u", PortalType::DistrictSite).unwrap_err();
        assert_eq!(err, RecordError::MissingField("title"));
        let err = JobRecord::new("D", "Teacher", "", PortalType::DistrictSite).unwrap_err();
        assert_eq!(err, RecordError::MissingField("url"));
    }

    #[test]
    fn first_observation_creates_unnotified_active_job() {
        let batch = CompletedBatch::new(vec![record(
            "Mt. Lebanon",
            "Social Studies Teacher - High School",
            "u1",
        )]);
        let result = reconcile(&JobState::new(), &batch, ts(7));

        assert_eq!(result.new_jobs.len(), 1);
        assert!(result.still_active.is_empty());
        assert!(result.deactivated.is_empty());
        let job = &result.new_jobs[0];
        assert_eq!(job.first_seen_at, ts(7));
        assert_eq!(job.last_seen_at, ts(7));
        assert!(job.is_active);
        assert!(!job.notified);

        let candidates = notification_candidates(&result.state);
        assert!(should_notify(&candidates));
    }

    #[test]
    fn resight_refreshes_url_without_touching_first_seen() {
        let key = JobKey::derive("Mt. Lebanon", "Social Studies Teacher - High School");
        let first = CompletedBatch::new(vec![record(
            "Mt. Lebanon",
            "Social Studies Teacher - High School",
            "u1",
        )]);
        let state = reconcile(&JobState::new(), &first, ts(7)).state;

        let second = CompletedBatch::new(vec![record(
            "Mt. Lebanon",
            "Social Studies Teacher - High School",
            "u2",
        )]);
        let result = reconcile(&state, &second, ts(19));

        assert!(result.new_jobs.is_empty());
        assert_eq!(result.still_active, vec![key.clone()]);
        let job = &result.state[&key];
        assert_eq!(job.url, "u2");
        assert_eq!(job.first_seen_at, ts(7));
        assert_eq!(job.last_seen_at, ts(19));
    }

    #[test]
    fn absence_deactivates_but_keeps_history() {
        let key = JobKey::derive("Bethel Park", "History Teacher, Grades 6-12");
        let first = CompletedBatch::new(vec![record(
            "Bethel Park",
            "History Teacher, Grades 6-12",
            "u1",
        )]);
        let state = reconcile(&JobState::new(), &first, ts(7)).state;

        let result = reconcile(&state, &CompletedBatch::new(vec![]), ts(19));
        assert_eq!(result.deactivated, vec![key.clone()]);
        let job = &result.state[&key];
        assert!(!job.is_active);
        assert_eq!(job.first_seen_at, ts(7));
        assert_eq!(job.last_seen_at, ts(7));

        // Already-inactive keys are not re-reported on later runs.
        let again = reconcile(&result.state, &CompletedBatch::new(vec![]), ts(20));
        assert!(again.deactivated.is_empty());
    }

    #[test]
    fn reactivation_preserves_first_seen_and_notified() {
        let key = JobKey::derive("Bethel Park", "History Teacher, Grades 6-12");
        let batch = CompletedBatch::new(vec![record(
            "Bethel Park",
            "History Teacher, Grades 6-12",
            "u1",
        )]);
        let mut state = reconcile(&JobState::new(), &batch, ts(7)).state;
        state.get_mut(&key).unwrap().notified = true;

        let gone = reconcile(&state, &CompletedBatch::new(vec![]), ts(8)).state;
        assert!(!gone[&key].is_active);

        let back = reconcile(&gone, &batch, ts(9));
        assert!(back.new_jobs.is_empty());
        let job = &back.state[&key];
        assert!(job.is_active);
        assert!(job.notified);
        assert_eq!(job.first_seen_at, ts(7));
    }

    #[test]
    fn reconcile_is_idempotent() {
        let batch = CompletedBatch::new(vec![
            record("Mt. Lebanon", "Social Studies Teacher - High School", "u1"),
            record("Bethel Park", "History Teacher, Grades 6-12", "u2"),
        ]);
        let once = reconcile(&JobState::new(), &batch, ts(7));
        let twice = reconcile(&once.state, &batch, ts(7));

        assert!(twice.new_jobs.is_empty());
        assert!(twice.deactivated.is_empty());
        assert_eq!(once.state, twice.state);
    }

    #[test]
    fn in_batch_collisions_collapse_last_wins() {
        let batch = CompletedBatch::new(vec![
            record("Mt. Lebanon", "Social Studies Teacher", "u1"),
            record("Mt. Lebanon", "Social  Studies  Teacher", "u2"),
        ]);
        let result = reconcile(&JobState::new(), &batch, ts(7));
        assert_eq!(result.new_jobs.len(), 1);
        assert_eq!(result.new_jobs[0].url, "u2");
    }

    #[test]
    fn candidates_exclude_notified_and_inactive_jobs() {
        let batch = CompletedBatch::new(vec![
            record("A", "History Teacher", "u1"),
            record("B", "Civics Teacher", "u2"),
        ]);
        let mut state = reconcile(&JobState::new(), &batch, ts(7)).state;
        state
            .get_mut(&JobKey::derive("A", "History Teacher"))
            .unwrap()
            .notified = true;
        state
            .get_mut(&JobKey::derive("B", "Civics Teacher"))
            .unwrap()
            .is_active = false;

        assert!(notification_candidates(&state).is_empty());
        assert!(!should_notify(&notification_candidates(&state)));
    }

    #[test]
    fn run_ledger_reaches_one_terminal_state() {
        let run = ScrapeRun::start(RunSource::Scheduled, ts(7));
        assert_eq!(run.status, RunStatus::Running);
        assert!(run.completed_at.is_none());

        let done = run.clone().succeed(12, 3, ts(8));
        assert_eq!(done.status, RunStatus::Success);
        assert_eq!(done.total_jobs_found, 12);
        assert_eq!(done.new_jobs_found, 3);
        assert_eq!(done.completed_at, Some(ts(8)));

        let failed = run.fail("portal unreachable", ts(8));
        assert_eq!(failed.status, RunStatus::Failed);
        assert_eq!(failed.error_message.as_deref(), Some("portal unreachable"));
    }
}
