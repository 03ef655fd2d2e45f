//! Read-only dashboard over the persisted job and run state.
//!
//! No core logic runs here: handlers read through the same store trait the
//! reconciliation engine writes through, and render with askama. When no
//! DATABASE_URL is set the file-mode documents back the pages instead.

use std::collections::BTreeMap;
use std::path::PathBuf;
use std::sync::Arc;

use askama::Template;
use axum::{
    extract::{Query, State},
    http::{header, StatusCode},
    response::{Html, IntoResponse, Response},
    routing::get,
    Router,
};
use sdjw_storage::{FileStore, JobStore, PgStore};
use serde::Deserialize;
use tokio::net::TcpListener;

pub const CRATE_NAME: &str = "sdjw-web";

const APP_CSS: &str = include_str!("../assets/app.css");

#[derive(Clone)]
pub struct AppState {
    pub store: Arc<dyn JobStore>,
}

impl AppState {
    pub fn new(store: Arc<dyn JobStore>) -> Self {
        Self { store }
    }
}

/// DATABASE_URL selects Postgres; otherwise the file store in
/// SDJW_DATA_DIR (default `./data`) backs the dashboard.
pub async fn store_from_env() -> anyhow::Result<Arc<dyn JobStore>> {
    match std::env::var("DATABASE_URL") {
        Ok(url) => Ok(Arc::new(PgStore::connect(&url).await?)),
        Err(_) => {
            let data_dir = std::env::var("SDJW_DATA_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| PathBuf::from("./data"));
            Ok(Arc::new(FileStore::new(data_dir)))
        }
    }
}

pub fn app(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/jobs", get(jobs_handler))
        .route("/runs", get(runs_handler))
        .route("/assets/app.css", get(app_css_handler))
        .with_state(Arc::new(state))
}

pub async fn serve_from_env() -> anyhow::Result<()> {
    let port: u16 = std::env::var("SDJW_WEB_PORT")
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(8000);
    serve(store_from_env().await?, port).await
}

pub async fn serve(store: Arc<dyn JobStore>, port: u16) -> anyhow::Result<()> {
    let listener = TcpListener::bind(("0.0.0.0", port)).await?;
    axum::serve(listener, app(AppState::new(store))).await?;
    Ok(())
}

#[derive(Debug, Clone)]
struct JobRow {
    title: String,
    district: String,
    portal: String,
    url: String,
    first_seen: String,
}

#[derive(Debug, Clone)]
struct FacetRow {
    district: String,
    count: usize,
}

#[derive(Debug, Clone)]
struct RunRow {
    started: String,
    status: String,
    total: u32,
    new: u32,
    source: String,
    error: String,
}

#[derive(Template)]
#[template(path = "index.html")]
struct IndexTemplate {
    active_jobs: usize,
    new_in_latest_run: u32,
    latest_run_status: String,
    latest_run_time: String,
}

#[derive(Template)]
#[template(path = "jobs.html")]
struct JobsTemplate {
    jobs: Vec<JobRow>,
    facets: Vec<FacetRow>,
}

#[derive(Template)]
#[template(path = "runs.html")]
struct RunsTemplate {
    runs: Vec<RunRow>,
}

#[derive(Debug, Deserialize, Default)]
struct JobsQuery {
    district: Option<String>,
}

async fn index_handler(State(state): State<Arc<AppState>>) -> Response {
    let active = match state.store.active_jobs().await {
        Ok(jobs) => jobs,
        Err(err) => return server_error(err.into()),
    };
    let latest = match state.store.recent_runs(1).await {
        Ok(runs) => runs.into_iter().next(),
        Err(err) => return server_error(err.into()),
    };

    let (status, time, new) = match &latest {
        Some(run) => (
            run.status.as_str().to_string(),
            run.started_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            run.new_jobs_found,
        ),
        None => ("n/a".to_string(), "never".to_string(), 0),
    };

    render_html(IndexTemplate {
        active_jobs: active.len(),
        new_in_latest_run: new,
        latest_run_status: status,
        latest_run_time: time,
    })
}

async fn jobs_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<JobsQuery>,
) -> Response {
    let active = match state.store.active_jobs().await {
        Ok(jobs) => jobs,
        Err(err) => return server_error(err.into()),
    };

    let mut counts = BTreeMap::<String, usize>::new();
    for job in &active {
        *counts.entry(job.district.clone()).or_default() += 1;
    }
    let facets = counts
        .into_iter()
        .map(|(district, count)| FacetRow { district, count })
        .collect();

    let selected = query.district.unwrap_or_default();
    let jobs = active
        .into_iter()
        .filter(|job| selected.is_empty() || job.district == selected)
        .map(|job| JobRow {
            title: job.title,
            district: job.district,
            portal: job.portal_type.to_string(),
            url: job.url,
            first_seen: job.first_seen_at.format("%Y-%m-%d").to_string(),
        })
        .collect();

    render_html(JobsTemplate { jobs, facets })
}

async fn runs_handler(State(state): State<Arc<AppState>>) -> Response {
    let runs = match state.store.recent_runs(20).await {
        Ok(runs) => runs,
        Err(err) => return server_error(err.into()),
    };
    let runs = runs
        .into_iter()
        .map(|run| RunRow {
            started: run.started_at.format("%Y-%m-%d %H:%M UTC").to_string(),
            status: run.status.as_str().to_string(),
            total: run.total_jobs_found,
            new: run.new_jobs_found,
            source: run.source.as_str().to_string(),
            error: run.error_message.unwrap_or_default(),
        })
        .collect();
    render_html(RunsTemplate { runs })
}

async fn app_css_handler() -> Response {
    ([(header::CONTENT_TYPE, "text/css; charset=utf-8")], APP_CSS).into_response()
}

fn render_html<T: Template>(tpl: T) -> Response {
    match tpl.render() {
        Ok(html) => Html(html).into_response(),
        Err(err) => server_error(anyhow::anyhow!(err.to_string())),
    }
}

fn server_error(err: anyhow::Error) -> Response {
    (
        StatusCode::INTERNAL_SERVER_ERROR,
        Html(format!("Server error: {}", err)),
    )
        .into_response()
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::Body;
    use chrono::{TimeZone, Utc};
    use http_body_util::BodyExt;
    use sdjw_core::{reconcile, CompletedBatch, JobRecord, JobState, PortalType, RunSource, ScrapeRun};
    use tempfile::TempDir;
    use tower::ServiceExt;

    async fn seeded_store(dir: &TempDir) -> Arc<FileStore> {
        let store = Arc::new(FileStore::new(dir.path()));
        let now = Utc.with_ymd_and_hms(2026, 8, 7, 7, 0, 0).unwrap();
        let batch = CompletedBatch::new(vec![
            JobRecord::new(
                "Mt. Lebanon School District",
                "Social Studies Teacher - High School",
                "https://example.org/1",
                PortalType::AppliTrack,
            )
            .unwrap(),
            JobRecord::new(
                "Bethel Park School District",
                "History Teacher, Grades 6-12",
                "https://example.org/2",
                PortalType::PowerSchool,
            )
            .unwrap(),
        ]);
        let result = reconcile(&JobState::new(), &batch, now);
        store.commit(&result).await.unwrap();

        let run = ScrapeRun::start(RunSource::Scheduled, now).succeed(2, 2, now);
        store.start_run(&run).await.unwrap();
        store.complete_run(&run).await.unwrap();
        store
    }

    async fn body_text(resp: Response) -> String {
        let bytes = resp.into_body().collect().await.unwrap().to_bytes();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn index_shows_stats() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let app = app(AppState::new(store));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("School District Job Watch"));
        assert!(text.contains("Active postings"));
    }

    #[tokio::test]
    async fn jobs_page_lists_active_jobs_and_facets() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let app = app(AppState::new(store));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/jobs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("Social Studies Teacher - High School"));
        assert!(text.contains("History Teacher, Grades 6-12"));
        assert!(text.contains("Bethel Park School District (1)"));
    }

    #[tokio::test]
    async fn jobs_page_filters_by_district() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let app = app(AppState::new(store));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/jobs?district=Bethel%20Park%20School%20District")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("History Teacher, Grades 6-12"));
        assert!(!text.contains("Social Studies Teacher - High School"));
    }

    #[tokio::test]
    async fn runs_page_lists_ledger_entries() {
        let dir = TempDir::new().unwrap();
        let store = seeded_store(&dir).await;
        let app = app(AppState::new(store));

        let resp = app
            .oneshot(
                axum::http::Request::builder()
                    .uri("/runs")
                    .body(Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(resp.status(), StatusCode::OK);
        let text = body_text(resp).await;
        assert!(text.contains("success"));
        assert!(text.contains("scheduled"));
    }

    #[tokio::test]
    async fn empty_store_still_renders() {
        let dir = TempDir::new().unwrap();
        let store: Arc<dyn JobStore> = Arc::new(FileStore::new(dir.path()));
        let app = app(AppState::new(store));

        for uri in ["/", "/jobs", "/runs", "/assets/app.css"] {
            let resp = app
                .clone()
                .oneshot(
                    axum::http::Request::builder()
                        .uri(uri)
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap();
            assert_eq!(resp.status(), StatusCode::OK, "uri {uri}");
        }
    }
}
