//! Portal scraping adapters and the district registry.
//!
//! Each adapter is a bespoke parse of one career-portal family's page
//! shape: fetch a single listing page, pull out posting titles and links,
//! dedup within the batch. No retries, no pagination, no rate limiting —
//! one page per portal per run.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use scraper::{ElementRef, Html, Selector};
use sdjw_core::{JobRecord, PortalType, RecordError};
use sdjw_storage::{FetchError, HttpClient};
use serde::Deserialize;
use thiserror::Error;
use tracing::warn;
use url::Url;

pub const CRATE_NAME: &str = "sdjw-adapters";

#[derive(Debug, Error)]
pub enum ScrapeError {
    #[error("fetching {url}: {source}")]
    Fetch {
        url: String,
        #[source]
        source: FetchError,
    },
    #[error("bad selector: {0}")]
    Selector(String),
    #[error("bad url `{url}`: {reason}")]
    BadUrl { url: String, reason: String },
    #[error(transparent)]
    Record(#[from] RecordError),
    #[error("reading district registry {path}: {reason}")]
    Registry { path: PathBuf, reason: String },
}

/// One career-portal endpoint for a district. Districts with several
/// portals simply list several endpoints.
#[derive(Debug, Clone, Deserialize)]
pub struct PortalEndpoint {
    #[serde(rename = "type")]
    pub portal_type: PortalType,
    pub url: String,
    /// PAEducator lists every district in the state; this narrows the rows
    /// to ours when the posting text names the district differently.
    #[serde(default)]
    pub paeducator_filter: Option<String>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistrictConfig {
    pub name: String,
    pub portals: Vec<PortalEndpoint>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct DistrictRegistry {
    pub districts: Vec<DistrictConfig>,
}

impl DistrictRegistry {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ScrapeError> {
        let path = path.as_ref();
        let text = std::fs::read_to_string(path).map_err(|e| ScrapeError::Registry {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })?;
        serde_yaml::from_str(&text).map_err(|e| ScrapeError::Registry {
            path: path.to_path_buf(),
            reason: e.to_string(),
        })
    }

    /// Case-insensitive substring match on district names, the way the CLI
    /// `--district` flag scopes a run.
    pub fn matching(&self, needle: &str) -> Vec<DistrictConfig> {
        let needle = needle.to_lowercase();
        self.districts
            .iter()
            .filter(|d| d.name.to_lowercase().contains(&needle))
            .cloned()
            .collect()
    }

    pub fn district_names(&self) -> Vec<String> {
        self.districts.iter().map(|d| d.name.clone()).collect()
    }
}

#[async_trait]
pub trait PortalScraper: Send + Sync {
    fn portal_type(&self) -> PortalType;

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError>;
}

pub fn scraper_for(portal: PortalType) -> Box<dyn PortalScraper> {
    match portal {
        PortalType::AppliTrack => Box::new(AppliTrackScraper),
        PortalType::PowerSchool => Box::new(PowerSchoolScraper),
        PortalType::PaEducator => Box::new(PaEducatorScraper),
        PortalType::SchoolSpring => Box::new(SchoolSpringScraper),
        PortalType::DistrictSite => Box::new(DistrictSiteScraper),
    }
}

async fn fetch_page(http: &HttpClient, url: &str) -> Result<String, ScrapeError> {
    http.fetch_text(url).await.map_err(|source| ScrapeError::Fetch {
        url: url.to_string(),
        source,
    })
}

fn parse_selector(selector: &str) -> Result<Selector, ScrapeError> {
    Selector::parse(selector).map_err(|e| ScrapeError::Selector(e.to_string()))
}

fn element_text(element: ElementRef<'_>) -> String {
    element
        .text()
        .collect::<String>()
        .split_whitespace()
        .collect::<Vec<_>>()
        .join(" ")
}

fn join_url(base: &str, href: &str) -> Result<String, ScrapeError> {
    let base = Url::parse(base).map_err(|e| ScrapeError::BadUrl {
        url: base.to_string(),
        reason: e.to_string(),
    })?;
    let joined = base.join(href).map_err(|e| ScrapeError::BadUrl {
        url: href.to_string(),
        reason: e.to_string(),
    })?;
    Ok(joined.to_string())
}

fn dedup_by_title(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = std::collections::HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert(job.title.to_lowercase()))
        .collect()
}

fn dedup_by_url(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = std::collections::HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert(job.url.clone()))
        .collect()
}

fn dedup_by_title_and_url(jobs: Vec<JobRecord>) -> Vec<JobRecord> {
    let mut seen = std::collections::HashSet::new();
    jobs.into_iter()
        .filter(|job| seen.insert((job.title.to_lowercase(), job.url.clone())))
        .collect()
}

/// AppliTrack/Frontline portals expose their posting categories as links
/// whose text reads `"{category} ({count})"`.
#[derive(Debug, Clone, Copy)]
pub struct AppliTrackScraper;

/// Split `"Teaching - Secondary (12)"` into the category title, dropping
/// the trailing posting count.
fn strip_category_count(text: &str) -> Option<&str> {
    let open = text.rfind('(')?;
    let inner = text[open + 1..].strip_suffix(')')?;
    if inner.is_empty() || !inner.chars().all(|c| c.is_ascii_digit()) {
        return None;
    }
    let title = text[..open].trim();
    if title.is_empty() {
        None
    } else {
        Some(title)
    }
}

pub fn parse_applitrack(
    html: &str,
    base_url: &str,
    district: &str,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let document = Html::parse_document(html);
    let links = parse_selector(r#"a[href*="Category="]"#)?;

    let mut jobs = Vec::new();
    for link in document.select(&links) {
        let text = element_text(link);
        let Some(title) = strip_category_count(&text) else {
            continue;
        };
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        let url = join_url(base_url, href)?;
        jobs.push(JobRecord::new(district, title, url, PortalType::AppliTrack)?);
    }
    Ok(dedup_by_title(jobs))
}

#[async_trait]
impl PortalScraper for AppliTrackScraper {
    fn portal_type(&self) -> PortalType {
        PortalType::AppliTrack
    }

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let html = fetch_page(http, &endpoint.url).await?;
        parse_applitrack(&html, &endpoint.url, district)
    }
}

/// PowerSchool TalentEd (tedk12.com) portals: anchors whose href points at
/// a posting (`ViewJob`, `jobid`, `posting`), with a list-item fallback.
#[derive(Debug, Clone, Copy)]
pub struct PowerSchoolScraper;

fn href_looks_like_posting(href: &str) -> bool {
    let href = href.to_lowercase();
    href.contains("viewjob") || href.contains("jobid") || href.contains("posting")
}

pub fn parse_powerschool(
    html: &str,
    base_url: &str,
    district: &str,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let document = Html::parse_document(html);
    let anchors = parse_selector("a[href]")?;

    let mut jobs = Vec::new();
    for link in document.select(&anchors) {
        let Some(href) = link.value().attr("href") else {
            continue;
        };
        if !href_looks_like_posting(href) {
            continue;
        }
        let title = element_text(link);
        if title.len() <= 2 {
            continue;
        }
        let url = join_url(base_url, href)?;
        jobs.push(JobRecord::new(district, title, url, PortalType::PowerSchool)?);
    }

    if jobs.is_empty() {
        // Some districts render postings as plain list items instead.
        let list_links = parse_selector("li a[href]")?;
        for link in document.select(&list_links) {
            let Some(href) = link.value().attr("href") else {
                continue;
            };
            let lowered = href.to_lowercase();
            if !(lowered.contains("job") || lowered.contains("posting") || lowered.contains("position"))
            {
                continue;
            }
            let title = element_text(link);
            if title.len() <= 2 {
                continue;
            }
            let url = join_url(base_url, href)?;
            jobs.push(JobRecord::new(district, title, url, PortalType::PowerSchool)?);
        }
    }

    Ok(dedup_by_url(jobs))
}

#[async_trait]
impl PortalScraper for PowerSchoolScraper {
    fn portal_type(&self) -> PortalType {
        PortalType::PowerSchool
    }

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let html = fetch_page(http, &endpoint.url).await?;
        parse_powerschool(&html, &endpoint.url, district)
    }
}

/// PAEducator.net lists every district in the state on one board; rows are
/// matched by the district filter and the ` - District` suffix trimmed off
/// the title.
#[derive(Debug, Clone, Copy)]
pub struct PaEducatorScraper;

fn trim_district_suffix<'a>(title: &'a str, filter: &str) -> &'a str {
    if let Some((head, tail)) = title.rsplit_once(" - ") {
        if tail.to_lowercase().contains(&filter.to_lowercase()) {
            return head.trim();
        }
    }
    title
}

pub fn parse_paeducator(
    html: &str,
    base_url: &str,
    district: &str,
    filter: &str,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let document = Html::parse_document(html);
    let needle = filter.to_lowercase();

    let mut jobs = Vec::new();
    let job_links = parse_selector(r#"a[href*="/job/"], a[href*="/posting/"]"#)?;
    for link in document.select(&job_links) {
        let text = element_text(link);
        if text.len() <= 2 || text.len() >= 200 {
            continue;
        }
        let parent_text = link
            .parent()
            .and_then(ElementRef::wrap)
            .map(element_text)
            .unwrap_or_default();
        if !text.to_lowercase().contains(&needle) && !parent_text.to_lowercase().contains(&needle) {
            continue;
        }
        let href = link.value().attr("href").unwrap_or_default();
        let url = if href.is_empty() {
            base_url.to_string()
        } else {
            join_url(base_url, href)?
        };
        let title = trim_district_suffix(&text, filter);
        jobs.push(JobRecord::new(district, title, url, PortalType::PaEducator)?);
    }

    if jobs.is_empty() {
        // Row text fallback: any listing line that names the district.
        let rows = parse_selector("li, tr, p")?;
        for row in document.select(&rows) {
            let text = element_text(row);
            if text.len() <= 3 || text.len() >= 200 {
                continue;
            }
            if !text.to_lowercase().contains(&needle) {
                continue;
            }
            let title = trim_district_suffix(&text, filter);
            jobs.push(JobRecord::new(
                district,
                title,
                base_url,
                PortalType::PaEducator,
            )?);
        }
    }

    Ok(dedup_by_title(
        jobs.into_iter().filter(|j| j.title.len() > 3).collect(),
    ))
}

#[async_trait]
impl PortalScraper for PaEducatorScraper {
    fn portal_type(&self) -> PortalType {
        PortalType::PaEducator
    }

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let html = fetch_page(http, &endpoint.url).await?;
        let filter = endpoint.paeducator_filter.as_deref().unwrap_or(district);
        parse_paeducator(&html, &endpoint.url, district, filter)
    }
}

/// SchoolSpring renders postings in class-hinted containers; navigation
/// noise is filtered by a prefix/word blocklist.
#[derive(Debug, Clone, Copy)]
pub struct SchoolSpringScraper;

const NAV_NOISE_PREFIXES: &[&str] = &[
    "open in", "report", "terms", "privacy", "help", "contact", "sign in", "sign up", "log in",
    "register", "google", "maps", "http",
];

fn is_nav_noise(title: &str) -> bool {
    let lowered = title.to_lowercase();
    lowered.contains('@') || NAV_NOISE_PREFIXES.iter().any(|p| lowered.starts_with(p))
}

pub fn parse_schoolspring(
    html: &str,
    base_url: &str,
    district: &str,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let document = Html::parse_document(html);

    let mut jobs = Vec::new();
    let containers = parse_selector(
        r#"[class*="job"], [class*="posting"], [class*="position"], [class*="vacancy"]"#,
    )?;
    let heading = parse_selector(r#"h2, h3, h4, [class*="title"]"#)?;
    let anchor = parse_selector("a[href]")?;

    for container in document.select(&containers) {
        let Some(title_elem) = container.select(&heading).next() else {
            continue;
        };
        let title = element_text(title_elem);
        if title.len() <= 3 || title.len() >= 150 || is_nav_noise(&title) {
            continue;
        }
        let url = match container
            .select(&anchor)
            .next()
            .and_then(|a| a.value().attr("href"))
        {
            Some(href) => join_url(base_url, href)?,
            None => base_url.to_string(),
        };
        jobs.push(JobRecord::new(district, title, url, PortalType::SchoolSpring)?);
    }

    if jobs.is_empty() {
        let job_links =
            parse_selector(r#"a[href*="/job/"], a[href*="/posting/"], a[href*="jobID"]"#)?;
        for link in document.select(&job_links) {
            let title = element_text(link);
            if title.len() <= 3 || title.len() >= 150 || is_nav_noise(&title) {
                continue;
            }
            let href = link.value().attr("href").unwrap_or_default();
            let url = join_url(base_url, href)?;
            jobs.push(JobRecord::new(district, title, url, PortalType::SchoolSpring)?);
        }
    }

    Ok(dedup_by_title(jobs))
}

#[async_trait]
impl PortalScraper for SchoolSpringScraper {
    fn portal_type(&self) -> PortalType {
        PortalType::SchoolSpring
    }

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let html = fetch_page(http, &endpoint.url).await?;
        parse_schoolspring(&html, &endpoint.url, district)
    }
}

/// Custom district websites: generic link heuristics, since every district
/// rolls its own employment page.
#[derive(Debug, Clone, Copy)]
pub struct DistrictSiteScraper;

const JOB_LINK_KEYWORDS: &[&str] = &[
    "job",
    "position",
    "opening",
    "employment",
    "career",
    "vacancy",
    "hiring",
    "posting",
    "opportunity",
    "apply",
];

const ROLE_WORDS: &[&str] = &[
    "teacher",
    "principal",
    "secretary",
    "aide",
    "coach",
    "custodian",
    "driver",
    "nurse",
    "counselor",
    "specialist",
    "director",
    "coordinator",
    "assistant",
    "paraprofessional",
    "substitute",
    "tutor",
    "librarian",
    "technician",
];

const NAV_WORDS: &[&str] = &["home", "about", "contact", "login", "search"];

pub fn parse_district_site(
    html: &str,
    base_url: &str,
    district: &str,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let document = Html::parse_document(html);
    let anchors = parse_selector("a[href]")?;

    let mut jobs = Vec::new();
    for link in document.select(&anchors) {
        let title = element_text(link);
        let lowered = title.to_lowercase();
        if title.len() < 3 || title.len() > 200 || NAV_WORDS.contains(&lowered.as_str()) {
            continue;
        }
        let href = link.value().attr("href").unwrap_or_default();
        let href_lowered = href.to_lowercase();

        let is_job_link = JOB_LINK_KEYWORDS.iter().any(|kw| href_lowered.contains(kw));
        let is_job_text = JOB_LINK_KEYWORDS.iter().any(|kw| lowered.contains(kw));
        let is_job_title = ROLE_WORDS.iter().any(|kw| lowered.contains(kw));
        if !(is_job_link || is_job_text || is_job_title) {
            continue;
        }

        let url = join_url(base_url, href)?;
        jobs.push(JobRecord::new(district, title, url, PortalType::DistrictSite)?);
    }

    if jobs.is_empty() {
        let items = parse_selector("li")?;
        let anchor = parse_selector("a[href]")?;
        for item in document.select(&items) {
            let text = element_text(item);
            let lowered = text.to_lowercase();
            if !ROLE_WORDS.iter().any(|kw| lowered.contains(kw)) {
                continue;
            }
            let title: String = text.chars().take(100).collect();
            if title.len() < 3 {
                continue;
            }
            let url = match item
                .select(&anchor)
                .next()
                .and_then(|a| a.value().attr("href"))
            {
                Some(href) => join_url(base_url, href)?,
                None => base_url.to_string(),
            };
            jobs.push(JobRecord::new(district, title, url, PortalType::DistrictSite)?);
        }
    }

    Ok(dedup_by_title_and_url(jobs))
}

#[async_trait]
impl PortalScraper for DistrictSiteScraper {
    fn portal_type(&self) -> PortalType {
        PortalType::DistrictSite
    }

    async fn scrape(
        &self,
        http: &HttpClient,
        district: &str,
        endpoint: &PortalEndpoint,
    ) -> Result<Vec<JobRecord>, ScrapeError> {
        let html = fetch_page(http, &endpoint.url).await?;
        parse_district_site(&html, &endpoint.url, district)
    }
}

/// Scrape every portal endpoint of one district, in order.
pub async fn scrape_district(
    http: &HttpClient,
    district: &DistrictConfig,
) -> Result<Vec<JobRecord>, ScrapeError> {
    let mut jobs = Vec::new();
    for endpoint in &district.portals {
        let scraper = scraper_for(endpoint.portal_type);
        let found = scraper.scrape(http, &district.name, endpoint).await?;
        if found.is_empty() {
            warn!(district = %district.name, portal = %endpoint.portal_type, "portal returned no postings");
        }
        jobs.extend(found);
    }
    Ok(jobs)
}
