//! Email and push notification senders.
//!
//! Two channels: a multipart plain+HTML email over SMTP TLS and an
//! ntfy.sh topic POST. A channel is attempted only when configured, and
//! per-channel outcomes are reported back so the caller can decide whether
//! the dispatch as a whole counted as delivered.

use async_trait::async_trait;
use lettre::message::MultiPart;
use lettre::transport::smtp::authentication::Credentials;
use lettre::{AsyncSmtpTransport, AsyncTransport, Message, Tokio1Executor};
use sdjw_core::{JobRecord, NotificationChannel, PersistedJob, PortalType};
use sdjw_storage::{FetchError, HttpClient};
use thiserror::Error;
use tracing::{info, warn};

pub const CRATE_NAME: &str = "sdjw-notify";

const NTFY_BASE_URL: &str = "https://ntfy.sh";

/// Push bodies list at most this many jobs before eliding the rest.
const PUSH_JOB_LIMIT: usize = 5;

#[derive(Debug, Error)]
pub enum NotifyError {
    #[error("invalid email address: {0}")]
    Address(#[from] lettre::address::AddressError),
    #[error("building email: {0}")]
    Email(#[from] lettre::error::Error),
    #[error("smtp: {0}")]
    Smtp(#[from] lettre::transport::smtp::Error),
    #[error("push: {0}")]
    Push(#[from] FetchError),
}

#[derive(Debug, Clone)]
pub struct EmailSettings {
    pub from: String,
    pub to: String,
    pub password: String,
    pub smtp_host: String,
}

#[derive(Debug, Clone, Default)]
pub struct NotifySettings {
    pub email: Option<EmailSettings>,
    pub ntfy_topic: Option<String>,
}

impl NotifySettings {
    /// EMAIL_FROM / EMAIL_TO / EMAIL_PASSWORD configure the email channel
    /// (EMAIL_TO defaults to EMAIL_FROM, SMTP_HOST to Gmail); NTFY_TOPIC
    /// configures push. Unset variables leave that channel off.
    pub fn from_env() -> Self {
        let email = match (std::env::var("EMAIL_FROM"), std::env::var("EMAIL_PASSWORD")) {
            (Ok(from), Ok(password)) => Some(EmailSettings {
                to: std::env::var("EMAIL_TO").unwrap_or_else(|_| from.clone()),
                smtp_host: std::env::var("SMTP_HOST")
                    .unwrap_or_else(|_| "smtp.gmail.com".to_string()),
                from,
                password,
            }),
            _ => None,
        };
        Self {
            email,
            ntfy_topic: std::env::var("NTFY_TOPIC").ok(),
        }
    }

    pub fn any_channel_configured(&self) -> bool {
        self.email.is_some() || self.ntfy_topic.is_some()
    }
}

/// Result of one channel's dispatch attempt.
#[derive(Debug, Clone)]
pub struct ChannelOutcome {
    pub channel: NotificationChannel,
    pub success: bool,
    pub error: Option<String>,
}

#[async_trait]
pub trait NotificationSender: Send + Sync {
    fn is_configured(&self) -> bool;

    /// Attempt every configured channel; one outcome per attempt.
    async fn dispatch(&self, jobs: &[PersistedJob]) -> Vec<ChannelOutcome>;
}

pub struct Notifier {
    settings: NotifySettings,
    http: HttpClient,
}

impl Notifier {
    pub fn new(settings: NotifySettings, http: HttpClient) -> Self {
        Self { settings, http }
    }

    async fn send_email(&self, jobs: &[PersistedJob]) -> Result<(), NotifyError> {
        let email = self
            .settings
            .email
            .as_ref()
            .expect("email channel checked before dispatch");

        let message = Message::builder()
            .from(email.from.parse()?)
            .to(email.to.parse()?)
            .subject(email_subject(jobs.len()))
            .multipart(MultiPart::alternative_plain_html(
                email_text_body(jobs),
                email_html_body(jobs),
            ))?;

        let mailer = AsyncSmtpTransport::<Tokio1Executor>::relay(&email.smtp_host)?
            .credentials(Credentials::new(email.from.clone(), email.password.clone()))
            .build();
        mailer.send(message).await?;
        info!(to = %email.to, jobs = jobs.len(), "notification email sent");
        Ok(())
    }

    async fn send_push(&self, jobs: &[PersistedJob]) -> Result<(), NotifyError> {
        let topic = self
            .settings
            .ntfy_topic
            .as_ref()
            .expect("push channel checked before dispatch");

        let url = format!("{NTFY_BASE_URL}/{topic}");
        let title = push_title(jobs.len());
        self.http
            .post_bytes(
                &url,
                &[
                    ("Title", title.as_str()),
                    ("Priority", "high"),
                    ("Tags", "mortar_board,briefcase"),
                ],
                push_body(jobs).into_bytes(),
            )
            .await?;
        info!(topic = %topic, jobs = jobs.len(), "push notification sent");
        Ok(())
    }
}

#[async_trait]
impl NotificationSender for Notifier {
    fn is_configured(&self) -> bool {
        self.settings.any_channel_configured()
    }

    async fn dispatch(&self, jobs: &[PersistedJob]) -> Vec<ChannelOutcome> {
        let mut outcomes = Vec::new();

        if self.settings.email.is_some() {
            let result = self.send_email(jobs).await;
            if let Err(err) = &result {
                warn!(error = %err, "email dispatch failed");
            }
            outcomes.push(ChannelOutcome {
                channel: NotificationChannel::Email,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        if self.settings.ntfy_topic.is_some() {
            let result = self.send_push(jobs).await;
            if let Err(err) = &result {
                warn!(error = %err, "push dispatch failed");
            }
            outcomes.push(ChannelOutcome {
                channel: NotificationChannel::Push,
                success: result.is_ok(),
                error: result.err().map(|e| e.to_string()),
            });
        }

        outcomes
    }
}

pub fn email_subject(count: usize) -> String {
    format!("{count} Social Studies Teaching Position(s) Found!")
}

pub fn email_text_body(jobs: &[PersistedJob]) -> String {
    let mut body = format!(
        "Found {} new social studies teaching position(s):\n\n",
        jobs.len()
    );
    for job in jobs {
        body.push_str(&format!(
            "* {}\n  District: {}\n  URL: {}\n\n",
            job.title, job.district, job.url
        ));
    }
    body
}

pub fn email_html_body(jobs: &[PersistedJob]) -> String {
    let mut body = format!(
        "<html><body><h2>{} Social Studies Teaching Position(s) Found!</h2>\
         <p>The following positions match your criteria:</p><ul>",
        jobs.len()
    );
    for job in jobs {
        body.push_str(&format!(
            "<li><strong>{}</strong><br>District: {}<br><a href=\"{}\">View Posting</a></li>",
            job.title, job.district, job.url
        ));
    }
    body.push_str("</ul><p><em>Sent by School District Job Watch</em></p></body></html>");
    body
}

pub fn push_title(count: usize) -> String {
    format!("{count} Social Studies Position(s) Found!")
}

pub fn push_body(jobs: &[PersistedJob]) -> String {
    let mut body = String::new();
    for job in jobs.iter().take(PUSH_JOB_LIMIT) {
        body.push_str(&format!("* {} ({})\n", job.title, job.district));
    }
    if jobs.len() > PUSH_JOB_LIMIT {
        body.push_str(&format!("\n... and {} more", jobs.len() - PUSH_JOB_LIMIT));
    }
    body
}

/// Canned posting for `test-notify`, so a configuration check never has to
/// wait for a real new job.
pub fn canned_test_job(now: chrono::DateTime<chrono::Utc>) -> PersistedJob {
    let record = JobRecord::new(
        "Test District",
        "Test: Social Studies Teacher Position",
        "https://example.com/test-job",
        PortalType::DistrictSite,
    )
    .expect("canned record is well-formed");
    PersistedJob::first_observed(&record, now)
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{TimeZone, Utc};

    fn job(title: &str, district: &str) -> PersistedJob {
        let record = JobRecord::new(
            district,
            title,
            "https://example.org/posting",
            PortalType::PowerSchool,
        )
        .unwrap();
        PersistedJob::first_observed(&record, Utc.with_ymd_and_hms(2026, 8, 7, 7, 0, 0).unwrap())
    }

    #[test]
    fn email_bodies_list_every_job() {
        let jobs = vec![
            job("Social Studies Teacher - High School", "Mt. Lebanon"),
            job("History Teacher, Grades 6-12", "Bethel Park"),
        ];
        let text = email_text_body(&jobs);
        assert!(text.contains("Found 2 new social studies teaching position(s)"));
        assert!(text.contains("Social Studies Teacher - High School"));
        assert!(text.contains("District: Bethel Park"));

        let html = email_html_body(&jobs);
        assert!(html.contains("<strong>History Teacher, Grades 6-12</strong>"));
        assert!(html.contains("https://example.org/posting"));
    }

    #[test]
    fn push_body_caps_at_five_jobs() {
        let jobs: Vec<_> = (0..7)
            .map(|i| job(&format!("Civics Teacher {i}"), "Plum Borough"))
            .collect();
        let body = push_body(&jobs);
        assert_eq!(body.matches("* ").count(), 5);
        assert!(body.contains("... and 2 more"));

        let short = push_body(&jobs[..3]);
        assert!(!short.contains("more"));
    }

    #[test]
    fn unset_env_leaves_channels_off() {
        let settings = NotifySettings::default();
        assert!(!settings.any_channel_configured());
    }
}
