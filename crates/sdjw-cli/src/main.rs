use std::collections::BTreeMap;
use std::io::Write;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::{bail, Context, Result};
use chrono::Utc;
use clap::{Parser, Subcommand, ValueEnum};
use sdjw_adapters::DistrictRegistry;
use sdjw_core::{filter, JobRecord, RunSource, RunStatus};
use sdjw_notify::{canned_test_job, Notifier, NotifySettings};
use sdjw_notify::NotificationSender;
use sdjw_storage::{FileStore, HttpClient, HttpClientConfig, JobStore, PgStore};
use sdjw_sync::{PortalBatchSource, ScrapeRunner, WatchConfig};
use serde::Serialize;
use tracing_subscriber::EnvFilter;

#[derive(Debug, Parser)]
#[command(name = "sdjw")]
#[command(about = "School District Job Watch command-line interface")]
struct Cli {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
enum StoreKind {
    File,
    Postgres,
}

#[derive(Debug, Subcommand)]
enum Commands {
    /// One-off scrape with a printed summary, outside the watch lifecycle
    Scrape {
        /// Path to the district registry
        #[arg(short, long, default_value = "districts.yaml")]
        config: PathBuf,
        /// Output JSON file path (default: jobs_TIMESTAMP.json)
        #[arg(short, long)]
        output: Option<PathBuf>,
        /// Scrape only districts whose name contains this text
        #[arg(short, long)]
        district: Option<String>,
        /// List every job title in the output
        #[arg(short, long)]
        list: bool,
        /// Suppress progress output
        #[arg(short, long)]
        quiet: bool,
        /// Do not save results to a file
        #[arg(long)]
        no_save: bool,
        /// Only keep middle/high school social studies positions
        #[arg(long)]
        social_studies: bool,
    },
    /// Scrape, reconcile against the stored snapshot, and notify
    Watch {
        #[arg(long, value_enum, default_value_t = StoreKind::File)]
        store: StoreKind,
        /// Tag the run as manually triggered instead of scheduled
        #[arg(long)]
        manual: bool,
        /// Skip the social-studies filter for this run
        #[arg(long)]
        no_filter: bool,
    },
    /// Apply Postgres migrations
    Migrate,
    /// Serve the read-only dashboard
    Serve {
        #[arg(long, default_value_t = 8000)]
        port: u16,
    },
    /// Send a canned notification through every configured channel
    TestNotify,
    /// Interactive notification + scheduling setup
    Setup,
}

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .init();

    let cli = Cli::parse();
    match cli.command {
        Commands::Scrape {
            config,
            output,
            district,
            list,
            quiet,
            no_save,
            social_studies,
        } => {
            scrape_command(config, output, district, list, quiet, no_save, social_studies).await
        }
        Commands::Watch {
            store,
            manual,
            no_filter,
        } => watch_command(store, manual, no_filter).await,
        Commands::Migrate => migrate_command().await,
        Commands::Serve { port } => {
            let store = sdjw_web::store_from_env().await?;
            sdjw_web::serve(store, port).await
        }
        Commands::TestNotify => test_notify_command().await,
        Commands::Setup => setup_command(),
    }
}

#[derive(Debug, Serialize)]
struct ScrapeOutput<'a> {
    scraped_at: chrono::DateTime<Utc>,
    total_jobs: usize,
    jobs: &'a [JobRecord],
}

#[allow(clippy::too_many_arguments)]
async fn scrape_command(
    config: PathBuf,
    output: Option<PathBuf>,
    district: Option<String>,
    list: bool,
    quiet: bool,
    no_save: bool,
    social_studies: bool,
) -> Result<()> {
    let registry = DistrictRegistry::load(&config)?;

    let districts = match &district {
        Some(needle) => {
            let matching = registry.matching(needle);
            if matching.is_empty() {
                eprintln!("No district found matching '{needle}'");
                eprintln!("Available districts:");
                for name in registry.district_names() {
                    eprintln!("  - {name}");
                }
                bail!("no district matched '{needle}'");
            }
            matching
        }
        None => registry.districts.clone(),
    };

    let http = HttpClient::new(HttpClientConfig::default())?;
    let mut jobs = sdjw_sync::collect_once(&http, &districts, quiet).await?;

    if social_studies {
        jobs = filter::apply(jobs);
        if !quiet {
            println!("\nFiltered to middle/high school social studies positions");
        }
    }

    print_summary(&jobs);
    if list {
        print_jobs(&jobs);
    }

    if !no_save {
        let path = output.unwrap_or_else(|| {
            PathBuf::from(format!("jobs_{}.json", Utc::now().format("%Y%m%d_%H%M%S")))
        });
        let doc = ScrapeOutput {
            scraped_at: Utc::now(),
            total_jobs: jobs.len(),
            jobs: &jobs,
        };
        let text = serde_json::to_string_pretty(&doc)?;
        std::fs::write(&path, text).with_context(|| format!("writing {}", path.display()))?;
        println!("\nResults saved to: {}", path.display());
    }

    Ok(())
}

fn print_summary(jobs: &[JobRecord]) {
    println!("\n{}", "=".repeat(60));
    println!("SCRAPING COMPLETE");
    println!("{}", "=".repeat(60));
    println!("\nTotal jobs found: {}", jobs.len());

    let mut by_district = BTreeMap::<&str, usize>::new();
    for job in jobs {
        *by_district.entry(job.district.as_str()).or_default() += 1;
    }
    println!("\nJobs by district:");
    for (district, count) in by_district {
        println!("  {district}: {count}");
    }

    let mut by_portal = BTreeMap::<String, usize>::new();
    for job in jobs {
        *by_portal.entry(job.portal_type.to_string()).or_default() += 1;
    }
    println!("\nJobs by portal type:");
    for (portal, count) in by_portal {
        println!("  {portal}: {count}");
    }
}

fn print_jobs(jobs: &[JobRecord]) {
    println!("\n{}", "=".repeat(60));
    println!("JOB LISTINGS");
    println!("{}", "=".repeat(60));

    let mut sorted: Vec<_> = jobs.iter().collect();
    sorted.sort_by(|a, b| a.district.cmp(&b.district));

    let mut current_district = "";
    for job in sorted {
        if job.district != current_district {
            current_district = &job.district;
            println!("\n--- {current_district} ---");
        }
        println!("  * {}", job.title);
        println!("    {}", job.url);
    }
}

async fn watch_command(store_kind: StoreKind, manual: bool, no_filter: bool) -> Result<()> {
    let config = WatchConfig::from_env();
    let registry = DistrictRegistry::load(&config.districts_path)?;

    let http = HttpClient::new(HttpClientConfig {
        timeout: Duration::from_secs(config.http_timeout_secs),
        user_agent: config.user_agent.clone(),
    })?;

    let store: Arc<dyn JobStore> = match store_kind {
        StoreKind::File => Arc::new(FileStore::new(&config.data_dir)),
        StoreKind::Postgres => {
            let url = config
                .database_url
                .as_deref()
                .context("DATABASE_URL must be set for --store postgres")?;
            Arc::new(PgStore::connect(url).await?)
        }
    };

    let notifier = Arc::new(Notifier::new(NotifySettings::from_env(), http.clone()));
    let runner = ScrapeRunner::new(
        Box::new(PortalBatchSource::new(http, registry)),
        store,
        notifier,
        config.filter_enabled && !no_filter,
    );

    let source = if manual {
        RunSource::Manual
    } else {
        RunSource::Scheduled
    };
    let summary = runner.run_once(source).await?;

    println!(
        "run {}: status={} total={} new={} notified={}",
        summary.run_id,
        summary.status.as_str(),
        summary.total_jobs,
        summary.new_jobs,
        summary.notified,
    );
    if let Some(error) = &summary.error {
        println!("  error: {error}");
    }
    if summary.status == RunStatus::Failed {
        bail!("scrape run failed");
    }
    Ok(())
}

async fn migrate_command() -> Result<()> {
    let url = std::env::var("DATABASE_URL").context("DATABASE_URL must be set to migrate")?;
    let store = PgStore::connect(&url).await?;
    store.migrate().await?;
    println!("migrations applied");
    Ok(())
}

async fn test_notify_command() -> Result<()> {
    let settings = NotifySettings::from_env();
    if !settings.any_channel_configured() {
        bail!("no notification channels configured; set EMAIL_FROM/EMAIL_PASSWORD and/or NTFY_TOPIC");
    }

    let http = HttpClient::new(HttpClientConfig::default())?;
    let notifier = Notifier::new(settings, http);
    let outcomes = notifier.dispatch(&[canned_test_job(Utc::now())]).await;

    println!("Results:");
    for outcome in outcomes {
        match outcome.error {
            None => println!("  {}: ok", outcome.channel.as_str()),
            Some(error) => println!("  {}: failed ({error})", outcome.channel.as_str()),
        }
    }
    Ok(())
}

fn prompt(label: &str) -> Result<Option<String>> {
    print!("{label}");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    let trimmed = line.trim();
    if trimmed.is_empty() {
        Ok(None)
    } else {
        Ok(Some(trimmed.to_string()))
    }
}

fn setup_command() -> Result<()> {
    println!("School District Job Watch - Notification Setup");
    println!("{}", "=".repeat(60));

    let mut lines = Vec::new();

    println!("\nEMAIL SETUP");
    println!("To use Gmail, create an App Password at");
    println!("https://myaccount.google.com/apppasswords\n");
    if let Some(from) = prompt("Gmail address (Enter to skip): ")? {
        let to = prompt(&format!("Send notifications to [{from}]: "))?.unwrap_or_else(|| from.clone());
        let password = prompt("Gmail App Password: ")?.unwrap_or_default();
        lines.push(format!("EMAIL_FROM={from}"));
        lines.push(format!("EMAIL_TO={to}"));
        lines.push(format!("EMAIL_PASSWORD={password}"));
    }

    println!("\nPHONE NOTIFICATION SETUP (ntfy.sh)");
    println!("Install the ntfy app and subscribe to a unique topic name.\n");
    if let Some(topic) = prompt("ntfy topic name (Enter to skip): ")? {
        lines.push(format!("NTFY_TOPIC={topic}"));
    }

    if lines.is_empty() {
        println!("\nNo notifications configured.");
        return Ok(());
    }

    let env_path = PathBuf::from("sdjw.env");
    std::fs::write(&env_path, lines.join("\n") + "\n")
        .with_context(|| format!("writing {}", env_path.display()))?;
    #[cfg(unix)]
    {
        use std::os::unix::fs::PermissionsExt;
        std::fs::set_permissions(&env_path, std::fs::Permissions::from_mode(0o600))?;
    }
    println!("\nSettings saved to {}", env_path.display());

    println!("\nSCHEDULING");
    println!("Runs are triggered externally. To check twice daily, add to crontab:");
    println!("  0 7,18 * * * cd {} && set -a && . ./sdjw.env && sdjw watch", std::env::current_dir()?.display());
    println!("\nUseful commands:");
    println!("  sdjw watch          run once against the file store");
    println!("  sdjw test-notify    verify the notification configuration");
    println!("  sdjw serve          start the dashboard");
    Ok(())
}
