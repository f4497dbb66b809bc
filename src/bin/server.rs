use clap::{Parser, Subcommand};
use std::sync::Arc;
use tracing::{error, info, warn};
use tracing_appender::rolling;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

use webmonitor::db::{self, services::SeaOrmTaskStore};
use webmonitor::monitoring::extractor::HttpContentExtractor;
use webmonitor::monitoring::{MonitorScheduler, TaskRunner, TaskStore};
use webmonitor::notifications::{NotificationService, encryption::ChannelCipher};
use webmonitor::server::config::ServerConfig;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Path to the configuration file
    #[arg(short, long)]
    config: Option<String>,

    #[command(subcommand)]
    command: Option<Command>,
}

#[derive(Subcommand, Debug)]
enum Command {
    /// Run the scheduler until interrupted (default)
    Serve,
    /// Extract a task's content once without recording anything
    Probe { task_id: i32 },
    /// Run one full check of a task, including notifications
    ///
    /// Runs in this process only, outside any running `serve` scheduler's
    /// in-flight guard. Avoid it for a task that a live `serve` process may
    /// be checking at the same moment, or the change can be notified twice.
    Check { task_id: i32 },
}

fn init_logging(log_dir: &str) {
    // Log to a file: JSON format, daily rotation
    let file_appender = rolling::daily(log_dir, "webmonitor.log");
    let file_layer = fmt::layer()
        .with_writer(file_appender)
        .with_ansi(false)
        .json();

    // Log to stdout: human-readable format
    let stdout_layer = fmt::layer().with_writer(std::io::stdout);

    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new("info,sea_orm=warn,sqlx::query=warn"));

    tracing_subscriber::registry()
        .with(env_filter)
        .with(file_layer)
        .with(stdout_layer)
        .init();
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error + Send + Sync>> {
    let args = Args::parse();

    let config = match ServerConfig::load(args.config.as_deref()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("Failed to load configuration: {e}");
            return Err(e.into());
        }
    };

    init_logging(&config.log_dir);
    info!("Starting webmonitor, version: {}", VERSION);

    // --- Database ---
    let db = Arc::new(db::connect(&config.database_url).await?);
    db::ensure_schema(&db).await?;

    // --- Notifications ---
    let cipher = Arc::new(ChannelCipher::from_hex(&config.notification_encryption_key)?);
    let fallback = config.smtp_fallback();
    if fallback.is_none() {
        warn!("SMTP fallback not configured; users without a channel will not be notified.");
    }
    let notifier = Arc::new(NotificationService::new(
        db.clone(),
        cipher,
        fallback,
        config.runner_settings().notify_timeout,
    )?);

    // --- Monitoring ---
    let store: Arc<dyn TaskStore> = Arc::new(SeaOrmTaskStore::new(db.clone()));
    let extractor = Arc::new(HttpContentExtractor::new(config.extractor_settings())?);
    let runner = Arc::new(TaskRunner::new(
        store.clone(),
        extractor,
        notifier,
        config.runner_settings(),
    ));

    match args.command.unwrap_or(Command::Serve) {
        Command::Probe { task_id } => {
            let extraction = runner.probe(task_id).await?;
            info!(task_id, title = %extraction.title, "Probe succeeded.");
            println!("{}", extraction.content);
        }
        Command::Check { task_id } => {
            let outcome = runner.run_check(task_id).await;
            info!(task_id, ?outcome, "Check complete.");
        }
        Command::Serve => {
            let scheduler = Arc::new(MonitorScheduler::new(
                store,
                runner,
                config.scheduler_settings(),
            ));
            let report = match scheduler.start().await {
                Ok(report) => report,
                Err(e) => {
                    error!(error = %e, "Failed to start scheduler.");
                    return Err(e.into());
                }
            };
            info!(timers = report.added, "Monitoring started.");

            tokio::signal::ctrl_c().await?;
            info!("Shutdown signal received, stopping scheduler.");
            if scheduler.shutdown(config.shutdown_grace()).await {
                info!("All running checks finished.");
            } else {
                warn!(
                    in_flight = scheduler.in_flight_count(),
                    "Exiting with checks still running."
                );
            }
        }
    }

    Ok(())
}
