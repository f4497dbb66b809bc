use serde::Deserialize;
use std::fs;
use std::path::Path;
use std::time::Duration;

use crate::monitoring::extractor::ExtractorSettings;
use crate::monitoring::tasks::TaskLimits;
use crate::monitoring::{FirstCheck, RunnerSettings, SchedulerSettings};
use crate::notifications::ChannelConfig;

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub database_url: String,
    pub log_dir: String,
    pub notification_encryption_key: String,

    // SMTP fallback used when a user has no notification channel.
    pub smtp_server: Option<String>,
    pub smtp_port: u16,
    pub smtp_user: Option<String>,
    pub smtp_password: Option<String>,
    pub receiver_email: Option<String>,
    pub smtp_ssl: bool,

    pub min_interval_seconds: i32,
    pub max_interval_seconds: i32,
    pub default_interval_seconds: i32,
    pub fetch_timeout_seconds: u64,
    pub element_wait_seconds: u64,
    pub notify_timeout_seconds: u64,
    pub reconcile_interval_seconds: u64,
    pub shutdown_grace_seconds: u64,
    pub max_subscriptions_per_user: u64,
    /// Check every task once right when its timer is created.
    pub check_on_schedule: bool,
    pub user_agent: String,
}

// Partial config for layering
#[derive(Deserialize, Default, Debug)]
struct PartialServerConfig {
    database_url: Option<String>,
    log_dir: Option<String>,
    notification_encryption_key: Option<String>,
    smtp_server: Option<String>,
    smtp_port: Option<u16>,
    smtp_user: Option<String>,
    smtp_password: Option<String>,
    receiver_email: Option<String>,
    smtp_ssl: Option<bool>,
    min_interval_seconds: Option<i32>,
    max_interval_seconds: Option<i32>,
    default_interval_seconds: Option<i32>,
    fetch_timeout_seconds: Option<u64>,
    element_wait_seconds: Option<u64>,
    notify_timeout_seconds: Option<u64>,
    reconcile_interval_seconds: Option<u64>,
    shutdown_grace_seconds: Option<u64>,
    max_subscriptions_per_user: Option<u64>,
    check_on_schedule: Option<bool>,
    user_agent: Option<String>,
}

fn default_log_dir() -> String {
    "logs".to_string()
}

fn default_notification_key() -> String {
    // Development key only. Production deployments must override it.
    "000102030405060708090a0b0c0d0e0f101112131415161718191a1b1c1d1e1f".to_string()
}

fn default_user_agent() -> String {
    format!("Mozilla/5.0 (compatible; webmonitor/{})", env!("CARGO_PKG_VERSION"))
}

impl ServerConfig {
    /// Loads configuration: `.env`, then the optional TOML file, then
    /// environment variables, later layers overriding earlier ones.
    pub fn load(config_path: Option<&str>) -> Result<Self, String> {
        dotenv::dotenv().ok();

        let file_config = match config_path {
            Some(path) => read_file(Path::new(path))?,
            None => PartialServerConfig::default(),
        };

        let env_config: PartialServerConfig = envy::from_env::<PartialServerConfig>()
            .map_err(|e| format!("Failed to load config from environment: {e}"))?;

        merge(env_config, file_config)
    }

    /// The SMTP fallback channel, when fully configured.
    pub fn smtp_fallback(&self) -> Option<ChannelConfig> {
        Some(ChannelConfig::Email {
            smtp_server: self.smtp_server.clone()?,
            smtp_port: self.smtp_port,
            smtp_user: self.smtp_user.clone()?,
            smtp_password: self.smtp_password.clone()?,
            receiver_email: self.receiver_email.clone()?,
            is_ssl: self.smtp_ssl,
        })
    }

    pub fn task_limits(&self) -> TaskLimits {
        TaskLimits {
            min_interval_seconds: self.min_interval_seconds,
            max_interval_seconds: self.max_interval_seconds,
            default_interval_seconds: self.default_interval_seconds,
        }
    }

    pub fn runner_settings(&self) -> RunnerSettings {
        RunnerSettings {
            fetch_timeout: Duration::from_secs(self.fetch_timeout_seconds),
            notify_timeout: Duration::from_secs(self.notify_timeout_seconds),
        }
    }

    pub fn scheduler_settings(&self) -> SchedulerSettings {
        SchedulerSettings {
            reconcile_interval: Duration::from_secs(self.reconcile_interval_seconds.max(1)),
            first_check: if self.check_on_schedule {
                FirstCheck::Immediate
            } else {
                FirstCheck::AfterInterval
            },
        }
    }

    pub fn extractor_settings(&self) -> ExtractorSettings {
        ExtractorSettings {
            element_wait: Duration::from_secs(self.element_wait_seconds),
            user_agent: self.user_agent.clone(),
            ..Default::default()
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace_seconds)
    }
}

fn read_file(path: &Path) -> Result<PartialServerConfig, String> {
    if !path.exists() {
        return Ok(PartialServerConfig::default());
    }
    let contents = fs::read_to_string(path)
        .map_err(|e| format!("Failed to read config file at {path:?}: {e}"))?;
    toml::from_str(&contents)
        .map_err(|e| format!("Failed to parse TOML from config file at {path:?}: {e}"))
}

// Environment overrides file.
fn merge(env: PartialServerConfig, file: PartialServerConfig) -> Result<ServerConfig, String> {
    let config = ServerConfig {
        database_url: env
            .database_url
            .or(file.database_url)
            .ok_or("DATABASE_URL is required")?,
        log_dir: env.log_dir.or(file.log_dir).unwrap_or_else(default_log_dir),
        notification_encryption_key: env
            .notification_encryption_key
            .or(file.notification_encryption_key)
            .unwrap_or_else(default_notification_key),
        smtp_server: env.smtp_server.or(file.smtp_server),
        smtp_port: env.smtp_port.or(file.smtp_port).unwrap_or(465),
        smtp_user: env.smtp_user.or(file.smtp_user),
        smtp_password: env.smtp_password.or(file.smtp_password),
        receiver_email: env.receiver_email.or(file.receiver_email),
        smtp_ssl: env.smtp_ssl.or(file.smtp_ssl).unwrap_or(true),
        min_interval_seconds: env
            .min_interval_seconds
            .or(file.min_interval_seconds)
            .unwrap_or(10),
        max_interval_seconds: env
            .max_interval_seconds
            .or(file.max_interval_seconds)
            .unwrap_or(86_400),
        default_interval_seconds: env
            .default_interval_seconds
            .or(file.default_interval_seconds)
            .unwrap_or(300),
        fetch_timeout_seconds: env
            .fetch_timeout_seconds
            .or(file.fetch_timeout_seconds)
            .unwrap_or(60),
        element_wait_seconds: env
            .element_wait_seconds
            .or(file.element_wait_seconds)
            .unwrap_or(20),
        notify_timeout_seconds: env
            .notify_timeout_seconds
            .or(file.notify_timeout_seconds)
            .unwrap_or(30),
        reconcile_interval_seconds: env
            .reconcile_interval_seconds
            .or(file.reconcile_interval_seconds)
            .unwrap_or(300),
        shutdown_grace_seconds: env
            .shutdown_grace_seconds
            .or(file.shutdown_grace_seconds)
            .unwrap_or(30),
        max_subscriptions_per_user: env
            .max_subscriptions_per_user
            .or(file.max_subscriptions_per_user)
            .unwrap_or(20),
        check_on_schedule: env
            .check_on_schedule
            .or(file.check_on_schedule)
            .unwrap_or(false),
        user_agent: env
            .user_agent
            .or(file.user_agent)
            .unwrap_or_else(default_user_agent),
    };

    if config.min_interval_seconds < 1 {
        return Err("MIN_INTERVAL_SECONDS must be at least 1".to_string());
    }
    if !(config.min_interval_seconds..=config.max_interval_seconds)
        .contains(&config.default_interval_seconds)
    {
        return Err(format!(
            "DEFAULT_INTERVAL_SECONDS ({}) must lie between MIN_INTERVAL_SECONDS ({}) and MAX_INTERVAL_SECONDS ({})",
            config.default_interval_seconds,
            config.min_interval_seconds,
            config.max_interval_seconds
        ));
    }
    Ok(config)
}
