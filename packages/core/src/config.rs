use std::env;
use std::fmt;
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;

use crate::cli::Cli;

pub const DEFAULT_DATABASE_URL: &str = "sqlite://wids-aggregator.db?mode=rwc";
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:8081";
pub const DEFAULT_AGGREGATION_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_INSPECTION_INTERVAL_MS: u64 = 5_000;
pub const DEFAULT_NOTIFICATION_COOLDOWN_SECONDS: f64 = 3_600.0;
pub const DEFAULT_SMTP_PORT: u16 = 465;

#[derive(Clone)]
pub struct Config {
    pub database_url: String,
    pub bind_address: SocketAddr,
    pub aggregation_interval: Duration,
    pub inspection_interval: Duration,
    pub retention_interval: Duration,
    pub notification_cooldown_seconds: f64,
    /// `None` means fan-out is unbounded.
    pub fanout_concurrency: Option<usize>,
    pub origin_url: Option<String>,
    pub retention_url: Option<String>,
    pub retention_directory: Option<PathBuf>,
    pub smtp: Option<SmtpConfig>,
    pub webhook_url: Option<String>,
    // Unset RETENTION_INTERVAL_MS follows the aggregation interval,
    // including a CLI override of it.
    retention_interval_explicit: bool,
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Config")
            .field("database_url", &self.database_url)
            .field("bind_address", &self.bind_address)
            .field("aggregation_interval", &self.aggregation_interval)
            .field("inspection_interval", &self.inspection_interval)
            .field("retention_interval", &self.retention_interval)
            .field("notification_cooldown_seconds", &self.notification_cooldown_seconds)
            .field("fanout_concurrency", &self.fanout_concurrency)
            .field("origin_url", &self.origin_url)
            .field("retention_url", &self.retention_url)
            .field("retention_directory", &self.retention_directory)
            .field("smtp", &self.smtp)
            // Webhook URLs usually embed an access token.
            .field("webhook_url", &self.webhook_url.as_ref().map(|_| "<redacted>"))
            .finish()
    }
}

/// SMTP relay settings for the email digest.
#[derive(Clone)]
pub struct SmtpConfig {
    pub host: String,
    pub port: u16,
    pub username: Option<String>,
    pub password: Option<String>,
    pub from: String,
    pub to: String,
}

impl fmt::Debug for SmtpConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SmtpConfig")
            .field("host", &self.host)
            .field("port", &self.port)
            .field("username", &self.username)
            .field("password", &self.password.as_ref().map(|_| "<redacted>"))
            .field("from", &self.from)
            .field("to", &self.to)
            .finish()
    }
}

impl Config {
    pub fn from_env() -> Result<Self, String> {
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build the config from an arbitrary variable source. Empty values
    /// count as unset.
    pub fn from_lookup<F>(lookup: F) -> Result<Self, String>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

        let database_url = get("DATABASE_URL").unwrap_or_else(|| DEFAULT_DATABASE_URL.to_string());

        let bind_address = get("BIND_ADDRESS")
            .unwrap_or_else(|| DEFAULT_BIND_ADDRESS.to_string())
            .parse::<SocketAddr>()
            .map_err(|_| "BIND_ADDRESS must be a valid socket address")?;

        let aggregation_interval = Duration::from_millis(parse_millis(
            get("AGGREGATION_INTERVAL_MS"),
            "AGGREGATION_INTERVAL_MS",
            DEFAULT_AGGREGATION_INTERVAL_MS,
        )?);

        let inspection_interval = Duration::from_millis(parse_millis(
            get("INSPECTION_INTERVAL_MS"),
            "INSPECTION_INTERVAL_MS",
            DEFAULT_INSPECTION_INTERVAL_MS,
        )?);

        let retention_interval_explicit = get("RETENTION_INTERVAL_MS").is_some();
        let retention_interval = match get("RETENTION_INTERVAL_MS") {
            Some(raw) => Duration::from_millis(parse_millis(
                Some(raw),
                "RETENTION_INTERVAL_MS",
                DEFAULT_AGGREGATION_INTERVAL_MS,
            )?),
            None => aggregation_interval,
        };

        let notification_cooldown_seconds = match get("NOTIFICATION_COOLDOWN_SECONDS") {
            Some(raw) => {
                let value = raw
                    .parse::<f64>()
                    .map_err(|_| "NOTIFICATION_COOLDOWN_SECONDS must be a valid number")?;
                if !value.is_finite() || value < 0.0 {
                    return Err("NOTIFICATION_COOLDOWN_SECONDS must be a non-negative number".into());
                }
                value
            }
            None => DEFAULT_NOTIFICATION_COOLDOWN_SECONDS,
        };

        let fanout_concurrency = match get("FANOUT_CONCURRENCY") {
            Some(raw) => {
                let limit = raw
                    .parse::<usize>()
                    .map_err(|_| "FANOUT_CONCURRENCY must be a valid number")?;
                (limit > 0).then_some(limit)
            }
            None => None,
        };

        let smtp = match (get("SMTP_HOST"), get("ALERT_EMAIL_FROM"), get("ALERT_EMAIL_TO")) {
            (Some(host), Some(from), Some(to)) => {
                let port = match get("SMTP_PORT") {
                    Some(raw) => raw
                        .parse::<u16>()
                        .map_err(|_| "SMTP_PORT must be a valid port number")?,
                    None => DEFAULT_SMTP_PORT,
                };
                Some(SmtpConfig {
                    host,
                    port,
                    username: get("SMTP_USERNAME"),
                    password: get("SMTP_PASSWORD"),
                    from,
                    to,
                })
            }
            (None, None, None) => None,
            _ => {
                return Err(
                    "SMTP_HOST, ALERT_EMAIL_FROM and ALERT_EMAIL_TO must be set together".into(),
                )
            }
        };

        Ok(Self {
            database_url,
            bind_address,
            aggregation_interval,
            inspection_interval,
            retention_interval,
            notification_cooldown_seconds,
            fanout_concurrency,
            origin_url: get("ORIGIN_URL"),
            retention_url: get("RETENTION_URL").map(|url| url.trim_end_matches('/').to_string()),
            retention_directory: get("RETENTION_DIRECTORY").map(PathBuf::from),
            smtp,
            webhook_url: get("ALERT_WEBHOOK_URL"),
            retention_interval_explicit,
        })
    }

    /// Apply command-line overrides on top of the environment.
    pub fn apply_cli(&mut self, cli: &Cli) {
        if let Some(url) = &cli.database_url {
            self.database_url = url.clone();
        }
        if let Some(addr) = cli.bind {
            self.bind_address = addr;
        }
        if let Some(ms) = cli.aggregation_interval_ms.filter(|ms| *ms > 0) {
            self.aggregation_interval = Duration::from_millis(ms);
            if !self.retention_interval_explicit {
                self.retention_interval = self.aggregation_interval;
            }
        }
        if let Some(ms) = cli.inspection_interval_ms.filter(|ms| *ms > 0) {
            self.inspection_interval = Duration::from_millis(ms);
        }
        if let Some(cooldown) = cli.cooldown_seconds.filter(|c| c.is_finite() && *c >= 0.0) {
            self.notification_cooldown_seconds = cooldown;
        }
    }
}

fn parse_millis(raw: Option<String>, name: &str, default: u64) -> Result<u64, String> {
    match raw {
        None => Ok(default),
        Some(raw) => match raw.parse::<u64>() {
            Ok(0) | Err(_) => Err(format!("{} must be a positive number of milliseconds", name)),
            Ok(ms) => Ok(ms),
        },
    }
}
