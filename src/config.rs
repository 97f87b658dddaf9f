use std::{env, fmt::Display, str::FromStr, time::Duration};

use log::{info, warn};

/// Runtime settings, read once at startup from the environment (and `.env` if present).
///
/// Secrets are optional: a missing key only fails the handlers that need it.
#[derive(Debug, Clone)]
pub struct Config {
    pub port: u16,
    pub espn_site_url: Option<String>,
    pub espn_v2_url: Option<String>,
    pub espn_core_url: Option<String>,
    pub firestore_project_id: Option<String>,
    pub firestore_url: String,
    pub firestore_token: Option<String>,
    pub resend_api_key: Option<String>,
    pub resend_url: String,
    pub resend_audience_id: Option<String>,
    pub email_from: String,
    pub tmdb_api_key: Option<String>,
    pub tmdb_url: String,
    pub cron_secret: Option<String>,
    pub magic_link_secret: Option<String>,
    pub app_url: String,
    pub situation_interval: Duration,
    pub full_refresh_interval: Duration,
}

impl Config {
    pub fn load() -> Self {
        if dotenvy::dotenv().is_ok() {
            info!("Loaded .env file");
        }

        Self {
            port: try_load("PICKEM_PORT", 8080),
            espn_site_url: optional("ESPN_SITE_URL"),
            espn_v2_url: optional("ESPN_V2_URL"),
            espn_core_url: optional("ESPN_CORE_URL"),
            firestore_project_id: optional("FIRESTORE_PROJECT_ID"),
            firestore_url: or_default("FIRESTORE_URL", "https://firestore.googleapis.com/v1"),
            firestore_token: secret("FIRESTORE_TOKEN"),
            resend_api_key: secret("RESEND_API_KEY"),
            resend_url: or_default("RESEND_URL", "https://api.resend.com"),
            resend_audience_id: optional("RESEND_AUDIENCE_ID"),
            email_from: or_default("EMAIL_FROM", "Pick'em <picks@example.com>"),
            tmdb_api_key: secret("TMDB_API_KEY"),
            tmdb_url: or_default("TMDB_URL", "https://api.themoviedb.org/3"),
            cron_secret: secret("CRON_SECRET"),
            magic_link_secret: secret("MAGIC_LINK_SECRET"),
            app_url: or_default("APP_URL", "http://localhost:3000"),
            situation_interval: interval_secs("POLL_SITUATION_SECS", 10),
            full_refresh_interval: interval_secs("POLL_FULL_SECS", 30),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Self {
            port: 8080,
            espn_site_url: None,
            espn_v2_url: None,
            espn_core_url: None,
            firestore_project_id: None,
            firestore_url: "https://firestore.googleapis.com/v1".into(),
            firestore_token: None,
            resend_api_key: None,
            resend_url: "https://api.resend.com".into(),
            resend_audience_id: None,
            email_from: "Pick'em <picks@example.com>".into(),
            tmdb_api_key: None,
            tmdb_url: "https://api.themoviedb.org/3".into(),
            cron_secret: None,
            magic_link_secret: None,
            app_url: "http://localhost:3000".into(),
            situation_interval: Duration::from_secs(10),
            full_refresh_interval: Duration::from_secs(30),
        }
    }
}

fn optional(key: &str) -> Option<String> {
    env::var(key).ok().filter(|v| !v.trim().is_empty())
}

fn secret(key: &str) -> Option<String> {
    let value = optional(key);
    if value.is_none() {
        warn!("{key} not set, dependent endpoints will fail");
    }
    value
}

fn or_default(key: &str, default: &str) -> String {
    optional(key).unwrap_or_else(|| default.to_string())
}

fn try_load<T: FromStr + Display>(key: &str, default: T) -> T
where
    T::Err: Display,
{
    match optional(key) {
        None => {
            info!("{key} not set, using default: {default}");
            default
        }
        Some(raw) => raw.parse().unwrap_or_else(|e| {
            warn!("Invalid {key} value {raw:?}: {e}, using default: {default}");
            default
        }),
    }
}

/// A poll period in whole seconds. Zero falls back to `default`.
fn interval_secs(key: &str, default: u64) -> Duration {
    match try_load(key, default) {
        0 => {
            warn!("{key} must be at least 1 second, using default: {default}");
            Duration::from_secs(default)
        }
        secs => Duration::from_secs(secs),
    }
}
