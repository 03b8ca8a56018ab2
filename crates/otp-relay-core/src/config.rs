use std::{
    env, fs,
    path::{Path, PathBuf},
    time::Duration,
};

use url::Url;

use crate::{errors::Error, Result};

/// Dashboard endpoint serving the SMS table as JSON.
pub const DATA_PATH: &str = "/ints/client/res/data_smscdr.php";
/// Login form path (GET for the captcha page, POST for credentials).
pub const LOGIN_PATH: &str = "/ints/signin";
/// Page the data table lives on; sent as `Referer` on table queries.
pub const STATS_PAGE_PATH: &str = "/ints/client/SMSCDRStats";

const DEFAULT_API_URL: &str = "http://185.2.83.39";

// Upper bounds for numeric settings, keeping every derived duration inside chrono's range.
const MAX_FETCH_WINDOW_MINUTES: u64 = 7 * 24 * 60;
const MAX_CLOCK_SKEW_SECS: u64 = 24 * 60 * 60;
const MAX_CACHE_RETENTION_SECS: u64 = 30 * 24 * 60 * 60;
const MAX_DELAY_MS: u64 = 10 * 60 * 1_000;

/// Typed configuration, loaded once at startup.
#[derive(Clone, Debug)]
pub struct Config {
    // Dashboard
    pub dashboard_origin: Url,
    pub api_url: Url,
    pub session_cookie: Option<String>,
    pub login_username: String,
    pub login_password: String,

    // Telegram
    pub telegram_bot_token: String,
    pub admin_id: Option<i64>,

    // Polling
    pub poll_interval: Duration,
    pub fetch_window: Duration,
    pub clock_skew_tolerance: Duration,
    pub cache_retention: Duration,
    pub max_cache_size: usize,
    pub max_retries: u32,
    pub retry_delay: Duration,
    pub request_timeout: Duration,

    // Files
    pub state_file: PathBuf,
    pub subscribers_file: PathBuf,
    pub settings_file: PathBuf,
    pub env_file: PathBuf,
}

impl Config {
    /// Load from the process environment, reading `.env` first (existing vars win).
    pub fn load() -> Result<Self> {
        load_dotenv_if_present(Path::new(".env"));
        Self::from_lookup(|key| env::var(key).ok())
    }

    /// Build a config from an arbitrary key lookup.
    pub fn from_lookup(lookup: impl Fn(&str) -> Option<String>) -> Result<Self> {
        let get = |key: &str| lookup(key).and_then(non_empty);

        let telegram_bot_token = get("TELEGRAM_BOT_TOKEN").ok_or_else(|| {
            Error::Config("TELEGRAM_BOT_TOKEN environment variable is required".to_string())
        })?;
        let login_username = get("LOGIN_USERNAME").ok_or_else(|| {
            Error::Config("LOGIN_USERNAME environment variable is required".to_string())
        })?;
        let login_password = get("LOGIN_PASSWORD").ok_or_else(|| {
            Error::Config("LOGIN_PASSWORD environment variable is required".to_string())
        })?;

        let api_url = resolve_api_url(&get("API_URL").unwrap_or(DEFAULT_API_URL.to_string()))?;
        let dashboard_origin = api_url
            .join("/")
            .map_err(|e| Error::Config(format!("API_URL has no usable origin: {e}")))?;

        let admin_id = match get("ADMIN_ID") {
            Some(raw) => Some(raw.trim().parse::<i64>().map_err(|_| {
                Error::Config(format!("ADMIN_ID must be a numeric Telegram user id, got {raw:?}"))
            })?),
            None => None,
        };

        let num = |key: &str| get(key).and_then(|s| s.trim().parse::<u64>().ok());

        let poll_interval = Duration::from_millis(
            num("POLL_INTERVAL").unwrap_or(5_000).clamp(250, MAX_DELAY_MS),
        );
        let fetch_window_minutes = num("FETCH_WINDOW_MINUTES")
            .unwrap_or(60)
            .min(MAX_FETCH_WINDOW_MINUTES);
        let fetch_window = Duration::from_secs(fetch_window_minutes.saturating_mul(60));
        let clock_skew_tolerance = Duration::from_secs(
            num("CLOCK_SKEW_TOLERANCE").unwrap_or(60).min(MAX_CLOCK_SKEW_SECS),
        );
        let cache_retention = Duration::from_secs(
            num("CACHE_RETENTION_SECONDS")
                .unwrap_or(3_600)
                .min(MAX_CACHE_RETENTION_SECS),
        );
        let max_cache_size = num("MAX_CACHE_SIZE").unwrap_or(1_000).clamp(1, 100_000) as usize;
        let max_retries = num("MAX_RETRIES").unwrap_or(3).clamp(1, 20) as u32;
        let retry_delay = Duration::from_millis(num("RETRY_DELAY").unwrap_or(2_000).min(MAX_DELAY_MS));
        let request_timeout = Duration::from_millis(
            num("REQUEST_TIMEOUT").unwrap_or(30_000).min(MAX_DELAY_MS),
        );

        let path = |key: &str, default: &str| PathBuf::from(get(key).unwrap_or(default.to_string()));

        Ok(Self {
            dashboard_origin,
            api_url,
            session_cookie: get("SESSION_COOKIE"),
            login_username,
            login_password,
            telegram_bot_token,
            admin_id,
            poll_interval,
            fetch_window,
            clock_skew_tolerance,
            cache_retention,
            max_cache_size,
            max_retries,
            retry_delay,
            request_timeout,
            state_file: path("STATE_FILE", "./state.json"),
            subscribers_file: path("SUBSCRIBERS_FILE", "./subscribers.json"),
            settings_file: path("SETTINGS_FILE", "./settings.json"),
            env_file: path("ENV_FILE", "./.env"),
        })
    }

    pub fn login_url(&self) -> Result<Url> {
        self.dashboard_origin
            .join(LOGIN_PATH)
            .map_err(|e| Error::InvalidUrl(e.to_string()))
    }
}

/// Normalise `API_URL`: strip a trailing slash, append the data path to a bare origin.
pub fn resolve_api_url(raw: &str) -> Result<Url> {
    let trimmed = raw.trim().trim_end_matches('/');
    let full = if trimmed.contains(".php") {
        trimmed.to_string()
    } else {
        format!("{trimmed}{DATA_PATH}")
    };
    Url::parse(&full).map_err(|e| Error::Config(format!("invalid API_URL {raw:?}: {e}")))
}

fn load_dotenv_if_present(path: &Path) {
    let Ok(contents) = fs::read_to_string(path) else {
        return;
    };

    for raw in contents.lines() {
        let line = raw.trim();
        if line.is_empty() || line.starts_with('#') {
            continue;
        }

        let Some((k, v)) = line.split_once('=') else {
            continue;
        };

        let key = k.trim();
        if key.is_empty() {
            continue;
        }
        if env::var_os(key).is_some() {
            continue; // do not override existing env
        }

        env::set_var(key, crate::env_file::unquote(v.trim()));
    }
}

fn non_empty(s: String) -> Option<String> {
    if s.trim().is_empty() {
        None
    } else {
        Some(s)
    }
}
