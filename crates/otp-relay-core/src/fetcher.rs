//! Dashboard table queries, response classification and the refresh-once retry loop.

use std::{fmt, sync::Arc, time::Duration};

use async_trait::async_trait;
use chrono::{DateTime, Local};
use serde_json::Value;
use tracing::{debug, error, info, warn};
use url::Url;

use crate::{
    auth::{Authenticate, BROWSER_USER_AGENT},
    config::{Config, STATS_PAGE_PATH},
    domain::RawMessage,
    errors::Error,
    session::SessionStore,
    state::TIMESTAMP_FORMAT,
    transport::{
        send_following_redirects, FollowedResponse, HttpRequest, HttpTransport, RedirectPolicy,
    },
    Result,
};

/// Rows requested per query; the dashboard returns newest first.
const PAGE_SIZE: u32 = 100;
const TABLE_COLUMNS: usize = 7;

#[derive(Clone, Debug)]
pub struct FetchConfig {
    pub api_url: Url,
    pub origin: Url,
    pub window: Duration,
    pub clock_skew: Duration,
    /// Total attempts per fetch on generic failures.
    pub max_retries: u32,
    pub retry_delay: Duration,
}

impl FetchConfig {
    pub fn from_config(cfg: &Config) -> Self {
        Self {
            api_url: cfg.api_url.clone(),
            origin: cfg.dashboard_origin.clone(),
            window: cfg.fetch_window,
            clock_skew: cfg.clock_skew_tolerance,
            max_retries: cfg.max_retries,
            retry_delay: cfg.retry_delay,
        }
    }
}

/// Why a response was taken as a dead session.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ExpiryReason {
    NoSession,
    HttpStatus(u16),
    RedirectedToLogin,
    EmptyBody,
    LoginPage,
}

impl fmt::Display for ExpiryReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ExpiryReason::NoSession => f.write_str("no session cookie"),
            ExpiryReason::HttpStatus(s) => write!(f, "HTTP {s}"),
            ExpiryReason::RedirectedToLogin => f.write_str("redirected to login"),
            ExpiryReason::EmptyBody => f.write_str("empty response"),
            ExpiryReason::LoginPage => f.write_str("login page served"),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub enum ResponseClass {
    ValidData(Vec<RawMessage>),
    ExpiredSession(ExpiryReason),
    Malformed(String),
}

/// Single dispatch point for deciding what a table response means.
///
/// Non-2xx statuses other than 401/403 are transport failures and come back as
/// `Err(Error::Fetch)`, which the caller retries.
pub fn classify_response(resp: &FollowedResponse) -> Result<ResponseClass> {
    if matches!(resp.status, 401 | 403) {
        return Ok(ResponseClass::ExpiredSession(ExpiryReason::HttpStatus(
            resp.status,
        )));
    }

    let json = serde_json::from_str::<Value>(&resp.body).ok();
    if let Some(v) = &json {
        if v.get("aaData").is_some() || v.get("iTotalRecords").is_some() {
            return Ok(ResponseClass::ValidData(parse_rows(v)));
        }
    }

    if resp.redirected && resp.final_url.path().contains("signin") {
        return Ok(ResponseClass::ExpiredSession(ExpiryReason::RedirectedToLogin));
    }

    if !(200..300).contains(&resp.status) {
        return Err(Error::Fetch(format!("HTTP {}", resp.status)));
    }

    if resp.body.trim().is_empty() {
        return Ok(ResponseClass::ExpiredSession(ExpiryReason::EmptyBody));
    }

    if looks_like_login_page(&resp.body) {
        return Ok(ResponseClass::ExpiredSession(ExpiryReason::LoginPage));
    }

    let detail = match json {
        Some(_) => "JSON without table data".to_string(),
        None => format!("unparseable body ({} bytes)", resp.body.len()),
    };
    Ok(ResponseClass::Malformed(detail))
}

fn looks_like_login_page(body: &str) -> bool {
    let lower = body.to_lowercase();
    let has_form = lower.contains("<form");
    (has_form && (lower.contains("signin") || lower.contains("password")))
        || lower.contains("session expired")
        || lower.contains("please login")
        || lower.contains("<!doctype html")
}

/// Accept rows with at least 5 fields, a `YYYY-MM-DD` prefix in field 0 and a string body in field 4.
pub fn parse_rows(data: &Value) -> Vec<RawMessage> {
    let Some(rows) = data.get("aaData").and_then(Value::as_array) else {
        return Vec::new();
    };
    rows.iter().filter_map(parse_row).collect()
}

fn parse_row(row: &Value) -> Option<RawMessage> {
    let fields = row.as_array()?;
    if fields.len() < 5 {
        return None;
    }
    let timestamp = fields[0].as_str()?;
    if !has_date_prefix(timestamp) {
        return None;
    }
    let body = fields[4].as_str()?;

    Some(RawMessage {
        timestamp: timestamp.to_string(),
        country: stringify(&fields[1]),
        phone: stringify(&fields[2]),
        sender: stringify(&fields[3]),
        body: body.to_string(),
        symbol: fields.get(5).cloned(),
        id: fields.get(6).cloned(),
    })
}

fn has_date_prefix(s: &str) -> bool {
    let b = s.as_bytes();
    b.len() >= 10
        && b[..4].iter().all(u8::is_ascii_digit)
        && b[4] == b'-'
        && b[5..7].iter().all(u8::is_ascii_digit)
        && b[7] == b'-'
        && b[8..10].iter().all(u8::is_ascii_digit)
}

fn stringify(v: &Value) -> String {
    match v {
        Value::String(s) => s.clone(),
        Value::Null => String::new(),
        other => other.to_string(),
    }
}

/// Where the poll loop gets its rows from.
#[async_trait]
pub trait MessageSource: Send + Sync {
    /// Newest-first rows for the current window. Failures degrade to an empty list.
    async fn fetch_messages(&self) -> Vec<RawMessage>;
}

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum Attempt {
    First,
    RetriedAfterRefresh,
}

pub struct MessageFetcher {
    transport: Arc<dyn HttpTransport>,
    auth: Arc<dyn Authenticate>,
    sessions: Arc<SessionStore>,
    policy: RedirectPolicy,
    cfg: FetchConfig,
}

impl MessageFetcher {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        auth: Arc<dyn Authenticate>,
        sessions: Arc<SessionStore>,
        cfg: FetchConfig,
    ) -> Self {
        Self {
            transport,
            auth,
            sessions,
            policy: RedirectPolicy::same_origin(cfg.origin.clone()),
            cfg,
        }
    }

    /// Data-table query for the window `[now - window, now + skew]`.
    pub fn build_query_url(&self, now: DateTime<Local>) -> Url {
        let window = chrono::Duration::from_std(self.cfg.window)
            .unwrap_or_else(|_| chrono::Duration::hours(1));
        let skew = chrono::Duration::from_std(self.cfg.clock_skew)
            .unwrap_or_else(|_| chrono::Duration::zero());
        let start = now
            .checked_sub_signed(window)
            .unwrap_or(now)
            .format(TIMESTAMP_FORMAT)
            .to_string();
        let end = now
            .checked_add_signed(skew)
            .unwrap_or(now)
            .format(TIMESTAMP_FORMAT)
            .to_string();

        let mut url = self.cfg.api_url.clone();
        {
            let mut q = url.query_pairs_mut();
            q.append_pair("fdate1", &start)
                .append_pair("fdate2", &end)
                .append_pair("frange", "")
                .append_pair("fnum", "")
                .append_pair("fcli", "")
                .append_pair("fgdate", "")
                .append_pair("fgmonth", "")
                .append_pair("fgrange", "")
                .append_pair("fgnumber", "")
                .append_pair("fgcli", "")
                .append_pair("fg", "0")
                .append_pair("sEcho", "1")
                .append_pair("iColumns", &TABLE_COLUMNS.to_string())
                .append_pair("sColumns", &",".repeat(TABLE_COLUMNS - 1))
                .append_pair("iDisplayStart", "0")
                .append_pair("iDisplayLength", &PAGE_SIZE.to_string());
            for i in 0..TABLE_COLUMNS {
                let idx = i.to_string();
                q.append_pair(&format!("mDataProp_{i}"), &idx)
                    .append_pair(&format!("sSearch_{i}"), "")
                    .append_pair(&format!("bRegex_{i}"), "false")
                    .append_pair(&format!("bSearchable_{i}"), "true")
                    .append_pair(&format!("bSortable_{i}"), "true");
            }
            q.append_pair("sSearch", "")
                .append_pair("bRegex", "false")
                .append_pair("iSortCol_0", "0")
                .append_pair("sSortDir_0", "desc")
                .append_pair("iSortingCols", "1")
                .append_pair("_", &now.timestamp_millis().to_string());
        }
        url
    }

    fn build_request(&self, now: DateTime<Local>) -> HttpRequest {
        let referer = self
            .cfg
            .origin
            .join(STATS_PAGE_PATH)
            .map(String::from)
            .unwrap_or_else(|_| self.cfg.origin.to_string());

        HttpRequest::get(self.build_query_url(now))
            .header("Accept", "application/json, text/javascript, */*; q=0.01")
            .header("Accept-Language", "en-US,en;q=0.9")
            .header("Referer", referer)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header("X-Requested-With", "XMLHttpRequest")
    }

    async fn fetch_once(&self) -> Result<ResponseClass> {
        let Some(cookie) = self.sessions.get().await else {
            return Ok(ResponseClass::ExpiredSession(ExpiryReason::NoSession));
        };
        let req = self.build_request(Local::now());
        let resp =
            send_following_redirects(self.transport.as_ref(), &self.policy, req, Some(cookie))
                .await?;
        debug!(category = "API", status = resp.status, bytes = resp.body.len(), "table response");
        classify_response(&resp)
    }

    async fn fetch_with_retries(&self) -> Result<ResponseClass> {
        let attempts = self.cfg.max_retries.max(1);
        let mut n = 1;
        loop {
            match self.fetch_once().await {
                Ok(class) => return Ok(class),
                Err(e) if e.is_redirect_violation() => return Err(e),
                Err(e) if n >= attempts => return Err(e),
                Err(e) => {
                    warn!(
                        category = "API",
                        attempt = n,
                        max = attempts,
                        error = %e,
                        "fetch failed, retrying in {:?}",
                        self.cfg.retry_delay
                    );
                    tokio::time::sleep(self.cfg.retry_delay).await;
                    n += 1;
                }
            }
        }
    }
}

#[async_trait]
impl MessageSource for MessageFetcher {
    async fn fetch_messages(&self) -> Vec<RawMessage> {
        let mut attempt = Attempt::First;
        loop {
            let class = match self.fetch_with_retries().await {
                Ok(class) => class,
                Err(e) => {
                    error!(category = "API", error = %e, "fetch gave up, cycle yields nothing");
                    return Vec::new();
                }
            };

            let reason = match class {
                ResponseClass::ValidData(rows) => {
                    debug!(category = "API", rows = rows.len(), "table parsed");
                    return rows;
                }
                ResponseClass::ExpiredSession(reason) => reason.to_string(),
                ResponseClass::Malformed(detail) => format!("malformed response: {detail}"),
            };

            match attempt {
                Attempt::First => {
                    info!(category = "AUTH", %reason, "session looks expired, refreshing");
                    if let Err(e) = self.auth.login().await {
                        error!(category = "AUTH", error = %e, "session refresh failed");
                        return Vec::new();
                    }
                    attempt = Attempt::RetriedAfterRefresh;
                }
                Attempt::RetriedAfterRefresh => {
                    error!(category = "AUTH", %reason, "still no data after refresh, giving up this cycle");
                    return Vec::new();
                }
            }
        }
    }
}
