//! Dashboard login handshake: captcha page, arithmetic answer, credential POST.

use std::sync::{Arc, OnceLock};

use async_trait::async_trait;
use regex::Regex;
use tokio::sync::RwLock;
use tracing::{error, info, warn};
use url::Url;

use crate::{
    env_file::EnvFile,
    errors::{AuthError, Error},
    session::SessionStore,
    transport::{send_following_redirects, HttpRequest, HttpTransport, Method, RedirectPolicy},
    Result,
};

/// Full handshakes (page + captcha + POST) per `login()` call.
pub const MAX_LOGIN_ATTEMPTS: usize = 3;

/// `.env` key the login password is mirrored to when changed at runtime.
pub const PASSWORD_ENV_KEY: &str = "LOGIN_PASSWORD";

const SUCCESS_MARKERS: &[&str] = &["Dashboard", "SMSDashboard", "kstotp"];
const CAPTCHA_FAILED_MARKER: &str = "Captcha Verification Failed";

pub(crate) const BROWSER_USER_AGENT: &str =
    "Mozilla/5.0 (Windows NT 10.0; Win64; x64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/120.0.0.0 Safari/537.36";

/// Anything that can produce a fresh session cookie.
#[async_trait]
pub trait Authenticate: Send + Sync {
    /// Log in and return the new `Cookie` header value.
    async fn login(&self) -> Result<String>;
}

#[derive(Clone)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

impl std::fmt::Debug for Credentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Credentials")
            .field("username", &self.username)
            .field("password", &"<redacted>")
            .finish()
    }
}

/// How the dashboard answered a credential POST.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum LoginOutcome {
    Success,
    CaptchaRejected,
    Unknown,
}

pub fn classify_login_response(body: &str) -> LoginOutcome {
    if SUCCESS_MARKERS.iter().any(|m| body.contains(m)) {
        LoginOutcome::Success
    } else if body.contains(CAPTCHA_FAILED_MARKER) {
        LoginOutcome::CaptchaRejected
    } else {
        LoginOutcome::Unknown
    }
}

fn captcha_re() -> &'static Regex {
    static CELL: OnceLock<Regex> = OnceLock::new();
    CELL.get_or_init(|| Regex::new(r"What is (\d+) \+ (\d+) = \?").expect("valid regex"))
}

/// Answer the "What is A + B = ?" challenge embedded in the login page.
pub fn solve_math_captcha(page: &str) -> Result<u64> {
    let caps = captcha_re().captures(page).ok_or(Error::CaptchaParse)?;
    let a: u64 = caps[1].parse().map_err(|_| Error::CaptchaParse)?;
    let b: u64 = caps[2].parse().map_err(|_| Error::CaptchaParse)?;
    a.checked_add(b).ok_or(Error::CaptchaParse)
}

pub struct Authenticator {
    transport: Arc<dyn HttpTransport>,
    policy: RedirectPolicy,
    login_url: Url,
    credentials: RwLock<Credentials>,
    sessions: Arc<SessionStore>,
    env_file: Option<EnvFile>,
}

impl Authenticator {
    pub fn new(
        transport: Arc<dyn HttpTransport>,
        origin: Url,
        login_url: Url,
        credentials: Credentials,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            transport,
            policy: RedirectPolicy::same_origin(origin),
            login_url,
            credentials: RwLock::new(credentials),
            sessions,
            env_file: None,
        }
    }

    /// Mirror runtime password changes into this `.env` file.
    pub fn with_env_file(mut self, env_file: EnvFile) -> Self {
        self.env_file = Some(env_file);
        self
    }

    pub async fn username(&self) -> String {
        self.credentials.read().await.username.clone()
    }

    /// Replace the login password; the next login uses it.
    ///
    /// The `.env` mirror is written first; if that fails the old password stays
    /// in effect.
    pub async fn set_password(&self, password: &str) -> Result<()> {
        let password = password.trim();
        if password.is_empty() {
            return Err(Error::Config("password must not be empty".to_string()));
        }

        if let Some(env) = &self.env_file {
            env.set(PASSWORD_ENV_KEY, password).await?;
        }
        self.credentials.write().await.password = password.to_string();
        info!(category = "AUTH", "login password updated");
        Ok(())
    }

    fn page_request(&self, url: Url) -> HttpRequest {
        HttpRequest::get(url)
            .header("User-Agent", BROWSER_USER_AGENT)
            .header(
                "Accept",
                "text/html,application/xhtml+xml,application/xml;q=0.9,*/*;q=0.8",
            )
            .header("Accept-Language", "en-US,en;q=0.5")
            .header("Referer", self.login_url.as_str())
    }

    async fn attempt(&self) -> Result<(LoginOutcome, Option<String>)> {
        let page = send_following_redirects(
            self.transport.as_ref(),
            &self.policy,
            self.page_request(self.login_url.clone()),
            None,
        )
        .await?;

        let answer = solve_math_captcha(&page.body)?;
        info!(category = "AUTH", answer, "captcha solved");

        let creds = self.credentials.read().await.clone();
        let mut req = self.page_request(self.login_url.clone());
        req.method = Method::Post;
        req.form = Some(vec![
            ("username".to_string(), creds.username),
            ("password".to_string(), creds.password),
            ("capt".to_string(), answer.to_string()),
        ]);
        let req = req.header("Content-Type", "application/x-www-form-urlencoded");

        let result =
            send_following_redirects(self.transport.as_ref(), &self.policy, req, page.cookie)
                .await?;

        Ok((classify_login_response(&result.body), result.cookie))
    }
}

#[async_trait]
impl Authenticate for Authenticator {
    async fn login(&self) -> Result<String> {
        for attempt in 1..=MAX_LOGIN_ATTEMPTS {
            info!(category = "AUTH", attempt, max = MAX_LOGIN_ATTEMPTS, "logging in");

            let (outcome, cookie) = match self.attempt().await {
                Ok(v) => v,
                Err(e) => {
                    error!(category = "AUTH", attempt, error = %e, "login attempt failed");
                    return Err(e);
                }
            };

            match outcome {
                LoginOutcome::Success => {
                    let cookie = cookie.ok_or(AuthError::MissingSessionCookie)?;
                    if let Err(e) = self.sessions.set(&cookie).await {
                        // The in-memory session is already live.
                        warn!(category = "AUTH", error = %e, "failed to persist session cookie");
                    }
                    info!(category = "AUTH", attempt, "login successful");
                    return Ok(cookie);
                }
                LoginOutcome::CaptchaRejected => {
                    warn!(category = "AUTH", attempt, "captcha verification failed, retrying");
                }
                LoginOutcome::Unknown => {
                    error!(category = "AUTH", attempt, "login failed: unrecognised response");
                    return Err(AuthError::UnknownResponse.into());
                }
            }
        }

        error!(category = "AUTH", "max login attempts reached");
        Err(AuthError::MaxAttemptsExceeded {
            attempts: MAX_LOGIN_ATTEMPTS,
        }
        .into())
    }
}
