use std::path::PathBuf;

/// Core error type for the relay.
///
/// Adapter crates should map their specific errors into this type so the poll
/// loop can tell transport failures, expired sessions and local faults apart.
#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("config error: {0}")]
    Config(String),

    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("login page did not contain a captcha challenge")]
    CaptchaParse,

    #[error("auth error: {0}")]
    Auth(#[from] AuthError),

    #[error("cross-origin redirect to {host} refused")]
    CrossOriginRedirect { host: String },

    #[error("too many redirects ({hops})")]
    TooManyRedirects { hops: usize },

    #[error("invalid url: {0}")]
    InvalidUrl(String),

    #[error("fetch error: {0}")]
    Fetch(String),

    #[error("persistence error: {path}: {reason}")]
    Persistence { path: PathBuf, reason: String },

    #[error("external error: {0}")]
    External(String),
}

/// Reasons a login handshake did not produce a session.
#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum AuthError {
    #[error("login failed after {attempts} attempts")]
    MaxAttemptsExceeded { attempts: usize },

    #[error("login failed: unrecognised response")]
    UnknownResponse,

    #[error("login succeeded but no session cookie was issued")]
    MissingSessionCookie,
}

impl Error {
    /// Redirect-policy violations are deterministic; retrying the same request won't help.
    pub fn is_redirect_violation(&self) -> bool {
        matches!(
            self,
            Error::CrossOriginRedirect { .. } | Error::TooManyRedirects { .. }
        )
    }
}

pub type Result<T> = std::result::Result<T, Error>;
