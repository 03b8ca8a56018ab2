use chrono::{DateTime, Utc};
use tokio::sync::RwLock;
use tracing::{debug, info};

use crate::{env_file::EnvFile, Result};

/// Name of the dashboard's session cookie.
pub const SESSION_COOKIE_NAME: &str = "PHPSESSID";
/// `.env` key the current cookie is mirrored to.
pub const SESSION_ENV_KEY: &str = "SESSION_COOKIE";

/// Authentication cookie for the dashboard.
///
/// Expiry is never predicted locally; it is detected from server responses.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Session {
    /// Full `Cookie` header value, e.g. `PHPSESSID=abc123`.
    pub cookie_value: String,
    pub obtained_at: DateTime<Utc>,
}

/// Holds the current session cookie in memory, mirrored to the `.env` file.
///
/// Written only by the authenticator, read by the fetcher before each request.
pub struct SessionStore {
    current: RwLock<Option<Session>>,
    mirror: Option<EnvFile>,
}

impl SessionStore {
    pub fn new(seed: Option<String>, mirror: Option<EnvFile>) -> Self {
        let current = seed
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty())
            .map(|s| Session {
                cookie_value: cookie_header(&s),
                obtained_at: Utc::now(),
            });
        Self {
            current: RwLock::new(current),
            mirror,
        }
    }

    /// Current `Cookie` header value, if any.
    pub async fn get(&self) -> Option<String> {
        self.current
            .read()
            .await
            .as_ref()
            .map(|s| s.cookie_value.clone())
    }

    /// Replace the cookie in memory, then mirror it to durable storage.
    ///
    /// The in-memory value is updated even if the mirror write fails.
    pub async fn set(&self, cookie: &str) -> Result<()> {
        let cookie_value = cookie_header(cookie);
        {
            let mut cur = self.current.write().await;
            *cur = Some(Session {
                cookie_value: cookie_value.clone(),
                obtained_at: Utc::now(),
            });
        }
        info!(category = "AUTH", "session cookie replaced");

        if let Some(mirror) = &self.mirror {
            mirror.set(SESSION_ENV_KEY, &cookie_value).await?;
            debug!(path = %mirror.path().display(), "session cookie mirrored");
        }
        Ok(())
    }
}

/// Accept either a bare session id or a full `NAME=value` pair.
pub fn cookie_header(raw: &str) -> String {
    let raw = raw.trim();
    if raw.contains('=') {
        raw.to_string()
    } else {
        format!("{SESSION_COOKIE_NAME}={raw}")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn seed_is_normalised_and_returned() {
        let store = SessionStore::new(Some("abc123".to_string()), None);
        assert_eq!(store.get().await.as_deref(), Some("PHPSESSID=abc123"));

        let empty = SessionStore::new(Some("  ".to_string()), None);
        assert_eq!(empty.get().await, None);
    }

    #[tokio::test]
    async fn set_replaces_cookie_and_mirrors_to_env_file() {
        let dir = tempfile::tempdir().unwrap();
        let env_path = dir.path().join(".env");
        std::fs::write(&env_path, "SESSION_COOKIE=PHPSESSID=old\n").unwrap();

        let store = SessionStore::new(
            Some("PHPSESSID=old".to_string()),
            Some(EnvFile::new(&env_path)),
        );
        store.set("PHPSESSID=fresh").await.unwrap();

        assert_eq!(store.get().await.as_deref(), Some("PHPSESSID=fresh"));
        assert_eq!(
            EnvFile::new(&env_path).get(SESSION_ENV_KEY).as_deref(),
            Some("PHPSESSID=fresh")
        );
    }

    #[tokio::test]
    async fn failed_mirror_still_updates_memory() {
        let dir = tempfile::tempdir().unwrap();
        let store = SessionStore::new(None, Some(EnvFile::new(dir.path())));

        assert!(store.set("PHPSESSID=x").await.is_err());
        assert_eq!(store.get().await.as_deref(), Some("PHPSESSID=x"));
    }
}
