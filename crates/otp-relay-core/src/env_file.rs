//! Minimal `.env` editing, used to mirror a refreshed session cookie or a new
//! password so they survive restarts.

use std::{
    fs,
    path::{Path, PathBuf},
    sync::Arc,
};

use tokio::sync::Mutex;

use crate::{errors::Error, persist::write_atomic, Result};

/// Handle to one `.env` file. Clones share a lock, so updates from the poller
/// and the bot are applied one after another and never lose each other's keys.
#[derive(Clone, Debug)]
pub struct EnvFile {
    path: PathBuf,
    lock: Arc<Mutex<()>>,
}

impl EnvFile {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self {
            path: path.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Replace `key=...` in place (keeping its indentation) or append it.
    pub async fn set(&self, key: &str, value: &str) -> Result<()> {
        if key.trim().is_empty() {
            return Err(Error::Config("env key cannot be empty".to_string()));
        }
        if key.contains(['\r', '\n']) || value.contains(['\r', '\n']) {
            return Err(Error::Config(
                "env key and value cannot contain newlines".to_string(),
            ));
        }

        let _guard = self.lock.lock().await;
        let contents = match tokio::fs::read_to_string(&self.path).await {
            Ok(s) => s,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => String::new(),
            Err(e) => {
                return Err(Error::Persistence {
                    path: self.path.clone(),
                    reason: e.to_string(),
                })
            }
        };

        let updated = upsert_line(&contents, key, value);
        write_atomic(&self.path, updated.as_bytes()).await
    }

    /// Read a value straight from the file (not the process environment).
    pub fn get(&self, key: &str) -> Option<String> {
        let contents = fs::read_to_string(&self.path).ok()?;
        let prefix = format!("{key}=");
        contents.lines().find_map(|line| {
            let rest = line.trim().strip_prefix(&prefix)?;
            let rest = rest.trim();
            let value = if is_quoted(rest) {
                unquote(rest)
            } else {
                match rest.find(" #") {
                    Some(idx) => rest[..idx].trim().to_string(),
                    None => rest.to_string(),
                }
            };
            (!value.is_empty()).then_some(value)
        })
    }
}

fn upsert_line(contents: &str, key: &str, value: &str) -> String {
    let prefix = format!("{key}=");
    let mut lines: Vec<String> = if contents.is_empty() {
        Vec::new()
    } else {
        contents.split('\n').map(|l| l.to_string()).collect()
    };

    let existing = lines
        .iter()
        .position(|line| line.trim_start().starts_with(&prefix));

    match existing {
        Some(idx) => {
            let indent_len = lines[idx].len() - lines[idx].trim_start().len();
            let indent = lines[idx][..indent_len].to_string();
            lines[idx] = format!("{indent}{key}={value}");
        }
        None => {
            if lines.last().is_some_and(|l| l.is_empty()) {
                lines.pop();
            }
            lines.push(format!("{key}={value}"));
        }
    }

    lines.join("\n")
}

fn is_quoted(v: &str) -> bool {
    v.len() >= 2
        && ((v.starts_with('"') && v.ends_with('"')) || (v.starts_with('\'') && v.ends_with('\'')))
}

/// Strip one pair of surrounding quotes, if present.
pub fn unquote(v: &str) -> String {
    if is_quoted(v) {
        v[1..v.len() - 1].to_string()
    } else {
        v.to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn set_replaces_existing_key_and_keeps_indent_and_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "# creds\n  SESSION_COOKIE=old\nLOGIN_USERNAME=u\n").unwrap();

        let env = EnvFile::new(&path);
        env.set("SESSION_COOKIE", "PHPSESSID=new").await.unwrap();

        let txt = fs::read_to_string(&path).unwrap();
        assert_eq!(txt, "# creds\n  SESSION_COOKIE=PHPSESSID=new\nLOGIN_USERNAME=u\n");
        assert_eq!(env.get("SESSION_COOKIE").as_deref(), Some("PHPSESSID=new"));
    }

    #[tokio::test]
    async fn set_appends_missing_key_and_creates_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");

        let env = EnvFile::new(&path);
        env.set("LOGIN_PASSWORD", "secret").await.unwrap();
        env.set("API_URL", "http://1.2.3.4").await.unwrap();

        let txt = fs::read_to_string(&path).unwrap();
        assert_eq!(txt, "LOGIN_PASSWORD=secret\nAPI_URL=http://1.2.3.4");
    }

    #[tokio::test]
    async fn newline_in_value_is_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let env = EnvFile::new(dir.path().join(".env"));
        assert!(env.set("KEY", "a\nb").await.is_err());
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn concurrent_sets_from_clones_keep_every_key() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "TELEGRAM_BOT_TOKEN=123:abc\nLOGIN_USERNAME=u\n").unwrap();
        let env = EnvFile::new(&path);

        let mut tasks = Vec::new();
        for i in 0..50 {
            let cookie_side = env.clone();
            tasks.push(tokio::spawn(async move {
                cookie_side
                    .set("SESSION_COOKIE", &format!("PHPSESSID={i}"))
                    .await
            }));
            let password_side = env.clone();
            tasks.push(tokio::spawn(async move {
                password_side.set("LOGIN_PASSWORD", &format!("pw{i}")).await
            }));
        }
        for t in tasks {
            t.await.unwrap().unwrap();
        }

        assert_eq!(env.get("TELEGRAM_BOT_TOKEN").as_deref(), Some("123:abc"));
        assert_eq!(env.get("LOGIN_USERNAME").as_deref(), Some("u"));
        assert!(env.get("SESSION_COOKIE").is_some_and(|v| v.starts_with("PHPSESSID=")));
        assert!(env.get("LOGIN_PASSWORD").is_some_and(|v| v.starts_with("pw")));
        assert!(!dir.path().join(".env.tmp").exists());
    }

    #[test]
    fn get_strips_quotes_and_inline_comments() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".env");
        fs::write(&path, "A=\"quoted # kept\"\nB=plain # note\nC=\n").unwrap();

        let env = EnvFile::new(&path);
        assert_eq!(env.get("A").as_deref(), Some("quoted # kept"));
        assert_eq!(env.get("B").as_deref(), Some("plain"));
        assert_eq!(env.get("C"), None);
    }
}
