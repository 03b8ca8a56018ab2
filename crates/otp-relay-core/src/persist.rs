//! Serialized JSON persistence.
//!
//! Each durable file gets one writer task. Callers hand it a snapshot and await
//! the outcome, so writes to the same file never interleave and failures reach
//! the caller instead of being dropped.

use std::path::{Path, PathBuf};

use serde::{de::DeserializeOwned, Serialize};
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, warn};

use crate::{errors::Error, Result};

const QUEUE_DEPTH: usize = 32;

struct WriteJob {
    bytes: Vec<u8>,
    reply: oneshot::Sender<Result<()>>,
}

#[derive(Clone, Debug)]
pub struct JsonFileWriter {
    path: PathBuf,
    tx: mpsc::Sender<WriteJob>,
}

impl JsonFileWriter {
    /// Start the writer task for `path`. Must be called inside a tokio runtime.
    pub fn spawn(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let (tx, rx) = mpsc::channel(QUEUE_DEPTH);
        tokio::spawn(run_writer(path.clone(), rx));
        Self { path, tx }
    }

    /// Queue a snapshot of `value` and wait until it is on disk.
    pub async fn write<T: Serialize + ?Sized>(&self, value: &T) -> Result<()> {
        let bytes = serde_json::to_vec_pretty(value)?;
        let (reply, rx) = oneshot::channel();
        self.tx
            .send(WriteJob { bytes, reply })
            .await
            .map_err(|_| self.stopped())?;
        rx.await.map_err(|_| self.stopped())?
    }

    fn stopped(&self) -> Error {
        Error::Persistence {
            path: self.path.clone(),
            reason: "writer task stopped".to_string(),
        }
    }
}

async fn run_writer(path: PathBuf, mut rx: mpsc::Receiver<WriteJob>) {
    while let Some(job) = rx.recv().await {
        let res = write_atomic(&path, &job.bytes).await;
        if let Err(e) = &res {
            warn!(path = %path.display(), error = %e, "persist failed");
        } else {
            debug!(path = %path.display(), bytes = job.bytes.len(), "persisted");
        }
        let _ = job.reply.send(res);
    }
}

/// Write `bytes` to a sibling temp file, then rename it over `path`.
pub(crate) async fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let to_err = |e: std::io::Error| Error::Persistence {
        path: path.to_path_buf(),
        reason: e.to_string(),
    };

    if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
        tokio::fs::create_dir_all(parent).await.map_err(to_err)?;
    }

    let mut tmp = path.as_os_str().to_owned();
    tmp.push(".tmp");
    let tmp = PathBuf::from(tmp);

    tokio::fs::write(&tmp, bytes).await.map_err(to_err)?;
    tokio::fs::rename(&tmp, path).await.map_err(to_err)?;
    Ok(())
}

/// Read a JSON file, falling back to `T::default()` when it is missing or unreadable.
pub fn load_json_or_default<T: DeserializeOwned + Default>(path: &Path, what: &str) -> T {
    let txt = match std::fs::read_to_string(path) {
        Ok(txt) => txt,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
            debug!(path = %path.display(), "no {what} file, starting fresh");
            return T::default();
        }
        Err(e) => {
            warn!(path = %path.display(), error = %e, "failed to read {what}, starting fresh");
            return T::default();
        }
    };

    if txt.trim().is_empty() {
        return T::default();
    }

    match serde_json::from_str(&txt) {
        Ok(v) => v,
        Err(e) => {
            warn!(path = %path.display(), error = %e, "corrupt {what} file, starting fresh");
            T::default()
        }
    }
}
