//! Durable poll position and the recent-fingerprint dedupe cache.

use std::{
    collections::VecDeque,
    path::PathBuf,
    time::Duration,
};

use chrono::NaiveDateTime;
use serde::{Deserialize, Serialize};

use crate::{
    persist::{load_json_or_default, JsonFileWriter},
    Result,
};

/// Dashboard timestamp layout (local time, second precision).
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

pub fn parse_timestamp(ts: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(ts.trim(), TIMESTAMP_FORMAT).ok()
}

/// Dedupe key: `{phone}_{timestamp}_{otp}`.
///
/// Phones are digits and timestamps contain no `_`, so the timestamp is always
/// the second `_`-separated part.
pub fn fingerprint(phone: &str, timestamp: &str, otp: &str) -> String {
    format!("{phone}_{timestamp}_{otp}")
}

fn fingerprint_time(fp: &str) -> Option<NaiveDateTime> {
    fp.split('_').nth(1).and_then(parse_timestamp)
}

/// Capacity and retention of the fingerprint cache.
#[derive(Clone, Copy, Debug)]
pub struct DedupePolicy {
    pub capacity: usize,
    pub retention: Duration,
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PollState {
    /// Messages at or before this timestamp are never reconsidered.
    #[serde(default)]
    pub last_seen_timestamp: Option<String>,
    /// Oldest first.
    #[serde(default)]
    pub recent_fingerprints: VecDeque<String>,
    #[serde(default)]
    pub last_checked_at: Option<String>,
    #[serde(default)]
    pub bot_start_time: Option<String>,
}

impl PollState {
    pub fn is_seen(&self, timestamp: &str) -> bool {
        self.last_seen_timestamp
            .as_deref()
            .is_some_and(|boundary| timestamp <= boundary)
    }

    /// Move the boundary forward; never backwards. Returns whether it moved.
    pub fn advance_to(&mut self, timestamp: &str) -> bool {
        if self.is_seen(timestamp) {
            return false;
        }
        self.last_seen_timestamp = Some(timestamp.to_string());
        true
    }

    pub fn contains_fingerprint(&self, fp: &str) -> bool {
        self.recent_fingerprints.iter().any(|f| f == fp)
    }

    /// Insert and evict oldest entries beyond capacity.
    pub fn remember(&mut self, fp: String, policy: &DedupePolicy) {
        if self.contains_fingerprint(&fp) {
            return;
        }
        self.recent_fingerprints.push_back(fp);
        while self.recent_fingerprints.len() > policy.capacity {
            self.recent_fingerprints.pop_front();
        }
    }

    /// Drop fingerprints whose embedded timestamp is older than `now - retention`,
    /// plus any whose timestamp can't be read. Returns how many were removed.
    ///
    /// A retention reaching past the representable range prunes nothing.
    pub fn prune(&mut self, now: NaiveDateTime, policy: &DedupePolicy) -> usize {
        let Some(cutoff) = chrono::Duration::from_std(policy.retention)
            .ok()
            .and_then(|retention| now.checked_sub_signed(retention))
        else {
            return 0;
        };
        let before = self.recent_fingerprints.len();
        self.recent_fingerprints
            .retain(|fp| fingerprint_time(fp).is_some_and(|t| t > cutoff));
        before - self.recent_fingerprints.len()
    }
}

/// Load/save wrapper around the state file.
#[derive(Clone, Debug)]
pub struct StateStore {
    writer: JsonFileWriter,
}

impl StateStore {
    /// Spawn the writer for `path` and load the current state (default if absent or corrupt).
    pub fn open(path: impl Into<PathBuf>) -> (Self, PollState) {
        let path = path.into();
        let state = load_json_or_default(&path, "poll state");
        (
            Self {
                writer: JsonFileWriter::spawn(path),
            },
            state,
        )
    }

    pub async fn save(&self, state: &PollState) -> Result<()> {
        self.writer.write(state).await
    }
}
