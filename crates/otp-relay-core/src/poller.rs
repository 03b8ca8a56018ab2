//! The poll loop: fetch, order, filter, dispatch, advance, persist.

use std::{
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use chrono::{Local, Utc};
use tokio::{sync::Mutex, time::MissedTickBehavior};
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::{
    domain::{OtpEvent, RawMessage},
    fetcher::MessageSource,
    logging::mask_otp,
    notifier::Notifier,
    otp::{extract_otp, has_otp_indicators},
    phone::{format_phone_with_flag, mask_phone_number},
    state::{fingerprint, DedupePolicy, PollState, StateStore},
};

/// What happened to one message that was past the boundary.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum MessageOutcome {
    NoOtp,
    Duplicate,
    Sent,
    Failed,
}

#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct CycleSummary {
    pub fetched: usize,
    pub sent: usize,
    pub duplicates: usize,
    pub no_otp: usize,
    pub failed: usize,
    pub pruned: usize,
}

impl CycleSummary {
    fn record(&mut self, outcome: MessageOutcome) {
        match outcome {
            MessageOutcome::NoOtp => self.no_otp += 1,
            MessageOutcome::Duplicate => self.duplicates += 1,
            MessageOutcome::Sent => self.sent += 1,
            MessageOutcome::Failed => self.failed += 1,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Baseline {
    /// Messages present at startup that will never be notified.
    pub skipped: usize,
    pub last_seen_timestamp: Option<String>,
}

#[derive(Clone, Copy, Debug)]
pub struct PollerConfig {
    pub interval: Duration,
    pub dedupe: DedupePolicy,
}

/// Clears the busy flag when a cycle ends, however it ends.
struct PollingGuard<'a>(&'a AtomicBool);

impl Drop for PollingGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}

pub struct Poller {
    source: Arc<dyn MessageSource>,
    notifier: Arc<dyn Notifier>,
    store: StateStore,
    state: Mutex<PollState>,
    polling: AtomicBool,
    cfg: PollerConfig,
}

impl Poller {
    pub fn new(
        source: Arc<dyn MessageSource>,
        notifier: Arc<dyn Notifier>,
        store: StateStore,
        initial: PollState,
        cfg: PollerConfig,
    ) -> Self {
        Self {
            source,
            notifier,
            store,
            state: Mutex::new(initial),
            polling: AtomicBool::new(false),
            cfg,
        }
    }

    pub async fn state_snapshot(&self) -> PollState {
        self.state.lock().await.clone()
    }

    /// Idle -> Polling, or `None` if a cycle is already running.
    fn try_begin(&self) -> Option<PollingGuard<'_>> {
        self.polling
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .ok()
            .map(|_| PollingGuard(&self.polling))
    }

    /// Fetch once and move the boundary to the newest message without notifying.
    pub async fn establish_baseline(&self) -> Baseline {
        info!(category = "STARTUP", "fetching latest messages to set baseline");
        let messages = self.source.fetch_messages().await;

        let mut state = self.state.lock().await;
        state.bot_start_time = Some(Utc::now().to_rfc3339());

        match messages.iter().map(|m| m.timestamp.as_str()).max() {
            Some(newest) => {
                state.advance_to(newest);
                info!(
                    category = "STARTUP",
                    baseline = state.last_seen_timestamp.as_deref().unwrap_or(""),
                    skipped = messages.len(),
                    "baseline set, only newer OTPs will be sent"
                );
            }
            None => warn!(
                category = "STARTUP",
                boundary = state.last_seen_timestamp.as_deref().unwrap_or("none"),
                "no messages found, next cycle may notify anything new"
            ),
        }

        if let Err(e) = self.store.save(&state).await {
            error!(category = "STATE", error = %e, "failed to persist baseline");
        }

        Baseline {
            skipped: messages.len(),
            last_seen_timestamp: state.last_seen_timestamp.clone(),
        }
    }

    /// Run one cycle unless one is already in flight.
    pub async fn run_cycle(&self) -> Option<CycleSummary> {
        let Some(_guard) = self.try_begin() else {
            debug!(category = "POLL", "previous cycle still running, tick skipped");
            return None;
        };

        let messages = self.source.fetch_messages().await;
        let mut state = self.state.lock().await;
        let mut summary = CycleSummary {
            fetched: messages.len(),
            ..Default::default()
        };

        let mut newest: Option<&str> = None;
        for msg in messages.iter().rev() {
            if state.is_seen(&msg.timestamp) {
                continue;
            }
            let outcome = self.process(&mut state, msg).await;
            summary.record(outcome);

            if newest.map_or(true, |n| msg.timestamp.as_str() > n) {
                newest = Some(&msg.timestamp);
            }
        }

        if let Some(ts) = newest {
            state.advance_to(ts);
        }
        summary.pruned = state.prune(Local::now().naive_local(), &self.cfg.dedupe);
        state.last_checked_at = Some(Utc::now().to_rfc3339());

        if let Err(e) = self.store.save(&state).await {
            error!(category = "STATE", error = %e, "failed to persist poll state");
        }

        info!(
            category = "POLL",
            fetched = summary.fetched,
            sent = summary.sent,
            duplicates = summary.duplicates,
            no_otp = summary.no_otp,
            failed = summary.failed,
            "cycle complete"
        );
        Some(summary)
    }

    async fn process(&self, state: &mut PollState, msg: &RawMessage) -> MessageOutcome {
        if !has_otp_indicators(&msg.body) {
            return MessageOutcome::NoOtp;
        }
        let Some(otp) = extract_otp(&msg.body) else {
            return MessageOutcome::NoOtp;
        };

        let fp = fingerprint(&msg.phone, &msg.timestamp, &otp);
        if state.contains_fingerprint(&fp) {
            debug!(category = "DEDUP", timestamp = %msg.timestamp, "duplicate skipped");
            return MessageOutcome::Duplicate;
        }

        let phone = format_phone_with_flag(&msg.phone);
        let event = OtpEvent {
            otp,
            phone: phone.formatted,
            country_flag: phone.flag,
            country_code: phone.country_code,
            timestamp: msg.timestamp.clone(),
            raw_body: msg.body.clone(),
        };

        let outcome = match self.notifier.notify(&event).await {
            Ok(report) if report.any_delivered() => {
                state.remember(fp, &self.cfg.dedupe);
                MessageOutcome::Sent
            }
            Ok(_) => MessageOutcome::Failed,
            Err(e) => {
                warn!(category = "OTP", error = %e, "notifier failed");
                MessageOutcome::Failed
            }
        };

        info!(
            category = "OTP",
            otp = %mask_otp(&event.otp),
            phone = %mask_phone_number(&event.phone),
            timestamp = %event.timestamp,
            status = ?outcome,
            "otp processed"
        );
        outcome
    }

    /// Tick until `cancel` fires. A cycle in flight when cancelled runs to completion.
    pub async fn run(self: Arc<Self>, cancel: CancellationToken) {
        let mut ticker = tokio::time::interval(self.cfg.interval);
        ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);
        // First tick fires immediately; the baseline fetch just ran.
        ticker.tick().await;

        info!(category = "POLL", interval = ?self.cfg.interval, "poll loop started");
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {
                    self.run_cycle().await;
                }
            }
        }
        info!(category = "POLL", "poll loop stopped");
    }
}

#[cfg(test)]
mod tests {
    use std::{collections::VecDeque, sync::Mutex as StdMutex};

    use async_trait::async_trait;
    use tokio::sync::Notify;

    use super::*;
    use crate::{
        domain::ChatId,
        notifier::DeliveryReport,
        state::TIMESTAMP_FORMAT,
        Result,
    };

    #[derive(Default)]
    struct ScriptedSource {
        batches: StdMutex<VecDeque<Vec<RawMessage>>>,
        gate: Option<Arc<Notify>>,
    }

    impl ScriptedSource {
        fn new(batches: Vec<Vec<RawMessage>>) -> Self {
            Self {
                batches: StdMutex::new(batches.into_iter().collect()),
                gate: None,
            }
        }
    }

    #[async_trait]
    impl MessageSource for ScriptedSource {
        async fn fetch_messages(&self) -> Vec<RawMessage> {
            if let Some(gate) = &self.gate {
                gate.notified().await;
            }
            self.batches.lock().unwrap().pop_front().unwrap_or_default()
        }
    }

    #[derive(Default)]
    struct RecordingNotifier {
        events: StdMutex<Vec<OtpEvent>>,
        fail: bool,
    }

    #[async_trait]
    impl Notifier for RecordingNotifier {
        async fn notify(&self, event: &OtpEvent) -> Result<DeliveryReport> {
            self.events.lock().unwrap().push(event.clone());
            let mut report = DeliveryReport::default();
            if self.fail {
                report.failed.push((ChatId(1), "blocked".to_string()));
            } else {
                report.delivered.push(ChatId(1));
            }
            Ok(report)
        }
    }

    fn msg(ts: &str, phone: &str, body: &str) -> RawMessage {
        RawMessage {
            timestamp: ts.to_string(),
            country: "US".to_string(),
            phone: phone.to_string(),
            sender: "svc".to_string(),
            body: body.to_string(),
            symbol: None,
            id: None,
        }
    }

    /// A timestamp `secs_ago` in the past, in dashboard format, so pruning keeps it.
    fn recent(secs_ago: i64) -> String {
        (Local::now() - chrono::Duration::seconds(secs_ago))
            .format(TIMESTAMP_FORMAT)
            .to_string()
    }

    fn cfg() -> PollerConfig {
        PollerConfig {
            interval: Duration::from_secs(5),
            dedupe: DedupePolicy {
                capacity: 100,
                retention: Duration::from_secs(3600),
            },
        }
    }

    struct Harness {
        poller: Arc<Poller>,
        notifier: Arc<RecordingNotifier>,
        state_path: std::path::PathBuf,
        _dir: tempfile::TempDir,
    }

    fn harness(source: ScriptedSource, notifier: RecordingNotifier) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let state_path = dir.path().join("state.json");
        harness_at(dir, state_path, source, notifier)
    }

    fn harness_at(
        dir: tempfile::TempDir,
        state_path: std::path::PathBuf,
        source: ScriptedSource,
        notifier: RecordingNotifier,
    ) -> Harness {
        let (store, initial) = StateStore::open(&state_path);
        let notifier = Arc::new(notifier);
        let poller = Arc::new(Poller::new(
            Arc::new(source),
            notifier.clone(),
            store,
            initial,
            cfg(),
        ));
        Harness {
            poller,
            notifier,
            state_path,
            _dir: dir,
        }
    }

    #[tokio::test]
    async fn baseline_then_one_new_message_is_sent_once() {
        let t0 = recent(120);
        let t1 = recent(60);
        let h = harness(
            ScriptedSource::new(vec![
                vec![msg(&t0, "15550100", "code 111111")],
                vec![
                    msg(&t1, "15550100", "Telegram code 85191"),
                    msg(&t0, "15550100", "code 111111"),
                ],
            ]),
            RecordingNotifier::default(),
        );

        let baseline = h.poller.establish_baseline().await;
        assert_eq!(baseline.skipped, 1);
        assert_eq!(baseline.last_seen_timestamp.as_deref(), Some(t0.as_str()));
        assert!(h.notifier.events.lock().unwrap().is_empty());

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.sent, 1);

        let events = h.notifier.events.lock().unwrap().clone();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].otp, "85191");
        assert_eq!(events[0].phone, "+15550100");
        assert_eq!(events[0].country_code.as_deref(), Some("US"));

        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(t1.as_str()));

        let (_, on_disk) = StateStore::open(&h.state_path);
        assert_eq!(on_disk.last_seen_timestamp.as_deref(), Some(t1.as_str()));
        assert!(on_disk.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn identical_rows_in_one_cycle_are_sent_once() {
        let ts = recent(30);
        let row = msg(&ts, "15550100", "code 123456");
        let h = harness(
            ScriptedSource::new(vec![vec![row.clone(), row]]),
            RecordingNotifier::default(),
        );

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(summary.duplicates, 1);
        assert_eq!(h.notifier.events.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn messages_at_or_before_boundary_are_ignored() {
        let old = recent(300);
        let boundary = recent(200);
        let h = harness(
            ScriptedSource::new(vec![
                vec![msg(&boundary, "1", "code 1234")],
                vec![
                    msg(&boundary, "2", "code 5678"),
                    msg(&old, "3", "code 9999"),
                ],
            ]),
            RecordingNotifier::default(),
        );

        h.poller.establish_baseline().await;
        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(
            summary,
            CycleSummary {
                fetched: 2,
                ..Default::default()
            }
        );
        assert!(h.notifier.events.lock().unwrap().is_empty());
        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(boundary.as_str()));
    }

    #[tokio::test]
    async fn messages_are_dispatched_oldest_first_and_boundary_passes_non_otp_rows() {
        let (a, b, c) = (recent(90), recent(60), recent(30));
        let h = harness(
            ScriptedSource::new(vec![vec![
                msg(&c, "1", "hello there"),
                msg(&b, "1", "code 2222"),
                msg(&a, "1", "code 1111"),
            ]]),
            RecordingNotifier::default(),
        );

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.sent, 2);
        assert_eq!(summary.no_otp, 1);

        let otps: Vec<String> = h
            .notifier
            .events
            .lock()
            .unwrap()
            .iter()
            .map(|e| e.otp.clone())
            .collect();
        assert_eq!(otps, vec!["1111", "2222"]);
        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(c.as_str()));
    }

    #[tokio::test]
    async fn failed_delivery_is_not_remembered_but_boundary_advances() {
        let ts = recent(10);
        let h = harness(
            ScriptedSource::new(vec![vec![msg(&ts, "1", "code 4242")]]),
            RecordingNotifier {
                fail: true,
                ..Default::default()
            },
        );

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.failed, 1);
        let st = h.poller.state_snapshot().await;
        assert!(st.recent_fingerprints.is_empty());
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(ts.as_str()));
    }

    #[tokio::test]
    async fn empty_fetch_never_moves_boundary_backwards() {
        let ts = recent(10);
        let h = harness(
            ScriptedSource::new(vec![vec![msg(&ts, "1", "code 4242")], vec![]]),
            RecordingNotifier::default(),
        );

        h.poller.run_cycle().await.unwrap();
        h.poller.run_cycle().await.unwrap();
        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(ts.as_str()));
    }

    #[tokio::test]
    async fn overlapping_tick_is_a_no_op() {
        let gate = Arc::new(Notify::new());
        let source = ScriptedSource {
            batches: StdMutex::new(VecDeque::from(vec![vec![msg(&recent(5), "1", "code 7777")]])),
            gate: Some(gate.clone()),
        };
        let h = harness(source, RecordingNotifier::default());

        let first = tokio::spawn({
            let poller = h.poller.clone();
            async move { poller.run_cycle().await }
        });
        // Let the first cycle reach the gated fetch.
        while !h.poller.polling.load(Ordering::Acquire) {
            tokio::task::yield_now().await;
        }

        assert_eq!(h.poller.run_cycle().await, None);

        gate.notify_one();
        let summary = first.await.unwrap().unwrap();
        assert_eq!(summary.sent, 1);
        assert!(!h.poller.polling.load(Ordering::Acquire));
    }

    #[tokio::test(start_paused = true)]
    async fn run_stops_on_cancel() {
        let h = harness(ScriptedSource::default(), RecordingNotifier::default());
        let cancel = CancellationToken::new();
        let task = tokio::spawn(h.poller.clone().run(cancel.clone()));

        tokio::time::sleep(Duration::from_secs(12)).await;
        cancel.cancel();
        task.await.unwrap();

        let st = h.poller.state_snapshot().await;
        assert!(st.last_checked_at.is_some());
    }

    #[tokio::test]
    async fn empty_baseline_leaves_boundary_unset_and_next_cycle_sends() {
        let ts = recent(15);
        let h = harness(
            ScriptedSource::new(vec![vec![], vec![msg(&ts, "15550100", "code 303030")]]),
            RecordingNotifier::default(),
        );

        let baseline = h.poller.establish_baseline().await;
        assert_eq!(baseline.skipped, 0);
        assert_eq!(baseline.last_seen_timestamp, None);
        assert_eq!(h.poller.state_snapshot().await.last_seen_timestamp, None);

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.sent, 1);
        assert_eq!(h.notifier.events.lock().unwrap()[0].otp, "303030");
        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(ts.as_str()));
    }

    #[tokio::test]
    async fn unwritable_state_file_does_not_abort_the_cycle() {
        let dir = tempfile::tempdir().unwrap();
        let blocker = dir.path().join("file");
        std::fs::write(&blocker, "not a directory").unwrap();
        let state_path = blocker.join("state.json");

        let ts = recent(20);
        let h = harness_at(
            dir,
            state_path,
            ScriptedSource::new(vec![vec![msg(&ts, "1", "code 5150")]]),
            RecordingNotifier::default(),
        );

        let summary = h.poller.run_cycle().await.unwrap();
        assert_eq!(summary.sent, 1);
        let st = h.poller.state_snapshot().await;
        assert_eq!(st.last_seen_timestamp.as_deref(), Some(ts.as_str()));
        assert_eq!(st.recent_fingerprints.len(), 1);
        assert!(!h.state_path.exists());
    }
}
