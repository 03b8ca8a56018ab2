use std::sync::Arc;

use anyhow::Context;
use teloxide::Bot;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use otp_relay_core::{
    auth::{Authenticator, Credentials},
    config::Config,
    domain::UserId,
    env_file::EnvFile,
    fetcher::{FetchConfig, MessageFetcher},
    messaging::{
        port::MessagingPort,
        throttled::{ThrottleConfig, ThrottledMessenger},
    },
    notifier::SubscriberNotifier,
    poller::{Poller, PollerConfig},
    session::SessionStore,
    settings::SettingsRepository,
    state::{DedupePolicy, StateStore},
    subscribers::SubscriberRepository,
};
use otp_relay_http::ReqwestTransport;
use otp_relay_telegram::{
    router::{run_bot, AppState, PendingInputs},
    TelegramMessenger,
};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    // Config first: it loads `.env`, which may carry LOG_LEVEL.
    let cfg = Arc::new(Config::load()?);
    otp_relay_core::logging::init("otp_relay")?;

    let env_file = EnvFile::new(&cfg.env_file);
    let sessions = Arc::new(SessionStore::new(
        cfg.session_cookie.clone(),
        Some(env_file.clone()),
    ));
    let transport = Arc::new(ReqwestTransport::new(cfg.request_timeout)?);
    let authenticator = Arc::new(
        Authenticator::new(
            transport.clone(),
            cfg.dashboard_origin.clone(),
            cfg.login_url()?,
            Credentials {
                username: cfg.login_username.clone(),
                password: cfg.login_password.clone(),
            },
            sessions.clone(),
        )
        .with_env_file(env_file),
    );
    let fetcher = Arc::new(MessageFetcher::new(
        transport,
        authenticator.clone(),
        sessions,
        FetchConfig::from_config(&cfg),
    ));

    let subscribers = Arc::new(SubscriberRepository::open(&cfg.subscribers_file));
    let settings = Arc::new(SettingsRepository::open(&cfg.settings_file));

    let bot = Bot::new(cfg.telegram_bot_token.clone());
    // Throttle broadcasts; the adapter still retries once on 429 RetryAfter.
    let raw_messenger: Arc<dyn MessagingPort> = Arc::new(TelegramMessenger::new(bot.clone()));
    let messenger: Arc<dyn MessagingPort> = Arc::new(ThrottledMessenger::new(
        raw_messenger,
        ThrottleConfig::default(),
    ));
    let notifier = Arc::new(SubscriberNotifier::new(
        messenger.clone(),
        subscribers.clone(),
        settings.clone(),
    ));

    let (store, initial) = StateStore::open(&cfg.state_file);
    let poller = Arc::new(Poller::new(
        fetcher,
        notifier,
        store,
        initial,
        PollerConfig {
            interval: cfg.poll_interval,
            dedupe: DedupePolicy {
                capacity: cfg.max_cache_size,
                retention: cfg.cache_retention,
            },
        },
    ));

    let baseline = poller.establish_baseline().await;
    let stats = subscribers.stats().await;
    info!(
        category = "STARTUP",
        skipped = baseline.skipped,
        last_seen = baseline.last_seen_timestamp.as_deref().unwrap_or("none"),
        users = stats.users,
        groups = stats.groups,
        total = stats.total,
        interval = ?cfg.poll_interval,
        window = ?cfg.fetch_window,
        api = %cfg.api_url,
        "relay ready"
    );
    if cfg.admin_id.is_none() {
        warn!(category = "STARTUP", "ADMIN_ID not set; /config is disabled");
    }

    let state = Arc::new(AppState {
        admin_id: cfg.admin_id.map(UserId),
        messenger,
        subscribers,
        settings,
        authenticator,
        pending: Arc::new(PendingInputs::default()),
    });

    let cancel = CancellationToken::new();
    let poll_task = tokio::spawn(poller.run(cancel.clone()));
    // The relay is useless without the bot; its exit stops everything.
    let bot_task = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            let res = run_bot(bot, state, cancel.clone()).await;
            cancel.cancel();
            res
        }
    });

    tokio::select! {
        _ = shutdown_signal() => info!(category = "SHUTDOWN", "signal received, stopping"),
        _ = cancel.cancelled() => {}
    }
    cancel.cancel();

    poll_task.await.context("poll task panicked")?;
    match bot_task.await.context("bot task panicked")? {
        Ok(()) => {
            info!(category = "SHUTDOWN", "stopped cleanly");
            Ok(())
        }
        Err(e) => {
            error!(category = "TELEGRAM", error = %e, "bot stopped with a fatal error");
            Err(e)
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            warn!(category = "SHUTDOWN", error = %e, "ctrl-c handler unavailable");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sig) => {
                sig.recv().await;
            }
            Err(e) => {
                warn!(category = "SHUTDOWN", error = %e, "SIGTERM handler unavailable");
                std::future::pending::<()>().await;
            }
        }
    };
    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
}
