use std::{
    collections::HashMap,
    future::Future,
    pin::Pin,
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Duration,
};

use teloxide::{
    dispatching::Dispatcher, dptree, error_handlers::ErrorHandler, prelude::*,
    update_listeners::polling_default, ApiError, RequestError,
};
use tokio::sync::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};

use otp_relay_core::{
    auth::Authenticator, domain::UserId, messaging::port::MessagingPort,
    settings::{SettingKey, SettingsRepository},
    subscribers::SubscriberRepository,
};

use crate::handlers;

/// What the admin's next text message will be used for.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum PendingInput {
    Password,
    Setting(SettingKey),
}

/// Per-admin "waiting for a reply" markers for the `/config` flow.
#[derive(Default)]
pub struct PendingInputs {
    inner: Mutex<HashMap<UserId, PendingInput>>,
}

impl PendingInputs {
    pub async fn set(&self, user: UserId, input: PendingInput) {
        self.inner.lock().await.insert(user, input);
    }

    pub async fn take(&self, user: UserId) -> Option<PendingInput> {
        self.inner.lock().await.remove(&user)
    }

    pub async fn clear(&self, user: UserId) {
        self.inner.lock().await.remove(&user);
    }
}

#[derive(Clone)]
pub struct AppState {
    pub admin_id: Option<UserId>,
    pub messenger: Arc<dyn MessagingPort>,
    pub subscribers: Arc<SubscriberRepository>,
    pub settings: Arc<SettingsRepository>,
    pub authenticator: Arc<Authenticator>,
    pub pending: Arc<PendingInputs>,
}

impl AppState {
    /// `/config` is disabled entirely when no admin is configured.
    pub fn is_admin(&self, user: UserId) -> bool {
        self.admin_id == Some(user)
    }
}

fn is_conflict(e: &RequestError) -> bool {
    matches!(e, RequestError::Api(ApiError::TerminatedByOtherGetUpdates))
}

/// Update-listener error sink: a 409 conflict means a second instance is polling.
struct ListenerErrors {
    cancel: CancellationToken,
    conflict: AtomicBool,
}

impl ErrorHandler<RequestError> for ListenerErrors {
    fn handle_error(
        self: Arc<Self>,
        error: RequestError,
    ) -> Pin<Box<dyn Future<Output = ()> + Send + 'static>> {
        if is_conflict(&error) {
            error!(
                category = "TELEGRAM",
                "another bot instance is already polling; stopping"
            );
            self.conflict.store(true, Ordering::SeqCst);
            self.cancel.cancel();
        } else {
            warn!(category = "TELEGRAM", error = %error, "update listener error");
        }
        Box::pin(async {})
    }
}

/// Run the bot dispatcher until `cancel` fires.
///
/// A getUpdates conflict (another instance running) is fatal: it cancels
/// `cancel` and surfaces as an error.
pub async fn run_bot(
    bot: Bot,
    state: Arc<AppState>,
    cancel: CancellationToken,
) -> anyhow::Result<()> {
    match bot.get_me().await {
        Ok(me) => info!(category = "TELEGRAM", username = %me.username(), "bot connected"),
        Err(e) => return Err(anyhow::anyhow!("telegram getMe failed: {e}")),
    }

    if let Err(e) = bot.delete_webhook().drop_pending_updates(true).await {
        warn!(category = "TELEGRAM", error = %e, "deleteWebhook failed");
    }
    if let Err(e) = bot.get_updates().limit(1).timeout(0).await {
        if is_conflict(&e) {
            cancel.cancel();
            return Err(anyhow::anyhow!(
                "another bot instance is already running; stop it first"
            ));
        }
        warn!(category = "TELEGRAM", error = %e, "initial getUpdates probe failed");
    }

    let handler = dptree::entry()
        .branch(Update::filter_callback_query().endpoint(handlers::handle_callback))
        .branch(Update::filter_my_chat_member().endpoint(handlers::handle_my_chat_member))
        .branch(Update::filter_message().endpoint(handlers::handle_message));

    let mut dispatcher = Dispatcher::builder(bot.clone(), handler)
        .dependencies(dptree::deps![state])
        .default_handler(|_| async {})
        .build();

    let shutdown = dispatcher.shutdown_token();
    let watcher = tokio::spawn({
        let cancel = cancel.clone();
        async move {
            cancel.cancelled().await;
            // The dispatcher may not be running yet; retry until it accepts.
            loop {
                match shutdown.shutdown() {
                    Ok(done) => {
                        done.await;
                        break;
                    }
                    Err(_) => tokio::time::sleep(Duration::from_millis(100)).await,
                }
            }
        }
    });

    let listener_errors = Arc::new(ListenerErrors {
        cancel: cancel.clone(),
        conflict: AtomicBool::new(false),
    });
    info!(category = "TELEGRAM", "listening for updates");
    dispatcher
        .dispatch_with_listener(polling_default(bot).await, listener_errors.clone())
        .await;
    watcher.abort();

    if listener_errors.conflict.load(Ordering::SeqCst) {
        return Err(anyhow::anyhow!(
            "another bot instance is already running; stop it first"
        ));
    }
    info!(category = "TELEGRAM", "bot stopped");
    Ok(())
}
