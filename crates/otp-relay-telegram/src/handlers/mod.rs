//! Telegram update handlers.
//!
//! Each handler is a thin adapter: it pulls ids out of the update, runs the
//! matching operation against [`AppState`], and replies through the messenger.

use std::sync::Arc;

use teloxide::{
    prelude::*,
    types::{CallbackQuery, ChatMemberUpdated, Message},
};

use otp_relay_core::domain::{ChatId, UserId};
use tracing::warn;

use crate::router::AppState;

mod callback;
mod commands;
mod membership;
mod text;

pub async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    callback::handle_callback(q, state).await
}

pub async fn handle_my_chat_member(
    update: ChatMemberUpdated,
    state: Arc<AppState>,
) -> ResponseResult<()> {
    membership::handle_my_chat_member(update, state).await
}

pub async fn handle_message(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let Some(body) = msg.text() else {
        return Ok(());
    };

    if body.starts_with('/') {
        return commands::handle_command(msg, state).await;
    }

    // Plain text only matters as the reply to a pending /config prompt.
    let Some(user) = msg.from() else {
        return Ok(());
    };
    let user_id = UserId(user.id.0 as i64);
    if let Some(input) = state.pending.take(user_id).await {
        let reply = text::apply_pending_reply(&state, input, body).await;
        reply_html(&state, ChatId(msg.chat.id.0), &reply).await;
    }
    Ok(())
}

/// Best-effort HTML reply; failures are logged, never propagated to the dispatcher.
async fn reply_html(state: &AppState, chat_id: ChatId, html: &str) {
    if let Err(e) = state.messenger.send_html(chat_id, html).await {
        warn!(category = "TELEGRAM", chat_id = chat_id.0, error = %e, "reply failed");
    }
}

#[cfg(test)]
pub(crate) mod testing {
    use std::sync::{Arc, Mutex};

    use async_trait::async_trait;
    use otp_relay_core::{
        auth::{Authenticator, Credentials},
        domain::{ChatId, MessageId, MessageRef, UserId},
        env_file::EnvFile,
        errors::Error,
        messaging::{
            port::MessagingPort,
            types::{InlineKeyboard, MessagingCapabilities},
        },
        session::SessionStore,
        settings::SettingsRepository,
        subscribers::SubscriberRepository,
        transport::{HttpRequest, HttpResponse, HttpTransport},
        Result,
    };
    use url::Url;

    use crate::router::{AppState, PendingInputs};

    pub const ADMIN: UserId = UserId(1000);

    #[derive(Clone, Debug, PartialEq, Eq)]
    pub enum Sent {
        Html(ChatId, String),
        Keyboard(ChatId, String, InlineKeyboard),
        Edit(MessageRef, String),
        Answer(String, Option<String>, bool),
    }

    #[derive(Default)]
    pub struct RecordingMessenger {
        pub sent: Mutex<Vec<Sent>>,
    }

    impl RecordingMessenger {
        pub fn take(&self) -> Vec<Sent> {
            std::mem::take(&mut *self.sent.lock().unwrap())
        }
    }

    #[async_trait]
    impl MessagingPort for RecordingMessenger {
        fn capabilities(&self) -> MessagingCapabilities {
            MessagingCapabilities {
                supports_html: true,
                supports_edit: true,
                supports_inline_keyboards: true,
                max_message_len: 4096,
            }
        }

        async fn send_html(&self, chat_id: ChatId, html: &str) -> Result<MessageRef> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Html(chat_id, html.to_string()));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn send_inline_keyboard(
            &self,
            chat_id: ChatId,
            html: &str,
            keyboard: InlineKeyboard,
        ) -> Result<MessageRef> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Keyboard(chat_id, html.to_string(), keyboard));
            Ok(MessageRef {
                chat_id,
                message_id: MessageId(1),
            })
        }

        async fn edit_html(&self, msg: MessageRef, html: &str) -> Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push(Sent::Edit(msg, html.to_string()));
            Ok(())
        }

        async fn answer_callback_query(
            &self,
            callback_id: &str,
            text: Option<&str>,
            show_alert: bool,
        ) -> Result<()> {
            self.sent.lock().unwrap().push(Sent::Answer(
                callback_id.to_string(),
                text.map(str::to_string),
                show_alert,
            ));
            Ok(())
        }
    }

    /// The config flow never logs in; any request is a test bug.
    struct NoNetwork;

    #[async_trait]
    impl HttpTransport for NoNetwork {
        async fn execute(&self, req: &HttpRequest) -> Result<HttpResponse> {
            Err(Error::Fetch(format!("unexpected request to {}", req.url)))
        }
    }

    pub struct Harness {
        pub state: Arc<AppState>,
        pub messenger: Arc<RecordingMessenger>,
        pub dir: tempfile::TempDir,
    }

    impl Harness {
        pub fn env_file(&self) -> EnvFile {
            EnvFile::new(self.dir.path().join(".env"))
        }
    }

    pub fn harness(admin_id: Option<UserId>) -> Harness {
        let dir = tempfile::tempdir().unwrap();
        let messenger = Arc::new(RecordingMessenger::default());
        let origin = Url::parse("http://dashboard.test").unwrap();
        let authenticator = Authenticator::new(
            Arc::new(NoNetwork),
            origin.clone(),
            origin.join("/ints/signin").unwrap(),
            Credentials {
                username: "operator".to_string(),
                password: "old-secret".to_string(),
            },
            Arc::new(SessionStore::new(None, None)),
        )
        .with_env_file(EnvFile::new(dir.path().join(".env")));

        let state = Arc::new(AppState {
            admin_id,
            messenger: messenger.clone(),
            subscribers: Arc::new(SubscriberRepository::open(
                dir.path().join("subscribers.json"),
            )),
            settings: Arc::new(SettingsRepository::open(dir.path().join("settings.json"))),
            authenticator: Arc::new(authenticator),
            pending: Arc::new(PendingInputs::default()),
        });
        Harness {
            state,
            messenger,
            dir,
        }
    }
}
