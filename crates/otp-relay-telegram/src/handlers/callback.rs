use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use otp_relay_core::{
    domain::{ChatId, MessageId, MessageRef, UserId},
    formatting::{escape_html, parse_otp_callback},
    settings::SettingKey,
};

use crate::router::{AppState, PendingInput};

const CONFIG_CALLBACK_PREFIX: &str = "config:";

/// A button on the `/config` menu.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(super) enum ConfigAction {
    Password,
    Setting(SettingKey),
    Cancel,
}

impl ConfigAction {
    pub(super) fn callback_data(self) -> String {
        let id = match self {
            ConfigAction::Password => "password",
            ConfigAction::Cancel => "cancel",
            ConfigAction::Setting(key) => key.as_str(),
        };
        format!("{CONFIG_CALLBACK_PREFIX}{id}")
    }

    pub(super) fn parse(data: &str) -> Option<Self> {
        match data.strip_prefix(CONFIG_CALLBACK_PREFIX)? {
            "password" => Some(ConfigAction::Password),
            "cancel" => Some(ConfigAction::Cancel),
            other => SettingKey::parse(other).map(ConfigAction::Setting),
        }
    }
}

pub(super) async fn handle_callback(q: CallbackQuery, state: Arc<AppState>) -> ResponseResult<()> {
    let message = q.message.as_ref().map(|m| MessageRef {
        chat_id: ChatId(m.chat.id.0),
        message_id: MessageId(m.id.0),
    });
    let user = UserId(q.from.id.0 as i64);
    let data = q.data.as_deref().unwrap_or("");

    on_callback(&state, &q.id, user, message, data).await;
    Ok(())
}

/// Every callback query is answered exactly once, whatever the data.
async fn on_callback(
    state: &AppState,
    callback_id: &str,
    user: UserId,
    message: Option<MessageRef>,
    data: &str,
) {
    let (text, show_alert) = if let Some(otp) = parse_otp_callback(data) {
        (Some(format!("🔑 OTP: {otp}")), true)
    } else if let Some(action) = ConfigAction::parse(data) {
        if state.is_admin(user) {
            start_config_action(state, user, message, action).await;
        }
        (None, false)
    } else {
        (None, false)
    };

    if let Err(e) = state
        .messenger
        .answer_callback_query(callback_id, text.as_deref(), show_alert)
        .await
    {
        warn!(category = "TELEGRAM", error = %e, "answerCallbackQuery failed");
    }
}

async fn start_config_action(
    state: &AppState,
    user: UserId,
    message: Option<MessageRef>,
    action: ConfigAction,
) {
    let prompt = match action {
        ConfigAction::Cancel => {
            state.pending.clear(user).await;
            "⚙️ Configuration cancelled.".to_string()
        }
        ConfigAction::Password => {
            state.pending.set(user, PendingInput::Password).await;
            "🔑 <b>Set Password</b>\n\nPlease reply with the new password:".to_string()
        }
        ConfigAction::Setting(key) => {
            state.pending.set(user, PendingInput::Setting(key)).await;
            let settings = state.settings.snapshot().await;
            let (icon, what) = if key.is_url() {
                ("🔗", "URL")
            } else {
                ("✏️", "text")
            };
            format!(
                "{icon} <b>Set {key}</b>\n\nCurrent: <code>{}</code>\n\nPlease reply with the new {what}:",
                escape_html(settings.get(key))
            )
        }
    };
    info!(category = "CONFIG", user_id = user.0, action = ?action, "config action selected");

    let Some(message) = message else {
        return;
    };
    if let Err(e) = state.messenger.edit_html(message, &prompt).await {
        warn!(category = "TELEGRAM", error = %e, "config prompt edit failed");
    }
}
