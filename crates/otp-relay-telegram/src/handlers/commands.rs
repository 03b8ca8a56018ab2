use std::sync::Arc;

use teloxide::prelude::*;
use tracing::{info, warn};

use otp_relay_core::{
    domain::{ChatId, UserId},
    messaging::types::{InlineButton, InlineKeyboard},
    settings::SettingKey,
};

use super::{callback::ConfigAction, reply_html};
use crate::router::AppState;

fn parse_command(text: &str) -> (String, String) {
    // Telegram may send `/cmd@botname arg1 ...`
    let mut parts = text.trim().splitn(2, char::is_whitespace);
    let first = parts.next().unwrap_or("").trim();
    let rest = parts.next().unwrap_or("").trim().to_string();

    let cmd = first
        .trim_start_matches('/')
        .split('@')
        .next()
        .unwrap_or("")
        .to_lowercase();

    (cmd, rest)
}

pub(super) async fn handle_command(msg: Message, state: Arc<AppState>) -> ResponseResult<()> {
    let (cmd, _args) = parse_command(msg.text().unwrap_or(""));
    let chat_id = ChatId(msg.chat.id.0);

    match cmd.as_str() {
        "subscribe" => {
            let reply = subscribe(
                &state,
                chat_id,
                msg.chat.is_private(),
                msg.chat.title().map(str::to_string),
            )
            .await;
            reply_html(&state, chat_id, &reply).await;
        }
        "stats" => {
            let reply = stats_html(&state).await;
            reply_html(&state, chat_id, &reply).await;
        }
        "config" => {
            let Some(user) = msg.from() else {
                return Ok(());
            };
            show_config_menu(&state, chat_id, UserId(user.id.0 as i64)).await;
        }
        _ => {}
    }
    Ok(())
}

/// Groups only; private chats are told to add the bot to a group.
async fn subscribe(
    state: &AppState,
    chat_id: ChatId,
    is_private: bool,
    title: Option<String>,
) -> String {
    if is_private {
        return "⚠️ This bot only works in groups.\n\nPlease add me to a group and use /subscribe there."
            .to_string();
    }
    match state.subscribers.add_group(chat_id, title).await {
        Ok(true) => "✅ This group is now subscribed to OTP notifications!".to_string(),
        Ok(false) => "👋 This group is already subscribed!".to_string(),
        Err(e) => {
            warn!(category = "SUBSCRIBERS", chat_id = chat_id.0, error = %e, "subscribe failed");
            "❌ Could not save the subscription. Please try again.".to_string()
        }
    }
}

async fn stats_html(state: &AppState) -> String {
    let stats = state.subscribers.stats().await;
    format!(
        "📊 <b>Bot Statistics</b>\n\n👥 Groups: {}\n📬 Total subscribers: {}",
        stats.groups, stats.total
    )
}

fn config_keyboard() -> InlineKeyboard {
    let button = |label: &str, action: ConfigAction| InlineButton::callback(label, action.callback_data());
    let setting = |label: &str, key: SettingKey| button(label, ConfigAction::Setting(key));

    InlineKeyboard::default()
        .row(vec![button("🔑 Set Password", ConfigAction::Password)])
        .row(vec![
            setting("✏️ Footer Text", SettingKey::FooterText),
            setting("🔗 Footer Link", SettingKey::FooterLink),
        ])
        .row(vec![
            setting("✏️ Num Btn Txt", SettingKey::NumberButtonText),
            setting("🔗 Num Btn Url", SettingKey::NumberButtonUrl),
        ])
        .row(vec![
            setting("✏️ Bak Btn Txt", SettingKey::BackupButtonText),
            setting("🔗 Bak Btn Url", SettingKey::BackupButtonUrl),
        ])
        .row(vec![button("❌ Close", ConfigAction::Cancel)])
}

/// Non-admins get no answer at all.
async fn show_config_menu(state: &AppState, chat_id: ChatId, user: UserId) {
    if !state.is_admin(user) {
        info!(category = "CONFIG", user_id = user.0, "ignoring /config from non-admin");
        return;
    }
    if let Err(e) = state
        .messenger
        .send_inline_keyboard(
            chat_id,
            "⚙️ <b>Bot Configuration</b>\n\nSelect a setting to change:",
            config_keyboard(),
        )
        .await
    {
        warn!(category = "TELEGRAM", chat_id = chat_id.0, error = %e, "config menu send failed");
    }
}
