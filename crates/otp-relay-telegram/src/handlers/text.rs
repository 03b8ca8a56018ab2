use tracing::warn;

use otp_relay_core::formatting::escape_html;

use crate::router::{AppState, PendingInput};

/// Apply an admin's reply to a `/config` prompt and return the confirmation.
///
/// The pending marker is already consumed; a rejected value needs a fresh `/config`.
pub(super) async fn apply_pending_reply(state: &AppState, input: PendingInput, text: &str) -> String {
    let value = text.trim();
    match input {
        PendingInput::Password => match state.authenticator.set_password(value).await {
            Ok(()) => "✅ Password updated successfully!".to_string(),
            Err(e) => {
                warn!(category = "CONFIG", error = %e, "password update failed");
                format!("❌ Password not updated: {}", escape_html(&e.to_string()))
            }
        },
        PendingInput::Setting(key) => match state.settings.update(key, value).await {
            Ok(_) => {
                let shown = if key.is_url() {
                    format!("<code>{}</code>", escape_html(value))
                } else {
                    format!("<b>{}</b>", escape_html(value))
                };
                format!("✅ {key} updated to: {shown}")
            }
            Err(e) => {
                warn!(category = "CONFIG", setting = key.as_str(), error = %e, "setting update failed");
                format!("❌ {key} not updated: {}", escape_html(&e.to_string()))
            }
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::testing::{harness, ADMIN};
    use otp_relay_core::{auth::PASSWORD_ENV_KEY, settings::SettingKey};

    #[tokio::test]
    async fn password_reply_updates_credentials_and_env_file() {
        let h = harness(Some(ADMIN));
        let reply = apply_pending_reply(&h.state, PendingInput::Password, "  n3w-pass ").await;
        assert_eq!(reply, "✅ Password updated successfully!");
        assert_eq!(h.env_file().get(PASSWORD_ENV_KEY).as_deref(), Some("n3w-pass"));
    }

    #[tokio::test]
    async fn setting_reply_is_escaped_and_persisted() {
        let h = harness(Some(ADMIN));
        let reply = apply_pending_reply(
            &h.state,
            PendingInput::Setting(SettingKey::FooterText),
            "<Team>",
        )
        .await;
        assert_eq!(reply, "✅ Footer Text updated to: <b>&lt;Team&gt;</b>");
        assert_eq!(h.state.settings.snapshot().await.footer_text, "<Team>");
    }

    #[tokio::test]
    async fn invalid_url_is_reported_and_not_applied() {
        let h = harness(Some(ADMIN));
        let before = h.state.settings.snapshot().await;
        let reply = apply_pending_reply(
            &h.state,
            PendingInput::Setting(SettingKey::NumberButtonUrl),
            "not a url",
        )
        .await;
        assert!(reply.starts_with("❌ Number Button URL not updated"));
        assert_eq!(h.state.settings.snapshot().await, before);
    }
}
