//! The boundary between the poll loop and chat delivery.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    domain::{ChatId, OtpEvent},
    formatting::{inline_otp_html, render_notification},
    logging::mask_otp,
    messaging::port::MessagingPort,
    settings::SettingsRepository,
    subscribers::Destinations,
    Result,
};

/// Per-destination outcome of one notification.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<ChatId>,
    pub failed: Vec<(ChatId, String)>,
}

impl DeliveryReport {
    /// A notification counts as sent if at least one destination got it.
    pub fn any_delivered(&self) -> bool {
        !self.delivered.is_empty()
    }
}

#[async_trait]
pub trait Notifier: Send + Sync {
    /// Deliver `event` to every destination. An empty destination list is not an error.
    async fn notify(&self, event: &OtpEvent) -> Result<DeliveryReport>;
}

/// Renders with the current presentation settings and fans out to every subscriber.
pub struct SubscriberNotifier {
    messenger: Arc<dyn MessagingPort>,
    destinations: Arc<dyn Destinations>,
    settings: Arc<SettingsRepository>,
}

impl SubscriberNotifier {
    pub fn new(
        messenger: Arc<dyn MessagingPort>,
        destinations: Arc<dyn Destinations>,
        settings: Arc<SettingsRepository>,
    ) -> Self {
        Self {
            messenger,
            destinations,
            settings,
        }
    }
}

#[async_trait]
impl Notifier for SubscriberNotifier {
    async fn notify(&self, event: &OtpEvent) -> Result<DeliveryReport> {
        let chat_ids = self.destinations.all_chat_ids().await;
        if chat_ids.is_empty() {
            warn!(
                category = "TELEGRAM",
                "no subscribers yet; add the bot to a group and use /subscribe"
            );
            return Ok(DeliveryReport::default());
        }

        let settings = self.settings.snapshot().await;
        let notification = render_notification(event, &settings);
        let keyboards = self.messenger.capabilities().supports_inline_keyboards;
        let fallback_html = inline_otp_html(&notification, &event.otp);

        let mut report = DeliveryReport::default();
        for chat_id in chat_ids {
            let res = if keyboards {
                self.messenger
                    .send_inline_keyboard(chat_id, &notification.html, notification.keyboard.clone())
                    .await
            } else {
                self.messenger.send_html(chat_id, &fallback_html).await
            };
            match res {
                Ok(_) => report.delivered.push(chat_id),
                Err(e) => {
                    warn!(category = "TELEGRAM", chat_id = chat_id.0, error = %e, "send failed");
                    report.failed.push((chat_id, e.to_string()));
                }
            }
        }

        info!(
            category = "TELEGRAM",
            otp = %mask_otp(&event.otp),
            platform = notification.platform.short(),
            delivered = report.delivered.len(),
            failed = report.failed.len(),
            "notification sent"
        );
        Ok(report)
    }
}
